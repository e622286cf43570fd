use std::path::PathBuf;
use std::sync::Arc;

use clap::Subcommand;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::Table;
use ican_storage::backend::{FileStorageArea, MemoryCookieJar, MemoryStore};
use ican_storage::{PrefixedStorage, StorageConfig, StorageEvent};
use serde_json::Value;

/// Opens the store the CLI works on. A process has no cookie jar that outlives it, so cookies are
/// reported as unsupported and any write that would land there fails.
pub(crate) fn open_storage(config: StorageConfig, data_dir: PathBuf) -> PrefixedStorage {
    PrefixedStorage::new(
        config,
        Arc::new(FileStorageArea::new(data_dir)),
        Arc::new(MemoryStore::new().area()),
        Arc::new(MemoryCookieJar::disabled()),
    )
}

pub(crate) trait RunCommand {
    fn run(&self, storage: &PrefixedStorage) -> anyhow::Result<()>;
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Prints the value stored under a key
    Get { key: String },
    /// Stores a value. JSON is stored as is, anything else as a string
    Set { key: String, value: String },
    /// Removes one or more keys
    Remove {
        #[arg(required = true)]
        keys: Vec<String>,
    },
    /// Lists keys and values under the prefix
    Keys,
    /// Prints the number of keys under the prefix
    Length,
    /// Removes every key under the prefix
    Clear {
        /// Only removes keys matching this regular expression
        #[arg(long)]
        filter: Option<String>,
    },
}

impl RunCommand for Command {
    fn run(&self, storage: &PrefixedStorage) -> anyhow::Result<()> {
        let mut events = storage.subscribe();
        self.execute(storage)?;

        let errors: Vec<String> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                StorageEvent::Error { message } => Some(message),
                _ => None,
            })
            .collect();
        if !errors.is_empty() {
            anyhow::bail!("storage reported errors: {}", errors.join("; "));
        }

        Ok(())
    }
}

impl Command {
    fn execute(&self, storage: &PrefixedStorage) -> anyhow::Result<()> {
        match self {
            Command::Get { key } => {
                let value = storage.get(key, None).ok_or_else(|| anyhow::anyhow!("`{key}` is not set"))?;
                println!("{}", render(&value));
            }
            Command::Set { key, value } => {
                if !storage.set(key, &parse_value(value), None) {
                    anyhow::bail!("failed to store `{key}`");
                }
            }
            Command::Remove { keys } => storage.remove(keys, None),
            Command::Keys => {
                let mut table = Table::new();
                table.load_preset(UTF8_FULL).apply_modifier(UTF8_ROUND_CORNERS);
                table.set_header(vec!["Key", "Value"]);

                let mut keys = storage.keys(None);
                keys.sort();
                for key in keys {
                    let value = storage.get(&key, None).map(|value| render(&value)).unwrap_or_default();
                    table.add_row(vec![key, value]);
                }

                println!("{table}");
            }
            Command::Length => println!("{}", storage.length(None)),
            Command::Clear { filter } => {
                if !storage.clear_all(filter.as_deref(), None) {
                    anyhow::bail!("failed to clear storage under `{}`", storage.prefix());
                }
            }
        }

        Ok(())
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}

fn render(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        value => value.to_string(),
    }
}

#[cfg(test)]
mod test {
    use ican_storage::{PrefixedStorage, StorageConfig, StorageType};
    use serde_json::json;

    use super::{open_storage, parse_value, render, Command, RunCommand};

    fn storage(dir: &std::path::Path) -> PrefixedStorage {
        open_storage(StorageConfig::builder().prefix("NTU-ICAN-PLAYER").build(), dir.to_path_buf())
    }

    #[test]
    fn when_parsing_values_then_json_is_kept_and_text_becomes_string() {
        assert_eq!(parse_value(r#"[{"_id":"abc"}]"#), json!([{"_id": "abc"}]));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("Daft Punk"), json!("Daft Punk"));
    }

    #[test]
    fn when_rendering_values_then_strings_are_unquoted() {
        assert_eq!(render(&json!("Daft Punk")), "Daft Punk");
        assert_eq!(render(&json!({"volume": 30})), r#"{"volume":30}"#);
    }

    #[test]
    fn when_running_commands_then_file_storage_is_updated_across_instances() {
        let dir = tempfile::tempdir().expect("creating temp dir should be successful");

        Command::Set { key: "song1".to_owned(), value: "\"a\"".to_owned() }
            .run(&storage(dir.path()))
            .expect("set should be successful");
        Command::Set { key: "fav1".to_owned(), value: "[1,2]".to_owned() }
            .run(&storage(dir.path()))
            .expect("set should be successful");
        assert_eq!(storage(dir.path()).length(None), 2);

        Command::Clear { filter: Some("^song".to_owned()) }.run(&storage(dir.path())).expect("clear should be successful");

        let storage = storage(dir.path());
        assert_eq!(storage.keys(None), vec!["fav1"]);
        assert_eq!(storage.get("fav1", None), Some(json!([1, 2])));
        assert!(Command::Get { key: "song1".to_owned() }.run(&storage).is_err());

        Command::Remove { keys: vec!["fav1".to_owned()] }.run(&storage).expect("remove should be successful");
        assert_eq!(storage.length(None), 0);
    }

    #[test]
    fn when_file_write_fails_then_set_is_reported_as_failure() {
        let dir = tempfile::tempdir().expect("creating temp dir should be successful");
        let key = "k".repeat(300);

        let result = Command::Set { key: key.clone(), value: "1".to_owned() }.run(&storage(dir.path()));

        assert!(result.is_err());
        assert!(Command::Get { key }.run(&storage(dir.path())).is_err());
    }

    #[test]
    fn when_cookie_storage_is_selected_then_commands_fail() {
        let dir = tempfile::tempdir().expect("creating temp dir should be successful");
        let config = StorageConfig::builder().storage_type(StorageType::Cookie).build();
        let storage = open_storage(config, dir.path().to_path_buf());

        assert!(Command::Set { key: "VOLUME".to_owned(), value: "30".to_owned() }.run(&storage).is_err());
        assert!(Command::Remove { keys: vec!["VOLUME".to_owned()] }.run(&storage).is_err());
        assert!(Command::Clear { filter: None }.run(&storage).is_err());
    }
}
