use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use ican_storage::{StorageConfig, StorageType};
use serde::Deserialize;

const APP_NAME: &str = "ican";
const CONFIG_FILE_NAME: &str = "storage_config.toml";
const DATA_DIR_NAME: &str = "storage";

#[derive(Deserialize, Debug)]
pub(crate) struct ApplicationConfig {
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ApplicationConfig {
    pub fn data_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.data_dir {
            Some(data_dir) => Ok(data_dir.clone()),
            None => Ok(xdg::BaseDirectories::with_prefix(APP_NAME)?.get_data_home().join(DATA_DIR_NAME)),
        }
    }
}

pub(super) fn load_config(
    path_override: Option<PathBuf>,
    prefix_override: Option<String>,
    storage_type_override: Option<StorageType>,
) -> anyhow::Result<ApplicationConfig> {
    let config_file_path = if let Some(path_override) = path_override {
        path_override
    } else {
        let xdg_dirs = xdg::BaseDirectories::with_prefix(APP_NAME)?;

        let user_config_dir = xdg_dirs.get_config_home();
        if !user_config_dir.exists() {
            std::fs::create_dir_all(&user_config_dir)?;
        }

        let config_file_path = user_config_dir.join(CONFIG_FILE_NAME);
        if !config_file_path.exists() {
            write_default_config_file(&config_file_path)?;
        }

        config_file_path
    };

    let config: ApplicationConfig = Config::builder()
        .add_source(File::from(config_file_path).format(FileFormat::Toml))
        .add_source(Environment::with_prefix("ICAN").prefix_separator("_").separator("__").try_parsing(true))
        .set_override_option("storage.prefix", prefix_override)?
        .set_override_option("storage.storage_type", storage_type_override.map(|t| t.as_str()))?
        .build()?
        .try_deserialize()?;

    Ok(config)
}

fn write_default_config_file(path: &Path) -> anyhow::Result<()> {
    let default_config_content = include_str!("../static/default_config.toml");
    std::fs::write(path, default_config_content)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use std::path::PathBuf;

    use ican_storage::StorageType;

    use super::{load_config, write_default_config_file};

    #[test]
    fn when_loading_default_config_then_player_prefix_is_used() {
        let dir = tempfile::tempdir().expect("creating temp dir should be successful");
        let path = dir.path().join("storage_config.toml");
        write_default_config_file(&path).expect("writing default config should be successful");

        let config = load_config(Some(path), None, None).expect("loading config should be successful");

        assert_eq!(config.storage.qualified_prefix(), "NTU-ICAN-PLAYER.");
        assert_eq!(config.storage.storage_type, StorageType::LocalStorage);
        assert!(config.storage.notify.remove_item);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn when_overrides_are_given_then_they_win_over_the_file() {
        let dir = tempfile::tempdir().expect("creating temp dir should be successful");
        let path = dir.path().join("storage_config.toml");
        std::fs::write(&path, "data_dir = \"/tmp/ican\"\n[storage]\nprefix = \"file\"\n")
            .expect("writing config should be successful");

        let config = load_config(Some(path), Some("cli".to_owned()), Some(StorageType::SessionStorage))
            .expect("loading config should be successful");

        assert_eq!(config.storage.prefix, "cli");
        assert_eq!(config.storage.storage_type, StorageType::SessionStorage);
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/ican")));
        assert_eq!(config.data_dir().expect("data dir should resolve"), PathBuf::from("/tmp/ican"));
    }
}
