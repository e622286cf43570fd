use std::{
    borrow::Cow,
    fs, io,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::errors::StorageError;
use crate::StorageArea;

/// Durable area keeping one file per physical key under a directory. File names are the
/// percent-encoded keys.
pub struct FileStorageArea<'a> {
    path: Cow<'a, Path>,
}

impl<'a> FileStorageArea<'a> {
    pub fn new<P>(path: P) -> Self
    where
        P: Into<Cow<'a, Path>>,
    {
        FileStorageArea { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.path.join(encode_file_name(key))
    }
}

impl StorageArea for FileStorageArea<'_> {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        match fs::read_to_string(self.entry_path(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.path)?;
        fs::write(self.entry_path(key), value)?;
        debug!(key, path = %self.path.display(), "wrote storage file");
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.entry_path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut keys = vec![];
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            if let Some(key) = file_name.to_str().and_then(decode_file_name) {
                keys.push(key);
            }
        }
        keys.sort();

        Ok(keys)
    }
}

fn encode_file_name(key: &str) -> String {
    match key {
        // `.` and `..` survive percent-encoding but cannot be file names
        "." => "%2E".to_owned(),
        ".." => "%2E%2E".to_owned(),
        key => urlencoding::encode(key).into_owned(),
    }
}

fn decode_file_name(file_name: &str) -> Option<String> {
    urlencoding::decode(file_name).ok().map(Cow::into_owned)
}
