use std::{fmt, path::Path, str::FromStr};

use bon::Builder;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_PREFIX: &str = "ls";
pub const DEFAULT_COOKIE_PATH: &str = "/";
const ENV_PREFIX: &str = "ICAN_STORAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StorageType {
    #[default]
    #[serde(rename = "localStorage")]
    LocalStorage,
    #[serde(rename = "sessionStorage")]
    SessionStorage,
    #[serde(rename = "cookie")]
    Cookie,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageType::LocalStorage => "localStorage",
            StorageType::SessionStorage => "sessionStorage",
            StorageType::Cookie => "cookie",
        }
    }

    pub fn is_web_storage(&self) -> bool {
        !matches!(self, StorageType::Cookie)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown storage type `{0}` (expected localStorage, sessionStorage or cookie)")]
pub struct ParseStorageTypeError(String);

impl FromStr for StorageType {
    type Err = ParseStorageTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localStorage" => Ok(StorageType::LocalStorage),
            "sessionStorage" => Ok(StorageType::SessionStorage),
            "cookie" => Ok(StorageType::Cookie),
            other => Err(ParseStorageTypeError(other.to_owned())),
        }
    }
}

/// Cookie attributes used whenever a value lands in the cookie jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
#[serde(default)]
pub struct CookieConfig {
    /// Lifetime in days. `0` writes session cookies.
    #[builder(default)]
    pub expiry: u32,
    #[builder(default = DEFAULT_COOKIE_PATH.to_owned())]
    pub path: String,
    #[builder(default)]
    pub secure: bool,
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[serde(default)]
pub struct NotifyConfig {
    #[builder(default = true)]
    pub set_item: bool,
    #[builder(default)]
    pub remove_item: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Storage service configuration. Owned by the service once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Builder)]
#[builder(on(String, into))]
#[serde(default)]
pub struct StorageConfig {
    #[builder(default = DEFAULT_PREFIX.to_owned())]
    pub prefix: String,
    #[builder(default)]
    pub storage_type: StorageType,
    #[builder(default)]
    pub cookie: CookieConfig,
    #[builder(default = true)]
    pub default_to_cookie: bool,
    #[builder(default)]
    pub notify: NotifyConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StorageConfig {
    /// Loads the configuration from an optional TOML file, then `ICAN_STORAGE_*` environment variables
    /// (`__` separates nested keys, e.g. `ICAN_STORAGE_COOKIE__EXPIRY`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<StorageConfig> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }

        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// The prefix as it appears in physical keys.
    pub fn qualified_prefix(&self) -> String {
        qualify_prefix(&self.prefix)
    }
}

pub fn qualify_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('.') {
        prefix.to_owned()
    } else {
        format!("{prefix}.")
    }
}
