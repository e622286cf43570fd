pub mod backend;
pub mod config;
pub mod cookie;
pub mod errors;
pub mod listener;
pub mod notify;
pub mod service;

pub use config::{CookieConfig, NotifyConfig, StorageConfig, StorageType};
pub use cookie::CookieStorage;
pub use errors::StorageError;
pub use listener::ChangeListener;
pub use notify::{Notifier, StorageEvent};
pub use service::PrefixedStorage;

#[cfg(test)]
use mockall::automock;
use tokio::sync::broadcast;

/// A change made to a storage area by another view of the same store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    /// `None` when the whole area was cleared.
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// Web Storage-like key/value area addressed by physical keys.
#[cfg_attr(test, automock)]
pub trait StorageArea: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    /// Changes made through other views of the same store. Areas without a notion of
    /// other views return `None`.
    fn storage_events(&self) -> Option<broadcast::Receiver<StorageChange>> {
        None
    }
}

/// `document.cookie`-like jar: reads render `name=value` pairs joined by `; `, writes take a single
/// `Set-Cookie`-style assignment.
#[cfg_attr(test, automock)]
pub trait CookieJar: Send + Sync {
    fn is_enabled(&self) -> bool;
    fn cookie_string(&self) -> Result<String, StorageError>;
    fn set_cookie(&self, assignment: &str) -> Result<(), StorageError>;
}
