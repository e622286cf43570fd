use std::sync::{Arc, PoisonError, RwLock};

use rand::Rng as _;
use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::{NotifyConfig, StorageConfig, StorageType};
use crate::cookie::CookieStorage;
use crate::errors::StorageError;
use crate::listener::{ChangeListener, ListenerContext};
use crate::notify::{Notifier, StorageEvent, LOCAL_STORAGE_NOT_SUPPORTED};
use crate::{CookieJar, StorageArea};

/// Stored text standing for a `null` (or absent) value.
///
/// A string written by someone else as the bare text `null` reads back as `None` as well.
const NULL_MARKER: &str = "null";
const PROBE_KEY_MARKER: &str = "__";
const PROBE_KEY_RANGE: u32 = 10_000_000;

/// Which backend answers an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Backend {
    WebStorage(StorageType),
    /// `fallback` is set when cookies stand in for a Web Storage area that failed its probe.
    Cookie { fallback: bool },
    /// Web Storage failed its probe and falling back to cookies is disabled.
    Unsupported(StorageType),
}

impl Backend {
    pub(crate) fn storage_type(&self) -> StorageType {
        match self {
            Backend::WebStorage(storage_type) | Backend::Unsupported(storage_type) => *storage_type,
            Backend::Cookie { .. } => StorageType::Cookie,
        }
    }
}

/// Key/value storage namespaced by a prefix, backed by a Web Storage area with a cookie fallback.
///
/// No operation returns an error. Failures surface as [`StorageEvent`]s and as benign return values
/// (`false`, `None`, an empty list).
pub struct PrefixedStorage {
    prefix: String,
    default_to_cookie: bool,
    notify: NotifyConfig,
    local: Arc<dyn StorageArea>,
    session: Arc<dyn StorageArea>,
    cookies: CookieStorage,
    notifier: Notifier,
    backend: Arc<RwLock<Backend>>,
}

impl PrefixedStorage {
    /// Creates the service and probes the configured storage type.
    pub fn new(
        config: StorageConfig,
        local: Arc<dyn StorageArea>,
        session: Arc<dyn StorageArea>,
        cookie_jar: Arc<dyn CookieJar>,
    ) -> Self {
        let prefix = config.qualified_prefix();
        let notifier = Notifier::default();
        let cookies = CookieStorage::new(cookie_jar, prefix.clone(), config.cookie, notifier.clone());

        let storage = Self {
            prefix,
            default_to_cookie: config.default_to_cookie,
            notify: config.notify,
            local,
            session,
            cookies,
            notifier,
            backend: Arc::new(RwLock::new(Backend::WebStorage(config.storage_type))),
        };
        storage.set_storage_type(config.storage_type);
        storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.notifier.subscribe()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn derive_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Strips the prefix from a physical key. `None` when the key belongs to another namespace.
    pub fn underive_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
    }

    pub fn cookie(&self) -> &CookieStorage {
        &self.cookies
    }

    pub fn is_supported(&self) -> bool {
        matches!(self.backend(), Backend::WebStorage(_))
    }

    pub fn storage_type(&self) -> StorageType {
        self.backend().storage_type()
    }

    /// Switches the active backend and probes it. Returns whether Web Storage is usable afterwards.
    pub fn set_storage_type(&self, storage_type: StorageType) -> bool {
        let backend = self.probe(storage_type);
        let previous = std::mem::replace(&mut *self.backend.write().unwrap_or_else(PoisonError::into_inner), backend);
        if previous != backend {
            info!(from = ?previous, to = ?backend, "storage backend changed");
        }
        matches!(backend, Backend::WebStorage(_))
    }

    /// Stores `value` under `key`. Anything serializing to `null` is stored as the null marker.
    pub fn set<T>(&self, key: &str, value: &T, storage_type: Option<StorageType>) -> bool
    where
        T: Serialize + ?Sized,
    {
        if key.is_empty() {
            warn!("refusing to store a value under an empty key");
            return false;
        }

        let value = match serde_json::to_string(value) {
            Ok(value) => value,
            Err(e) => {
                self.notifier.error(StorageError::from(e).to_string());
                return false;
            }
        };
        let value = (value != NULL_MARKER).then_some(value);

        match self.resolve(storage_type) {
            Backend::WebStorage(storage_type) => {
                let stored = value.as_deref().unwrap_or(NULL_MARKER);
                match self.area(storage_type).set_item(&self.derive_key(key), stored) {
                    Ok(()) => {
                        debug!(key, %storage_type, "stored item");
                        self.notify_set_item(key, value, storage_type);
                        true
                    }
                    Err(e) => {
                        self.notifier.error(e.to_string());
                        self.cookies.write(key, value.as_deref(), None, None)
                    }
                }
            }
            Backend::Cookie { fallback } => {
                self.warn_if_fallback(fallback);
                self.notify_set_item(key, value.clone(), StorageType::Cookie);
                self.cookies.write(key, value.as_deref(), None, None)
            }
            Backend::Unsupported(storage_type) => {
                debug!(key, %storage_type, "dropping write to unsupported storage");
                false
            }
        }
    }

    /// Reads `key`. Missing entries, empty text and the null marker read as `None`; text that is
    /// not JSON comes back as a string.
    pub fn get(&self, key: &str, storage_type: Option<StorageType>) -> Option<Value> {
        match self.resolve(storage_type) {
            Backend::WebStorage(storage_type) => match self.area(storage_type).get_item(&self.derive_key(key)) {
                Ok(item) => item.and_then(decode_item),
                Err(e) => {
                    self.notifier.error(e.to_string());
                    None
                }
            },
            Backend::Cookie { fallback } => {
                self.warn_if_fallback(fallback);
                self.cookies.get(key)
            }
            Backend::Unsupported(_) => None,
        }
    }

    pub fn get_as<T>(&self, key: &str, storage_type: Option<StorageType>) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let value = self.get(key, storage_type)?;
        match serde_json::from_value(value) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(key, error = %e, "stored value does not match the requested type");
                None
            }
        }
    }

    pub fn remove<I, K>(&self, keys: I, storage_type: Option<StorageType>)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let backend = self.resolve(storage_type);
        for key in keys {
            let key = key.as_ref();
            match backend {
                Backend::WebStorage(storage_type) => match self.area(storage_type).remove_item(&self.derive_key(key)) {
                    Ok(()) => self.notify_remove_item(key, storage_type),
                    Err(e) => {
                        self.notifier.error(e.to_string());
                        self.cookies.remove(key);
                    }
                },
                Backend::Cookie { fallback } => {
                    self.warn_if_fallback(fallback);
                    self.notify_remove_item(key, StorageType::Cookie);
                    self.cookies.remove(key);
                }
                Backend::Unsupported(storage_type) => debug!(key, %storage_type, "nothing to remove"),
            }
        }
    }

    /// Logical keys under the prefix. Cookies are never enumerated.
    pub fn keys(&self, storage_type: Option<StorageType>) -> Vec<String> {
        let Backend::WebStorage(storage_type) = self.resolve(storage_type) else {
            self.notifier.warning(LOCAL_STORAGE_NOT_SUPPORTED);
            return vec![];
        };

        match self.area(storage_type).keys() {
            Ok(keys) => keys.iter().filter_map(|key| self.underive_key(key)).map(str::to_owned).collect(),
            Err(e) => {
                self.notifier.error(e.to_string());
                vec![]
            }
        }
    }

    pub fn length(&self, storage_type: Option<StorageType>) -> usize {
        self.keys(storage_type).len()
    }

    /// Removes every entry under the prefix whose logical key matches `filter`. An absent or empty
    /// filter matches everything.
    ///
    /// Whenever cookies stand in for a failing Web Storage area, every prefixed cookie is removed
    /// regardless of `filter`.
    pub fn clear_all(&self, filter: Option<&str>, storage_type: Option<StorageType>) -> bool {
        let filter = match filter.filter(|filter| !filter.is_empty()).map(Regex::new).transpose() {
            Ok(filter) => filter,
            Err(e) => {
                self.notifier.error(StorageError::from(e).to_string());
                return false;
            }
        };

        let storage_type = match self.resolve(storage_type) {
            Backend::WebStorage(storage_type) => storage_type,
            Backend::Cookie { fallback: true } => {
                self.warn_if_fallback(true);
                return self.cookies.clear_all();
            }
            Backend::Cookie { fallback: false } => return self.cookies.clear_matching(filter.as_ref()),
            Backend::Unsupported(_) => return false,
        };

        let area = self.area(storage_type);
        let keys = match area.keys() {
            Ok(keys) => keys,
            Err(e) => {
                self.notifier.error(e.to_string());
                return self.cookies.clear_all();
            }
        };

        for physical_key in &keys {
            let Some(key) = self.underive_key(physical_key) else {
                continue;
            };
            if !filter.as_ref().map_or(true, |filter| filter.is_match(key)) {
                continue;
            }
            if let Err(e) = area.remove_item(physical_key) {
                self.notifier.error(e.to_string());
                return self.cookies.clear_all();
            }
            self.notify_remove_item(key, storage_type);
        }

        true
    }

    /// Starts emitting [`StorageEvent::Changed`] for changes other views make to the active area.
    ///
    /// Returns `None` when Web Storage is not active, the area cannot report changes, or no tokio
    /// runtime is available.
    pub fn listen_for_changes(&self) -> Option<ChangeListener> {
        let Backend::WebStorage(storage_type) = self.backend() else {
            return None;
        };
        let changes = self.area(storage_type).storage_events()?;
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no tokio runtime, storage changes will not be observed");
            return None;
        }

        Some(ChangeListener::spawn(
            changes,
            ListenerContext {
                prefix: self.prefix.clone(),
                notify_set_item: self.notify.set_item,
                backend: Arc::clone(&self.backend),
                notifier: self.notifier.clone(),
            },
        ))
    }

    fn backend(&self) -> Backend {
        *self.backend.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, storage_type: Option<StorageType>) -> Backend {
        let backend = self.backend();
        match storage_type {
            Some(storage_type) if storage_type != backend.storage_type() => self.probe(storage_type),
            _ => backend,
        }
    }

    fn probe(&self, storage_type: StorageType) -> Backend {
        if !storage_type.is_web_storage() {
            return Backend::Cookie { fallback: false };
        }

        let area = self.area(storage_type);
        let probe_key = self.derive_key(&format!("{PROBE_KEY_MARKER}{}", rand::thread_rng().gen_range(0..PROBE_KEY_RANGE)));
        match area.set_item(&probe_key, "").and_then(|()| area.remove_item(&probe_key)) {
            Ok(()) => Backend::WebStorage(storage_type),
            Err(e) => {
                self.notifier.error(e.to_string());
                if self.default_to_cookie {
                    Backend::Cookie { fallback: true }
                } else {
                    Backend::Unsupported(storage_type)
                }
            }
        }
    }

    fn area(&self, storage_type: StorageType) -> &dyn StorageArea {
        match storage_type {
            StorageType::SessionStorage => self.session.as_ref(),
            _ => self.local.as_ref(),
        }
    }

    fn warn_if_fallback(&self, fallback: bool) {
        if fallback {
            self.notifier.warning(LOCAL_STORAGE_NOT_SUPPORTED);
        }
    }

    fn notify_set_item(&self, key: &str, new_value: Option<String>, storage_type: StorageType) {
        if self.notify.set_item {
            self.notifier.emit(StorageEvent::SetItem { key: key.to_owned(), new_value, storage_type });
        }
    }

    fn notify_remove_item(&self, key: &str, storage_type: StorageType) {
        if self.notify.remove_item {
            self.notifier.emit(StorageEvent::RemoveItem { key: key.to_owned(), storage_type });
        }
    }
}

pub(crate) fn is_probe_key(key: &str) -> bool {
    key.strip_prefix(PROBE_KEY_MARKER).is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
}

fn decode_item(item: String) -> Option<Value> {
    if item.is_empty() || item == NULL_MARKER {
        return None;
    }
    match serde_json::from_str(&item) {
        Ok(value) => Some(value),
        Err(_) => Some(Value::String(item)),
    }
}
