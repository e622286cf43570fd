use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::errors::StorageError;
use crate::{StorageArea, StorageChange};

const CHANGE_CAPACITY: usize = 64;

/// Origin-wide in-memory store. Every [`MemoryStorageArea`] created from it sees the same entries,
/// and every write is announced to all other areas, the way a browser fires `storage` events in
/// every tab except the one that wrote.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    unavailable: AtomicBool,
    next_view_id: AtomicU64,
    views: Mutex<Vec<(u64, broadcast::Sender<StorageChange>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose writes fail once keys and values together exceed `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self { inner: Arc::new(MemoryStoreInner { quota: Some(quota), ..Default::default() }) }
    }

    /// A store that refuses every operation, like a disabled Web Storage area.
    pub fn unavailable() -> Self {
        let store = Self::default();
        store.set_available(false);
        store
    }

    pub fn set_available(&self, available: bool) {
        self.inner.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Opens a new view on the store.
    pub fn area(&self) -> MemoryStorageArea {
        let id = self.inner.next_view_id.fetch_add(1, Ordering::SeqCst);
        let (sender, _) = broadcast::channel(CHANGE_CAPACITY);
        self.inner.views.lock().unwrap_or_else(PoisonError::into_inner).push((id, sender.clone()));
        MemoryStorageArea { id, sender, store: Arc::clone(&self.inner) }
    }
}

impl MemoryStoreInner {
    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn announce(&self, writer: u64, change: StorageChange) {
        let views = self.views.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, sender) in views.iter().filter(|(id, _)| *id != writer) {
            let _ = sender.send(change.clone());
        }
    }
}

pub struct MemoryStorageArea {
    id: u64,
    sender: broadcast::Sender<StorageChange>,
    store: Arc<MemoryStoreInner>,
}

impl Drop for MemoryStorageArea {
    fn drop(&mut self) {
        self.store.views.lock().unwrap_or_else(PoisonError::into_inner).retain(|(id, _)| *id != self.id);
    }
}

impl StorageArea for MemoryStorageArea {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.store.check_available()?;
        let entries = self.store.entries.read().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.store.check_available()?;
        let old_value = {
            let mut entries = self.store.entries.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(quota) = self.store.quota {
                let used: usize = entries.iter().filter(|(k, _)| k.as_str() != key).map(|(k, v)| k.len() + v.len()).sum();
                let requested = used + key.len() + value.len();
                if requested > quota {
                    return Err(StorageError::QuotaExceeded { key: key.to_owned(), requested, quota });
                }
            }
            entries.insert(key.to_owned(), value.to_owned())
        };

        if old_value.as_deref() != Some(value) {
            self.store.announce(
                self.id,
                StorageChange { key: Some(key.to_owned()), old_value, new_value: Some(value.to_owned()) },
            );
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.store.check_available()?;
        let old_value = self.store.entries.write().unwrap_or_else(PoisonError::into_inner).remove(key);

        if old_value.is_some() {
            self.store.announce(self.id, StorageChange { key: Some(key.to_owned()), old_value, new_value: None });
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.store.check_available()?;
        Ok(self.store.entries.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect())
    }

    fn storage_events(&self) -> Option<broadcast::Receiver<StorageChange>> {
        Some(self.sender.subscribe())
    }
}
