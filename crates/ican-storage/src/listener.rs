use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::notify::{Notifier, StorageEvent};
use crate::service::{is_probe_key, Backend};
use crate::StorageChange;

/// Turns storage changes made elsewhere into [`StorageEvent::Changed`] notifications.
///
/// Dropping the listener stops it.
pub struct ChangeListener {
    handle: JoinHandle<()>,
}

pub(crate) struct ListenerContext {
    pub prefix: String,
    pub notify_set_item: bool,
    pub backend: Arc<RwLock<Backend>>,
    pub notifier: Notifier,
}

impl ChangeListener {
    pub(crate) fn spawn(mut changes: broadcast::Receiver<StorageChange>, context: ListenerContext) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => context.handle(change).await,
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "storage change listener fell behind"),
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("storage change listener stopped");
        });

        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl ListenerContext {
    async fn handle(&self, change: StorageChange) {
        if !self.notify_set_item {
            return;
        }
        let Some(key) = change.key.as_deref().and_then(|key| key.strip_prefix(self.prefix.as_str())) else {
            return;
        };
        if is_probe_key(key) {
            return;
        }
        let key = key.to_owned();

        // let the writer's side settle before subscribers react
        tokio::task::yield_now().await;

        let storage_type = self.backend.read().unwrap_or_else(PoisonError::into_inner).storage_type();
        self.notifier.emit(StorageEvent::Changed { key, new_value: change.new_value, storage_type });
    }
}
