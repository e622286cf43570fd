use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, warn};

use crate::config::StorageType;

pub const LOCAL_STORAGE_NOT_SUPPORTED: &str = "LOCAL_STORAGE_NOT_SUPPORTED";
pub const COOKIES_NOT_SUPPORTED: &str = "COOKIES_NOT_SUPPORTED";

const EVENT_CAPACITY: usize = 256;

/// Events observed by subscribers of a storage service.
///
/// `new_value` carries the serialized text exactly as written to the backend. `None` stands for the
/// null marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StorageEvent {
    Warning { code: String },
    Error { message: String },
    SetItem { key: String, new_value: Option<String>, storage_type: StorageType },
    RemoveItem { key: String, storage_type: StorageType },
    Changed { key: String, new_value: Option<String>, storage_type: StorageType },
}

#[derive(Clone)]
pub struct Notifier {
    sender: broadcast::Sender<StorageEvent>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn warning(&self, code: &str) {
        warn!(code, "storage warning");
        self.emit(StorageEvent::Warning { code: code.to_owned() });
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(%message, "storage error");
        self.emit(StorageEvent::Error { message });
    }

    pub(crate) fn emit(&self, event: StorageEvent) {
        // Nobody listening is not an error.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod test {
    use tokio::sync::broadcast::error::TryRecvError;

    use super::{Notifier, StorageEvent, LOCAL_STORAGE_NOT_SUPPORTED};
    use crate::config::StorageType;

    #[test]
    fn when_emitting_without_subscribers_then_nothing_fails() {
        let notifier = Notifier::default();

        notifier.warning(LOCAL_STORAGE_NOT_SUPPORTED);
        notifier.error("boom");
    }

    #[test]
    fn when_emitting_then_every_subscriber_receives_event() {
        let notifier = Notifier::default();
        let mut first = notifier.subscribe();
        let mut second = notifier.subscribe();

        notifier.emit(StorageEvent::RemoveItem { key: "FAVORITE".to_owned(), storage_type: StorageType::LocalStorage });

        let expected = StorageEvent::RemoveItem { key: "FAVORITE".to_owned(), storage_type: StorageType::LocalStorage };
        assert_eq!(first.try_recv().expect("first subscriber should receive event"), expected);
        assert_eq!(second.try_recv().expect("second subscriber should receive event"), expected);
        assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn when_serializing_event_then_tag_and_storage_type_use_browser_names() {
        let event = StorageEvent::SetItem {
            key: "SEARCH".to_owned(),
            new_value: Some("[]".to_owned()),
            storage_type: StorageType::SessionStorage,
        };

        let json = serde_json::to_value(&event).expect("serializing event should be successful");

        assert_eq!(
            json,
            serde_json::json!({"event": "setitem", "key": "SEARCH", "new_value": "[]", "storage_type": "sessionStorage"})
        );
    }
}
