// crates/core/src/notifications/store.rs
//! The notification list: append-only from the socket, edited by the user,
//! persisted as one JSON array after every change.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::storage::{KeyValueStore, NOTIFICATIONS_KEY};
use civic_portal_types::{NotificationFrame, NotificationRecord};

const EVENT_CAPACITY: usize = 64;

pub struct NotificationStore {
    kv: Arc<dyn KeyValueStore>,
    records: Mutex<Vec<NotificationRecord>>,
    events: broadcast::Sender<NotificationRecord>,
}

impl NotificationStore {
    /// Load the persisted list. An unreadable list starts empty.
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let records = match kv.get(NOTIFICATIONS_KEY) {
            Some(raw) => match serde_json::from_str::<Vec<NotificationRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "discarding unreadable notification list");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            kv,
            records: Mutex::new(records),
            events,
        }
    }

    pub fn list(&self) -> Vec<NotificationRecord> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().iter().filter(|r| !r.read).count()
    }

    /// New records as they arrive. Lagging receivers miss records, the list
    /// itself does not.
    pub fn subscribe(&self) -> broadcast::Receiver<NotificationRecord> {
        self.events.subscribe()
    }

    /// Append in receipt order. Identical content is not deduplicated.
    pub fn push(&self, record: NotificationRecord) {
        {
            let mut records = self.lock();
            records.push(record.clone());
            self.persist(&records);
        }
        // No subscribers is fine.
        let _ = self.events.send(record);
    }

    /// Decode one text frame and append it. Malformed frames are logged and
    /// dropped.
    pub fn handle_text(&self, text: &str) -> Option<NotificationRecord> {
        match NotificationFrame::decode(text) {
            Ok(frame) => {
                let record = NotificationRecord::from_frame(frame);
                debug!(id = %record.id, kind = %record.kind, tracking_number = %record.tracking_number, "notification received");
                self.push(record.clone());
                Some(record)
            }
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed notification frame");
                None
            }
        }
    }

    pub fn mark_read(&self, id: &str) -> bool {
        let mut records = self.lock();
        let Some(record) = records.iter_mut().find(|r| r.id == id) else {
            return false;
        };
        record.read = true;
        self.persist(&records);
        true
    }

    pub fn mark_all_read(&self) -> usize {
        let mut records = self.lock();
        let mut changed = 0;
        for record in records.iter_mut().filter(|r| !r.read) {
            record.read = true;
            changed += 1;
        }
        if changed > 0 {
            self.persist(&records);
        }
        changed
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut records = self.lock();
        let before = records.len();
        records.retain(|r| r.id != id);
        let removed = records.len() != before;
        if removed {
            self.persist(&records);
        }
        removed
    }

    pub fn remove_at(&self, index: usize) -> Option<NotificationRecord> {
        let mut records = self.lock();
        if index >= records.len() {
            return None;
        }
        let removed = records.remove(index);
        self.persist(&records);
        Some(removed)
    }

    pub fn clear(&self) {
        let mut records = self.lock();
        records.clear();
        self.persist(&records);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<NotificationRecord>> {
        self.records.lock().expect("notification list lock poisoned")
    }

    fn persist(&self, records: &[NotificationRecord]) {
        let raw = match serde_json::to_string(records) {
            Ok(raw) => raw,
            Err(e) => {
                error!(error = %e, "failed to encode notification list");
                return;
            }
        };
        if let Err(e) = self.kv.set(NOTIFICATIONS_KEY, raw) {
            error!(error = %e, "failed to persist notification list");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use pretty_assertions::assert_eq;

    const FRAME: &str = r#"{"type":"NewComplaint","trackingNumber":"TRK-1","complaintType":"Roads","submittedAt":"2025-01-01T00:00:00Z"}"#;

    fn store() -> (Arc<MemoryStore>, NotificationStore) {
        let kv = Arc::new(MemoryStore::new());
        let store = NotificationStore::load(kv.clone());
        (kv, store)
    }

    #[test]
    fn test_identical_frames_are_distinct_records() {
        let (_, store) = store();
        let a = store.handle_text(FRAME).unwrap();
        let b = store.handle_text(FRAME).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(store.len(), 2);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn test_malformed_frame_adds_nothing() {
        let (kv, store) = store();
        assert!(store.handle_text("not json").is_none());
        assert!(store.handle_text(r#"{"type":"NewComplaint"}"#).is_none());
        assert!(store.is_empty());
        assert!(kv.get(NOTIFICATIONS_KEY).is_none());
    }

    #[test]
    fn test_edits_are_persisted() {
        let (kv, store) = store();
        let first = store.handle_text(FRAME).unwrap();
        store.handle_text(FRAME).unwrap();

        assert!(store.mark_read(&first.id));
        assert!(!store.mark_read("missing"));
        assert_eq!(store.unread_count(), 1);

        let reloaded = NotificationStore::load(kv.clone());
        assert_eq!(reloaded.list(), store.list());

        assert!(store.remove(&first.id));
        assert_eq!(store.remove_at(0).map(|r| r.read), Some(false));
        assert!(store.remove_at(0).is_none());
        assert_eq!(kv.get(NOTIFICATIONS_KEY).as_deref(), Some("[]"));
    }

    #[test]
    fn test_unreadable_list_starts_empty() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(NOTIFICATIONS_KEY, "{oops".into()).unwrap();
        assert!(NotificationStore::load(kv).is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_see_new_records() {
        let (_, store) = store();
        let mut rx = store.subscribe();
        let record = store.handle_text(FRAME).unwrap();
        assert_eq!(rx.recv().await.unwrap(), record);
    }
}
