//! Event types exchanged between the store, the informer and the controller.

use std::sync::Arc;

use crate::release::{ReleaseKey, ReleaseRecord};
use crate::error::Result;

/// A committed write, as published by a store.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// The record was created or replaced. Carries the stored state.
    Put(Arc<ReleaseRecord>),
    /// The record was removed. Carries its last stored state.
    Deleted(Arc<ReleaseRecord>),
}

impl StoreEvent {
    /// The record carried by the event.
    pub fn record(&self) -> &Arc<ReleaseRecord> {
        match self {
            StoreEvent::Put(record) | StoreEvent::Deleted(record) => record,
        }
    }
}

/// Type of a watch notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventType {
    Added,
    Updated,
    Deleted,
}

impl WatchEventType {
    /// Returns the string representation of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Added => "added",
            WatchEventType::Updated => "updated",
            WatchEventType::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for WatchEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Notification delivered by the informer after its cache was updated.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(Arc<ReleaseRecord>),
    Updated {
        old: Arc<ReleaseRecord>,
        new: Arc<ReleaseRecord>,
    },
    /// Carries the last known state; the record is already gone.
    Deleted(Arc<ReleaseRecord>),
}

impl WatchEvent {
    pub fn event_type(&self) -> WatchEventType {
        match self {
            WatchEvent::Added(_) => WatchEventType::Added,
            WatchEvent::Updated { .. } => WatchEventType::Updated,
            WatchEvent::Deleted(_) => WatchEventType::Deleted,
        }
    }

    /// The most recent state known for the record.
    pub fn record(&self) -> &Arc<ReleaseRecord> {
        match self {
            WatchEvent::Added(record) | WatchEvent::Deleted(record) => record,
            WatchEvent::Updated { new, .. } => new,
        }
    }

    /// Key of the record the event is about.
    pub fn key(&self) -> Result<ReleaseKey> {
        self.record().key()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::release::ReleaseSpec;

    fn record(name: &str, version: u64) -> Arc<ReleaseRecord> {
        let mut record = ReleaseRecord::new("default", name, ReleaseSpec::default());
        record.metadata.resource_version = version;
        Arc::new(record)
    }

    #[test]
    fn test_event_type_display() {
        assert_eq!(WatchEventType::Added.to_string(), "added");
        assert_eq!(WatchEventType::Updated.as_str(), "updated");
        assert_eq!(WatchEventType::Deleted.as_str(), "deleted");
    }

    #[test]
    fn test_updated_event_exposes_new_record() {
        let event = WatchEvent::Updated {
            old: record("web", 1),
            new: record("web", 2),
        };
        assert_eq!(event.event_type(), WatchEventType::Updated);
        assert_eq!(event.record().resource_version(), 2);
        assert_eq!(event.key().unwrap().to_string(), "default/web");
    }

    #[test]
    fn test_store_event_record() {
        let event = StoreEvent::Deleted(record("api", 5));
        assert_eq!(event.record().metadata.name, "api");
    }
}
