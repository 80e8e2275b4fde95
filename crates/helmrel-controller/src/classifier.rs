//! Change Classifier: decides which watch notifications become work items.
//!
//! Runs synchronously on the informer task, so it only inspects the
//! notification and never blocks.

use helmrel_core::{ReleaseKey, ReleaseRecord, WatchEvent};
use tracing::{debug, warn};

/// Returns the key to enqueue for `event`, or `None` if nothing needs doing.
pub fn classify(event: &WatchEvent) -> Option<ReleaseKey> {
    let (enqueue, reason) = match event {
        WatchEvent::Added(record) => on_added(record),
        WatchEvent::Updated { old, new } => on_updated(old, new),
        WatchEvent::Deleted(_) => (true, "deleted"),
    };

    let record = event.record();
    if !enqueue {
        debug!(
            event_type = %event.event_type(),
            key = %record.display_key(),
            phase = %record.phase(),
            reason,
            "Skipping notification"
        );
        return None;
    }

    match record.key() {
        Ok(key) => {
            debug!(event_type = %event.event_type(), key = %key, reason, "Enqueueing release");
            Some(key)
        }
        Err(e) => {
            warn!(key = %record.display_key(), error = %e, "Dropping notification with malformed key");
            None
        }
    }
}

/// New records are processed unless they arrive already settled.
fn on_added(record: &ReleaseRecord) -> (bool, &'static str) {
    if record.phase().is_pending() {
        (true, "added")
    } else {
        (false, "added in settled phase")
    }
}

fn on_updated(old: &ReleaseRecord, new: &ReleaseRecord) -> (bool, &'static str) {
    if old.resource_version() == new.resource_version() {
        return (false, "unchanged resource version");
    }
    let spec_changed = old.spec != new.spec;
    if new.phase().eligible_for_processing(spec_changed) {
        (true, if spec_changed { "spec changed" } else { "pending" })
    } else {
        (false, "settled without spec change")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use helmrel_core::{Phase, ReleaseSpec, ReleaseStatus};

    fn record(version: u64, chart_version: &str, phase: Phase) -> Arc<ReleaseRecord> {
        let mut record = ReleaseRecord::new(
            "default",
            "web",
            ReleaseSpec {
                chart_name: "nginx".into(),
                version: chart_version.into(),
                ..Default::default()
            },
        );
        record.metadata.resource_version = version;
        record.status = ReleaseStatus {
            phase,
            ..Default::default()
        };
        Arc::new(record)
    }

    fn updated(old: Arc<ReleaseRecord>, new: Arc<ReleaseRecord>) -> WatchEvent {
        WatchEvent::Updated { old, new }
    }

    #[test]
    fn test_added_pending_records_are_enqueued() {
        for phase in [Phase::Unknown, Phase::New] {
            let key = classify(&WatchEvent::Added(record(1, "1.2.0", phase)));
            assert_eq!(key.unwrap().to_string(), "default/web");
        }
    }

    #[test]
    fn test_added_settled_records_are_skipped() {
        for phase in [Phase::Ready, Phase::Failed] {
            assert!(classify(&WatchEvent::Added(record(1, "1.2.0", phase))).is_none());
        }
    }

    #[test]
    fn test_settled_records_without_spec_change_stay_quiet() {
        for phase in [Phase::Ready, Phase::Failed] {
            let old = record(1, "1.2.0", phase);
            let new = record(2, "1.2.0", phase);
            assert!(classify(&updated(old, new)).is_none(), "{phase}");
        }
    }

    #[test]
    fn test_status_only_write_to_failed_is_skipped() {
        let old = record(1, "1.2.0", Phase::Unknown);
        let new = record(2, "1.2.0", Phase::Failed);
        assert!(classify(&updated(old, new)).is_none());
    }

    #[test]
    fn test_spec_change_reenables_settled_records() {
        for phase in [Phase::Ready, Phase::Failed] {
            let old = record(1, "1.2.0", phase);
            let new = record(2, "1.3.0", phase);
            assert!(classify(&updated(old, new)).is_some(), "{phase}");
        }
    }

    #[test]
    fn test_duplicate_revision_is_filtered() {
        let old = record(7, "1.2.0", Phase::Unknown);
        let new = record(7, "1.3.0", Phase::Unknown);
        assert!(classify(&updated(old.clone(), new)).is_none());
        assert!(classify(&updated(old.clone(), old)).is_none());
    }

    #[test]
    fn test_pending_update_is_enqueued() {
        let old = record(1, "1.2.0", Phase::Unknown);
        let new = record(2, "1.2.0", Phase::Unknown);
        assert!(classify(&updated(old, new)).is_some());
    }

    #[test]
    fn test_delete_always_enqueues() {
        for phase in [Phase::Unknown, Phase::Ready, Phase::Failed] {
            let key = classify(&WatchEvent::Deleted(record(3, "1.2.0", phase)));
            assert_eq!(key.unwrap().instance_name(), "default-web");
        }
    }

    #[test]
    fn test_malformed_key_is_dropped() {
        let mut bad = ReleaseRecord::new("Not_A_Namespace", "web", ReleaseSpec::default());
        bad.metadata.resource_version = 1;
        assert!(classify(&WatchEvent::Added(Arc::new(bad))).is_none());
    }
}
