//! Lifecycle phase of a release record and its transition rules.
//!
//! ```text
//!   Unknown ──► New ──► Ready ◄──┐
//!      │         │        │      │ spec change
//!      │         ▼        ▼      │
//!      └──────► Failed ◄──┴──────┘
//! ```
//!
//! `Failed` and an unchanged `Ready` are settled: the controller leaves them
//! alone until the user edits the spec or deletes the record.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Current life-cycle phase of a release record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Phase {
    /// Never processed. Serialized as the empty string.
    #[default]
    #[serde(rename = "")]
    Unknown,
    /// Queued explicitly but not yet attempted.
    New,
    /// The last reconcile installed or upgraded successfully.
    Ready,
    /// The last reconcile failed terminally.
    Failed,
}

impl Phase {
    /// Returns the string representation of the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Unknown => "Unknown",
            Phase::New => "New",
            Phase::Ready => "Ready",
            Phase::Failed => "Failed",
        }
    }

    /// Whether a status write moving from `self` to `next` is legal.
    ///
    /// `Failed -> Failed` is allowed so a record that fails again after a
    /// spec change gets its new failure message recorded.
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Unknown, Phase::New | Phase::Ready | Phase::Failed)
                | (Phase::New, Phase::Ready | Phase::Failed)
                | (Phase::Ready, Phase::Ready | Phase::Failed)
                | (Phase::Failed, Phase::Ready | Phase::Failed)
        )
    }

    /// Checked transition.
    pub fn transition(self, next: Phase) -> Result<Phase> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::illegal_transition(self, next))
        }
    }

    /// `Ready` and `Failed` are settled; nothing happens to them without a
    /// spec change.
    pub fn is_settled(self) -> bool {
        matches!(self, Phase::Ready | Phase::Failed)
    }

    /// Whether a freshly observed record in this phase still needs work.
    pub fn is_pending(self) -> bool {
        matches!(self, Phase::Unknown | Phase::New)
    }

    /// Whether a record in this phase is eligible for automatic processing.
    pub fn eligible_for_processing(self, spec_changed: bool) -> bool {
        !self.is_settled() || spec_changed
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Phase; 4] = [Phase::Unknown, Phase::New, Phase::Ready, Phase::Failed];

    #[test]
    fn test_legal_transitions() {
        assert!(Phase::Unknown.can_transition_to(Phase::New));
        assert!(Phase::Unknown.can_transition_to(Phase::Ready));
        assert!(Phase::Unknown.can_transition_to(Phase::Failed));
        assert!(Phase::New.can_transition_to(Phase::Ready));
        assert!(Phase::New.can_transition_to(Phase::Failed));
        assert!(Phase::Ready.can_transition_to(Phase::Ready));
        assert!(Phase::Ready.can_transition_to(Phase::Failed));
        assert!(Phase::Failed.can_transition_to(Phase::Ready));
    }

    #[test]
    fn test_nothing_goes_back_to_unknown_or_new() {
        for from in ALL {
            assert!(!from.can_transition_to(Phase::Unknown), "{from} -> Unknown");
        }
        assert!(!Phase::New.can_transition_to(Phase::New));
        assert!(!Phase::Ready.can_transition_to(Phase::New));
        assert!(!Phase::Failed.can_transition_to(Phase::New));
    }

    #[test]
    fn test_checked_transition() {
        assert_eq!(Phase::New.transition(Phase::Ready).unwrap(), Phase::Ready);
        let err = Phase::Ready.transition(Phase::Unknown).unwrap_err();
        assert!(matches!(
            err,
            CoreError::IllegalTransition {
                from: Phase::Ready,
                to: Phase::Unknown
            }
        ));
    }

    #[test]
    fn test_settled_phases_need_spec_change() {
        assert!(Phase::Unknown.eligible_for_processing(false));
        assert!(Phase::New.eligible_for_processing(false));
        assert!(!Phase::Ready.eligible_for_processing(false));
        assert!(!Phase::Failed.eligible_for_processing(false));
        for phase in ALL {
            assert!(phase.eligible_for_processing(true));
        }
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Phase::Unknown).unwrap(), "\"\"");
        assert_eq!(serde_json::to_string(&Phase::Ready).unwrap(), "\"Ready\"");
        let phase: Phase = serde_json::from_str("\"Failed\"").unwrap();
        assert_eq!(phase, Phase::Failed);
        let phase: Phase = serde_json::from_str("\"\"").unwrap();
        assert_eq!(phase, Phase::Unknown);
    }
}
