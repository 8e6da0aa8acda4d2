//! Per-record sync state machine.

use crate::error::{SyncError, SyncResult};
use std::fmt;

/// Sync state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RecordSyncState {
    /// Matches the last server-confirmed copy.
    #[default]
    Clean,
    /// Has a local edit that has not been submitted.
    Dirty,
    /// A mutation is on the wire.
    InFlight,
    /// The server reported a collision; waiting for a resolution action.
    Conflicted,
}

/// Events driving [`RecordSyncState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEvent {
    /// A local edit was applied.
    Edit,
    /// The pending edit was sent.
    Submit,
    /// The server confirmed the mutation.
    Confirmed,
    /// The mutation failed and was rolled back.
    Failed,
    /// The server reported a version collision touching the edited fields.
    Collision,
    /// A resolution action ran; `dirty` if it left a staged edit behind.
    Resolved {
        /// Whether a staged edit remains.
        dirty: bool,
    },
}

impl fmt::Display for RecordSyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordSyncState::Clean => "clean",
            RecordSyncState::Dirty => "dirty",
            RecordSyncState::InFlight => "in_flight",
            RecordSyncState::Conflicted => "conflicted",
        };
        f.write_str(name)
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncEvent::Edit => "edit",
            SyncEvent::Submit => "submit",
            SyncEvent::Confirmed => "confirmed",
            SyncEvent::Failed => "failed",
            SyncEvent::Collision => "collision",
            SyncEvent::Resolved { .. } => "resolved",
        };
        f.write_str(name)
    }
}

impl RecordSyncState {
    /// Returns the state after `event`, or an error for an illegal transition.
    pub fn apply(self, event: SyncEvent) -> SyncResult<Self> {
        use RecordSyncState::*;
        let next = match (self, event) {
            (Clean | Dirty, SyncEvent::Edit) => Dirty,
            (Dirty, SyncEvent::Submit) => InFlight,
            (InFlight, SyncEvent::Confirmed) => Clean,
            (InFlight | Dirty, SyncEvent::Failed) => Clean,
            (InFlight, SyncEvent::Collision) => Conflicted,
            (Conflicted, SyncEvent::Resolved { dirty }) => {
                if dirty {
                    Dirty
                } else {
                    Clean
                }
            }
            (from, event) => {
                return Err(SyncError::InvalidStateTransition {
                    from: from.to_string(),
                    event: event.to_string(),
                })
            }
        };
        Ok(next)
    }

    /// Returns true if a new submit may start from this state.
    pub fn accepts_submit(&self) -> bool {
        !matches!(self, RecordSyncState::Conflicted)
    }

    /// Returns true while local changes are not yet confirmed.
    pub fn is_pending(&self) -> bool {
        !matches!(self, RecordSyncState::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let state = RecordSyncState::Clean
            .apply(SyncEvent::Edit)
            .and_then(|s| s.apply(SyncEvent::Submit))
            .and_then(|s| s.apply(SyncEvent::Confirmed))
            .unwrap();
        assert_eq!(state, RecordSyncState::Clean);
    }

    #[test]
    fn collision_then_resolution() {
        let conflicted = RecordSyncState::InFlight
            .apply(SyncEvent::Collision)
            .unwrap();
        assert_eq!(conflicted, RecordSyncState::Conflicted);
        assert!(!conflicted.accepts_submit());

        assert_eq!(
            conflicted.apply(SyncEvent::Resolved { dirty: false }).unwrap(),
            RecordSyncState::Clean
        );
        assert_eq!(
            conflicted.apply(SyncEvent::Resolved { dirty: true }).unwrap(),
            RecordSyncState::Dirty
        );
    }

    #[test]
    fn conflicted_rejects_everything_but_resolution() {
        for event in [
            SyncEvent::Edit,
            SyncEvent::Submit,
            SyncEvent::Confirmed,
            SyncEvent::Failed,
            SyncEvent::Collision,
        ] {
            let err = RecordSyncState::Conflicted.apply(event).unwrap_err();
            assert!(matches!(err, SyncError::InvalidStateTransition { .. }));
        }
    }

    #[test]
    fn failure_rolls_back_to_clean() {
        assert_eq!(
            RecordSyncState::InFlight.apply(SyncEvent::Failed).unwrap(),
            RecordSyncState::Clean
        );
        assert!(RecordSyncState::Clean.apply(SyncEvent::Submit).is_err());
        assert!(RecordSyncState::InFlight.apply(SyncEvent::Edit).is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(RecordSyncState::InFlight.to_string(), "in_flight");
        assert_eq!(SyncEvent::Resolved { dirty: true }.to_string(), "resolved");
    }
}
