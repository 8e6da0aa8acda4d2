//! Error types for the sync engine.

use fitsync_protocol::{ConflictReport, ProtocolError, RecordId, ServerFault};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to the remote service or
/// maintaining the local store.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// The transport failed before a response arrived.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// The request deadline passed.
    #[error("request timed out: {reason}")]
    Timeout {
        /// Recorded timeout reason.
        reason: String,
    },

    /// The request was cancelled by its caller.
    #[error("request aborted: {reason}")]
    Aborted {
        /// Cancellation reason.
        reason: String,
    },

    /// The server rejected the request.
    #[error("server rejected request ({status} {code}): {message}")]
    Http {
        /// HTTP status.
        status: u16,
        /// Machine-readable code.
        code: String,
        /// Human-readable message.
        message: String,
    },

    /// The server returned no version history for a record.
    #[error("no version history for record {record_id}")]
    NoVersionHistory {
        /// Record id.
        record_id: RecordId,
    },

    /// A local edit collides with newer server changes to the same fields.
    #[error("version conflict on record {} ({} field(s))", .0.record_id, .0.fields.len())]
    Conflict(Box<ConflictReport>),

    /// A submit was refused because the record is waiting for conflict resolution.
    #[error("record {0} has an unresolved conflict")]
    RecordConflicted(RecordId),

    /// Invalid state transition.
    #[error("invalid state transition from {from} on {event}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Rejected event.
        event: String,
    },

    /// The record is not present in the local store.
    #[error("record {0} not found")]
    NotFound(RecordId),

    /// Payload encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl SyncError {
    /// Creates a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    /// Creates an aborted error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }

    /// Creates an HTTP error from a normalized server fault.
    pub fn http(fault: ServerFault) -> Self {
        Self::Http {
            status: fault.status,
            code: fault.code,
            message: fault.message,
        }
    }

    /// Returns true if this error can be retried by the executor.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Network { .. })
    }

    /// Returns true for timeouts and explicit cancellations.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Timeout { .. } | SyncError::Aborted { .. })
    }

    /// Returns true if the server reported a version collision.
    pub fn is_version_collision(&self) -> bool {
        match self {
            SyncError::Http { status, code, .. } => *status == 409 || code == "VERSION_CONFLICT",
            _ => false,
        }
    }

    /// Returns true for a detected field-level conflict or a record awaiting resolution.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_) | SyncError::RecordConflicted(_))
    }

    /// Returns true if the record does not exist (locally or on the server).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SyncError::NotFound(_) | SyncError::Http { status: 404, .. }
        )
    }

    /// Returns the HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Text suitable for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Network { .. } => {
                "Could not reach the server. Check your connection and try again.".into()
            }
            SyncError::Timeout { .. } => "The server took too long to respond.".into(),
            SyncError::Aborted { .. } => "The request was cancelled.".into(),
            SyncError::Http { status: 401, .. } => {
                "Your session has expired. Please sign in again.".into()
            }
            SyncError::Http { status: 403, .. } => {
                "You do not have permission to change this workout.".into()
            }
            SyncError::Http { status: 404, .. } | SyncError::NotFound(_) => {
                "This workout no longer exists.".into()
            }
            SyncError::Http { message, .. } if self.is_version_collision() => {
                format!("This workout was changed elsewhere: {message}")
            }
            SyncError::Http { message, .. } => message.clone(),
            SyncError::Conflict(_) | SyncError::RecordConflicted(_) => {
                "This workout was changed elsewhere. Review the changes before saving.".into()
            }
            SyncError::NoVersionHistory { .. } => "Version history is unavailable.".into(),
            other => format!("Something went wrong: {other}"),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Codec(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Codec(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection reset").is_retryable());
        assert!(!SyncError::timeout("deadline").is_retryable());
        assert!(!SyncError::aborted("user").is_retryable());
        assert!(!SyncError::Http {
            status: 503,
            code: "SERVER_ERROR".into(),
            message: "down".into()
        }
        .is_retryable());
    }

    #[test]
    fn collision_detection() {
        let by_status = SyncError::Http {
            status: 409,
            code: "CONFLICT".into(),
            message: "m".into(),
        };
        let by_code = SyncError::Http {
            status: 200,
            code: "VERSION_CONFLICT".into(),
            message: "m".into(),
        };
        assert!(by_status.is_version_collision());
        assert!(by_code.is_version_collision());
        assert!(!SyncError::network("x").is_version_collision());
    }

    #[test]
    fn error_display() {
        let err = SyncError::timeout("request to /workouts timed out after 30000 ms");
        assert!(err.to_string().contains("30000 ms"));

        let err = SyncError::Http {
            status: 422,
            code: "VALIDATION_ERROR".into(),
            message: "title required".into(),
        };
        assert_eq!(
            err.to_string(),
            "server rejected request (422 VALIDATION_ERROR): title required"
        );
    }

    #[test]
    fn user_messages() {
        let err = SyncError::Http {
            status: 422,
            code: "VALIDATION_ERROR".into(),
            message: "title required".into(),
        };
        assert_eq!(err.user_message(), "title required");
        assert!(SyncError::network("x").user_message().contains("connection"));
    }
}
