//! # FitSync Protocol
//!
//! Wire types and pure sync logic for FitSync.
//!
//! This crate provides:
//! - `Record` and `VersionEntry`, the data model shared with the remote service
//! - The response `Envelope` and the error-body normalization table
//! - `MutationIntent` with its attached `BackoffState`
//! - Field-level conflict detection (`detect`)
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod envelope;
mod error;
mod intent;
mod record;
mod version;

pub use conflict::{detect, ConflictKind, ConflictReport, FieldConflict};
pub use envelope::{
    default_code_for_status, is_explicit_failure, normalize_error, status_reason, Envelope,
    FaultField, ResponseBody, ServerFault, ERROR_FIELD_MAP,
};
pub use error::{ProtocolError, ProtocolResult};
pub use intent::{BackoffState, MutationIntent, MutationOp};
pub use record::{Payload, Record, RecordId, RecordPatch, RESERVED_FIELDS};
pub use version::{changes_since, latest_entry, ChangeType, VersionEntry};
