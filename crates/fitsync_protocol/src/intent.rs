//! Pending local mutations and their retry state.

use crate::record::{Payload, RecordId, RESERVED_FIELDS};
use std::time::Duration;

/// The kind of mutation an intent carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationOp {
    /// Insert a new record.
    Create,
    /// Change fields of an existing record.
    Update,
    /// Delete a record.
    Delete,
    /// Mark a workout as completed.
    Complete,
}

impl MutationOp {
    /// Past-tense verb used in user-facing messages.
    pub fn past_tense(&self) -> &'static str {
        match self {
            MutationOp::Create => "created",
            MutationOp::Update => "updated",
            MutationOp::Delete => "deleted",
            MutationOp::Complete => "completed",
        }
    }
}

/// Bounded exponential backoff.
///
/// The delay before retry `n` (0-indexed) is `base_delay * 2^n`. The state
/// is explicit so it can travel with the intent it belongs to instead of
/// living inside a timer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffState {
    /// Retries performed so far.
    pub attempt: u32,
    /// Maximum number of retries.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Delay before the next retry.
    pub next_delay: Duration,
}

impl BackoffState {
    /// Creates a fresh backoff state.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_retries,
            base_delay,
            next_delay: base_delay,
        }
    }

    /// A state that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Returns true if another retry is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.max_retries
    }

    /// Consumes one retry and returns the delay to wait before it.
    ///
    /// Returns `None` once the retry budget is spent.
    pub fn advance(&mut self) -> Option<Duration> {
        if !self.can_retry() {
            return None;
        }
        let delay = self.next_delay;
        self.attempt += 1;
        self.next_delay = self.delay_for(self.attempt);
        Some(delay)
    }

    /// Resets the retry counter.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.next_delay = self.base_delay;
    }
}

impl Default for BackoffState {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// A pending local change addressed to one record.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationIntent {
    /// Target record.
    pub record_id: RecordId,
    /// Kind of change.
    pub operation: MutationOp,
    /// Changed fields (empty for delete/complete).
    pub payload: Payload,
    /// Version the change was based on.
    pub base_version: Option<u64>,
    /// Retry state for dispatching this intent.
    pub backoff: BackoffState,
}

impl MutationIntent {
    /// Creates an intent.
    pub fn new(
        record_id: RecordId,
        operation: MutationOp,
        payload: Payload,
        base_version: Option<u64>,
    ) -> Self {
        Self {
            record_id,
            operation,
            payload,
            base_version,
            backoff: BackoffState::default(),
        }
    }

    /// Shorthand for an update intent.
    pub fn update(record_id: RecordId, payload: Payload, base_version: Option<u64>) -> Self {
        Self::new(record_id, MutationOp::Update, payload, base_version)
    }

    /// Replaces the backoff state (builder style).
    pub fn with_backoff(mut self, backoff: BackoffState) -> Self {
        self.backoff = backoff;
        self
    }

    /// Names of the user-editable fields this intent changes.
    pub fn changed_fields(&self) -> impl Iterator<Item = &str> {
        self.payload
            .keys()
            .map(String::as_str)
            .filter(|k| !RESERVED_FIELDS.contains(k))
    }

    /// Moves the intent onto a newer base version and clears its retry state.
    pub fn rebase(&mut self, version: u64) {
        self.base_version = Some(version);
        self.backoff.reset();
    }

    /// Payload as sent on the wire: changed fields plus the base version.
    pub fn wire_payload(&self) -> Payload {
        let mut body = self.payload.clone();
        if let Some(version) = self.base_version {
            body.insert("version".into(), version.into());
        }
        body
    }
}
