//! Property-based test generators using proptest.
//!
//! Provides strategies for random mutation sequences. Operations address
//! records by slot rather than by id, so a sequence stays meaningful no
//! matter which ids the server hands out.

use crate::fixtures::payload;
use fitsync_protocol::Payload;
use proptest::prelude::*;

/// One store mutation, addressed by slot into the current record list.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    /// Create a record with this title.
    Create {
        /// Title of the new record.
        title: String,
    },
    /// Change a field of the record in `slot`.
    Update {
        /// Index into the current record list (taken modulo its length).
        slot: usize,
        /// Field to change.
        field: String,
        /// New value.
        value: String,
    },
    /// Delete the record in `slot`.
    Delete {
        /// Index into the current record list.
        slot: usize,
    },
    /// Mark the record in `slot` completed.
    Complete {
        /// Index into the current record list.
        slot: usize,
    },
}

impl StoreOp {
    /// Resolves a slot against a list of `len` records.
    pub fn pick(slot: usize, len: usize) -> Option<usize> {
        (len > 0).then(|| slot % len)
    }

    /// Payload for a create operation.
    pub fn create_payload(title: &str) -> Payload {
        payload([("title", title)])
    }
}

/// Strategy for record titles.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{2,9}( [a-z]{2,6})?").expect("Invalid regex")
}

/// Strategy for editable field names.
pub fn field_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["title", "notes", "duration", "intensity"]).prop_map(String::from)
}

/// Strategy for a single store operation.
pub fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        3 => title_strategy().prop_map(|title| StoreOp::Create { title }),
        4 => (any::<usize>(), field_strategy(), "[a-z]{1,8}")
            .prop_map(|(slot, field, value)| StoreOp::Update { slot, field, value }),
        1 => any::<usize>().prop_map(|slot| StoreOp::Delete { slot }),
        1 => any::<usize>().prop_map(|slot| StoreOp::Complete { slot }),
    ]
}

/// Strategy for a sequence of store operations.
pub fn store_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<StoreOp>> {
    prop::collection::vec(store_op_strategy(), 1..=max_len.max(1))
}
