//! Resolution actions for conflicted records.
//!
//! A record enters the conflicted state when the server reports a version
//! collision that touches fields the local edit changes. It stays there,
//! refusing further submits, until one of the actions below runs.

use crate::adapter::{CallOptions, RecordService};
use crate::error::{SyncError, SyncResult};
use crate::store::{OptimisticStore, PendingConflict};
use fitsync_protocol::{ConflictReport, MutationIntent, Payload, Record, RecordId};
use std::sync::Arc;
use tracing::info;

/// Resolves conflicts held by an [`OptimisticStore`].
pub struct ConflictResolver<S: RecordService> {
    store: Arc<OptimisticStore<S>>,
}

impl<S: RecordService> Clone for ConflictResolver<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: RecordService> ConflictResolver<S> {
    /// Creates a resolver over a store.
    pub fn new(store: Arc<OptimisticStore<S>>) -> Self {
        Self { store }
    }

    /// The unresolved conflict for a record.
    pub fn pending(&self, id: &RecordId) -> Option<PendingConflict> {
        self.store.conflict(id)
    }

    /// The field-level diff to build a merged payload from.
    pub fn merge_diff(&self, id: &RecordId) -> Option<ConflictReport> {
        self.pending(id).map(|conflict| conflict.report)
    }

    /// Discards the local intent and adopts the server copy.
    ///
    /// Returns `None` if the record no longer exists on the server.
    pub async fn resolve_by_fetching_latest(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        let _lock = self.store.lock_record(id).await;
        self.require_conflict(id)?;

        match self
            .store
            .service()
            .fetch_one(id, &mut CallOptions::new())
            .await
        {
            Ok(latest) => {
                self.store.take_conflict(id);
                self.store.resolve_state(id, false)?;
                let shown = self.store.adopt(latest);
                info!(record_id = %id, version = shown.version, "conflict resolved with server copy");
                Ok(Some(shown))
            }
            Err(err) if err.is_not_found() => {
                info!(record_id = %id, "conflict resolved, record deleted on server");
                self.store.forget(id);
                Ok(None)
            }
            Err(err) => {
                self.store.post_error(&err);
                Err(err)
            }
        }
    }

    /// Resubmits the local intent rebased onto the latest server version,
    /// overriding the server's changes to the conflicting fields.
    pub async fn resolve_by_forcing_local(&self, id: &RecordId) -> SyncResult<Record> {
        let _lock = self.store.lock_record(id).await;
        let conflict = self.require_conflict(id)?;

        let mut intent = conflict.intent;
        intent.rebase(conflict.report.latest_version);
        self.stage(id)?;
        info!(record_id = %id, version = conflict.report.latest_version, "forcing local changes");
        self.store.run_update(intent, None).await
    }

    /// Submits a caller-assembled payload rebased onto the latest server
    /// version.
    pub async fn resolve_by_merge(&self, id: &RecordId, merged: Payload) -> SyncResult<Record> {
        let _lock = self.store.lock_record(id).await;
        let conflict = self.require_conflict(id)?;

        let intent = MutationIntent::update(
            id.clone(),
            merged,
            Some(conflict.report.latest_version),
        )
        .with_backoff(self.store.retry_policy());
        self.stage(id)?;
        info!(record_id = %id, "submitting merged changes");
        self.store.run_update(intent, None).await
    }

    fn require_conflict(&self, id: &RecordId) -> SyncResult<PendingConflict> {
        self.store.conflict(id).ok_or_else(|| SyncError::InvalidStateTransition {
            from: self.store.sync_state(id).to_string(),
            event: "resolve".into(),
        })
    }

    /// Leaves the conflicted state with a staged edit.
    fn stage(&self, id: &RecordId) -> SyncResult<()> {
        self.store.take_conflict(id);
        self.store.resolve_state(id, true)
    }
}
