//! Optimistic mutation store.
//!
//! The store owns the in-memory record collection the UI renders from.
//! Compound operations apply a change locally, send it through a
//! [`RecordService`], and then either adopt the server's answer or restore
//! the exact pre-mutation snapshot.
//!
//! ## Invariants
//!
//! - The visible version of a record never goes below the highest
//!   server-confirmed version observed for it
//! - At most one mutation per record id is in flight; later ones queue
//!   behind it in arrival order
//! - Every optimistic apply is undone if its request fails, is cancelled,
//!   or its future is dropped
//! - Synchronous locks are never held across an await point

use crate::adapter::{CallOptions, RecordService};
use crate::cancel::CancelToken;
use crate::config::StoreConfig;
use crate::error::{SyncError, SyncResult};
use crate::events::{EventFeed, RefreshRequest, RefreshSignal, StoreEvent};
use crate::freshness::{Classifier, Clock, Freshness, SystemClock, VersionInfo};
use crate::messages::{MessageKind, MessageQueue, PendingMessage};
use crate::state::{RecordSyncState, SyncEvent};
use fitsync_protocol::{
    detect, BackoffState, ConflictReport, MutationIntent, MutationOp, Payload, Record, RecordId,
    RecordPatch,
};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on pages fetched by one full refresh.
const MAX_REFRESH_PAGES: u32 = 1000;

/// What an optimistic primitive replaced, for exact restoration.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    id: RecordId,
    index: Option<usize>,
    previous: Option<Record>,
}

impl Snapshot {
    /// Record the snapshot belongs to.
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    /// Record as it was before the optimistic change, if it existed.
    pub fn previous(&self) -> Option<&Record> {
        self.previous.as_ref()
    }
}

/// A collision waiting for a resolution action.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingConflict {
    /// The local intent that collided.
    pub intent: MutationIntent,
    /// Field-level diff.
    pub report: ConflictReport,
    /// Server copy at detection time.
    pub latest: Record,
}

/// Rolls an optimistic change back unless settled first.
struct MutationGuard<'a, S: RecordService> {
    store: &'a OptimisticStore<S>,
    id: RecordId,
    snapshot: Option<Snapshot>,
}

impl<'a, S: RecordService> MutationGuard<'a, S> {
    fn new(store: &'a OptimisticStore<S>, snapshot: Snapshot) -> Self {
        Self {
            store,
            id: snapshot.id.clone(),
            snapshot: Some(snapshot),
        }
    }

    fn settle(mut self) -> Option<Snapshot> {
        self.snapshot.take()
    }
}

impl<S: RecordService> Drop for MutationGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            warn!(record_id = %self.id, "mutation dropped before settling, rolling back");
            self.store.rollback(snapshot);
            self.store.states.write().remove(&self.id);
        }
    }
}

type LockMap = Mutex<HashMap<RecordId, Arc<tokio::sync::Mutex<()>>>>;

/// Exclusive use of one record id. Releasing the last holder prunes the
/// id's entry from the lock map.
pub(crate) struct RecordLock<'a> {
    locks: &'a LockMap,
    id: RecordId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        if locks
            .get(&self.id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// In-memory record collection with optimistic apply and rollback.
pub struct OptimisticStore<S: RecordService> {
    service: Arc<S>,
    config: StoreConfig,
    clock: Arc<dyn Clock>,
    classifier: Classifier,
    records: RwLock<Vec<Record>>,
    confirmed: RwLock<HashMap<RecordId, Record>>,
    states: RwLock<HashMap<RecordId, RecordSyncState>>,
    conflicts: RwLock<HashMap<RecordId, PendingConflict>>,
    locks: LockMap,
    messages: Arc<MessageQueue>,
    events: EventFeed<StoreEvent>,
    refresh_requests: Arc<EventFeed<RefreshRequest>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_gate: tokio::sync::Mutex<()>,
}

impl<S: RecordService> OptimisticStore<S> {
    /// Creates an empty store reading the wall clock.
    pub fn new(service: Arc<S>, config: StoreConfig) -> Self {
        Self::with_clock(service, config, Arc::new(SystemClock))
    }

    /// Creates an empty store with an explicit clock.
    pub fn with_clock(service: Arc<S>, config: StoreConfig, clock: Arc<dyn Clock>) -> Self {
        let messages = Arc::new(MessageQueue::new(
            Arc::clone(&clock),
            config.success_ttl,
            config.error_ttl,
        ));
        Self {
            service,
            classifier: Classifier::new(config.freshness),
            config,
            clock,
            records: RwLock::new(Vec::new()),
            confirmed: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            conflicts: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            messages,
            events: EventFeed::new(),
            refresh_requests: Arc::new(EventFeed::new()),
            last_refresh: Mutex::new(None),
            refresh_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// The configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The service behind the store.
    pub fn service(&self) -> &Arc<S> {
        &self.service
    }

    /// The freshness classifier.
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Returns the visible copy of a record.
    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.records.read().iter().find(|r| &r.id == id).cloned()
    }

    /// Returns all visible records in display order.
    pub fn list(&self) -> Vec<Record> {
        self.records.read().clone()
    }

    /// Number of visible records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if no records are visible.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Freshness of a record, computed now.
    pub fn freshness(&self, id: &RecordId) -> Option<Freshness> {
        self.get(id)
            .map(|record| self.classifier.classify(&record, self.clock.now()))
    }

    /// Whether a record changed within the recent-changes window.
    pub fn has_recent_changes(&self, id: &RecordId) -> Option<bool> {
        self.get(id)
            .map(|record| self.classifier.has_recent_changes(&record, self.clock.now()))
    }

    /// Sync state of a record.
    pub fn sync_state(&self, id: &RecordId) -> RecordSyncState {
        self.states.read().get(id).copied().unwrap_or_default()
    }

    /// The notification queue.
    pub fn messages(&self) -> &Arc<MessageQueue> {
        &self.messages
    }

    /// Notifications that have not expired.
    pub fn active_messages(&self) -> Vec<PendingMessage> {
        self.messages.active()
    }

    /// Subscribes to store events.
    pub fn subscribe(&self) -> UnboundedReceiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Handle for requesting single-record refreshes.
    pub fn refresh_signal(&self) -> RefreshSignal {
        RefreshSignal::new(Arc::clone(&self.refresh_requests))
    }

    /// The unresolved collision for a record, if any.
    pub fn conflict(&self, id: &RecordId) -> Option<PendingConflict> {
        self.conflicts.read().get(id).cloned()
    }

    /// Fetches a record's history and summarizes its version state.
    pub async fn version_info(&self, id: &RecordId) -> SyncResult<VersionInfo> {
        let history = self.service.history(id, &mut CallOptions::new()).await?;
        let local = self.get(id);
        self.classifier
            .version_info(id, local.as_ref(), &history, self.clock.now())
    }

    // =========================================================================
    // Optimistic primitives
    // =========================================================================

    /// Inserts or replaces a record locally.
    pub fn add_optimistic(&self, record: Record) -> Snapshot {
        let id = record.id.clone();
        let snapshot = {
            let mut records = self.records.write();
            match records.iter().position(|r| r.id == id) {
                Some(index) => {
                    let previous = std::mem::replace(&mut records[index], record);
                    Snapshot {
                        id: id.clone(),
                        index: Some(index),
                        previous: Some(previous),
                    }
                }
                None => {
                    records.push(record);
                    Snapshot {
                        id: id.clone(),
                        index: None,
                        previous: None,
                    }
                }
            }
        };
        self.events.emit(StoreEvent::RecordsChanged { ids: vec![id] });
        snapshot
    }

    /// Applies a patch to a visible record. The version is left untouched.
    pub fn update_optimistic(&self, patch: &RecordPatch) -> SyncResult<Snapshot> {
        self.apply_changes(&patch.id, &patch.changes)
    }

    /// Hides a record locally.
    pub fn remove_optimistic(&self, id: &RecordId) -> SyncResult<Snapshot> {
        let snapshot = {
            let mut records = self.records.write();
            let index = records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            Snapshot {
                id: id.clone(),
                index: Some(index),
                previous: Some(records.remove(index)),
            }
        };
        self.events.emit(StoreEvent::RecordRemoved(id.clone()));
        Ok(snapshot)
    }

    /// Restores the state captured by a primitive.
    ///
    /// If a newer server-confirmed copy arrived meanwhile, that copy is
    /// restored instead so the visible version never moves backwards.
    pub fn rollback(&self, snapshot: Snapshot) {
        let Snapshot {
            id,
            index,
            previous,
        } = snapshot;
        let restored = previous.map(|previous| {
            let confirmed = self.confirmed.read();
            match confirmed.get(&id) {
                Some(known) if known.version > previous.version => known.clone(),
                _ => previous,
            }
        });

        {
            let mut records = self.records.write();
            let current = records.iter().position(|r| r.id == id);
            match (restored, current) {
                (Some(record), Some(at)) => records[at] = record,
                (Some(record), None) => {
                    let at = index.unwrap_or(records.len()).min(records.len());
                    records.insert(at, record);
                }
                (None, Some(at)) => {
                    records.remove(at);
                }
                (None, None) => {}
            }
        }
        debug!(record_id = %id, "rolled back optimistic change");
        self.events.emit(StoreEvent::RecordsChanged { ids: vec![id] });
    }

    /// Merges server-confirmed records into the collection.
    ///
    /// Records with a pending mutation keep their visible copy.
    pub fn ingest(&self, records: impl IntoIterator<Item = Record>) {
        let mut ids = Vec::new();
        for record in records {
            let shown = self.observe(record);
            ids.push(shown.id.clone());
            if !self.sync_state(&shown.id).is_pending() {
                self.upsert_visible(shown);
            }
        }
        if !ids.is_empty() {
            self.events.emit(StoreEvent::RecordsChanged { ids });
        }
    }

    /// Removes a record from the store without contacting the server.
    pub fn evict(&self, id: &RecordId) -> Option<Record> {
        let removed = self.forget(id);
        if removed.is_some() {
            debug!(record_id = %id, "evicted");
        }
        removed
    }

    // =========================================================================
    // Compound operations
    // =========================================================================

    /// Creates a record, showing a placeholder until the server answers.
    pub async fn create_and_sync(&self, payload: Payload) -> SyncResult<Record> {
        self.create(payload, None).await
    }

    /// [`create_and_sync`](Self::create_and_sync) with caller cancellation.
    pub async fn create_and_sync_with(
        &self,
        payload: Payload,
        cancel: CancelToken,
    ) -> SyncResult<Record> {
        self.create(payload, Some(cancel)).await
    }

    /// Updates a record. A missing base version is filled from the last
    /// known version of the record.
    pub async fn update_and_sync(&self, patch: RecordPatch) -> SyncResult<Record> {
        self.update(patch, None).await
    }

    /// [`update_and_sync`](Self::update_and_sync) with caller cancellation.
    pub async fn update_and_sync_with(
        &self,
        patch: RecordPatch,
        cancel: CancelToken,
    ) -> SyncResult<Record> {
        self.update(patch, Some(cancel)).await
    }

    /// Deletes a record. A 404 from the server counts as confirmation.
    pub async fn delete_and_sync(&self, id: &RecordId) -> SyncResult<()> {
        self.delete(id, None).await
    }

    /// [`delete_and_sync`](Self::delete_and_sync) with caller cancellation.
    pub async fn delete_and_sync_with(&self, id: &RecordId, cancel: CancelToken) -> SyncResult<()> {
        self.delete(id, Some(cancel)).await
    }

    /// Marks a workout as completed.
    pub async fn complete_and_sync(&self, id: &RecordId) -> SyncResult<Record> {
        self.complete(id, None).await
    }

    /// [`complete_and_sync`](Self::complete_and_sync) with caller cancellation.
    pub async fn complete_and_sync_with(
        &self,
        id: &RecordId,
        cancel: CancelToken,
    ) -> SyncResult<Record> {
        self.complete(id, Some(cancel)).await
    }

    async fn create(&self, payload: Payload, cancel: Option<CancelToken>) -> SyncResult<Record> {
        let temp = RecordId::optimistic();
        let draft = Record::draft(temp.clone(), &payload, self.clock.now());
        self.transition(&temp, SyncEvent::Edit)?;
        let guard = MutationGuard::new(self, self.add_optimistic(draft));
        self.transition(&temp, SyncEvent::Submit)?;

        debug!(record_id = %temp, "submitting create");
        let mut opts = self.call_options(cancel);
        match self.service.create(&payload, &mut opts).await {
            Ok(record) => {
                guard.settle();
                self.states.write().remove(&temp);
                let shown = self.observe(record);
                self.replace_placeholder(&temp, shown.clone());
                self.finish(MutationOp::Create, &shown.id).await;
                Ok(shown)
            }
            Err(err) => {
                self.fail(guard, &err);
                self.states.write().remove(&temp);
                Err(err)
            }
        }
    }

    async fn update(&self, patch: RecordPatch, cancel: Option<CancelToken>) -> SyncResult<Record> {
        let _lock = self.lock_record(&patch.id).await;
        let RecordPatch {
            id,
            version,
            mut changes,
        } = patch;
        let stated = changes.remove("version").and_then(|v| v.as_u64());
        let base_version = version.or(stated).or_else(|| self.known_version(&id));
        let intent = MutationIntent::update(id, changes, base_version)
            .with_backoff(self.retry_policy());
        self.run_update(intent, cancel).await
    }

    /// Submits an update intent. The caller must hold the record's lock.
    pub(crate) async fn run_update(
        &self,
        mut intent: MutationIntent,
        cancel: Option<CancelToken>,
    ) -> SyncResult<Record> {
        let id = intent.record_id.clone();
        self.ensure_submittable(&id)?;
        self.transition(&id, SyncEvent::Edit)?;
        let snapshot = match self.apply_changes(&id, &intent.payload) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.states.write().remove(&id);
                self.post_error(&err);
                return Err(err);
            }
        };
        let guard = MutationGuard::new(self, snapshot);
        self.transition(&id, SyncEvent::Submit)?;

        let mut opts = CallOptions {
            cancel,
            backoff: Some(intent.backoff.clone()),
        };
        let mut rebased = false;
        let outcome = loop {
            debug!(record_id = %id, base_version = ?intent.base_version, "submitting update");
            let err = match self.service.update(&id, &intent.wire_payload(), &mut opts).await {
                Ok(record) => break Ok(record),
                Err(err) if err.is_version_collision() => err,
                Err(err) => break Err(err),
            };

            let inspected = match self.inspect_collision(&intent, &mut opts).await {
                Ok(inspected) => inspected,
                Err(cancelled) => break Err(cancelled),
            };
            match inspected {
                Some((Some(report), latest)) => {
                    let snapshot = guard.settle();
                    return Err(self.enter_conflict(intent, report, latest, snapshot));
                }
                Some((None, latest)) if !rebased => {
                    info!(
                        record_id = %id,
                        latest_version = latest.version,
                        "collision without overlapping fields, rebasing"
                    );
                    self.observe(latest.clone());
                    intent.rebase(latest.version);
                    opts.backoff = Some(intent.backoff.clone());
                    rebased = true;
                }
                _ => break Err(err),
            }
        };

        match outcome {
            Ok(record) => {
                guard.settle();
                let shown = self.observe(record);
                self.upsert_visible(shown.clone());
                self.transition(&id, SyncEvent::Confirmed)?;
                self.finish(MutationOp::Update, &id).await;
                Ok(shown)
            }
            Err(err) => {
                self.fail(guard, &err);
                Err(err)
            }
        }
    }

    async fn delete(&self, id: &RecordId, cancel: Option<CancelToken>) -> SyncResult<()> {
        let _lock = self.lock_record(id).await;
        self.ensure_submittable(id)?;
        let snapshot = match self.remove_optimistic(id) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.post_error(&err);
                return Err(err);
            }
        };
        self.transition(id, SyncEvent::Edit)?;
        let guard = MutationGuard::new(self, snapshot);
        self.transition(id, SyncEvent::Submit)?;

        debug!(record_id = %id, "submitting delete");
        let mut opts = self.call_options(cancel);
        match self.service.remove(id, &mut opts).await {
            Err(err) if !err.is_not_found() => {
                self.fail(guard, &err);
                Err(err)
            }
            result => {
                if result.is_err() {
                    debug!(record_id = %id, "already gone on the server");
                }
                guard.settle();
                self.forget(id);
                self.finish(MutationOp::Delete, id).await;
                Ok(())
            }
        }
    }

    async fn complete(&self, id: &RecordId, cancel: Option<CancelToken>) -> SyncResult<Record> {
        let _lock = self.lock_record(id).await;
        self.ensure_submittable(id)?;
        let mut changes = Payload::new();
        changes.insert("completed".into(), Value::Bool(true));
        let snapshot = match self.apply_changes(id, &changes) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.post_error(&err);
                return Err(err);
            }
        };
        self.transition(id, SyncEvent::Edit)?;
        let guard = MutationGuard::new(self, snapshot);
        self.transition(id, SyncEvent::Submit)?;

        debug!(record_id = %id, "submitting completion");
        let mut opts = self.call_options(cancel);
        match self.service.complete(id, &mut opts).await {
            Ok(record) => {
                guard.settle();
                let shown = self.observe(record);
                self.upsert_visible(shown.clone());
                self.transition(id, SyncEvent::Confirmed)?;
                self.finish(MutationOp::Complete, id).await;
                Ok(shown)
            }
            Err(err) => {
                self.fail(guard, &err);
                Err(err)
            }
        }
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Re-fetches the whole collection, paging until a short page.
    ///
    /// Records with a pending mutation keep their visible copy; records the
    /// server no longer lists are dropped.
    pub async fn refresh_all(&self) -> SyncResult<usize> {
        let _gate = self.refresh_gate.lock().await;
        let page_size = self.config.page_size;
        let mut fetched = Vec::new();
        let mut page = 1;
        loop {
            let batch = self
                .service
                .fetch_many(page, page_size, &mut CallOptions::new())
                .await?;
            let short = batch.len() < page_size as usize;
            fetched.extend(batch);
            if short {
                break;
            }
            if page >= MAX_REFRESH_PAGES {
                warn!(pages = page, "refresh stopped at page limit");
                break;
            }
            page += 1;
        }

        let count = self.replace_all(fetched);
        *self.last_refresh.lock() = Some(Instant::now());
        info!(count, pages = page, "refreshed records");
        self.events.emit(StoreEvent::Refreshed { count });
        Ok(count)
    }

    /// Refreshes unless the last refresh is younger than the debounce
    /// interval. Returns whether a refresh ran.
    pub async fn refresh_if_due(&self) -> SyncResult<bool> {
        let due = self
            .last_refresh
            .lock()
            .map_or(true, |at| at.elapsed() >= self.config.refresh_debounce);
        if !due {
            debug!("refresh skipped, debounce window still open");
            return Ok(false);
        }
        self.refresh_all().await?;
        Ok(true)
    }

    /// Re-fetches one record. A 404 removes it; returns the visible copy.
    pub async fn refresh_one(&self, id: &RecordId) -> SyncResult<Option<Record>> {
        let _lock = self.lock_record(id).await;
        match self.service.fetch_one(id, &mut CallOptions::new()).await {
            Ok(record) => {
                self.ingest([record]);
                Ok(self.get(id))
            }
            Err(err) if err.is_not_found() => {
                if !self.sync_state(id).is_pending() {
                    info!(record_id = %id, "record gone on the server");
                    self.forget(id);
                }
                Ok(self.get(id))
            }
            Err(err) => Err(err),
        }
    }

    /// Spawns the task serving [`RefreshSignal`] requests.
    ///
    /// Each request runs a forced [`refresh_one`](Self::refresh_one).
    pub fn listen_for_refresh_requests(self: &Arc<Self>) -> JoinHandle<()> {
        let mut requests = self.refresh_requests.subscribe();
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let Some(store) = store.upgrade() else {
                    break;
                };
                debug!(record_id = %request.id, "refresh requested");
                if let Err(err) = store.refresh_one(&request.id).await {
                    warn!(record_id = %request.id, %err, "requested refresh failed");
                }
            }
        })
    }

    /// Spawns a periodic debounced refresh.
    pub fn spawn_background_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let store: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                if let Err(err) = store.refresh_if_due().await {
                    warn!(%err, "background refresh failed");
                }
            }
        })
    }

    /// Spawns the task that drops expired notifications every `interval`.
    ///
    /// The task stops once the store and its message queue are dropped.
    pub fn spawn_message_expiry(&self, interval: Duration) -> JoinHandle<()> {
        self.messages.spawn_expiry(interval)
    }

    // =========================================================================
    // Crate-internal helpers
    // =========================================================================

    /// Waits for exclusive use of a record id (FIFO).
    pub(crate) async fn lock_record(&self, id: &RecordId) -> RecordLock<'_> {
        let lock = Arc::clone(self.locks.lock().entry(id.clone()).or_default());
        let guard = lock.lock_owned().await;
        RecordLock {
            locks: &self.locks,
            id: id.clone(),
            guard: Some(guard),
        }
    }

    /// Retry state for a new mutation: the configured override, else the
    /// service's policy.
    pub(crate) fn retry_policy(&self) -> BackoffState {
        self.config
            .backoff
            .clone()
            .unwrap_or_else(|| self.service.retry_policy())
    }

    /// Removes and returns the pending conflict for a record.
    pub(crate) fn take_conflict(&self, id: &RecordId) -> Option<PendingConflict> {
        self.conflicts.write().remove(id)
    }

    /// Leaves the conflicted state after a resolution action.
    pub(crate) fn resolve_state(&self, id: &RecordId, dirty: bool) -> SyncResult<()> {
        self.transition(id, SyncEvent::Resolved { dirty })
    }

    /// Adopts a server copy as both confirmed and visible.
    pub(crate) fn adopt(&self, record: Record) -> Record {
        let shown = self.observe(record);
        self.upsert_visible(shown.clone());
        self.events.emit(StoreEvent::RecordsChanged {
            ids: vec![shown.id.clone()],
        });
        shown
    }

    /// Drops every trace of a record.
    pub(crate) fn forget(&self, id: &RecordId) -> Option<Record> {
        let removed = {
            let mut records = self.records.write();
            records
                .iter()
                .position(|r| &r.id == id)
                .map(|at| records.remove(at))
        };
        self.confirmed.write().remove(id);
        self.states.write().remove(id);
        self.conflicts.write().remove(id);
        {
            let mut locks = self.locks.lock();
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
        self.events.emit(StoreEvent::RecordRemoved(id.clone()));
        removed
    }

    /// Queues an error notification.
    pub(crate) fn post_error(&self, err: &SyncError) {
        self.messages.error(err.user_message());
        self.events.emit(StoreEvent::MessagePosted(MessageKind::Error));
    }

    fn post_success(&self, op: MutationOp) {
        self.messages
            .success(format!("{} {}", self.config.record_label, op.past_tense()));
        self.events.emit(StoreEvent::MessagePosted(MessageKind::Success));
    }

    fn call_options(&self, cancel: Option<CancelToken>) -> CallOptions {
        CallOptions {
            cancel,
            backoff: Some(self.retry_policy()),
        }
    }

    fn transition(&self, id: &RecordId, event: SyncEvent) -> SyncResult<()> {
        let mut states = self.states.write();
        let current = states.get(id).copied().unwrap_or_default();
        let next = current.apply(event)?;
        if next == RecordSyncState::Clean {
            states.remove(id);
        } else {
            states.insert(id.clone(), next);
        }
        Ok(())
    }

    fn ensure_submittable(&self, id: &RecordId) -> SyncResult<()> {
        if self.sync_state(id).accepts_submit() {
            return Ok(());
        }
        let err = SyncError::RecordConflicted(id.clone());
        self.post_error(&err);
        Err(err)
    }

    fn known_version(&self, id: &RecordId) -> Option<u64> {
        let confirmed = self.confirmed.read().get(id).map(|r| r.version);
        confirmed.or_else(|| self.get(id).map(|r| r.version))
    }

    fn apply_changes(&self, id: &RecordId, changes: &Payload) -> SyncResult<Snapshot> {
        let snapshot = {
            let mut records = self.records.write();
            let index = records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            let previous = records[index].clone();
            records[index].apply_changes(changes);
            Snapshot {
                id: id.clone(),
                index: Some(index),
                previous: Some(previous),
            }
        };
        self.events.emit(StoreEvent::RecordsChanged {
            ids: vec![id.clone()],
        });
        Ok(snapshot)
    }

    /// Records a server copy and returns the copy to display: the incoming
    /// one, or a newer one already observed.
    fn observe(&self, record: Record) -> Record {
        let mut confirmed = self.confirmed.write();
        match confirmed.get(&record.id) {
            Some(known) if known.version > record.version => {
                debug!(
                    record_id = %record.id,
                    incoming = record.version,
                    known = known.version,
                    "ignoring older server copy"
                );
                known.clone()
            }
            _ => {
                confirmed.insert(record.id.clone(), record.clone());
                record
            }
        }
    }

    fn upsert_visible(&self, record: Record) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => records.push(record),
        }
    }

    fn replace_placeholder(&self, temp: &RecordId, record: Record) {
        {
            let mut records = self.records.write();
            let placeholder = records.iter().position(|r| &r.id == temp);
            let existing = records.iter().position(|r| r.id == record.id);
            match (placeholder, existing) {
                (Some(at), None) => records[at] = record.clone(),
                (Some(at), Some(other)) => {
                    records[other] = record.clone();
                    records.remove(at);
                }
                (None, Some(other)) => records[other] = record.clone(),
                (None, None) => records.push(record.clone()),
            }
        }
        self.events.emit(StoreEvent::RecordsChanged {
            ids: vec![temp.clone(), record.id],
        });
    }

    fn replace_all(&self, fetched: Vec<Record>) -> usize {
        let pending: HashSet<RecordId> = self
            .states
            .read()
            .iter()
            .filter(|(_, state)| state.is_pending())
            .map(|(id, _)| id.clone())
            .collect();

        let mut seen = HashSet::new();
        let mut shown_server = Vec::with_capacity(fetched.len());
        for record in fetched {
            if !seen.insert(record.id.clone()) {
                continue;
            }
            shown_server.push(self.observe(record));
        }

        let removed: Vec<RecordId> = {
            let mut records = self.records.write();
            let current: HashMap<RecordId, Record> =
                records.drain(..).map(|r| (r.id.clone(), r)).collect();

            let mut next = Vec::with_capacity(shown_server.len());
            for record in shown_server {
                match current.get(&record.id) {
                    Some(local) if pending.contains(&record.id) => next.push(local.clone()),
                    _ => next.push(record),
                }
            }
            let mut removed = Vec::new();
            for (id, local) in current {
                if seen.contains(&id) {
                    continue;
                }
                if pending.contains(&id) {
                    next.push(local);
                } else {
                    removed.push(id);
                }
            }
            *records = next;
            removed
        };

        {
            let mut confirmed = self.confirmed.write();
            for id in &removed {
                confirmed.remove(id);
            }
        }
        for id in removed {
            self.events.emit(StoreEvent::RecordRemoved(id));
        }
        self.records.read().len()
    }

    /// Fetches the latest copy after a collision and diffs it against the
    /// intent. Fetch failures yield `Ok(None)`; cancellation is returned as
    /// is.
    async fn inspect_collision(
        &self,
        intent: &MutationIntent,
        opts: &mut CallOptions,
    ) -> SyncResult<Option<(Option<ConflictReport>, Record)>> {
        let id = &intent.record_id;
        let latest = match self.service.fetch_one(id, opts).await {
            Ok(latest) => latest,
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) => {
                warn!(record_id = %id, %err, "could not fetch latest copy after collision");
                return Ok(None);
            }
        };
        let history = match self.service.history(id, opts).await {
            Ok(history) => history,
            Err(err) if err.is_cancellation() => return Err(err),
            Err(err) => {
                warn!(record_id = %id, %err, "could not fetch history after collision");
                Vec::new()
            }
        };
        Ok(Some((detect(intent, &latest, &history), latest)))
    }

    fn enter_conflict(
        &self,
        intent: MutationIntent,
        report: ConflictReport,
        latest: Record,
        snapshot: Option<Snapshot>,
    ) -> SyncError {
        let id = intent.record_id.clone();
        let latest = self.observe(latest);
        if let Some(snapshot) = snapshot {
            self.rollback(snapshot);
        }
        if let Err(err) = self.transition(&id, SyncEvent::Collision) {
            warn!(record_id = %id, %err, "unexpected state on collision");
            self.states
                .write()
                .insert(id.clone(), RecordSyncState::Conflicted);
        }
        warn!(
            record_id = %id,
            fields = ?report.field_names(),
            base_version = report.base_version,
            latest_version = report.latest_version,
            "version conflict"
        );
        self.conflicts.write().insert(
            id.clone(),
            PendingConflict {
                intent,
                report: report.clone(),
                latest,
            },
        );
        self.events.emit(StoreEvent::ConflictDetected(id));
        let err = SyncError::Conflict(Box::new(report));
        self.post_error(&err);
        err
    }

    fn fail(&self, guard: MutationGuard<'_, S>, err: &SyncError) {
        let id = guard.id.clone();
        if let Some(snapshot) = guard.settle() {
            self.rollback(snapshot);
        }
        if self.transition(&id, SyncEvent::Failed).is_err() {
            self.states.write().remove(&id);
        }
        warn!(record_id = %id, %err, "mutation failed, rolled back");
        self.post_error(err);
    }

    async fn finish(&self, op: MutationOp, id: &RecordId) {
        info!(record_id = %id, "{} confirmed", op.past_tense());
        self.events.emit(StoreEvent::RecordsChanged {
            ids: vec![id.clone()],
        });
        if let Err(err) = self.refresh_all().await {
            warn!(%err, "refresh after mutation failed");
            self.messages.error(format!(
                "Saved, but the list could not be refreshed: {}",
                err.user_message()
            ));
            self.events.emit(StoreEvent::MessagePosted(MessageKind::Error));
        }
        self.post_success(op);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freshness::ManualClock;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use fitsync_protocol::{ChangeType, VersionEntry};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::sync::Semaphore;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// In-memory service with failure injection.
    struct FakeService {
        now: DateTime<Utc>,
        records: Mutex<BTreeMap<RecordId, Record>>,
        history: Mutex<HashMap<RecordId, Vec<VersionEntry>>>,
        failures: Mutex<Vec<SyncError>>,
        gate: Option<Arc<Semaphore>>,
        sent: Mutex<Vec<(RecordId, Payload)>>,
        next_id: Mutex<u32>,
    }

    impl FakeService {
        fn new() -> Self {
            Self {
                now: start(),
                records: Mutex::new(BTreeMap::new()),
                history: Mutex::new(HashMap::new()),
                failures: Mutex::new(Vec::new()),
                gate: None,
                sent: Mutex::new(Vec::new()),
                next_id: Mutex::new(100),
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new()
            }
        }

        fn seed(&self, record: Record) {
            self.records.lock().insert(record.id.clone(), record);
        }

        fn fail_next(&self, err: SyncError) {
            self.failures.lock().push(err);
        }

        fn injected(&self) -> SyncResult<()> {
            match self.failures.lock().pop() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        /// Simulates another client editing fields.
        fn edit_elsewhere(&self, id: &str, field: &str, value: Value) {
            let mut records = self.records.lock();
            let record = records.get_mut(&RecordId::from(id)).unwrap();
            let mut changes = Payload::new();
            changes.insert(field.into(), value);
            record.apply_changes(&changes);
            record.version += 1;
            self.history.lock().entry(record.id.clone()).or_default().push(
                VersionEntry::new(record.version, ChangeType::Field, self.now)
                    .with_fields([field]),
            );
        }
    }

    fn conflict_error() -> SyncError {
        SyncError::Http {
            status: 409,
            code: "VERSION_CONFLICT".into(),
            message: "version mismatch".into(),
        }
    }

    #[async_trait]
    impl RecordService for FakeService {
        async fn fetch_one(&self, id: &RecordId, _: &mut CallOptions) -> SyncResult<Record> {
            self.records.lock().get(id).cloned().ok_or(SyncError::Http {
                status: 404,
                code: "NOT_FOUND".into(),
                message: "missing".into(),
            })
        }

        async fn fetch_many(
            &self,
            page: u32,
            page_size: u32,
            _: &mut CallOptions,
        ) -> SyncResult<Vec<Record>> {
            let skip = ((page - 1) * page_size) as usize;
            Ok(self
                .records
                .lock()
                .values()
                .skip(skip)
                .take(page_size as usize)
                .cloned()
                .collect())
        }

        async fn create(&self, payload: &Payload, _: &mut CallOptions) -> SyncResult<Record> {
            self.injected()?;
            let id = {
                let mut next = self.next_id.lock();
                *next += 1;
                RecordId::new(format!("w{next}"))
            };
            let mut record = Record::draft(id.clone(), payload, self.now);
            record.version = 1;
            self.seed(record.clone());
            Ok(record)
        }

        async fn update(
            &self,
            id: &RecordId,
            payload: &Payload,
            opts: &mut CallOptions,
        ) -> SyncResult<Record> {
            self.sent.lock().push((id.clone(), payload.clone()));
            if let Some(gate) = &self.gate {
                let cancel = opts.cancel.clone().unwrap_or_default();
                tokio::select! {
                    permit = gate.acquire() => permit.unwrap().forget(),
                    _ = cancel.cancelled() => return Err(SyncError::aborted(cancel.reason())),
                }
            }
            self.injected()?;
            let mut records = self.records.lock();
            let record = records
                .get_mut(id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            if payload.get("version").and_then(Value::as_u64) != Some(record.version) {
                return Err(conflict_error());
            }
            record.apply_changes(payload);
            record.version += 1;
            record.last_modified = self.now;
            Ok(record.clone())
        }

        async fn remove(&self, id: &RecordId, _: &mut CallOptions) -> SyncResult<()> {
            self.injected()?;
            self.records.lock().remove(id);
            Ok(())
        }

        async fn complete(&self, id: &RecordId, _: &mut CallOptions) -> SyncResult<Record> {
            self.injected()?;
            let mut records = self.records.lock();
            let record = records
                .get_mut(id)
                .ok_or_else(|| SyncError::NotFound(id.clone()))?;
            record.fields.insert("completed".into(), json!(true));
            record.version += 1;
            Ok(record.clone())
        }

        async fn history(&self, id: &RecordId, _: &mut CallOptions) -> SyncResult<Vec<VersionEntry>> {
            Ok(self.history.lock().get(id).cloned().unwrap_or_default())
        }

        fn retry_policy(&self) -> BackoffState {
            BackoffState::default()
        }
    }

    fn store_over(service: FakeService) -> (Arc<FakeService>, Arc<OptimisticStore<FakeService>>) {
        let service = Arc::new(service);
        let clock = Arc::new(ManualClock::new(start()));
        let store = Arc::new(OptimisticStore::with_clock(
            Arc::clone(&service),
            StoreConfig::default(),
            clock,
        ));
        (service, store)
    }

    fn w1(version: u64) -> Record {
        Record::new("w1", "Leg day", version, start() - ChronoDuration::minutes(5))
            .with_field("notes", "squats")
    }

    #[tokio::test]
    async fn update_fills_missing_version() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(3));
        store.ingest([w1(3)]);
        assert_eq!(store.freshness(&"w1".into()), Some(Freshness::Fresh));

        let updated = store
            .update_and_sync(RecordPatch::new("w1").set("title", "New"))
            .await
            .unwrap();

        let sent = service.sent.lock()[0].1.clone();
        assert_eq!(sent["version"], json!(3));
        assert_eq!(updated.version, 4);
        assert_eq!(store.get(&"w1".into()).unwrap().title, "New");
        assert_eq!(store.freshness(&"w1".into()), Some(Freshness::Fresh));
        assert_eq!(store.has_recent_changes(&"w1".into()), Some(true));
        assert_eq!(store.sync_state(&"w1".into()), RecordSyncState::Clean);
        assert_eq!(store.active_messages()[0].text, "Workout updated");
    }

    #[tokio::test]
    async fn failed_update_restores_exact_snapshot() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(3));
        store.ingest([w1(3)]);
        let before = store.list();

        service.fail_next(SyncError::network("connection reset"));
        let err = store
            .update_and_sync(RecordPatch::new("w1").set("title", "Broken").set("notes", Value::Null))
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Network { .. }));
        assert_eq!(store.list(), before);
        assert_eq!(store.sync_state(&"w1".into()), RecordSyncState::Clean);
        let messages = store.active_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, MessageKind::Error);
    }

    #[tokio::test]
    async fn create_replaces_placeholder() {
        let (_service, store) = store_over(FakeService::new());
        let mut payload = Payload::new();
        payload.insert("title".into(), json!("Push day"));

        let created = store.create_and_sync(payload).await.unwrap();
        assert!(!created.id.is_optimistic());
        let list = store.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, created.id);
        assert_eq!(list[0].title, "Push day");
    }

    #[tokio::test]
    async fn failed_create_removes_placeholder() {
        let (service, store) = store_over(FakeService::new());
        service.fail_next(SyncError::timeout("request to /workouts timed out after 30000 ms"));

        let err = store.create_and_sync(Payload::new()).await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_rolls_back_to_original_position() {
        let (service, store) = store_over(FakeService::new());
        let records = vec![
            Record::new("a", "A", 1, start()),
            Record::new("b", "B", 1, start()),
            Record::new("c", "C", 1, start()),
        ];
        for r in &records {
            service.seed(r.clone());
        }
        store.ingest(records.clone());

        service.fail_next(conflict_error());
        store.delete_and_sync(&"b".into()).await.unwrap_err();
        assert_eq!(store.list(), records);

        store.delete_and_sync(&"b".into()).await.unwrap();
        let ids: Vec<String> = store.list().iter().map(|r| r.id.to_string()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn not_found_on_delete_counts_as_deleted() {
        let (service, store) = store_over(FakeService::new());
        store.ingest([w1(3)]);
        service.fail_next(SyncError::Http {
            status: 404,
            code: "NOT_FOUND".into(),
            message: "gone".into(),
        });

        store.delete_and_sync(&"w1".into()).await.unwrap();
        assert!(store.get(&"w1".into()).is_none());
    }

    #[tokio::test]
    async fn overlapping_collision_enters_conflicted() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(2));
        store.ingest([w1(2)]);
        service.edit_elsewhere("w1", "title", json!("Their title"));

        let err = store
            .update_and_sync(RecordPatch::new("w1").set("title", "My title"))
            .await
            .unwrap_err();

        let SyncError::Conflict(report) = err else {
            panic!("expected conflict");
        };
        assert_eq!(report.field_names(), vec!["title"]);
        assert_eq!(store.sync_state(&"w1".into()), RecordSyncState::Conflicted);
        assert_eq!(store.get(&"w1".into()).unwrap().title, "Their title");
        assert!(store.conflict(&"w1".into()).is_some());

        let refused = store
            .update_and_sync(RecordPatch::new("w1").set("notes", "x"))
            .await
            .unwrap_err();
        assert!(matches!(refused, SyncError::RecordConflicted(_)));
    }

    #[tokio::test]
    async fn disjoint_collision_is_rebased_once() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(2));
        store.ingest([w1(2)]);
        service.edit_elsewhere("w1", "notes", json!("deadlifts"));

        let updated = store
            .update_and_sync(RecordPatch::new("w1").set("title", "My title"))
            .await
            .unwrap();

        assert_eq!(updated.version, 4);
        assert_eq!(updated.title, "My title");
        assert_eq!(updated.field("notes"), Some(json!("deadlifts")));
        let sent = service.sent.lock();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].1["version"], json!(3));
    }

    #[tokio::test]
    async fn visible_version_never_regresses() {
        let (_service, store) = store_over(FakeService::new());
        store.ingest([w1(5)]);
        store.ingest([w1(3)]);
        assert_eq!(store.get(&"w1".into()).unwrap().version, 5);
    }

    #[tokio::test]
    async fn cancellation_rolls_back() {
        let gate = Arc::new(Semaphore::new(0));
        let (service, store) = store_over(FakeService::gated(Arc::clone(&gate)));
        service.seed(w1(3));
        store.ingest([w1(3)]);
        let before = store.get(&"w1".into());

        let token = CancelToken::new();
        let task = {
            let store = Arc::clone(&store);
            let token = token.clone();
            tokio::spawn(async move {
                store
                    .update_and_sync_with(RecordPatch::new("w1").set("title", "Draft"), token)
                    .await
            })
        };
        while service.sent.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.get(&"w1".into()).unwrap().title, "Draft");
        assert_eq!(store.sync_state(&"w1".into()), RecordSyncState::InFlight);

        token.cancel("dialog closed");
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, SyncError::Aborted { .. }));
        assert_eq!(store.get(&"w1".into()), before);
    }

    #[tokio::test]
    async fn dropped_mutation_rolls_back() {
        let gate = Arc::new(Semaphore::new(0));
        let (service, store) = store_over(FakeService::gated(gate));
        service.seed(w1(3));
        store.ingest([w1(3)]);
        let before = store.get(&"w1".into());

        let task = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update_and_sync(RecordPatch::new("w1").set("title", "Draft"))
                    .await
            })
        };
        while service.sent.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        task.abort();
        let _ = task.await;

        assert_eq!(store.get(&"w1".into()), before);
        assert_eq!(store.sync_state(&"w1".into()), RecordSyncState::Clean);
    }

    #[tokio::test]
    async fn record_locks_are_pruned_after_use() {
        let (service, store) = store_over(FakeService::new());
        for n in 0..200 {
            let id = RecordId::new(format!("r{n}"));
            service.seed(Record::new(id.as_str(), "Temp", 1, start()));
            store.refresh_one(&id).await.unwrap();
            store.delete_and_sync(&id).await.unwrap();
        }
        assert!(store.is_empty());
        assert!(store.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn queued_lock_holders_keep_the_entry() {
        let gate = Arc::new(Semaphore::new(0));
        let (service, store) = store_over(FakeService::gated(Arc::clone(&gate)));
        service.seed(w1(3));
        store.ingest([w1(3)]);

        let spawn_update = |title: &'static str| {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update_and_sync(RecordPatch::new("w1").set("title", title))
                    .await
            })
        };
        let first = spawn_update("One");
        while service.sent.lock().is_empty() {
            tokio::task::yield_now().await;
        }
        let second = spawn_update("Two");
        tokio::task::yield_now().await;
        assert_eq!(store.locks.lock().len(), 1);

        gate.add_permits(2);
        first.await.unwrap().unwrap();
        let done = second.await.unwrap().unwrap();
        assert_eq!(done.version, 5);
        assert!(store.locks.lock().is_empty());
    }

    #[tokio::test]
    async fn refresh_keeps_pending_records() {
        let gate = Arc::new(Semaphore::new(0));
        let (service, store) = store_over(FakeService::gated(Arc::clone(&gate)));
        service.seed(w1(3));
        service.seed(Record::new("w2", "Other", 1, start()));
        store.ingest([w1(3)]);

        let task = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                store
                    .update_and_sync(RecordPatch::new("w1").set("title", "Draft"))
                    .await
            })
        };
        while service.sent.lock().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(store.refresh_all().await.unwrap(), 2);
        assert_eq!(store.get(&"w1".into()).unwrap().title, "Draft");
        assert!(store.get(&"w2".into()).is_some());

        gate.add_permits(1);
        task.await.unwrap().unwrap();
        assert_eq!(store.get(&"w1".into()).unwrap().title, "Draft");
        assert_eq!(store.get(&"w1".into()).unwrap().version, 4);
    }

    #[tokio::test]
    async fn refresh_one_removes_deleted_records() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(3));
        store.ingest([w1(3)]);
        service.records.lock().clear();

        assert_eq!(store.refresh_one(&"w1".into()).await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_if_due_debounces() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(3));

        assert!(store.refresh_if_due().await.unwrap());
        assert!(!store.refresh_if_due().await.unwrap());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(store.refresh_if_due().await.unwrap());
    }

    #[tokio::test]
    async fn complete_marks_record() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(3));
        store.ingest([w1(3)]);

        let done = store.complete_and_sync(&"w1".into()).await.unwrap();
        assert_eq!(done.field("completed"), Some(json!(true)));
        assert_eq!(done.version, 4);
    }

    #[tokio::test]
    async fn version_info_requires_history() {
        let (service, store) = store_over(FakeService::new());
        service.seed(w1(2));
        store.ingest([w1(2)]);

        let err = store.version_info(&"w1".into()).await.unwrap_err();
        assert!(matches!(err, SyncError::NoVersionHistory { .. }));

        service.edit_elsewhere("w1", "notes", json!("x"));
        let info = store.version_info(&"w1".into()).await.unwrap();
        assert_eq!(info.latest_version, 3);
        assert!(!info.is_latest_version);
    }

    #[test]
    fn primitives_round_trip() {
        let (_service, store) = store_over(FakeService::new());
        store.ingest([w1(3)]);
        let before = store.list();

        let snapshot = store
            .update_optimistic(&RecordPatch::new("w1").set("title", "x"))
            .unwrap();
        assert_eq!(store.get(&"w1".into()).unwrap().title, "x");
        store.rollback(snapshot);
        assert_eq!(store.list(), before);

        let snapshot = store.add_optimistic(Record::new("w9", "New", 0, start()));
        assert_eq!(store.len(), 2);
        store.rollback(snapshot);
        assert_eq!(store.list(), before);

        assert!(store.remove_optimistic(&"missing".into()).is_err());
    }
}
