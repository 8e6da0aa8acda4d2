//! # FitSync Engine
//!
//! Client-side synchronization core for FitSync workout plans.
//!
//! This crate provides:
//! - A resilient request executor (deadline, cancellation, bounded backoff)
//! - Typed resource adapters over the REST API
//! - An optimistic mutation store with exact rollback
//! - Freshness classification from version metadata
//! - Conflict detection and resolution actions
//!
//! ## Architecture
//!
//! Data flows UI → store → adapter → executor → transport:
//! 1. The store applies a change locally so every subscriber sees it at once
//! 2. The adapter shapes the request and unwraps the server envelope
//! 3. The executor sends it, retrying transport failures only
//! 4. The store adopts the server copy, or restores its snapshot
//!
//! ## Key Invariants
//!
//! - Visible versions never move backwards
//! - One in-flight mutation per record id, queued in arrival order
//! - Every optimistic apply has a rollback
//! - Freshness is computed on read, never stored

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod auth;
mod cancel;
mod config;
mod error;
mod events;
mod executor;
mod freshness;
mod http;
mod messages;
mod resolver;
mod state;
mod store;
mod transport;

pub use adapter::{
    list_items, unwrap_envelope, CallOptions, RecordService, Resource, ResourceAdapter,
    WorkoutAdapter, Workouts, LIST_KEYS,
};
pub use auth::{NoToken, SharedToken, StaticToken, TokenProvider};
pub use cancel::CancelToken;
pub use config::{ClientConfig, ExecutorConfig, FreshnessThresholds, StoreConfig};
pub use error::{SyncError, SyncResult};
pub use events::{EventFeed, RefreshRequest, RefreshSignal, StoreEvent};
pub use executor::{parse_body, RequestExecutor, RequestSpec};
pub use freshness::{
    classify, has_recent_changes, Classifier, Clock, Freshness, ManualClock, SystemClock,
    VersionInfo,
};
pub use http::ReqwestTransport;
pub use messages::{MessageKind, MessageQueue, PendingMessage};
pub use resolver::ConflictResolver;
pub use state::{RecordSyncState, SyncEvent};
pub use store::{OptimisticStore, PendingConflict, Snapshot};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, MockReply, MockTransport, TransportError,
};
