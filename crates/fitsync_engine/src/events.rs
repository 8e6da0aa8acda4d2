//! Typed publish/subscribe channels owned by the store.
//!
//! The feed:
//! - Delivers events in emit order
//! - Supports multiple subscribers
//! - Drops subscribers whose receiver has gone away

use crate::messages::MessageKind;
use fitsync_protocol::RecordId;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Something the UI layer may want to re-render for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// Records were inserted or replaced.
    RecordsChanged {
        /// Affected ids.
        ids: Vec<RecordId>,
    },
    /// A record left the store.
    RecordRemoved(RecordId),
    /// A full refresh finished.
    Refreshed {
        /// Records held after the refresh.
        count: usize,
    },
    /// A record entered the conflicted state.
    ConflictDetected(RecordId),
    /// A notification was queued.
    MessagePosted(MessageKind),
}

/// Out-of-band request to re-fetch one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshRequest {
    /// Record to re-fetch.
    pub id: RecordId,
}

/// Multi-subscriber event channel.
pub struct EventFeed<E: Clone> {
    subscribers: RwLock<Vec<UnboundedSender<E>>>,
}

impl<E: Clone> EventFeed<E> {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Sends an event to every live subscriber.
    pub fn emit(&self, event: E) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers (as of the last emit).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl<E: Clone> Default for EventFeed<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle the UI layer uses to ask for a single-record refresh.
#[derive(Clone)]
pub struct RefreshSignal {
    feed: Arc<EventFeed<RefreshRequest>>,
}

impl RefreshSignal {
    pub(crate) fn new(feed: Arc<EventFeed<RefreshRequest>>) -> Self {
        Self { feed }
    }

    /// Requests a forced re-fetch of `id`.
    pub fn request(&self, id: impl Into<RecordId>) {
        self.feed.emit(RefreshRequest { id: id.into() });
    }
}
