//! Transient user-facing notifications.
//!
//! Messages live in an explicit queue owned by the store. Each carries its
//! own ttl; an owned background task drops expired ones.

use crate::freshness::Clock;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Kind of notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// An operation succeeded.
    Success,
    /// An operation failed.
    Error,
}

/// A notification waiting to be shown or expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Unique id.
    pub id: Uuid,
    /// Kind.
    pub kind: MessageKind,
    /// Text.
    pub text: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Lifetime.
    pub ttl: Duration,
}

impl PendingMessage {
    /// Returns true once the message has outlived its ttl.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        (now - self.created_at)
            .to_std()
            .is_ok_and(|age| age >= self.ttl)
    }
}

/// Queue of pending notifications.
pub struct MessageQueue {
    clock: Arc<dyn Clock>,
    success_ttl: Duration,
    error_ttl: Duration,
    messages: Mutex<Vec<PendingMessage>>,
}

impl MessageQueue {
    /// Creates an empty queue.
    pub fn new(clock: Arc<dyn Clock>, success_ttl: Duration, error_ttl: Duration) -> Self {
        Self {
            clock,
            success_ttl,
            error_ttl,
            messages: Mutex::new(Vec::new()),
        }
    }

    /// Queues a message with an explicit ttl and returns its id.
    ///
    /// Messages that have already expired are dropped first.
    pub fn push(&self, kind: MessageKind, text: impl Into<String>, ttl: Duration) -> Uuid {
        let now = self.clock.now();
        let message = PendingMessage {
            id: Uuid::new_v4(),
            kind,
            text: text.into(),
            created_at: now,
            ttl,
        };
        let id = message.id;
        let mut messages = self.messages.lock();
        messages.retain(|m| !m.is_expired(now));
        messages.push(message);
        id
    }

    /// Queues a success message.
    pub fn success(&self, text: impl Into<String>) -> Uuid {
        self.push(MessageKind::Success, text, self.success_ttl)
    }

    /// Queues an error message.
    pub fn error(&self, text: impl Into<String>) -> Uuid {
        self.push(MessageKind::Error, text, self.error_ttl)
    }

    /// Removes a message. Returns false if it was already gone.
    pub fn dismiss(&self, id: Uuid) -> bool {
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| m.id != id);
        messages.len() != before
    }

    /// Messages that have not expired, oldest first.
    pub fn active(&self) -> Vec<PendingMessage> {
        let now = self.clock.now();
        self.messages
            .lock()
            .iter()
            .filter(|m| !m.is_expired(now))
            .cloned()
            .collect()
    }

    /// Drops expired messages and returns how many were removed.
    pub fn expire(&self) -> usize {
        let now = self.clock.now();
        let mut messages = self.messages.lock();
        let before = messages.len();
        messages.retain(|m| !m.is_expired(now));
        before - messages.len()
    }

    /// Number of queued messages, expired or not.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Returns true if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Spawns the task that expires messages every `interval`.
    ///
    /// The task stops once the queue is dropped.
    pub fn spawn_expiry(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let queue: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(queue) = queue.upgrade() else {
                    break;
                };
                queue.expire();
            }
        })
    }
}
