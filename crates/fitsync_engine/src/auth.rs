//! Authentication token sources.
//!
//! Token issuance and rotation happen elsewhere; adapters only read the
//! current value when building each request.

use parking_lot::RwLock;
use std::sync::Arc;

/// Supplies the bearer token attached to outgoing requests.
pub trait TokenProvider: Send + Sync {
    /// Current token, if any.
    fn bearer_token(&self) -> Option<String>;
}

/// No authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoToken;

impl TokenProvider for NoToken {
    fn bearer_token(&self) -> Option<String> {
        None
    }
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    /// Creates a fixed token source.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

impl TokenProvider for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        Some(self.0.clone()).filter(|t| !t.is_empty())
    }
}

/// A process-wide token handle that the owning auth layer rotates.
///
/// Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    slot: Arc<RwLock<Option<String>>>,
}

impl SharedToken {
    /// Creates an empty handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the current token.
    pub fn set(&self, token: impl Into<String>) {
        *self.slot.write() = Some(token.into());
    }

    /// Clears the current token.
    pub fn clear(&self) {
        *self.slot.write() = None;
    }
}

impl TokenProvider for SharedToken {
    fn bearer_token(&self) -> Option<String> {
        self.slot.read().clone().filter(|t| !t.is_empty())
    }
}
