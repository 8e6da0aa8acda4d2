//! Cancellation tokens that remember why they were cancelled.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_REASON: &str = "cancelled by caller";

/// A cloneable cancellation handle carrying a reason.
///
/// The first reason recorded wins; later `cancel` calls are no-ops.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    token: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
}

impl CancelToken {
    /// Creates an uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels with an explicit reason.
    pub fn cancel(&self, reason: impl Into<String>) {
        {
            let mut slot = self.reason.lock();
            if slot.is_none() {
                *slot = Some(reason.into());
            }
        }
        self.token.cancel();
    }

    /// Cancels with the default caller reason.
    pub fn cancel_default(&self) {
        self.cancel(DEFAULT_REASON);
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The recorded reason (the default caller reason if none was given).
    pub fn reason(&self) -> String {
        self.reason
            .lock()
            .clone()
            .unwrap_or_else(|| DEFAULT_REASON.to_string())
    }

    /// Resolves when the token is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        token.cancel("timed out");
        token.cancel("user closed dialog");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), "timed out");
    }

    #[tokio::test]
    async fn clones_share_state() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            waiter.reason()
        });
        token.cancel_default();
        assert_eq!(handle.await.unwrap(), DEFAULT_REASON);
    }
}
