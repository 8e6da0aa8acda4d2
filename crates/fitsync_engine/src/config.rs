//! Configuration for the executor, adapters and store.

use crate::error::{SyncError, SyncResult};
use fitsync_protocol::BackoffState;
use std::time::Duration;

/// Configuration for the request executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Deadline for one attempt when the executor owns cancellation.
    pub timeout: Duration,
    /// Maximum number of retries for transport failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry.
    pub retry_base_delay: Duration,
}

impl ExecutorConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the base retry delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Disables retries.
    pub fn no_retry(mut self) -> Self {
        self.max_retries = 0;
        self
    }

    /// Fresh backoff state for one call.
    pub fn backoff(&self) -> BackoffState {
        BackoffState::new(self.max_retries, self.retry_base_delay)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for talking to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the API (e.g. "https://api.example.com/v1").
    pub base_url: String,
    /// Executor settings.
    pub executor: ExecutorConfig,
}

impl ClientConfig {
    /// Creates a client configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            executor: ExecutorConfig::default(),
        }
    }

    /// Sets the executor configuration.
    pub fn with_executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = executor;
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.executor.timeout = timeout;
        self
    }

    /// Checks the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        let url = self.base_url.trim();
        if url.is_empty() {
            return Err(SyncError::Config("base URL is empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(SyncError::Config(format!(
                "base URL must start with http:// or https://, got {url}"
            )));
        }
        if self.executor.timeout.is_zero() {
            return Err(SyncError::Config("timeout must be non-zero".into()));
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn normalized_base_url(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_string()
    }
}

/// Age thresholds for freshness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessThresholds {
    /// Records younger than this are fresh.
    pub fresh: Duration,
    /// Records younger than this (but not fresh) are stale; older ones are expired.
    pub stale: Duration,
    /// Records younger than this have recent changes.
    pub recent_changes: Duration,
}

impl Default for FreshnessThresholds {
    fn default() -> Self {
        Self {
            fresh: Duration::from_secs(15 * 60),
            stale: Duration::from_secs(60 * 60),
            recent_changes: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Configuration for the optimistic store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Page size used by full refreshes.
    pub page_size: u32,
    /// Minimum interval between debounced refreshes.
    pub refresh_debounce: Duration,
    /// Lifetime of success notifications.
    pub success_ttl: Duration,
    /// Lifetime of error notifications.
    pub error_ttl: Duration,
    /// Freshness thresholds.
    pub freshness: FreshnessThresholds,
    /// Retry policy override for mutation intents. `None` uses the
    /// service's own policy.
    pub backoff: Option<BackoffState>,
    /// Noun used in notifications ("Workout updated").
    pub record_label: String,
}

impl StoreConfig {
    /// Creates the default configuration.
    pub fn new() -> Self {
        Self {
            page_size: 50,
            refresh_debounce: Duration::from_secs(5),
            success_ttl: Duration::from_secs(3),
            error_ttl: Duration::from_secs(6),
            freshness: FreshnessThresholds::default(),
            backoff: None,
            record_label: "Workout".into(),
        }
    }

    /// Sets the refresh page size.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Sets the refresh debounce interval.
    pub fn with_refresh_debounce(mut self, debounce: Duration) -> Self {
        self.refresh_debounce = debounce;
        self
    }

    /// Sets notification lifetimes.
    pub fn with_message_ttl(mut self, success: Duration, error: Duration) -> Self {
        self.success_ttl = success;
        self.error_ttl = error;
        self
    }

    /// Sets the freshness thresholds.
    pub fn with_freshness(mut self, freshness: FreshnessThresholds) -> Self {
        self.freshness = freshness;
        self
    }

    /// Overrides the retry policy for mutation intents.
    pub fn with_backoff(mut self, backoff: BackoffState) -> Self {
        self.backoff = Some(backoff);
        self
    }

    /// Sets the noun used in notifications.
    pub fn with_record_label(mut self, label: impl Into<String>) -> Self {
        self.record_label = label.into();
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}
