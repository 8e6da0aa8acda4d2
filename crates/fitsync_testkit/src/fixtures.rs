//! Test fixtures and stack helpers.
//!
//! Provides record builders and a fully wired store running against the
//! in-memory [`FakeServer`].

use crate::fake_server::{FakeServer, FAKE_BASE_URL};
use chrono::{DateTime, TimeZone, Utc};
use fitsync_engine::{
    ClientConfig, Clock, ConflictResolver, ExecutorConfig, ManualClock, NoToken,
    OptimisticStore, StoreConfig, TokenProvider, WorkoutAdapter,
};
use fitsync_protocol::{Payload, Record};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Service type used by the test stack.
pub type TestService = WorkoutAdapter<Arc<FakeServer>>;

/// Store type used by the test stack.
pub type TestStore = OptimisticStore<TestService>;

/// The instant every fixture clock starts at.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// Builds a workout record.
pub fn workout(id: &str, title: &str, version: u64, last_modified: DateTime<Utc>) -> Record {
    Record::new(id, title, version, last_modified)
}

/// Builds a payload from `(field, value)` pairs.
pub fn payload<I, K, V>(pairs: I) -> Payload
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Client configuration pointed at the fake server with short retry delays.
pub fn test_client_config() -> ClientConfig {
    ClientConfig::new(FAKE_BASE_URL).with_executor(
        ExecutorConfig::new()
            .with_timeout(Duration::from_secs(5))
            .with_max_retries(2)
            .with_retry_base_delay(Duration::from_millis(10)),
    )
}

/// Store configuration with small pages and no refresh debounce.
///
/// Mutations retry with the client's executor policy.
pub fn test_store_config() -> StoreConfig {
    StoreConfig::new()
        .with_page_size(10)
        .with_refresh_debounce(Duration::ZERO)
}

/// A fake server, a manual clock and a store wired together.
pub struct TestStack {
    /// The fake remote service.
    pub server: Arc<FakeServer>,
    /// Clock shared by the server and the store.
    pub clock: Arc<ManualClock>,
    /// The store under test.
    pub store: Arc<TestStore>,
    /// Resolver over `store`.
    pub resolver: ConflictResolver<TestService>,
}

impl TestStack {
    /// Creates a stack with the default test configuration.
    pub fn new() -> Self {
        Self::with_config(test_client_config(), test_store_config())
    }

    /// Creates a stack with custom configurations.
    pub fn with_config(client: ClientConfig, store: StoreConfig) -> Self {
        Self::build(client, store, Arc::new(NoToken))
    }

    /// Creates a stack that sends `tokens` with every request.
    pub fn with_tokens(tokens: Arc<dyn TokenProvider>) -> Self {
        Self::build(test_client_config(), test_store_config(), tokens)
    }

    fn build(client: ClientConfig, store: StoreConfig, tokens: Arc<dyn TokenProvider>) -> Self {
        let (server, clock) = FakeServer::with_manual_clock(fixed_now());
        let server = Arc::new(server);
        let adapter = WorkoutAdapter::connect(Arc::clone(&server), &client, tokens)
            .expect("Failed to connect adapter");
        let store = Arc::new(OptimisticStore::with_clock(
            Arc::new(adapter),
            store,
            Arc::clone(&clock) as Arc<dyn Clock>,
        ));
        let resolver = ConflictResolver::new(Arc::clone(&store));
        Self {
            server,
            clock,
            store,
            resolver,
        }
    }

    /// The adapter the store talks through.
    pub fn service(&self) -> &Arc<TestService> {
        self.store.service()
    }

    /// Seeds a record on the server, stamped with the current clock time.
    pub fn seed(&self, id: &str, title: &str, version: u64) -> Record {
        let record = workout(id, title, version, self.clock.now());
        self.server.seed(record.clone());
        record
    }

    /// Loads every server record into the store.
    pub async fn load(&self) -> usize {
        self.store
            .refresh_all()
            .await
            .expect("Failed to load records")
    }
}

impl Default for TestStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fitsync_engine::Freshness;

    #[tokio::test]
    async fn stack_loads_seeded_records() {
        let stack = TestStack::new();
        stack.seed("w1", "Legs", 2);
        stack.seed("w2", "Arms", 1);

        assert_eq!(stack.load().await, 2);
        let record = stack.store.get(&"w1".into()).unwrap();
        assert_eq!(record.version, 2);
        assert_eq!(stack.store.freshness(&"w1".into()), Some(Freshness::Fresh));
    }

    #[test]
    fn payload_builder_collects_pairs() {
        let body = payload([("title", "Legs"), ("notes", "squats")]);
        assert_eq!(body.len(), 2);
        assert_eq!(body["title"], "Legs");
    }
}
