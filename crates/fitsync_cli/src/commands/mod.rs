//! CLI command implementations.

pub mod edit;
pub mod history;
pub mod list;
pub mod show;

use fitsync_engine::{
    ClientConfig, NoToken, OptimisticStore, ReqwestTransport, StaticToken, StoreConfig,
    SyncResult, TokenProvider, WorkoutAdapter,
};
use std::sync::Arc;
use std::time::Duration;

/// Store used by every command.
pub type CliStore = OptimisticStore<WorkoutAdapter<ReqwestTransport>>;

/// Builds a store over the live API.
pub fn connect(base_url: &str, token: Option<String>, timeout: Duration) -> SyncResult<Arc<CliStore>> {
    let config = ClientConfig::new(base_url).with_timeout(timeout);
    let tokens: Arc<dyn TokenProvider> = match token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(NoToken),
    };
    let adapter = WorkoutAdapter::connect(ReqwestTransport::new()?, &config, tokens)?;
    Ok(Arc::new(OptimisticStore::new(
        Arc::new(adapter),
        StoreConfig::default(),
    )))
}

/// Returns true for `--format json`.
pub fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}
