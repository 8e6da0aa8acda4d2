//! Show command implementation.

use super::{is_json, CliStore};
use fitsync_engine::VersionInfo;
use fitsync_protocol::{Record, RecordId};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
struct ShowResult {
    record: Record,
    freshness: Option<String>,
    latest_version: Option<u64>,
    is_latest_version: Option<bool>,
    has_recent_changes: Option<bool>,
}

/// Runs the show command.
pub async fn run(store: &CliStore, id: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = RecordId::from(id);
    let record = store
        .refresh_one(&id)
        .await?
        .ok_or_else(|| format!("Workout {id} not found"))?;

    // History is optional for display purposes
    let info: Option<VersionInfo> = match store.version_info(&id).await {
        Ok(info) => Some(info),
        Err(err) => {
            warn!(record_id = %id, %err, "version history unavailable");
            None
        }
    };

    let result = ShowResult {
        freshness: store.freshness(&id).map(|f| f.to_string()),
        latest_version: info.as_ref().map(|i| i.latest_version),
        is_latest_version: info.as_ref().map(|i| i.is_latest_version),
        has_recent_changes: store.has_recent_changes(&id),
        record,
    };

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let record = &result.record;
    println!("Workout {}", record.id);
    println!("  Title:          {}", record.title);
    println!("  Version:        {}", record.version);
    println!("  Last modified:  {}", record.last_modified.to_rfc3339());
    if let Some(actor) = &record.modified_by {
        println!("  Modified by:    {actor}");
    }
    if let Some(freshness) = &result.freshness {
        println!("  Freshness:      {freshness}");
    }
    if let Some(latest) = result.latest_version {
        let marker = if result.is_latest_version == Some(true) {
            "up to date"
        } else {
            "newer version available"
        };
        println!("  Latest version: {latest} ({marker})");
    }
    for (name, value) in &record.fields {
        println!("  {name}: {value}");
    }
    Ok(())
}
