//! List command implementation.

use super::{is_json, CliStore};
use fitsync_engine::{CallOptions, RecordService};
use serde::Serialize;

/// One row of the listing.
#[derive(Debug, Serialize)]
pub struct ListRow {
    /// Workout id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Server version.
    pub version: u64,
    /// Last modification time (RFC 3339).
    pub last_modified: String,
    /// Freshness at the time of listing.
    pub freshness: String,
}

/// Runs the list command.
pub async fn run(
    store: &CliStore,
    page: u32,
    per_page: u32,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let records = store
        .service()
        .fetch_many(page.max(1), per_page.max(1), &mut CallOptions::new())
        .await?;
    store.ingest(records);

    let rows: Vec<ListRow> = store
        .list()
        .into_iter()
        .map(|record| ListRow {
            freshness: store
                .freshness(&record.id)
                .map(|f| f.to_string())
                .unwrap_or_default(),
            id: record.id.to_string(),
            title: record.title,
            version: record.version,
            last_modified: record.last_modified.to_rfc3339(),
        })
        .collect();

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No workouts on page {page}");
        return Ok(());
    }
    println!("{:<12} {:>7}  {:<8} TITLE", "ID", "VERSION", "STATE");
    for row in &rows {
        println!(
            "{:<12} {:>7}  {:<8} {}",
            row.id, row.version, row.freshness, row.title
        );
    }
    Ok(())
}
