//! History command implementation.

use super::{is_json, CliStore};
use fitsync_engine::{CallOptions, RecordService, SyncError};
use fitsync_protocol::RecordId;

/// Runs the history command.
pub async fn run(store: &CliStore, id: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = RecordId::from(id);
    let mut entries = store
        .service()
        .history(&id, &mut CallOptions::new())
        .await?;
    if entries.is_empty() {
        return Err(SyncError::NoVersionHistory { record_id: id }.into());
    }
    entries.sort_by_key(|e| e.version);

    if is_json(format) {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    for entry in &entries {
        let fields = if entry.changed_fields.is_empty() {
            String::from("-")
        } else {
            entry.changed_fields.join(", ")
        };
        println!(
            "v{:<5} {}  {:?}  by {}  fields: {}  {}",
            entry.version,
            entry.created_at.to_rfc3339(),
            entry.change_type,
            entry.actor.as_deref().unwrap_or("unknown"),
            fields,
            entry.change_summary
        );
    }
    Ok(())
}
