//! Mutating commands: rename, complete and delete.

use super::CliStore;
use fitsync_engine::SyncError;
use fitsync_protocol::{Record, RecordId, RecordPatch};

async fn load(store: &CliStore, id: &RecordId) -> Result<Record, Box<dyn std::error::Error>> {
    let record = store
        .refresh_one(id)
        .await?
        .ok_or_else(|| format!("Workout {id} not found"))?;
    Ok(record)
}

fn explain(err: SyncError) -> Box<dyn std::error::Error> {
    if let SyncError::Conflict(report) = &err {
        eprintln!(
            "Workout {} changed on the server (v{} -> v{}):",
            report.record_id, report.base_version, report.latest_version
        );
        for field in &report.fields {
            let server = field
                .server_value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_else(|| "<removed>".into());
            eprintln!(
                "  {} ({:?}): yours {} / server {}",
                field.field, field.kind, field.local_value, server
            );
        }
    }
    err.into()
}

/// Renames a workout.
pub async fn rename(
    store: &CliStore,
    id: &str,
    title: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let id = RecordId::from(id);
    load(store, &id).await?;
    let record = store
        .update_and_sync(RecordPatch::new(id).set("title", title))
        .await
        .map_err(explain)?;
    println!("Renamed {} to {:?} (v{})", record.id, record.title, record.version);
    Ok(())
}

/// Marks a workout completed.
pub async fn complete(store: &CliStore, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = RecordId::from(id);
    load(store, &id).await?;
    let record = store.complete_and_sync(&id).await.map_err(explain)?;
    println!("Completed {} (v{})", record.id, record.version);
    Ok(())
}

/// Deletes a workout.
pub async fn delete(store: &CliStore, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let id = RecordId::from(id);
    load(store, &id).await?;
    store.delete_and_sync(&id).await.map_err(explain)?;
    println!("Deleted {id}");
    Ok(())
}
