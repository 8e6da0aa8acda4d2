//! Version history entries reported by the server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of change recorded in a history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    /// Record was created.
    Create,
    /// Record was updated (fields may or may not be itemized).
    #[default]
    Update,
    /// Record was deleted.
    Delete,
    /// A field-specific change; `changed_fields` names the field(s).
    #[serde(alias = "field_update", alias = "field_change")]
    Field,
    /// A tag this client does not know.
    #[serde(other)]
    Unknown,
}

/// One historical snapshot of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    /// Version number this entry produced.
    pub version: u64,
    /// When the change was made.
    #[serde(alias = "createdAt")]
    pub created_at: DateTime<Utc>,
    /// Kind of change.
    #[serde(default, alias = "changeType")]
    pub change_type: ChangeType,
    /// Human-readable summary.
    #[serde(default, alias = "changeSummary")]
    pub change_summary: String,
    /// Actor that made the change.
    #[serde(default, alias = "actor_id", alias = "actorId", alias = "modified_by")]
    pub actor: Option<String>,
    /// Fields touched by the change. Empty when the server did not itemize them.
    #[serde(default, alias = "changedFields")]
    pub changed_fields: Vec<String>,
}

impl VersionEntry {
    /// Creates an entry with no summary, actor or field list.
    pub fn new(version: u64, change_type: ChangeType, created_at: DateTime<Utc>) -> Self {
        Self {
            version,
            created_at,
            change_type,
            change_summary: String::new(),
            actor: None,
            changed_fields: Vec::new(),
        }
    }

    /// Sets the changed fields (builder style).
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.changed_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the summary (builder style).
    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.change_summary = summary.into();
        self
    }

    /// Sets the actor (builder style).
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Returns true if this entry itemizes the fields it touched.
    pub fn is_itemized(&self) -> bool {
        !self.changed_fields.is_empty()
    }
}

/// Returns the authoritative entry: the one with the highest version.
///
/// Arrival order is irrelevant. Returns `None` for an empty history.
pub fn latest_entry(entries: &[VersionEntry]) -> Option<&VersionEntry> {
    entries.iter().max_by_key(|e| e.version)
}

/// Returns the entries newer than `base_version`.
pub fn changes_since(entries: &[VersionEntry], base_version: u64) -> Vec<&VersionEntry> {
    entries.iter().filter(|e| e.version > base_version).collect()
}
