//! Conflict detection between a local intent and the server's history.

use crate::intent::MutationIntent;
use crate::record::{Record, RecordId};
use crate::version::{ChangeType, VersionEntry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// How a field diverged from the local intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// The server changed the record without itemizing fields, and this
    /// field's server value no longer matches the local one.
    Outdated,
    /// The server changed this exact field since the base version.
    Modified,
    /// The record was deleted since the base version.
    Deleted,
}

/// One diverging field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    /// Field name.
    pub field: String,
    /// Value the local intent wants to write.
    pub local_value: Value,
    /// Value currently on the server, if the field still exists.
    pub server_value: Option<Value>,
    /// Kind of divergence.
    pub kind: ConflictKind,
}

/// Field-level diff between a local intent and the latest server state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    /// Record in conflict.
    pub record_id: RecordId,
    /// Version the local intent was based on.
    pub base_version: u64,
    /// Latest server version.
    pub latest_version: u64,
    /// Diverging fields.
    pub fields: Vec<FieldConflict>,
}

impl ConflictReport {
    /// Looks up the conflict for one field.
    pub fn field(&self, name: &str) -> Option<&FieldConflict> {
        self.fields.iter().find(|f| f.field == name)
    }

    /// Names of all conflicting fields.
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }

    /// Returns true if the record was deleted on the server.
    pub fn is_deleted(&self) -> bool {
        self.fields.iter().any(|f| f.kind == ConflictKind::Deleted)
    }
}

/// Detects whether `intent` conflicts with the latest server state.
///
/// A conflict requires `latest.version > intent.base_version` and an overlap
/// between the fields the intent changes and the fields changed on the
/// server since the base version. Changed fields come from the `history`
/// entries newer than the base; an entry that does not itemize its fields
/// makes every differing field count (kind `Outdated`). A field the server
/// changed to the value the intent also sets is not a conflict.
///
/// Returns `None` when the intent has no base version.
pub fn detect(
    intent: &MutationIntent,
    latest: &Record,
    history: &[VersionEntry],
) -> Option<ConflictReport> {
    let base = intent.base_version?;
    if latest.version <= base {
        return None;
    }

    let newer: Vec<&VersionEntry> = history.iter().filter(|e| e.version > base).collect();
    let deleted = newer.iter().any(|e| e.change_type == ChangeType::Delete);
    let unitemized = newer.is_empty() || newer.iter().any(|e| !e.is_itemized());
    let touched: HashSet<&str> = newer
        .iter()
        .flat_map(|e| e.changed_fields.iter().map(String::as_str))
        .collect();

    let mut fields = Vec::new();
    for name in intent.changed_fields() {
        let local_value = intent.payload.get(name).cloned().unwrap_or(Value::Null);
        let server_value = latest.field(name);

        let kind = if deleted {
            Some(ConflictKind::Deleted)
        } else if server_value.as_ref() == Some(&local_value) {
            None
        } else if touched.contains(name) {
            Some(ConflictKind::Modified)
        } else if unitemized {
            Some(ConflictKind::Outdated)
        } else {
            None
        };

        if let Some(kind) = kind {
            fields.push(FieldConflict {
                field: name.to_string(),
                local_value,
                server_value,
                kind,
            });
        }
    }

    if fields.is_empty() {
        return None;
    }

    Some(ConflictReport {
        record_id: intent.record_id.clone(),
        base_version: base,
        latest_version: latest.version,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Payload;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn latest(version: u64) -> Record {
        Record::new("w1", "Server title", version, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
            .with_field("notes", "server notes")
    }

    fn entry(version: u64, fields: &[&str]) -> VersionEntry {
        VersionEntry::new(version, ChangeType::Field, Utc::now()).with_fields(fields.iter().copied())
    }

    fn intent(base: u64, changes: &[(&str, Value)]) -> MutationIntent {
        let mut payload = Payload::new();
        for (k, v) in changes {
            payload.insert((*k).to_string(), v.clone());
        }
        MutationIntent::update("w1".into(), payload, Some(base))
    }

    #[test]
    fn overlapping_field_is_modified() {
        let report = detect(
            &intent(2, &[("title", json!("Local title"))]),
            &latest(3),
            &[entry(3, &["title"])],
        )
        .unwrap();

        assert_eq!(report.base_version, 2);
        assert_eq!(report.latest_version, 3);
        let title = report.field("title").unwrap();
        assert_eq!(title.kind, ConflictKind::Modified);
        assert_eq!(title.local_value, json!("Local title"));
        assert_eq!(title.server_value, Some(json!("Server title")));
    }

    #[test]
    fn metadata_aliases_are_not_changed_fields() {
        let report = detect(
            &intent(
                2,
                &[
                    ("title", json!("Local title")),
                    ("updatedAt", json!("2024-03-01T11:00:00Z")),
                    ("modifiedBy", json!("u1")),
                ],
            ),
            &latest(3),
            &[entry(3, &["title", "updatedAt", "modifiedBy"])],
        )
        .unwrap();
        assert_eq!(report.field_names(), vec!["title"]);
    }

    #[test]
    fn non_overlapping_field_is_no_conflict() {
        let result = detect(
            &intent(2, &[("title", json!("Local title"))]),
            &latest(3),
            &[entry(3, &["notes"])],
        );
        assert!(result.is_none());
    }

    #[test]
    fn same_version_is_no_conflict() {
        let result = detect(
            &intent(3, &[("title", json!("Local title"))]),
            &latest(3),
            &[entry(3, &["title"])],
        );
        assert!(result.is_none());
    }

    #[test]
    fn identical_values_do_not_conflict() {
        let result = detect(
            &intent(2, &[("title", json!("Server title"))]),
            &latest(3),
            &[entry(3, &["title"])],
        );
        assert!(result.is_none());
    }

    #[test]
    fn unitemized_change_marks_outdated() {
        let report = detect(
            &intent(1, &[("notes", json!("mine"))]),
            &latest(4),
            &[VersionEntry::new(4, ChangeType::Update, Utc::now())],
        )
        .unwrap();
        assert_eq!(report.field("notes").unwrap().kind, ConflictKind::Outdated);
    }

    #[test]
    fn delete_marks_every_field() {
        let report = detect(
            &intent(1, &[("title", json!("a")), ("notes", json!("b"))]),
            &latest(2),
            &[VersionEntry::new(2, ChangeType::Delete, Utc::now())],
        )
        .unwrap();
        assert!(report.is_deleted());
        assert_eq!(report.fields.len(), 2);
    }

    #[test]
    fn history_older_than_base_is_ignored() {
        let result = detect(
            &intent(2, &[("title", json!("Local title"))]),
            &latest(3),
            &[entry(2, &["title"]), entry(3, &["notes"])],
        );
        assert!(result.is_none());
    }

    #[test]
    fn missing_base_version_skips_detection() {
        let mut i = intent(0, &[("title", json!("x"))]);
        i.base_version = None;
        assert!(detect(&i, &latest(5), &[entry(5, &["title"])]).is_none());
    }
}
