//! Domain records exchanged with the remote service.

use crate::error::{ProtocolError, ProtocolResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Open set of payload fields carried by a record or a mutation.
pub type Payload = Map<String, Value>;

/// Keys that describe record metadata rather than user-editable fields.
///
/// These are never treated as changed fields and never overwritten by a patch.
pub const RESERVED_FIELDS: &[&str] = &[
    "id",
    "version",
    "last_modified",
    "lastModified",
    "updated_at",
    "updatedAt",
    "modified_by",
    "modifiedBy",
    "updated_by",
];

const OPTIMISTIC_PREFIX: &str = "tmp-";

/// Identifier of a record.
///
/// The server may send ids as strings or integers; both decode to the
/// same textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Creates an id from its textual form.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a client-side placeholder id for an optimistic insert.
    pub fn optimistic() -> Self {
        Self(format!("{OPTIMISTIC_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Returns true if this id was generated locally and is not yet known to the server.
    pub fn is_optimistic(&self) -> bool {
        self.0.starts_with(OPTIMISTIC_PREFIX)
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self(String::new())
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for RecordId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TextOrNumber {
    Text(String),
    Signed(i64),
    Unsigned(u64),
}

impl From<TextOrNumber> for String {
    fn from(value: TextOrNumber) -> Self {
        match value {
            TextOrNumber::Text(s) => s,
            TextOrNumber::Signed(n) => n.to_string(),
            TextOrNumber::Unsigned(n) => n.to_string(),
        }
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        TextOrNumber::deserialize(deserializer).map(|raw| Self(raw.into()))
    }
}

fn optional_actor<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Option::<TextOrNumber>::deserialize(deserializer).map(|raw| raw.map(String::from))
}

/// A workout plan as tracked by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Unique id.
    pub id: RecordId,
    /// Display title.
    #[serde(default)]
    pub title: String,
    /// Server-assigned version, monotonically increasing.
    #[serde(default)]
    pub version: u64,
    /// Time of the last confirmed modification.
    #[serde(alias = "lastModified", alias = "updated_at", alias = "updatedAt")]
    pub last_modified: DateTime<Utc>,
    /// Actor that made the last modification.
    #[serde(
        default,
        alias = "modifiedBy",
        alias = "updated_by",
        deserialize_with = "optional_actor",
        skip_serializing_if = "Option::is_none"
    )]
    pub modified_by: Option<String>,
    /// Remaining workout fields (exercises, duration, notes, ...).
    #[serde(flatten)]
    pub fields: Payload,
}

impl Record {
    /// Creates a record with no payload fields.
    pub fn new(
        id: impl Into<RecordId>,
        title: impl Into<String>,
        version: u64,
        last_modified: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            version,
            last_modified,
            modified_by: None,
            fields: Payload::new(),
        }
    }

    /// Builds the optimistic placeholder shown while a create is in flight.
    pub fn draft(id: RecordId, payload: &Payload, now: DateTime<Utc>) -> Self {
        let mut record = Self::new(id, "", 0, now);
        record.apply_changes(payload);
        record
    }

    /// Sets a payload field (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the modifying actor (builder style).
    pub fn with_modified_by(mut self, actor: impl Into<String>) -> Self {
        self.modified_by = Some(actor.into());
        self
    }

    /// Returns the current value of a user-editable field.
    ///
    /// `title` is addressable like any other field.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "title" => Some(Value::String(self.title.clone())),
            _ => self.fields.get(name).cloned(),
        }
    }

    /// Applies a set of field changes in place.
    ///
    /// Reserved metadata keys are ignored; a `null` value removes the field.
    pub fn apply_changes(&mut self, changes: &Payload) {
        for (name, value) in changes {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                continue;
            }
            if name == "title" {
                self.title = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                continue;
            }
            if value.is_null() {
                self.fields.remove(name);
            } else {
                self.fields.insert(name.clone(), value.clone());
            }
        }
    }

    /// Decodes a record from a JSON value.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        serde_json::from_value(value).map_err(ProtocolError::from)
    }
}

/// A partial update addressed to one record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordPatch {
    /// Target record.
    pub id: RecordId,
    /// Version the edit was based on, if the caller knows it.
    pub version: Option<u64>,
    /// Changed fields.
    pub changes: Payload,
}

impl RecordPatch {
    /// Creates an empty patch for a record.
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            version: None,
            changes: Payload::new(),
        }
    }

    /// Sets a changed field.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.changes.insert(name.into(), value.into());
        self
    }

    /// Sets the base version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.changes
            .keys()
            .all(|k| RESERVED_FIELDS.contains(&k.as_str()))
    }
}
