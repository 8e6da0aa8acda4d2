//! Response envelope and error-body normalization.
//!
//! The remote service wraps every payload as
//! `{ success, data, message?, code? }`, but its error bodies come in
//! several shapes. [`normalize_error`] folds all of them into one
//! [`ServerFault`] using the lookup order in [`ERROR_FIELD_MAP`], so that
//! nothing above this module ever inspects raw error bodies.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A parsed HTTP response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// A JSON document.
    Json(Value),
    /// A non-JSON body, returned verbatim.
    Text(String),
    /// No content (204 or an empty body).
    Empty,
}

impl ResponseBody {
    /// Returns the JSON document, if any.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Returns true for a no-content body.
    pub fn is_empty(&self) -> bool {
        matches!(self, ResponseBody::Empty)
    }
}

/// The success envelope wrapped around every payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Whether the server accepted the request.
    #[serde(default = "default_success")]
    pub success: bool,
    /// The payload.
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    /// Optional human-readable message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Optional machine code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

fn default_success() -> bool {
    true
}

impl<T> Envelope<T> {
    /// Creates a successful envelope.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            code: None,
        }
    }

    /// Creates a successful envelope without data.
    pub fn empty() -> Self {
        Self {
            success: true,
            data: None,
            message: None,
            code: None,
        }
    }

    /// Creates a failed envelope.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message.into()),
            code: Some(code.into()),
        }
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decodes an envelope from a JSON document.
    pub fn from_value(value: Value) -> ProtocolResult<Self> {
        serde_json::from_value(value).map_err(ProtocolError::from)
    }
}

/// A server-side rejection, normalized from any error-body shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerFault {
    /// HTTP status.
    pub status: u16,
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

/// Logical field extracted from an error body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultField {
    /// Machine code.
    Code,
    /// Human message.
    Message,
    /// Nested status.
    Status,
}

/// Lookup table from logical fault fields to JSON pointers.
///
/// Earlier rows win. Rows whose value has the wrong JSON type are skipped,
/// which is what keeps `/error` (an object in the structured shape, a string
/// in the flat shape) unambiguous. `Status` rows only apply when the HTTP
/// status is 2xx; otherwise the HTTP status stands.
pub const ERROR_FIELD_MAP: &[(FaultField, &str)] = &[
    (FaultField::Code, "/error/code"),
    (FaultField::Message, "/error/message"),
    (FaultField::Status, "/error/status"),
    (FaultField::Code, "/code"),
    (FaultField::Message, "/message"),
    (FaultField::Status, "/status"),
    (FaultField::Code, "/error_code"),
    (FaultField::Message, "/error"),
    (FaultField::Message, "/detail"),
];

const MAX_TEXT_MESSAGE: usize = 512;

fn lookup(doc: &Value, field: FaultField) -> Option<&Value> {
    ERROR_FIELD_MAP
        .iter()
        .filter(|(f, _)| *f == field)
        .filter_map(|(_, pointer)| doc.pointer(pointer))
        .find(|value| match field {
            FaultField::Code => value.is_string() || value.is_number(),
            FaultField::Message => value.as_str().is_some_and(|s| !s.trim().is_empty()),
            FaultField::Status => value.as_u64().is_some_and(|s| (100..=599).contains(&s)),
        })
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= MAX_TEXT_MESSAGE {
        return trimmed.to_string();
    }
    let mut end = MAX_TEXT_MESSAGE;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &trimmed[..end])
}

/// Returns true if the body is a JSON object carrying `success: false`.
pub fn is_explicit_failure(body: &ResponseBody) -> bool {
    body.as_json()
        .and_then(|doc| doc.get("success"))
        .and_then(Value::as_bool)
        == Some(false)
}

/// Folds any server error body into a [`ServerFault`].
///
/// `status` is the HTTP status of the response. When the transport status
/// is a success (a `success: false` envelope), a status nested in the body
/// takes precedence.
pub fn normalize_error(status: u16, body: &ResponseBody) -> ServerFault {
    let transport_ok = (200..300).contains(&status);

    let (code, message, nested_status) = match body {
        ResponseBody::Json(Value::String(s)) => (None, Some(truncate(s)), None),
        ResponseBody::Json(doc) => (
            lookup(doc, FaultField::Code).map(as_text),
            lookup(doc, FaultField::Message).map(as_text),
            lookup(doc, FaultField::Status)
                .and_then(Value::as_u64)
                .and_then(|s| u16::try_from(s).ok()),
        ),
        ResponseBody::Text(text) if !text.trim().is_empty() => (None, Some(truncate(text)), None),
        ResponseBody::Text(_) | ResponseBody::Empty => (None, None, None),
    };

    let status = match nested_status {
        Some(nested) if transport_ok => nested,
        _ => status,
    };

    ServerFault {
        status,
        code: code
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| default_code_for_status(status).to_string()),
        message: message.unwrap_or_else(|| status_reason(status).to_string()),
    }
}

/// Default machine code for a status with no code in its body.
pub fn default_code_for_status(status: u16) -> &'static str {
    match status {
        200..=299 => "REQUEST_FAILED",
        400 => "BAD_REQUEST",
        401 => "UNAUTHORIZED",
        403 => "FORBIDDEN",
        404 => "NOT_FOUND",
        409 => "VERSION_CONFLICT",
        422 => "VALIDATION_ERROR",
        429 => "RATE_LIMITED",
        500..=599 => "SERVER_ERROR",
        _ => "HTTP_ERROR",
    }
}

/// Default message for a status with no message in its body.
pub fn status_reason(status: u16) -> &'static str {
    match status {
        200..=299 => "Request failed",
        400 => "Bad request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not found",
        409 => "Version conflict",
        422 => "Validation failed",
        429 => "Too many requests",
        500 => "Internal server error",
        502 => "Bad gateway",
        503 => "Service unavailable",
        504 => "Gateway timeout",
        _ => "Request failed",
    }
}
