//! In-memory fake of the workout REST API.
//!
//! The fake implements [`HttpTransport`], so the real executor, adapter and
//! store run against it unchanged. It keeps versions and per-record history
//! the way the real service does, rejects stale updates with 409, and can
//! inject faults ahead of any request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fitsync_engine::{
    Clock, HttpRequest, HttpResponse, HttpTransport, ManualClock, Method, TransportError,
};
use fitsync_protocol::{
    default_code_for_status, status_reason, ChangeType, Payload, Record, RecordId, VersionEntry,
    RESERVED_FIELDS,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Base URL the fake answers on.
pub const FAKE_BASE_URL: &str = "http://fake.fitsync.test/api";

const RESOURCE: &str = "workouts";

/// How the fake renders error bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorShape {
    /// `{"error":{"code","message","status"}}`
    #[default]
    Structured,
    /// `{"success":false,"message","code"}`
    Plain,
    /// `{"error":"message","error_code":"code"}`
    FlatError,
    /// `{"detail":"message"}`
    Detail,
    /// A bare text body.
    BareString,
}

/// A fault injected ahead of a request.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail at the transport level.
    Network(String),
    /// Answer with an error status.
    Status(u16),
    /// Answer with this exact response.
    Raw(HttpResponse),
    /// Wait, then serve the request normally.
    Delay(Duration),
    /// Never answer.
    Hang,
}

#[derive(Default)]
struct ServerState {
    records: Vec<Record>,
    history: HashMap<RecordId, Vec<VersionEntry>>,
    next_id: u64,
    faults: VecDeque<Fault>,
    log: Vec<HttpRequest>,
    shape: ErrorShape,
    token: Option<String>,
}

/// The fake server.
pub struct FakeServer {
    base_url: String,
    clock: Arc<dyn Clock>,
    state: Mutex<ServerState>,
}

impl FakeServer {
    /// Creates an empty server on [`FAKE_BASE_URL`] reading `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            base_url: FAKE_BASE_URL.to_string(),
            clock,
            state: Mutex::new(ServerState::default()),
        }
    }

    /// Creates an empty server with its own manual clock.
    pub fn with_manual_clock(now: DateTime<Utc>) -> (Self, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(now));
        (Self::new(Arc::clone(&clock) as Arc<dyn Clock>), clock)
    }

    /// Base URL to configure clients with.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Selects the error body shape.
    pub fn set_error_shape(&self, shape: ErrorShape) {
        self.state.lock().shape = shape;
    }

    /// Requires `Authorization: Bearer <token>` on every request.
    pub fn require_token(&self, token: impl Into<String>) {
        self.state.lock().token = Some(token.into());
    }

    /// Queues a fault for the next request.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Queues the same fault for the next `n` requests.
    pub fn fail_next(&self, n: usize, fault: Fault) {
        let mut state = self.state.lock();
        for _ in 0..n {
            state.faults.push_back(fault.clone());
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().log.clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Requests matching a method and a URL suffix.
    pub fn requests_to(&self, method: Method, suffix: &str) -> Vec<HttpRequest> {
        self.state
            .lock()
            .log
            .iter()
            .filter(|r| r.method == method && r.url.split('?').next().unwrap_or("").ends_with(suffix))
            .cloned()
            .collect()
    }

    /// Current server records in creation order.
    pub fn records(&self) -> Vec<Record> {
        self.state.lock().records.clone()
    }

    /// Current server copy of one record.
    pub fn record(&self, id: &str) -> Option<Record> {
        let id = RecordId::from(id);
        self.state.lock().records.iter().find(|r| r.id == id).cloned()
    }

    /// History of one record.
    pub fn history(&self, id: &str) -> Vec<VersionEntry> {
        self.state
            .lock()
            .history
            .get(&RecordId::from(id))
            .cloned()
            .unwrap_or_default()
    }

    /// Stores a record as-is, with a matching create entry.
    pub fn seed(&self, record: Record) {
        let mut state = self.state.lock();
        if let Some(n) = record
            .id
            .as_str()
            .strip_prefix('w')
            .and_then(|n| n.parse::<u64>().ok())
        {
            state.next_id = state.next_id.max(n);
        }
        let entry = VersionEntry::new(record.version, ChangeType::Create, record.last_modified)
            .with_summary("seeded");
        state.history.entry(record.id.clone()).or_default().push(entry);
        match state.records.iter_mut().find(|r| r.id == record.id) {
            Some(slot) => *slot = record,
            None => state.records.push(record),
        }
    }

    /// Applies a change as another client would, bumping the version.
    pub fn edit(&self, id: &str, changes: &Payload) -> Option<Record> {
        let now = self.clock.now();
        let mut state = self.state.lock();
        apply_update(&mut state, &RecordId::from(id), changes, now, Some("other-device"))
    }

    /// Deletes a record as another client would.
    pub fn delete(&self, id: &str) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        apply_delete(&mut state, &RecordId::from(id), now)
    }

    fn route(&self, request: &HttpRequest) -> HttpResponse {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if let Some(expected) = &state.token {
            let presented = request
                .header("authorization")
                .and_then(|v| v.strip_prefix("Bearer "));
            if presented != Some(expected.as_str()) {
                return error_response(state.shape, 401, "missing or invalid token");
            }
        }

        let Some(rest) = request.url.strip_prefix(self.base_url.as_str()) else {
            return error_response(state.shape, 404, "unknown host");
        };
        let (path, query) = rest.split_once('?').unwrap_or((rest, ""));
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        match (request.method, segments.as_slice()) {
            (Method::Get, [RESOURCE]) => list(&state, query),
            (Method::Post, [RESOURCE]) => {
                let body = body_object(request);
                create(&mut state, body, now)
            }
            (Method::Get, [RESOURCE, id]) => {
                let id = RecordId::from(*id);
                match state.records.iter().find(|r| r.id == id) {
                    Some(record) => ok(record),
                    None => error_response(state.shape, 404, "workout not found"),
                }
            }
            (Method::Put, [RESOURCE, id]) => {
                let id = RecordId::from(*id);
                let body = body_object(request);
                update(&mut state, &id, body, now)
            }
            (Method::Delete, [RESOURCE, id]) => {
                let id = RecordId::from(*id);
                if apply_delete(&mut state, &id, now) {
                    HttpResponse::no_content()
                } else {
                    error_response(state.shape, 404, "workout not found")
                }
            }
            (Method::Post, [RESOURCE, id, "complete"]) => {
                let mut changes = Payload::new();
                changes.insert("completed".into(), Value::Bool(true));
                match apply_update(&mut state, &RecordId::from(*id), &changes, now, None) {
                    Some(record) => ok(&record),
                    None => error_response(state.shape, 404, "workout not found"),
                }
            }
            (Method::Get, [RESOURCE, id, "history"]) => {
                match state.history.get(&RecordId::from(*id)) {
                    Some(entries) => ok(entries),
                    None => error_response(state.shape, 404, "no history"),
                }
            }
            _ => error_response(state.shape, 404, "no such route"),
        }
    }
}

fn body_object(request: &HttpRequest) -> Payload {
    match &request.body {
        Some(Value::Object(map)) => map.clone(),
        _ => Payload::new(),
    }
}

fn ok<T: serde::Serialize + ?Sized>(data: &T) -> HttpResponse {
    HttpResponse::json(200, &json!({ "success": true, "data": data }))
}

fn error_response(shape: ErrorShape, status: u16, message: &str) -> HttpResponse {
    let code = default_code_for_status(status);
    let body = match shape {
        ErrorShape::Structured => {
            json!({ "error": { "code": code, "message": message, "status": status } })
        }
        ErrorShape::Plain => json!({ "success": false, "message": message, "code": code }),
        ErrorShape::FlatError => json!({ "error": message, "error_code": code }),
        ErrorShape::Detail => json!({ "detail": message }),
        ErrorShape::BareString => return HttpResponse::text(status, message),
    };
    HttpResponse::json(status, &body)
}

fn query_param(query: &str, name: &str) -> Option<u32> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == name)
        .and_then(|(_, v)| v.parse().ok())
}

fn list(state: &ServerState, query: &str) -> HttpResponse {
    let page = query_param(query, "page").unwrap_or(1).max(1);
    let per_page = query_param(query, "per_page").unwrap_or(20).max(1);
    let items: Vec<&Record> = state
        .records
        .iter()
        .skip(((page - 1) * per_page) as usize)
        .take(per_page as usize)
        .collect();
    HttpResponse::json(
        200,
        &json!({
            "success": true,
            "data": {
                "items": items,
                "page": page,
                "per_page": per_page,
                "total": state.records.len()
            }
        }),
    )
}

fn create(state: &mut ServerState, body: Payload, now: DateTime<Utc>) -> HttpResponse {
    state.next_id += 1;
    let id = RecordId::new(format!("w{}", state.next_id));
    let mut record = Record::draft(id.clone(), &body, now);
    record.version = 1;

    let fields: Vec<String> = user_fields(&body).map(str::to_string).collect();
    state.history.entry(id).or_default().push(
        VersionEntry::new(1, ChangeType::Create, now)
            .with_fields(fields)
            .with_summary("created"),
    );
    state.records.push(record.clone());
    HttpResponse::json(201, &json!({ "success": true, "data": record }))
}

fn update(state: &mut ServerState, id: &RecordId, body: Payload, now: DateTime<Utc>) -> HttpResponse {
    let Some(current) = state.records.iter().find(|r| &r.id == id) else {
        return error_response(state.shape, 404, "workout not found");
    };
    if let Some(sent) = body.get("version").and_then(Value::as_u64) {
        if sent != current.version {
            let message = format!(
                "version mismatch: sent {sent}, current {}",
                current.version
            );
            return error_response(state.shape, 409, &message);
        }
    }
    match apply_update(state, id, &body, now, None) {
        Some(record) => ok(&record),
        None => error_response(state.shape, 404, "workout not found"),
    }
}

fn user_fields(payload: &Payload) -> impl Iterator<Item = &str> {
    payload
        .keys()
        .map(String::as_str)
        .filter(|k| !RESERVED_FIELDS.contains(k))
}

fn apply_update(
    state: &mut ServerState,
    id: &RecordId,
    changes: &Payload,
    now: DateTime<Utc>,
    actor: Option<&str>,
) -> Option<Record> {
    let record = state.records.iter_mut().find(|r| &r.id == id)?;
    let changed: Vec<String> = user_fields(changes)
        .filter(|name| record.field(name).as_ref() != changes.get(*name))
        .map(str::to_string)
        .collect();

    record.apply_changes(changes);
    record.version += 1;
    record.last_modified = now;
    record.modified_by = actor.map(str::to_string);
    let updated = record.clone();

    let change_type = if changed.len() == 1 {
        ChangeType::Field
    } else {
        ChangeType::Update
    };
    let mut entry = VersionEntry::new(updated.version, change_type, now)
        .with_fields(changed)
        .with_summary("updated");
    if let Some(actor) = actor {
        entry = entry.with_actor(actor);
    }
    state.history.entry(id.clone()).or_default().push(entry);
    Some(updated)
}

fn apply_delete(state: &mut ServerState, id: &RecordId, now: DateTime<Utc>) -> bool {
    let Some(at) = state.records.iter().position(|r| &r.id == id) else {
        return false;
    };
    let removed = state.records.remove(at);
    state.history.entry(id.clone()).or_default().push(
        VersionEntry::new(removed.version + 1, ChangeType::Delete, now).with_summary("deleted"),
    );
    true
}

#[async_trait]
impl HttpTransport for FakeServer {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let fault = {
            let mut state = self.state.lock();
            state.log.push(request.clone());
            state.faults.pop_front()
        };

        match fault {
            Some(Fault::Network(message)) => return Err(TransportError::new(message)),
            Some(Fault::Status(status)) => {
                let shape = self.state.lock().shape;
                return Ok(error_response(shape, status, status_reason(status)));
            }
            Some(Fault::Raw(response)) => return Ok(response),
            Some(Fault::Hang) => return std::future::pending().await,
            Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        Ok(self.route(&request))
    }
}
