//! Resource service adapters.
//!
//! An adapter turns typed CRUD calls on one resource into executor requests
//! and unwraps the `{ success, data, message, code }` envelope around each
//! reply. Adapters hold no state between calls.

use crate::auth::TokenProvider;
use crate::cancel::CancelToken;
use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::executor::{RequestExecutor, RequestSpec};
use crate::transport::{HttpTransport, Method};
use async_trait::async_trait;
use fitsync_protocol::{
    normalize_error, BackoffState, Envelope, Payload, Record, RecordId, ResponseBody,
    VersionEntry,
};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Keys under which list endpoints may nest their items.
pub const LIST_KEYS: &[&str] = &["items", "data", "results", "history", "versions"];

/// A remote resource served under `base/{PATH}`.
pub trait Resource: Send + Sync + 'static {
    /// Path segment.
    const PATH: &'static str;
    /// Singular label used in logs and messages.
    const LABEL: &'static str;
}

/// Workout plans.
#[derive(Debug, Clone, Copy, Default)]
pub struct Workouts;

impl Resource for Workouts {
    const PATH: &'static str = "workouts";
    const LABEL: &'static str = "workout";
}

/// Per-call options threaded from a mutation intent to the executor.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Caller-owned cancellation.
    pub cancel: Option<CancelToken>,
    /// Retry state; after the call it holds the retries consumed.
    pub backoff: Option<BackoffState>,
}

impl CallOptions {
    /// Options with no cancellation and the executor's retry policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sets the retry state.
    pub fn with_backoff(mut self, backoff: BackoffState) -> Self {
        self.backoff = Some(backoff);
        self
    }
}

/// Typed operations on a record collection.
///
/// This is the seam between the store and the network.
#[async_trait]
pub trait RecordService: Send + Sync + 'static {
    /// Fetches one record.
    async fn fetch_one(&self, id: &RecordId, opts: &mut CallOptions) -> SyncResult<Record>;

    /// Fetches one page of records (pages start at 1).
    async fn fetch_many(
        &self,
        page: u32,
        page_size: u32,
        opts: &mut CallOptions,
    ) -> SyncResult<Vec<Record>>;

    /// Creates a record.
    async fn create(&self, payload: &Payload, opts: &mut CallOptions) -> SyncResult<Record>;

    /// Updates a record. The payload carries the base `version`.
    async fn update(
        &self,
        id: &RecordId,
        payload: &Payload,
        opts: &mut CallOptions,
    ) -> SyncResult<Record>;

    /// Deletes a record.
    async fn remove(&self, id: &RecordId, opts: &mut CallOptions) -> SyncResult<()>;

    /// Marks a record as completed.
    async fn complete(&self, id: &RecordId, opts: &mut CallOptions) -> SyncResult<Record>;

    /// Fetches the version history of a record.
    async fn history(
        &self,
        id: &RecordId,
        opts: &mut CallOptions,
    ) -> SyncResult<Vec<VersionEntry>>;

    /// Fresh retry state matching the service's transport policy.
    fn retry_policy(&self) -> BackoffState;
}

/// REST adapter for one resource.
pub struct ResourceAdapter<R: Resource, T: HttpTransport> {
    executor: Arc<RequestExecutor<T>>,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    _resource: PhantomData<fn() -> R>,
}

/// Adapter for workout plans.
pub type WorkoutAdapter<T> = ResourceAdapter<Workouts, T>;

impl<R: Resource, T: HttpTransport> ResourceAdapter<R, T> {
    /// Creates an adapter over an existing executor.
    pub fn new(
        executor: Arc<RequestExecutor<T>>,
        config: &ClientConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> SyncResult<Self> {
        config.validate()?;
        let base_url = Url::parse(&config.normalized_base_url())
            .map_err(|e| SyncError::Config(format!("invalid base URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::Config(format!(
                "base URL cannot carry a path: {base_url}"
            )));
        }
        Ok(Self {
            executor,
            base_url,
            tokens,
            _resource: PhantomData,
        })
    }

    /// Creates an adapter with its own executor.
    pub fn connect(
        transport: T,
        config: &ClientConfig,
        tokens: Arc<dyn TokenProvider>,
    ) -> SyncResult<Self> {
        let executor = Arc::new(RequestExecutor::new(transport, config.executor.clone()));
        Self::new(executor, config, tokens)
    }

    /// The underlying executor.
    pub fn executor(&self) -> &Arc<RequestExecutor<T>> {
        &self.executor
    }

    /// Builds `base/{PATH}/{segments...}` with each segment percent-encoded.
    pub fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(R::PATH);
            for segment in segments {
                path.push(segment);
            }
        }
        url.into()
    }

    fn list_url(&self, page: u32, page_size: u32) -> String {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(R::PATH);
        }
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("per_page", &page_size.to_string());
        url.into()
    }

    async fn call(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        opts: &mut CallOptions,
    ) -> SyncResult<ResponseBody> {
        let mut spec = RequestSpec::new(method, url);
        if let Some(body) = body {
            spec = spec.with_body(body);
        }
        if let Some(token) = self.tokens.bearer_token() {
            spec = spec.with_header("Authorization", format!("Bearer {token}"));
        }
        if let Some(cancel) = &opts.cancel {
            spec = spec.with_cancel(cancel.clone());
        }

        let mut backoff = opts
            .backoff
            .take()
            .unwrap_or_else(|| self.executor.config().backoff());
        let result = self.executor.execute_tracked(spec, &mut backoff).await;
        opts.backoff = Some(backoff);
        result
    }
}

/// Extracts the payload from a response body.
///
/// Objects carrying a `success` or `data` key are envelopes; anything else
/// is taken as a bare payload.
pub fn unwrap_envelope(body: ResponseBody) -> SyncResult<Option<Value>> {
    match body {
        ResponseBody::Empty => Ok(None),
        ResponseBody::Text(text) => Err(SyncError::Codec(format!(
            "expected a JSON body, got text: {}",
            text.chars().take(80).collect::<String>()
        ))),
        ResponseBody::Json(value) => {
            let is_envelope = value
                .as_object()
                .is_some_and(|o| o.contains_key("success") || o.contains_key("data"));
            if !is_envelope {
                return Ok(Some(value));
            }
            let envelope = Envelope::<Value>::from_value(value.clone())?;
            if !envelope.success {
                return Err(SyncError::http(normalize_error(200, &ResponseBody::Json(value))));
            }
            Ok(envelope.data)
        }
    }
}

fn empty_response(label: &str) -> SyncError {
    SyncError::Http {
        status: 200,
        code: "EMPTY_RESPONSE".into(),
        message: format!("server returned no {label} data"),
    }
}

fn require(body: ResponseBody, label: &str) -> SyncResult<Value> {
    unwrap_envelope(body)?.ok_or_else(|| empty_response(label))
}

/// Normalizes a list payload: a bare array, or an object nesting the array
/// under one of [`LIST_KEYS`].
pub fn list_items(value: Value) -> SyncResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in LIST_KEYS {
                if let Some(Value::Array(items)) = map.remove(*key) {
                    return Ok(items);
                }
            }
            Err(SyncError::Codec("list response carries no item array".into()))
        }
        Value::Null => Ok(Vec::new()),
        other => Err(SyncError::Codec(format!("expected a list, got {other}"))),
    }
}

fn decode_all<D: DeserializeOwned>(items: Vec<Value>) -> SyncResult<Vec<D>> {
    items
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(SyncError::from))
        .collect()
}

#[async_trait]
impl<R: Resource, T: HttpTransport + 'static> RecordService for ResourceAdapter<R, T> {
    async fn fetch_one(&self, id: &RecordId, opts: &mut CallOptions) -> SyncResult<Record> {
        let body = self
            .call(Method::Get, self.url(&[id.as_str()]), None, opts)
            .await?;
        Ok(Record::from_value(require(body, R::LABEL)?)?)
    }

    async fn fetch_many(
        &self,
        page: u32,
        page_size: u32,
        opts: &mut CallOptions,
    ) -> SyncResult<Vec<Record>> {
        let body = self
            .call(Method::Get, self.list_url(page, page_size), None, opts)
            .await?;
        let items = match unwrap_envelope(body)? {
            Some(value) => list_items(value)?,
            None => Vec::new(),
        };
        debug!(resource = R::PATH, page, count = items.len(), "fetched page");
        decode_all(items)
    }

    async fn create(&self, payload: &Payload, opts: &mut CallOptions) -> SyncResult<Record> {
        let body = self
            .call(
                Method::Post,
                self.url(&[]),
                Some(Value::Object(payload.clone())),
                opts,
            )
            .await?;
        Ok(Record::from_value(require(body, R::LABEL)?)?)
    }

    async fn update(
        &self,
        id: &RecordId,
        payload: &Payload,
        opts: &mut CallOptions,
    ) -> SyncResult<Record> {
        let body = self
            .call(
                Method::Put,
                self.url(&[id.as_str()]),
                Some(Value::Object(payload.clone())),
                opts,
            )
            .await?;
        Ok(Record::from_value(require(body, R::LABEL)?)?)
    }

    async fn remove(&self, id: &RecordId, opts: &mut CallOptions) -> SyncResult<()> {
        let body = self
            .call(Method::Delete, self.url(&[id.as_str()]), None, opts)
            .await?;
        unwrap_envelope(body)?;
        Ok(())
    }

    async fn complete(&self, id: &RecordId, opts: &mut CallOptions) -> SyncResult<Record> {
        let body = self
            .call(Method::Post, self.url(&[id.as_str(), "complete"]), None, opts)
            .await?;
        Ok(Record::from_value(require(body, R::LABEL)?)?)
    }

    async fn history(
        &self,
        id: &RecordId,
        opts: &mut CallOptions,
    ) -> SyncResult<Vec<VersionEntry>> {
        let body = self
            .call(Method::Get, self.url(&[id.as_str(), "history"]), None, opts)
            .await?;
        let items = match unwrap_envelope(body)? {
            Some(value) => list_items(value)?,
            None => Vec::new(),
        };
        decode_all(items)
    }

    fn retry_policy(&self) -> BackoffState {
        self.executor.config().backoff()
    }
}
