//! Resilient request executor.
//!
//! Wraps one network call with a deadline, cancellation and bounded
//! exponential backoff for transport failures. Exactly one cancellation
//! source is active per call: the caller's token when one is supplied,
//! otherwise a token owned by the executor that is cancelled, with a
//! recorded reason, when the deadline passes.
//!
//! Every timer the executor creates is wrapped in a [`TimerGuard`]; the
//! live count is exposed by [`RequestExecutor::active_timers`] and returns
//! to zero whenever a call settles.

use crate::cancel::CancelToken;
use crate::config::ExecutorConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use fitsync_protocol::{is_explicit_failure, normalize_error, BackoffState, ResponseBody};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Description of one call.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// Method.
    pub method: Method,
    /// Absolute URL.
    pub url: String,
    /// JSON body.
    pub body: Option<Value>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Per-attempt deadline override.
    pub timeout: Option<Duration>,
    /// Caller-owned cancellation.
    pub cancel: Option<CancelToken>,
}

impl RequestSpec {
    /// Creates a request spec.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            headers: Vec::new(),
            timeout: None,
            cancel: None,
        }
    }

    /// Shorthand for a GET.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::Get, url)
    }

    /// Sets the JSON body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Overrides the deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Supplies a caller-owned cancellation token.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn to_request(&self) -> HttpRequest {
        let mut headers = self.headers.clone();
        if !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("accept")) {
            headers.push(("Accept".into(), "application/json".into()));
        }
        HttpRequest {
            method: self.method,
            url: self.url.clone(),
            headers,
            body: self.body.clone(),
        }
    }
}

/// Counts live timers; decrements on drop.
struct TimerGuard {
    live: Arc<AtomicUsize>,
}

impl TimerGuard {
    fn new(live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            live: Arc::clone(live),
        }
    }
}

impl Drop for TimerGuard {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executes requests over a transport.
pub struct RequestExecutor<T: HttpTransport> {
    transport: T,
    config: ExecutorConfig,
    live_timers: Arc<AtomicUsize>,
}

impl<T: HttpTransport> RequestExecutor<T> {
    /// Creates an executor.
    pub fn new(transport: T, config: ExecutorConfig) -> Self {
        Self {
            transport,
            config,
            live_timers: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Returns the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of timers currently alive.
    pub fn active_timers(&self) -> usize {
        self.live_timers.load(Ordering::SeqCst)
    }

    /// Executes a call with the configured retry policy.
    pub async fn execute(&self, spec: RequestSpec) -> SyncResult<ResponseBody> {
        let mut backoff = self.config.backoff();
        self.execute_tracked(spec, &mut backoff).await
    }

    /// Executes a call, consuming retries from `backoff`.
    ///
    /// On return `backoff.attempt` holds the number of retries performed.
    pub async fn execute_tracked(
        &self,
        spec: RequestSpec,
        backoff: &mut BackoffState,
    ) -> SyncResult<ResponseBody> {
        let request = spec.to_request();
        let (cancel, deadline) = match &spec.cancel {
            Some(token) => (token.clone(), None),
            None => (
                CancelToken::new(),
                Some(spec.timeout.unwrap_or(self.config.timeout)),
            ),
        };

        loop {
            debug!(
                method = %request.method,
                url = %request.url,
                attempt = backoff.attempt,
                "sending request"
            );

            let error = match self.attempt(&request, &cancel, deadline).await {
                Ok(response) => return interpret(response),
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }
            let Some(delay) = backoff.advance() else {
                warn!(url = %request.url, retries = backoff.attempt, %error, "retries exhausted");
                return Err(error);
            };

            warn!(
                url = %request.url,
                attempt = backoff.attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "transport failure, retrying"
            );
            self.pause(delay, &cancel).await?;
        }
    }

    async fn attempt(
        &self,
        request: &HttpRequest,
        cancel: &CancelToken,
        deadline: Option<Duration>,
    ) -> SyncResult<HttpResponse> {
        if cancel.is_cancelled() {
            return Err(SyncError::aborted(cancel.reason()));
        }

        let send = self.transport.send(request.clone());

        let Some(limit) = deadline else {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(url = %request.url, reason = %cancel.reason(), "request aborted");
                    Err(SyncError::aborted(cancel.reason()))
                }
                result = send => result.map_err(|e| SyncError::network(e.message)),
            };
        };

        let _timer = TimerGuard::new(&self.live_timers);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::aborted(cancel.reason())),
            result = send => result.map_err(|e| SyncError::network(e.message)),
            _ = tokio::time::sleep(limit) => {
                let reason = format!(
                    "request to {} timed out after {} ms",
                    request.url,
                    limit.as_millis()
                );
                cancel.cancel(reason.clone());
                warn!(url = %request.url, %reason, "request timed out");
                Err(SyncError::timeout(reason))
            }
        }
    }

    async fn pause(&self, delay: Duration, cancel: &CancelToken) -> SyncResult<()> {
        let _timer = TimerGuard::new(&self.live_timers);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::aborted(cancel.reason())),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

fn is_json_content_type(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let essence = ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        essence == "application/json" || essence.ends_with("+json")
    })
}

/// Parses a raw response body.
///
/// No-content responses become [`ResponseBody::Empty`]; bodies that claim
/// JSON but fail to parse are kept as text.
pub fn parse_body(response: &HttpResponse) -> ResponseBody {
    if response.status == 204 || response.body.trim().is_empty() {
        return ResponseBody::Empty;
    }
    let content_type = response.content_type.as_deref();
    if is_json_content_type(content_type) || content_type.is_none() {
        if let Ok(value) = serde_json::from_str::<Value>(&response.body) {
            return ResponseBody::Json(value);
        }
    }
    ResponseBody::Text(response.body.clone())
}

fn interpret(response: HttpResponse) -> SyncResult<ResponseBody> {
    let body = parse_body(&response);
    let failed = !(200..300).contains(&response.status) || is_explicit_failure(&body);
    if failed {
        let fault = normalize_error(response.status, &body);
        debug!(status = fault.status, code = %fault.code, "server rejected request");
        return Err(SyncError::http(fault));
    }
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockReply, MockTransport};
    use serde_json::json;

    fn executor(transport: Arc<MockTransport>) -> RequestExecutor<Arc<MockTransport>> {
        RequestExecutor::new(transport, ExecutorConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn parses_json_success() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "success": true, "data": { "id": "w1" } }));
        let exec = executor(Arc::clone(&transport));

        let body = exec.execute(RequestSpec::get("http://api/workouts/w1")).await.unwrap();
        assert_eq!(body.as_json().unwrap()["data"]["id"], json!("w1"));
        assert_eq!(exec.active_timers(), 0);
        assert_eq!(
            transport.requests()[0].header("accept"),
            Some("application/json")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn no_content_is_empty() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::Respond(HttpResponse::no_content()));
        let exec = executor(Arc::clone(&transport));

        let body = exec
            .execute(RequestSpec::new(Method::Delete, "http://api/workouts/w1"))
            .await
            .unwrap();
        assert_eq!(body, ResponseBody::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn text_body_is_returned_raw() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::Respond(HttpResponse::text(200, "pong")));
        let exec = executor(Arc::clone(&transport));

        let body = exec.execute(RequestSpec::get("http://api/ping")).await.unwrap();
        assert_eq!(body, ResponseBody::Text("pong".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn success_false_is_http_error() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "success": false, "message": "nope", "code": "DENIED" }));
        let exec = executor(Arc::clone(&transport));

        let err = exec.execute(RequestSpec::get("http://api/x")).await.unwrap_err();
        match err {
            SyncError::Http { status, code, message } => {
                assert_eq!(status, 200);
                assert_eq!(code, "DENIED");
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn http_errors_are_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(503, json!({ "error": { "code": "DOWN", "message": "maintenance" } }));
        let exec = executor(Arc::clone(&transport));

        let err = exec.execute(RequestSpec::get("http://api/x")).await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failures_retry_with_backoff() {
        let transport = Arc::new(MockTransport::new());
        transport.push_failure("reset");
        transport.push_failure("reset");
        transport.push_json(200, json!({ "success": true, "data": 1 }));
        let exec = executor(Arc::clone(&transport));

        let start = tokio::time::Instant::now();
        let mut backoff = exec.config().backoff();
        let body = exec
            .execute_tracked(RequestSpec::get("http://api/x"), &mut backoff)
            .await
            .unwrap();

        assert_eq!(body.as_json().unwrap()["data"], json!(1));
        assert_eq!(transport.request_count(), 3);
        assert_eq!(backoff.attempt, 2);
        // 1000 ms + 2000 ms of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
        assert_eq!(exec.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded() {
        let transport = Arc::new(MockTransport::new());
        for _ in 0..10 {
            transport.push_failure("refused");
        }
        let exec = executor(Arc::clone(&transport));

        let err = exec.execute(RequestSpec::get("http://api/x")).await.unwrap_err();
        assert!(matches!(err, SyncError::Network { .. }));
        assert_eq!(transport.request_count(), 4);
        assert_eq!(exec.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_carries_reason_and_is_not_retried() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::Hang);
        let exec = RequestExecutor::new(
            Arc::clone(&transport),
            ExecutorConfig::default().with_timeout(Duration::from_secs(5)),
        );

        let err = exec.execute(RequestSpec::get("http://api/slow")).await.unwrap_err();
        match err {
            SyncError::Timeout { reason } => {
                assert!(reason.contains("http://api/slow"));
                assert!(reason.contains("5000 ms"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 1);
        assert_eq!(exec.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_token_aborts_without_retry() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::Hang);
        let exec = executor(Arc::clone(&transport));
        let token = CancelToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel("dialog closed");
        });

        let err = exec
            .execute(RequestSpec::get("http://api/x").with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Aborted { ref reason } if reason == "dialog closed"));
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_token_replaces_executor_deadline() {
        let transport = Arc::new(MockTransport::new());
        transport.push(MockReply::Delayed(
            Duration::from_secs(120),
            Box::new(MockReply::Respond(HttpResponse::json(200, &json!({ "success": true })))),
        ));
        let exec = RequestExecutor::new(
            Arc::clone(&transport),
            ExecutorConfig::default().with_timeout(Duration::from_secs(1)),
        );

        let result = exec
            .execute(RequestSpec::get("http://api/x").with_cancel(CancelToken::new()))
            .await;
        assert!(result.is_ok());
        assert_eq!(exec.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn pre_cancelled_token_never_sends() {
        let transport = Arc::new(MockTransport::new());
        let exec = executor(Arc::clone(&transport));
        let token = CancelToken::new();
        token.cancel_default();

        let err = exec
            .execute(RequestSpec::get("http://api/x").with_cancel(token))
            .await
            .unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_aborts() {
        let transport = Arc::new(MockTransport::new());
        transport.push_failure("reset");
        let exec = executor(Arc::clone(&transport));
        let token = CancelToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel("navigated away");
        });

        let err = exec
            .execute(RequestSpec::get("http://api/x").with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Aborted { .. }));
        assert_eq!(transport.request_count(), 1);
        assert_eq!(exec.active_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_call_leaves_no_timer_behind() {
        let transport = Arc::new(MockTransport::new());
        transport.push_json(200, json!({ "success": true }));
        transport.push_json(500, json!("boom"));
        let exec = RequestExecutor::new(
            Arc::clone(&transport),
            ExecutorConfig::default().with_timeout(Duration::from_secs(2)),
        );

        exec.execute(RequestSpec::get("http://api/a")).await.unwrap();
        exec.execute(RequestSpec::get("http://api/b")).await.unwrap_err();
        assert_eq!(exec.active_timers(), 0);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(exec.active_timers(), 0);
        assert_eq!(transport.request_count(), 2);
    }

    #[test]
    fn body_parsing_rules() {
        let json = HttpResponse::json(200, &json!({ "a": 1 }));
        assert!(matches!(parse_body(&json), ResponseBody::Json(_)));

        let vendor = HttpResponse {
            status: 200,
            content_type: Some("application/problem+json; charset=utf-8".into()),
            body: "{\"detail\":\"x\"}".into(),
        };
        assert!(matches!(parse_body(&vendor), ResponseBody::Json(_)));

        let broken = HttpResponse {
            status: 200,
            content_type: Some("application/json".into()),
            body: "{not json".into(),
        };
        assert_eq!(parse_body(&broken), ResponseBody::Text("{not json".into()));

        let blank = HttpResponse::text(200, "  ");
        assert_eq!(parse_body(&blank), ResponseBody::Empty);

        let html = HttpResponse {
            status: 502,
            content_type: Some("text/html".into()),
            body: "{\"looks\":\"json\"}".into(),
        };
        assert!(matches!(parse_body(&html), ResponseBody::Text(_)));
    }
}
