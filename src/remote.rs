//! Remote statistical/ML analysis client.
//!
//! [`RemoteAnalysisClient`] formats a request, applies the caller's timeout,
//! sends it through an [`AnalysisTransport`], and maps the reply to an
//! [`AnalysisResult`] or a [`RemoteFailure`]. It never retries and never
//! caches; both belong to the router.
//!
//! Transports:
//! - [`HttpTransport`]: JSON over HTTP (`POST {base_url}/v1/analyze`)
//! - [`ScriptedTransport`]: in-memory responder for tests and demos
//!
//! ## Wire format
//!
//! ```text
//! request:  { "query": "...", "context": {...}, "requested_timeout_ms": 2000 }
//! success:  { "result": {...}, "model_metadata": {...} }
//! failure:  { "kind": "unavailable", "message": "..." }
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::debug;

use crate::analysis::{AnalysisResult, Cacheability};
use crate::query::{Query, QueryContext};
use crate::RouterError;

// ============================================================================
// Errors
// ============================================================================

/// Structured failure of a remote analysis call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteFailure {
    /// No reply within the caller-supplied timeout.
    #[error("remote analysis timed out after {after_ms}ms")]
    Timeout {
        /// Timeout that elapsed, in milliseconds.
        after_ms: u64,
    },

    /// Connection refused, DNS failure, or the backend reported itself down.
    #[error("remote analysis backend unavailable: {0}")]
    Unavailable(String),

    /// The backend replied with something that is not a valid response.
    #[error("invalid response from remote analysis backend: {0}")]
    InvalidResponse(String),

    /// The backend refused the request because of rate limiting.
    #[error("remote analysis backend rate limited the request")]
    RateLimited {
        /// Seconds the backend asked us to wait, if it said.
        retry_after_secs: Option<u64>,
    },
}

impl RemoteFailure {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidResponse(_) => "invalid_response",
            Self::RateLimited { .. } => "rate_limited",
        }
    }

    /// Return `true` for [`RemoteFailure::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Low-level transport failure, before mapping to [`RemoteFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not reach the backend at all.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The transport's own deadline fired.
    #[error("transport timed out")]
    Timeout,
    /// Anything else (TLS, request build, body read).
    #[error("transport error: {0}")]
    Other(String),
}

// ============================================================================
// Wire types
// ============================================================================

/// Request payload sent to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// Normalized query text.
    pub query: String,
    /// Caller context, forwarded verbatim.
    pub context: QueryContext,
    /// Deadline the backend should aim for.
    pub requested_timeout_ms: u64,
}

impl RemoteRequest {
    /// Build the payload for `query` with the given deadline.
    pub fn new(query: &Query, timeout: Duration) -> Self {
        Self {
            query: query.normalized().to_string(),
            context: query.context().clone(),
            requested_timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Successful response body.
#[derive(Debug, Clone, Deserialize)]
struct RemoteResponse {
    result: Value,
    #[serde(default)]
    model_metadata: Option<Value>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    cacheability: Option<Cacheability>,
}

/// Structured error body.
#[derive(Debug, Clone, Deserialize)]
struct RemoteErrorBody {
    kind: String,
    #[serde(default)]
    message: String,
}

/// Raw reply handed back by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportReply {
    /// HTTP-style status code.
    pub status: u16,
    /// Raw body bytes.
    pub body: Vec<u8>,
    /// Parsed `Retry-After`, if present.
    pub retry_after_secs: Option<u64>,
}

impl TransportReply {
    /// A reply with a JSON body.
    pub fn json(status: u16, body: &Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
            retry_after_secs: None,
        }
    }
}

// ============================================================================
// Transport trait
// ============================================================================

/// Carries a [`RemoteRequest`] to the backend.
///
/// Implementations must be thread-safe (Send + Sync); the client holds them
/// as `Arc<dyn AnalysisTransport>`.
#[async_trait]
pub trait AnalysisTransport: Send + Sync {
    /// Send one request. `timeout` is advisory for the transport; the client
    /// enforces it independently.
    async fn send(
        &self,
        request: &RemoteRequest,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError>;
}

// ============================================================================
// HTTP transport
// ============================================================================

/// JSON-over-HTTP transport.
///
/// ## Example
///
/// ```no_run
/// use hybrid_query_router::HttpTransport;
///
/// let transport = HttpTransport::new("http://analysis.internal:8090").unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    /// Create a transport for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Config`] if the HTTP client cannot be built
    /// or the URL is empty.
    pub fn new(base_url: impl Into<String>) -> Result<Self, RouterError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(RouterError::Config(
                "remote analysis base URL is empty".to_string(),
            ));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| RouterError::Config(format!("HTTP client build failed: {e}")))?;
        Ok(Self { client, base_url })
    }

    /// Use a preconfigured `reqwest::Client` (proxies, TLS roots, …).
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The normalized base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl AnalysisTransport for HttpTransport {
    async fn send(
        &self,
        request: &RemoteRequest,
        timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        let response = self
            .client
            .post(format!("{}/v1/analyze", self.base_url))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Other(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Other(format!("failed to read body: {e}"))
            }
        })?;

        Ok(TransportReply {
            status,
            body: body.to_vec(),
            retry_after_secs,
        })
    }
}

// ============================================================================
// Scripted transport (tests / demos)
// ============================================================================

type Responder = dyn Fn(&RemoteRequest) -> Result<TransportReply, TransportError> + Send + Sync;

/// In-memory transport driven by a closure.
///
/// Useful for tests and for running the router without a real backend.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    delay: Duration,
    calls: AtomicUsize,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("delay", &self.delay)
            .field("calls", &self.calls)
            .finish()
    }
}

impl ScriptedTransport {
    /// Build from an arbitrary responder.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&RemoteRequest) -> Result<TransportReply, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Always answer `200` with `result`.
    pub fn ok(result: Value) -> Self {
        Self::new(move |_| {
            Ok(TransportReply::json(
                200,
                &json!({ "result": result, "model_metadata": { "model": "scripted" } }),
            ))
        })
    }

    /// Echo the query back as the result payload, tagged with the model name.
    pub fn echo(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(move |req| {
            Ok(TransportReply::json(
                200,
                &json!({
                    "result": { "query": req.query, "geo_scope": req.context.geo_scope },
                    "model_metadata": { "model": model },
                    "confidence": 0.9
                }),
            ))
        })
    }

    /// Always fail with `error`.
    pub fn failing(error: TransportError) -> Self {
        Self::new(move |_| Err(error.clone()))
    }

    /// Always answer with `status` and an empty JSON object.
    pub fn status(status: u16) -> Self {
        Self::new(move |_| Ok(TransportReply::json(status, &json!({}))))
    }

    /// Sleep for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `send` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisTransport for ScriptedTransport {
    async fn send(
        &self,
        request: &RemoteRequest,
        _timeout: Duration,
    ) -> Result<TransportReply, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.responder)(request)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Stateless client for the remote analysis backend.
#[derive(Clone)]
pub struct RemoteAnalysisClient {
    transport: Arc<dyn AnalysisTransport>,
}

impl std::fmt::Debug for RemoteAnalysisClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAnalysisClient").finish_non_exhaustive()
    }
}

impl RemoteAnalysisClient {
    /// Wrap a transport.
    pub fn new(transport: Arc<dyn AnalysisTransport>) -> Self {
        Self { transport }
    }

    /// Run one remote analysis. Exactly one transport call; no retry.
    ///
    /// # Errors
    ///
    /// - [`RemoteFailure::Timeout`] if `timeout` elapses first
    /// - [`RemoteFailure::Unavailable`] on connection failure or 502/503/504
    /// - [`RemoteFailure::RateLimited`] on 429
    /// - [`RemoteFailure::InvalidResponse`] on a malformed or unexpected reply
    pub async fn analyze(
        &self,
        query: &Query,
        timeout: Duration,
    ) -> Result<AnalysisResult, RemoteFailure> {
        let request = RemoteRequest::new(query, timeout);
        let after_ms = timeout.as_millis() as u64;

        let reply = match tokio::time::timeout(timeout, self.transport.send(&request, timeout)).await
        {
            Err(_) | Ok(Err(TransportError::Timeout)) => {
                return Err(RemoteFailure::Timeout { after_ms });
            }
            Ok(Err(TransportError::Connect(msg))) | Ok(Err(TransportError::Other(msg))) => {
                return Err(RemoteFailure::Unavailable(msg));
            }
            Ok(Ok(reply)) => reply,
        };

        debug!(
            key = %query.fingerprint(),
            status = reply.status,
            bytes = reply.body.len(),
            "remote analysis replied"
        );
        parse_reply(reply, after_ms)
    }
}

/// Map a raw reply to a result or a structured failure.
fn parse_reply(reply: TransportReply, after_ms: u64) -> Result<AnalysisResult, RemoteFailure> {
    match reply.status {
        200..=299 => match serde_json::from_slice::<RemoteResponse>(&reply.body) {
            Ok(body) => {
                let mut result = AnalysisResult::new(body.result)
                    .with_cacheability(body.cacheability.unwrap_or(Cacheability::Deterministic));
                if let Some(confidence) = body.confidence {
                    result = result.with_confidence(confidence);
                }
                if let Some(metadata) = body.model_metadata {
                    result = result.with_model_metadata(metadata);
                }
                Ok(result)
            }
            Err(e) => match serde_json::from_slice::<RemoteErrorBody>(&reply.body) {
                Ok(err) => Err(map_error_body(err, reply.retry_after_secs, after_ms)),
                Err(_) => Err(RemoteFailure::InvalidResponse(format!(
                    "malformed success body: {e}"
                ))),
            },
        },
        429 => Err(RemoteFailure::RateLimited {
            retry_after_secs: reply.retry_after_secs,
        }),
        502..=504 => Err(RemoteFailure::Unavailable(format!("HTTP {}", reply.status))),
        status => match serde_json::from_slice::<RemoteErrorBody>(&reply.body) {
            Ok(err) => Err(map_error_body(err, reply.retry_after_secs, after_ms)),
            Err(_) => Err(RemoteFailure::InvalidResponse(format!(
                "unexpected HTTP {status}"
            ))),
        },
    }
}

fn map_error_body(
    body: RemoteErrorBody,
    retry_after_secs: Option<u64>,
    after_ms: u64,
) -> RemoteFailure {
    match body.kind.as_str() {
        "timeout" => RemoteFailure::Timeout { after_ms },
        "unavailable" => RemoteFailure::Unavailable(body.message),
        "rate_limited" => RemoteFailure::RateLimited { retry_after_secs },
        other => RemoteFailure::InvalidResponse(format!("{other}: {}", body.message)),
    }
}
