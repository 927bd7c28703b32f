//! Auth-aware HTTP execution with retry, backoff, and rate-limit handling.
//!
//! Every outbound call in TimeBridge goes through [`HttpTransport::request`],
//! parameterised by method, URL, optional query, optional body, and optional
//! extra headers. Transient failures (429, 5xx, timeouts, connection drops)
//! are retried with exponential backoff, honouring `Retry-After` when the
//! server sends one. All other 4xx statuses surface immediately with a
//! truncated body snippet.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use tb_domain::config::HttpConfig;
use tb_domain::error::{Error, Result};

use crate::auth::AuthProvider;

/// Most recent request-log entries kept in memory.
const REQUEST_LOG_CAP: usize = 100;

/// Longest body snippet carried inside an error message.
const BODY_SNIPPET_CHARS: usize = 200;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request options / log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Optional parts of a request, shared by all five verbs.
#[derive(Default)]
pub struct RequestOptions<'a> {
    pub query: Option<&'a [(String, String)]>,
    pub body: Option<&'a Value>,
    pub headers: &'a [(&'static str, &'a str)],
}

/// One diagnostic entry per request attempt.
#[derive(Debug, Clone)]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub attempt: u32,
    pub elapsed_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared HTTP client for one provider.
///
/// The underlying `reqwest::Client` pools connections for the lifetime of
/// the transport; dropping the transport releases the pool.
pub struct HttpTransport {
    http: reqwest::Client,
    auth: Arc<dyn AuthProvider>,
    max_retries: u32,
    backoff_factor: f64,
    cancel: CancellationToken,
    log: Mutex<VecDeque<RequestLogEntry>>,
}

impl HttpTransport {
    /// Build a transport from the shared HTTP tuning config.
    pub fn new(cfg: &HttpConfig, auth: Arc<dyn AuthProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            http,
            auth,
            max_retries: cfg.max_retries,
            backoff_factor: cfg.backoff_factor,
            cancel: CancellationToken::new(),
            log: Mutex::new(VecDeque::new()),
        })
    }

    /// Replace the cancellation token (the orchestrator installs its own
    /// per-run token so a cancelled run aborts in-flight retries).
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // ── Verbs ────────────────────────────────────────────────────────

    pub async fn get(&self, url: &str, opts: RequestOptions<'_>) -> Result<Value> {
        self.request(Method::GET, url, opts).await
    }

    pub async fn post(&self, url: &str, opts: RequestOptions<'_>) -> Result<Value> {
        self.request(Method::POST, url, opts).await
    }

    pub async fn put(&self, url: &str, opts: RequestOptions<'_>) -> Result<Value> {
        self.request(Method::PUT, url, opts).await
    }

    pub async fn patch(&self, url: &str, opts: RequestOptions<'_>) -> Result<Value> {
        self.request(Method::PATCH, url, opts).await
    }

    pub async fn delete(&self, url: &str, opts: RequestOptions<'_>) -> Result<Value> {
        self.request(Method::DELETE, url, opts).await
    }

    // ── Core request engine ──────────────────────────────────────────

    /// Execute a request with retry + exponential backoff on transient
    /// failures. Parses the response body as JSON (empty body → `null`).
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        opts: RequestOptions<'_>,
    ) -> Result<Value> {
        let mut last_err: Option<Error> = None;
        let mut retry_after: Option<Duration> = None;

        for attempt in 0..=self.max_retries {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled(format!("{method} {url}")));
            }

            if attempt > 0 {
                let delay =
                    retry_after.take().unwrap_or_else(|| backoff_delay(self.backoff_factor, attempt));
                tracing::debug!(
                    %method, url, attempt, delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(Error::Cancelled(format!("{method} {url}")));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let started = Instant::now();
            let result = self.send_once(method.clone(), url, &opts).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    self.log_attempt(&method, url, Some(status.as_u16()), attempt, elapsed_ms);

                    if status.is_success() {
                        let body = resp
                            .text()
                            .await
                            .map_err(|e| Error::Protocol(format!("reading body: {e}")))?;
                        return parse_body(&body);
                    }

                    if is_retryable_status(status.as_u16()) {
                        retry_after = parse_retry_after(resp.headers());
                        let body = resp.text().await.unwrap_or_default();
                        last_err = Some(classify_status(status.as_u16(), &body));
                        tracing::warn!(
                            %method, url, status = status.as_u16(), attempt,
                            "transient HTTP failure"
                        );
                        continue;
                    }

                    // Non-retryable: surface status + snippet immediately.
                    let body = resp.text().await.unwrap_or_default();
                    return Err(classify_status(status.as_u16(), &body));
                }
                Err(e) => {
                    self.log_attempt(&method, url, None, attempt, elapsed_ms);

                    match &e {
                        // Auth and protocol failures are not transient.
                        Error::Auth(_) | Error::Protocol(_) => return Err(e),
                        _ => {
                            tracing::warn!(%method, url, attempt, error = %e, "transport failure");
                            last_err = Some(e);
                            continue;
                        }
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            Error::Connection(format!("{method} {url}: all retries exhausted"))
        }))
    }

    /// One attempt: decorate with auth + extra headers and send.
    async fn send_once(
        &self,
        method: Method,
        url: &str,
        opts: &RequestOptions<'_>,
    ) -> Result<reqwest::Response> {
        let mut rb = self.http.request(method, url);

        for (name, value) in self.auth.auth_headers().await? {
            rb = rb.header(name, value);
        }
        for (name, value) in opts.headers {
            rb = rb.header(*name, *value);
        }
        if let Some(query) = opts.query {
            rb = rb.query(query);
        }
        if let Some(body) = opts.body {
            // Extra headers may override the content type (json-patch).
            if !opts.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case("content-type")) {
                rb = rb.header("Content-Type", "application/json");
            }
            rb = rb.body(serde_json::to_vec(body)?);
        }

        rb.send().await.map_err(from_reqwest)
    }

    fn log_attempt(
        &self,
        method: &Method,
        url: &str,
        status: Option<u16>,
        attempt: u32,
        elapsed_ms: u64,
    ) {
        let mut log = self.log.lock();
        if log.len() == REQUEST_LOG_CAP {
            log.pop_front();
        }
        log.push_back(RequestLogEntry {
            timestamp: Utc::now(),
            method: method.to_string(),
            url: url.to_string(),
            status,
            attempt,
            elapsed_ms,
        });
    }

    /// Snapshot of the bounded request log, oldest first.
    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.log.lock().iter().cloned().collect()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Decision helpers (pure, unit-tested)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Statuses worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff before retry `attempt` (1-based).
pub fn backoff_delay(factor: f64, attempt: u32) -> Duration {
    let secs = factor * 2f64.powi(attempt.saturating_sub(1) as i32);
    Duration::from_secs_f64(secs.max(0.0))
}

/// Read a seconds-form `Retry-After` header.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs: u64 = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Map an HTTP status + body into the error taxonomy.
pub fn classify_status(status: u16, body: &str) -> Error {
    let snippet = body_snippet(body);
    match StatusCode::from_u16(status) {
        Ok(StatusCode::UNAUTHORIZED) => Error::Unauthorized(snippet),
        Ok(StatusCode::FORBIDDEN) => Error::Forbidden(snippet),
        Ok(StatusCode::NOT_FOUND) => Error::NotFound(snippet),
        Ok(StatusCode::TOO_MANY_REQUESTS) => Error::RateLimited(snippet),
        Ok(s) if s.is_server_error() => Error::Server {
            status,
            message: snippet,
        },
        Ok(s) if s.is_client_error() => {
            Error::InvalidInput(format!("HTTP {status}: {snippet}"))
        }
        _ => Error::Protocol(format!("unexpected HTTP {status}: {snippet}")),
    }
}

/// Truncate an error body for inclusion in messages.
pub fn body_snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

/// Parse a response body as JSON; empty bodies become `null`.
fn parse_body(body: &str) -> Result<Value> {
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| Error::Protocol(format!("malformed JSON body: {e}")))
}

/// Convert a `reqwest::Error` into the domain error.
fn from_reqwest(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(e.to_string())
    } else if e.is_connect() {
        Error::Connection(e.to_string())
    } else if e.is_decode() || e.is_body() {
        Error::Protocol(e.to_string())
    } else {
        Error::Connection(e.to_string())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
