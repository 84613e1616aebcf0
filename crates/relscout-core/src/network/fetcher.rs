//! The fetcher: one logical request with retry and rate limit awareness.
//!
//! Wraps a [`Transport`] with:
//! - URL validation (absolute, https only by default)
//! - Immediate failure on HTTP 403 from a rate-limited API host
//! - Linear retry of transient failures with an accumulated failure history
//! - Transparent gzip decoding and text / JSON decoding
//! - Rate limit header tracking for diagnostics

use crate::config::{duration_ms, NetworkConfig};
use crate::error::excerpt;
use crate::network::guard::{NetworkGuard, Unrestricted};
use crate::network::retry::{retry_async, RetryConfig, RetryStats};
use crate::network::transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use crate::{ResolveError, Result};
use bytes::Bytes;
use flate2::read::GzDecoder;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn, Instrument};
use url::Url;

/// Runtime configuration of the fetcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    #[serde(rename = "connect_timeout_ms", with = "duration_ms")]
    pub connect_timeout: Duration,
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    /// Ask servers for gzip-compressed bodies.
    pub accept_compressed: bool,
    pub user_agent: String,
    /// Hosts whose HTTP 403 is reported as an exhausted rate limit.
    pub rate_limited_hosts: Vec<String>,
    pub retry: RetryConfig,
    pub require_https: bool,
    /// Observational tag recorded on every request span.
    pub traffic_tag: u32,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            connect_timeout: NetworkConfig::CONNECT_TIMEOUT,
            request_timeout: NetworkConfig::REQUEST_TIMEOUT,
            accept_compressed: true,
            user_agent: NetworkConfig::USER_AGENT.to_string(),
            rate_limited_hosts: NetworkConfig::RATE_LIMITED_HOSTS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            retry: RetryConfig::default(),
            require_https: true,
            traffic_tag: NetworkConfig::TRAFFIC_TAG,
        }
    }
}

/// Rate limit state extracted from response headers.
#[derive(Debug, Clone, Default)]
pub struct RateLimitState {
    /// Remaining requests allowed.
    pub remaining: Option<u64>,
    /// Total request limit.
    pub limit: Option<u64>,
    /// Unix timestamp when the rate limit resets.
    pub reset: Option<u64>,
}

/// Performs requests for every adapter. Construct once, share by reference.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    guard: Arc<dyn NetworkGuard>,
    config: FetcherConfig,
    rate_limit_remaining: AtomicI64,
    rate_limit_limit: AtomicU64,
    rate_limit_reset: AtomicU64,
}

impl Fetcher {
    /// Create a fetcher backed by a pooled reqwest client.
    pub fn new(config: FetcherConfig) -> Result<Self> {
        let transport = ReqwestTransport::new(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a fetcher over any transport.
    pub fn with_transport(config: FetcherConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            guard: Arc::new(Unrestricted),
            config,
            rate_limit_remaining: AtomicI64::new(-1),
            rate_limit_limit: AtomicU64::new(0),
            rate_limit_reset: AtomicU64::new(0),
        }
    }

    /// Replace the network capability check.
    pub fn with_guard(mut self, guard: Arc<dyn NetworkGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn config(&self) -> &FetcherConfig {
        &self.config
    }

    /// Last rate limit information seen from any host.
    pub fn rate_limit_state(&self) -> RateLimitState {
        let remaining = self.rate_limit_remaining.load(Ordering::SeqCst);
        let limit = self.rate_limit_limit.load(Ordering::SeqCst);
        let reset = self.rate_limit_reset.load(Ordering::SeqCst);
        RateLimitState {
            remaining: (remaining >= 0).then_some(remaining as u64),
            limit: (limit > 0).then_some(limit),
            reset: (reset > 0).then_some(reset),
        }
    }

    /// GET a resource and decode it as UTF-8 text.
    pub async fn get_text(&self, url: &str) -> Result<String> {
        let body = self.fetch(HttpRequest::get(url)).await?;
        decode_text(url, &body)
    }

    /// GET a resource and decode it as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        self.get_json_with_headers(url, &[]).await
    }

    /// GET a resource with extra headers and decode it as JSON.
    pub async fn get_json_with_headers<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        let mut request = HttpRequest::get(url);
        for (key, value) in headers {
            request = request.with_header(*key, *value);
        }
        let body = self.fetch(request).await?;
        decode_json(url, &body)
    }

    /// POST a JSON body and decode the JSON answer.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)
            .map_err(|e| ResolveError::config(format!("failed to encode request body: {}", e)))?;
        let request =
            HttpRequest::post(url, payload).with_header("Content-Type", "application/json");
        let response = self.fetch(request).await?;
        decode_json(url, &response)
    }

    /// Execute a request and return the decoded (decompressed) body.
    pub async fn fetch(&self, request: HttpRequest) -> Result<Bytes> {
        let host = self.validate_url(&request.url)?;
        self.guard.check()?;

        let span = tracing::debug_span!(
            "fetch",
            traffic_tag = self.config.traffic_tag,
            method = %request.method,
            host = %host,
        );

        async {
            let request = self.prepare(request);
            let url = request.url.clone();
            let host = host.as_str();

            let (result, stats) = retry_async(
                &self.config.retry,
                |attempt| {
                    let request = request.clone();
                    async move { self.attempt(host, request, attempt).await }
                },
                |e: &ResolveError| e.is_retryable(),
            )
            .await;

            match result {
                Ok(body) => {
                    if stats.attempts > 1 {
                        debug!("{} succeeded after {} attempts", url, stats.attempts);
                    }
                    Ok(body)
                }
                Err(e) if e.is_retryable() => Err(exhausted(&url, stats)),
                Err(e) => Err(e),
            }
        }
        .instrument(span)
        .await
    }

    // Internal methods

    fn validate_url(&self, url: &str) -> Result<String> {
        let parsed = Url::parse(url)?;
        if self.config.require_https && parsed.scheme() != "https" {
            return Err(ResolveError::config(format!(
                "refusing non-https URL '{}'",
                url
            )));
        }
        parsed
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .ok_or_else(|| ResolveError::config(format!("URL '{}' has no host", url)))
    }

    fn prepare(&self, mut request: HttpRequest) -> HttpRequest {
        if self.config.accept_compressed && request.header("Accept-Encoding").is_none() {
            request = request.with_header("Accept-Encoding", "gzip");
        }
        request
    }

    fn is_rate_limited_host(&self, host: &str) -> bool {
        self.config
            .rate_limited_hosts
            .iter()
            .any(|h| h.eq_ignore_ascii_case(host))
    }

    async fn attempt(&self, host: &str, request: HttpRequest, attempt: u32) -> Result<Bytes> {
        let url = request.url.clone();
        debug!("{} {} (attempt {})", request.method, url, attempt);

        let response = self.transport.execute(request).await.map_err(|e| {
            ResolveError::TransientNetwork {
                url: url.clone(),
                message: e.to_string(),
                history: vec![e.to_string()],
            }
        })?;

        self.update_rate_limits(&response);
        let status = response.status;

        // Checked before the retry path: repeating the request only burns quota
        if status == StatusCode::FORBIDDEN && self.is_rate_limited_host(host) {
            warn!("API rate limit exceeded for {}", host);
            return Err(ResolveError::RateLimitExceeded {
                host: host.to_string(),
                url,
            });
        }

        if status.is_success() {
            return decode_body(&url, &response);
        }

        let body = String::from_utf8_lossy(&response.body);
        if is_retryable_status(status) {
            return Err(ResolveError::TransientNetwork {
                url: url.clone(),
                message: format!("HTTP {}", status),
                history: vec![format!("HTTP {}", status)],
            });
        }

        Err(ResolveError::permanent(
            Some(&url),
            format!("HTTP {}", status),
            &body,
        ))
    }

    fn update_rate_limits(&self, response: &HttpResponse) {
        let parse = |name: &str| response.header(name).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(remaining) = parse("X-RateLimit-Remaining") {
            self.rate_limit_remaining
                .store(remaining.min(i64::MAX as u64) as i64, Ordering::SeqCst);
        }
        if let Some(limit) = parse("X-RateLimit-Limit") {
            self.rate_limit_limit.store(limit, Ordering::SeqCst);
        }
        if let Some(reset) = parse("X-RateLimit-Reset") {
            self.rate_limit_reset.store(reset, Ordering::SeqCst);
        }
    }
}

/// Check if an HTTP status code indicates a retryable error.
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 429 | 500 | 502 | 503 | 504)
}

fn exhausted(url: &str, stats: RetryStats) -> ResolveError {
    let mut failures = stats.failures;
    let last = failures.pop().unwrap_or_default();
    let message = if failures.is_empty() {
        format!("failed after {} attempt(s): {}", stats.attempts, last)
    } else {
        format!(
            "failed after {} attempts. Previous failures: {}. Final failure: {}",
            stats.attempts,
            failures.join("; "),
            last
        )
    };
    failures.push(last);

    ResolveError::TransientNetwork {
        url: url.to_string(),
        message,
        history: failures,
    }
}

fn decode_body(url: &str, response: &HttpResponse) -> Result<Bytes> {
    let gzipped = response
        .header("Content-Encoding")
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("gzip"));
    if !gzipped {
        return Ok(response.body.clone());
    }

    let mut decoded = Vec::new();
    GzDecoder::new(response.body.as_ref())
        .read_to_end(&mut decoded)
        .map_err(|e| {
            ResolveError::permanent(
                Some(url),
                format!("failed to decompress gzip body: {}", e),
                &String::from_utf8_lossy(&response.body),
            )
        })?;
    Ok(Bytes::from(decoded))
}

fn decode_text(url: &str, body: &Bytes) -> Result<String> {
    String::from_utf8(body.to_vec()).map_err(|e| {
        ResolveError::permanent(
            Some(url),
            format!("response is not valid UTF-8: {}", e),
            &String::from_utf8_lossy(body),
        )
    })
}

fn decode_json<T: DeserializeOwned>(url: &str, body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| ResolveError::PermanentBackend {
        url: Some(url.to_string()),
        message: format!("failed to parse JSON: {}", e),
        excerpt: excerpt(&String::from_utf8_lossy(body)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::guard::ForegroundThreadGuard;
    use crate::network::transport::{FixtureTransport, TransportError};
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const API_URL: &str = "https://api.github.com/repos/a/b/releases/latest";
    const PLAIN_URL: &str = "https://example.org/data.json";

    fn fetcher(transport: Arc<FixtureTransport>) -> Fetcher {
        Fetcher::with_transport(FetcherConfig::default(), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt() {
        let transport = Arc::new(
            FixtureTransport::new()
                .fail(PLAIN_URL, TransportError::Timeout("first".into()))
                .fail(PLAIN_URL, TransportError::Connect("second".into()))
                .body(PLAIN_URL, "third"),
        );
        let fetcher = fetcher(transport.clone());

        let text = fetcher.get_text(PLAIN_URL).await.unwrap();
        assert_eq!(text, "third");
        assert_eq!(transport.call_count(PLAIN_URL), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_source_reports_every_failure() {
        let transport = Arc::new(
            FixtureTransport::new()
                .fail(PLAIN_URL, TransportError::Timeout("alpha".into()))
                .fail(PLAIN_URL, TransportError::Io("connection reset beta".into()))
                .fail(PLAIN_URL, TransportError::InvalidRequest("port out of range gamma".into())),
        );
        let fetcher = fetcher(transport.clone());

        let err = fetcher.get_text(PLAIN_URL).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("alpha"), "{message}");
        assert!(message.contains("beta"), "{message}");
        assert!(message.contains("gamma"), "{message}");
        match err {
            ResolveError::TransientNetwork { history, .. } => assert_eq!(history.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.call_count(PLAIN_URL), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_retried() {
        let transport = Arc::new(FixtureTransport::new().status(API_URL, StatusCode::FORBIDDEN));
        let fetcher = fetcher(transport.clone());

        let err = fetcher.get_text(API_URL).await.unwrap_err();
        assert!(matches!(err, ResolveError::RateLimitExceeded { ref host, .. } if host == "api.github.com"));
        assert_eq!(transport.call_count(API_URL), 1);
    }

    #[tokio::test]
    async fn test_forbidden_from_other_host_is_permanent() {
        let transport = Arc::new(FixtureTransport::new().status(PLAIN_URL, StatusCode::FORBIDDEN));
        let fetcher = fetcher(transport.clone());

        let err = fetcher.get_text(PLAIN_URL).await.unwrap_err();
        assert!(matches!(err, ResolveError::PermanentBackend { .. }));
        assert_eq!(transport.call_count(PLAIN_URL), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_errors_are_retried() {
        let transport = Arc::new(
            FixtureTransport::new()
                .status(PLAIN_URL, StatusCode::BAD_GATEWAY)
                .body(PLAIN_URL, r#"{"ok": true}"#),
        );
        let fetcher = fetcher(transport.clone());

        let value: serde_json::Value = fetcher.get_json(PLAIN_URL).await.unwrap();
        assert_eq!(value["ok"], true);
        assert_eq!(transport.call_count(PLAIN_URL), 2);
    }

    #[tokio::test]
    async fn test_gzip_body_is_decoded() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"compressed listing").unwrap();
        let gz = encoder.finish().unwrap();

        let transport = Arc::new(FixtureTransport::new().respond(
            PLAIN_URL,
            HttpResponse::ok(gz).with_header("Content-Encoding", "gzip"),
        ));
        let fetcher = fetcher(transport.clone());

        assert_eq!(fetcher.get_text(PLAIN_URL).await.unwrap(), "compressed listing");
        let sent = &transport.calls()[0];
        assert_eq!(sent.header("accept-encoding"), Some("gzip"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_permanent_with_excerpt() {
        let transport = Arc::new(FixtureTransport::new().body(PLAIN_URL, "<html>oops</html>"));
        let fetcher = fetcher(transport.clone());

        let err = fetcher
            .get_json::<serde_json::Value>(PLAIN_URL)
            .await
            .unwrap_err();
        match err {
            ResolveError::PermanentBackend { excerpt, .. } => assert!(excerpt.contains("oops")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(transport.call_count(PLAIN_URL), 1);
    }

    #[tokio::test]
    async fn test_non_https_url_rejected_before_network() {
        let transport = Arc::new(FixtureTransport::new());
        let fetcher = fetcher(transport.clone());

        let err = fetcher.get_text("http://example.org/x").await.unwrap_err();
        assert!(matches!(err, ResolveError::Config { .. }));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_foreground_guard_fails_fast() {
        let transport = Arc::new(FixtureTransport::new().body(PLAIN_URL, "x"));
        let fetcher =
            fetcher(transport.clone()).with_guard(Arc::new(ForegroundThreadGuard::for_current_thread()));

        let err = fetcher.get_text(PLAIN_URL).await.unwrap_err();
        assert!(matches!(err, ResolveError::NetworkForbidden { .. }));
        assert_eq!(transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_post_json_sends_body() {
        let transport = Arc::new(FixtureTransport::new().body(PLAIN_URL, r#"{"taskId": "abc"}"#));
        let fetcher = fetcher(transport.clone());

        let value: serde_json::Value = fetcher
            .post_json(PLAIN_URL, &serde_json::json!({ "query": "x" }))
            .await
            .unwrap();
        assert_eq!(value["taskId"], "abc");

        let sent = &transport.calls()[0];
        assert_eq!(sent.method, reqwest::Method::POST);
        assert_eq!(sent.header("content-type"), Some("application/json"));
        assert_eq!(sent.body.as_deref(), Some(br#"{"query":"x"}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_rate_limit_headers_tracked() {
        let transport = Arc::new(FixtureTransport::new().respond(
            API_URL,
            HttpResponse::ok("{}")
                .with_header("X-RateLimit-Remaining", "42")
                .with_header("X-RateLimit-Limit", "60"),
        ));
        let fetcher = fetcher(transport);

        fetcher.get_text(API_URL).await.unwrap();
        let state = fetcher.rate_limit_state();
        assert_eq!(state.remaining, Some(42));
        assert_eq!(state.limit, Some(60));
        assert_eq!(state.reset, None);
    }

    #[test]
    fn test_retryable_status_codes() {
        assert!(is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }
}
