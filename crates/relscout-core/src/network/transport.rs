//! The seam between the fetcher and the wire.
//!
//! [`ReqwestTransport`] owns the process-wide connection pool.
//! [`FixtureTransport`] replays scripted responses so adapters can be checked
//! against recorded payloads without touching the network.

use crate::network::FetcherConfig;
use crate::{ResolveError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, Method, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use thiserror::Error;

/// A single outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body.into()),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// A response as seen by the fetcher; the body is still encoded.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Transport-level failures. Every variant is considered transient.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    /// Malformed port or argument detected while building the request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout(err.to_string())
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

/// Executes one request without any retry or status interpretation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError>;
}

/// Transport backed by a pooled `reqwest::Client`.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build the client once; it is shared by every adapter.
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| ResolveError::config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(key, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (key.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.bytes().await?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum FixtureReply {
    Response(HttpResponse),
    Error(TransportError),
}

/// In-memory transport replaying scripted replies per URL.
///
/// Replies for a URL are consumed in order; the last one keeps being served.
/// Unknown URLs answer HTTP 404.
#[derive(Default)]
pub struct FixtureTransport {
    routes: Mutex<HashMap<String, VecDeque<FixtureReply>>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl FixtureTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `url`.
    pub fn push(self, url: impl Into<String>, reply: FixtureReply) -> Self {
        self.enqueue(url, reply);
        self
    }

    pub fn respond(self, url: impl Into<String>, response: HttpResponse) -> Self {
        self.push(url, FixtureReply::Response(response))
    }

    /// Queue a 200 response with the given body.
    pub fn body(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        let body: String = body.into();
        self.respond(url, HttpResponse::ok(body))
    }

    pub fn status(self, url: impl Into<String>, status: StatusCode) -> Self {
        self.respond(url, HttpResponse::new(status, Bytes::new()))
    }

    pub fn fail(self, url: impl Into<String>, error: TransportError) -> Self {
        self.push(url, FixtureReply::Error(error))
    }

    /// Queue a reply through a shared reference.
    pub fn enqueue(&self, url: impl Into<String>, reply: FixtureReply) {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        routes.entry(url.into()).or_default().push_back(reply);
    }

    /// Every request seen so far, in order.
    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl Transport for FixtureTransport {
    async fn execute(&self, request: HttpRequest) -> std::result::Result<HttpResponse, TransportError> {
        let url = request.url.clone();
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let reply = {
            let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
            match routes.get_mut(&url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match reply {
            Some(FixtureReply::Response(response)) => Ok(response),
            Some(FixtureReply::Error(error)) => Err(error),
            None => Ok(HttpResponse::new(
                StatusCode::NOT_FOUND,
                format!("no fixture for {}", url),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixture_replays_in_order_and_repeats_last() {
        let transport = FixtureTransport::new()
            .fail("https://a.test/x", TransportError::Timeout("slow".into()))
            .body("https://a.test/x", "ok");

        let first = transport.execute(HttpRequest::get("https://a.test/x")).await;
        assert!(matches!(first, Err(TransportError::Timeout(_))));

        for _ in 0..2 {
            let next = transport
                .execute(HttpRequest::get("https://a.test/x"))
                .await
                .unwrap();
            assert_eq!(next.body, Bytes::from("ok"));
        }
        assert_eq!(transport.call_count("https://a.test/x"), 3);
    }

    #[tokio::test]
    async fn test_fixture_unknown_url_is_not_found() {
        let transport = FixtureTransport::new();
        let response = transport
            .execute(HttpRequest::get("https://a.test/missing"))
            .await
            .unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(transport.total_calls(), 1);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = HttpResponse::ok("x").with_header("Content-Encoding", "gzip");
        assert_eq!(response.header("content-encoding"), Some("gzip"));
        let request = HttpRequest::get("https://a.test").with_header("accept", "text/html");
        assert_eq!(request.header("Accept"), Some("text/html"));
    }
}
