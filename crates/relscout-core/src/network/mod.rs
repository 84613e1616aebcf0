//! Network utilities for release resolution.
//!
//! This module provides:
//! - The fetcher: one logical request with retry and rate limit detection
//! - Linear (or exponential) retry with a failure history
//! - A transport seam with a reqwest-backed and a fixture implementation
//! - A capability check refusing network I/O on a foreground thread

mod fetcher;
mod guard;
mod retry;
mod transport;

pub use fetcher::{is_retryable_status, Fetcher, FetcherConfig, RateLimitState};
pub use guard::{ForegroundThreadGuard, NetworkGuard, Unrestricted};
pub use retry::{retry_async, Backoff, RetryConfig, RetryStats};
pub use transport::{
    FixtureReply, FixtureTransport, HttpRequest, HttpResponse, ReqwestTransport, Transport,
    TransportError,
};
