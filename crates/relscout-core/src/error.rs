//! Error types for relscout.
//!
//! Every backend reports failures through the single [`ResolveError`] enum so
//! a caller can decide between retrying later, abandoning the check, or
//! treating the outcome as "no update available".

use std::time::Duration;
use thiserror::Error;

/// Main error type for release resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    // Network errors
    #[error("Network error for {url}: {message}")]
    TransientNetwork {
        url: String,
        message: String,
        /// Message of every failed attempt, oldest first.
        history: Vec<String>,
    },

    #[error("API rate limit exceeded for {host} (request: {url})")]
    RateLimitExceeded { host: String, url: String },

    #[error("Network access forbidden: {reason}")]
    NetworkForbidden { reason: String },

    #[error("Resolution did not finish within {0:?}")]
    DeadlineExceeded(Duration),

    // Payload errors
    #[error("Unexpected backend response{}: {message}\n--- payload excerpt ---\n{excerpt}", .url.as_deref().map(|u| format!(" from {u}")).unwrap_or_default())]
    PermanentBackend {
        url: Option<String>,
        message: String,
        excerpt: String,
    },

    // Selection outcomes
    #[error("No suitable release found in {source_name} after inspecting {inspected} releases")]
    NoSuitableRelease { source_name: String, inspected: usize },

    #[error("Release {release} matched but none of its assets did")]
    NoSuitableAsset { release: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ResolveError>,
    },
}

/// Result type alias for relscout operations.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// What a caller should do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Try again later; the backend or network was flaky.
    Transient,
    /// Back off for an extended period; retrying burns quota.
    RateLimited,
    /// The backend answered with something we cannot use.
    Permanent,
    /// Every candidate was inspected and none matched: nothing new.
    NoUpdate,
    /// The request could not be built from the supplied configuration.
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Permanent => "permanent",
            ErrorKind::NoUpdate => "no_update",
            ErrorKind::Config => "config",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<serde_json::Error> for ResolveError {
    fn from(err: serde_json::Error) -> Self {
        ResolveError::PermanentBackend {
            url: None,
            message: format!("JSON error: {}", err),
            excerpt: String::new(),
        }
    }
}

impl From<url::ParseError> for ResolveError {
    fn from(err: url::ParseError) -> Self {
        ResolveError::Config {
            message: format!("invalid URL: {}", err),
        }
    }
}

impl ResolveError {
    /// Create a permanent backend error carrying an excerpt of the payload.
    pub fn permanent(url: Option<&str>, message: impl Into<String>, payload: &str) -> Self {
        ResolveError::PermanentBackend {
            url: url.map(str::to_string),
            message: message.into(),
            excerpt: excerpt(payload),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ResolveError::Config {
            message: message.into(),
        }
    }

    /// Wrap this error with adapter or app specific context.
    pub fn context(self, context: impl Into<String>) -> Self {
        ResolveError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through context wrappers.
    pub fn root(&self) -> &ResolveError {
        match self {
            ResolveError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Classify the failure for the caller.
    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            ResolveError::TransientNetwork { .. } | ResolveError::DeadlineExceeded(_) => {
                ErrorKind::Transient
            }

            ResolveError::RateLimitExceeded { .. } => ErrorKind::RateLimited,

            ResolveError::NoSuitableRelease { .. } | ResolveError::NoSuitableAsset { .. } => {
                ErrorKind::NoUpdate
            }

            ResolveError::Config { .. } | ResolveError::NetworkForbidden { .. } => {
                ErrorKind::Config
            }

            _ => ErrorKind::Permanent,
        }
    }

    /// Check if this error should trigger a retry inside the fetcher.
    ///
    /// Rate limits are deliberately excluded: repeating the request wastes quota.
    pub fn is_retryable(&self) -> bool {
        matches!(self.root(), ResolveError::TransientNetwork { .. })
    }
}

/// Trim a payload to a diagnostic excerpt.
pub(crate) fn excerpt(payload: &str) -> String {
    let max = crate::config::NetworkConfig::EXCERPT_CHARS;
    let mut out: String = payload.chars().take(max).collect();
    if payload.chars().count() > max {
        out.push_str("...");
    }
    out
}

/// Extension for attaching context to results.
pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(context))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}
