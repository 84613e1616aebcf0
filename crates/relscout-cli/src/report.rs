//! Per-app output records.

use relscout_core::network::RateLimitState;
use relscout_core::{CanonicalRelease, ErrorKind, ResolveError};
use serde::Serialize;

/// Outcome of one app, printed as a single JSON line.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AppReport {
    Resolved {
        app: String,
        release: CanonicalRelease,
    },
    Failed {
        app: String,
        error: String,
        kind: &'static str,
        /// Unix time at which the API quota resets, for rate-limited apps.
        #[serde(skip_serializing_if = "Option::is_none")]
        rate_limit_reset: Option<u64>,
    },
}

impl AppReport {
    pub fn new(app: &str, result: Result<CanonicalRelease, ResolveError>) -> Self {
        match result {
            Ok(release) => AppReport::Resolved {
                app: app.to_string(),
                release,
            },
            Err(e) => AppReport::Failed {
                app: app.to_string(),
                error: e.to_string(),
                kind: e.kind().as_str(),
                rate_limit_reset: None,
            },
        }
    }

    /// Attach the quota reset time to a rate-limited failure.
    pub fn with_rate_limit(mut self, state: &RateLimitState) -> Self {
        if let AppReport::Failed {
            kind,
            rate_limit_reset,
            ..
        } = &mut self
        {
            if *kind == ErrorKind::RateLimited.as_str() {
                *rate_limit_reset = state.reset;
            }
        }
        self
    }

    /// A failure other than "nothing new".
    pub fn is_failure(&self) -> bool {
        matches!(self, AppReport::Failed { kind, .. } if *kind != ErrorKind::NoUpdate.as_str())
    }
}

/// Process exit code for a batch of reports.
pub fn exit_code(reports: &[AppReport]) -> i32 {
    if reports.iter().any(AppReport::is_failure) {
        1
    } else {
        0
    }
}
