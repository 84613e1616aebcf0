//! Release sources: one adapter per distribution backend.
//!
//! Every adapter holds only immutable endpoint parameters, receives the shared
//! [`Fetcher`] and the caller's [`Selection`] explicitly, and reduces the
//! backend's payload to a [`CanonicalRelease`].

pub mod archive;
pub mod fdroid;
pub mod github;
pub mod gitlab;
pub mod repository;
pub mod search;
pub mod taskcluster;

pub use archive::ArchiveListingSource;
pub use fdroid::PackageRegistrySource;
pub use github::GitHubSource;
pub use gitlab::GitLabSource;
pub use repository::RepositoryIndexSource;
pub use search::ReleaseHost;
pub use taskcluster::{LogLabels, TaskIndexSource, TaskRef, TaskVariant};

use crate::models::CanonicalRelease;
use crate::network::Fetcher;
use crate::selector::Selection;
use crate::{ResolveError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A backend able to resolve the latest acceptable release.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Human-readable name used in error context and logs.
    fn describe(&self) -> String;

    async fn resolve(&self, fetcher: &Fetcher, selection: &Selection) -> Result<CanonicalRelease>;
}

/// Parse a timezone-qualified ISO-8601 timestamp.
pub(crate) fn parse_rfc3339(value: &str, url: Option<&str>) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ResolveError::permanent(url, format!("invalid timestamp: {}", e), value))
}

/// Join a base URL and a relative path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
