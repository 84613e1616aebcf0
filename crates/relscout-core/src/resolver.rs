//! Orchestrator: picks the adapter for a configured source and runs it.

use crate::config::AppEntry;
use crate::error::ResultExt;
use crate::models::CanonicalRelease;
use crate::network::Fetcher;
use crate::selector::Selection;
use crate::sources::{
    ArchiveListingSource, GitHubSource, GitLabSource, PackageRegistrySource, ReleaseSource,
    RepositoryIndexSource, TaskIndexSource,
};
use crate::{ResolveError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where an application's releases are published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    #[serde(rename = "github")]
    GitHub(GitHubSource),
    #[serde(rename = "gitlab")]
    GitLab(GitLabSource),
    TaskIndex(TaskIndexSource),
    PackageRegistry(PackageRegistrySource),
    RepositoryIndex(RepositoryIndexSource),
    ArchiveListing(ArchiveListingSource),
}

impl SourceConfig {
    /// The adapter implementing this source.
    pub fn as_source(&self) -> &dyn ReleaseSource {
        match self {
            SourceConfig::GitHub(s) => s,
            SourceConfig::GitLab(s) => s,
            SourceConfig::TaskIndex(s) => s,
            SourceConfig::PackageRegistry(s) => s,
            SourceConfig::RepositoryIndex(s) => s,
            SourceConfig::ArchiveListing(s) => s,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceConfig::GitHub(_) => "github",
            SourceConfig::GitLab(_) => "gitlab",
            SourceConfig::TaskIndex(_) => "task_index",
            SourceConfig::PackageRegistry(_) => "package_registry",
            SourceConfig::RepositoryIndex(_) => "repository_index",
            SourceConfig::ArchiveListing(_) => "archive_listing",
        }
    }
}

/// Resolves sources through one shared [`Fetcher`].
#[derive(Clone)]
pub struct Resolver {
    fetcher: Arc<Fetcher>,
}

impl Resolver {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Resolve the latest acceptable release of a source.
    ///
    /// The result is checked against the canonical record invariants before
    /// it is returned.
    pub async fn resolve(&self, source: &SourceConfig, selection: &Selection) -> Result<CanonicalRelease> {
        let adapter = source.as_source();
        debug!("Resolving {} ({})", adapter.describe(), source.kind());

        let release = adapter.resolve(&self.fetcher, selection).await?;
        release
            .validate()
            .with_context(|| format!("{} returned an invalid record", adapter.describe()))?;

        info!("{} -> {} ({})", adapter.describe(), release.version, release.download_url);
        Ok(release)
    }

    /// Resolve a configured application, compiling its selection rules.
    pub async fn resolve_app(&self, app: &AppEntry) -> Result<CanonicalRelease> {
        let selection = Selection::from_rules(&app.release_rules, &app.asset_rules)
            .with_context(|| format!("app {}", app.name))?;
        self.resolve(&app.source, &selection)
            .await
            .with_context(|| format!("app {}", app.name))
    }

    /// [`Resolver::resolve`] bounded by a deadline.
    pub async fn resolve_within(
        &self,
        deadline: Duration,
        source: &SourceConfig,
        selection: &Selection,
    ) -> Result<CanonicalRelease> {
        tokio::time::timeout(deadline, self.resolve(source, selection))
            .await
            .map_err(|_| ResolveError::DeadlineExceeded(deadline))?
    }

    /// [`Resolver::resolve_app`] bounded by a deadline.
    pub async fn resolve_app_within(&self, deadline: Duration, app: &AppEntry) -> Result<CanonicalRelease> {
        tokio::time::timeout(deadline, self.resolve_app(app))
            .await
            .map_err(|_| ResolveError::DeadlineExceeded(deadline).context(format!("app {}", app.name)))?
    }
}
