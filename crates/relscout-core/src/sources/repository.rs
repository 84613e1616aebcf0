//! Generic repository index adapter (`index-v1.json` style repositories).

use crate::config::SourceDefaults;
use crate::models::{CanonicalRelease, Sha256Hash};
use crate::network::Fetcher;
use crate::selector::{max_by_version_code, Selection};
use crate::sources::{join_url, ReleaseSource};
use crate::{ResolveError, Result, ResultExt};
use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryIndexSource {
    pub repo_url: String,
    pub package: String,
    /// Target architecture code, e.g. `arm64-v8a`.
    pub abi: String,
}

/// Packages stay untyped until looked up, so a malformed entry of another
/// package cannot fail the lookup.
#[derive(Debug, Deserialize)]
struct RepositoryIndex {
    packages: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry {
    /// Epoch milliseconds.
    added: i64,
    apk_name: String,
    /// Absent for architecture-independent builds.
    #[serde(default, alias = "nativeCode")]
    nativecode: Option<Vec<String>>,
    hash: String,
    size: u64,
    version_code: u64,
    version_name: String,
}

impl IndexEntry {
    fn supports(&self, abi: &str) -> bool {
        self.nativecode
            .as_ref()
            .map_or(true, |abis| abis.iter().any(|a| a == abi))
    }
}

impl RepositoryIndexSource {
    pub fn new(repo_url: impl Into<String>, package: impl Into<String>, abi: impl Into<String>) -> Self {
        Self {
            repo_url: repo_url.into(),
            package: package.into(),
            abi: abi.into(),
        }
    }

    fn repo(&self) -> &str {
        self.repo_url.trim_end_matches('/')
    }
}

#[async_trait]
impl ReleaseSource for RepositoryIndexSource {
    fn describe(&self) -> String {
        format!("repository {} ({})", self.repo(), self.package)
    }

    async fn resolve(&self, fetcher: &Fetcher, _selection: &Selection) -> Result<CanonicalRelease> {
        let url = join_url(self.repo(), SourceDefaults::REPOSITORY_INDEX_FILE);
        let mut index: RepositoryIndex = fetcher
            .get_json(&url)
            .await
            .with_context(|| self.describe())?;

        let raw = index.packages.remove(&self.package).ok_or_else(|| {
            ResolveError::permanent(
                Some(&url),
                format!("package '{}' is not in the index", self.package),
                "",
            )
        })?;
        let entries: Vec<IndexEntry> = serde_json::from_value(raw.clone()).map_err(|e| {
            ResolveError::permanent(
                Some(&url),
                format!("malformed entries for package '{}': {}", self.package, e),
                &raw.to_string(),
            )
        })?;

        let eligible = entries.iter().filter(|e| e.supports(&self.abi));
        let entry = max_by_version_code(eligible, |e| e.version_code).ok_or_else(|| {
            ResolveError::NoSuitableRelease {
                source_name: self.describe(),
                inspected: entries.len(),
            }
        })?;
        debug!(
            "{}: picked version code {} out of {} entries",
            self.describe(),
            entry.version_code,
            entries.len()
        );

        let added = DateTime::from_timestamp_millis(entry.added).ok_or_else(|| {
            ResolveError::permanent(Some(&url), "added timestamp out of range", &entry.added.to_string())
        })?;
        let hash = Sha256Hash::parse(&entry.hash).with_context(|| self.describe())?;

        info!("{}: version {}", self.describe(), entry.version_name);
        CanonicalRelease::new(&join_url(self.repo(), &entry.apk_name), entry.version_name.clone())?
            .with_publish_date(Some(added))
            .with_size(Some(entry.size))
            .with_sha256(Some(hash))
            .validated()
    }
}
