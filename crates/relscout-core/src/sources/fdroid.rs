//! Package-registry adapter (F-Droid API).
//!
//! One version of a package is often published as several builds, one per
//! architecture, which share a version name but differ in version code. The
//! registry therefore yields every build of the suggested version and lets the
//! caller pick the one for its architecture.
//!
//! The registry API carries no dates. The publish date is the creation time
//! of the last commit touching the package's metadata file in the GitLab
//! project that backs the registry.

use crate::config::SourceDefaults;
use crate::models::{CanonicalRelease, RegistryBuild, RegistryRelease};
use crate::network::Fetcher;
use crate::selector::{max_by_version_code, Selection};
use crate::sources::{parse_rfc3339, ReleaseSource};
use crate::{ResolveError, Result, ResultExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRegistrySource {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub package: String,
    /// Download from the Cloudflare mirror instead of the main host.
    #[serde(default)]
    pub use_mirror: bool,
    /// Position of the wanted build in the ascending list of builds. The
    /// highest version code is used when unset.
    #[serde(default)]
    pub build_index: Option<usize>,
    /// GitLab project id or path of the metadata repository. The publish
    /// date lookup is skipped when null.
    #[serde(default = "default_metadata_project")]
    pub metadata_project: Option<String>,
    #[serde(default = "default_metadata_api_base")]
    pub metadata_api_base: String,
}

fn default_base_url() -> String {
    SourceDefaults::FDROID_BASE.to_string()
}

fn default_metadata_project() -> Option<String> {
    Some(SourceDefaults::FDROID_METADATA_PROJECT.to_string())
}

fn default_metadata_api_base() -> String {
    SourceDefaults::GITLAB_API_BASE.to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageListing {
    package_name: String,
    suggested_version_code: u64,
    packages: Vec<PackageVersion>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PackageVersion {
    version_name: String,
    version_code: u64,
}

#[derive(Debug, Deserialize)]
struct MetadataFile {
    last_commit_id: String,
}

#[derive(Debug, Deserialize)]
struct MetadataCommit {
    created_at: String,
}

impl PackageRegistrySource {
    pub fn new(package: impl Into<String>) -> Self {
        Self {
            base_url: default_base_url(),
            package: package.into(),
            use_mirror: false,
            build_index: None,
            metadata_project: default_metadata_project(),
            metadata_api_base: default_metadata_api_base(),
        }
    }

    pub fn with_metadata_project(mut self, project: Option<String>) -> Self {
        self.metadata_project = project;
        self
    }

    pub fn with_mirror(mut self, use_mirror: bool) -> Self {
        self.use_mirror = use_mirror;
        self
    }

    pub fn with_build_index(mut self, index: usize) -> Self {
        self.build_index = Some(index);
        self
    }

    fn download_host(&self) -> &str {
        if self.use_mirror {
            SourceDefaults::FDROID_MIRROR
        } else {
            self.base_url.trim_end_matches('/')
        }
    }

    /// Creation time of the last commit on the package's metadata file.
    pub async fn publish_date(&self, fetcher: &Fetcher) -> Result<Option<DateTime<Utc>>> {
        let Some(project) = &self.metadata_project else {
            return Ok(None);
        };
        let repository = format!(
            "{}/projects/{}/repository",
            self.metadata_api_base.trim_end_matches('/'),
            urlencoding::encode(project)
        );

        let file_path = format!("metadata/{}.yml", self.package);
        let file_url = format!("{}/files/{}?ref=master", repository, urlencoding::encode(&file_path));
        let file: MetadataFile = fetcher.get_json(&file_url).await?;

        let commit_url = format!("{}/commits/{}", repository, file.last_commit_id);
        let commit: MetadataCommit = fetcher.get_json(&commit_url).await?;
        debug!("{}: metadata commit {}", self.package, file.last_commit_id);

        parse_rfc3339(&commit.created_at, Some(&commit_url)).map(Some)
    }

    /// Every build of the suggested version, ascending by version code.
    pub async fn candidates(&self, fetcher: &Fetcher) -> Result<RegistryRelease> {
        let url = format!(
            "{}/api/v1/packages/{}",
            self.base_url.trim_end_matches('/'),
            self.package
        );
        let listing: PackageListing = fetcher.get_json(&url).await?;

        let version_name = listing
            .packages
            .iter()
            .find(|p| p.version_code == listing.suggested_version_code)
            .map(|p| p.version_name.clone())
            .ok_or_else(|| {
                ResolveError::permanent(
                    Some(&url),
                    format!(
                        "suggested version code {} is not listed",
                        listing.suggested_version_code
                    ),
                    "",
                )
            })?;

        let mut builds: Vec<RegistryBuild> = listing
            .packages
            .iter()
            .filter(|p| p.version_name == version_name)
            .map(|p| RegistryBuild {
                version_code: p.version_code,
                download_url: format!(
                    "{}/repo/{}_{}.apk",
                    self.download_host(),
                    listing.package_name,
                    p.version_code
                ),
            })
            .collect();
        builds.sort_by_key(|b| b.version_code);

        Ok(RegistryRelease {
            package_name: listing.package_name,
            version_name,
            builds,
        })
    }
}

#[async_trait]
impl ReleaseSource for PackageRegistrySource {
    fn describe(&self) -> String {
        format!("package registry {}", self.package)
    }

    async fn resolve(&self, fetcher: &Fetcher, _selection: &Selection) -> Result<CanonicalRelease> {
        let release = self.candidates(fetcher).await.with_context(|| self.describe())?;
        let inspected = release.builds.len();

        let build = match self.build_index {
            Some(index) => release.builds.get(index).cloned(),
            None => max_by_version_code(release.builds.iter().cloned(), |b| b.version_code),
        }
        .ok_or_else(|| ResolveError::NoSuitableRelease {
            source_name: self.describe(),
            inspected,
        })?;

        let published = self
            .publish_date(fetcher)
            .await
            .with_context(|| format!("{}: publish date", self.describe()))?;

        info!(
            "{}: version {} (code {})",
            self.describe(),
            release.version_name,
            build.version_code
        );
        CanonicalRelease::new(&build.download_url, release.version_name)?
            .with_publish_date(published)
            .validated()
    }
}
