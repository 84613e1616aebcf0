//! GitHub releases adapter.

use crate::config::SourceDefaults;
use crate::models::{CanonicalRelease, RawAsset, RawRelease};
use crate::network::Fetcher;
use crate::selector::Selection;
use crate::sources::search::{canonicalize, find_release, ReleaseHost};
use crate::sources::ReleaseSource;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Releases of one GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitHubSource {
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Some repositories publish their newest builds as prereleases only, so
    /// the latest endpoint is a wasted request for them.
    #[serde(default)]
    pub skip_latest_endpoint: bool,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_per_page() -> u32 {
    SourceDefaults::GITHUB_RELEASES_PER_PAGE
}

fn default_max_pages() -> u32 {
    SourceDefaults::RELEASES_MAX_PAGES
}

fn default_api_base() -> String {
    SourceDefaults::GITHUB_API_BASE.to_string()
}

impl GitHubSource {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            skip_latest_endpoint: false,
            api_base: default_api_base(),
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, SourceDefaults::GITHUB_MAX_PER_PAGE);
        self
    }

    pub fn with_skip_latest_endpoint(mut self, skip: bool) -> Self {
        self.skip_latest_endpoint = skip;
        self
    }

    fn releases_url(&self) -> String {
        format!(
            "{}/repos/{}/{}/releases",
            self.api_base.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }
}

/// Release as returned by the GitHub API.
#[derive(Debug, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
    /// Null for drafts.
    #[serde(default)]
    pub published_at: Option<String>,
}

/// Release asset as returned by the GitHub API.
#[derive(Debug, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    pub size: u64,
}

impl ReleaseHost for GitHubSource {
    type Release = GitHubRelease;

    fn describe(&self) -> String {
        format!("GitHub {}/{}", self.owner, self.repo)
    }

    fn latest_url(&self) -> String {
        format!("{}/latest", self.releases_url())
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}?per_page={}&page={}",
            self.releases_url(),
            self.per_page(),
            page
        )
    }

    /// GitHub serves at most 100 releases per page, whatever is asked for.
    fn per_page(&self) -> u32 {
        self.per_page.clamp(1, SourceDefaults::GITHUB_MAX_PER_PAGE)
    }

    fn max_pages(&self) -> u32 {
        self.max_pages
    }

    fn skip_latest_endpoint(&self) -> bool {
        self.skip_latest_endpoint
    }

    fn headers(&self) -> &[(&'static str, &'static str)] {
        &[("Accept", "application/vnd.github.v3+json")]
    }

    fn into_raw(&self, release: GitHubRelease) -> RawRelease {
        RawRelease {
            title: release.name.unwrap_or_else(|| release.tag_name.clone()),
            tag: release.tag_name,
            is_prerelease: release.prerelease,
            assets: release
                .assets
                .into_iter()
                .map(|a| RawAsset {
                    name: a.name,
                    download_url: a.browser_download_url,
                    size_bytes: Some(a.size),
                })
                .collect(),
            published_at: release.published_at.unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ReleaseSource for GitHubSource {
    fn describe(&self) -> String {
        ReleaseHost::describe(self)
    }

    async fn resolve(&self, fetcher: &Fetcher, selection: &Selection) -> Result<CanonicalRelease> {
        let (release, asset) = find_release(self, fetcher, selection).await?;
        canonicalize(&release, &asset)
    }
}
