//! GitLab releases adapter.
//!
//! Same two-phase search as GitHub. GitLab's permalink to the latest release
//! is unreliable, so an unusable answer there falls through to the listing.

use crate::config::SourceDefaults;
use crate::models::{CanonicalRelease, RawAsset, RawRelease};
use crate::network::Fetcher;
use crate::selector::Selection;
use crate::sources::search::{canonicalize, find_release, ReleaseHost};
use crate::sources::ReleaseSource;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Releases of one GitLab project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitLabSource {
    /// Numeric project id or `owner/name` path.
    pub project: String,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
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
    SourceDefaults::GITLAB_API_BASE.to_string()
}

impl GitLabSource {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            per_page: default_per_page(),
            max_pages: default_max_pages(),
            skip_latest_endpoint: false,
            api_base: default_api_base(),
        }
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page.clamp(1, SourceDefaults::GITLAB_MAX_PER_PAGE);
        self
    }

    fn releases_url(&self) -> String {
        format!(
            "{}/projects/{}/releases",
            self.api_base.trim_end_matches('/'),
            urlencoding::encode(&self.project)
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct GitLabRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub upcoming_release: bool,
    #[serde(default)]
    pub released_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub assets: GitLabAssets,
}

#[derive(Debug, Default, Deserialize)]
pub struct GitLabAssets {
    #[serde(default)]
    pub links: Vec<GitLabLink>,
}

#[derive(Debug, Deserialize)]
pub struct GitLabLink {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub direct_asset_url: Option<String>,
}

impl ReleaseHost for GitLabSource {
    type Release = GitLabRelease;

    fn describe(&self) -> String {
        format!("GitLab {}", self.project)
    }

    fn latest_url(&self) -> String {
        format!("{}/permalink/latest", self.releases_url())
    }

    fn page_url(&self, page: u32) -> String {
        format!(
            "{}?per_page={}&page={}",
            self.releases_url(),
            self.per_page(),
            page
        )
    }

    fn per_page(&self) -> u32 {
        self.per_page.clamp(1, SourceDefaults::GITLAB_MAX_PER_PAGE)
    }

    fn max_pages(&self) -> u32 {
        self.max_pages
    }

    fn skip_latest_endpoint(&self) -> bool {
        self.skip_latest_endpoint
    }

    fn tolerate_latest_failure(&self) -> bool {
        true
    }

    fn into_raw(&self, release: GitLabRelease) -> RawRelease {
        RawRelease {
            title: release.name.unwrap_or_else(|| release.tag_name.clone()),
            tag: release.tag_name,
            is_prerelease: release.upcoming_release,
            assets: release
                .assets
                .links
                .into_iter()
                .map(|link| RawAsset {
                    name: link.name,
                    download_url: link.direct_asset_url.unwrap_or(link.url),
                    size_bytes: None,
                })
                .collect(),
            published_at: release
                .released_at
                .or(release.created_at)
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl ReleaseSource for GitLabSource {
    fn describe(&self) -> String {
        ReleaseHost::describe(self)
    }

    async fn resolve(&self, fetcher: &Fetcher, selection: &Selection) -> Result<CanonicalRelease> {
        let (release, asset) = find_release(self, fetcher, selection).await?;
        canonicalize(&release, &asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{FetcherConfig, FixtureTransport};
    use serde_json::json;
    use std::sync::Arc;

    const LATEST: &str =
        "https://gitlab.com/api/v4/projects/grote%2FTransportr/releases/permalink/latest";
    const PAGE_1: &str =
        "https://gitlab.com/api/v4/projects/grote%2FTransportr/releases?per_page=20&page=1";

    fn release(tag: &str, links: serde_json::Value) -> serde_json::Value {
        json!({
            "tag_name": tag,
            "name": format!("Transportr {}", tag),
            "released_at": "2024-02-02T10:00:00.000Z",
            "assets": { "links": links }
        })
    }

    #[tokio::test]
    async fn test_missing_permalink_falls_through_to_listing() {
        let transport = Arc::new(FixtureTransport::new().body(
            PAGE_1,
            json!([release(
                "v4.2",
                json!([{ "name": "transportr.apk", "url": "https://gitlab.com/x/transportr.apk" }])
            )])
            .to_string(),
        ));
        let fetcher = Fetcher::with_transport(FetcherConfig::default(), transport.clone());

        let result = GitLabSource::new("grote/Transportr")
            .resolve(&fetcher, &Selection::new(|_| true, |a| a.name.ends_with(".apk")))
            .await
            .unwrap();

        assert_eq!(result.version, "v4.2");
        assert_eq!(result.size_bytes, None);
        assert_eq!(transport.call_count(LATEST), 1);
        assert_eq!(
            result.publish_date.unwrap().to_rfc3339(),
            "2024-02-02T10:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_direct_asset_url_preferred() {
        let transport = Arc::new(FixtureTransport::new().body(
            LATEST,
            release(
                "v4.3",
                json!([{
                    "name": "transportr.apk",
                    "url": "https://gitlab.com/redirect",
                    "direct_asset_url": "https://gitlab.com/direct/transportr.apk"
                }]),
            )
            .to_string(),
        ));
        let fetcher = Fetcher::with_transport(FetcherConfig::default(), transport);

        let result = GitLabSource::new("grote/Transportr")
            .resolve(&fetcher, &Selection::any())
            .await
            .unwrap();

        assert_eq!(
            result.download_url.as_str(),
            "https://gitlab.com/direct/transportr.apk"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_latest_failure_is_not_tolerated() {
        let transport = Arc::new(
            FixtureTransport::new()
                .status(LATEST, reqwest::StatusCode::SERVICE_UNAVAILABLE)
                .body(PAGE_1, "[]"),
        );
        let fetcher = Fetcher::with_transport(FetcherConfig::default(), transport.clone());

        let err = GitLabSource::new("grote/Transportr")
            .resolve(&fetcher, &Selection::any())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::Transient);
        assert_eq!(transport.call_count(LATEST), 3);
        assert_eq!(transport.call_count(PAGE_1), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_latest_is_not_tolerated() {
        let transport = Arc::new(
            FixtureTransport::new()
                .status(LATEST, reqwest::StatusCode::FORBIDDEN)
                .body(PAGE_1, "[]"),
        );
        let config = FetcherConfig {
            rate_limited_hosts: vec!["gitlab.com".into()],
            ..FetcherConfig::default()
        };
        let fetcher = Fetcher::with_transport(config, transport.clone());

        let err = GitLabSource::new("grote/Transportr")
            .resolve(&fetcher, &Selection::any())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::ErrorKind::RateLimited);
        assert_eq!(transport.call_count(PAGE_1), 0);
    }
}
