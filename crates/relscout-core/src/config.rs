//! Centralized configuration for relscout.
//!
//! Compile-time defaults live as associated constants on unit structs; the
//! runtime app list (what to resolve and how to select) is loaded from a JSON
//! file by [`load_apps_file`].

use crate::network::FetcherConfig;
use crate::resolver::SourceConfig;
use crate::selector::{AssetRule, ReleaseRule};
use crate::{ResolveError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "relscout";
    pub const CONFIG_DIR_NAME: &'static str = "relscout";
    pub const APPS_FILE_NAME: &'static str = "apps.json";
}

/// Network-related configuration.
pub struct NetworkConfig;

impl NetworkConfig {
    pub const USER_AGENT: &'static str = "relscout/0.3";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
    pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(60);
    /// Observational tag attached to every request span.
    pub const TRAFFIC_TAG: u32 = 10000;
    /// Hosts whose HTTP 403 means "quota exhausted".
    pub const RATE_LIMITED_HOSTS: &'static [&'static str] = &["api.github.com"];
    /// Maximum characters of a payload kept in error messages.
    pub const EXCERPT_CHARS: usize = 500;
}

/// Endpoint defaults for the individual release sources.
pub struct SourceDefaults;

impl SourceDefaults {
    pub const GITHUB_API_BASE: &'static str = "https://api.github.com";
    pub const GITHUB_RELEASES_PER_PAGE: u32 = 20;
    /// Largest page the GitHub API serves.
    pub const GITHUB_MAX_PER_PAGE: u32 = 100;
    pub const RELEASES_MAX_PAGES: u32 = 5;
    pub const GITLAB_API_BASE: &'static str = "https://gitlab.com/api/v4";
    pub const GITLAB_MAX_PER_PAGE: u32 = 100;
    pub const TASKCLUSTER_ROOT: &'static str = "https://firefox-ci-tc.services.mozilla.com";
    pub const CHAIN_OF_TRUST_JSON: &'static str = "public/chain-of-trust.json";
    pub const CHAIN_OF_TRUST_LOG: &'static str = "public/logs/chain_of_trust.log";
    pub const LOG_VERSION_LABELS: &'static [&'static str] = &["version", "tag_name"];
    pub const LOG_DATE_LABELS: &'static [&'static str] = &["published_at", "now"];
    pub const FDROID_BASE: &'static str = "https://f-droid.org";
    pub const FDROID_MIRROR: &'static str = "https://cloudflare.f-droid.org";
    /// GitLab project holding the F-Droid metadata files (`fdroiddata`).
    pub const FDROID_METADATA_PROJECT: &'static str = "36528";
    pub const REPOSITORY_INDEX_FILE: &'static str = "index-v1.json";
}

/// One application to resolve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppEntry {
    pub name: String,
    pub source: SourceConfig,
    #[serde(default)]
    pub release_rules: Vec<ReleaseRule>,
    #[serde(default)]
    pub asset_rules: Vec<AssetRule>,
}

/// Contents of the apps file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppsFile {
    #[serde(default)]
    pub network: FetcherConfig,
    #[serde(default)]
    pub apps: Vec<AppEntry>,
}

impl AppsFile {
    /// Find an app entry by name (case-insensitive).
    pub fn app(&self, name: &str) -> Option<&AppEntry> {
        self.apps.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// Default location of the apps file (`<config dir>/relscout/apps.json`).
pub fn default_apps_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| {
        dir.join(AppConfig::CONFIG_DIR_NAME)
            .join(AppConfig::APPS_FILE_NAME)
    })
}

/// Load and parse an apps file.
pub fn load_apps_file(path: &Path) -> Result<AppsFile> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ResolveError::config(format!("failed to read {}: {}", path.display(), e))
    })?;
    let file: AppsFile = serde_json::from_str(&contents).map_err(|e| {
        ResolveError::config(format!("failed to parse {}: {}", path.display(), e))
    })?;

    let mut seen = std::collections::HashSet::new();
    for app in &file.apps {
        if !seen.insert(app.name.to_lowercase()) {
            return Err(ResolveError::config(format!(
                "duplicate app name '{}' in {}",
                app.name,
                path.display()
            )));
        }
    }

    debug!("Loaded {} apps from {}", file.apps.len(), path.display());
    Ok(file)
}

/// Serde helper storing a `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
