//! Build-task-index adapter (Taskcluster style CI).
//!
//! A build is identified either by a symbolic index path or by an opaque task
//! id. Its artifacts come with a chain-of-trust record, available as a JSON
//! manifest (artifact hashes plus task metadata) or as a free-text log of
//! `'key': 'value'` pairs, depending on the task type.

use crate::config::SourceDefaults;
use crate::error::ResultExt;
use crate::models::{CanonicalRelease, Sha256Hash};
use crate::network::Fetcher;
use crate::selector::Selection;
use crate::sources::{join_url, parse_rfc3339, ReleaseSource};
use crate::{ResolveError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

/// How a build is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskRef {
    /// Symbolic path such as `mobile.v3.firefox-android.apks.fenix-nightly.latest`.
    IndexPath(String),
    TaskId(String),
}

/// Which chain-of-trust artifact describes the build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskVariant {
    #[default]
    Manifest,
    Log,
}

/// Label names searched in the chain-of-trust log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogLabels {
    pub version: Vec<String>,
    pub date: Vec<String>,
}

impl Default for LogLabels {
    fn default() -> Self {
        let owned = |labels: &[&str]| -> Vec<String> { labels.iter().map(|l| l.to_string()).collect() };
        Self {
            version: owned(SourceDefaults::LOG_VERSION_LABELS),
            date: owned(SourceDefaults::LOG_DATE_LABELS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIndexSource {
    #[serde(default = "default_root_url")]
    pub root_url: String,
    pub task: TaskRef,
    /// Artifact path of the package, e.g. `public/build/target.arm64-v8a.apk`.
    pub artifact: String,
    #[serde(default)]
    pub variant: TaskVariant,
    /// Look up the task id of an index path first and address the build
    /// through the queue, so every request sees the same task.
    #[serde(default)]
    pub resolve_task_id: bool,
    #[serde(default)]
    pub log_labels: LogLabels,
}

fn default_root_url() -> String {
    SourceDefaults::TASKCLUSTER_ROOT.to_string()
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(rename = "taskId", default)]
    task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChainOfTrust {
    artifacts: HashMap<String, ArtifactDigest>,
    task: TaskInfo,
}

#[derive(Debug, Deserialize)]
struct ArtifactDigest {
    sha256: String,
}

#[derive(Debug, Deserialize)]
struct TaskInfo {
    created: String,
}

/// Version and date strings found in a chain-of-trust log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFields {
    pub version: String,
    pub date: String,
}

impl TaskIndexSource {
    pub fn new(task: TaskRef, artifact: impl Into<String>) -> Self {
        Self {
            root_url: default_root_url(),
            task,
            artifact: artifact.into(),
            variant: TaskVariant::Manifest,
            resolve_task_id: false,
            log_labels: LogLabels::default(),
        }
    }

    pub fn with_variant(mut self, variant: TaskVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_resolve_task_id(mut self, resolve: bool) -> Self {
        self.resolve_task_id = resolve;
        self
    }

    fn root(&self) -> &str {
        self.root_url.trim_end_matches('/')
    }

    /// Look up the opaque task id behind an index path.
    pub async fn resolve_task_id_for(&self, fetcher: &Fetcher, index_path: &str) -> Result<String> {
        let url = format!("{}/api/index/v1/task/{}", self.root(), index_path);
        let entry: IndexEntry = fetcher.get_json(&url).await?;
        match entry.task_id {
            Some(id) if !id.trim().is_empty() => {
                debug!("Index path {} resolved to task {}", index_path, id);
                Ok(id)
            }
            _ => Err(ResolveError::permanent(
                Some(&url),
                format!("index entry for '{}' has no taskId", index_path),
                "",
            )),
        }
    }

    /// Address the build, resolving the task id first when configured.
    async fn task(&self, fetcher: &Fetcher) -> Result<TaskRef> {
        match &self.task {
            TaskRef::IndexPath(path) if self.resolve_task_id => {
                let id = self
                    .resolve_task_id_for(fetcher, path)
                    .await
                    .with_context(|| format!("resolving index path {}", path))?;
                Ok(TaskRef::TaskId(id))
            }
            other => Ok(other.clone()),
        }
    }

    fn artifacts_base(&self, task: &TaskRef) -> String {
        match task {
            TaskRef::IndexPath(path) => {
                format!("{}/api/index/v1/task/{}/artifacts", self.root(), path)
            }
            TaskRef::TaskId(id) => format!("{}/api/queue/v1/task/{}/artifacts", self.root(), id),
        }
    }

    fn download_url(&self, task: &TaskRef) -> String {
        let base = self.artifacts_base(task);
        match task {
            TaskRef::IndexPath(_) => format!("{}/{}", base, urlencoding::encode(&self.artifact)),
            TaskRef::TaskId(_) => join_url(&base, &self.artifact),
        }
    }

    async fn resolve_manifest(&self, fetcher: &Fetcher, task: &TaskRef) -> Result<CanonicalRelease> {
        let url = join_url(&self.artifacts_base(task), SourceDefaults::CHAIN_OF_TRUST_JSON);
        let manifest: ChainOfTrust = fetcher.get_json(&url).await?;

        let digest = manifest.artifacts.get(&self.artifact).ok_or_else(|| {
            let mut available: Vec<&str> = manifest.artifacts.keys().map(String::as_str).collect();
            available.sort_unstable();
            ResolveError::permanent(
                Some(&url),
                format!(
                    "missing artifact '{}', available: [{}]",
                    self.artifact,
                    available.join(", ")
                ),
                "",
            )
        })?;

        let hash = Sha256Hash::parse(&digest.sha256)?;
        let created = parse_rfc3339(&manifest.task.created, Some(&url))?;

        CanonicalRelease::new(&self.download_url(task), version_from_instant(&created))?
            .with_publish_date(Some(created))
            .with_sha256(Some(hash))
            .validated()
    }

    async fn resolve_log(&self, fetcher: &Fetcher, task: &TaskRef) -> Result<CanonicalRelease> {
        let url = join_url(&self.artifacts_base(task), SourceDefaults::CHAIN_OF_TRUST_LOG);
        let log = fetcher.get_text(&url).await?;

        let fields = extract_log_fields(&log, &self.log_labels)
            .map_err(|e| e.context(format!("parsing {}", url)))?;
        let date = parse_log_date(&fields.date)?;

        CanonicalRelease::new(&self.download_url(task), fields.version)?
            .with_publish_date(Some(date))
            .validated()
    }
}

#[async_trait]
impl ReleaseSource for TaskIndexSource {
    fn describe(&self) -> String {
        match &self.task {
            TaskRef::IndexPath(path) => format!("task index {}", path),
            TaskRef::TaskId(id) => format!("task {}", id),
        }
    }

    // The selection does not apply: a task publishes exactly one build.
    async fn resolve(&self, fetcher: &Fetcher, _selection: &Selection) -> Result<CanonicalRelease> {
        let task = self.task(fetcher).await?;
        let release = match self.variant {
            TaskVariant::Manifest => self.resolve_manifest(fetcher, &task).await,
            TaskVariant::Log => self.resolve_log(fetcher, &task).await,
        }
        .with_context(|| self.describe())?;

        info!("{}: version {}", self.describe(), release.version);
        Ok(release)
    }
}

/// Version shown for builds that only carry a creation time.
pub fn version_from_instant(instant: &DateTime<Utc>) -> String {
    instant.format("%Y-%m-%d %H:%M").to_string()
}

fn label_regex(labels: &[String]) -> Result<Regex> {
    if labels.is_empty() {
        return Err(ResolveError::config("log label list is empty"));
    }
    let alternatives: Vec<String> = labels.iter().map(|l| regex::escape(l)).collect();
    let pattern = format!("'(?:{})': '([^']+)'", alternatives.join("|"));
    Regex::new(&pattern).map_err(|e| ResolveError::config(format!("invalid log labels: {}", e)))
}

/// Pull the version and date out of a chain-of-trust log.
///
/// The earliest occurrence of any label wins. A leading `v` is stripped from
/// the version.
pub fn extract_log_fields(log: &str, labels: &LogLabels) -> Result<LogFields> {
    let find = |labels: &[String], what: &str| -> Result<String> {
        label_regex(labels)?
            .captures(log)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .ok_or_else(|| {
                ResolveError::permanent(
                    None,
                    format!("no {} found under labels [{}]", what, labels.join(", ")),
                    log,
                )
            })
    };

    let version = find(&labels.version, "version")?;
    let version = version.strip_prefix('v').unwrap_or(&version).to_string();
    let date = find(&labels.date, "date")?;
    Ok(LogFields { version, date })
}

/// Parse a log date: RFC 3339, or a naive timestamp taken as UTC.
pub fn parse_log_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| ResolveError::permanent(None, "unrecognized date in log", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{FetcherConfig, FixtureTransport};
    use serde_json::json;
    use std::sync::Arc;

    const ROOT: &str = "https://firefox-ci-tc.services.mozilla.com";
    const INDEX: &str = "mobile.v3.firefox-android.apks.fenix-nightly.latest";
    const ARTIFACT: &str = "public/build/target.arm64-v8a.apk";
    const HASH: &str = "c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00c0ffee00";

    fn fetcher(transport: Arc<FixtureTransport>) -> Fetcher {
        Fetcher::with_transport(FetcherConfig::default(), transport)
    }

    fn manifest() -> String {
        json!({
            "artifacts": {
                ARTIFACT: { "sha256": HASH },
                "public/build/target.x86_64.apk": { "sha256": HASH }
            },
            "task": { "created": "2024-06-01T03:04:05.678Z" }
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_manifest_via_index_path() {
        let url = format!("{}/api/index/v1/task/{}/artifacts/public/chain-of-trust.json", ROOT, INDEX);
        let transport = Arc::new(FixtureTransport::new().body(url, manifest()));

        let release = TaskIndexSource::new(TaskRef::IndexPath(INDEX.into()), ARTIFACT)
            .resolve(&fetcher(transport), &Selection::any())
            .await
            .unwrap();

        assert_eq!(release.version, "2024-06-01 03:04");
        assert_eq!(release.sha256.unwrap().as_str(), HASH);
        assert_eq!(
            release.download_url.as_str(),
            format!(
                "{}/api/index/v1/task/{}/artifacts/public%2Fbuild%2Ftarget.arm64-v8a.apk",
                ROOT, INDEX
            )
        );
    }

    #[tokio::test]
    async fn test_resolves_task_id_then_uses_queue() {
        let index_url = format!("{}/api/index/v1/task/{}", ROOT, INDEX);
        let manifest_url = format!("{}/api/queue/v1/task/Abc123/artifacts/public/chain-of-trust.json", ROOT);
        let transport = Arc::new(
            FixtureTransport::new()
                .body(index_url.clone(), r#"{"namespace": "x", "taskId": "Abc123"}"#)
                .body(manifest_url, manifest()),
        );

        let release = TaskIndexSource::new(TaskRef::IndexPath(INDEX.into()), ARTIFACT)
            .with_resolve_task_id(true)
            .resolve(&fetcher(transport.clone()), &Selection::any())
            .await
            .unwrap();

        assert_eq!(
            release.download_url.as_str(),
            format!("{}/api/queue/v1/task/Abc123/artifacts/{}", ROOT, ARTIFACT)
        );
        assert_eq!(transport.call_count(&index_url), 1);
    }

    #[tokio::test]
    async fn test_missing_artifact_lists_available_keys() {
        let url = format!("{}/api/queue/v1/task/T1/artifacts/public/chain-of-trust.json", ROOT);
        let transport = Arc::new(FixtureTransport::new().body(url.clone(), manifest()));

        let err = TaskIndexSource::new(TaskRef::TaskId("T1".into()), "public/build/target.armeabi-v7a.apk")
            .resolve(&fetcher(transport.clone()), &Selection::any())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains(ARTIFACT), "{message}");
        assert!(message.contains("public/build/target.x86_64.apk"), "{message}");
        assert_eq!(err.kind(), crate::ErrorKind::Permanent);
        assert_eq!(transport.call_count(&url), 1);
    }

    #[tokio::test]
    async fn test_index_entry_without_task_id_is_permanent() {
        let index_url = format!("{}/api/index/v1/task/{}", ROOT, INDEX);
        let source = TaskIndexSource::new(TaskRef::IndexPath(INDEX.into()), ARTIFACT);

        for body in [r#"{"namespace": "x"}"#, r#"{"namespace": "x", "taskId": "  "}"#] {
            let transport = Arc::new(FixtureTransport::new().body(index_url.clone(), body));
            let err = source
                .resolve_task_id_for(&fetcher(transport), INDEX)
                .await
                .unwrap_err();
            match err {
                ResolveError::PermanentBackend { message, .. } => {
                    assert!(message.contains("taskId"), "{message}")
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_malformed_artifact_hash_is_rejected() {
        let url = format!("{}/api/queue/v1/task/T1/artifacts/public/chain-of-trust.json", ROOT);
        let body = json!({
            "artifacts": { ARTIFACT: { "sha256": "not-a-digest" } },
            "task": { "created": "2024-06-01T03:04:05Z" }
        })
        .to_string();
        let transport = Arc::new(FixtureTransport::new().body(url, body));

        let err = TaskIndexSource::new(TaskRef::TaskId("T1".into()), ARTIFACT)
            .resolve(&fetcher(transport), &Selection::any())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Permanent);
        assert!(err.to_string().contains("not-a-digest"), "{err}");
    }

    #[tokio::test]
    async fn test_log_variant() {
        let url = format!("{}/api/index/v1/task/{}/artifacts/public/logs/chain_of_trust.log", ROOT, INDEX);
        let log = "2024-06-01 INFO - {'build_date': 'x', 'version': 'v126.0b3', 'now': '2024-06-01T10:20:30.123456'}\n\
                   later: 'version': '999'";
        let transport = Arc::new(FixtureTransport::new().body(url, log));

        let release = TaskIndexSource::new(TaskRef::IndexPath(INDEX.into()), ARTIFACT)
            .with_variant(TaskVariant::Log)
            .resolve(&fetcher(transport), &Selection::any())
            .await
            .unwrap();

        assert_eq!(release.version, "126.0b3");
        assert_eq!(
            release.publish_date.unwrap().to_rfc3339(),
            "2024-06-01T10:20:30.123456+00:00"
        );
        assert!(release.sha256.is_none());
    }

    #[test]
    fn test_log_without_version_is_permanent_with_excerpt() {
        let err = extract_log_fields("nothing useful here", &LogLabels::default()).unwrap_err();
        match err {
            ResolveError::PermanentBackend { excerpt, .. } => {
                assert!(excerpt.contains("nothing useful"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_custom_labels_and_tag_name() {
        let log = "'tag_name': 'v2.0', 'published_at': '2024-01-02T03:04:05Z'";
        let fields = extract_log_fields(log, &LogLabels::default()).unwrap();
        assert_eq!(fields.version, "2.0");
        assert_eq!(fields.date, "2024-01-02T03:04:05Z");

        let labels = LogLabels {
            version: vec!["app.version".into()],
            date: vec!["built".into()],
        };
        let fields =
            extract_log_fields("'appXversion': '1', 'app.version': '3', 'built': '2024-01-01 00:00:00'", &labels)
                .unwrap();
        assert_eq!(fields.version, "3");
    }

    #[test]
    fn test_parse_log_date_formats() {
        assert!(parse_log_date("2024-01-02T03:04:05Z").is_ok());
        assert!(parse_log_date("2024-01-02 03:04:05").is_ok());
        assert!(parse_log_date("02.01.2024").is_err());
    }
}
