//! Archive listing adapter: HTML directory listings instead of an API.
//!
//! The parsing operations are pure functions over page text. They depend on
//! the listing layout and fail loudly with the page excerpt instead of
//! guessing when the layout changes.

use crate::error::ResultExt;
use crate::models::CanonicalRelease;
use crate::network::Fetcher;
use crate::selector::Selection;
use crate::sources::{join_url, ReleaseSource};
use crate::{ResolveError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::LazyLock;
use tracing::info;
use url::Url;

static DIRECTORY_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a href="[A-Za-z0-9.\-_/]+">([A-Za-z0-9.\-_]+)/</a>"#)
        .expect("directory anchor regex must compile")
});

static LINK_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<a href="([A-Za-z0-9.\-_/]+)">"#).expect("link regex must compile")
});

static LAST_MODIFIED_CELL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<td>(\d{1,2})-([A-Za-z]+)-(\d{4}) (\d{1,2}):(\d{1,2})</td>")
        .expect("last-modified regex must compile")
});

const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Sub-directories of a listing page whose name fully matches `pattern`.
pub fn list_versions(page: &str, pattern: &str) -> Result<Vec<String>> {
    let pattern = Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| ResolveError::config(format!("invalid version pattern: {}", e)))?;

    let names: Vec<String> = DIRECTORY_ANCHOR
        .captures_iter(page)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .filter(|name| pattern.is_match(name))
        .map(str::to_string)
        .collect();

    if names.is_empty() {
        return Err(ResolveError::permanent(
            None,
            format!("no directory matching '{}' in listing", pattern.as_str()),
            page,
        ));
    }
    Ok(names)
}

/// Split a segment into runs of digits and runs of everything else.
fn runs(segment: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut digits = None;
    for (i, c) in segment.char_indices() {
        let is_digit = c.is_ascii_digit();
        if digits.is_some_and(|d| d != is_digit) {
            out.push(&segment[start..i]);
            start = i;
        }
        digits = Some(is_digit);
    }
    if start < segment.len() {
        out.push(&segment[start..]);
    }
    out
}

fn compare_runs(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        _ => a.cmp(b),
    }
}

fn compare_segments(a: &str, b: &str) -> Ordering {
    let (left, right) = (runs(a), runs(b));
    left.iter()
        .zip(right.iter())
        .map(|(x, y)| compare_runs(x, y))
        .find(|o| *o != Ordering::Equal)
        .unwrap_or_else(|| left.len().cmp(&right.len()))
}

/// Dotted version comparison: segment by segment, digit runs numerically.
/// With an equal shared prefix the longer version is higher.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (Some(x), Some(y)) => match compare_segments(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (None, None) => return Ordering::Equal,
        }
    }
}

/// The semantically highest version of a list.
pub fn highest_version<S: AsRef<str>>(names: &[S]) -> Option<&str> {
    names
        .iter()
        .map(|name| name.as_ref())
        .max_by(|a, b| compare_versions(a, b))
}

/// Parse the first `dd-MonthName-yyyy HH:mm` table cell as a UTC instant.
pub fn parse_last_modified(page: &str) -> Result<DateTime<Utc>> {
    let invalid = |message: &str| ResolveError::permanent(None, message.to_string(), page);

    let caps = LAST_MODIFIED_CELL
        .captures(page)
        .ok_or_else(|| invalid("no last-modified cell found"))?;
    let number = |i: usize| caps[i].parse::<u32>().map_err(|_| invalid("malformed last-modified cell"));

    let day = number(1)?;
    let month = MONTHS
        .iter()
        .position(|m| *m == &caps[2])
        .map(|i| i as u32 + 1)
        .ok_or_else(|| invalid("unknown month name in last-modified cell"))?;
    let year = caps[3]
        .parse::<i32>()
        .map_err(|_| invalid("malformed year in last-modified cell"))?;

    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(number(4).ok()?, number(5).ok()?, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| invalid("last-modified cell is not a valid date"))
}

/// Target of the last anchor on the page (listings are ascending).
pub fn last_link(page: &str) -> Result<String> {
    LINK_TARGET
        .captures_iter(page)
        .filter_map(|c| c.get(1))
        .last()
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| ResolveError::permanent(None, "no link found in listing", page))
}

/// Newest build published in a versioned archive directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveListingSource {
    /// Listing whose sub-directories are versions, e.g.
    /// `https://archive.mozilla.org/pub/fenix/releases/`.
    pub listing_url: String,
    /// Regular expression a version directory name must fully match.
    pub version_pattern: String,
    /// File name inside the version directory; `{version}` is substituted.
    /// The last link of the version page is used when unset.
    #[serde(default)]
    pub file_name_template: Option<String>,
}

impl ArchiveListingSource {
    pub fn new(listing_url: impl Into<String>, version_pattern: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            version_pattern: version_pattern.into(),
            file_name_template: None,
        }
    }

    pub fn with_file_name_template(mut self, template: impl Into<String>) -> Self {
        self.file_name_template = Some(template.into());
        self
    }

    fn version_url(&self, version: &str) -> String {
        format!("{}/", join_url(&self.listing_url, version))
    }

    async fn resolve_inner(&self, fetcher: &Fetcher) -> Result<CanonicalRelease> {
        let listing = fetcher.get_text(&self.listing_url).await?;
        let versions = list_versions(&listing, &self.version_pattern)
            .with_context(|| format!("listing {}", self.listing_url))?;
        let version = highest_version(versions.as_slice())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::permanent(Some(&self.listing_url), "empty version list", &listing))?;

        let version_url = self.version_url(&version);
        let page = fetcher.get_text(&version_url).await?;
        let published = parse_last_modified(&page).with_context(|| format!("listing {}", version_url))?;

        let target = match &self.file_name_template {
            Some(template) => template.replace("{version}", &version),
            None => last_link(&page).with_context(|| format!("listing {}", version_url))?,
        };
        let download_url = Url::parse(&version_url)?.join(&target)?;

        CanonicalRelease::new(download_url.as_str(), version)?
            .with_publish_date(Some(published))
            .validated()
    }
}

#[async_trait]
impl ReleaseSource for ArchiveListingSource {
    fn describe(&self) -> String {
        format!("archive {}", self.listing_url)
    }

    async fn resolve(&self, fetcher: &Fetcher, _selection: &Selection) -> Result<CanonicalRelease> {
        let release = self.resolve_inner(fetcher).await.with_context(|| self.describe())?;
        info!("{}: version {}", self.describe(), release.version);
        Ok(release)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{FetcherConfig, FixtureTransport};
    use std::sync::Arc;

    const LISTING: &str = r#"<html><body><table>
<tr><td><a href="/pub/fenix/releases/">..</a></td></tr>
<tr><td><a href="/pub/fenix/releases/99.0/">99.0/</a></td></tr>
<tr><td><a href="/pub/fenix/releases/102.0/">102.0/</a></td></tr>
<tr><td><a href="/pub/fenix/releases/102.0.1/">102.0.1/</a></td></tr>
<tr><td><a href="/pub/fenix/releases/102.0b5/">102.0b5/</a></td></tr>
</table></body></html>"#;

    const VERSION_PAGE: &str = r#"<html><body><table>
<tr><td>Dir</td><td><a href="/pub/fenix/releases/">..</a></td><td></td></tr>
<tr><td>File</td><td><a href="/pub/fenix/releases/102.0.1/fenix-102.0.1.multi.android-arm64-v8a.apk">fenix-102.0.1.apk</a></td><td>07-July-2022 14:05</td></tr>
</table></body></html>"#;

    #[test]
    fn test_highest_version() {
        assert_eq!(highest_version(&["102.0", "102.0.1", "99.0"]), Some("102.0.1"));
        assert_eq!(highest_version(&["9.10", "9.9"]), Some("9.10"));
        assert_eq!(highest_version::<&str>(&[]), None);
    }

    #[test]
    fn test_compare_mixed_segments() {
        assert_eq!(compare_versions("102.0b5", "102.0b10"), Ordering::Less);
        assert_eq!(compare_versions("102.1b1", "102.0"), Ordering::Greater);
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
    }

    #[test]
    fn test_list_versions_filters_by_pattern() {
        let versions = list_versions(LISTING, r"\d+\.\d+(\.\d+)?").unwrap();
        assert_eq!(versions, vec!["99.0", "102.0", "102.0.1"]);

        let err = list_versions(LISTING, r"nightly-.*").unwrap_err();
        match err {
            ResolveError::PermanentBackend { excerpt, .. } => assert!(excerpt.contains("<html>")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_parse_last_modified() {
        let date = parse_last_modified("<td>7-July-2022 14:05</td>").unwrap();
        assert_eq!(date.to_rfc3339(), "2022-07-07T14:05:00+00:00");
        assert!(parse_last_modified("<td>07-Juli-2022 14:05</td>").is_err());
        assert!(parse_last_modified("<td>31-February-2022 14:05</td>").is_err());
        assert!(parse_last_modified("<p>nothing</p>").is_err());
    }

    #[test]
    fn test_last_link() {
        assert_eq!(
            last_link(VERSION_PAGE).unwrap(),
            "/pub/fenix/releases/102.0.1/fenix-102.0.1.multi.android-arm64-v8a.apk"
        );
        assert!(last_link("<html></html>").is_err());
    }

    #[tokio::test]
    async fn test_resolve_archive() {
        let base = "https://archive.mozilla.org/pub/fenix/releases/";
        let transport = Arc::new(
            FixtureTransport::new()
                .body(base, LISTING)
                .body(format!("{}102.0.1/", base), VERSION_PAGE),
        );
        let fetcher = Fetcher::with_transport(FetcherConfig::default(), transport);

        let release = ArchiveListingSource::new(base, r"\d+\.\d+(\.\d+)?")
            .resolve(&fetcher, &Selection::any())
            .await
            .unwrap();
        assert_eq!(release.version, "102.0.1");
        assert_eq!(
            release.download_url.as_str(),
            "https://archive.mozilla.org/pub/fenix/releases/102.0.1/fenix-102.0.1.multi.android-arm64-v8a.apk"
        );
        assert_eq!(release.publish_date.unwrap().to_rfc3339(), "2022-07-07T14:05:00+00:00");

        let templated = ArchiveListingSource::new(base, r"\d+\.\d+(\.\d+)?")
            .with_file_name_template("fenix-{version}.multi.android-x86_64.apk")
            .resolve(&fetcher, &Selection::any())
            .await
            .unwrap();
        assert_eq!(
            templated.download_url.as_str(),
            "https://archive.mozilla.org/pub/fenix/releases/102.0.1/fenix-102.0.1.multi.android-x86_64.apk"
        );
    }
}
