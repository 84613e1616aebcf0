//! Data models shared by every release source.
//!
//! Raw records mirror what a backend returned; [`CanonicalRelease`] is the one
//! normalized shape handed back to the caller.

use crate::{ResolveError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// A SHA-256 digest as 64 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sha256Hash(String);

impl Sha256Hash {
    pub const HEX_LEN: usize = 64;

    /// Validate and normalize a hex digest.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.len() != Self::HEX_LEN {
            return Err(ResolveError::permanent(
                None,
                format!(
                    "sha256 must be {} hex characters, got {}",
                    Self::HEX_LEN,
                    value.len()
                ),
                value,
            ));
        }
        hex::decode(value).map_err(|e| {
            ResolveError::permanent(None, format!("sha256 is not valid hex: {}", e), value)
        })?;
        Ok(Self(value.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Sha256Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Sha256Hash {
    type Error = ResolveError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Sha256Hash> for String {
    fn from(hash: Sha256Hash) -> Self {
        hash.0
    }
}

/// The normalized description of one resolved update artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalRelease {
    pub download_url: Url,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<Sha256Hash>,
}

impl CanonicalRelease {
    /// Build a record from a backend-supplied download URL.
    pub fn new(download_url: &str, version: impl Into<String>) -> Result<Self> {
        let download_url = Url::parse(download_url).map_err(|e| {
            ResolveError::permanent(
                None,
                format!("download URL is not an absolute URL: {}", e),
                download_url,
            )
        })?;
        Ok(Self {
            download_url,
            version: version.into(),
            publish_date: None,
            size_bytes: None,
            sha256: None,
        })
    }

    pub fn with_publish_date(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.publish_date = date;
        self
    }

    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.size_bytes = size;
        self
    }

    pub fn with_sha256(mut self, hash: Option<Sha256Hash>) -> Self {
        self.sha256 = hash;
        self
    }

    /// Check the record invariants: https download URL with a host.
    pub fn validate(&self) -> Result<()> {
        if self.download_url.scheme() != "https" || self.download_url.host_str().is_none() {
            return Err(ResolveError::permanent(
                None,
                "download URL must be an absolute https URL",
                self.download_url.as_str(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(ResolveError::permanent(
                Some(self.download_url.as_str()),
                "release has an empty version",
                "",
            ));
        }
        Ok(())
    }

    /// Finish a record, enforcing [`CanonicalRelease::validate`].
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

/// A release as listed by a paginated release API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRelease {
    pub tag: String,
    pub title: String,
    pub is_prerelease: bool,
    pub assets: Vec<RawAsset>,
    pub published_at: String,
}

/// One downloadable file attached to a [`RawRelease`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAsset {
    pub name: String,
    pub download_url: String,
    /// Unknown for hosts that do not report link sizes.
    pub size_bytes: Option<u64>,
}

/// Every build of the suggested version of a registry package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRelease {
    pub package_name: String,
    pub version_name: String,
    /// Ascending by version code.
    pub builds: Vec<RegistryBuild>,
}

/// One per-architecture build of a registry package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryBuild {
    pub version_code: u64,
    pub download_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "9F86D081884C7D659A2FEAA0C55AD015A3BF4F1B2B0B822CD15D6C15B0F00A08";

    #[test]
    fn test_sha256_is_normalized() {
        let hash = Sha256Hash::parse(HASH).unwrap();
        assert_eq!(hash.as_str(), HASH.to_lowercase());
        assert_eq!(hash.as_str().len(), 64);
    }

    #[test]
    fn test_sha256_rejects_bad_input() {
        assert!(Sha256Hash::parse("abc").is_err());
        let not_hex = "z".repeat(64);
        assert!(Sha256Hash::parse(&not_hex).is_err());
    }

    #[test]
    fn test_canonical_release_serializes_camel_case() {
        let release = CanonicalRelease::new("https://x/a.apk", "v1.55.92")
            .unwrap()
            .with_size(Some(104792336))
            .with_sha256(Some(Sha256Hash::parse(HASH).unwrap()));

        let json = serde_json::to_value(&release).unwrap();
        assert_eq!(json["downloadUrl"], "https://x/a.apk");
        assert_eq!(json["sizeBytes"], 104792336);
        assert_eq!(json["sha256"], HASH.to_lowercase());
        assert!(json.get("publishDate").is_none());

        let back: CanonicalRelease = serde_json::from_value(json).unwrap();
        assert_eq!(back, release);
    }

    #[test]
    fn test_validate_rejects_plain_http() {
        let release = CanonicalRelease::new("http://example.org/a.apk", "1.0").unwrap();
        assert!(release.validate().is_err());
        assert!(CanonicalRelease::new("https://example.org/a.apk", "1.0")
            .unwrap()
            .validate()
            .is_ok());
    }

    #[test]
    fn test_relative_download_url_is_rejected() {
        let err = CanonicalRelease::new("/releases/a.apk", "1.0").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Permanent);
    }
}
