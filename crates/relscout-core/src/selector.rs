//! Predicate-driven selection among candidate releases, assets and builds.
//!
//! Predicates are plain function values handed in by the caller. The rule
//! enums let a configuration file express the common ones declaratively.

use crate::models::{RawAsset, RawRelease};
use crate::{ResolveError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Decides whether a release is acceptable.
pub type ReleasePredicate = Arc<dyn Fn(&RawRelease) -> bool + Send + Sync>;

/// Decides whether an asset is the one to download.
pub type AssetPredicate = Arc<dyn Fn(&RawAsset) -> bool + Send + Sync>;

/// The pair of predicates passed to every resolution call.
#[derive(Clone)]
pub struct Selection {
    pub release: ReleasePredicate,
    pub asset: AssetPredicate,
}

impl Selection {
    pub fn new(
        release: impl Fn(&RawRelease) -> bool + Send + Sync + 'static,
        asset: impl Fn(&RawAsset) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            release: Arc::new(release),
            asset: Arc::new(asset),
        }
    }

    /// Accept every release and every asset.
    pub fn any() -> Self {
        Self::new(|_| true, |_| true)
    }

    /// Compile declarative rules; every rule of a list must hold.
    pub fn from_rules(release_rules: &[ReleaseRule], asset_rules: &[AssetRule]) -> Result<Self> {
        let release = release_rules
            .iter()
            .map(ReleaseRule::compile)
            .collect::<Result<Vec<_>>>()?;
        let asset = asset_rules
            .iter()
            .map(AssetRule::compile)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            release: Arc::new(move |r: &RawRelease| release.iter().all(|p| p(r))),
            asset: Arc::new(move |a: &RawAsset| asset.iter().all(|p| p(a))),
        })
    }

    pub fn accepts_release(&self, release: &RawRelease) -> bool {
        (self.release)(release)
    }

    pub fn accepts_asset(&self, asset: &RawAsset) -> bool {
        (self.asset)(asset)
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Debug for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selection").finish_non_exhaustive()
    }
}

/// Declarative release predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ReleaseRule {
    NotPrerelease,
    TitleStartsWith { value: String },
    TitleMatches { pattern: String },
    TagMatches { pattern: String },
}

impl ReleaseRule {
    pub fn compile(&self) -> Result<ReleasePredicate> {
        let predicate: ReleasePredicate = match self {
            ReleaseRule::NotPrerelease => Arc::new(|r: &RawRelease| !r.is_prerelease),
            ReleaseRule::TitleStartsWith { value } => {
                let value = value.clone();
                Arc::new(move |r: &RawRelease| r.title.starts_with(&value))
            }
            ReleaseRule::TitleMatches { pattern } => {
                let re = compile_regex(pattern)?;
                Arc::new(move |r: &RawRelease| re.is_match(&r.title))
            }
            ReleaseRule::TagMatches { pattern } => {
                let re = compile_regex(pattern)?;
                Arc::new(move |r: &RawRelease| re.is_match(&r.tag))
            }
        };
        Ok(predicate)
    }
}

/// Declarative asset predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum AssetRule {
    NameEquals { value: String },
    NameEndsWith { value: String },
    NameStartsAndEndsWith { prefix: String, suffix: String },
    NameMatches { pattern: String },
}

impl AssetRule {
    pub fn compile(&self) -> Result<AssetPredicate> {
        let predicate: AssetPredicate = match self {
            AssetRule::NameEquals { value } => {
                let value = value.clone();
                Arc::new(move |a: &RawAsset| a.name == value)
            }
            AssetRule::NameEndsWith { value } => {
                let value = value.clone();
                Arc::new(move |a: &RawAsset| a.name.ends_with(&value))
            }
            AssetRule::NameStartsAndEndsWith { prefix, suffix } => {
                let (prefix, suffix) = (prefix.clone(), suffix.clone());
                Arc::new(move |a: &RawAsset| a.name.starts_with(&prefix) && a.name.ends_with(&suffix))
            }
            AssetRule::NameMatches { pattern } => {
                let re = compile_regex(pattern)?;
                Arc::new(move |a: &RawAsset| re.is_match(&a.name))
            }
        };
        Ok(predicate)
    }
}

fn compile_regex(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| ResolveError::config(format!("invalid pattern '{}': {}", pattern, e)))
}

/// First release accepted by the predicate, in list order.
pub fn first_release<'a>(releases: &'a [RawRelease], selection: &Selection) -> Option<&'a RawRelease> {
    releases.iter().find(|r| selection.accepts_release(r))
}

/// First asset of a release accepted by the predicate, in list order.
pub fn first_asset<'a>(release: &'a RawRelease, selection: &Selection) -> Option<&'a RawAsset> {
    release.assets.iter().find(|a| selection.accepts_asset(a))
}

/// Entry with the highest version code. Ties keep the earliest entry.
pub fn max_by_version_code<T>(items: impl IntoIterator<Item = T>, code: impl Fn(&T) -> u64) -> Option<T> {
    items.into_iter().fold(None, |best, item| match best {
        Some(current) if code(&current) >= code(&item) => Some(current),
        _ => Some(item),
    })
}
