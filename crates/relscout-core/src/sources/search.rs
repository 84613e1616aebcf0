//! Two-phase search over a paginated release API.
//!
//! The "latest" endpoint frequently returns a prerelease or a release whose
//! assets are not uploaded yet, so it is only the first guess. When it fails
//! the selection, the all-releases listing is scanned page by page, newest
//! first, within a fixed page budget.

use crate::error::ResultExt;
use crate::models::{CanonicalRelease, RawAsset, RawRelease};
use crate::network::Fetcher;
use crate::selector::{first_asset, Selection};
use crate::sources::parse_rfc3339;
use crate::{ErrorKind, ResolveError, Result};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

/// A paginated release API (GitHub, GitLab).
pub trait ReleaseHost: Send + Sync {
    /// Release shape as the API returns it.
    type Release: DeserializeOwned + Send;

    fn describe(&self) -> String;

    fn latest_url(&self) -> String;

    /// URL of a 1-based page of the all-releases listing.
    fn page_url(&self, page: u32) -> String;

    fn per_page(&self) -> u32;

    fn max_pages(&self) -> u32;

    /// Skip the latest endpoint and go straight to the listing.
    fn skip_latest_endpoint(&self) -> bool {
        false
    }

    /// Fall through to the listing when the latest endpoint answers with an
    /// unusable response instead of failing the search.
    fn tolerate_latest_failure(&self) -> bool {
        false
    }

    fn headers(&self) -> &[(&'static str, &'static str)] {
        &[]
    }

    fn into_raw(&self, release: Self::Release) -> RawRelease;
}

/// Tracks what the scan has seen so failures can be classified.
#[derive(Default)]
struct ScanState {
    inspected: usize,
    /// Newest release that passed the release predicate but had no asset.
    matched_without_asset: Option<String>,
}

impl ScanState {
    fn check(&mut self, release: RawRelease, selection: &Selection) -> Option<(RawRelease, RawAsset)> {
        self.inspected += 1;
        if !selection.accepts_release(&release) {
            return None;
        }
        match first_asset(&release, selection).cloned() {
            Some(asset) => Some((release, asset)),
            None => {
                debug!("Release {} matched but has no matching asset", release.tag);
                self.matched_without_asset.get_or_insert(release.tag);
                None
            }
        }
    }
}

/// Find the first release (and its first asset) accepted by the selection.
pub async fn find_release<H: ReleaseHost>(
    host: &H,
    fetcher: &Fetcher,
    selection: &Selection,
) -> Result<(RawRelease, RawAsset)> {
    let mut state = ScanState::default();

    if !host.skip_latest_endpoint() {
        let url = host.latest_url();
        let latest = fetcher
            .get_json_with_headers::<H::Release>(&url, host.headers())
            .await;

        match latest {
            Ok(latest) => {
                if let Some(found) = state.check(host.into_raw(latest), selection) {
                    info!("{}: using latest release {}", host.describe(), found.0.tag);
                    return Ok(found);
                }
            }
            Err(e) if host.tolerate_latest_failure() && e.kind() == ErrorKind::Permanent => {
                warn!("{}: latest endpoint unusable, scanning listing: {}", host.describe(), e);
            }
            Err(e) => return Err(e.context(format!("{}: latest release", host.describe()))),
        }
    }

    let per_page = host.per_page();
    for page in 1..=host.max_pages() {
        let url = host.page_url(page);
        let releases: Vec<H::Release> = fetcher
            .get_json_with_headers(&url, host.headers())
            .await
            .with_context(|| format!("{}: releases page {}", host.describe(), page))?;

        let count = releases.len();
        for release in releases {
            if let Some(found) = state.check(host.into_raw(release), selection) {
                info!(
                    "{}: using release {} from page {}",
                    host.describe(),
                    found.0.tag,
                    page
                );
                return Ok(found);
            }
        }

        // A short page is the last one
        if count < per_page as usize {
            debug!("{}: listing ended on page {}", host.describe(), page);
            break;
        }
    }

    match state.matched_without_asset {
        Some(release) => Err(ResolveError::NoSuitableAsset { release }),
        None => Err(ResolveError::NoSuitableRelease {
            source_name: host.describe(),
            inspected: state.inspected,
        }),
    }
}

/// Reduce a selected release and asset to a validated canonical record.
pub fn canonicalize(release: &RawRelease, asset: &RawAsset) -> Result<CanonicalRelease> {
    let published = if release.published_at.trim().is_empty() {
        None
    } else {
        Some(parse_rfc3339(&release.published_at, Some(&asset.download_url))?)
    };

    CanonicalRelease::new(&asset.download_url, release.tag.clone())?
        .with_publish_date(published)
        .with_size(asset.size_bytes)
        .validated()
}
