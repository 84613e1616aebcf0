//! Relscout Core - Headless library resolving the latest release of an app.
//!
//! Every distribution backend (GitHub and GitLab releases, a CI task index, an
//! F-Droid style package registry, a generic repository index, an HTML archive
//! listing) is reduced to one [`CanonicalRelease`]. Failures are reported
//! through the closed [`ResolveError`] enum whose [`ErrorKind`] tells a caller
//! whether to retry later, give up, or treat the outcome as "no update".
//!
//! # Example
//!
//! ```rust,ignore
//! use relscout_core::{Fetcher, FetcherConfig, Resolver, Selection, SourceConfig};
//! use relscout_core::sources::GitHubSource;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> relscout_core::Result<()> {
//!     let fetcher = Arc::new(Fetcher::new(FetcherConfig::default())?);
//!     let resolver = Resolver::new(fetcher);
//!
//!     let source = SourceConfig::GitHub(GitHubSource::new("brave", "brave-browser"));
//!     let release = resolver.resolve(&source, &Selection::any()).await?;
//!     println!("{} -> {}", release.version, release.download_url);
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod models;
pub mod network;
pub mod resolver;
pub mod selector;
pub mod sources;

// Re-export commonly used types
pub use config::{load_apps_file, AppEntry, AppsFile};
pub use error::{ErrorKind, ResolveError, Result, ResultExt};
pub use models::{CanonicalRelease, RawAsset, RawRelease, RegistryBuild, RegistryRelease, Sha256Hash};
pub use network::{Fetcher, FetcherConfig, FixtureTransport, RetryConfig};
pub use resolver::{Resolver, SourceConfig};
pub use selector::{AssetPredicate, AssetRule, ReleasePredicate, ReleaseRule, Selection};
pub use sources::ReleaseSource;
