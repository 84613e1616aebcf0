//! Relscout CLI - resolve the latest release of every configured app.
//!
//! Reads the apps file, resolves the selected apps concurrently through one
//! shared fetcher and prints one JSON object per app on stdout. Logs go to
//! stderr.

mod report;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future::join_all;
use relscout_core::config::default_apps_path;
use relscout_core::{load_apps_file, Fetcher, Resolver};
use report::{exit_code, AppReport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "relscout")]
#[command(about = "Find the latest release of configured apps")]
struct Args {
    /// Apps file (defaults to <config dir>/relscout/apps.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only resolve these apps (repeatable)
    #[arg(short, long = "app")]
    apps: Vec<String>,

    /// Deadline per app in seconds
    #[arg(long, default_value = "120")]
    timeout_secs: u64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON lines instead of the compact format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging; RUST_LOG wins over --debug
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    let path = match args.config {
        Some(path) => path,
        None => default_apps_path().context("no config directory on this platform, pass --config")?,
    };
    info!("Apps file: {}", path.display());

    let apps_file = load_apps_file(&path)?;

    let selected: Vec<_> = if args.apps.is_empty() {
        apps_file.apps.iter().collect()
    } else {
        let mut selected = Vec::new();
        for name in &args.apps {
            match apps_file.app(name) {
                Some(app) => selected.push(app),
                None => bail!("app '{}' is not defined in {}", name, path.display()),
            }
        }
        selected
    };

    let fetcher = Arc::new(Fetcher::new(apps_file.network.clone())?);
    let resolver = Resolver::new(fetcher.clone());
    let deadline = Duration::from_secs(args.timeout_secs);

    info!("Resolving {} apps", selected.len());
    let results = join_all(
        selected
            .iter()
            .map(|app| resolver.resolve_app_within(deadline, app)),
    )
    .await;

    let rate_limit = fetcher.rate_limit_state();
    if let Some(remaining) = rate_limit.remaining {
        info!("API quota remaining: {}", remaining);
    }
    let reports: Vec<AppReport> = selected
        .iter()
        .zip(results)
        .map(|(app, result)| AppReport::new(&app.name, result).with_rate_limit(&rate_limit))
        .collect();

    for report in &reports {
        // Machine-readable output on stdout
        println!("{}", serde_json::to_string(report)?);
    }

    let code = exit_code(&reports);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}
