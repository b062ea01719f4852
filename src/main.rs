//! CLI entry point for papercache.

use anyhow::{Context, Result};
use clap::Parser;
use papercache_core::{Config, PaperCache};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod commands;

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?cli, "CLI arguments parsed");

    let config = match &cli.config {
        Some(path) => Config::load(path),
        None => Config::load_default(),
    }
    .context("failed to load configuration")?;
    let config = cli.apply_overrides(config);

    let process_token = CancellationToken::new();
    let signal_token = process_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            signal_token.cancel();
        }
    });

    let cache = PaperCache::open(config, &process_token)
        .await
        .context("failed to open paper cache")?;
    info!(root = %cache.root().display(), "papercache starting");

    let outcome = commands::dispatch(&cli.command, &cache, &process_token).await;
    cache.close().await;
    outcome
}
