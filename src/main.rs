//! # issue-lens
//!
//! HTTP service that categorizes and summarizes GitHub issues with an AI
//! provider, caching each analysis under a fingerprint of the issue's content.
//!
//! ```bash
//! GEMINI_API_KEY=... GITHUB_TOKEN=... issue-lens --config ./issue-lens.toml
//! ```
//!
//! Logging follows `RUST_LOG` (default `issue_lens=info`).

mod analysis;
mod cache;
mod config;
mod error;
mod fingerprint;
mod github;
mod model;
mod orchestrator;
mod retry;
mod server;
mod singleflight;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use crate::analysis::{GeminiClient, PromptAnalyzer};
use crate::config::{Config, load_config};
use crate::error::Result;
use crate::github::GitHubClient;
use crate::orchestrator::Orchestrator;

/// Cached AI analysis of GitHub issues.
#[derive(Parser, Debug)]
#[command(name = "issue-lens", version, about)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Override `[server].bind`.
    #[arg(long)]
    bind: Option<String>,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("issue_lens=info"));
    fmt().with_env_filter(filter).with_target(true).init();
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    let github = GitHubClient::from_env(&config.github)?;
    let provider = GeminiClient::from_env(&config.analysis)?;
    let analyzer = PromptAnalyzer::new(provider, config.analysis.retry.clone());

    let store = cache::open_store(&config.cache)?;
    info!(backend = store.backend(), ttl_secs = config.cache.ttl_secs, "cache ready");
    let sweeper = config
        .cache
        .sweep_interval_secs
        .map(|secs| cache::spawn_sweeper(Arc::clone(&store), Duration::from_secs(secs)));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(github),
        Arc::new(analyzer),
        store,
        config.cache.ttl(),
    ));

    let served = server::run_server(&config.server, Arc::clone(&orchestrator), shutdown_signal()).await;

    orchestrator.shutdown().await;
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    served
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(kind = err.kind(), "{}", err);
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}
