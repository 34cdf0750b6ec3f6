use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rlimiter::api::ApiServer;
use rlimiter::config::{RlimiterConfig, StoreBackend};
use rlimiter::harness::{HarnessConfig, RetryHarness};
use rlimiter::ratelimit::RateLimiter;
use rlimiter::store::{CounterStore, MemoryCounterStore, RedisCounterStore};

/// Fixed-window rate limiting for the catalog API.
#[derive(Debug, Parser)]
#[command(name = "rlimiter", version, about)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the catalog API behind the rate limiter
    Serve {
        /// Configuration file (YAML, TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Drive an endpoint at a fixed rate, backing off on denials
    Hammer(HammerArgs),
}

#[derive(Debug, Args)]
struct HammerArgs {
    /// Endpoint to call
    #[arg(long, default_value = "http://localhost:8000/catalog/api/1.0/")]
    url: String,

    /// Requests to send per period
    #[arg(short = 'n', long, default_value_t = 60)]
    requests_per_period: u32,

    /// Pacing period in seconds
    #[arg(long, default_value_t = 60)]
    period_secs: u64,

    /// Pause after a denial, in seconds
    #[arg(long, default_value_t = 5)]
    backoff_secs: u64,

    /// Consecutive denials tolerated before giving up
    #[arg(long, default_value_t = 50)]
    max_consecutive_denials: u32,

    /// Wait for the server's retry hint instead of the fixed backoff
    #[arg(long)]
    honor_retry_after: bool,

    /// Per-request timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,
}

impl From<HammerArgs> for HarnessConfig {
    fn from(args: HammerArgs) -> Self {
        Self {
            url: args.url,
            requests_per_period: args.requests_per_period,
            period: Duration::from_secs(args.period_secs),
            backoff: Duration::from_secs(args.backoff_secs),
            max_consecutive_denials: args.max_consecutive_denials,
            honor_retry_after: args.honor_retry_after,
            request_timeout: Duration::from_millis(args.timeout_ms),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Command::Serve { config } => serve(config).await,
        Command::Hammer(args) => hammer(args.into()).await,
    }
}

/// Initialize tracing, honoring `RUST_LOG` and defaulting to `info`.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn serve(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    info!("Starting rlimiter");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RlimiterConfig::load(config_path.as_deref())?;
    let policy = config.rate_limiting.api.to_policy()?;
    info!(
        http_addr = %config.server.http_addr,
        backend = ?config.store.backend,
        limit = policy.limit(),
        period_secs = policy.period().as_secs(),
        "Configuration loaded"
    );

    let store: Arc<dyn CounterStore> = match config.store.backend {
        StoreBackend::Redis => Arc::new(RedisCounterStore::new(&config.store.redis_url)?),
        StoreBackend::Memory => {
            warn!("Using the in-memory counter store; limits are not shared across processes");
            let store = Arc::new(MemoryCounterStore::new());
            spawn_sweeper(store.clone(), config.store.sweep_interval());
            store
        }
    };

    let limiter = RateLimiter::new(store)
        .with_store_timeout(config.store.timeout())
        .with_key_prefix(config.store.key_prefix.clone());
    info!(timeout_ms = config.store.timeout_ms, "Rate limiter initialized");

    let server = ApiServer::new(
        config.server.http_addr,
        Arc::new(limiter),
        policy,
        config.server.client_key.clone(),
    );

    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("rlimiter stopped");
    Ok(())
}

async fn hammer(config: HarnessConfig) -> anyhow::Result<()> {
    let harness = RetryHarness::new(config)?;
    let report = harness.run().await?;

    info!(
        accepted = report.accepted,
        rejected = report.rejected,
        denied = report.denied,
        failed = report.failed,
        "Harness finished"
    );
    Ok(())
}

/// Periodically evict lapsed windows from the in-memory store.
fn spawn_sweeper(store: Arc<MemoryCounterStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                tracing::debug!(purged = purged, remaining = store.len(), "Swept expired windows");
            }
        }
    });
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
