use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally::cache::TtlCache;
use tally::clock::{Clock, SystemClock};
use tally::config::TallyConfig;
use tally::ratelimit::{LimiterOptions, WindowLimiter};
use tally::sweep::{spawn_sweeper, SweepSet};

/// In-process rate limiting and TTL caching.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// How often to log limiter and cache statistics, in seconds
    #[arg(long, default_value_t = 60)]
    stats_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .init();
    }

    info!("Starting Tally");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TallyConfig::load(args.config.as_deref())?;
    info!(
        window_ms = config.rate_limiting.window_ms,
        max_hits = config.rate_limiting.max_hits,
        default_ttl_ms = config.cache.default_ttl_ms,
        "Configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let limiter = Arc::new(WindowLimiter::with_clock(
        LimiterOptions::from_config(&config.rate_limiting),
        clock.clone(),
    )?);
    info!("Rate limiter initialized");

    let cache: Arc<TtlCache<serde_json::Value>> =
        Arc::new(TtlCache::from_config(&config.cache, clock)?);
    info!("Cache initialized");

    let mut sweepers = SweepSet::new();
    sweepers.push(spawn_sweeper(
        "rate-limit",
        Duration::from_secs(config.rate_limiting.sweep_interval_secs),
        limiter.clone(),
    )?);
    sweepers.push(spawn_sweeper(
        "cache",
        Duration::from_secs(config.cache.cleanup_interval_secs),
        cache.clone(),
    )?);

    let mut stats_ticker = tokio::time::interval(Duration::from_secs(args.stats_interval_secs.max(1)));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = stats_ticker.tick() => {
                let limiter_stats = limiter.stats();
                let cache_stats = cache.stats();
                info!(
                    active_keys = limiter_stats.active_keys,
                    admitted = limiter_stats.admitted,
                    denied = limiter_stats.denied,
                    failed_open = limiter_stats.failed_open,
                    cache_size = cache_stats.size,
                    cache_hit_rate = cache_stats.hit_rate,
                    "Statistics"
                );
            }
            _ = &mut shutdown => break,
        }
    }

    sweepers.stop_all().await;

    info!("Tally stopped");
    Ok(())
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
