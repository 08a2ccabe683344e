//! cadence-worker - Publish queued posts
//!
//! Runs a pool of workers that drain the publish queue and drive every
//! platform link of each post to a terminal state.

use clap::Parser;
use libcadence::logging::{LogFormat, LoggingConfig};
use libcadence::{
    CadenceError, Config, Database, PostPublishWorker, RateLimiter, SqliteQueue, TaskQueue,
    WorkerPool,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "cadence-worker")]
#[command(version)]
#[command(about = "Publish queued posts to their platforms")]
#[command(long_about = "\
cadence-worker - Publish queued posts to their platforms

DESCRIPTION:
    cadence-worker is a long-running process that drains the Cadence publish
    queue. Each task names one post; the worker publishes it to every attached
    platform in attachment order, skipping platforms that already succeeded
    or failed for good.

    Throttled and transient failures hand the task back to the queue with a
    delay (60s by default) and are retried up to 3 deliveries. Validation
    failures mark the platform as failed at once. A local per-platform rate
    limiter (10 publishes per minute by default) is consulted before every
    publish.

    Tasks are put on the queue by cadence-scan.

USAGE:
    # Run in foreground (logs to stderr)
    cadence-worker

    # Run with 8 concurrent workers
    cadence-worker --concurrency 8

    # Process everything that is ready, then exit
    cadence-worker --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes in-flight deliveries)

CONFIGURATION:
    Configuration file: ~/.config/cadence/config.toml
    Database location: ~/.local/share/cadence/cadence.db

    [worker]
    concurrency = 4
    max_attempts = 3
    retry_delay = 60
    publish_timeout = 30

    [rate_limit]
    backend = \"memory\"   # use \"database\" when running several workers
    max_hits = 10
    window = 60

    Override with environment variables:
        CADENCE_CONFIG      - Path to config file
        CADENCE_DB_PATH     - Path to database file
        CADENCE_LOG_FORMAT  - text, json or pretty
        CADENCE_LOG_LEVEL   - error, warn, info, debug, trace

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration error
")]
struct Cli {
    /// Number of concurrent workers (overrides config)
    #[arg(short, long, value_name = "N")]
    concurrency: Option<usize>,

    /// Process ready deliveries and exit
    #[arg(long)]
    once: bool,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Log format: text, json or pretty
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::resolve(cli.log_format, cli.verbose).init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CadenceError>()
        .map(CadenceError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;
    if let Some(concurrency) = cli.concurrency {
        config.worker.concurrency = concurrency;
        config.validate()?;
    }

    let db = Database::new(&config.database.path).await?;
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteQueue::new(&db, config.visibility_timeout()));
    let limiter = config.build_limiter(&db);
    let worker = Arc::new(
        PostPublishWorker::new(
            db.clone(),
            config.build_publisher(),
            limiter.clone(),
            config.retry_policy(),
        )
        .with_publish_timeout(config.publish_timeout()),
    );
    let pool = WorkerPool::new(worker, queue, config.pool_config());

    info!(
        concurrency = config.worker.concurrency,
        queue = %config.scanner.queue,
        "cadence-worker starting"
    );

    if cli.once {
        let report = pool.drain().await;
        info!(
            processed = report.processed(),
            published = report.published,
            halted = report.halted,
            released = report.released,
            dropped = report.dropped,
            "cadence-worker: drained ready deliveries, exiting"
        );
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let cleanup = tokio::spawn(clear_expired_hits(
        limiter,
        Duration::from_secs(config.rate_limit.window),
        shutdown.clone(),
    ));

    let report = pool.run(shutdown).await;
    cleanup.abort();

    info!(processed = report.processed(), "cadence-worker stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    use anyhow::Context;
    use futures::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Signal setup failed")?;

    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal, finishing in-flight deliveries...");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, finishing in-flight deliveries...");
            shutdown.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}

/// Periodically drop limiter hits that left the window
async fn clear_expired_hits(limiter: Arc<dyn RateLimiter>, every: Duration, shutdown: Arc<AtomicBool>) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;

    while !shutdown.load(Ordering::SeqCst) {
        ticker.tick().await;
        match limiter.clear_expired(chrono::Utc::now().timestamp()).await {
            Ok(()) => debug!("Cleared expired rate limit hits"),
            Err(e) => warn!(error = %e, "Failed to clear expired rate limit hits"),
        }
    }
}
