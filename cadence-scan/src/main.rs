//! cadence-scan - Enqueue due posts
//!
//! Runs one scan cycle: every Scheduled post whose time has come gets one
//! publish task on the queue. Meant to be run from cron or a systemd timer.

use clap::Parser;
use libcadence::logging::{LogFormat, LoggingConfig};
use libcadence::{
    CadenceError, Config, Database, DuePostScanner, ScanReport, SqliteQueue, TaskQueue,
};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cadence-scan")]
#[command(version)]
#[command(about = "Enqueue publish tasks for due scheduled posts")]
#[command(long_about = "\
cadence-scan - Enqueue publish tasks for due scheduled posts

DESCRIPTION:
    cadence-scan runs a single scan cycle and exits. It selects every post
    that is scheduled for now or earlier, in chunks (100 by default), and
    puts one publish task per post on the queue drained by cadence-worker.

    Post status is never changed here. A post whose task is still queued is
    not queued twice, and a post whose enqueue fails stays scheduled and is
    picked up by the next cycle.

USAGE:
    # Run every minute from cron
    * * * * * cadence-scan

    # Machine-readable cycle report
    cadence-scan --format json

CONFIGURATION:
    Configuration file: ~/.config/cadence/config.toml
    Database location: ~/.local/share/cadence/cadence.db

    [scanner]
    chunk_size = 100
    queue = \"posts\"

    Override with environment variables:
        CADENCE_CONFIG      - Path to config file
        CADENCE_DB_PATH     - Path to database file

EXIT CODES:
    0 - Cycle completed (individual enqueue failures are reported, not fatal)
    1 - The store could not be read
    2 - Configuration error
    3 - Invalid input
")]
struct Cli {
    /// Posts read per chunk (overrides config)
    #[arg(long, value_name = "N")]
    chunk_size: Option<usize>,

    /// Output format for the cycle report: text or json
    #[arg(short, long, default_value = "text")]
    format: String,

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
    if cli.format != "text" && cli.format != "json" {
        return Err(CadenceError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        ))
        .into());
    }

    let mut config = Config::load()?;
    if let Some(chunk_size) = cli.chunk_size {
        config.scanner.chunk_size = chunk_size;
        config.validate()?;
    }

    let db = Database::new(&config.database.path).await?;
    let queue: Arc<dyn TaskQueue> = Arc::new(SqliteQueue::new(&db, config.visibility_timeout()));
    let scanner = DuePostScanner::new(db, queue, config.scanner_config());

    let now = chrono::Utc::now().timestamp();
    info!(now, chunk_size = config.scanner.chunk_size, "Starting scan cycle");
    let report = scanner.run_cycle(now).await?;

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report_text(&report);
    }

    Ok(())
}

fn print_report_text(report: &ScanReport) {
    println!("Due posts:      {}", report.selected);
    println!("Enqueued:       {}", report.enqueued);
    println!("Already queued: {}", report.already_queued);
    println!("Failed:         {}", report.failed);
    println!("Chunks:         {}", report.chunks);
}
