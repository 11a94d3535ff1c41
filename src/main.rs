//! Spine Tracker main entry point
//!
//! This is the command-line interface for the Spine Tracker catalog service.

use anyhow::{bail, Context};
use clap::Parser;
use spine_tracker::api::{self, AppState};
use spine_tracker::config::{load_config_with_hash, Config};
use spine_tracker::ingest::{Cadence, Pipeline, RateLimitedFetcher, Scheduler};
use spine_tracker::output::{export_films, load_statistics, print_statistics, ExportFormat};
use spine_tracker::storage::{open_repository, Repository};
use spine_tracker::{RunStatus, TriggerSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Spine Tracker: a catalog release tracker
///
/// Spine Tracker fetches the configured catalog pages on a schedule,
/// merges the film cards it finds into a local SQLite snapshot, and
/// serves that snapshot over a small HTTP API.
#[derive(Parser, Debug)]
#[command(name = "spine-tracker")]
#[command(version = "1.0.0")]
#[command(about = "A catalog release tracker", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show what would be fetched without fetching
    #[arg(long, conflicts_with_all = ["once", "stats", "export"])]
    dry_run: bool,

    /// Run one ingestion in the foreground and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "export"])]
    once: bool,

    /// Show statistics from the database and exit
    #[arg(long, conflicts_with_all = ["dry_run", "once", "export"])]
    stats: bool,

    /// Export the catalog snapshot and exit
    #[arg(long, value_enum, value_name = "FORMAT", conflicts_with_all = ["dry_run", "once", "stats"])]
    export: Option<ExportFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, config_hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", config_hash);

    if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        handle_stats(&config)
    } else if let Some(format) = cli.export {
        handle_export(&config, format)
    } else if cli.once {
        handle_once(config).await
    } else {
        handle_serve(config).await
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
///
/// `RUST_LOG`, when set, takes precedence over the flags.
fn setup_logging(verbose: u8, quiet: bool) {
    let fallback = if quiet {
        "error"
    } else {
        match verbose {
            0 => "spine_tracker=info,warn",
            1 => "spine_tracker=debug,info",
            2 => "spine_tracker=trace,debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the plan
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let cadence = Cadence::from_config(&config.schedule)?;

    println!("=== Spine Tracker Dry Run ===\n");

    println!("Fetcher Configuration:");
    println!("  Request spacing: {}ms", config.fetcher.request_spacing_ms);
    println!("  Max retries: {}", config.fetcher.max_retries);
    println!("  Retry backoff: {}ms", config.fetcher.retry_backoff_ms);
    println!("  Request timeout: {}s", config.fetcher.request_timeout_secs);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nSchedule:");
    println!("  Enabled: {}", config.schedule.enabled);
    println!("  Cadence: {}", cadence);
    println!("  Run on startup: {}", config.schedule.run_on_startup);

    println!("\nStorage:");
    println!("  Database: {}", config.storage.database_path);
    println!("  Exports: {}", config.storage.export_dir);

    println!("\nServer:");
    println!("  Bind address: {}", config.server.bind_address);

    println!("\nSources ({}):", config.sources.len());
    for source in &config.sources {
        println!("  - {} [{}] {}", source.name, source.release_status, source.url);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the --stats mode: shows statistics from the database
fn handle_stats(config: &Config) -> anyhow::Result<()> {
    println!("Database: {}\n", config.storage.database_path);

    let repository = open_repository(Path::new(&config.storage.database_path))
        .context("failed to open database")?;
    let stats = load_statistics(&repository)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the --export mode: writes one export file
fn handle_export(config: &Config, format: ExportFormat) -> anyhow::Result<()> {
    let repository = open_repository(Path::new(&config.storage.database_path))
        .context("failed to open database")?;
    let summary = export_films(&repository, Path::new(&config.storage.export_dir), format)
        .context("export failed")?;

    println!(
        "✓ Exported {} films to: {}",
        summary.total_films,
        summary.path.display()
    );
    Ok(())
}

/// Opens storage and wires the fetcher, pipeline and scheduler together
fn build_scheduler(config: &Config) -> anyhow::Result<(Scheduler, Arc<dyn Repository>)> {
    let cadence = Cadence::from_config(&config.schedule)?;
    let repository: Arc<dyn Repository> = Arc::new(
        open_repository(Path::new(&config.storage.database_path))
            .context("failed to open database")?,
    );
    let fetcher = RateLimitedFetcher::new(&config.fetcher, &config.user_agent)
        .context("failed to build HTTP client")?;
    let pipeline = Pipeline::new(config.sources.clone(), fetcher, Arc::clone(&repository));

    Ok((Scheduler::new(pipeline, cadence, Arc::clone(&repository)), repository))
}

/// Handles the --once mode: one foreground run
async fn handle_once(config: Config) -> anyhow::Result<()> {
    let (scheduler, _) = build_scheduler(&config)?;

    let run = scheduler.run_to_completion(TriggerSource::Cli).await?;
    println!(
        "Run #{} {}: {} seen, {} created, {} updated, {} pages failed",
        run.id, run.status, run.films_seen, run.films_created, run.films_updated, run.pages_failed
    );

    if run.status == RunStatus::Failed {
        bail!(
            "ingestion run #{} failed: {}",
            run.id,
            run.error.unwrap_or_default()
        );
    }
    Ok(())
}

/// Handles the default mode: timer plus HTTP API until Ctrl-C
async fn handle_serve(config: Config) -> anyhow::Result<()> {
    let (scheduler, repository) = build_scheduler(&config)?;

    let timer = config
        .schedule
        .enabled
        .then(|| scheduler.spawn_timer(config.schedule.run_on_startup));
    if timer.is_none() {
        tracing::info!("Scheduled runs disabled; waiting for manual triggers");
    }

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind_address))?;
    tracing::info!("Listening on {}", config.server.bind_address);

    let state = AppState::new(
        scheduler.clone(),
        repository,
        PathBuf::from(&config.storage.export_dir),
    );
    api::serve(listener, state, shutdown_signal()).await?;

    tracing::info!("Shutting down");
    if let Some(timer) = timer {
        timer.shutdown().await;
    }
    if scheduler.status().is_running() {
        tracing::info!("Waiting for the active run to finish");
        scheduler.wait_for_idle().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
