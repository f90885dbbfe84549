// ABOUTME: CLI entry point for table-mirror
// ABOUTME: Parses flags, runs preflight checks and dispatches table syncs

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use table_mirror::catalog::MySqlConnector;
use table_mirror::dispatcher::OutcomeStatus;
use table_mirror::filters::TableSelection;
use table_mirror::preflight::run_preflight_checks;
use table_mirror::transfer::DataxEngine;
use table_mirror::{CheckpointStore, RunOptions, SyncConfig, TableDispatcher};

#[derive(Parser)]
#[command(name = "table-mirror")]
#[command(about = "Mirror MySQL tables with watermark-based incremental sync", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short = 'c', env = "TABLE_MIRROR_CONFIG", default_value = "table-mirror.toml")]
    config: PathBuf,
    /// Sync only these tables (default: every table in the source)
    #[arg(long, short = 't', num_args = 1.., value_delimiter = ',')]
    tables: Option<Vec<String>>,
    /// Skip these tables
    #[arg(long, short = 'e', num_args = 1.., value_delimiter = ',')]
    exclude: Vec<String>,
    /// Copy every row regardless of checkpoints
    #[arg(long, short = 'f')]
    full: bool,
    /// Do not delete destination rows that no longer exist in the source
    #[arg(long)]
    no_detect_deletes: bool,
    /// Empty destination tables before copying (only with --full)
    #[arg(long)]
    truncate_before_sync: bool,
    /// Number of tables synced in parallel (overrides max_workers)
    #[arg(long, short = 'w')]
    workers: Option<usize>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config = SyncConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;

    if cli.truncate_before_sync && !cli.full {
        tracing::warn!("--truncate-before-sync only applies together with --full; ignoring it");
    }

    let options = RunOptions {
        tables: cli.tables.clone(),
        exclude: cli.exclude.clone(),
        force_full: cli.full,
        detect_deletes: !cli.no_detect_deletes,
        truncate_before_full: cli.full && cli.truncate_before_sync,
        max_workers: cli.workers,
    };

    let config = Arc::new(config);
    let connector = Arc::new(MySqlConnector::new(&config));
    let engine = Arc::new(DataxEngine::new(&config.engine));

    let preflight = run_preflight_checks(&config, engine.as_ref(), connector.as_ref()).await;
    if !preflight.all_passed() {
        preflight.print();
    }
    let source_tables = preflight.into_tables()?;

    let selection = TableSelection::new(options.tables.clone(), options.exclude.clone())
        .resolve(&source_tables)?;
    for warning in &selection.warnings {
        tracing::warn!("{}", warning);
    }

    tracing::info!(
        "Mode: {}, delete detection: {}{}",
        if options.force_full { "forced full" } else { "incremental" },
        if options.detect_deletes { "on" } else { "off" },
        if options.truncate_before_full { ", truncating destination tables first" } else { "" }
    );

    let checkpoints = Arc::new(CheckpointStore::new(&config.checkpoint_path));
    let dispatcher = TableDispatcher::new(connector, engine, checkpoints, config.clone());
    let summary = dispatcher.run(&selection.tables, &options).await;

    println!("{}", "=".repeat(60));
    for outcome in &summary.outcomes {
        if outcome.status == OutcomeStatus::NoNewData {
            tracing::debug!("{}", outcome);
        } else {
            println!("{}", outcome);
        }
    }
    println!("{}", "=".repeat(60));
    println!("{}", summary);

    if summary.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}
