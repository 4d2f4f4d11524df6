//! Sumi-Sluice main entry point
//!
//! This is the command-line interface for the Sumi-Sluice fetch engine. It
//! fetches each URL given on the command line under the configured throttles
//! and login sequences, and reports how each document came out.

use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sumi_sluice::config::{load_config_with_hash, Config};
use sumi_sluice::store::{MemoryEventGate, Stores, TracingActivityRecorder};
use sumi_sluice::{FetchOutcome, SessionEngine, SluiceError};
use tracing_subscriber::EnvFilter;

/// Sumi-Sluice: a throttled fetcher that can log in
///
/// Sumi-Sluice fetches documents while respecting robots.txt, per-site
/// connection, bandwidth and fetch-rate limits, and walks configured login
/// sequences when a site asks for credentials.
#[derive(Parser, Debug)]
#[command(name = "sumi-sluice")]
#[command(version = "1.0.0")]
#[command(about = "A throttled fetcher that can log in", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Documents to fetch
    #[arg(value_name = "URL")]
    urls: Vec<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the throttles and login sequences, without fetching
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        return handle_dry_run(&config);
    }

    handle_fetch(&config, &cli.urls).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_sluice=info,warn"),
            1 => EnvFilter::new("sumi_sluice=debug,info"),
            2 => EnvFilter::new("sumi_sluice=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn open_stores(config: &Config) -> anyhow::Result<Stores> {
    match &config.store {
        Some(store) => Stores::sqlite(Path::new(&store.database_path))
            .with_context(|| format!("failed to open database {}", store.database_path)),
        None => Ok(Stores::in_memory()),
    }
}

/// Handles the --dry-run mode: validates config and shows what it describes
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    let engine = SessionEngine::new(
        config,
        Stores::in_memory(),
        Arc::new(MemoryEventGate::new()),
        Arc::new(TracingActivityRecorder),
    )?;

    println!("=== Sumi-Sluice Dry Run ===\n");

    let fetcher = &config.fetcher;
    println!("Fetcher Configuration:");
    println!("  User agent: {}", fetcher.user_agent);
    if let Some(from) = &fetcher.from_address {
        println!("  From: {}", from);
    }
    println!("  Connect timeout: {}ms", fetcher.connect_timeout_ms);
    println!("  Socket timeout: {}ms", fetcher.socket_timeout_ms);
    println!("  Global connection limit: {}", fetcher.global_connection_limit);
    println!("  Max login hops: {}", fetcher.max_login_hops);
    println!("  Obey robots.txt: {}", fetcher.obey_robots);

    println!("\nStore:");
    match &config.store {
        Some(store) => println!("  Database: {}", store.database_path),
        None => println!("  In memory"),
    }

    println!("\nThrottles ({}):", engine.throttles().len());
    for entry in &config.throttle {
        println!(
            "  - {} (connections: {}, kb/s: {}, fetches/min: {})",
            entry.bin_regex,
            entry.max_connections.map_or("-".to_string(), |v| v.to_string()),
            entry.max_kb_per_second.map_or("-".to_string(), |v| v.to_string()),
            entry.max_fetches_per_minute.map_or("-".to_string(), |v| v.to_string()),
        );
    }

    println!("\nAccess credentials: {}", engine.credentials().access_count());

    let keys: Vec<&str> = engine.credentials().sequence_keys().collect();
    println!("\nLogin sequences ({}):", keys.len());
    for key in keys {
        println!("  - {}", key);
    }

    println!("\n✓ Configuration is valid");

    Ok(())
}

/// Fetches every URL in turn and prints its outcome
async fn handle_fetch(config: &Config, urls: &[String]) -> anyhow::Result<()> {
    if urls.is_empty() {
        tracing::warn!("No URLs given; nothing to fetch");
        return Ok(());
    }

    let engine = SessionEngine::new(
        config,
        open_stores(config)?,
        Arc::new(MemoryEventGate::new()),
        Arc::new(TracingActivityRecorder),
    )?;

    let cancel = engine.cancel_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping fetches");
            cancel.cancel();
        }
    });

    for url in urls {
        match engine.fetch(url).await {
            Ok(outcome) => print_outcome(url, &outcome),
            Err(SluiceError::Interrupted) => {
                tracing::warn!("Stopped before fetching '{}'", url);
                break;
            }
            Err(e) => return Err(e).with_context(|| format!("failed to fetch {}", url)),
        }
        engine.flush_idle();
    }

    Ok(())
}

fn print_outcome(url: &str, outcome: &FetchOutcome) {
    println!("{}", url);
    println!("  Result: {}", outcome.signal);
    if let Some(document) = &outcome.document {
        println!("  Status: {}", document.status);
        println!("  Bytes: {}", document.body.len());
    }
    if let Some(version) = &outcome.version {
        println!("  Checksum: {}", version.checksum);
    }
    if let Some(code) = outcome.activity_code {
        println!("  Code: {}", code);
    }
    if let Some(retry) = &outcome.retry {
        println!(
            "  Retry after: {}s (give up after {}s)",
            retry.retry_after.as_secs(),
            retry.give_up_after.as_secs()
        );
    }
    if let Some(diagnostic) = &outcome.diagnostic {
        println!("  Because: {}", diagnostic);
    }
}
