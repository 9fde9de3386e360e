//! eabkit - Main entry point
//!
//! Plans and applies EAB credential records, or keeps them rotated in the
//! background.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use eabkit::{
    EabClient, LifecycleOrchestrator, PlannedAction, PublicCaIssuer, ReconcileScheduler,
    Reconciler, RecordStore, RetryPolicy,
};
use eabkit_common::RecordName;
use eabkit_config::validate::validate_credential_files;
use eabkit_config::{Config, RecordConfig};

/// eabkit - Issue and rotate ACME EAB credentials from Google Public CA
#[derive(Parser, Debug)]
#[command(name = "eabkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(
        short = 'c',
        long = "config",
        env = "EABKIT_CONFIG",
        default_value = "/etc/eabkit/eabkit.kdl",
        global = true
    )]
    config: String,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose", global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate configuration file and exit
    Test,
    /// Show what apply would do
    Plan {
        /// Limit to one record
        record: Option<String>,
    },
    /// Create or rotate credentials as needed
    Apply {
        /// Limit to one record
        record: Option<String>,
    },
    /// Check stored credentials against the CA
    Refresh {
        /// Limit to one record
        record: Option<String>,
    },
    /// Print a stored record as JSON
    Show {
        record: String,
    },
    /// Remove a stored record (the CA-side key stays active)
    Forget {
        record: String,
    },
    /// Run the rotation scheduler until interrupted
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Test => test_config(&cli.config, &config),
        Commands::Plan { record } => plan(config, record.as_deref()),
        Commands::Apply { record } => apply(config, record.as_deref()).await,
        Commands::Refresh { record } => refresh(config, record.as_deref()).await,
        Commands::Show { record } => show(config, &record),
        Commands::Forget { record } => forget(config, &record),
        Commands::Run => run_scheduler(config).await,
    }
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: &str) -> Result<Config> {
    info!("Loading configuration from: {}", path);
    let config = Config::from_file(path).context("Failed to load configuration file")?;
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Test configuration file and exit
fn test_config(path: &str, config: &Config) -> Result<()> {
    check_credential_files(config)?;

    info!("Configuration test successful:");
    info!("  - {} record(s)", config.records.len());
    info!("  - storage at {}", config.storage_path.display());

    println!("eabkit: configuration file {} test is successful", path);
    Ok(())
}

/// Check that every referenced service-account key file is usable
fn check_credential_files(config: &Config) -> Result<()> {
    let result = validate_credential_files(config);

    for warning in &result.warnings {
        warn!(warning = %warning.message, "Credentials warning");
    }

    if !result.is_ok() {
        let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
        anyhow::bail!(
            "Credentials check failed:\n  - {}",
            messages.join("\n  - ")
        );
    }
    Ok(())
}

fn build_reconciler(config: Config) -> Result<Reconciler<PublicCaIssuer>> {
    let store = RecordStore::new(&config.storage_path).with_context(|| {
        format!(
            "Failed to open record storage at {}",
            config.storage_path.display()
        )
    })?;

    let client = EabClient::new(&config.ca.base_url, RetryPolicy::from(&config.retry));
    let issuer = PublicCaIssuer::new(
        client,
        Duration::from_secs(config.ca.request_timeout_secs),
    );

    Ok(Reconciler::new(
        LifecycleOrchestrator::new(issuer),
        store,
        Arc::new(config),
    ))
}

fn select_records(config: &Config, name: Option<&str>) -> Result<Vec<RecordConfig>> {
    match name {
        Some(name) => {
            let record = config
                .record(name)
                .with_context(|| format!("No record named '{}' in configuration", name))?;
            Ok(vec![record.clone()])
        }
        None => Ok(config.records.clone()),
    }
}

fn plan(config: Config, name: Option<&str>) -> Result<()> {
    let records = select_records(&config, name)?;
    let reconciler = build_reconciler(config)?;

    for record in &records {
        let action = reconciler
            .plan(record)
            .with_context(|| format!("Failed to plan record '{}'", record.name))?;

        let line = match action {
            PlannedAction::Create => "create".to_string(),
            PlannedAction::Rotate { age_days } => format!("rotate (age {} days)", age_days),
            PlannedAction::Keep {
                age_days,
                remaining_days,
            } => format!(
                "keep (age {} days, {} days remaining)",
                age_days, remaining_days
            ),
        };
        println!("{}: {}", record.name, line);
    }
    Ok(())
}

async fn apply(config: Config, name: Option<&str>) -> Result<()> {
    let records = select_records(&config, name)?;
    let reconciler = build_reconciler(config)?;
    let mut failed = 0usize;

    for record in &records {
        match reconciler.apply(record).await {
            Ok(outcome) => println!(
                "{}: {:?} (key {})",
                record.name, outcome.action, outcome.record.key_id
            ),
            Err(e) => {
                failed += 1;
                eprintln!("{}: failed: {}", record.name, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} record(s) failed to apply", failed, records.len());
    }
    Ok(())
}

async fn refresh(config: Config, name: Option<&str>) -> Result<()> {
    let records = select_records(&config, name)?;
    let reconciler = build_reconciler(config)?;

    for record in &records {
        let refreshed = reconciler
            .refresh(record)
            .await
            .with_context(|| format!("Failed to refresh record '{}'", record.name))?;

        match refreshed {
            Some(r) => println!("{}: key {}", record.name, r.key_id),
            None => println!("{}: not created", record.name),
        }
    }
    Ok(())
}

fn show(config: Config, name: &str) -> Result<()> {
    let name = RecordName::new(name).context("Invalid record name")?;
    let store = RecordStore::new(&config.storage_path).context("Failed to open record storage")?;

    let record = store
        .load(&name)
        .with_context(|| format!("Failed to load record '{}'", name))?
        .with_context(|| format!("No stored record named '{}'", name))?;

    println!(
        "{}",
        serde_json::to_string_pretty(&record).context("Failed to serialize record")?
    );
    Ok(())
}

fn forget(config: Config, name: &str) -> Result<()> {
    let name = RecordName::new(name).context("Invalid record name")?;
    let reconciler = build_reconciler(config)?;

    match reconciler.forget(&name)? {
        Some(outcome) => match outcome.orphaned_key_id {
            Some(key_id) => println!(
                "{}: removed; key {} is still active at the CA",
                name, key_id
            ),
            None => println!("{}: removed", name),
        },
        None => println!("{}: no stored record", name),
    }
    Ok(())
}

async fn run_scheduler(config: Config) -> Result<()> {
    check_credential_files(&config)?;
    let scheduler = ReconcileScheduler::new(build_reconciler(config)?);
    let passes = scheduler.run(shutdown_signal()).await;
    info!(passes, "Shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
