use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use charger_status::config::Config;
use charger_status::metrics;
use charger_status::models::{now_ms, StationMetadata};
use charger_status::scheduler::CycleRunner;
use charger_status::server::ApiServer;
use charger_status::storage::{create_sqlite_repository, Database, SharedRepository};

#[derive(Parser)]
#[command(
    name = "charger-status",
    version,
    about = "Availability tracker for third-party charging and battery-swap stations",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (environment variables are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the read API (and the interval trigger when enabled)
    Serve {
        /// Override the listen address
        #[arg(short, long)]
        bind: Option<String>,

        /// Run the interval trigger alongside the API
        #[arg(long, default_value = "false")]
        schedule: bool,
    },

    /// Run one fetch cycle and print its report
    Run {
        /// Ignore the night pause window
        #[arg(long, default_value = "false")]
        force: bool,
    },

    /// Upsert station metadata from a JSON array file
    Seed {
        /// Path to a JSON array of stations
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Create the SQLite schema
    InitDb,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());

    setup_tracing(&log_format, cli.verbose)?;

    if let Err(e) = metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics disabled");
    }

    match cli.command {
        Commands::Serve { bind, schedule } => {
            tracing::info!(bind = ?bind, schedule = %schedule, "Starting serve command");
            serve(config, bind, schedule).await?;
        }

        Commands::Run { force } => {
            tracing::info!(force = %force, "Starting run command");
            run_once(config, force).await?;
        }

        Commands::Seed { file } => {
            tracing::info!(file = %file.display(), "Starting seed command");
            seed(&config, &file)?;
        }

        Commands::InitDb => {
            tracing::info!(path = %config.database.sqlite_path.display(), "Starting init-db command");
            init_db(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("charger_status=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("charger_status=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("Failed to initialize tracing")?;
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("Failed to initialize tracing")?;
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<SharedRepository> {
    let path = &config.database.sqlite_path;
    create_sqlite_repository(path)
        .with_context(|| format!("Failed to open store at {}", path.display()))
}

async fn serve(mut config: Config, bind: Option<String>, schedule: bool) -> Result<()> {
    if let Some(raw) = bind {
        config.server.bind_address = raw
            .parse()
            .with_context(|| format!("Invalid bind address: {raw}"))?;
    }
    config.server.schedule_enabled |= schedule;

    let store = open_store(&config)?;
    let runner = Arc::new(CycleRunner::from_config(&config, store.clone())?);
    let server = ApiServer::new(config.server.clone(), store, runner);

    println!("{}", server.info().display());

    server
        .start_with_shutdown(shutdown_signal())
        .await
        .context("API server failed")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

async fn run_once(mut config: Config, force: bool) -> Result<()> {
    if force {
        config.fetcher.night_pause = false;
    }

    let store = open_store(&config)?;
    let runner = CycleRunner::from_config(&config, store)?;
    let report = runner.run_cycle().await.context("Fetch cycle failed")?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to encode cycle report")?
    );
    Ok(())
}

fn seed(config: &Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read station file: {}", file.display()))?;
    let stations: Vec<StationMetadata> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse station file: {}", file.display()))?;

    let store = open_store(config)?;
    let written = store
        .upsert_stations(&stations, now_ms())
        .context("Failed to upsert stations")?;

    println!("Seeded {written} of {} stations", stations.len());
    Ok(())
}

fn init_db(config: &Config) -> Result<()> {
    let path = &config.database.sqlite_path;
    Database::open(path).with_context(|| format!("Failed to initialize {}", path.display()))?;
    println!("Initialized store at {}", path.display());
    Ok(())
}
