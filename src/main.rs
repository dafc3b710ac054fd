//! N2K Virtual Switch - standalone runner
//!
//! Runs the switch bank against the in-process bus and data model, with the
//! manual HTTP endpoint as the control surface.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use n2k_virtual_switch::api::{self, ApiState};
use n2k_virtual_switch::config::AppConfig;
use n2k_virtual_switch::gateway::{Gateway, MemoryBus, MemoryDataModel, Outbound};
use n2k_virtual_switch::paths::AppPaths;
use n2k_virtual_switch::protocol::{LabelTable, Translator};
use n2k_virtual_switch::state::{EngineSettings, PersistenceActor, SnapshotFile, StateEngine};

/// Virtual NMEA 2000 switch bank
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Directory for the power-down snapshot
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Port of the manual control API
    #[arg(long)]
    api_port: Option<u16>,

    /// Print the JSON schema of the config file and exit
    #[arg(long)]
    print_schema: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    if args.print_schema {
        println!("{}", AppConfig::schema()?);
        return Ok(());
    }

    let paths = AppPaths::detect().with_overrides(args.config.clone(), None);
    std::fs::create_dir_all(&paths.logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", paths.logs_dir.display()))?;
    let _log_guard = init_logging(&args.log_level, &paths)?;

    info!("Starting N2K Virtual Switch v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", paths.config.display());

    let config = AppConfig::load_or_default(&paths.config).await?;
    let paths = paths.with_overrides(None, args.data_dir.clone().or_else(|| config.data_dir.clone()));
    paths.ensure_directories()?;

    run(config, paths, args.api_port).await?;

    info!("N2K Virtual Switch shutdown complete");
    Ok(())
}

async fn run(config: AppConfig, paths: AppPaths, api_port: Option<u16>) -> Result<()> {
    let file = SnapshotFile::new(paths.snapshot_path());
    let prior = file.load().await;
    info!(
        "Loaded {} persisted channel state(s) from {}",
        prior.len(),
        file.path().display()
    );
    let persistence = PersistenceActor::spawn(file, config.persistence.debounce_ms);

    let channels = config.channel_configs();
    let translator = Translator::new(config.virtual_instance, LabelTable::from_configs(&channels));

    let bus = Arc::new(MemoryBus::new());
    let data_model = Arc::new(MemoryDataModel::new());

    let engine = StateEngine::spawn(
        EngineSettings {
            send_rate: config.send_rate(),
            state_ttl_secs: config.state_ttl_secs,
            source: config.source.clone(),
        },
        translator.clone(),
        &channels,
        &prior,
        Arc::new(Outbound::new(bus.clone(), data_model.clone())),
        persistence,
    );

    let gateway = Gateway::start(
        engine.clone(),
        translator.clone(),
        bus,
        data_model,
        &config.source,
    );

    let api_task = if config.api.enabled {
        let state = Arc::new(ApiState {
            engine: engine.clone(),
            translator,
        });
        let port = api_port.unwrap_or(config.api.port);
        Some(tokio::spawn(async move {
            if let Err(e) = api::start_server(state, port).await {
                error!("API server stopped: {:#}", e);
            }
        }))
    } else {
        info!("Manual control API disabled");
        None
    };

    info!(instance = config.virtual_instance, "Switch bank ready");

    shutdown_signal().await;

    info!("Shutting down...");
    if let Some(task) = api_task {
        task.abort();
    }
    gateway.shutdown().await;
    engine.shutdown().await;

    Ok(())
}

fn init_logging(level: &str, paths: &AppPaths) -> Result<WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::daily(&paths.logs_dir, "n2k-virtual-switch.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C signal handler");
    info!("Shutdown signal received");
}
