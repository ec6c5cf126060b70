use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use clap::Parser;
use metrics_hub::{
    api::{ApiConfig, ApiState, spawn_api_server},
    config::{Config, read_config_file},
    storage,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (JSON)
    #[arg(short = 'c', long)]
    config: Option<String>,

    /// Address to listen on
    #[arg(short = 'a', long)]
    address: Option<SocketAddr>,

    /// Database DSN, selects the SQLite backend
    #[arg(short = 'd', long)]
    database_dsn: Option<String>,

    /// Snapshot file path
    #[arg(short = 'f', long)]
    file_storage_path: Option<PathBuf>,

    /// Seconds between snapshots, 0 saves after every change
    #[arg(short = 'i', long)]
    store_interval: Option<u64>,

    /// Load the snapshot on startup
    #[arg(short = 'r', long)]
    restore: Option<bool>,

    /// Log level
    #[arg(short = 'l', long)]
    log_level: Option<String>,
}

fn init(level: &str) {
    let level = LevelFilter::from_str(level).unwrap_or(LevelFilter::INFO);
    let filter = filter::Targets::new().with_targets(vec![
        ("metrics_hub", level),
        ("tower_http", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => read_config_file(path)?,
        None => Config::default(),
    };

    config.apply_env()?;

    if let Some(address) = args.address {
        config.address = address;
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    match args.database_dsn.as_ref().filter(|dsn| !dsn.is_empty()) {
        Some(dsn) => config.override_database(dsn.clone()),
        None => config.override_snapshot(
            args.file_storage_path.clone(),
            args.store_interval,
            args.restore,
        ),
    }

    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let config = load_config(&args)?;

    init(&config.log_level);
    trace!("started with args: {args:?}");
    trace!("effective config: {config:?}");

    let repo = storage::open(&config.storage).await?;
    info!("storage ready ({:?} batches)", repo.batch_semantics());

    let api_config = ApiConfig {
        bind_addr: config.address,
    };
    let addr = spawn_api_server(api_config, ApiState::new(repo.clone())).await?;
    info!("accepting metrics on {addr}");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Err(e) = repo.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}
