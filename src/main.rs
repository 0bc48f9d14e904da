mod api;
mod config;
mod error;
mod exchange;
mod indicator;
mod ingest;
mod model;
mod ratelimiter;
mod reconcile;
mod storage;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use sqlx::mysql::MySqlConnectOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use exchange::Exchange;
use exchange::bybit::BybitExchange;
use ratelimiter::TokenBucket;
use storage::Storage;
use storage::mysql::MysqlStorage;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("storage error")]
    Storage,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "candle-ingestor", about = "OHLCV candle ingestor and read API")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile the symbol universe and run one full backfill pass, then exit
    Ingest,
    /// Run the read-only HTTP API
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    match cli.command.unwrap_or(Command::Ingest) {
        Command::Ingest => run_ingest(&config).await,
        Command::Serve => run_serve(&config).await,
    }
}

async fn run_ingest(config: &AppConfig) -> Result<(), Report<AppError>> {
    let storage = Arc::new(open_storage(config).await?);
    let exchange: Arc<dyn Exchange> = Arc::new(BybitExchange::new(config.ingest.max_retries));

    let cancel = CancellationToken::new();
    let tokens: TokenBucket =
        ratelimiter::spawn(config.ingest.requests_per_second, cancel.clone());

    reconcile::reconcile(exchange.as_ref(), storage.as_ref(), &tokens)
        .await
        .change_context(AppError::Runtime)?;
    cancel.cancel();

    ingest::run_pipeline(
        exchange,
        Arc::clone(&storage) as Arc<dyn Storage>,
        &config.ingest,
    )
    .await
    .change_context(AppError::Storage)?;

    info!("ingestion run complete");
    Ok(())
}

async fn run_serve(config: &AppConfig) -> Result<(), Report<AppError>> {
    let storage = Arc::new(open_storage(config).await?);

    let app = api::router(storage);
    let addr = format!("{}:{}", config.http.bind, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .change_context(AppError::Runtime)
        .attach_with(|| format!("bind address: {addr}"))?;

    info!(addr, "read API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .change_context(AppError::Runtime)?;

    info!("read API shut down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("ctrl+c received, shutting down");
}

async fn open_storage(config: &AppConfig) -> Result<MysqlStorage, Report<AppError>> {
    let options = MySqlConnectOptions::from_str(&config.database.url())
        .change_context(AppError::Storage)?;
    let max_connections = config.ingest.max_concurrent_requests * 2;
    let retry_delay = std::time::Duration::from_millis(config.ingest.retry_delay_ms);

    MysqlStorage::connect_with_retry_policy(
        options,
        max_connections,
        config.ingest.max_retries,
        retry_delay,
    )
    .await
    .change_context(AppError::Storage)
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}
