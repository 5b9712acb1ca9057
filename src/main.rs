//! MedRoute Worker - traffic-aware route optimisation for NEMT
//!
//! Connects to NATS (state buckets and reroute topics), builds the
//! optimisation pipeline and live-session machinery, and hands the core
//! contracts to the transport layer.

mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use medroute_worker::config::Config;
use medroute_worker::handlers;
use medroute_worker::live::{
    ConnectionRegistry, IngestWorker, NatsPublisher, NatsTopics, SessionManager,
};
use medroute_worker::services::delay::DelayThresholds;
use medroute_worker::services::health;
use medroute_worker::services::matrix::{
    GoogleMapsConfig, GoogleMatrixClient, MatrixCache, MatrixResolver,
};
use medroute_worker::services::pipeline::Optimizer;
use medroute_worker::state::{NatsKvBackend, SessionStore};

const DRIVER_STATE_BUCKET: &str = "medroute-driver-state";
const MATRIX_CACHE_BUCKET: &str = "medroute-matrix-cache";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    match cli.command {
        Some(cli::Command::Health) => run_health(config).await,
        Some(cli::Command::Serve) | None => run_server(config).await,
    }
}

async fn run_health(config: Config) -> Result<()> {
    let maps_configured = !config.google_maps_api_key.is_empty();

    let backend = match async_nats::connect(&config.nats_url).await {
        Ok(client) => {
            let js = async_nats::jetstream::new(client);
            NatsKvBackend::open(
                &js,
                DRIVER_STATE_BUCKET,
                Duration::from_secs(config.driver_state_ttl_seconds),
            )
            .await
            .ok()
        }
        Err(_) => None,
    };

    let report = match backend {
        Some(backend) => {
            let store = SessionStore::new(Arc::new(backend));
            health::check(&store, maps_configured).await
        }
        None => {
            // No NATS or no JetStream: report against a dead backend
            let store = SessionStore::new(Arc::new(UnreachableBackend));
            health::check(&store, maps_configured).await
        }
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Stand-in backend when the NATS connection itself cannot be made.
struct UnreachableBackend;

#[async_trait::async_trait]
impl medroute_worker::state::KvBackend for UnreachableBackend {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        anyhow::bail!("state backend unreachable")
    }
    async fn put(&self, _key: &str, _value: Vec<u8>) -> Result<()> {
        anyhow::bail!("state backend unreachable")
    }
    async fn delete(&self, _key: &str) -> Result<()> {
        anyhow::bail!("state backend unreachable")
    }
    async fn ping(&self) -> Result<()> {
        anyhow::bail!("state backend unreachable")
    }
    fn name(&self) -> &str {
        "unreachable"
    }
}

async fn run_server(config: Config) -> Result<()> {
    let logs_dir = std::env::var("LOGS_DIR").unwrap_or_else(|_| "./logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &logs_dir, "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,medroute_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    info!("Starting MedRoute Worker...");

    let nats_client = async_nats::connect(&config.nats_url).await?;
    info!("Connected to NATS at {}", config.nats_url);

    let js = async_nats::jetstream::new(nats_client.clone());
    let session_backend = NatsKvBackend::open(
        &js,
        DRIVER_STATE_BUCKET,
        Duration::from_secs(config.driver_state_ttl_seconds),
    )
    .await?;
    let matrix_backend = NatsKvBackend::open(
        &js,
        MATRIX_CACHE_BUCKET,
        Duration::from_secs(config.matrix_cache_ttl_seconds),
    )
    .await?;
    info!("JetStream KV buckets ready");

    let provider = GoogleMatrixClient::new(GoogleMapsConfig::new(
        config.google_maps_api_key.clone(),
        config.matrix_request_timeout_seconds,
    ))?;
    let resolver = Arc::new(MatrixResolver::new(
        Arc::new(provider),
        MatrixCache::new(Arc::new(matrix_backend)),
    ));

    let store = Arc::new(SessionStore::new(Arc::new(session_backend)));
    let optimizer = Arc::new(Optimizer::new(resolver, &config));
    let registry = Arc::new(ConnectionRegistry::new());
    let ingest = Arc::new(IngestWorker::new(
        store.clone(),
        optimizer.clone(),
        Arc::new(NatsPublisher::new(nats_client.clone())),
        registry.clone(),
        DelayThresholds::from_config(&config),
    ));
    let _manager = Arc::new(SessionManager::new(
        registry,
        ingest,
        store.clone(),
        Arc::new(NatsTopics::new(nats_client.clone())),
    ));

    // Request/reply surface for in-cluster callers. The WebSocket adapter
    // drives `_manager` directly through connect/handle_frame/disconnect.
    let optimize_sub = nats_client.subscribe(handlers::OPTIMIZE_SUBJECT).await?;
    let health_sub = nats_client.subscribe(handlers::HEALTH_SUBJECT).await?;
    info!("Subscribed to NATS subjects");

    let client_optimize = nats_client.clone();
    let optimizer_handle = optimizer.clone();
    let store_optimize = store.clone();
    let optimize_handle = tokio::spawn(async move {
        handlers::handle_optimize(client_optimize, optimize_sub, optimizer_handle, store_optimize)
            .await
    });

    let client_health = nats_client.clone();
    let store_health = store.clone();
    let maps_configured = !config.google_maps_api_key.is_empty();
    let health_handle = tokio::spawn(async move {
        handlers::handle_health(client_health, health_sub, store_health, maps_configured).await
    });

    info!("All handlers started, waiting for requests...");

    tokio::select! {
        result = optimize_handle => {
            error!("Optimize handler finished: {:?}", result);
        }
        result = health_handle => {
            error!("Health handler finished: {:?}", result);
        }
        result = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received: {:?}", result);
        }
    }

    info!("MedRoute Worker shutting down");
    Ok(())
}
