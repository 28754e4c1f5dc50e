mod config;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError, IngestorConfig, RouterConfig};
use hashring::{Hashring, RingFile, RingProvider, RingWatcher};
use ingestor::{IngestError, IngestService, Ingestor, MemStore, RelabelError, Relabeler};
use router::{
    DownstreamHealth, ForwardClient, ReceiveService, ReplicationCoordinator, Router, RouterError,
};
use shared::admin::AdminService;
use shared::http::run_http_service;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conflux", about = "Tenant-aware write routing and replication")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the write router: resolves placements and replicates writes.
    Router,
    /// Run a terminal ingest node: relabels and persists writes.
    Ingestor,
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ring(#[from] hashring::ConfigError),

    #[error(transparent)]
    Relabel(#[from] RelabelError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[tokio::main]
async fn main() -> Result<(), RunError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_file(&cli.config)?;

    match cli.command {
        Command::Router => run_router(config.router()?).await,
        Command::Ingestor => run_ingestor(config.ingestor()?).await,
    }
}

async fn run_router(config: RouterConfig) -> Result<(), RunError> {
    let ring_file = RingFile::from_file(&config.ring_file)?;
    let hashring = Hashring::from_config(&ring_file)?;
    let provider = Arc::new(RingProvider::new(hashring));

    let health = Arc::new(DownstreamHealth::new());
    health.seed(&provider.current().all_endpoints());

    // re-seed on every reload so dropped endpoints leave the health map
    let watcher_health = health.clone();
    let watcher = RingWatcher::new(
        config.ring_file.clone(),
        Duration::from_secs(config.reload_interval_secs),
        provider.clone(),
    )
    .on_install(move |ring| watcher_health.seed(&ring.all_endpoints()));
    tokio::spawn(watcher.run());

    let coordinator = ReplicationCoordinator::new(
        ForwardClient::new(),
        health.clone(),
        Duration::from_millis(config.forward_timeout_ms),
    );
    let service = ReceiveService::new(
        Arc::new(Router::new(
            provider.clone(),
            coordinator,
            config.max_forward_hops,
        )),
        config.default_tenant.clone(),
    );

    // endpoints are seeded healthy, so readiness holds from boot and
    // drops only once every tracked downstream has failed a forward
    let admin: AdminService<_, RouterError> =
        AdminService::new(move || health.healthy_count() > 0);

    tracing::info!(ring_file = %config.ring_file.display(), "starting router");
    let router_task = run_http_service(&config.listener.host, config.listener.port, service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin,
    );
    tokio::try_join!(router_task, admin_task)?;
    Ok(())
}

async fn run_ingestor(config: IngestorConfig) -> Result<(), RunError> {
    let relabeler = Relabeler::from_config(&config.relabel)?;
    let ingestor = Arc::new(Ingestor::new(Arc::new(MemStore::new()), relabeler));
    let service = IngestService::new(ingestor, config.default_tenant.clone());

    let admin: AdminService<_, IngestError> = AdminService::new(|| true);

    tracing::info!("starting ingestor");
    let ingest_task = run_http_service(&config.listener.host, config.listener.port, service);
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin,
    );
    tokio::try_join!(ingest_task, admin_task)?;
    Ok(())
}
