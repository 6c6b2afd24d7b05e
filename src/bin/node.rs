use anyhow::{Context, Result};
use clap::Parser;
use replisync::compute::ComputePool;
use replisync::config::NodeConfig;
use replisync::metrics;
use replisync::network::{ConnectionConfig, PeerAddress, QuicTransport};
use replisync::protocol::SyncHandler;
use replisync::replication::{
    LocalResponsibilityTracker, ReplicationExecutor, StaticPeerDirectory,
};
use replisync::storage::{Id160, MemoryStorageBuilder, Storage};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

/// Replication node: serves INFO/COPY/SYNC and keeps replicas in sync
#[derive(Parser, Debug)]
#[command(name = "replisync-node", version, about)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on (overrides config)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Node id as 40 hex digits (overrides config)
    #[arg(long)]
    node_id: Option<Id160>,

    /// Cluster member as <id>@<addr>; repeatable
    #[arg(long = "peer")]
    peers: Vec<PeerAddress>,

    /// Directory to persist values in
    #[arg(long)]
    storage: Option<PathBuf>,

    /// Prometheus endpoint address
    #[arg(long)]
    metrics: Option<SocketAddr>,

    /// -v debug, -vv trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let config = load_config(&args)?;
    config.validate().context("Invalid configuration")?;

    let local = PeerAddress::new(config.node_id, config.listen_addr);
    tracing::info!("Starting node {}", local);

    let mut storage = MemoryStorageBuilder::new();
    if let Some(dir) = &config.storage_dir {
        storage = storage.persistence_path(dir);
    }
    let storage = Arc::new(storage.build().context("Failed to open storage")?);
    tracing::info!("Storage: {}", storage.stats());

    let peers = Arc::new(StaticPeerDirectory::with_peers(
        local.clone(),
        config.peers.iter().cloned(),
    ));
    let tracker = Arc::new(LocalResponsibilityTracker::new(peers.clone()));
    let compute = ComputePool::with_default_size();

    let handler = Arc::new(SyncHandler::new(
        storage.clone(),
        tracker.clone(),
        compute.clone(),
        config.replication.block_size,
    ));

    let transport = Arc::new(
        QuicTransport::new(ConnectionConfig {
            bind_addr: config.listen_addr,
            request_timeout: config.request_timeout,
            insecure_skip_verify: config.insecure_skip_verify,
            ..Default::default()
        })
        .await
        .context("Failed to create QUIC endpoint")?,
    );
    tracing::info!("Listening on {}", transport.local_addr()?);

    if let Some(addr) = config.metrics_addr {
        metrics::start_metrics_server(addr).context("Failed to start metrics endpoint")?;
        tracing::info!("Metrics on http://{}/metrics", addr);
    }

    let executor = ReplicationExecutor::new(
        config.replication.clone(),
        storage.clone(),
        tracker.clone(),
        peers,
        transport.clone(),
        compute,
    );

    // Values loaded from disk: claim the locations this node owns
    let claimed = tracker.reevaluate(&storage.locations());
    tracing::info!("Responsible for {} locations at startup", claimed);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(transport.clone().serve(handler));
    let replication = tokio::spawn(executor.run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received...");

    let _ = shutdown_tx.send(true);
    if let Err(e) = replication.await {
        tracing::error!("Replication task failed: {}", e);
    }
    transport.close();
    server.abort();

    tracing::info!("Node stopped");
    Ok(())
}

fn load_config(args: &Args) -> Result<NodeConfig> {
    let mut config = match &args.config {
        Some(path) => NodeConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => NodeConfig::default(),
    };

    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }
    if let Some(node_id) = args.node_id {
        config.node_id = node_id;
    }
    if !args.peers.is_empty() {
        config.peers = args.peers.clone();
    }
    if let Some(dir) = &args.storage {
        config.storage_dir = Some(dir.clone());
    }
    if let Some(addr) = args.metrics {
        config.metrics_addr = Some(addr);
    }
    Ok(config)
}

fn init_tracing(verbosity: u8) {
    let mut filter = EnvFilter::from_default_env();

    if std::env::var("RUST_LOG").is_err() {
        let level = match verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        if let Ok(directive) = level.parse() {
            filter = filter.add_directive(directive);
        }
    }

    for noisy in ["quinn=warn", "rustls=warn"] {
        if let Ok(directive) = noisy.parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
