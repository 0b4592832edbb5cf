//! Ingest Gateway binary (§4.1, §4.4): accepts signed packets from masters,
//! appends them to the Signal Log, and hands accepted signals to the
//! Fan-out Distributor's in-memory hub for live push. Also binds the
//! distributor's receiver-facing push listener, so the two halves of the
//! replication path (producer ingest, subscriber push) share one process
//! and one `FanoutDistributor`.
//!
//! Usage:
//!   signal-gateway --listen-addr 0.0.0.0:7420 --distributor-listen-addr 0.0.0.0:7430 --metrics-port 9100

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use signalplane::config::GatewayConfig;
use signalplane::fanout::hub::SignalHub;
use signalplane::fanout::transport::{read_hello, run_subscriber_session};
use signalplane::fanout::FanoutDistributor;
use signalplane::gateway::credentials::SqliteCredentialStore;
use signalplane::gateway::pipeline::GatewayPipeline;
use signalplane::gateway::Gateway;
use signalplane::log::SqliteSignalLog;
use signalplane::registry::SqliteRegistry;

#[derive(Parser, Debug)]
#[command(name = "signal-gateway")]
#[command(about = "Ingest Gateway: producer-facing hot path for the signal replication plane")]
struct Args {
    #[arg(long, env = "GATEWAY_LISTEN_ADDR")]
    listen_addr: Option<String>,

    #[arg(long, env = "GATEWAY_DISTRIBUTOR_LISTEN_ADDR")]
    distributor_listen_addr: Option<String>,

    #[arg(long, env = "SIGNALPLANE_DB_PATH", default_value = "./signalplane.db")]
    db_path: String,

    #[arg(long, env = "GATEWAY_CREDENTIALS_DB_PATH", default_value = "./credentials.db")]
    credentials_db_path: String,

    #[arg(long, env = "GATEWAY_METRICS_PORT", default_value_t = 9100)]
    metrics_port: u16,

    #[arg(long, env = "GUARD_SUPPRESS_NON_SYNCED_PUSH", default_value_t = true)]
    suppress_non_synced_push: bool,

    #[arg(long, env = "GUARD_FULL_SYNC_MAX_REPLAY", default_value_t = 100_000)]
    full_sync_max_replay: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = GatewayConfig::from_env();
    if let Some(addr) = &args.listen_addr {
        config.listen_addr = addr.parse()?;
    }
    if let Some(addr) = &args.distributor_listen_addr {
        config.distributor_listen_addr = addr.parse()?;
    }

    info!(addr = %config.listen_addr, "starting signal gateway");

    let prometheus_handle = signalplane::metrics::install_recorder();

    let credentials = Arc::new(SqliteCredentialStore::new(&args.credentials_db_path)?);
    let log = Arc::new(SqliteSignalLog::new(&args.db_path, config.log_pool_size)?);
    let registry = Arc::new(SqliteRegistry::new(&args.db_path)?);
    let hub = Arc::new(SignalHub::new(1024));

    let pipeline = Arc::new(GatewayPipeline::new(credentials, log, config.max_clock_skew));
    let distributor = Arc::new(FanoutDistributor::new(
        registry.clone(),
        Arc::new(SqliteSignalLog::new(&args.db_path, config.log_pool_size)?),
        hub,
        args.suppress_non_synced_push,
        args.full_sync_max_replay,
    ));

    let metrics_addr: std::net::SocketAddr = ([0, 0, 0, 0], args.metrics_port).into();
    let metrics_app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let metrics_server = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(metrics_addr).await.unwrap();
        let _ = axum::serve(listener, metrics_app).await;
    });

    let distributor_listen_addr = config.distributor_listen_addr;
    let distributor_for_push = distributor.clone();
    let push_listener = tokio::spawn(async move {
        run_distributor_listener(distributor_listen_addr, distributor_for_push, registry).await
    });

    let gateway = Gateway::new(config, pipeline, distributor);

    tokio::select! {
        result = gateway.run() => result,
        result = push_listener => result.unwrap_or(Ok(())),
        _ = metrics_server => Ok(()),
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
            Ok(())
        }
    }
}

/// Accept receiver push connections (§4.4): each connection identifies its
/// subscription via [`read_hello`], the subscription's `master_id` is
/// resolved from the registry, and the rest of the connection is handed to
/// [`run_subscriber_session`] until it closes or errors.
async fn run_distributor_listener(
    listen_addr: std::net::SocketAddr,
    distributor: Arc<FanoutDistributor>,
    registry: Arc<SqliteRegistry>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen_addr).await?;
    info!(addr = %listen_addr, "distributor push listener started");

    loop {
        let (mut stream, peer_addr) = listener.accept().await?;
        let distributor = distributor.clone();
        let registry = registry.clone();

        tokio::spawn(async move {
            let hello = match read_hello(&mut stream).await {
                Ok(hello) => hello,
                Err(err) => {
                    warn!(%peer_addr, error = %err, "failed to read receiver hello");
                    return;
                }
            };

            let master_id = match registry.snapshot(&hello.subscription_id) {
                Ok(Some(snap)) => snap.master_id.clone(),
                Ok(None) => {
                    warn!(%peer_addr, subscription_id = %hello.subscription_id, "unknown subscription on distributor connect");
                    return;
                }
                Err(err) => {
                    warn!(%peer_addr, error = %err, "registry lookup failed for distributor connect");
                    return;
                }
            };

            if let Err(err) =
                run_subscriber_session(&mut stream, &distributor, &hello.subscription_id, &master_id).await
            {
                warn!(%peer_addr, subscription_id = %hello.subscription_id, error = %err, "subscriber session ended");
            }
        });
    }
}
