//! Trust Loop + Admin Control Plane binary (§4.6, §4.8): the background
//! reputation/auto-pause job and the operator-facing HTTP API share one
//! process since both are read/write front ends onto the same Subscription
//! Registry, Protection Event Sink, and Trust Store.
//!
//! Usage:
//!   trust-loop --tick-interval-secs 30 --admin-listen-addr 0.0.0.0:7421

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use signalplane::admin::api::AdminApiState;
use signalplane::auth::{AdminStore, AuthState, JwtHandler};
use signalplane::config::{AdminConfig, TrustLoopConfig};
use signalplane::log::sqlite_log::SqliteSignalLog;
use signalplane::log::SignalLog;
use signalplane::registry::SqliteRegistry;
use signalplane::sink::{ProtectionEventSink, SqliteProtectionEventSink};
use signalplane::trust::store::TrustStore;
use signalplane::trust::TrustLoop;

#[derive(Parser, Debug)]
#[command(name = "trust-loop")]
#[command(about = "Trust Score / Auto-Pause Loop plus the admin control-plane HTTP API")]
struct Args {
    #[arg(long, env = "SIGNALPLANE_DB_PATH", default_value = "./signalplane.db")]
    db_path: String,

    #[arg(long, env = "TRUST_STORE_DB_PATH", default_value = "./trust_store.db")]
    trust_store_db_path: String,

    #[arg(long, env = "ADMIN_PRINCIPALS_DB_PATH", default_value = "./admin_principals.db")]
    admin_principals_db_path: String,

    #[arg(long, env = "ADMIN_LISTEN_ADDR")]
    admin_listen_addr: Option<String>,

    #[arg(long, env = "ADMIN_JWT_SECRET")]
    admin_jwt_secret: Option<String>,

    #[arg(long, env = "TRUST_METRICS_PORT", default_value_t = 9101)]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("starting trust loop and admin control plane");

    let prometheus_handle = signalplane::metrics::install_recorder();

    let registry = Arc::new(SqliteRegistry::new(&args.db_path)?);
    let sink: Arc<dyn ProtectionEventSink> = Arc::new(SqliteProtectionEventSink::new(&args.db_path)?);
    let trust_store = Arc::new(TrustStore::new(&args.trust_store_db_path)?);
    let log: Arc<dyn SignalLog> = Arc::new(SqliteSignalLog::new(&args.db_path, 4)?);

    let trust_loop = TrustLoop::new(
        registry.clone(),
        sink.clone(),
        trust_store.clone(),
        log,
        TrustLoopConfig::from_env(),
    );

    let mut admin_config = AdminConfig::from_env();
    if let Some(addr) = &args.admin_listen_addr {
        admin_config.listen_addr = addr.parse()?;
    }
    if let Some(secret) = args.admin_jwt_secret {
        admin_config.jwt_secret = secret;
    }

    let admin_store = Arc::new(AdminStore::new(&args.admin_principals_db_path)?);
    let jwt_handler = Arc::new(JwtHandler::new(admin_config.jwt_secret.clone()));
    let auth_state = AuthState::new(admin_store, jwt_handler);

    let admin_state = AdminApiState { registry: registry.clone(), sink, trust_store };

    let metrics_addr: std::net::SocketAddr = ([0, 0, 0, 0], args.metrics_port).into();
    let metrics_handle = prometheus_handle.clone();
    let metrics_app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = metrics_handle.clone();
            async move { handle.render() }
        }),
    );
    let metrics_server = tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(metrics_addr).await.unwrap();
        let _ = axum::serve(listener, metrics_app).await;
    });

    let admin_server = tokio::spawn(signalplane::admin::serve(
        admin_config,
        auth_state,
        admin_state,
        prometheus_handle,
    ));

    tokio::select! {
        _ = trust_loop.run() => {
            info!("trust loop exited");
        }
        _ = admin_server => {
            info!("admin control plane exited");
        }
        _ = metrics_server => {
            info!("metrics server exited");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
