//! ExecutionGuard binary (§4.5): receiver-side admission pipeline. Connects
//! to the Fan-out Distributor's push port, runs every delivered signal
//! through the six-guard pipeline, and places orders on the local host
//! terminal.
//!
//! Usage:
//!   execution-guard --subscription-id sub-1 --distributor-addr 127.0.0.1:7430

use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use signalplane::config::GuardConfig;
use signalplane::guard::session::run_session;
use signalplane::guard::ExecutionGuard;
use signalplane::host::StubHostTerminal;
use signalplane::quote::{HttpQuoteSource, Quote, StaticQuoteSource};
use signalplane::registry::Policy;
use signalplane::sink::SqliteProtectionEventSink;
use signalplane::wallet::{HttpWalletOracle, StaticWalletOracle};

#[derive(Parser, Debug)]
#[command(name = "execution-guard")]
#[command(about = "ExecutionGuard: receiver-side admission pipeline for one subscription")]
struct Args {
    #[arg(long, env = "GUARD_SUBSCRIPTION_ID")]
    subscription_id: String,

    #[arg(long, env = "GUARD_DISTRIBUTOR_ADDR", default_value = "127.0.0.1:7430")]
    distributor_addr: String,

    #[arg(long, env = "SIGNALPLANE_DB_PATH", default_value = "./signalplane.db")]
    db_path: String,

    #[arg(long, env = "GUARD_SEQUENCE_FILE_PATH", default_value = "./guard_sequence.bin")]
    sequence_file_path: std::path::PathBuf,

    #[arg(long, env = "GUARD_MAX_PRICE_DEVIATION_PIPS", default_value_t = 50.0)]
    max_price_deviation_pips: f64,

    #[arg(long, env = "GUARD_MAX_TTL_MS", default_value_t = 5_000)]
    max_ttl_ms: i64,

    #[arg(long, env = "GUARD_MAX_LOT", default_value_t = 10.0)]
    max_lot: f64,

    #[arg(long, env = "GUARD_SECRET_KEY_REF")]
    secret_key_ref: String,

    /// Optional HTTP wallet oracle base URL; falls back to a static
    /// always-funded oracle when unset (lab/dev mode).
    #[arg(long, env = "GUARD_WALLET_ORACLE_URL")]
    wallet_oracle_url: Option<String>,

    /// Optional HTTP quote source base URL; falls back to a static quote
    /// seeded from `--quote-bid`/`--quote-ask` when unset.
    #[arg(long, env = "GUARD_QUOTE_SOURCE_URL")]
    quote_source_url: Option<String>,

    #[arg(long, default_value_t = 1.1000)]
    quote_bid: f64,

    #[arg(long, default_value_t = 1.1002)]
    quote_ask: f64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(subscription_id = %args.subscription_id, "starting execution guard");

    let guard_config = GuardConfig {
        sequence_file_path: args.sequence_file_path.clone(),
        ..GuardConfig::from_env()
    };

    let policy = Policy {
        max_price_deviation_pips: args.max_price_deviation_pips,
        max_ttl_ms: args.max_ttl_ms,
        max_lot: args.max_lot,
        secret_key_ref: args.secret_key_ref,
    };

    let wallet: Arc<dyn signalplane::wallet::WalletOracle> = match args.wallet_oracle_url {
        Some(url) => Arc::new(HttpWalletOracle::new(url)),
        None => Arc::new(StaticWalletOracle::new(true)),
    };

    let quotes: Arc<dyn signalplane::quote::QuoteSource> = match args.quote_source_url {
        Some(url) => Arc::new(HttpQuoteSource::new(url)),
        None => Arc::new(StaticQuoteSource::new(Quote {
            bid: args.quote_bid,
            ask: args.quote_ask,
            digits: 5,
            point: 0.00001,
        })),
    };

    let host = Arc::new(StubHostTerminal::new());
    let sink = Arc::new(SqliteProtectionEventSink::new(&args.db_path)?);

    let guard = Arc::new(ExecutionGuard::new(
        args.subscription_id.clone(),
        policy,
        wallet,
        quotes,
        host,
        sink,
        &guard_config,
    )?);

    loop {
        match TcpStream::connect(&args.distributor_addr).await {
            Ok(mut stream) => {
                info!(addr = %args.distributor_addr, "connected to distributor");
                if let Err(err) =
                    signalplane::fanout::transport::send_hello(&mut stream, &args.subscription_id).await
                {
                    warn!(error = %err, "failed to send receiver hello, reconnecting");
                } else if let Err(err) = run_session(&mut stream, &guard).await {
                    warn!(error = %err, "guard session ended, reconnecting");
                }
            }
            Err(err) => {
                warn!(error = %err, addr = %args.distributor_addr, "failed to connect, retrying");
            }
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}
