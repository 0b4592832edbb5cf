//! Runtime configuration, loaded from the environment (with `.env` support
//! for local development): every knob has a sane default and can be
//! overridden by an environment variable of the same name in
//! SCREAMING_SNAKE_CASE.

use std::net::SocketAddr;
use std::time::Duration;

/// Gateway (producer-facing hot path) configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address the ingest gateway listens on for framed producer connections.
    pub listen_addr: SocketAddr,
    /// Address the fan-out distributor listens on for receiver push
    /// connections (§4.4); `ExecutionGuard`'s `--distributor-addr` dials this.
    pub distributor_listen_addr: SocketAddr,
    /// Per-connection token-bucket cap (§4.1 back-pressure).
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
    /// Bounded-freshness guard window (§4.1 step 4).
    pub max_clock_skew: Duration,
    /// Deadline for a single packet's full pipeline (§5 cancellation).
    pub packet_deadline: Duration,
    /// Size of the bounded downstream log-client pool (§4.2, §9).
    pub log_pool_size: usize,
    /// Cap on concurrently-handled producer connections.
    pub max_connections: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7420".parse().unwrap(),
            distributor_listen_addr: "0.0.0.0:7430".parse().unwrap(),
            rate_limit_per_sec: 200,
            rate_limit_burst: 50,
            max_clock_skew: Duration::from_secs(60),
            packet_deadline: Duration::from_millis(50),
            log_pool_size: 64,
            max_connections: 10_000,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("GATEWAY_LISTEN_ADDR") {
            if let Ok(addr) = v.parse() {
                config.listen_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_DISTRIBUTOR_LISTEN_ADDR") {
            if let Ok(addr) = v.parse() {
                config.distributor_listen_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_RATE_LIMIT_PER_SEC") {
            if let Ok(n) = v.parse() {
                config.rate_limit_per_sec = n;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_RATE_LIMIT_BURST") {
            if let Ok(n) = v.parse() {
                config.rate_limit_burst = n;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_MAX_CLOCK_SKEW_SECS") {
            if let Ok(secs) = v.parse() {
                config.max_clock_skew = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_PACKET_DEADLINE_MS") {
            if let Ok(ms) = v.parse() {
                config.packet_deadline = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_LOG_POOL_SIZE") {
            if let Ok(n) = v.parse() {
                config.log_pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("GATEWAY_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                config.max_connections = n;
            }
        }

        config
    }
}

/// Trust loop (control plane) configuration.
#[derive(Debug, Clone)]
pub struct TrustLoopConfig {
    pub tick_interval: Duration,
    pub window: Duration,
    pub pause_threshold: i32,
    pub resume_threshold: i32,
    pub positive_drift_per_day: i32,
    /// How long the Protection Event Sink keeps events (§4.6 "bounded
    /// retention window"); swept once per tick alongside score recomputation.
    pub event_retention: Duration,
    /// Signal Log retention (§4.2 `trim`): how many sequence numbers behind
    /// the slowest subscriber's ack cursor to keep per master before
    /// trimming. Mirrors `GuardConfig::full_sync_max_replay` so a receiver
    /// that can still gap-recover never has its replay window trimmed out
    /// from under it.
    pub signal_log_retain_tail: u64,
}

impl Default for TrustLoopConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            window: Duration::from_secs(24 * 3600),
            pause_threshold: 50,
            resume_threshold: 50,
            positive_drift_per_day: 10,
            event_retention: Duration::from_secs(90 * 24 * 3600),
            signal_log_retain_tail: 100_000,
        }
    }
}

impl TrustLoopConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("TRUST_TICK_INTERVAL_SECS") {
            if let Ok(secs) = v.parse() {
                config.tick_interval = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("TRUST_WINDOW_SECS") {
            if let Ok(secs) = v.parse() {
                config.window = Duration::from_secs(secs);
            }
        }
        if let Ok(v) = std::env::var("TRUST_PAUSE_THRESHOLD") {
            if let Ok(n) = v.parse() {
                config.pause_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("TRUST_RESUME_THRESHOLD") {
            if let Ok(n) = v.parse() {
                config.resume_threshold = n;
            }
        }
        if let Ok(v) = std::env::var("TRUST_POSITIVE_DRIFT_PER_DAY") {
            if let Ok(n) = v.parse() {
                config.positive_drift_per_day = n;
            }
        }
        if let Ok(v) = std::env::var("PROTECTION_EVENT_RETENTION_DAYS") {
            if let Ok(days) = v.parse::<u64>() {
                config.event_retention = Duration::from_secs(days * 24 * 3600);
            }
        }
        if let Ok(v) = std::env::var("TRUST_SIGNAL_LOG_RETAIN_TAIL") {
            if let Ok(n) = v.parse() {
                config.signal_log_retain_tail = n;
            }
        }

        config
    }
}

/// How the ExecutionGuard's fund guard behaves when the wallet oracle is
/// unavailable. Preserved as configuration per §9's open question rather
/// than hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletUnavailablePolicy {
    /// Safer default: treat an unreachable oracle as insufficient funds.
    FailClosed,
    /// Treat an unreachable oracle as sufficient funds (advisory-only reading).
    FailOpen,
}

/// ExecutionGuard (receiver-side) configuration.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub sequence_file_path: std::path::PathBuf,
    pub wallet_unavailable_policy: WalletUnavailablePolicy,
    /// Whether the fan-out distributor (and therefore this receiver) suppresses
    /// push while the subscription is non-SYNCED. Preserved as a tunable (§9).
    pub suppress_non_synced_push: bool,
    pub full_sync_max_replay: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sequence_file_path: std::path::PathBuf::from("./guard_sequence.bin"),
            wallet_unavailable_policy: WalletUnavailablePolicy::FailClosed,
            suppress_non_synced_push: true,
            full_sync_max_replay: 100_000,
        }
    }
}

impl GuardConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("GUARD_SEQUENCE_FILE_PATH") {
            config.sequence_file_path = std::path::PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("GUARD_WALLET_UNAVAILABLE_POLICY") {
            config.wallet_unavailable_policy = match v.to_lowercase().as_str() {
                "fail_open" | "open" => WalletUnavailablePolicy::FailOpen,
                _ => WalletUnavailablePolicy::FailClosed,
            };
        }
        if let Ok(v) = std::env::var("GUARD_SUPPRESS_NON_SYNCED_PUSH") {
            if let Ok(b) = v.parse() {
                config.suppress_non_synced_push = b;
            }
        }
        if let Ok(v) = std::env::var("GUARD_FULL_SYNC_MAX_REPLAY") {
            if let Ok(n) = v.parse() {
                config.full_sync_max_replay = n;
            }
        }

        config
    }
}

/// Admin control-plane HTTP API configuration.
#[derive(Debug, Clone)]
pub struct AdminConfig {
    pub listen_addr: SocketAddr,
    pub jwt_secret: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:7421".parse().unwrap(),
            jwt_secret: "change-me-in-production".to_string(),
        }
    }
}

impl AdminConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("ADMIN_LISTEN_ADDR") {
            if let Ok(addr) = v.parse() {
                config.listen_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("ADMIN_JWT_SECRET") {
            config.jwt_secret = v;
        }

        config
    }
}
