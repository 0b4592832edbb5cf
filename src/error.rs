//! Closed error-kind sets for the replication core.
//!
//! Per the design notes, dynamic dispatch is replaced by a closed set of
//! variants here rather than a trait object: both the gateway's per-packet
//! rejection reason and the guard's per-signal rejection reason are fixed
//! enumerations, not a plugin chain.

use std::fmt;

/// Rejection reasons on the ingest (producer-facing) hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum GatewayRejection {
    InvalidCredential,
    InvalidSignature,
    ReplayOrDuplicate,
    ClockSkew,
    RateLimit,
    LogUnavailable,
    Timeout,
}

impl GatewayRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredential => "INVALID_CREDENTIAL",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::ReplayOrDuplicate => "REPLAY_OR_DUPLICATE",
            Self::ClockSkew => "CLOCK_SKEW",
            Self::RateLimit => "RATE_LIMIT",
            Self::LogUnavailable => "LOG_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for GatewayRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection reasons from the receiver-side ExecutionGuard pipeline.
///
/// Ordered to match the fixed guard pipeline (§4.5): sequence, state, ttl,
/// price deviation, funds, signature. `Duplicate`/`Replay` are the two
/// sub-classifications of `REPLAY_OR_DUPLICATE` at the sequence guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum GuardRejection {
    Duplicate,
    Replay,
    SequenceGap,
    StateLocked,
    TtlExpired,
    PriceDeviation,
    InsufficientFunds,
    InvalidSignature,
    OrderPlacementFailed,
}

impl GuardRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Duplicate => "DUPLICATE",
            Self::Replay => "REPLAY",
            Self::SequenceGap => "SEQUENCE_GAP",
            Self::StateLocked => "STATE_LOCKED",
            Self::TtlExpired => "TTL_EXPIRED",
            Self::PriceDeviation => "PRICE_DEVIATION",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::OrderPlacementFailed => "ORDER_PLACEMENT_FAILED",
        }
    }

    /// Trust-score weight applied by the Trust Loop (§4.6). Positive for the
    /// one non-rejection case (successful execution) callers pass through
    /// the same aggregation path.
    pub fn trust_delta(&self) -> i32 {
        match self {
            Self::TtlExpired => -5,
            Self::PriceDeviation => -3,
            Self::SequenceGap => -20,
            Self::InvalidSignature => -40,
            Self::Replay => -50,
            Self::Duplicate => -50,
            Self::StateLocked | Self::InsufficientFunds | Self::OrderPlacementFailed => 0,
        }
    }
}

impl fmt::Display for GuardRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced for recoverable, retried conditions (§7): bounded retry
/// with jitter at the call site, never blocking in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryableError {
    WalletLocked,
    VersionConflict,
}

impl fmt::Display for RetryableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WalletLocked => write!(f, "WALLET_LOCKED"),
            Self::VersionConflict => write!(f, "VERSION_CONFLICT"),
        }
    }
}

impl std::error::Error for RetryableError {}
