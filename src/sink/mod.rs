//! Protection Event Sink (§4.6): append-only, best-effort record of every
//! guard decision. Feeds the Trust Loop and the admin operator view (§4.8).

pub mod sqlite_sink;

use crate::error::GuardRejection;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Why an event was recorded. `Success` is the one non-rejection case; it
/// carries the same `+1` weight the Trust Loop aggregates alongside the
/// negative weights on `GuardRejection::trust_delta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventReason {
    Success,
    Rejection(GuardRejection),
}

impl EventReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Rejection(r) => r.as_str(),
        }
    }

    pub fn trust_delta(&self) -> i32 {
        match self {
            Self::Success => 1,
            Self::Rejection(r) => r.trust_delta(),
        }
    }
}

/// A single recorded decision (§3 `ProtectionEvent`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionEvent {
    pub subscription_id: String,
    pub event_time_ms: i64,
    pub signal_sequence: i64,
    pub generated_at_ms: i64,
    pub arrival_time_ms: i64,
    pub reason: EventReason,
    pub observed_latency_ms: i64,
    pub observed_deviation_pips: Option<f64>,
    pub state_at_event: String,
    pub wallet_balance_known: Option<bool>,
}

/// Append-only sink. Writes are best-effort: callers must tolerate a write
/// failure without treating it as a guard-pipeline failure (§4.6 "must
/// tolerate receiver disconnection; lost events are acceptable").
pub trait ProtectionEventSink: Send + Sync {
    fn record(&self, event: &ProtectionEvent) -> Result<()>;

    /// Events for one subscription within `[since_ms, now]`, newest first,
    /// capped at `limit` — backs both the Trust Loop's aggregation window
    /// and the admin operator view (§4.8).
    fn recent_for_subscription(
        &self,
        subscription_id: &str,
        since_ms: i64,
        limit: u64,
    ) -> Result<Vec<ProtectionEvent>>;

    /// Retention sweep: drop events older than `before_ms`.
    fn trim(&self, before_ms: i64) -> Result<u64>;
}

pub use sqlite_sink::SqliteProtectionEventSink;
