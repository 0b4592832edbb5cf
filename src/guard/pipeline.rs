//! The fixed six-guard admission pipeline (§4.5). Short-circuits on first
//! failure; every branch, success or rejection, records a
//! [`ProtectionEvent`] through the sink.

use crate::config::{GuardConfig, WalletUnavailablePolicy};
use crate::error::GuardRejection;
use crate::host::{HostTerminal, OrderAck, OrderRequest};
use crate::quote::QuoteSource;
use crate::registry::Policy;
use crate::signal::{Side, Signal};
use crate::sink::{EventReason, ProtectionEvent, ProtectionEventSink};
use crate::wallet::WalletOracle;
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;

use super::full_sync::SyncRequest;
use super::sequence_file::SequenceFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalState {
    Synced,
    DegradedGap,
    LockedNoFunds,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GuardOutcome {
    Accepted(OrderAck),
    Rejected {
        reason: GuardRejection,
        sync_request: Option<SyncRequest>,
    },
}

/// Receiver-local admission gatekeeper. One instance per subscription,
/// colocated with the subscriber's terminal process.
pub struct ExecutionGuard {
    subscription_id: String,
    policy: Mutex<Policy>,
    wallet: Arc<dyn WalletOracle>,
    quotes: Arc<dyn QuoteSource>,
    host: Arc<dyn HostTerminal>,
    sink: Arc<dyn ProtectionEventSink>,
    sequence_file: SequenceFile,
    last_accepted_sequence: Mutex<i64>,
    state: Mutex<LocalState>,
    wallet_unavailable_policy: WalletUnavailablePolicy,
}

impl ExecutionGuard {
    pub fn new(
        subscription_id: String,
        policy: Policy,
        wallet: Arc<dyn WalletOracle>,
        quotes: Arc<dyn QuoteSource>,
        host: Arc<dyn HostTerminal>,
        sink: Arc<dyn ProtectionEventSink>,
        config: &GuardConfig,
    ) -> Result<Self> {
        let sequence_file = SequenceFile::new(config.sequence_file_path.clone());
        let last_accepted_sequence = sequence_file.load()? as i64;
        Ok(Self {
            subscription_id,
            policy: Mutex::new(policy),
            wallet,
            quotes,
            host,
            sink,
            sequence_file,
            last_accepted_sequence: Mutex::new(last_accepted_sequence),
            state: Mutex::new(LocalState::Synced),
            wallet_unavailable_policy: config.wallet_unavailable_policy,
        })
    }

    pub fn update_policy(&self, policy: Policy) {
        *self.policy.lock() = policy;
    }

    pub fn local_state(&self) -> LocalState {
        *self.state.lock()
    }

    pub fn last_accepted_sequence(&self) -> i64 {
        *self.last_accepted_sequence.lock()
    }

    /// Mark the subscription synced again after a successful full sync
    /// (§4.3 `full-sync done` event, applied locally).
    pub fn mark_synced(&self) {
        *self.state.lock() = LocalState::Synced;
    }

    fn reference_price(side: Side, bid: f64, ask: f64) -> f64 {
        match side {
            Side::Buy => ask,
            Side::Sell => bid,
            Side::Close => (bid + ask) / 2.0,
        }
    }

    fn record(&self, event: ProtectionEvent) {
        // Best-effort: a sink write failure must not fail the pipeline decision.
        let _ = self.sink.record(&event);
    }

    fn base_event(&self, signal: &Signal, now_ms: i64, reason: EventReason) -> ProtectionEvent {
        ProtectionEvent {
            subscription_id: self.subscription_id.clone(),
            event_time_ms: now_ms,
            signal_sequence: signal.sequence_number,
            generated_at_ms: signal.generated_at_ms,
            arrival_time_ms: signal.server_arrival_time.unwrap_or(now_ms),
            reason,
            observed_latency_ms: now_ms - signal.generated_at_ms,
            observed_deviation_pips: None,
            state_at_event: format!("{:?}", self.local_state()),
            wallet_balance_known: None,
        }
    }

    /// Run the full six-guard pipeline for a signal delivered over the
    /// normal (non-recovery) channel.
    pub async fn process(&self, signal: &Signal, now_ms: i64) -> Result<GuardOutcome> {
        self.process_inner(signal, now_ms, false).await
    }

    /// Process a signal delivered during full-sync replay: bypasses only
    /// the state guard (§4.5 "a dedicated entry point that bypasses only
    /// this guard while still advancing the sequence one at a time").
    pub async fn process_recovery(&self, signal: &Signal, now_ms: i64) -> Result<GuardOutcome> {
        self.process_inner(signal, now_ms, true).await
    }

    async fn process_inner(
        &self,
        signal: &Signal,
        now_ms: i64,
        is_recovery: bool,
    ) -> Result<GuardOutcome> {
        let n = signal.sequence_number;

        // 1. Sequence guard.
        let last = *self.last_accepted_sequence.lock();
        if n <= last {
            let reason = if n == last {
                GuardRejection::Duplicate
            } else {
                GuardRejection::Replay
            };
            self.record(self.base_event(signal, now_ms, EventReason::Rejection(reason)));
            return Ok(GuardOutcome::Rejected { reason, sync_request: None });
        }
        if n > last + 1 {
            *self.state.lock() = LocalState::DegradedGap;
            self.record(self.base_event(
                signal,
                now_ms,
                EventReason::Rejection(GuardRejection::SequenceGap),
            ));
            return Ok(GuardOutcome::Rejected {
                reason: GuardRejection::SequenceGap,
                sync_request: Some(SyncRequest {
                    subscription_id: self.subscription_id.clone(),
                    have_through: last,
                }),
            });
        }

        // 2. State guard (bypassed for recovery replay).
        if !is_recovery && self.local_state() != LocalState::Synced {
            self.record(self.base_event(
                signal,
                now_ms,
                EventReason::Rejection(GuardRejection::StateLocked),
            ));
            return Ok(GuardOutcome::Rejected {
                reason: GuardRejection::StateLocked,
                sync_request: None,
            });
        }

        let policy = self.policy.lock().clone();

        // 3. TTL guard.
        let age_ms = now_ms - signal.generated_at_ms;
        if age_ms > policy.max_ttl_ms {
            self.record(self.base_event(
                signal,
                now_ms,
                EventReason::Rejection(GuardRejection::TtlExpired),
            ));
            return Ok(GuardOutcome::Rejected {
                reason: GuardRejection::TtlExpired,
                sync_request: None,
            });
        }

        // 4. Price-deviation guard.
        let quote = self.quotes.quote(&signal.symbol).await?;
        let reference = Self::reference_price(signal.side, quote.bid, quote.ask);
        let deviation = quote.deviation_pips(signal.price, reference);
        if deviation > policy.max_price_deviation_pips {
            let mut event = self.base_event(
                signal,
                now_ms,
                EventReason::Rejection(GuardRejection::PriceDeviation),
            );
            event.observed_deviation_pips = Some(deviation);
            self.record(event);
            return Ok(GuardOutcome::Rejected {
                reason: GuardRejection::PriceDeviation,
                sync_request: None,
            });
        }

        // 5. Fund guard.
        let has_funds = match self.wallet.has_funds(&self.subscription_id).await {
            Ok(v) => Some(v),
            Err(_) => None,
        };
        let funded = has_funds.unwrap_or(matches!(
            self.wallet_unavailable_policy,
            WalletUnavailablePolicy::FailOpen
        ));
        if !funded {
            *self.state.lock() = LocalState::LockedNoFunds;
            let mut event = self.base_event(
                signal,
                now_ms,
                EventReason::Rejection(GuardRejection::InsufficientFunds),
            );
            event.wallet_balance_known = has_funds;
            self.record(event);
            return Ok(GuardOutcome::Rejected {
                reason: GuardRejection::InsufficientFunds,
                sync_request: None,
            });
        }

        // 6. Signature guard.
        if !signal.verify_signature(policy.secret_key_ref.as_bytes()) {
            self.record(self.base_event(
                signal,
                now_ms,
                EventReason::Rejection(GuardRejection::InvalidSignature),
            ));
            return Ok(GuardOutcome::Rejected {
                reason: GuardRejection::InvalidSignature,
                sync_request: None,
            });
        }

        // All six guards passed: persist before placing the order.
        self.sequence_file.store(n as u64)?;

        let request = OrderRequest::from(signal);
        match self.host.place_order(request).await {
            Ok(ack) => {
                *self.last_accepted_sequence.lock() = n;
                self.record(self.base_event(signal, now_ms, EventReason::Success));
                Ok(GuardOutcome::Accepted(ack))
            }
            Err(_) => {
                // Roll back the persisted sequence; this was an
                // execution-failure, not a protection event (§4.5 step 4).
                self.sequence_file.store(last as u64)?;
                Ok(GuardOutcome::Rejected {
                    reason: GuardRejection::OrderPlacementFailed,
                    sync_request: None,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::StubHostTerminal;
    use crate::quote::{Quote, StaticQuoteSource};
    use crate::sink::SqliteProtectionEventSink;
    use crate::wallet::StaticWalletOracle;

    fn test_policy(secret: &str) -> Policy {
        Policy {
            max_price_deviation_pips: 50.0,
            max_ttl_ms: 5_000,
            max_lot: 10.0,
            secret_key_ref: secret.to_string(),
        }
    }

    fn test_quote() -> Quote {
        Quote { bid: 1.1000, ask: 1.1002, digits: 5, point: 0.00001 }
    }

    fn sample_signal(seq: i64, generated_at_ms: i64, secret: &str) -> Signal {
        let mut s = Signal {
            subscription_id: "sub-1".to_string(),
            master_id: "master-1".to_string(),
            sequence_number: seq,
            generated_at_ms,
            symbol: "EURUSD".to_string(),
            side: Side::Buy,
            volume: 1.0,
            price: 1.1002,
            stop_loss: 1.0950,
            take_profit: 1.1050,
            signature: String::new(),
            server_arrival_time: Some(generated_at_ms + 5),
        };
        s.signature = s.sign(secret.as_bytes());
        s
    }

    fn build_guard(secret: &str, db_path: &str, seq_path: &std::path::Path) -> ExecutionGuard {
        let wallet = Arc::new(StaticWalletOracle::new(true));
        let quotes = Arc::new(StaticQuoteSource::new(test_quote()));
        let host = Arc::new(StubHostTerminal::new());
        let sink = Arc::new(SqliteProtectionEventSink::new(db_path).unwrap());
        let config = GuardConfig {
            sequence_file_path: seq_path.to_path_buf(),
            ..GuardConfig::default()
        };
        ExecutionGuard::new(
            "sub-1".to_string(),
            test_policy(secret),
            wallet,
            quotes,
            host,
            sink,
            &config,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn accepts_a_well_formed_signal() {
        let temp_db = tempfile::NamedTempFile::new().unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = build_guard("secret", temp_db.path().to_str().unwrap(), &temp_dir.path().join("seq.bin"));

        let signal = sample_signal(1, 1_700_000_000_000, "secret");
        let outcome = guard.process(&signal, 1_700_000_000_010).await.unwrap();
        assert!(matches!(outcome, GuardOutcome::Accepted(_)));
        assert_eq!(guard.last_accepted_sequence(), 1);
    }

    #[tokio::test]
    async fn duplicate_sequence_is_rejected_without_state_change() {
        let temp_db = tempfile::NamedTempFile::new().unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = build_guard("secret", temp_db.path().to_str().unwrap(), &temp_dir.path().join("seq.bin"));

        let first = sample_signal(1, 1_700_000_000_000, "secret");
        guard.process(&first, 1_700_000_000_010).await.unwrap();

        let replay = sample_signal(1, 1_700_000_000_000, "secret");
        let outcome = guard.process(&replay, 1_700_000_000_020).await.unwrap();
        assert_eq!(
            outcome,
            GuardOutcome::Rejected { reason: GuardRejection::Duplicate, sync_request: None }
        );
    }

    #[tokio::test]
    async fn gap_triggers_degraded_state_and_sync_request() {
        let temp_db = tempfile::NamedTempFile::new().unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = build_guard("secret", temp_db.path().to_str().unwrap(), &temp_dir.path().join("seq.bin"));

        let skip_ahead = sample_signal(5, 1_700_000_000_000, "secret");
        let outcome = guard.process(&skip_ahead, 1_700_000_000_010).await.unwrap();
        match outcome {
            GuardOutcome::Rejected { reason, sync_request: Some(req) } => {
                assert_eq!(reason, GuardRejection::SequenceGap);
                assert_eq!(req.have_through, 0);
            }
            other => panic!("expected sequence gap, got {other:?}"),
        }
        assert_eq!(guard.local_state(), LocalState::DegradedGap);
    }

    #[tokio::test]
    async fn expired_ttl_is_rejected() {
        let temp_db = tempfile::NamedTempFile::new().unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = build_guard("secret", temp_db.path().to_str().unwrap(), &temp_dir.path().join("seq.bin"));

        let stale = sample_signal(1, 1_700_000_000_000, "secret");
        let outcome = guard.process(&stale, 1_700_000_010_000).await.unwrap();
        assert_eq!(
            outcome,
            GuardOutcome::Rejected { reason: GuardRejection::TtlExpired, sync_request: None }
        );
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_last() {
        let temp_db = tempfile::NamedTempFile::new().unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = build_guard("right-secret", temp_db.path().to_str().unwrap(), &temp_dir.path().join("seq.bin"));

        let forged = sample_signal(1, 1_700_000_000_000, "wrong-secret");
        let outcome = guard.process(&forged, 1_700_000_000_010).await.unwrap();
        assert_eq!(
            outcome,
            GuardOutcome::Rejected { reason: GuardRejection::InvalidSignature, sync_request: None }
        );
    }

    #[tokio::test]
    async fn state_locked_rejects_while_degraded_but_recovery_bypasses_it() {
        let temp_db = tempfile::NamedTempFile::new().unwrap();
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = build_guard("secret", temp_db.path().to_str().unwrap(), &temp_dir.path().join("seq.bin"));

        let skip_ahead = sample_signal(5, 1_700_000_000_000, "secret");
        guard.process(&skip_ahead, 1_700_000_000_010).await.unwrap();
        assert_eq!(guard.local_state(), LocalState::DegradedGap);

        // Sequential recovery replay bypasses the state guard, one at a time.
        for seq in 1..=5 {
            let signal = sample_signal(seq, 1_700_000_000_000, "secret");
            let outcome = guard.process_recovery(&signal, 1_700_000_000_010).await.unwrap();
            assert!(matches!(outcome, GuardOutcome::Accepted(_)), "seq {seq} should be accepted");
        }
        guard.mark_synced();
        assert_eq!(guard.last_accepted_sequence(), 5);
    }
}
