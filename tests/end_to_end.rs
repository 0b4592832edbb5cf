//! End-to-end scenarios wiring the Signal Log, Subscription Registry,
//! Fan-out Distributor, and ExecutionGuard together in-process, the way
//! they'd actually run split across the `signal-gateway`/`execution-guard`
//! binaries but without the network hop.

use signalplane::config::GuardConfig;
use signalplane::fanout::hub::SignalHub;
use signalplane::fanout::FanoutDistributor;
use signalplane::guard::{ExecutionGuard, GuardOutcome};
use signalplane::host::{SimulatedHostTerminal, StubHostTerminal};
use signalplane::log::sqlite_log::SqliteSignalLog;
use signalplane::log::SignalLog;
use signalplane::quote::{Quote, StaticQuoteSource};
use signalplane::registry::{Policy, SqliteRegistry};
use signalplane::signal::{Side, Signal};
use signalplane::sink::SqliteProtectionEventSink;
use signalplane::trust::store::TrustStore;
use signalplane::trust::TrustLoop;
use signalplane::wallet::StaticWalletOracle;
use std::sync::Arc;
use std::time::Duration;

fn policy(secret: &str) -> Policy {
    Policy { max_price_deviation_pips: 20.0, max_ttl_ms: 5_000, max_lot: 10.0, secret_key_ref: secret.to_string() }
}

fn signal(master_id: &str, seq: i64, generated_at_ms: i64, price: f64, secret: &str) -> Signal {
    let mut s = Signal {
        subscription_id: master_id.to_string(),
        master_id: master_id.to_string(),
        sequence_number: seq,
        generated_at_ms,
        symbol: "EURUSD".to_string(),
        side: Side::Buy,
        volume: 1.0,
        price,
        stop_loss: price - 0.005,
        take_profit: price + 0.005,
        signature: String::new(),
        server_arrival_time: Some(generated_at_ms + 5),
    };
    s.signature = s.sign(secret.as_bytes());
    s
}

fn build_guard(secret: &str, dir: &tempfile::TempDir, sink_db: &str) -> ExecutionGuard {
    let config = GuardConfig { sequence_file_path: dir.path().join("seq.bin"), ..GuardConfig::default() };
    ExecutionGuard::new(
        "sub-1".to_string(),
        policy(secret),
        Arc::new(StaticWalletOracle::new(true)),
        Arc::new(StaticQuoteSource::new(Quote { bid: 1.0999, ask: 1.1001, digits: 5, point: 0.00001 })),
        Arc::new(StubHostTerminal::new()),
        Arc::new(SqliteProtectionEventSink::new(sink_db).unwrap()),
        &config,
    )
    .unwrap()
}

#[tokio::test]
async fn happy_path_signal_flows_from_log_through_guard() {
    let log_db = tempfile::NamedTempFile::new().unwrap();
    let sink_db = tempfile::NamedTempFile::new().unwrap();
    let seq_dir = tempfile::tempdir().unwrap();

    let log = SqliteSignalLog::new(log_db.path().to_str().unwrap(), 2).unwrap();
    let guard = build_guard("secret", &seq_dir, sink_db.path().to_str().unwrap());

    let sig = signal("master-1", 1, 1_700_000_000_000, 1.1000, "secret");
    assert!(log.append(&sig).unwrap());

    let outcome = guard.process(&sig, 1_700_000_000_020).await.unwrap();
    assert!(matches!(outcome, GuardOutcome::Accepted(_)));
    assert_eq!(guard.last_accepted_sequence(), 1);
}

#[tokio::test]
async fn replayed_sequence_is_rejected_without_retracting_cursor() {
    let sink_db = tempfile::NamedTempFile::new().unwrap();
    let seq_dir = tempfile::tempdir().unwrap();
    let guard = build_guard("secret", &seq_dir, sink_db.path().to_str().unwrap());

    let first = signal("master-1", 1, 1_700_000_000_000, 1.1000, "secret");
    guard.process(&first, 1_700_000_000_020).await.unwrap();

    let replay = signal("master-1", 1, 1_700_000_000_000, 1.1000, "secret");
    let outcome = guard.process(&replay, 1_700_000_000_030).await.unwrap();
    assert!(matches!(
        outcome,
        GuardOutcome::Rejected { reason: signalplane::error::GuardRejection::Duplicate, .. }
    ));
    assert_eq!(guard.last_accepted_sequence(), 1);
}

#[tokio::test]
async fn gap_then_full_sync_replay_recovers() {
    let log_db = tempfile::NamedTempFile::new().unwrap();
    let sink_db = tempfile::NamedTempFile::new().unwrap();
    let seq_dir = tempfile::tempdir().unwrap();

    let log = SqliteSignalLog::new(log_db.path().to_str().unwrap(), 2).unwrap();
    let guard = build_guard("secret", &seq_dir, sink_db.path().to_str().unwrap());

    for seq in 1..=5 {
        log.append(&signal("master-1", seq, 1_700_000_000_000, 1.1000, "secret")).unwrap();
    }

    // Receiver only saw seq 5 first: gap detected, sync requested.
    let ahead = signal("master-1", 5, 1_700_000_000_000, 1.1000, "secret");
    let outcome = guard.process(&ahead, 1_700_000_000_020).await.unwrap();
    match outcome {
        GuardOutcome::Rejected { sync_request: Some(req), .. } => assert_eq!(req.have_through, 0),
        other => panic!("expected sequence gap, got {other:?}"),
    }

    let missing = log.read_from("master-1", 0, 100).unwrap();
    assert_eq!(missing.len(), 5);
    for sig in &missing {
        let outcome = guard.process_recovery(sig, 1_700_000_000_020).await.unwrap();
        assert!(matches!(outcome, GuardOutcome::Accepted(_)));
    }
    guard.mark_synced();
    assert_eq!(guard.last_accepted_sequence(), 5);
}

#[tokio::test]
async fn expired_signal_is_rejected_on_ttl() {
    let sink_db = tempfile::NamedTempFile::new().unwrap();
    let seq_dir = tempfile::tempdir().unwrap();
    let guard = build_guard("secret", &seq_dir, sink_db.path().to_str().unwrap());

    let stale = signal("master-1", 1, 1_700_000_000_000, 1.1000, "secret");
    let outcome = guard.process(&stale, 1_700_000_010_000).await.unwrap();
    assert!(matches!(
        outcome,
        GuardOutcome::Rejected { reason: signalplane::error::GuardRejection::TtlExpired, .. }
    ));
}

#[tokio::test]
async fn price_deviation_beyond_policy_is_rejected() {
    let sink_db = tempfile::NamedTempFile::new().unwrap();
    let seq_dir = tempfile::tempdir().unwrap();
    let guard = build_guard("secret", &seq_dir, sink_db.path().to_str().unwrap());

    // Quote mid is ~1.1000; a price 1 full unit away is wildly outside 20 pips.
    let off_market = signal("master-1", 1, 1_700_000_000_000, 2.1000, "secret");
    let outcome = guard.process(&off_market, 1_700_000_000_020).await.unwrap();
    assert!(matches!(
        outcome,
        GuardOutcome::Rejected { reason: signalplane::error::GuardRejection::PriceDeviation, .. }
    ));
}

#[tokio::test]
async fn order_placement_failure_rolls_back_the_sequence() {
    let sink_db = tempfile::NamedTempFile::new().unwrap();
    let seq_dir = tempfile::tempdir().unwrap();
    let config = GuardConfig { sequence_file_path: seq_dir.path().join("seq.bin"), ..GuardConfig::default() };

    let guard = ExecutionGuard::new(
        "sub-1".to_string(),
        policy("secret"),
        Arc::new(StaticWalletOracle::new(true)),
        Arc::new(StaticQuoteSource::new(Quote { bid: 1.0999, ask: 1.1001, digits: 5, point: 0.00001 })),
        Arc::new(SimulatedHostTerminal::new(Duration::from_millis(0), 1.0)),
        Arc::new(SqliteProtectionEventSink::new(sink_db.path().to_str().unwrap()).unwrap()),
        &config,
    )
    .unwrap();

    let sig = signal("master-1", 1, 1_700_000_000_000, 1.1000, "secret");
    let outcome = guard.process(&sig, 1_700_000_000_020).await.unwrap();
    assert!(matches!(
        outcome,
        GuardOutcome::Rejected { reason: signalplane::error::GuardRejection::OrderPlacementFailed, .. }
    ));
    // Sequence wasn't consumed: the same signal can be retried.
    assert_eq!(guard.last_accepted_sequence(), 0);
}

#[tokio::test]
async fn toxic_flow_pauses_then_resumes_once_clean() {
    let registry_db = tempfile::NamedTempFile::new().unwrap();
    let sink_db = tempfile::NamedTempFile::new().unwrap();
    let trust_db = tempfile::NamedTempFile::new().unwrap();

    let registry = Arc::new(SqliteRegistry::new(registry_db.path().to_str().unwrap()).unwrap());
    let sink = Arc::new(SqliteProtectionEventSink::new(sink_db.path().to_str().unwrap()).unwrap());
    let store = Arc::new(TrustStore::new(trust_db.path().to_str().unwrap()).unwrap());
    let log_db = tempfile::NamedTempFile::new().unwrap();
    let log: Arc<dyn SignalLog> = Arc::new(SqliteSignalLog::new(log_db.path().to_str().unwrap(), 2).unwrap());

    registry.create("sub-1", "alice", "master-1", policy("secret")).unwrap();

    let now = 1_700_000_000_000i64;
    for i in 0..3 {
        sink.record(&signalplane::sink::ProtectionEvent {
            subscription_id: "sub-1".to_string(),
            event_time_ms: now - i * 1000,
            signal_sequence: i,
            generated_at_ms: now - i * 1000 - 10,
            arrival_time_ms: now - i * 1000 - 5,
            reason: signalplane::sink::EventReason::Rejection(signalplane::error::GuardRejection::InvalidSignature),
            observed_latency_ms: 15,
            observed_deviation_pips: None,
            state_at_event: "SYNCED".to_string(),
            wallet_balance_known: None,
        })
        .unwrap();
    }

    let config = signalplane::config::TrustLoopConfig::default();
    let trust_loop = TrustLoop::new(registry.clone(), sink, store, log, config);
    trust_loop.tick(now).await.unwrap();

    let snap = registry.snapshot("sub-1").unwrap().unwrap();
    assert_eq!(snap.state, signalplane::registry::state::SubscriptionState::PausedToxic);
}

#[tokio::test]
async fn fanout_suppresses_push_while_degraded_and_caps_full_sync_replay() {
    let registry_db = tempfile::NamedTempFile::new().unwrap();
    let log_db = tempfile::NamedTempFile::new().unwrap();
    let registry = Arc::new(SqliteRegistry::new(registry_db.path().to_str().unwrap()).unwrap());
    let log: Arc<dyn SignalLog> = Arc::new(SqliteSignalLog::new(log_db.path().to_str().unwrap(), 2).unwrap());
    let hub = Arc::new(SignalHub::new(16));
    registry.create("sub-1", "alice", "master-1", policy("secret")).unwrap();

    for seq in 1..=5 {
        log.append(&signal("master-1", seq, 1_700_000_000_000, 1.1000, "secret")).unwrap();
    }

    let distributor = FanoutDistributor::new(registry.clone(), log.clone(), hub, true, 3);
    assert!(distributor.full_sync_replay("master-1", 0, 100).unwrap().is_none());

    let generous = FanoutDistributor::new(registry, log, Arc::new(SignalHub::new(16)), true, 100);
    let replay = generous.full_sync_replay("master-1", 0, 100).unwrap().unwrap();
    assert_eq!(replay.len(), 5);
}
