//! Trust Score / Auto-Pause Loop (§4.6): periodic background job that
//! recomputes each subscriber's reputation from the Protection Event Sink
//! and, atomically, transitions the Subscription Registry to/from
//! `PAUSED_TOXIC`.

pub mod store;

use crate::config::TrustLoopConfig;
use crate::log::SignalLog;
use crate::registry::state::StateEvent;
use crate::registry::SqliteRegistry;
use crate::sink::ProtectionEventSink;
use anyhow::Result;
use std::sync::Arc;
use store::TrustStore;
use tracing::{debug, info, instrument};

/// Subscribers are processed in fixed-size batches so a single tick's wall
/// time is bounded regardless of subscriber-base size (§4.6 expansion note).
const BATCH_SIZE: usize = 200;

pub struct TrustLoop {
    registry: Arc<SqliteRegistry>,
    sink: Arc<dyn ProtectionEventSink>,
    store: Arc<TrustStore>,
    log: Arc<dyn SignalLog>,
    config: TrustLoopConfig,
}

impl TrustLoop {
    pub fn new(
        registry: Arc<SqliteRegistry>,
        sink: Arc<dyn ProtectionEventSink>,
        store: Arc<TrustStore>,
        log: Arc<dyn SignalLog>,
        config: TrustLoopConfig,
    ) -> Self {
        Self { registry, sink, store, log, config }
    }

    /// Run forever, ticking on `config.tick_interval`.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            interval.tick().await;
            if let Err(err) = self.tick(now_ms()).await {
                tracing::error!(error = %err, "trust loop tick failed");
            }
        }
    }

    /// One tick: recompute and (if crossing a threshold) transition every
    /// subscriber's subscriptions. Exposed directly for tests.
    #[instrument(skip(self))]
    pub async fn tick(&self, now_ms: i64) -> Result<()> {
        let started = std::time::Instant::now();
        let subscriber_ids = self.registry.all_subscriber_ids()?;

        let mut paused = 0u32;
        let mut resumed = 0u32;

        for batch in subscriber_ids.chunks(BATCH_SIZE) {
            for subscriber_id in batch {
                let (p, r) = self.process_subscriber(subscriber_id, now_ms)?;
                paused += p as u32;
                resumed += r as u32;
            }
            tokio::task::yield_now().await;
        }

        let retained_before_ms = now_ms - self.config.event_retention.as_millis() as i64;
        let trimmed = self.sink.trim(retained_before_ms)?;
        if trimmed > 0 {
            metrics::counter!("protection_event_retention_trimmed", trimmed);
            debug!(trimmed, retained_before_ms, "protection event retention sweep");
        }

        self.trim_signal_log()?;

        let elapsed = started.elapsed();
        metrics::histogram!("trust_loop_tick_duration_ms", elapsed.as_millis() as f64);
        metrics::counter!("trust_loop_pause_transitions", paused as u64);
        metrics::counter!("trust_loop_resume_transitions", resumed as u64);
        debug!(subscribers = subscriber_ids.len(), paused, resumed, ?elapsed, "trust loop tick complete");
        Ok(())
    }

    /// Lock-read-calculate-write-release for one subscriber (§4.6 steps 1-6).
    /// Returns `(paused, resumed)` flags for metrics.
    fn process_subscriber(&self, subscriber_id: &str, now_ms: i64) -> Result<(bool, bool)> {
        let lock = self.store.row_lock(subscriber_id);
        let _guard = lock.lock();

        let window_start_ms = now_ms - self.config.window.as_millis() as i64;

        let subscriptions = self.registry.subscriptions_for_subscriber(subscriber_id)?;

        let mut delta_sum: i32 = 0;
        let mut saw_negative = false;
        for subscription in &subscriptions {
            let events = self.sink.recent_for_subscription(
                &subscription.subscription_id,
                window_start_ms,
                10_000,
            )?;
            for event in &events {
                let delta = event.reason.trust_delta();
                delta_sum += delta;
                if delta < 0 {
                    saw_negative = true;
                }
            }
        }

        let mut new_score = store::INITIAL_SCORE + delta_sum;
        if !saw_negative {
            let prorated_drift = (self.config.positive_drift_per_day as f64
                * (self.config.tick_interval.as_secs_f64() / 86_400.0))
                .round() as i32;
            new_score += prorated_drift;
        }
        new_score = new_score.clamp(0, 100);

        self.store.set_score(subscriber_id, new_score, now_ms)?;

        let mut paused = false;
        let mut resumed = false;
        for subscription in &subscriptions {
            if new_score < self.config.pause_threshold
                && matches!(
                    subscription.state,
                    crate::registry::state::SubscriptionState::Synced
                        | crate::registry::state::SubscriptionState::DegradedGap
                )
            {
                self.registry
                    .apply_event(&subscription.subscription_id, StateEvent::TrustBelowThreshold)?;
                paused = true;
                info!(subscriber_id, subscription_id = %subscription.subscription_id, new_score, "trust score paused subscription");
            } else if new_score >= self.config.resume_threshold
                && subscription.state == crate::registry::state::SubscriptionState::PausedToxic
            {
                self.registry
                    .apply_event(&subscription.subscription_id, StateEvent::TrustRecovered)?;
                resumed = true;
                info!(subscriber_id, subscription_id = %subscription.subscription_id, new_score, "trust score resumed subscription");
            }
        }

        Ok((paused, resumed))
    }

    /// Signal Log retention sweep (§4.2 `trim`). Per master, keeps at least
    /// `signal_log_retain_tail` sequence numbers behind the slowest
    /// subscriber's ack cursor — a lagging subscriber's full-sync replay
    /// window is never trimmed out from under it.
    fn trim_signal_log(&self) -> Result<()> {
        for master_id in self.registry.all_master_ids()? {
            let subscriptions = self.registry.subscriptions_for_master(&master_id)?;
            let Some(floor) = subscriptions.iter().map(|s| s.last_accepted_sequence).min() else {
                continue;
            };
            let before_sequence = floor.saturating_sub(self.config.signal_log_retain_tail as i64);
            if before_sequence <= 0 {
                continue;
            }
            let trimmed = self.log.trim(&master_id, before_sequence)?;
            if trimmed > 0 {
                metrics::counter!("signal_log_retention_trimmed", trimmed);
                debug!(master_id, trimmed, before_sequence, "signal log retention sweep");
            }
        }
        Ok(())
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Policy;
    use crate::sink::{EventReason, ProtectionEvent, SqliteProtectionEventSink};
    use std::time::Duration;

    fn test_policy() -> Policy {
        Policy {
            max_price_deviation_pips: 50.0,
            max_ttl_ms: 5_000,
            max_lot: 10.0,
            secret_key_ref: "secret".to_string(),
        }
    }

    fn test_config() -> TrustLoopConfig {
        TrustLoopConfig {
            tick_interval: Duration::from_secs(30),
            window: Duration::from_secs(24 * 3600),
            pause_threshold: 50,
            resume_threshold: 50,
            positive_drift_per_day: 10,
            event_retention: Duration::from_secs(90 * 24 * 3600),
            signal_log_retain_tail: 100_000,
        }
    }

    fn test_log(dir: &tempfile::TempDir) -> Arc<dyn SignalLog> {
        Arc::new(
            crate::log::sqlite_log::SqliteSignalLog::new(
                dir.path().join("log.db").to_str().unwrap(),
                2,
            )
            .unwrap(),
        )
    }

    fn rejection_event(subscription_id: &str, reason: crate::error::GuardRejection, time_ms: i64) -> ProtectionEvent {
        ProtectionEvent {
            subscription_id: subscription_id.to_string(),
            event_time_ms: time_ms,
            signal_sequence: 1,
            generated_at_ms: time_ms - 10,
            arrival_time_ms: time_ms - 5,
            reason: EventReason::Rejection(reason),
            observed_latency_ms: 15,
            observed_deviation_pips: None,
            state_at_event: "SYNCED".to_string(),
            wallet_balance_known: None,
        }
    }

    #[test]
    fn repeated_invalid_signatures_pause_the_subscription() {
        let registry_db = tempfile::NamedTempFile::new().unwrap();
        let sink_db = tempfile::NamedTempFile::new().unwrap();
        let trust_db = tempfile::NamedTempFile::new().unwrap();

        let registry = Arc::new(SqliteRegistry::new(registry_db.path().to_str().unwrap()).unwrap());
        let sink = Arc::new(SqliteProtectionEventSink::new(sink_db.path().to_str().unwrap()).unwrap());
        let store = Arc::new(TrustStore::new(trust_db.path().to_str().unwrap()).unwrap());
        let log_dir = tempfile::tempdir().unwrap();

        registry.create("sub-1", "alice", "master-1", test_policy()).unwrap();

        let now = 1_700_000_000_000i64;
        for i in 0..2 {
            sink.record(&rejection_event("sub-1", crate::error::GuardRejection::InvalidSignature, now - i * 1000))
                .unwrap();
        }

        let trust_loop = TrustLoop::new(registry.clone(), sink, store, test_log(&log_dir), test_config());
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(trust_loop.tick(now)).unwrap();

        let snap = registry.snapshot("sub-1").unwrap().unwrap();
        assert_eq!(snap.state, crate::registry::state::SubscriptionState::PausedToxic);
    }

    #[test]
    fn clean_history_drifts_upward_and_resumes() {
        let registry_db = tempfile::NamedTempFile::new().unwrap();
        let sink_db = tempfile::NamedTempFile::new().unwrap();
        let trust_db = tempfile::NamedTempFile::new().unwrap();

        let registry = Arc::new(SqliteRegistry::new(registry_db.path().to_str().unwrap()).unwrap());
        let sink = Arc::new(SqliteProtectionEventSink::new(sink_db.path().to_str().unwrap()).unwrap());
        let store = Arc::new(TrustStore::new(trust_db.path().to_str().unwrap()).unwrap());
        let log_dir = tempfile::tempdir().unwrap();

        registry.create("sub-1", "alice", "master-1", test_policy()).unwrap();
        registry
            .apply_event("sub-1", StateEvent::TrustBelowThreshold)
            .unwrap();

        let trust_loop = TrustLoop::new(registry.clone(), sink, store, test_log(&log_dir), test_config());
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(trust_loop.tick(1_700_000_000_000)).unwrap();

        let snap = registry.snapshot("sub-1").unwrap().unwrap();
        assert_eq!(snap.state, crate::registry::state::SubscriptionState::Synced);
    }
}
