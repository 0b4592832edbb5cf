//! Fan-out Distributor (§4.4): consumes the Signal Log and pushes each
//! accepted signal to every subscription of its master, in per-stream
//! order, at least once.

pub mod hub;
pub mod transport;

use crate::guard::full_sync::exceeds_replay_cap;
use crate::log::SignalLog;
use crate::registry::state::SubscriptionState;
use crate::registry::SqliteRegistry;
use crate::signal::Signal;
use anyhow::Result;
use hub::SignalHub;
use std::sync::Arc;
use tracing::{info, warn};

/// One subscriber's live push channel plus its full-sync replay cap.
pub struct FanoutDistributor {
    registry: Arc<SqliteRegistry>,
    log: Arc<dyn SignalLog>,
    hub: Arc<SignalHub>,
    suppress_non_synced_push: bool,
    full_sync_max_replay: u64,
}

impl FanoutDistributor {
    pub fn new(
        registry: Arc<SqliteRegistry>,
        log: Arc<dyn SignalLog>,
        hub: Arc<SignalHub>,
        suppress_non_synced_push: bool,
        full_sync_max_replay: u64,
    ) -> Self {
        Self { registry, log, hub, suppress_non_synced_push, full_sync_max_replay }
    }

    /// Publish a freshly-appended signal to every live tap for its master
    /// (called by the gateway right after a successful log append).
    pub fn publish(&self, signal: &Signal) {
        self.hub.publish(&signal.master_id, signal.clone());
    }

    /// Whether the distributor should push to this subscription right now,
    /// applying the non-SYNCED suppression policy (§4.4, resolved default:
    /// suppress unless configured otherwise).
    pub fn should_push(&self, state: SubscriptionState) -> bool {
        if state == SubscriptionState::Synced {
            return true;
        }
        !self.suppress_non_synced_push
    }

    /// Replay every signal after `have_through` for `master_id`, honoring
    /// the replay cap (§5 "Full-sync replay is bounded"). Returns the
    /// signals to push, in order, or `None` if the span exceeds the cap
    /// (caller leaves the subscription in `DEGRADED_GAP`).
    pub fn full_sync_replay(
        &self,
        master_id: &str,
        have_through: i64,
        limit: u64,
    ) -> Result<Option<Vec<Signal>>> {
        let head = self.log.highest_sequence(master_id)?.unwrap_or(have_through);
        if exceeds_replay_cap(have_through, head, self.full_sync_max_replay) {
            warn!(master_id, have_through, head, "full sync exceeds replay cap");
            return Ok(None);
        }
        let signals = self.log.read_from(master_id, have_through, limit)?;
        Ok(Some(signals))
    }

    /// Advance a subscription's server-side delivery cursor after a
    /// positive receiver ack (§4.4 "Delivery cursor").
    pub fn ack_delivery(&self, subscription_id: &str, sequence_number: i64) -> Result<()> {
        self.registry
            .advance_last_accepted_sequence(subscription_id, sequence_number)?;
        Ok(())
    }

    /// Discover every subscription for a master, for seeding new push taps
    /// when a new signal arrives for a previously-unseen master.
    pub fn subscribers_of(&self, master_id: &str) -> Result<Vec<String>> {
        Ok(self
            .registry
            .subscriptions_for_master(master_id)?
            .into_iter()
            .map(|s| s.subscription_id)
            .collect())
    }
}
