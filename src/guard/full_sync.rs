//! Full-sync types shared between the receiver (ExecutionGuard) and the
//! Fan-out Distributor (§4.5 "Full sync").

use serde::{Deserialize, Serialize};

/// Emitted by the receiver when the sequence guard detects a gap. Carries
/// the last sequence the receiver has locally accepted; the distributor
/// replays everything after it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub subscription_id: String,
    pub have_through: i64,
}

/// Full-sync replay is bounded (§5); beyond this many signals in one replay
/// the subscription remains `DEGRADED_GAP` pending operator action rather
/// than looping indefinitely.
pub fn exceeds_replay_cap(have_through: i64, head_sequence: i64, max_replay: u64) -> bool {
    let span = head_sequence - have_through;
    span > 0 && span as u64 > max_replay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_cap_is_allowed() {
        assert!(!exceeds_replay_cap(100, 150, 100));
    }

    #[test]
    fn beyond_cap_is_rejected() {
        assert!(exceeds_replay_cap(100, 10_200, 100));
    }
}
