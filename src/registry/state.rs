//! Subscription state machine (§4.3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Synced,
    DegradedGap,
    LockedNoFunds,
    PausedToxic,
    SuspendedAdmin,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "SYNCED",
            Self::DegradedGap => "DEGRADED_GAP",
            Self::LockedNoFunds => "LOCKED_NO_FUNDS",
            Self::PausedToxic => "PAUSED_TOXIC",
            Self::SuspendedAdmin => "SUSPENDED_ADMIN",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "SYNCED" => Some(Self::Synced),
            "DEGRADED_GAP" => Some(Self::DegradedGap),
            "LOCKED_NO_FUNDS" => Some(Self::LockedNoFunds),
            "PAUSED_TOXIC" => Some(Self::PausedToxic),
            "SUSPENDED_ADMIN" => Some(Self::SuspendedAdmin),
            _ => None,
        }
    }
}

/// Events that can drive a subscription's state transition (§4.3 table
/// columns). `DeliveryOk` is the only event with no transition out of most
/// states; it exists so callers can route "nothing interesting happened"
/// through the same apply path as the others.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    DeliveryOk,
    ReceiverReportedGap,
    WalletEmpty,
    TrustBelowThreshold,
    AdminSuspend,
    FundsRestored,
    TrustRecovered,
    AdminResume,
    FullSyncDone,
}

/// Apply the §4.3 transition table. Returns `None` when the event has no
/// effect in the given state (the `—` cells of the table) — callers should
/// treat that as "state unchanged", not as an error.
pub fn transition(current: SubscriptionState, event: StateEvent) -> Option<SubscriptionState> {
    use StateEvent::*;
    use SubscriptionState::*;

    match (current, event) {
        // Admin suspend is reachable from every state.
        (_, AdminSuspend) => Some(SuspendedAdmin),

        (Synced, DeliveryOk) => Some(Synced),
        (Synced, ReceiverReportedGap) => Some(DegradedGap),
        (Synced, WalletEmpty) => Some(LockedNoFunds),
        (Synced, TrustBelowThreshold) => Some(PausedToxic),

        (DegradedGap, ReceiverReportedGap) => Some(DegradedGap),
        (DegradedGap, TrustBelowThreshold) => Some(PausedToxic),
        (DegradedGap, FullSyncDone) => Some(Synced),

        (LockedNoFunds, WalletEmpty) => Some(LockedNoFunds),
        (LockedNoFunds, FundsRestored) => Some(Synced),

        (PausedToxic, TrustBelowThreshold) => Some(PausedToxic),
        (PausedToxic, TrustRecovered) => Some(Synced),

        (SuspendedAdmin, AdminResume) => Some(Synced),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StateEvent::*;
    use SubscriptionState::*;

    #[test]
    fn happy_path_stays_synced() {
        assert_eq!(transition(Synced, DeliveryOk), Some(Synced));
    }

    #[test]
    fn gap_then_full_sync_returns_to_synced() {
        assert_eq!(transition(Synced, ReceiverReportedGap), Some(DegradedGap));
        assert_eq!(transition(DegradedGap, FullSyncDone), Some(Synced));
    }

    #[test]
    fn admin_suspend_overrides_any_state() {
        for s in [Synced, DegradedGap, LockedNoFunds, PausedToxic, SuspendedAdmin] {
            assert_eq!(transition(s, AdminSuspend), Some(SuspendedAdmin));
        }
    }

    #[test]
    fn admin_resume_only_from_suspended() {
        assert_eq!(transition(SuspendedAdmin, AdminResume), Some(Synced));
        assert_eq!(transition(Synced, AdminResume), None);
    }

    #[test]
    fn wallet_empty_only_applies_from_synced_or_locked() {
        assert_eq!(transition(Synced, WalletEmpty), Some(LockedNoFunds));
        assert_eq!(transition(LockedNoFunds, WalletEmpty), Some(LockedNoFunds));
        assert_eq!(transition(DegradedGap, WalletEmpty), None);
        assert_eq!(transition(PausedToxic, WalletEmpty), None);
    }

    #[test]
    fn trust_recovered_only_from_paused_toxic() {
        assert_eq!(transition(PausedToxic, TrustRecovered), Some(Synced));
        assert_eq!(transition(DegradedGap, TrustRecovered), None);
    }
}
