//! SQLite-backed [`ProtectionEventSink`], time-partitioned by a plain
//! `event_time_ms` column with a retention sweep rather than physical
//! partitioning.

use super::{EventReason, ProtectionEvent, ProtectionEventSink};
use crate::error::GuardRejection;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection};

pub struct SqliteProtectionEventSink {
    conn: Mutex<Connection>,
}

impl SqliteProtectionEventSink {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open protection event sink db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS protection_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subscription_id TEXT NOT NULL,
                event_time_ms INTEGER NOT NULL,
                signal_sequence INTEGER NOT NULL,
                generated_at_ms INTEGER NOT NULL,
                arrival_time_ms INTEGER NOT NULL,
                reason TEXT NOT NULL,
                observed_latency_ms INTEGER NOT NULL,
                observed_deviation_pips REAL,
                state_at_event TEXT NOT NULL,
                wallet_balance_known INTEGER
            )",
            [],
        )
        .context("create protection_events table")?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_protection_events_sub_time
             ON protection_events (subscription_id, event_time_ms)",
            [],
        )
        .ok();

        Ok(Self { conn: Mutex::new(conn) })
    }
}

fn reason_to_str(reason: EventReason) -> String {
    reason.as_str().to_string()
}

fn reason_from_str(s: &str) -> EventReason {
    match s {
        "SUCCESS" => EventReason::Success,
        "DUPLICATE" => EventReason::Rejection(GuardRejection::Duplicate),
        "REPLAY" => EventReason::Rejection(GuardRejection::Replay),
        "SEQUENCE_GAP" => EventReason::Rejection(GuardRejection::SequenceGap),
        "STATE_LOCKED" => EventReason::Rejection(GuardRejection::StateLocked),
        "TTL_EXPIRED" => EventReason::Rejection(GuardRejection::TtlExpired),
        "PRICE_DEVIATION" => EventReason::Rejection(GuardRejection::PriceDeviation),
        "INSUFFICIENT_FUNDS" => EventReason::Rejection(GuardRejection::InsufficientFunds),
        "INVALID_SIGNATURE" => EventReason::Rejection(GuardRejection::InvalidSignature),
        "ORDER_PLACEMENT_FAILED" => EventReason::Rejection(GuardRejection::OrderPlacementFailed),
        _ => EventReason::Rejection(GuardRejection::StateLocked),
    }
}

impl ProtectionEventSink for SqliteProtectionEventSink {
    fn record(&self, event: &ProtectionEvent) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO protection_events
             (subscription_id, event_time_ms, signal_sequence, generated_at_ms, arrival_time_ms,
              reason, observed_latency_ms, observed_deviation_pips, state_at_event, wallet_balance_known)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                event.subscription_id,
                event.event_time_ms,
                event.signal_sequence,
                event.generated_at_ms,
                event.arrival_time_ms,
                reason_to_str(event.reason),
                event.observed_latency_ms,
                event.observed_deviation_pips,
                event.state_at_event,
                event.wallet_balance_known,
            ],
        )
        .context("insert protection event")?;
        Ok(())
    }

    fn recent_for_subscription(
        &self,
        subscription_id: &str,
        since_ms: i64,
        limit: u64,
    ) -> Result<Vec<ProtectionEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT subscription_id, event_time_ms, signal_sequence, generated_at_ms,
                    arrival_time_ms, reason, observed_latency_ms, observed_deviation_pips,
                    state_at_event, wallet_balance_known
             FROM protection_events
             WHERE subscription_id = ?1 AND event_time_ms >= ?2
             ORDER BY event_time_ms DESC
             LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![subscription_id, since_ms, limit as i64], |row| {
                let reason_str: String = row.get(5)?;
                let wallet_known: Option<i64> = row.get(9)?;
                Ok(ProtectionEvent {
                    subscription_id: row.get(0)?,
                    event_time_ms: row.get(1)?,
                    signal_sequence: row.get(2)?,
                    generated_at_ms: row.get(3)?,
                    arrival_time_ms: row.get(4)?,
                    reason: reason_from_str(&reason_str),
                    observed_latency_ms: row.get(6)?,
                    observed_deviation_pips: row.get(7)?,
                    state_at_event: row.get(8)?,
                    wallet_balance_known: wallet_known.map(|v| v != 0),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("collect protection events")?;
        Ok(rows)
    }

    fn trim(&self, before_ms: i64) -> Result<u64> {
        let conn = self.conn.lock();
        let deleted = conn
            .execute(
                "DELETE FROM protection_events WHERE event_time_ms < ?1",
                params![before_ms],
            )
            .context("trim protection events")?;
        Ok(deleted as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event(subscription_id: &str, time_ms: i64, reason: EventReason) -> ProtectionEvent {
        ProtectionEvent {
            subscription_id: subscription_id.to_string(),
            event_time_ms: time_ms,
            signal_sequence: 1,
            generated_at_ms: time_ms - 10,
            arrival_time_ms: time_ms - 5,
            reason,
            observed_latency_ms: 15,
            observed_deviation_pips: None,
            state_at_event: "SYNCED".to_string(),
            wallet_balance_known: Some(true),
        }
    }

    #[test]
    fn record_and_read_back() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let sink = SqliteProtectionEventSink::new(temp.path().to_str().unwrap()).unwrap();

        sink.record(&sample_event("sub-1", 1000, EventReason::Success)).unwrap();
        sink.record(&sample_event(
            "sub-1",
            2000,
            EventReason::Rejection(GuardRejection::TtlExpired),
        ))
        .unwrap();

        let events = sink.recent_for_subscription("sub-1", 0, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_time_ms, 2000); // newest first
    }

    #[test]
    fn since_filter_excludes_older_events() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let sink = SqliteProtectionEventSink::new(temp.path().to_str().unwrap()).unwrap();
        sink.record(&sample_event("sub-1", 1000, EventReason::Success)).unwrap();
        sink.record(&sample_event("sub-1", 5000, EventReason::Success)).unwrap();

        let events = sink.recent_for_subscription("sub-1", 3000, 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_time_ms, 5000);
    }

    #[test]
    fn trim_removes_events_before_cutoff() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let sink = SqliteProtectionEventSink::new(temp.path().to_str().unwrap()).unwrap();
        sink.record(&sample_event("sub-1", 1000, EventReason::Success)).unwrap();
        sink.record(&sample_event("sub-1", 5000, EventReason::Success)).unwrap();

        let removed = sink.trim(3000).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(sink.recent_for_subscription("sub-1", 0, 10).unwrap().len(), 1);
    }
}
