//! Subscription Registry (§4.3): authoritative subscription state, backed by
//! SQLite with a per-row `version` column for optimistic locking, fronted by
//! an `arc-swap` snapshot per subscription for lock-free hot-path reads.
//!
//! Writers (trust loop, admin actions, fan-out cursor advances) take the
//! per-subscription `parking_lot::Mutex` in [`SqliteRegistry`] before
//! touching the row; readers on the hot path (gateway credential
//! resolution) call [`SqliteRegistry::snapshot`], which never blocks.

pub mod state;

use crate::error::RetryableError;
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use state::{transition, StateEvent, SubscriptionState};
use std::collections::HashMap;
use std::sync::Arc;

/// Per-subscription admission policy (§3 `Policy`). Immutable between admin
/// updates; always read alongside `state` under the same version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub max_price_deviation_pips: f64,
    pub max_ttl_ms: i64,
    pub max_lot: f64,
    pub secret_key_ref: String,
}

/// A lock-free snapshot of a subscription row, safe to read from the hot
/// path without taking the registry lock (§4.3 "Access discipline").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionSnapshot {
    pub subscription_id: String,
    pub subscriber_id: String,
    pub master_id: String,
    pub state: SubscriptionState,
    pub last_accepted_sequence: i64,
    pub policy: Policy,
    pub version: i64,
}

struct RegistryRow {
    conn: Arc<Mutex<Connection>>,
}

/// Authoritative Subscription Registry.
pub struct SqliteRegistry {
    conn: Arc<Mutex<Connection>>,
    /// Per-subscription exclusive lock guarding read-modify-write of the row.
    row_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    /// Lock-free snapshot cache, republished after every committed write.
    snapshots: Mutex<HashMap<String, Arc<ArcSwap<SubscriptionSnapshot>>>>,
}

impl SqliteRegistry {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open registry db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS subscriptions (
                subscription_id TEXT PRIMARY KEY,
                subscriber_id TEXT NOT NULL,
                master_id TEXT NOT NULL,
                state TEXT NOT NULL,
                last_accepted_sequence INTEGER NOT NULL,
                max_price_deviation_pips REAL NOT NULL,
                max_ttl_ms INTEGER NOT NULL,
                max_lot REAL NOT NULL,
                secret_key_ref TEXT NOT NULL,
                version INTEGER NOT NULL,
                UNIQUE(subscriber_id, master_id)
            )",
            [],
        )?;

        let registry = Self {
            conn: Arc::new(Mutex::new(conn)),
            row_locks: Mutex::new(HashMap::new()),
            snapshots: Mutex::new(HashMap::new()),
        };
        Ok(registry)
    }

    fn row_lock(&self, subscription_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock();
        locks
            .entry(subscription_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn publish_snapshot(&self, snap: SubscriptionSnapshot) {
        let mut snapshots = self.snapshots.lock();
        match snapshots.get(&snap.subscription_id) {
            Some(slot) => slot.store(Arc::new(snap)),
            None => {
                snapshots.insert(snap.subscription_id.clone(), Arc::new(ArcSwap::from_pointee(snap)));
            }
        }
    }

    fn load_row(conn: &Connection, subscription_id: &str) -> Result<Option<SubscriptionSnapshot>> {
        conn.query_row(
            "SELECT subscription_id, subscriber_id, master_id, state, last_accepted_sequence,
                    max_price_deviation_pips, max_ttl_ms, max_lot, secret_key_ref, version
             FROM subscriptions WHERE subscription_id = ?1",
            params![subscription_id],
            |row| {
                let state_str: String = row.get(3)?;
                Ok(SubscriptionSnapshot {
                    subscription_id: row.get(0)?,
                    subscriber_id: row.get(1)?,
                    master_id: row.get(2)?,
                    state: SubscriptionState::from_str(&state_str)
                        .unwrap_or(SubscriptionState::Synced),
                    last_accepted_sequence: row.get(4)?,
                    policy: Policy {
                        max_price_deviation_pips: row.get(5)?,
                        max_ttl_ms: row.get(6)?,
                        max_lot: row.get(7)?,
                        secret_key_ref: row.get(8)?,
                    },
                    version: row.get(9)?,
                })
            },
        )
        .optional()
        .context("load subscription row")
    }

    /// Create a new subscription in `SYNCED` with `last_accepted_sequence = 0`.
    pub fn create(
        &self,
        subscription_id: &str,
        subscriber_id: &str,
        master_id: &str,
        policy: Policy,
    ) -> Result<SubscriptionSnapshot> {
        anyhow::ensure!(subscriber_id != master_id, "subscriber_id must differ from master_id");

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO subscriptions
             (subscription_id, subscriber_id, master_id, state, last_accepted_sequence,
              max_price_deviation_pips, max_ttl_ms, max_lot, secret_key_ref, version)
             VALUES (?1, ?2, ?3, 'SYNCED', 0, ?4, ?5, ?6, ?7, 0)",
            params![
                subscription_id,
                subscriber_id,
                master_id,
                policy.max_price_deviation_pips,
                policy.max_ttl_ms,
                policy.max_lot,
                policy.secret_key_ref,
            ],
        )
        .context("insert subscription")?;

        let snap = Self::load_row(&conn, subscription_id)?
            .context("subscription vanished immediately after insert")?;
        drop(conn);
        self.publish_snapshot(snap.clone());
        Ok(snap)
    }

    /// Lock-free read of the current snapshot (hot path). Falls back to a
    /// locked DB read on first access after process start, then serves from
    /// cache thereafter.
    pub fn snapshot(&self, subscription_id: &str) -> Result<Option<Arc<SubscriptionSnapshot>>> {
        if let Some(slot) = self.snapshots.lock().get(subscription_id) {
            return Ok(Some(slot.load_full()));
        }
        let conn = self.conn.lock();
        let Some(snap) = Self::load_row(&conn, subscription_id)? else {
            return Ok(None);
        };
        drop(conn);
        self.publish_snapshot(snap.clone());
        Ok(Some(Arc::new(snap)))
    }

    /// Apply a state-machine event under the per-subscription row lock
    /// (§4.3 "Access discipline"). Returns the new snapshot; if the event
    /// has no effect in the current state the snapshot is returned
    /// unchanged (no version bump, no write).
    pub fn apply_event(
        &self,
        subscription_id: &str,
        event: StateEvent,
    ) -> Result<SubscriptionSnapshot> {
        let lock = self.row_lock(subscription_id);
        let _guard = lock.lock();

        let conn = self.conn.lock();
        let current = Self::load_row(&conn, subscription_id)?
            .with_context(|| format!("unknown subscription {subscription_id}"))?;

        let Some(next_state) = transition(current.state, event) else {
            return Ok(current);
        };
        if next_state == current.state {
            return Ok(current);
        }

        let rows = conn
            .execute(
                "UPDATE subscriptions SET state = ?1, version = version + 1
                 WHERE subscription_id = ?2 AND version = ?3",
                params![next_state.as_str(), subscription_id, current.version],
            )
            .context("apply state transition")?;
        if rows == 0 {
            anyhow::bail!(RetryableError::VersionConflict);
        }

        let updated = Self::load_row(&conn, subscription_id)?
            .context("subscription vanished after update")?;
        drop(conn);
        self.publish_snapshot(updated.clone());
        Ok(updated)
    }

    /// Advance the server-side `last_accepted_sequence` (distinct from the
    /// receiver-local sequence the ExecutionGuard owns — §3 ownership
    /// summary). Monotonic: a lower or equal value is a no-op, never an error,
    /// since redelivery can race the cursor advance.
    pub fn advance_last_accepted_sequence(
        &self,
        subscription_id: &str,
        sequence: i64,
    ) -> Result<SubscriptionSnapshot> {
        let lock = self.row_lock(subscription_id);
        let _guard = lock.lock();

        let conn = self.conn.lock();
        let current = Self::load_row(&conn, subscription_id)?
            .with_context(|| format!("unknown subscription {subscription_id}"))?;

        if sequence <= current.last_accepted_sequence {
            return Ok(current);
        }

        let rows = conn
            .execute(
                "UPDATE subscriptions SET last_accepted_sequence = ?1, version = version + 1
                 WHERE subscription_id = ?2 AND version = ?3",
                params![sequence, subscription_id, current.version],
            )
            .context("advance last_accepted_sequence")?;
        if rows == 0 {
            anyhow::bail!(RetryableError::VersionConflict);
        }

        let updated = Self::load_row(&conn, subscription_id)?
            .context("subscription vanished after update")?;
        drop(conn);
        self.publish_snapshot(updated.clone());
        Ok(updated)
    }

    /// List every subscription for a given master (fan-out needs this to
    /// discover delivery targets).
    pub fn subscriptions_for_master(&self, master_id: &str) -> Result<Vec<SubscriptionSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT subscription_id FROM subscriptions WHERE master_id = ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![master_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);
        ids.into_iter()
            .map(|id| {
                Self::load_row(&conn, &id)?.with_context(|| format!("missing row for {id}"))
            })
            .collect()
    }

    /// List every subscriber id known to the registry (used by the trust
    /// loop to iterate subscribers per tick).
    pub fn all_subscriber_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT subscriber_id FROM subscriptions")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// List every master id known to the registry (used by the trust loop's
    /// Signal Log retention sweep, §4.2 `trim`).
    pub fn all_master_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT DISTINCT master_id FROM subscriptions")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn subscriptions_for_subscriber(&self, subscriber_id: &str) -> Result<Vec<SubscriptionSnapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT subscription_id FROM subscriptions WHERE subscriber_id = ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![subscriber_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);
        ids.into_iter()
            .map(|id| {
                Self::load_row(&conn, &id)?.with_context(|| format!("missing row for {id}"))
            })
            .collect()
    }
}
