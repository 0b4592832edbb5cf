//! Durable trust scores, one row per subscriber, guarded by a per-subscriber
//! lock the same way the Subscription Registry guards its rows.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::sync::Arc;

pub const INITIAL_SCORE: i32 = 100;

pub struct TrustStore {
    conn: Mutex<Connection>,
    row_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TrustStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open trust store db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.pragma_update(None, "synchronous", "NORMAL").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS trust_scores (
                subscriber_id TEXT PRIMARY KEY,
                score INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL
            )",
            [],
        )
        .context("create trust_scores table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            row_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire the per-subscriber lock for the duration of a trust-loop tick
    /// (§4.6 "the lock-read-calculate-write-release discipline is
    /// non-optional").
    pub fn row_lock(&self, subscriber_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.row_locks.lock();
        locks
            .entry(subscriber_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn get_score(&self, subscriber_id: &str) -> Result<i32> {
        let conn = self.conn.lock();
        let score: Option<i32> = conn
            .query_row(
                "SELECT score FROM trust_scores WHERE subscriber_id = ?1",
                params![subscriber_id],
                |row| row.get(0),
            )
            .optional()
            .context("read trust score")?;
        Ok(score.unwrap_or(INITIAL_SCORE))
    }

    pub fn set_score(&self, subscriber_id: &str, score: i32, now_ms: i64) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO trust_scores (subscriber_id, score, updated_at_ms)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(subscriber_id) DO UPDATE SET score = excluded.score, updated_at_ms = excluded.updated_at_ms",
            params![subscriber_id, score, now_ms],
        )
        .context("write trust score")?;
        Ok(())
    }
}
