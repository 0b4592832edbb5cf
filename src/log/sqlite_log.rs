//! SQLite-backed [`SignalLog`], fronted by a bounded pool of read
//! connections (WAL mode, same pragmas as the rest of the crate's SQLite
//! stores), generalized to a small connection pool since the gateway's
//! fan-out readers and the guard's full-sync readers contend with the
//! appender).

use super::SignalLog;
use crate::signal::{Side, Signal};
use anyhow::{Context, Result};
use crossbeam::queue::ArrayQueue;
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::Arc;

/// A small pool of read-only connections plus one dedicated writer
/// connection, all against the same WAL-mode database file. WAL lets
/// readers proceed concurrently with the single writer.
pub struct SqliteSignalLog {
    writer: parking_lot::Mutex<Connection>,
    readers: Arc<ArrayQueue<Connection>>,
    db_path: String,
}

impl SqliteSignalLog {
    pub fn new(db_path: &str, pool_size: usize) -> Result<Self> {
        let writer = Connection::open(db_path).context("open signal log writer connection")?;
        writer.pragma_update(None, "journal_mode", "WAL").ok();
        writer.pragma_update(None, "synchronous", "NORMAL").ok();
        writer
            .execute(
                "CREATE TABLE IF NOT EXISTS signal_log (
                    master_id TEXT NOT NULL,
                    sequence_number INTEGER NOT NULL,
                    subscription_id TEXT NOT NULL,
                    generated_at_ms INTEGER NOT NULL,
                    symbol TEXT NOT NULL,
                    side INTEGER NOT NULL,
                    volume REAL NOT NULL,
                    price REAL NOT NULL,
                    stop_loss REAL NOT NULL,
                    take_profit REAL NOT NULL,
                    signature TEXT NOT NULL,
                    server_arrival_time INTEGER NOT NULL,
                    PRIMARY KEY (master_id, sequence_number)
                )",
                [],
            )
            .context("create signal_log table")?;
        writer
            .execute(
                "CREATE INDEX IF NOT EXISTS idx_signal_log_master_seq
                 ON signal_log (master_id, sequence_number)",
                [],
            )
            .ok();

        let readers = Arc::new(ArrayQueue::new(pool_size.max(1)));
        for _ in 0..pool_size.max(1) {
            let conn = Connection::open(db_path).context("open signal log reader connection")?;
            conn.pragma_update(None, "query_only", "ON").ok();
            let _ = readers.push(conn);
        }

        Ok(Self {
            writer: parking_lot::Mutex::new(writer),
            readers,
            db_path: db_path.to_string(),
        })
    }

    /// Borrow a reader connection from the pool, opening a fresh one if the
    /// pool happens to be momentarily exhausted rather than blocking the
    /// caller (reads are not on the hard-latency hot path the way appends are).
    fn with_reader<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match self.readers.pop() {
            Some(conn) => {
                let result = f(&conn);
                let _ = self.readers.push(conn);
                result
            }
            None => {
                let conn =
                    Connection::open(&self.db_path).context("open overflow reader connection")?;
                f(&conn)
            }
        }
    }

    fn row_to_signal(row: &rusqlite::Row) -> rusqlite::Result<Signal> {
        let side_val: u8 = row.get(5)?;
        Ok(Signal {
            master_id: row.get(0)?,
            sequence_number: row.get(1)?,
            subscription_id: row.get(2)?,
            generated_at_ms: row.get(3)?,
            symbol: row.get(4)?,
            side: Side::from_u8(side_val).unwrap_or(Side::Buy),
            volume: row.get(6)?,
            price: row.get(7)?,
            stop_loss: row.get(8)?,
            take_profit: row.get(9)?,
            signature: row.get(10)?,
            server_arrival_time: row.get(11)?,
        })
    }
}

impl SignalLog for SqliteSignalLog {
    fn append(&self, signal: &Signal) -> Result<bool> {
        let conn = self.writer.lock();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM signal_log WHERE master_id = ?1 AND sequence_number = ?2",
                params![signal.master_id, signal.sequence_number],
                |row| row.get(0),
            )
            .optional()
            .context("check for duplicate sequence")?;
        if existing.is_some() {
            return Ok(false);
        }

        conn.execute(
            "INSERT INTO signal_log
             (master_id, sequence_number, subscription_id, generated_at_ms, symbol, side,
              volume, price, stop_loss, take_profit, signature, server_arrival_time)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                signal.master_id,
                signal.sequence_number,
                signal.subscription_id,
                signal.generated_at_ms,
                signal.symbol,
                signal.side as u8,
                signal.volume,
                signal.price,
                signal.stop_loss,
                signal.take_profit,
                signal.signature,
                signal.server_arrival_time.unwrap_or_default(),
            ],
        )
        .context("insert signal log row")?;
        Ok(true)
    }

    fn read_from(&self, master_id: &str, from_sequence: i64, limit: u64) -> Result<Vec<Signal>> {
        self.with_reader(|conn| {
            let mut stmt = conn.prepare(
                "SELECT master_id, sequence_number, subscription_id, generated_at_ms, symbol,
                        side, volume, price, stop_loss, take_profit, signature, server_arrival_time
                 FROM signal_log
                 WHERE master_id = ?1 AND sequence_number > ?2
                 ORDER BY sequence_number ASC
                 LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![master_id, from_sequence, limit as i64], Self::row_to_signal)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .context("collect signal log rows")?;
            Ok(rows)
        })
    }

    fn highest_sequence(&self, master_id: &str) -> Result<Option<i64>> {
        self.with_reader(|conn| {
            conn.query_row(
                "SELECT MAX(sequence_number) FROM signal_log WHERE master_id = ?1",
                params![master_id],
                |row| row.get(0),
            )
            .context("read highest sequence")
        })
    }

    fn trim(&self, master_id: &str, before_sequence: i64) -> Result<u64> {
        let conn = self.writer.lock();
        let removed = conn
            .execute(
                "DELETE FROM signal_log WHERE master_id = ?1 AND sequence_number < ?2",
                params![master_id, before_sequence],
            )
            .context("trim signal log")?;
        Ok(removed as u64)
    }
}
