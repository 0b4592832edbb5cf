//! Signal Log (§4.2): the append-only, durable, globally-ordered record of
//! every admitted signal, keyed by `(master_id, sequence_number)`. The
//! gateway appends; the fan-out distributor and full-sync recovery read from
//! it; `trim` is the only operation that ever deletes a row, and only below
//! a caller-chosen sequence floor.

pub mod sqlite_log;

use crate::signal::Signal;
use anyhow::Result;

/// Abstraction over the durable log so the gateway and fan-out distributor
/// don't depend on SQLite directly — a narrow trait in front of the
/// concrete store, swappable for a test fake.
pub trait SignalLog: Send + Sync {
    /// Append a signal. Returns `Ok(false)` without writing if
    /// `(master_id, sequence_number)` already exists (duplicate suppression
    /// at the log layer, §4.1 step 3).
    fn append(&self, signal: &Signal) -> Result<bool>;

    /// Read every signal for `master_id` with `sequence_number > from_sequence`,
    /// in ascending sequence order, capped at `limit` rows.
    fn read_from(&self, master_id: &str, from_sequence: i64, limit: u64) -> Result<Vec<Signal>>;

    /// Highest sequence number on record for a master, or `None` if the
    /// master has never been seen.
    fn highest_sequence(&self, master_id: &str) -> Result<Option<i64>>;

    /// Retention management (§4.2): drop every row for `master_id` with
    /// `sequence_number < before_sequence`. Returns the number of rows removed.
    fn trim(&self, master_id: &str, before_sequence: i64) -> Result<u64>;
}

pub use sqlite_log::SqliteSignalLog;
