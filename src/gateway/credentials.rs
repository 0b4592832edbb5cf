//! Master credential resolution (§4.1 step 1, §3 `MasterCredential`).
//! Distinct from the subscriber-facing `LicenseCredential`: a master's
//! connection token resolves to its stream identity and signing secret,
//! not to a subscription row.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq)]
pub struct MasterCredentialRecord {
    pub master_id: String,
    pub secret_key: String,
    pub is_active: bool,
    pub expires_at_ms: Option<i64>,
}

pub trait CredentialStore: Send + Sync {
    fn resolve(&self, token: &str) -> Result<Option<MasterCredentialRecord>>;
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct SqliteCredentialStore {
    conn: parking_lot::Mutex<Connection>,
}

impl SqliteCredentialStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open credential store db")?;
        conn.pragma_update(None, "journal_mode", "WAL").ok();
        conn.execute(
            "CREATE TABLE IF NOT EXISTS master_credentials (
                token_hash TEXT PRIMARY KEY,
                master_id TEXT NOT NULL,
                secret_key TEXT NOT NULL,
                is_active INTEGER NOT NULL,
                expires_at_ms INTEGER
            )",
            [],
        )
        .context("create master_credentials table")?;
        Ok(Self { conn: parking_lot::Mutex::new(conn) })
    }

    /// Register a master's credential. `token` is hashed before storage;
    /// the cleartext is never persisted (mirrors `LicenseCredential`'s
    /// "shown once at issuance" contract in §3).
    pub fn register(
        &self,
        token: &str,
        master_id: &str,
        secret_key: &str,
        expires_at_ms: Option<i64>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO master_credentials
             (token_hash, master_id, secret_key, is_active, expires_at_ms)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![hash_token(token), master_id, secret_key, expires_at_ms],
        )
        .context("register master credential")?;
        Ok(())
    }

    pub fn revoke(&self, token: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE master_credentials SET is_active = 0 WHERE token_hash = ?1",
            params![hash_token(token)],
        )
        .context("revoke master credential")?;
        Ok(())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn resolve(&self, token: &str) -> Result<Option<MasterCredentialRecord>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT master_id, secret_key, is_active, expires_at_ms
                 FROM master_credentials WHERE token_hash = ?1",
                params![hash_token(token)],
                |row| {
                    Ok(MasterCredentialRecord {
                        master_id: row.get(0)?,
                        secret_key: row.get(1)?,
                        is_active: row.get::<_, i64>(2)? != 0,
                        expires_at_ms: row.get(3)?,
                    })
                },
            )
            .optional()
            .context("resolve master credential")?;
        Ok(row)
    }
}

impl MasterCredentialRecord {
    pub fn is_valid_at(&self, now_ms: i64) -> bool {
        if !self.is_active {
            return false;
        }
        match self.expires_at_ms {
            Some(expiry) => now_ms < expiry,
            None => true,
        }
    }
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
