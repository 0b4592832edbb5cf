//! Admin principal storage (§4.8, §3 `AdminPrincipal`). Grounded in the
//! teacher's `UserStore`, narrowed to the two-role admin surface and with
//! the api-key table dropped — there is no API-key auth path on this
//! control plane, only JWT sessions issued by [`crate::auth::jwt::JwtHandler`].

use crate::auth::models::{AdminPrincipal, AdminRole};
use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rusqlite::{params, Connection};
use tracing::{info, warn};
use uuid::Uuid;

/// Admin principal storage with a SQLite backend.
pub struct AdminStore {
    db_path: String,
}

impl AdminStore {
    /// Open (creating if needed) the admin principal database, seeding a
    /// default admin account on first run.
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self { db_path: db_path.to_string() };
        store.init_db()?;
        Ok(store)
    }

    fn init_db(&self) -> Result<()> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS admin_principals (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                role TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        self.create_default_admin(&conn)?;
        Ok(())
    }

    fn create_default_admin(&self, conn: &Connection) -> Result<()> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM admin_principals WHERE role = 'admin'",
                [],
                |row| row.get(0),
            )
            .context("check for existing admin principals")?;

        if count == 0 {
            let password_hash = hash("admin123", DEFAULT_COST).context("hash default admin password")?;
            let admin = AdminPrincipal {
                id: Uuid::new_v4(),
                username: "admin".to_string(),
                password_hash,
                role: AdminRole::Admin,
                created_at: Utc::now().to_rfc3339(),
            };

            conn.execute(
                "INSERT INTO admin_principals (id, username, password_hash, role, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    admin.id.to_string(),
                    admin.username,
                    admin.password_hash,
                    admin.role.as_str(),
                    admin.created_at,
                ],
            )
            .context("insert default admin principal")?;

            info!("default admin principal created (username: admin, password: admin123)");
            warn!("change the default admin password before exposing this surface");
        }

        Ok(())
    }

    pub fn get_by_username(&self, username: &str) -> Result<Option<AdminPrincipal>> {
        let conn = Connection::open(&self.db_path)?;
        let mut stmt = conn.prepare(
            "SELECT id, username, password_hash, role, created_at
             FROM admin_principals WHERE username = ?1",
        )?;

        let result = stmt.query_row(params![username], |row| {
            let role_str: String = row.get(3)?;
            Ok(AdminPrincipal {
                id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap(),
                username: row.get(1)?,
                password_hash: row.get(2)?,
                role: AdminRole::from_str(&role_str).unwrap_or(AdminRole::Operator),
                created_at: row.get(4)?,
            })
        });

        match result {
            Ok(principal) => Ok(Some(principal)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn verify_password(&self, username: &str, password: &str) -> Result<bool> {
        match self.get_by_username(username)? {
            Some(principal) => Ok(verify(password, &principal.password_hash).context("verify password hash")?),
            None => Ok(false),
        }
    }

    pub fn create(&self, username: &str, password: &str, role: AdminRole) -> Result<AdminPrincipal> {
        let password_hash = hash(password, DEFAULT_COST).context("hash password")?;
        let principal = AdminPrincipal {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            role,
            created_at: Utc::now().to_rfc3339(),
        };

        let conn = Connection::open(&self.db_path)?;
        conn.execute(
            "INSERT INTO admin_principals (id, username, password_hash, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                principal.id.to_string(),
                principal.username,
                principal.password_hash,
                principal.role.as_str(),
                principal.created_at,
            ],
        )
        .context("insert admin principal")?;

        info!(username = %principal.username, role = principal.role.as_str(), "admin principal created");
        Ok(principal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_store() -> (AdminStore, tempfile::NamedTempFile) {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let db_path = temp_file.path().to_str().unwrap();
        let store = AdminStore::new(db_path).unwrap();
        (store, temp_file)
    }

    #[test]
    fn default_admin_created() {
        let (store, _temp) = create_test_store();
        let admin = store.get_by_username("admin").unwrap().unwrap();
        assert_eq!(admin.username, "admin");
        assert_eq!(admin.role, AdminRole::Admin);
    }

    #[test]
    fn password_verification() {
        let (store, _temp) = create_test_store();
        assert!(store.verify_password("admin", "admin123").unwrap());
        assert!(!store.verify_password("admin", "wrongpassword").unwrap());
        assert!(!store.verify_password("nonexistent", "password").unwrap());
    }

    #[test]
    fn create_and_retrieve_operator() {
        let (store, _temp) = create_test_store();
        let op = store.create("operator1", "password123", AdminRole::Operator).unwrap();
        assert_eq!(op.role, AdminRole::Operator);

        let retrieved = store.get_by_username("operator1").unwrap().unwrap();
        assert_eq!(retrieved.username, "operator1");
        assert_eq!(retrieved.role, AdminRole::Operator);
    }
}
