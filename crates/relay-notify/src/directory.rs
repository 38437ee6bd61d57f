//! SQLite user directory.
//!
//! Holds contact details for everyone who can be notified. Users are added
//! one by one (`upsert_user`) or synced in bulk from an external user list
//! (`import_users`); disabled users stay in the table but stop resolving.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use relay_core::error::{RelayError, Result};
use relay_core::traits::IdentityDirectory;
use relay_core::types::{Identity, IdentityKey};

/// One entry of an external user list.
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryUser {
    #[serde(deserialize_with = "id_as_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub login: String,
    pub email: String,
    #[serde(default, rename = "isAdmin")]
    pub is_admin: bool,
    #[serde(default, rename = "isDisabled")]
    pub is_disabled: bool,
}

/// Accept numeric or string ids.
fn id_as_string<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid user id: {other}"))),
    }
}

/// Outcome of a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub updated: usize,
    pub disabled: usize,
    pub skipped: usize,
}

pub struct SqliteDirectory {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDirectory {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(|e| RelayError::directory(format!("open: {e}")))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| RelayError::directory(e.to_string()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                username TEXT NOT NULL DEFAULT '',
                role TEXT NOT NULL DEFAULT 'user',
                phone_number TEXT,
                is_phone_number_verified INTEGER NOT NULL DEFAULT 0,
                slack_user_id TEXT,
                active INTEGER NOT NULL DEFAULT 1,
                updated_at TEXT NOT NULL
            );
            ",
        )
        .map_err(|e| RelayError::directory(format!("migrate: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RelayError::directory(format!("lock: {e}")))
    }

    /// Insert or fully replace a user's contact details.
    pub fn upsert_user(&self, identity: &Identity) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, email, username, role, phone_number,
                                is_phone_number_verified, slack_user_id, active, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                username = excluded.username,
                role = excluded.role,
                phone_number = excluded.phone_number,
                is_phone_number_verified = excluded.is_phone_number_verified,
                slack_user_id = excluded.slack_user_id,
                active = 1,
                updated_at = excluded.updated_at",
            params![
                identity.id,
                identity.email,
                identity.username,
                identity.role,
                identity.phone_number,
                identity.is_phone_number_verified as i64,
                identity.slack_user_id,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| RelayError::directory(format!("upsert {}: {e}", identity.id)))?;
        Ok(())
    }

    /// Sync an external user list. Contact details (phone, chat handle) of
    /// existing users are preserved.
    pub fn import_users(&self, users: &[DirectoryUser]) -> Result<ImportReport> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| RelayError::directory(e.to_string()))?;
        let now = chrono::Utc::now().to_rfc3339();
        let mut report = ImportReport::default();

        for user in users {
            if !user.email.contains('@') {
                tracing::warn!("👥 Skipping user {} with invalid email '{}'", user.id, user.email);
                report.skipped += 1;
                continue;
            }
            let role = if user.is_admin { "admin" } else { "user" };
            let active = !user.is_disabled;
            let exists: bool = tx
                .query_row("SELECT 1 FROM users WHERE id = ?1", params![user.id], |_| Ok(()))
                .optional()
                .map_err(|e| RelayError::directory(e.to_string()))?
                .is_some();

            if exists {
                tx.execute(
                    "UPDATE users SET email = ?2, username = ?3, role = ?4, active = ?5, updated_at = ?6
                     WHERE id = ?1",
                    params![user.id, user.email, user.login, role, active as i64, now],
                )
                .map_err(|e| RelayError::directory(format!("update {}: {e}", user.id)))?;
                report.updated += 1;
            } else {
                tx.execute(
                    "INSERT INTO users (id, email, username, role, active, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![user.id, user.email, user.login, role, active as i64, now],
                )
                .map_err(|e| RelayError::directory(format!("insert {}: {e}", user.id)))?;
                report.inserted += 1;
            }
            if !active {
                report.disabled += 1;
            }
        }

        tx.commit().map_err(|e| RelayError::directory(e.to_string()))?;
        tracing::info!(
            "👥 User sync: {} inserted, {} updated, {} disabled, {} skipped",
            report.inserted,
            report.updated,
            report.disabled,
            report.skipped
        );
        Ok(report)
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        conn.query_row("SELECT COUNT(*) FROM users WHERE active = 1", [], |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(|e| RelayError::directory(e.to_string()))
    }
}

fn find(conn: &Connection, key: &IdentityKey) -> Result<Option<Identity>> {
    let column = match key {
        IdentityKey::UserId(_) => "id",
        IdentityKey::Email(_) => "email",
    };
    let sql = format!(
        "SELECT id, email, username, role, phone_number, is_phone_number_verified, slack_user_id
         FROM users WHERE {column} = ?1 AND active = 1"
    );
    conn.query_row(&sql, params![key.as_str()], |row| {
        Ok(Identity {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            role: row.get(3)?,
            phone_number: row.get(4)?,
            is_phone_number_verified: row.get::<_, i64>(5)? != 0,
            slack_user_id: row.get(6)?,
        })
    })
    .optional()
    .map_err(|e| RelayError::directory(e.to_string()))
}

#[async_trait]
impl IdentityDirectory for SqliteDirectory {
    async fn lookup(&self, key: &IdentityKey) -> Result<Identity> {
        let conn = self.conn.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| RelayError::directory(format!("lock: {e}")))?;
            find(&conn, &key)?.ok_or_else(|| RelayError::IdentityNotFound(key.as_str().to_string()))
        })
        .await
        .map_err(|e| RelayError::directory(format!("join: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        let mut id = Identity::new("U1", "alice@example.com").with_phone("+15550001", true);
        id.username = "alice".into();
        id.slack_user_id = Some("UALICE".into());
        id
    }

    #[tokio::test]
    async fn test_lookup_by_id_and_email() {
        let dir = SqliteDirectory::open_in_memory().unwrap();
        dir.upsert_user(&alice()).unwrap();

        let by_id = dir.lookup(&IdentityKey::UserId("U1".into())).await.unwrap();
        assert_eq!(by_id, alice());
        let by_email = dir
            .lookup(&IdentityKey::Email("alice@example.com".into()))
            .await
            .unwrap();
        assert_eq!(by_email.id, "U1");
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let dir = SqliteDirectory::open_in_memory().unwrap();
        let err = dir
            .lookup(&IdentityKey::Email("ghost@example.com".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::IdentityNotFound(_)));
    }

    #[tokio::test]
    async fn test_import_preserves_contact_details() {
        let dir = SqliteDirectory::open_in_memory().unwrap();
        dir.upsert_user(&alice()).unwrap();

        let users: Vec<DirectoryUser> = serde_json::from_str(
            r#"[
                {"id": "U1", "name": "Alice", "login": "alice2", "email": "alice@example.com", "isAdmin": true},
                {"id": 7, "name": "Bob", "login": "bob", "email": "bob@example.com"},
                {"id": 8, "login": "carol", "email": "carol@example.com", "isDisabled": true},
                {"id": 9, "login": "nomail", "email": "not-an-email"}
            ]"#,
        )
        .unwrap();
        let report = dir.import_users(&users).unwrap();
        assert_eq!(
            report,
            ImportReport { inserted: 2, updated: 1, disabled: 1, skipped: 1 }
        );

        let a = dir.lookup(&IdentityKey::UserId("U1".into())).await.unwrap();
        assert_eq!(a.username, "alice2");
        assert_eq!(a.role, "admin");
        assert_eq!(a.verified_phone(), Some("+15550001"));

        let b = dir.lookup(&IdentityKey::UserId("7".into())).await.unwrap();
        assert_eq!(b.phone_number, None);

        // Disabled users no longer resolve.
        assert!(dir.lookup(&IdentityKey::UserId("8".into())).await.is_err());
        assert_eq!(dir.count().unwrap(), 2);
    }

    #[test]
    fn test_persists_to_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("users.db");
        SqliteDirectory::open(&path).unwrap().upsert_user(&alice()).unwrap();
        assert_eq!(SqliteDirectory::open(&path).unwrap().count().unwrap(), 1);
    }
}
