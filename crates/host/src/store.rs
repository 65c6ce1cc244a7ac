//! Persistence using `SQLite`
//!
//! Stores principals, connection descriptors, favorites, pinned flags and
//! connection history in a local database file. Transactions are short; the
//! first-admin registration runs under an exclusive transaction so concurrent
//! initial registrations cannot both elevate.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use thiserror::Error;

/// History is trimmed to this many entries per principal.
const HISTORY_KEEP: usize = 20;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(&'static str),
    #[error("not found")]
    NotFound,
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
}

/// An authenticated user account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// `active` or `disabled`.
    pub status: String,
    pub is_admin: bool,
    pub mfa_enabled: bool,
    #[serde(skip_serializing)]
    pub mfa_secret: Option<String>,
    pub last_login_at: Option<i64>,
    pub created_at: i64,
}

/// Stored SSH connection parameters for a principal. Secret fields hold
/// vault-encrypted opaque strings and never serialize into API responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDescriptor {
    pub id: i64,
    pub owner_id: i64,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    /// `password` or `key`.
    pub auth_type: String,
    #[serde(skip_serializing)]
    pub password_enc: Option<String>,
    #[serde(skip_serializing)]
    pub private_key_enc: Option<String>,
    #[serde(skip_serializing)]
    pub passphrase_enc: Option<String>,
    pub remember_password: bool,
    pub description: Option<String>,
    pub group: Option<String>,
    pub config_json: Option<String>,
    pub sort_order: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Fields accepted when creating or updating a descriptor. Secret fields
/// arrive already vault-encrypted from the API layer.
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpsert {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_type: String,
    pub password_enc: Option<String>,
    pub private_key_enc: Option<String>,
    pub passphrase_enc: Option<String>,
    pub remember_password: bool,
    pub description: Option<String>,
    pub group: Option<String>,
    pub config_json: Option<String>,
}

/// One append-only history entry, independent of the descriptor it came
/// from (it survives descriptor deletion).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub host_address: String,
    pub port: u16,
    pub username: String,
    pub connected_at: i64,
}

/// SQLite-backed store.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path and run the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    /// Default on-disk location.
    pub fn default_db_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("termgate")
            .join("termgate.db")
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        // Writers queue instead of failing fast when another connection holds
        // the exclusive first-admin transaction.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS principals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT,
                password_hash TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'active',
                is_admin INTEGER NOT NULL DEFAULT 0,
                mfa_enabled INTEGER NOT NULL DEFAULT 0,
                mfa_secret TEXT,
                last_login_at INTEGER,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_principals_email
                ON principals(email) WHERE email IS NOT NULL AND email != '';

            CREATE TABLE IF NOT EXISTS connections (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES principals(id),
                name TEXT NOT NULL,
                host TEXT NOT NULL,
                port INTEGER NOT NULL DEFAULT 22,
                username TEXT NOT NULL,
                auth_type TEXT NOT NULL DEFAULT 'password',
                password_enc TEXT,
                private_key_enc TEXT,
                passphrase_enc TEXT,
                remember_password INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                grp TEXT,
                config_json TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );

            CREATE TABLE IF NOT EXISTS connection_favorites (
                principal_id INTEGER NOT NULL REFERENCES principals(id),
                connection_id INTEGER NOT NULL REFERENCES connections(id),
                PRIMARY KEY (principal_id, connection_id)
            );

            CREATE TABLE IF NOT EXISTS connection_pinned (
                principal_id INTEGER NOT NULL REFERENCES principals(id),
                connection_id INTEGER NOT NULL REFERENCES connections(id),
                PRIMARY KEY (principal_id, connection_id)
            );

            CREATE TABLE IF NOT EXISTS connection_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                principal_id INTEGER NOT NULL REFERENCES principals(id),
                host_address TEXT NOT NULL,
                port INTEGER NOT NULL,
                username TEXT NOT NULL,
                connected_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    // === principals ===

    /// Register a principal. Runs "count admins, elevate if zero" inside one
    /// exclusive transaction: under concurrent initial registrations exactly
    /// one row ends up with `is_admin = 1`.
    pub fn register_principal(
        &self,
        username: &str,
        email: Option<&str>,
        password_hash: &str,
    ) -> Result<Principal, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
        let admins: i64 =
            tx.query_row("SELECT COUNT(*) FROM principals WHERE is_admin = 1", [], |r| {
                r.get(0)
            })?;
        let is_admin = admins == 0;
        let inserted = tx.execute(
            "INSERT INTO principals (username, email, password_hash, is_admin)
             VALUES (?, ?, ?, ?)",
            params![username, email, password_hash, is_admin],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                return Err(StoreError::Duplicate("principal"));
            }
            Err(e) => return Err(e.into()),
        }
        let id = tx.last_insert_rowid();
        tx.commit()?;
        drop(conn);
        self.get_principal(id)
    }

    pub fn get_principal(&self, id: i64) -> Result<Principal, StoreError> {
        self.lock()
            .query_row(
                "SELECT id, username, email, password_hash, status, is_admin,
                        mfa_enabled, mfa_secret, last_login_at, created_at
                 FROM principals WHERE id = ?",
                [id],
                row_to_principal,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn find_principal_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .lock()
            .query_row(
                "SELECT id, username, email, password_hash, status, is_admin,
                        mfa_enabled, mfa_secret, last_login_at, created_at
                 FROM principals WHERE username = ?",
                [username],
                row_to_principal,
            )
            .optional()?)
    }

    pub fn admin_exists(&self) -> Result<bool, StoreError> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM principals WHERE is_admin = 1",
            [],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn touch_last_login(&self, id: i64) -> Result<(), StoreError> {
        self.lock().execute(
            "UPDATE principals SET last_login_at = strftime('%s', 'now') WHERE id = ?",
            [id],
        )?;
        Ok(())
    }

    /// Store a fresh TOTP secret (not yet enabled).
    pub fn set_mfa_secret(&self, id: i64, secret_enc: &str) -> Result<(), StoreError> {
        self.lock().execute(
            "UPDATE principals SET mfa_secret = ?, mfa_enabled = 0 WHERE id = ?",
            params![secret_enc, id],
        )?;
        Ok(())
    }

    pub fn set_mfa_enabled(&self, id: i64, enabled: bool) -> Result<(), StoreError> {
        if enabled {
            self.lock()
                .execute("UPDATE principals SET mfa_enabled = 1 WHERE id = ?", [id])?;
        } else {
            self.lock().execute(
                "UPDATE principals SET mfa_enabled = 0, mfa_secret = NULL WHERE id = ?",
                [id],
            )?;
        }
        Ok(())
    }

    // === connections ===

    pub fn create_connection(
        &self,
        owner_id: i64,
        c: &ConnectionUpsert,
    ) -> Result<ConnectionDescriptor, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO connections
                (owner_id, name, host, port, username, auth_type, password_enc,
                 private_key_enc, passphrase_enc, remember_password, description,
                 grp, config_json, sort_order)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                 (SELECT COALESCE(MAX(sort_order), 0) + 1 FROM connections WHERE owner_id = ?1))",
            params![
                owner_id,
                c.name,
                c.host,
                c.port,
                c.username,
                c.auth_type,
                c.password_enc,
                c.private_key_enc,
                c.passphrase_enc,
                c.remember_password,
                c.description,
                c.group,
                c.config_json,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_connection(id, owner_id)
    }

    pub fn update_connection(
        &self,
        id: i64,
        owner_id: i64,
        c: &ConnectionUpsert,
    ) -> Result<ConnectionDescriptor, StoreError> {
        let changed = self.lock().execute(
            "UPDATE connections SET
                name = ?, host = ?, port = ?, username = ?, auth_type = ?,
                password_enc = COALESCE(?, password_enc),
                private_key_enc = COALESCE(?, private_key_enc),
                passphrase_enc = COALESCE(?, passphrase_enc),
                remember_password = ?, description = ?, grp = ?, config_json = ?,
                updated_at = strftime('%s', 'now')
             WHERE id = ? AND owner_id = ?",
            params![
                c.name,
                c.host,
                c.port,
                c.username,
                c.auth_type,
                c.password_enc,
                c.private_key_enc,
                c.passphrase_enc,
                c.remember_password,
                c.description,
                c.group,
                c.config_json,
                id,
                owner_id,
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        self.get_connection(id, owner_id)
    }

    pub fn get_connection(
        &self,
        id: i64,
        owner_id: i64,
    ) -> Result<ConnectionDescriptor, StoreError> {
        self.lock()
            .query_row(
                "SELECT id, owner_id, name, host, port, username, auth_type,
                        password_enc, private_key_enc, passphrase_enc,
                        remember_password, description, grp, config_json,
                        sort_order, created_at, updated_at
                 FROM connections WHERE id = ? AND owner_id = ?",
                params![id, owner_id],
                row_to_connection,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
    }

    pub fn list_connections(&self, owner_id: i64) -> Result<Vec<ConnectionDescriptor>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, owner_id, name, host, port, username, auth_type,
                    password_enc, private_key_enc, passphrase_enc,
                    remember_password, description, grp, config_json,
                    sort_order, created_at, updated_at
             FROM connections WHERE owner_id = ? ORDER BY sort_order, id",
        )?;
        let rows = stmt.query_map([owner_id], row_to_connection)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_connection(&self, id: i64, owner_id: i64) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM connection_favorites WHERE connection_id = ? AND principal_id = ?",
            params![id, owner_id],
        )?;
        conn.execute(
            "DELETE FROM connection_pinned WHERE connection_id = ? AND principal_id = ?",
            params![id, owner_id],
        )?;
        let changed = conn.execute(
            "DELETE FROM connections WHERE id = ? AND owner_id = ?",
            params![id, owner_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Apply a client-supplied ordering; ids not owned by the principal are
    /// ignored.
    pub fn set_sort_order(&self, owner_id: i64, ordered_ids: &[i64]) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        for (idx, id) in ordered_ids.iter().enumerate() {
            tx.execute(
                "UPDATE connections SET sort_order = ? WHERE id = ? AND owner_id = ?",
                params![idx as i64, id, owner_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // === favorites / pinned ===

    pub fn set_favorite(
        &self,
        principal_id: i64,
        connection_id: i64,
        favorite: bool,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        if favorite {
            conn.execute(
                "INSERT OR IGNORE INTO connection_favorites (principal_id, connection_id)
                 VALUES (?, ?)",
                params![principal_id, connection_id],
            )?;
        } else {
            conn.execute(
                "DELETE FROM connection_favorites WHERE principal_id = ? AND connection_id = ?",
                params![principal_id, connection_id],
            )?;
        }
        Ok(())
    }

    pub fn set_pinned(
        &self,
        principal_id: i64,
        connection_id: i64,
        pinned: bool,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        if pinned {
            conn.execute(
                "INSERT OR IGNORE INTO connection_pinned (principal_id, connection_id)
                 VALUES (?, ?)",
                params![principal_id, connection_id],
            )?;
        } else {
            conn.execute(
                "DELETE FROM connection_pinned WHERE principal_id = ? AND connection_id = ?",
                params![principal_id, connection_id],
            )?;
        }
        Ok(())
    }

    pub fn favorite_ids(&self, principal_id: i64) -> Result<HashSet<i64>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT connection_id FROM connection_favorites WHERE principal_id = ?")?;
        let rows = stmt.query_map([principal_id], |r| r.get(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    pub fn pinned_ids(&self, principal_id: i64) -> Result<HashSet<i64>, StoreError> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT connection_id FROM connection_pinned WHERE principal_id = ?")?;
        let rows = stmt.query_map([principal_id], |r| r.get(0))?;
        Ok(rows.collect::<Result<HashSet<_>, _>>()?)
    }

    // === history ===

    /// Append a history entry and trim to the most recent 20 inside the same
    /// transaction.
    pub fn append_history(
        &self,
        principal_id: i64,
        host_address: &str,
        port: u16,
        username: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO connection_history (principal_id, host_address, port, username)
             VALUES (?, ?, ?, ?)",
            params![principal_id, host_address, port, username],
        )?;
        tx.execute(
            "DELETE FROM connection_history
             WHERE principal_id = ?1 AND id NOT IN (
                 SELECT id FROM connection_history
                 WHERE principal_id = ?1
                 ORDER BY connected_at DESC, id DESC LIMIT ?2
             )",
            params![principal_id, HISTORY_KEEP as i64],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_history(&self, principal_id: i64) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, host_address, port, username, connected_at
             FROM connection_history WHERE principal_id = ?
             ORDER BY connected_at DESC, id DESC",
        )?;
        let rows = stmt.query_map([principal_id], |r| {
            Ok(HistoryEntry {
                id: r.get(0)?,
                host_address: r.get(1)?,
                port: r.get(2)?,
                username: r.get(3)?,
                connected_at: r.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn delete_history_entry(&self, principal_id: i64, id: i64) -> Result<(), StoreError> {
        let changed = self.lock().execute(
            "DELETE FROM connection_history WHERE id = ? AND principal_id = ?",
            params![id, principal_id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn clear_history(&self, principal_id: i64) -> Result<usize, StoreError> {
        Ok(self.lock().execute(
            "DELETE FROM connection_history WHERE principal_id = ?",
            [principal_id],
        )?)
    }
}

fn row_to_principal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Principal> {
    Ok(Principal {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        status: row.get(4)?,
        is_admin: row.get(5)?,
        mfa_enabled: row.get(6)?,
        mfa_secret: row.get(7)?,
        last_login_at: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn row_to_connection(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionDescriptor> {
    Ok(ConnectionDescriptor {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        host: row.get(3)?,
        port: row.get(4)?,
        username: row.get(5)?,
        auth_type: row.get(6)?,
        password_enc: row.get(7)?,
        private_key_enc: row.get(8)?,
        passphrase_enc: row.get(9)?,
        remember_password: row.get(10)?,
        description: row.get(11)?,
        group: row.get(12)?,
        config_json: row.get(13)?,
        sort_order: row.get(14)?,
        created_at: row.get(15)?,
        updated_at: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_upsert(name: &str) -> ConnectionUpsert {
        ConnectionUpsert {
            name: name.into(),
            host: "example.org".into(),
            port: 22,
            username: "alice".into(),
            auth_type: "password".into(),
            password_enc: Some("gcm:abc".into()),
            ..ConnectionUpsert::default()
        }
    }

    #[test]
    fn test_first_registration_becomes_admin() {
        let store = Store::open_in_memory().unwrap();
        let first = store.register_principal("alice", None, "hash").unwrap();
        assert!(first.is_admin);
        let second = store.register_principal("bob", None, "hash").unwrap();
        assert!(!second.is_admin);
        assert!(store.admin_exists().unwrap());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let store = Store::open_in_memory().unwrap();
        store.register_principal("alice", None, "h").unwrap();
        assert!(matches!(
            store.register_principal("alice", None, "h"),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_duplicate_email_rejected_but_empty_ok() {
        let store = Store::open_in_memory().unwrap();
        store
            .register_principal("a", Some("x@example.org"), "h")
            .unwrap();
        assert!(matches!(
            store.register_principal("b", Some("x@example.org"), "h"),
            Err(StoreError::Duplicate(_))
        ));
        // Multiple principals without email are fine
        store.register_principal("c", None, "h").unwrap();
        store.register_principal("d", None, "h").unwrap();
    }

    #[test]
    fn test_connection_crud_enforces_ownership() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.register_principal("alice", None, "h").unwrap();
        let bob = store.register_principal("bob", None, "h").unwrap();

        let created = store
            .create_connection(alice.id, &sample_upsert("dev box"))
            .unwrap();
        assert_eq!(created.owner_id, alice.id);

        // Bob can neither read nor delete Alice's descriptor
        assert!(matches!(
            store.get_connection(created.id, bob.id),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            store.delete_connection(created.id, bob.id),
            Err(StoreError::NotFound)
        ));

        store.delete_connection(created.id, alice.id).unwrap();
        assert!(store.list_connections(alice.id).unwrap().is_empty());
    }

    #[test]
    fn test_update_keeps_secrets_when_absent() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.register_principal("alice", None, "h").unwrap();
        let created = store
            .create_connection(alice.id, &sample_upsert("dev"))
            .unwrap();

        let mut upsert = sample_upsert("dev renamed");
        upsert.password_enc = None;
        let updated = store.update_connection(created.id, alice.id, &upsert).unwrap();
        assert_eq!(updated.name, "dev renamed");
        assert_eq!(updated.password_enc.as_deref(), Some("gcm:abc"));
    }

    #[test]
    fn test_sort_order_applies_index() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.register_principal("alice", None, "h").unwrap();
        let a = store.create_connection(alice.id, &sample_upsert("a")).unwrap();
        let b = store.create_connection(alice.id, &sample_upsert("b")).unwrap();
        store.set_sort_order(alice.id, &[b.id, a.id]).unwrap();
        let list = store.list_connections(alice.id).unwrap();
        assert_eq!(list[0].id, b.id);
        assert_eq!(list[1].id, a.id);
    }

    #[test]
    fn test_history_trims_to_twenty() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.register_principal("alice", None, "h").unwrap();
        for i in 0..25 {
            store
                .append_history(alice.id, &format!("host-{i}"), 22, "alice")
                .unwrap();
        }
        let history = store.list_history(alice.id).unwrap();
        assert_eq!(history.len(), 20);
        // Most recent entries survive
        assert_eq!(history[0].host_address, "host-24");
    }

    #[test]
    fn test_history_survives_descriptor_deletion() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.register_principal("alice", None, "h").unwrap();
        let c = store.create_connection(alice.id, &sample_upsert("dev")).unwrap();
        store.append_history(alice.id, &c.host, c.port, &c.username).unwrap();
        store.delete_connection(c.id, alice.id).unwrap();
        assert_eq!(store.list_history(alice.id).unwrap().len(), 1);
    }

    #[test]
    fn test_favorites_and_pinned_toggle() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.register_principal("alice", None, "h").unwrap();
        let c = store.create_connection(alice.id, &sample_upsert("dev")).unwrap();

        store.set_favorite(alice.id, c.id, true).unwrap();
        store.set_favorite(alice.id, c.id, true).unwrap();
        assert!(store.favorite_ids(alice.id).unwrap().contains(&c.id));
        store.set_favorite(alice.id, c.id, false).unwrap();
        assert!(store.favorite_ids(alice.id).unwrap().is_empty());

        store.set_pinned(alice.id, c.id, true).unwrap();
        assert!(store.pinned_ids(alice.id).unwrap().contains(&c.id));
    }

    #[test]
    fn test_mfa_secret_lifecycle() {
        let store = Store::open_in_memory().unwrap();
        let alice = store.register_principal("alice", None, "h").unwrap();
        store.set_mfa_secret(alice.id, "gcm:secret").unwrap();
        let p = store.get_principal(alice.id).unwrap();
        assert!(!p.mfa_enabled);
        store.set_mfa_enabled(alice.id, true).unwrap();
        assert!(store.get_principal(alice.id).unwrap().mfa_enabled);
        store.set_mfa_enabled(alice.id, false).unwrap();
        let p = store.get_principal(alice.id).unwrap();
        assert!(!p.mfa_enabled);
        assert!(p.mfa_secret.is_none());
    }
}
