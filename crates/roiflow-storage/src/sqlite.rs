//! SQLite implementation of [`GroupStore`] and [`PayloadStore`].
//!
//! [`SqliteStore`] persists the group tree in a SQLite database with WAL
//! mode, foreign keys and automatic schema migrations. Attribute values are
//! stored as JSON TEXT via serde_json, payloads as BLOBs keyed by their
//! blake3 digest. The connection sits behind a mutex so the store can be
//! shared with block caches as an `Arc<dyn PayloadStore>`; clones share the
//! connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::error::StorageError;
use crate::group::{join_path, normalize_path, split_path, Attr, Group};
use crate::traits::{GroupStore, PayloadStore};
use crate::types::PayloadKey;

/// SQLite-backed storage.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) a SQLite database at `path`.
    pub fn new(path: &str) -> Result<Self, StorageError> {
        let conn = crate::schema::open_database(path)?;
        debug!(path, "sqlite store opened");
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory SQLite database (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = crate::schema::open_in_memory()?;
        Ok(SqliteStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Statement helpers shared by CRUD calls and bulk saves
// ---------------------------------------------------------------------------

fn group_exists(conn: &Connection, path: &str) -> Result<bool, StorageError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM groups WHERE path = ?1)",
        params![path],
        |row| row.get(0),
    )?;
    Ok(exists)
}

fn require_group(conn: &Connection, path: &str) -> Result<(), StorageError> {
    if group_exists(conn, path)? {
        Ok(())
    } else {
        Err(StorageError::GroupNotFound {
            path: path.to_string(),
        })
    }
}

/// Inserts every missing ancestor of `path` and `path` itself.
fn insert_group_chain(conn: &Connection, path: &str) -> Result<(), StorageError> {
    let mut parent = String::new();
    for name in split_path(path) {
        let current = join_path(&parent, name);
        conn.execute(
            "INSERT OR IGNORE INTO groups (path, parent, name, position)
             VALUES (?1, ?2, ?3,
                     (SELECT COALESCE(MAX(position) + 1, 0) FROM groups WHERE parent = ?2))",
            params![current, parent, name],
        )?;
        parent = current;
    }
    Ok(())
}

fn upsert_attr(conn: &Connection, path: &str, name: &str, value: &Attr) -> Result<(), StorageError> {
    let json = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO attrs (group_path, name, position, value_json)
         VALUES (?1, ?2,
                 (SELECT COALESCE(MAX(position) + 1, 0) FROM attrs WHERE group_path = ?1),
                 ?3)
         ON CONFLICT(group_path, name) DO UPDATE SET value_json = excluded.value_json",
        params![path, name, json],
    )?;
    Ok(())
}

fn delete_group_rows(conn: &Connection, path: &str) -> Result<usize, StorageError> {
    if path.is_empty() {
        conn.execute("DELETE FROM attrs WHERE group_path = ''", [])?;
        conn.execute("DELETE FROM groups WHERE parent = ''", [])?;
        return Ok(1);
    }
    Ok(conn.execute("DELETE FROM groups WHERE path = ?1", params![path])?)
}

fn save_subtree(tx: &Transaction<'_>, path: &str, tree: &Group) -> Result<(), StorageError> {
    for (name, attr) in &tree.attrs {
        upsert_attr(tx, path, name, attr)?;
    }
    for (name, child) in &tree.groups {
        let child_path = join_path(path, name);
        insert_group_chain(tx, &child_path)?;
        save_subtree(tx, &child_path, child)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// GroupStore
// ---------------------------------------------------------------------------

impl GroupStore for SqliteStore {
    fn create_group(&mut self, path: &str) -> Result<(), StorageError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_group_chain(&tx, &normalize_path(path))?;
        tx.commit()?;
        Ok(())
    }

    fn delete_group(&mut self, path: &str) -> Result<(), StorageError> {
        let path = normalize_path(path);
        let conn = self.conn();
        if delete_group_rows(&conn, &path)? == 0 {
            return Err(StorageError::GroupNotFound { path });
        }
        Ok(())
    }

    fn has_group(&self, path: &str) -> Result<bool, StorageError> {
        group_exists(&self.conn(), &normalize_path(path))
    }

    fn list_groups(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let path = normalize_path(path);
        let conn = self.conn();
        require_group(&conn, &path)?;
        let mut stmt =
            conn.prepare_cached("SELECT name FROM groups WHERE parent = ?1 ORDER BY position")?;
        let names = stmt
            .query_map(params![path], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn set_attr(&mut self, path: &str, name: &str, value: &Attr) -> Result<(), StorageError> {
        let path = normalize_path(path);
        let conn = self.conn();
        require_group(&conn, &path)?;
        upsert_attr(&conn, &path, name, value)
    }

    fn get_attr(&self, path: &str, name: &str) -> Result<Attr, StorageError> {
        let path = normalize_path(path);
        let conn = self.conn();
        require_group(&conn, &path)?;
        let json: Option<String> = conn
            .query_row(
                "SELECT value_json FROM attrs WHERE group_path = ?1 AND name = ?2",
                params![path, name],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Err(StorageError::AttrNotFound {
                path,
                name: name.to_string(),
            }),
        }
    }

    fn list_attrs(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let path = normalize_path(path);
        let conn = self.conn();
        require_group(&conn, &path)?;
        let mut stmt = conn
            .prepare_cached("SELECT name FROM attrs WHERE group_path = ?1 ORDER BY position")?;
        let names = stmt
            .query_map(params![path], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn delete_attr(&mut self, path: &str, name: &str) -> Result<(), StorageError> {
        let path = normalize_path(path);
        let conn = self.conn();
        let removed = conn.execute(
            "DELETE FROM attrs WHERE group_path = ?1 AND name = ?2",
            params![path, name],
        )?;
        if removed == 0 {
            return Err(StorageError::AttrNotFound {
                path,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Bulk replace inside a single transaction.
    fn save_tree(&mut self, path: &str, tree: &Group) -> Result<(), StorageError> {
        let path = normalize_path(path);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        delete_group_rows(&tx, &path)?;
        insert_group_chain(&tx, &path)?;
        save_subtree(&tx, &path, tree)?;
        tx.commit()?;
        debug!(path = %path, groups = tree.count_groups(), "group tree saved");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PayloadStore
// ---------------------------------------------------------------------------

impl PayloadStore for SqliteStore {
    fn put_payload(&self, data: &[u8]) -> Result<PayloadKey, StorageError> {
        let key = PayloadKey::for_bytes(data);
        self.conn().execute(
            "INSERT OR IGNORE INTO payloads (key, data, size) VALUES (?1, ?2, ?3)",
            params![key.as_str(), data, data.len() as i64],
        )?;
        Ok(key)
    }

    fn get_payload(&self, key: &PayloadKey) -> Result<Vec<u8>, StorageError> {
        let data: Option<Vec<u8>> = self
            .conn()
            .query_row(
                "SELECT data FROM payloads WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        data.ok_or_else(|| StorageError::PayloadNotFound { key: key.clone() })
    }

    fn has_payload(&self, key: &PayloadKey) -> Result<bool, StorageError> {
        let exists: bool = self.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM payloads WHERE key = ?1)",
            params![key.as_str()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn payload_count(&self) -> Result<usize, StorageError> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM payloads", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
