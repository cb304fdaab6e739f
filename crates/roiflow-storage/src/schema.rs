//! The project database layout.
//!
//! The first migration creates three tables:
//!
//! - `groups`: the group tree, keyed by `/`-separated path. The root row
//!   has the empty path, `position` keeps sibling order, and `parent`
//!   cascades deletes down a subtree.
//! - `attrs`: one JSON-encoded [`Attr`](crate::group::Attr) per
//!   `(group_path, name)`, ordered by `position`.
//! - `payloads`: blobs keyed by their [`PayloadKey`](crate::types::PayloadKey),
//!   holding compressed arrays (cache blocks and imported datasets).
//!
//! The applied schema version is SQLite's `user_version`, advanced by
//! `rusqlite_migration`.

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(include_str!("migrations/001_initial_schema.sql"))])
}

/// Opens the project database at `path`, creating and migrating it as
/// needed.
pub fn open_database(path: &str) -> Result<Connection, StorageError> {
    let mut conn = Connection::open(path)?;
    prepare(&mut conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> Result<Connection, StorageError> {
    let mut conn = Connection::open_in_memory()?;
    prepare(&mut conn)?;
    Ok(conn)
}

fn prepare(conn: &mut Connection) -> Result<(), StorageError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    // Removing a group row must take its attrs and subgroups with it.
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations()
        .to_latest(conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(())
}
