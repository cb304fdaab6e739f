//! The storage contracts: [`GroupStore`] for the group tree and
//! [`PayloadStore`] for content-addressed binary blobs.
//!
//! Two-layer API design:
//! - **Low-level CRUD** methods form the trait foundation. Each call touches
//!   one group or one attribute, serving as the incremental save mechanism.
//! - **High-level convenience** methods (`save_tree`, `load_tree`) provide
//!   bulk operations built on the CRUD primitives. Backends may override
//!   them with a faster equivalent.
//!
//! All backends (InMemoryStore, SqliteStore) implement both traits, so they
//! are fully swappable without changing serializers.

use crate::error::StorageError;
use crate::group::{join_path, normalize_path, Attr, Group};
use crate::types::PayloadKey;

/// The storage contract for nested key/value groups.
///
/// Paths are `/`-separated; the empty path is the root group, which always
/// exists.
pub trait GroupStore {
    // -------------------------------------------------------------------
    // Group CRUD
    // -------------------------------------------------------------------

    /// Creates the group at `path` and any missing ancestors. Existing
    /// groups are left untouched.
    fn create_group(&mut self, path: &str) -> Result<(), StorageError>;

    /// Deletes the group at `path` with everything below it. Deleting the
    /// root empties it.
    fn delete_group(&mut self, path: &str) -> Result<(), StorageError>;

    fn has_group(&self, path: &str) -> Result<bool, StorageError>;

    /// Names of the direct children of `path`, in creation order.
    fn list_groups(&self, path: &str) -> Result<Vec<String>, StorageError>;

    // -------------------------------------------------------------------
    // Attribute CRUD
    // -------------------------------------------------------------------

    /// Sets (or overwrites) an attribute on an existing group.
    fn set_attr(&mut self, path: &str, name: &str, value: &Attr) -> Result<(), StorageError>;

    fn get_attr(&self, path: &str, name: &str) -> Result<Attr, StorageError>;

    /// Names of the attributes of `path`, in creation order.
    fn list_attrs(&self, path: &str) -> Result<Vec<String>, StorageError>;

    fn delete_attr(&mut self, path: &str, name: &str) -> Result<(), StorageError>;

    // -------------------------------------------------------------------
    // High-level convenience methods
    // -------------------------------------------------------------------

    /// Replaces whatever is stored at `path` with `tree`.
    fn save_tree(&mut self, path: &str, tree: &Group) -> Result<(), StorageError> {
        let path = normalize_path(path);
        if self.has_group(&path)? {
            self.delete_group(&path)?;
        }
        self.create_group(&path)?;
        for (name, attr) in &tree.attrs {
            self.set_attr(&path, name, attr)?;
        }
        for (name, child) in &tree.groups {
            self.save_tree(&join_path(&path, name), child)?;
        }
        Ok(())
    }

    /// Reads the subtree rooted at `path`.
    fn load_tree(&self, path: &str) -> Result<Group, StorageError> {
        let path = normalize_path(path);
        let mut group = Group::new();
        for name in self.list_attrs(&path)? {
            let attr = self.get_attr(&path, &name)?;
            group.attrs.insert(name, attr);
        }
        for name in self.list_groups(&path)? {
            let child = self.load_tree(&join_path(&path, &name))?;
            group.groups.insert(name, child);
        }
        Ok(group)
    }
}

/// Content-addressed blob storage, shared across threads (block caches
/// evict to it from worker threads).
pub trait PayloadStore: Send + Sync {
    /// Stores `data` and returns its key. Storing the same bytes twice is a
    /// no-op returning the same key.
    fn put_payload(&self, data: &[u8]) -> Result<PayloadKey, StorageError>;

    fn get_payload(&self, key: &PayloadKey) -> Result<Vec<u8>, StorageError>;

    fn has_payload(&self, key: &PayloadKey) -> Result<bool, StorageError>;

    /// Number of stored payloads.
    fn payload_count(&self) -> Result<usize, StorageError>;
}
