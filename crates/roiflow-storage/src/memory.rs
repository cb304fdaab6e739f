//! In-memory implementation of [`GroupStore`] and [`PayloadStore`].
//!
//! [`InMemoryStore`] is a first-class backend for tests, ephemeral
//! sessions, and anywhere persistence isn't needed. It keeps the group tree
//! as a plain [`Group`] with identical semantics to the SQLite backend.
//! Clones share the same contents, so one clone can serve as a block
//! cache's payload store while another is written through `&mut`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::StorageError;
use crate::group::{normalize_path, split_path, Attr, Group};
use crate::traits::{GroupStore, PayloadStore};
use crate::types::PayloadKey;

#[derive(Debug, Default)]
struct Contents {
    root: Group,
    payloads: HashMap<PayloadKey, Vec<u8>>,
}

/// Shared, in-memory storage backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<Contents>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore::default()
    }

    fn contents(&self) -> MutexGuard<'_, Contents> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A copy of the whole group tree.
    pub fn snapshot(&self) -> Group {
        self.contents().root.clone()
    }
}

fn not_found(path: &str) -> StorageError {
    StorageError::GroupNotFound {
        path: normalize_path(path),
    }
}

impl GroupStore for InMemoryStore {
    fn create_group(&mut self, path: &str) -> Result<(), StorageError> {
        self.contents().root.ensure_path(path);
        Ok(())
    }

    fn delete_group(&mut self, path: &str) -> Result<(), StorageError> {
        let mut contents = self.contents();
        if split_path(path).is_empty() {
            contents.root = Group::new();
            return Ok(());
        }
        contents
            .root
            .remove_path(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    fn has_group(&self, path: &str) -> Result<bool, StorageError> {
        Ok(self.contents().root.get_path(path).is_some())
    }

    fn list_groups(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let contents = self.contents();
        let group = contents.root.get_path(path).ok_or_else(|| not_found(path))?;
        Ok(group.groups.keys().cloned().collect())
    }

    fn set_attr(&mut self, path: &str, name: &str, value: &Attr) -> Result<(), StorageError> {
        let mut contents = self.contents();
        let group = contents
            .root
            .get_path_mut(path)
            .ok_or_else(|| not_found(path))?;
        group.set_attr(name, value.clone());
        Ok(())
    }

    fn get_attr(&self, path: &str, name: &str) -> Result<Attr, StorageError> {
        let contents = self.contents();
        let group = contents.root.get_path(path).ok_or_else(|| not_found(path))?;
        group
            .attr(name)
            .cloned()
            .ok_or_else(|| StorageError::AttrNotFound {
                path: normalize_path(path),
                name: name.to_string(),
            })
    }

    fn list_attrs(&self, path: &str) -> Result<Vec<String>, StorageError> {
        let contents = self.contents();
        let group = contents.root.get_path(path).ok_or_else(|| not_found(path))?;
        Ok(group.attrs.keys().cloned().collect())
    }

    fn delete_attr(&mut self, path: &str, name: &str) -> Result<(), StorageError> {
        let mut contents = self.contents();
        let group = contents
            .root
            .get_path_mut(path)
            .ok_or_else(|| not_found(path))?;
        group
            .attrs
            .shift_remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::AttrNotFound {
                path: normalize_path(path),
                name: name.to_string(),
            })
    }

    fn save_tree(&mut self, path: &str, tree: &Group) -> Result<(), StorageError> {
        let mut contents = self.contents();
        if split_path(path).is_empty() {
            contents.root = tree.clone();
        } else {
            *contents.root.ensure_path(path) = tree.clone();
        }
        Ok(())
    }

    fn load_tree(&self, path: &str) -> Result<Group, StorageError> {
        let contents = self.contents();
        contents
            .root
            .get_path(path)
            .cloned()
            .ok_or_else(|| not_found(path))
    }
}

impl PayloadStore for InMemoryStore {
    fn put_payload(&self, data: &[u8]) -> Result<PayloadKey, StorageError> {
        let key = PayloadKey::for_bytes(data);
        self.contents()
            .payloads
            .entry(key.clone())
            .or_insert_with(|| data.to_vec());
        Ok(key)
    }

    fn get_payload(&self, key: &PayloadKey) -> Result<Vec<u8>, StorageError> {
        self.contents()
            .payloads
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::PayloadNotFound { key: key.clone() })
    }

    fn has_payload(&self, key: &PayloadKey) -> Result<bool, StorageError> {
        Ok(self.contents().payloads.contains_key(key))
    }

    fn payload_count(&self) -> Result<usize, StorageError> {
        Ok(self.contents().payloads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crud_roundtrip() {
        let mut store = InMemoryStore::new();
        store.create_group("a/b").unwrap();
        store.set_attr("a/b", "n", &Attr::Int(4)).unwrap();
        assert_eq!(store.get_attr("a/b", "n").unwrap(), Attr::Int(4));
        assert_eq!(store.list_groups("").unwrap(), vec!["a"]);
        assert_eq!(store.list_attrs("a/b").unwrap(), vec!["n"]);

        store.delete_attr("a/b", "n").unwrap();
        assert!(matches!(
            store.get_attr("a/b", "n"),
            Err(StorageError::AttrNotFound { .. })
        ));
        store.delete_group("a").unwrap();
        assert!(!store.has_group("a/b").unwrap());
        assert!(matches!(
            store.set_attr("a", "x", &Attr::Bool(true)),
            Err(StorageError::GroupNotFound { .. })
        ));
    }

    #[test]
    fn clones_share_payloads() {
        let store = InMemoryStore::new();
        let other = store.clone();
        let key = store.put_payload(b"abc").unwrap();
        assert_eq!(other.get_payload(&key).unwrap(), b"abc");
        assert_eq!(store.put_payload(b"abc").unwrap(), key);
        assert_eq!(other.payload_count().unwrap(), 1);
    }

    #[test]
    fn missing_payload_is_reported() {
        let store = InMemoryStore::new();
        let key = PayloadKey::for_bytes(b"never stored");
        assert!(!store.has_payload(&key).unwrap());
        assert!(matches!(
            store.get_payload(&key),
            Err(StorageError::PayloadNotFound { .. })
        ));
    }
}
