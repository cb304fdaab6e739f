//! Deterministic content hashing of group trees using blake3.
//!
//! Hashes are derived state, never stored in the database. Determinism
//! comes from the tree itself: attributes and children are `IndexMap`s, so
//! the same snapshot always serializes to the same bytes.

use crate::error::StorageError;
use crate::group::Group;

/// Hashes a group and everything below it.
pub fn hash_group(group: &Group) -> Result<blake3::Hash, StorageError> {
    let mut hasher = blake3::Hasher::new();
    serde_json::to_writer(&mut hasher, group)?;
    Ok(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::Attr;

    #[test]
    fn equal_trees_hash_equal() {
        let a = Group::new().with_attr("x", Attr::Int(1));
        let b = Group::new().with_attr("x", Attr::Int(1));
        assert_eq!(hash_group(&a).unwrap(), hash_group(&b).unwrap());
    }

    #[test]
    fn any_change_changes_the_hash() {
        let base = Group::new().with_group("child", Group::new().with_attr("x", Attr::Int(1)));
        let changed = Group::new().with_group("child", Group::new().with_attr("x", Attr::Int(2)));
        assert_ne!(hash_group(&base).unwrap(), hash_group(&changed).unwrap());
    }
}
