//! Storage-layer identifiers.
//!
//! [`PayloadKey`] is defined here (not in roiflow-core) because payload
//! identity is a storage concern -- bytes only gain a key when stored.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Content address of a stored payload: the blake3 hex digest of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PayloadKey(pub String);

impl PayloadKey {
    /// The key `data` is stored under.
    pub fn for_bytes(data: &[u8]) -> Self {
        PayloadKey(blake3::hash(data).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PayloadKey({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_content_addressed() {
        let a = PayloadKey::for_bytes(b"block");
        let b = PayloadKey::for_bytes(b"block");
        let c = PayloadKey::for_bytes(b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);
    }
}
