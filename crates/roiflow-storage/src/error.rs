//! Storage error types for roiflow-storage.
//!
//! [`StorageError`] covers all anticipated failure modes in the storage layer:
//! serialization, SQLite and migration failures, missing groups, attributes
//! and payloads, values that have no stored form, payload compression, and
//! graph errors raised while a loader pushes values back into slots.

use thiserror::Error;

use roiflow_core::CoreError;

use crate::types::PayloadKey;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The SQLite backend reported an error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A schema migration could not be applied.
    #[error("migration error: {0}")]
    Migration(String),

    /// No group exists at the given path.
    #[error("group not found: '{path}'")]
    GroupNotFound { path: String },

    /// The group exists but has no attribute of that name.
    #[error("attribute not found: '{name}' in group '{path}'")]
    AttrNotFound { path: String, name: String },

    /// No payload is stored under the given key.
    #[error("payload not found: {key}")]
    PayloadNotFound { key: PayloadKey },

    /// A value has no stored representation (e.g. an opaque object).
    #[error("unsupported value: {reason}")]
    Unsupported { reason: String },

    /// Compressing or decompressing a payload failed.
    #[error("payload i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be turned back into a value.
    #[error("corrupt stored data: {reason}")]
    Corrupt { reason: String },

    /// Applying loaded state to the graph failed.
    #[error(transparent)]
    Core(#[from] CoreError),
}
