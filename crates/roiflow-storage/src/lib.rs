//! Persistence for roiflow graphs.
//!
//! Provides the [`GroupStore`] and [`PayloadStore`] traits defining the
//! storage contract that all backends implement, plus [`InMemoryStore`] and
//! [`SqliteStore`] as first-class backends, and the serializers that map
//! slot values and lane counts onto the group tree.
//!
//! # Architecture
//!
//! The storage layer has a two-layer API:
//! - **Low-level CRUD** methods (create/delete/list groups, set/get/list
//!   attributes) serve as the incremental save mechanism.
//! - **High-level convenience** methods (`save_tree`, `load_tree`) provide
//!   bulk operations for a whole serializer group.
//!
//! # Modules
//!
//! - [`codec`]: compressed array payloads
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: PayloadKey
//! - [`group`]: the Group tree and typed Attr values
//! - [`traits`]: GroupStore and PayloadStore
//! - [`convert`]: slot Value <-> Attr
//! - [`hash`]: blake3 snapshot hashes for save dirtiness
//! - [`serial`]: SerialItem, SerialSlot, SerialLaneCount, OperatorSerializer
//! - [`memory`]: InMemoryStore implementation
//! - [`schema`]: migration setup
//! - [`sqlite`]: SqliteStore implementation

pub mod codec;
pub mod convert;
pub mod error;
pub mod group;
pub mod hash;
pub mod memory;
pub mod schema;
pub mod serial;
pub mod sqlite;
pub mod traits;
pub mod types;

// Re-export key types for ergonomic use.
pub use codec::{decode_array, encode_array};
pub use convert::{attr_to_value, value_to_attr};
pub use error::StorageError;
pub use group::{Attr, Group};
pub use hash::hash_group;
pub use memory::InMemoryStore;
pub use serial::{OperatorSerializer, SerialItem, SerialLaneCount, SerialSlot};
pub use sqlite::SqliteStore;
pub use traits::{GroupStore, PayloadStore};
pub use types::PayloadKey;
