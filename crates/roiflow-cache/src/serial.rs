//! Persisting a block cache's table.
//!
//! The cache group holds the block shape the table was built for and one
//! attribute per clean block, named by block address, whose value is the
//! payload key of the block's data. Block data itself lives in the
//! [`PayloadStore`].

use std::sync::Arc;

use tracing::{debug, warn};

use roiflow_core::{CoreError, Graph, OperatorId};
use roiflow_storage::{Attr, Group, PayloadKey, PayloadStore, SerialItem, StorageError};

use crate::block::BlockAddress;
use crate::op_cache::OpBlockCache;

pub struct SerialBlockCache {
    cache: OperatorId,
    key: String,
    store: Arc<dyn PayloadStore>,
}

impl SerialBlockCache {
    pub fn new(cache: OperatorId, key: &str, store: Arc<dyn PayloadStore>) -> Self {
        SerialBlockCache {
            cache,
            key: key.to_string(),
            store,
        }
    }
}

fn block_shape_attr(shape: &[usize]) -> Attr {
    Attr::IntArray(shape.iter().map(|&n| n as i64).collect())
}

impl SerialItem for SerialBlockCache {
    fn serialize(&self, graph: &Graph, group: &mut Group) -> Result<(), StorageError> {
        let store = Arc::clone(&self.store);
        let persisted = graph.with_operator_mut::<OpBlockCache, _>(self.cache, |cache, _ctx| {
            let Some(block_shape) = cache.grid().map(|g| g.block_shape().to_vec()) else {
                return Ok(None);
            };
            cache.set_store(store);
            let keys = cache.persist_blocks().map_err(|e| CoreError::compute(e.to_string()))?;
            Ok(Some((block_shape, keys)))
        })?;
        let Some((block_shape, keys)) = persisted else {
            return Ok(());
        };

        let sub = group.ensure_group(&self.key);
        sub.set_attr("block_shape", block_shape_attr(&block_shape));
        let entries = sub.ensure_group("blocks");
        for (addr, key) in keys {
            entries.set_attr(&addr.key(), Attr::Str(key.0));
        }
        Ok(())
    }

    fn deserialize(&self, graph: &Graph, group: &Group) -> Result<(), StorageError> {
        let Some(sub) = group.group(&self.key) else {
            return Ok(());
        };
        let saved_shape = sub.attr("block_shape").and_then(Attr::as_int_array).ok_or_else(|| {
            StorageError::Corrupt {
                reason: format!("cache group '{}' has no block_shape", self.key),
            }
        })?;

        let mut blocks = Vec::new();
        if let Some(entries) = sub.group("blocks") {
            for (name, attr) in &entries.attrs {
                let addr = BlockAddress::from_key(name).ok_or_else(|| StorageError::Corrupt {
                    reason: format!("'{name}' is not a block address"),
                })?;
                let key = attr.as_str().ok_or_else(|| StorageError::Corrupt {
                    reason: format!("block {addr} has no payload key"),
                })?;
                blocks.push((addr, PayloadKey(key.to_string())));
            }
        }

        let store = Arc::clone(&self.store);
        let cache_key = self.key.clone();
        let restored = graph.with_operator_mut::<OpBlockCache, _>(self.cache, move |cache, _ctx| {
            cache.set_store(store);
            let current: Option<Vec<i64>> = cache
                .grid()
                .map(|g| g.block_shape().iter().map(|&n| n as i64).collect());
            if current.as_deref() != Some(saved_shape) {
                warn!(cache = %cache_key, "stored block shape differs from the cache grid, blocks skipped");
                return Ok(0);
            }
            let mut restored = 0;
            for (addr, key) in blocks {
                cache.restore_stored(&addr, key)?;
                restored += 1;
            }
            Ok(restored)
        })?;
        debug!(cache = %self.key, restored, "block table restored");
        Ok(())
    }
}
