//! `OpBlockCache`: blockwise memoization in front of an upstream output.
//!
//! Requests are split along a [`BlockGrid`]; clean blocks are served from
//! the table, dirty blocks are recomputed by requesting exactly the block's
//! region from `Input`, and the fragments are assembled into one array
//! matching the requested ROI. Dirty notifications coarsen to whole blocks.
//!
//! Clean blocks can be evicted to a [`PayloadStore`]; a later read of an
//! evicted block reloads it transparently.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use ndarray::{ArrayD, IxDyn, Slice};
use tracing::debug;

use roiflow_core::{
    Array, CoreError, CoreResult, ExecuteContext, LazyResult, OpContext, Operator, Roi,
    SharedResult, SlotId, SlotRef, SlotSpec, ValueKind,
};
use roiflow_storage::{decode_array, encode_array, PayloadKey, PayloadStore, StorageError};

use crate::block::{BlockAddress, BlockGrid};
use crate::table::{BlockLookup, BlockState, BlockTable};

pub struct OpBlockCache {
    table: Arc<BlockTable>,
    grid: Option<BlockGrid>,
    store: Option<Arc<dyn PayloadStore>>,
}

impl Default for OpBlockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl OpBlockCache {
    pub fn new() -> Self {
        OpBlockCache {
            table: Arc::new(BlockTable::new()),
            grid: None,
            store: None,
        }
    }

    /// Attaches the store evicted blocks are written to.
    pub fn with_store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn set_store(&mut self, store: Arc<dyn PayloadStore>) {
        self.store = Some(store);
    }

    pub fn grid(&self) -> Option<&BlockGrid> {
        self.grid.as_ref()
    }

    /// Addresses holding real data (in memory or evicted), sorted.
    pub fn clean_blocks(&self) -> Vec<BlockAddress> {
        self.table.clean_blocks()
    }

    pub fn block_state(&self, addr: &BlockAddress) -> Option<BlockState> {
        self.table.state(addr)
    }

    pub fn block_roi(&self, addr: &BlockAddress) -> CoreResult<Roi> {
        self.configured_grid()?.block_roi(addr)
    }

    pub fn recompute_count(&self) -> u64 {
        self.table.recompute_count()
    }

    fn configured_grid(&self) -> CoreResult<&BlockGrid> {
        self.grid
            .as_ref()
            .ok_or_else(|| CoreError::constraint("BlockCache", "cache is not configured"))
    }

    fn require_store(&self) -> Result<&Arc<dyn PayloadStore>, StorageError> {
        self.store.as_ref().ok_or_else(|| StorageError::Unsupported {
            reason: "block cache has no payload store attached".into(),
        })
    }

    // -----------------------------------------------------------------------
    // Persistence hooks
    // -----------------------------------------------------------------------

    /// Encoded data of a clean block, or `None` if the block is dirty or
    /// still being computed.
    pub fn flush(&self, addr: &BlockAddress) -> Result<Option<Vec<u8>>, StorageError> {
        match self.table.state(addr) {
            Some(BlockState::Clean(data)) => Ok(Some(encode_array(&data)?)),
            Some(BlockState::Stored(key)) => Ok(Some(self.require_store()?.get_payload(&key)?)),
            _ => Ok(None),
        }
    }

    /// Installs previously flushed data as a clean block.
    pub fn restore(&self, addr: &BlockAddress, bytes: &[u8]) -> Result<(), StorageError> {
        let expected = self.block_roi(addr)?.shape();
        let data = decode_array(bytes)?;
        if data.shape() != expected.as_slice() {
            return Err(StorageError::Corrupt {
                reason: format!(
                    "block {addr} payload has shape {:?}, expected {expected:?}",
                    data.shape()
                ),
            });
        }
        self.table.set_clean(addr, data);
        Ok(())
    }

    /// Marks a block as held on the payload store under `key`.
    pub fn restore_stored(&self, addr: &BlockAddress, key: PayloadKey) -> CoreResult<()> {
        if !self.configured_grid()?.contains(addr) {
            return Err(CoreError::InvalidRoi {
                roi: addr.to_string(),
                reason: "block outside the cache grid".into(),
            });
        }
        self.table.insert_stored(addr, key);
        Ok(())
    }

    /// Moves a clean block's data to the payload store. Returns false if
    /// the block was not clean in memory.
    pub fn evict(&self, addr: &BlockAddress) -> Result<bool, StorageError> {
        let Some(data) = self.table.clean_data(addr) else {
            return Ok(false);
        };
        let key = self.require_store()?.put_payload(&encode_array(&data)?)?;
        let evicted = self.table.set_stored(addr, key);
        if evicted {
            debug!(block = %addr, "block evicted");
        }
        Ok(evicted)
    }

    /// Evicts every clean in-memory block; returns how many moved.
    pub fn evict_all(&self) -> Result<usize, StorageError> {
        let mut moved = 0;
        for addr in self.table.clean_blocks() {
            if self.evict(&addr)? {
                moved += 1;
            }
        }
        Ok(moved)
    }

    /// Payload key of every block holding real data, writing in-memory
    /// blocks to the store first. Blocks stay in memory.
    pub fn persist_blocks(&self) -> Result<Vec<(BlockAddress, PayloadKey)>, StorageError> {
        let mut out = Vec::new();
        for addr in self.table.clean_blocks() {
            match self.table.state(&addr) {
                Some(BlockState::Clean(data)) => {
                    let key = self.require_store()?.put_payload(&encode_array(&data)?)?;
                    out.push((addr, key));
                }
                Some(BlockState::Stored(key)) => out.push((addr, key)),
                _ => {}
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Request planning
    // -----------------------------------------------------------------------

    fn plan_recompute(
        &self,
        ctx: &ExecuteContext<'_>,
        input: SlotId,
        addr: &BlockAddress,
        block_roi: &Roi,
        ticket: u64,
    ) -> CoreResult<SharedResult> {
        let upstream = ctx.get(input, block_roi)?;
        let table = Arc::clone(&self.table);
        let addr = addr.clone();
        let block_roi = block_roi.clone();
        let work = LazyResult::from_future(async move {
            let result = match AssertUnwindSafe(upstream).catch_unwind().await {
                Ok(result) => result.and_then(|data| check_block(&block_roi, data)),
                Err(_) => Err(CoreError::compute(format!("recomputing block {addr} panicked"))),
            };
            table.complete(&addr, ticket, &result);
            result
        });
        Ok(work.spawn_on(ctx.pool()).shared())
    }

    fn plan_reload(&self, addr: &BlockAddress, key: PayloadKey) -> CoreResult<LazyResult> {
        let store = self.store.clone().ok_or_else(|| {
            CoreError::compute(format!("block {addr} was evicted but no payload store is attached"))
        })?;
        let table = Arc::clone(&self.table);
        let addr = addr.clone();
        Ok(LazyResult::deferred(move || {
            let data = store
                .get_payload(&key)
                .and_then(|bytes| decode_array(&bytes))
                .map_err(|e| CoreError::compute(format!("reloading block {addr}: {e}")))?;
            table.reloaded(&addr, &key, data.clone());
            Ok(data)
        }))
    }
}

/// Rejects data whose shape differs from the block it was computed for.
fn check_block(block_roi: &Roi, data: Array) -> CoreResult<Array> {
    if data.shape() != block_roi.shape().as_slice() {
        return Err(CoreError::compute(format!(
            "block {block_roi} arrived with shape {:?}",
            data.shape()
        )));
    }
    Ok(data)
}

/// Copies every fragment's overlap with `target` into one array.
fn assemble(target: &Roi, pieces: Vec<(Roi, Array)>) -> CoreResult<Array> {
    let mut out = ArrayD::<f32>::zeros(IxDyn(&target.shape()));
    for (block_roi, data) in pieces {
        let Some(overlap) = block_roi.intersect(target) else {
            continue;
        };
        let data = check_block(&block_roi, data)?;
        let src = overlap.relative_to(block_roi.start()).slice(&data);
        let dst = overlap.relative_to(target.start());
        out.slice_each_axis_mut(|ax| {
            let i = ax.axis.index();
            Slice::from(dst.start()[i]..dst.stop()[i])
        })
        .assign(&src);
    }
    Ok(out.into_shared())
}

impl Operator for OpBlockCache {
    fn name(&self) -> &str {
        "OpBlockCache"
    }

    fn category(&self) -> &str {
        "cache"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Input", ValueKind::Array),
            SlotSpec::input("BlockShape", ValueKind::Shape).optional(),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let meta = ctx.meta(ctx.input("Input")?)?;
        let shape = meta
            .shape
            .clone()
            .ok_or_else(|| CoreError::constraint("BlockCache", "input declares no shape"))?;
        let block_slot = ctx.input("BlockShape")?;
        let block_shape = if ctx.is_ready(block_slot) {
            let value = ctx.value(block_slot)?;
            value
                .as_shape()
                .map(<[usize]>::to_vec)
                .ok_or_else(|| CoreError::constraint("BlockCache", format!("block shape is {value:?}")))?
        } else {
            vec![0; shape.len()]
        };
        let grid = BlockGrid::new(&shape, &block_shape)?;

        if self.grid.as_ref() != Some(&grid) {
            if self.grid.is_some() {
                debug!(block_shape = ?grid.block_shape(), "block grid changed, table cleared");
            }
            self.table.clear();
            self.grid = Some(grid);
        }
        let output = ctx.output("Output")?;
        ctx.set_meta(output, meta)
    }

    fn execute(
        &self,
        ctx: &ExecuteContext<'_>,
        output: &SlotRef,
        roi: &Roi,
    ) -> CoreResult<LazyResult> {
        let grid = self.grid.as_ref().ok_or_else(|| CoreError::NotReady {
            slot: output.id,
            name: output.name.clone(),
        })?;
        let input = ctx.input("Input")?;

        let blocks = grid.blocks_overlapping(roi)?;
        let mut parts = Vec::with_capacity(blocks.len());
        for addr in &blocks {
            let block_roi = grid.block_roi(addr)?;
            let lookup = self
                .table
                .lookup(addr, |ticket| self.plan_recompute(ctx, input, addr, &block_roi, ticket))?;
            let data = match lookup {
                BlockLookup::Ready(lazy) => lazy,
                BlockLookup::Stored(key) => self.plan_reload(addr, key)?,
            };
            parts.push(data.map(move |data| Ok((block_roi, data))));
        }

        let target = roi.clone();
        Ok(LazyResult::join_all(parts).map(move |pieces| assemble(&target, pieces)))
    }

    fn propagate_dirty(
        &mut self,
        ctx: &mut OpContext<'_>,
        input: &SlotRef,
        roi: &Roi,
    ) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        if input.name != "Input" {
            self.table.clear();
            return ctx.set_dirty_full(output);
        }
        if let Some(grid) = &self.grid {
            let blocks = grid.blocks_overlapping(roi)?;
            debug!(roi = %roi, blocks = blocks.len(), "blocks invalidated");
            self.table.mark_dirty(&blocks);
        }
        ctx.set_dirty(output, roi)
    }
}
