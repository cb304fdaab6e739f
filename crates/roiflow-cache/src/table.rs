//! The block table: per-block state with single-flight recomputation.
//!
//! Entries live in a `DashMap`; holding an entry guard is the per-block
//! lock. A block that is not in the table is dirty. Starting a
//! recomputation stores an [`BlockState::InFlight`] entry carrying a shared
//! handle, so later requesters for the same block wait on that handle
//! instead of recomputing.
//!
//! Each in-flight entry carries a ticket. A completion only turns the block
//! clean if the entry still holds the same ticket; if the block was marked
//! dirty meanwhile, the late result is handed to its waiters but never
//! stored.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use roiflow_core::{Array, CoreResult, LazyResult, SharedResult};
use roiflow_storage::PayloadKey;

use crate::block::BlockAddress;

/// State of one block address.
#[derive(Clone)]
pub enum BlockState {
    /// A recomputation is running; clones of the handle share its result.
    InFlight { ticket: u64, handle: SharedResult },
    /// Data held in memory.
    Clean(Array),
    /// Data evicted to a payload store.
    Stored(PayloadKey),
}

impl std::fmt::Debug for BlockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockState::InFlight { ticket, .. } => write!(f, "InFlight({ticket})"),
            BlockState::Clean(a) => write!(f, "Clean(shape={:?})", a.shape()),
            BlockState::Stored(key) => write!(f, "Stored({key})"),
        }
    }
}

/// What a requester should do to obtain a block.
pub enum BlockLookup {
    /// Already in memory, or a shared in-flight result.
    Ready(LazyResult),
    /// Evicted; reload from the payload store under this key.
    Stored(PayloadKey),
}

#[derive(Default)]
pub struct BlockTable {
    entries: DashMap<BlockAddress, BlockState>,
    next_ticket: AtomicU64,
    recomputes: AtomicU64,
}

impl BlockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a block, starting its recomputation if it is dirty.
    ///
    /// `start` plans the recomputation for the given ticket. It runs with
    /// the entry locked, so it must not touch this table synchronously; the
    /// work it plans reports back through [`Self::complete`].
    pub fn lookup(
        &self,
        addr: &BlockAddress,
        start: impl FnOnce(u64) -> CoreResult<SharedResult>,
    ) -> CoreResult<BlockLookup> {
        match self.entries.entry(addr.clone()) {
            Entry::Occupied(entry) => Ok(match entry.get() {
                BlockState::Clean(data) => BlockLookup::Ready(LazyResult::ready(data.clone())),
                BlockState::InFlight { handle, .. } => BlockLookup::Ready(handle.clone().into()),
                BlockState::Stored(key) => BlockLookup::Stored(key.clone()),
            }),
            Entry::Vacant(entry) => {
                let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
                let handle = start(ticket)?;
                entry.insert(BlockState::InFlight {
                    ticket,
                    handle: handle.clone(),
                });
                self.recomputes.fetch_add(1, Ordering::SeqCst);
                debug!(block = %addr, ticket, "block recomputation started");
                Ok(BlockLookup::Ready(handle.into()))
            }
        }
    }

    /// Records the outcome of the recomputation identified by `ticket`.
    /// Success makes the block clean; failure leaves it dirty so a later
    /// request retries.
    pub fn complete(&self, addr: &BlockAddress, ticket: u64, result: &CoreResult<Array>) {
        if let Entry::Occupied(mut entry) = self.entries.entry(addr.clone()) {
            let current = matches!(entry.get(), BlockState::InFlight { ticket: t, .. } if *t == ticket);
            if !current {
                return;
            }
            match result {
                Ok(data) => {
                    entry.insert(BlockState::Clean(data.clone()));
                }
                Err(err) => {
                    debug!(block = %addr, ticket, error = %err, "block recomputation failed");
                    entry.remove();
                }
            }
        }
    }

    /// Marks blocks dirty. In-flight work keeps running for its waiters
    /// but its result is discarded.
    pub fn mark_dirty(&self, blocks: &[BlockAddress]) {
        for addr in blocks {
            self.entries.remove(addr);
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Stores reloaded or restored data for a block.
    pub fn set_clean(&self, addr: &BlockAddress, data: Array) {
        self.entries.insert(addr.clone(), BlockState::Clean(data));
    }

    /// Replaces clean data with a payload key. Returns false if the block is
    /// not clean in memory.
    pub fn set_stored(&self, addr: &BlockAddress, key: PayloadKey) -> bool {
        match self.entries.get_mut(addr) {
            Some(mut entry) if matches!(*entry, BlockState::Clean(_)) => {
                *entry = BlockState::Stored(key);
                true
            }
            _ => false,
        }
    }

    /// Records that a block's data lives on the payload store, whatever its
    /// current state.
    pub fn insert_stored(&self, addr: &BlockAddress, key: PayloadKey) {
        self.entries.insert(addr.clone(), BlockState::Stored(key));
    }

    /// Swaps a stored block back to in-memory data, unless the block was
    /// invalidated or rewritten since `key` was read.
    pub fn reloaded(&self, addr: &BlockAddress, key: &PayloadKey, data: Array) {
        if let Some(mut entry) = self.entries.get_mut(addr) {
            if matches!(&*entry, BlockState::Stored(k) if k == key) {
                *entry = BlockState::Clean(data);
            }
        }
    }

    pub fn state(&self, addr: &BlockAddress) -> Option<BlockState> {
        self.entries.get(addr).map(|e| e.value().clone())
    }

    /// In-memory data of a clean block.
    pub fn clean_data(&self, addr: &BlockAddress) -> Option<Array> {
        match self.entries.get(addr)?.value() {
            BlockState::Clean(data) => Some(data.clone()),
            _ => None,
        }
    }

    /// Addresses holding real data, in memory or on the store, sorted.
    pub fn clean_blocks(&self) -> Vec<BlockAddress> {
        let mut out: Vec<BlockAddress> = self
            .entries
            .iter()
            .filter(|e| matches!(e.value(), BlockState::Clean(_) | BlockState::Stored(_)))
            .map(|e| e.key().clone())
            .collect();
        out.sort();
        out
    }

    /// Number of recomputations started since the table was created.
    pub fn recompute_count(&self) -> u64 {
        self.recomputes.load(Ordering::SeqCst)
    }
}
