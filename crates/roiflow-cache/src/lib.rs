//! Blockwise memoization for roiflow graphs.
//!
//! [`OpBlockCache`] sits in front of an upstream output and serves
//! requests from a table of fixed-size blocks. At most one recomputation
//! per block is in flight; concurrent requesters share its result.
//!
//! # Modules
//!
//! - [`block`]: BlockAddress and BlockGrid
//! - [`table`]: BlockTable with single-flight recomputation
//! - [`op_cache`]: the OpBlockCache operator and its persistence hooks
//! - [`serial`]: SerialBlockCache

pub mod block;
pub mod op_cache;
pub mod serial;
pub mod table;

pub use block::{BlockAddress, BlockGrid};
pub use op_cache::OpBlockCache;
pub use serial::SerialBlockCache;
pub use table::{BlockLookup, BlockState, BlockTable};
