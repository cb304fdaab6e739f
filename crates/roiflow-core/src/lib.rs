//! Core of the roiflow lazy dataflow engine.
//!
//! Operators own named input and output slots. Slots connect into a graph;
//! values and metadata flow forward through `configure()`, data is pulled
//! backward on demand through `get(roi)`, and invalidation travels forward
//! as dirty regions of interest.
//!
//! # Modules
//!
//! - [`id`]: OperatorId, SlotId, ObserverId newtypes
//! - [`error`]: CoreError and CoreResult
//! - [`roi`]: per-axis `[start, stop)` regions
//! - [`value`], [`meta`]: slot values and metadata
//! - [`lazy`]: deferred, composable results
//! - [`slot`]: slot declarations and arena records
//! - [`observer`]: events delivered to slot observers
//! - [`operator`]: the Operator trait and callback contexts
//! - [`graph`]: the graph context (mutation lock + worker pool)
//! - [`lanes`]: lane groups
//! - [`config`]: GraphConfig

pub mod config;
pub mod error;
pub mod graph;
pub mod id;
pub mod lanes;
pub mod lazy;
pub mod meta;
mod multislot;
pub mod observer;
pub mod operator;
mod propagate;
pub mod roi;
pub mod slot;
pub mod value;

// Re-export key types for ergonomic use.
pub use config::GraphConfig;
pub use error::{CoreError, CoreResult};
pub use graph::Graph;
pub use id::{ObserverId, OperatorId, SlotId};
pub use lanes::{LaneGroup, OperatorFactory};
pub use lazy::{LazyResult, SharedResult};
pub use meta::{DType, Meta};
pub use observer::{ChangeKind, ObserverFailure, SlotEvent, StructuralChange};
pub use operator::{ExecuteContext, OpContext, Operator};
pub use roi::Roi;
pub use slot::{Direction, SlotRef, SlotSpec};
pub use value::{Array, Value, ValueKind};
