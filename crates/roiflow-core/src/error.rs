//! Core error types for roiflow-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! connection, lane, configuration and execution failures. `CoreError` is
//! `Clone` so a single failed computation can be handed to every caller
//! waiting on it.

use thiserror::Error;

use crate::id::{OperatorId, SlotId};

/// Convenience alias used throughout the engine.
pub type CoreResult<T> = Result<T, CoreError>;

/// Core errors produced by the roiflow-core crate.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    /// Two slots cannot be connected (level or value kind differ).
    #[error("type mismatch connecting SlotId({downstream}) to SlotId({upstream}): {reason}", downstream = downstream.0, upstream = upstream.0)]
    TypeMismatch {
        downstream: SlotId,
        upstream: SlotId,
        reason: String,
    },

    /// A lane or subslot index violates the append/trailing-remove rule.
    #[error("invalid lane index {index} (current length {len})")]
    InvalidLaneIndex { index: usize, len: usize },

    /// `set_value` or a connection target was an output slot.
    #[error("slot '{name}' (SlotId({id})) is not an input", id = slot.0)]
    NotAnInput { slot: SlotId, name: String },

    /// A domain-level rejection raised from `configure()`.
    #[error("{subsystem}: {message}")]
    ConstraintViolation { subsystem: String, message: String },

    /// A slot was read before it became ready.
    #[error("slot '{name}' (SlotId({id})) is not ready", id = slot.0)]
    NotReady { slot: SlotId, name: String },

    /// A structural change was requested on a level-0 slot.
    #[error("slot '{name}' (SlotId({id})) is not a multislot", id = slot.0)]
    NotMultiSlot { slot: SlotId, name: String },

    /// A slot ID was not found in the slot arena.
    #[error("slot not found: SlotId({id})", id = id.0)]
    SlotNotFound { id: SlotId },

    /// A named slot does not exist on an operator.
    #[error("operator '{operator}' has no slot named '{name}'")]
    UnknownSlot { operator: String, name: String },

    /// An operator ID was not found in the graph.
    #[error("operator not found: OperatorId({id})", id = id.0)]
    OperatorNotFound { id: OperatorId },

    /// The requested connection would close a cycle.
    #[error("connection would create a cycle through OperatorId({id})", id = id.0)]
    CycleDetected { id: OperatorId },

    /// A region of interest does not fit the slot's declared shape.
    #[error("invalid roi {roi}: {reason}")]
    InvalidRoi { roi: String, reason: String },

    /// An operator was re-entered while one of its own callbacks was running.
    #[error("operator '{name}' is busy in another callback")]
    Reentrant { name: String },

    /// An operator's callback panicked and the operator was dropped.
    #[error("operator '{name}' was lost to a panic in one of its callbacks")]
    OperatorLost { name: String },

    /// A downcast to a concrete operator type failed.
    #[error("operator OperatorId({id}) is not a {expected}", id = id.0)]
    WrongOperatorType { id: OperatorId, expected: &'static str },

    /// An operator's computation failed.
    #[error("compute failed: {reason}")]
    Compute { reason: String },

    /// A worker dropped a computation before producing a result.
    #[error("computation was canceled before completion")]
    Canceled,

    /// The worker pool could not be created.
    #[error("worker pool error: {reason}")]
    WorkerPool { reason: String },
}

impl CoreError {
    /// Shorthand for building a [`CoreError::ConstraintViolation`].
    pub fn constraint(subsystem: impl Into<String>, message: impl Into<String>) -> Self {
        CoreError::ConstraintViolation {
            subsystem: subsystem.into(),
            message: message.into(),
        }
    }

    /// Shorthand for building a [`CoreError::Compute`].
    pub fn compute(reason: impl Into<String>) -> Self {
        CoreError::Compute {
            reason: reason.into(),
        }
    }
}
