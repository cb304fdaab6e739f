//! Observer events delivered to presentation-layer collaborators.
//!
//! Observers are plain callbacks registered per slot. Events are queued
//! while a mutation holds the graph's lock and delivered after it is
//! released, so an observer may read or mutate the same
//! [`Graph`](crate::graph::Graph). Events raised by an observer's own
//! mutation are delivered after the ones already queued.
//!
//! Structural changes are reported as two ordered event streams:
//! [`SlotEvent::Prepare`] before the change is applied and
//! [`SlotEvent::Commit`] after it. Every observer of a batch sees all
//! prepares before any commit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::SlotId;
use crate::roi::Roi;

/// Whether a structural change inserts or removes a subslot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Insert,
    Remove,
}

/// One insert or remove on a multislot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralChange {
    /// The multislot whose length changes.
    pub slot: SlotId,
    pub kind: ChangeKind,
    /// Position inserted at or removed from.
    pub index: usize,
    /// Length of the multislot once the change is applied.
    pub final_len: usize,
}

/// An event delivered to slot observers.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotEvent {
    Dirty { slot: SlotId, roi: Roi },
    Ready { slot: SlotId },
    Unready { slot: SlotId },
    Prepare(StructuralChange),
    Commit(StructuralChange),
    Disconnect { slot: SlotId },
}

impl SlotEvent {
    /// Short label used in logs and failure reports.
    pub fn label(&self) -> &'static str {
        match self {
            SlotEvent::Dirty { .. } => "dirty",
            SlotEvent::Ready { .. } => "ready",
            SlotEvent::Unready { .. } => "unready",
            SlotEvent::Prepare(_) => "prepare",
            SlotEvent::Commit(_) => "commit",
            SlotEvent::Disconnect { .. } => "disconnect",
        }
    }
}

/// Error type an observer may return.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// A registered observer callback.
pub type ObserverFn = Arc<dyn Fn(&SlotEvent) -> Result<(), ObserverError> + Send + Sync>;

/// An event waiting for delivery, with the observers registered when it
/// was raised.
pub(crate) struct PendingEvent {
    pub slot: SlotId,
    pub event: SlotEvent,
    pub observers: Vec<ObserverFn>,
}

/// A failure reported by an observer (or by dirty propagation inside an
/// operator), collected instead of aborting delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObserverFailure {
    pub slot: SlotId,
    pub event: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        let change = StructuralChange {
            slot: SlotId(1),
            kind: ChangeKind::Insert,
            index: 0,
            final_len: 1,
        };
        assert_eq!(SlotEvent::Prepare(change.clone()).label(), "prepare");
        assert_eq!(SlotEvent::Commit(change).label(), "commit");
        assert_eq!(SlotEvent::Ready { slot: SlotId(0) }.label(), "ready");
    }
}
