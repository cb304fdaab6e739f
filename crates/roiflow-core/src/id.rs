//! Stable ID newtypes for graph entities.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `SlotId` cannot be accidentally used where an `OperatorId` is
//! expected.

use std::fmt;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Stable operator identifier. Maps to a petgraph `NodeIndex<u32>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperatorId(pub u32);

/// Stable slot identifier within one graph's slot arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub u32);

/// Handle returned when registering an observer on a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObserverId(pub u32);

// Display implementations -- just print the inner value.

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Bridge between OperatorId and petgraph's NodeIndex<u32>.

impl From<NodeIndex<u32>> for OperatorId {
    fn from(idx: NodeIndex<u32>) -> Self {
        OperatorId(idx.index() as u32)
    }
}

impl From<OperatorId> for NodeIndex<u32> {
    fn from(id: OperatorId) -> Self {
        NodeIndex::new(id.0 as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_id_to_node_index_roundtrip() {
        let idx = NodeIndex::<u32>::new(7);
        let op = OperatorId::from(idx);
        assert_eq!(op.0, 7);

        let back: NodeIndex<u32> = op.into();
        assert_eq!(back.index(), 7);
    }

    #[test]
    fn ids_serde_roundtrip() {
        let slot = SlotId(99);
        let json = serde_json::to_string(&slot).unwrap();
        let back: SlotId = serde_json::from_str(&json).unwrap();
        assert_eq!(slot, back);
    }

    #[test]
    fn display_prints_inner_value() {
        assert_eq!(format!("{}", OperatorId(3)), "3");
        assert_eq!(format!("{}", SlotId(12)), "12");
        assert_eq!(format!("{}", ObserverId(0)), "0");
    }
}
