//! Slot declarations and the per-slot record kept in the graph's arena.
//!
//! A slot of level 0 carries one value; a slot of level `N > 0` is a
//! multislot whose children are slots of level `N - 1`. Children are
//! ordinary arena entries pointing back at their parent.

use serde::{Deserialize, Serialize};

use crate::id::{ObserverId, OperatorId, SlotId};
use crate::meta::Meta;
use crate::observer::ObserverFn;
use crate::value::{Value, ValueKind};

/// Whether a slot consumes or produces data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

/// Declaration of one named slot, returned by `Operator::slots()`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSpec {
    pub name: String,
    pub direction: Direction,
    pub kind: ValueKind,
    pub level: usize,
    /// Optional inputs do not block `configure()`.
    pub optional: bool,
    pub default: Option<Value>,
    /// Multislot length may only grow at the end and shrink from the end.
    pub append_only: bool,
}

impl SlotSpec {
    pub fn input(name: &str, kind: ValueKind) -> Self {
        SlotSpec {
            name: name.to_string(),
            direction: Direction::Input,
            kind,
            level: 0,
            optional: false,
            default: None,
            append_only: false,
        }
    }

    pub fn output(name: &str, kind: ValueKind) -> Self {
        SlotSpec {
            direction: Direction::Output,
            ..SlotSpec::input(name, kind)
        }
    }

    pub fn level(mut self, level: usize) -> Self {
        self.level = level;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Sets a default; a defaulted input is ready without a value.
    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn append_only(mut self) -> Self {
        self.append_only = true;
        self
    }
}

/// A slot as seen by operator callbacks: its id, top-level name, and the
/// subslot path below that name (empty for a top-level slot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRef {
    pub id: SlotId,
    pub name: String,
    pub path: Vec<usize>,
}

impl SlotRef {
    /// Lane index of a level-1 subslot, if any.
    pub fn lane(&self) -> Option<usize> {
        self.path.first().copied()
    }
}

/// Arena record for one slot.
pub(crate) struct SlotData {
    pub name: String,
    pub owner: OperatorId,
    pub direction: Direction,
    pub kind: ValueKind,
    pub level: usize,
    pub optional: bool,
    pub default: Option<Value>,
    pub append_only: bool,

    pub parent: Option<SlotId>,
    pub index: usize,
    pub children: Vec<SlotId>,

    /// Directly set value (inputs) or published value (outputs).
    pub value: Option<Value>,
    /// Metadata published by the owner's `configure()` (outputs only).
    pub meta: Meta,
    pub upstream: Option<SlotId>,
    pub downstream: Vec<SlotId>,

    pub observers: Vec<(ObserverId, ObserverFn)>,
    /// Last readiness delivered to observers.
    pub ready: bool,
    /// Set by the owner to hold an output unready after configuring.
    pub held_unready: bool,
}

impl SlotData {
    pub fn from_spec(spec: &SlotSpec, owner: OperatorId) -> Self {
        SlotData {
            name: spec.name.clone(),
            owner,
            direction: spec.direction,
            kind: spec.kind,
            level: spec.level,
            optional: spec.optional,
            default: spec.default.clone(),
            append_only: spec.append_only,
            parent: None,
            index: 0,
            children: Vec::new(),
            value: None,
            meta: Meta::default(),
            upstream: None,
            downstream: Vec::new(),
            observers: Vec::new(),
            ready: false,
            held_unready: false,
        }
    }

    /// A subslot one level below `self`.
    pub fn child_of(&self, parent: SlotId, index: usize) -> Self {
        SlotData {
            name: self.name.clone(),
            owner: self.owner,
            direction: self.direction,
            kind: self.kind,
            level: self.level - 1,
            optional: self.optional,
            default: self.default.clone(),
            append_only: false,
            parent: Some(parent),
            index,
            children: Vec::new(),
            value: None,
            meta: Meta::default(),
            upstream: None,
            downstream: Vec::new(),
            observers: Vec::new(),
            ready: false,
            held_unready: false,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }
}
