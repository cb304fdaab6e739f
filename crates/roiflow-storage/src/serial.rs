//! Serializers mapping graph state onto the group tree.
//!
//! An [`OperatorSerializer`] owns a named top-level group and a list of
//! [`SerialItem`]s, each responsible for one piece of state: a slot's
//! directly-set value ([`SerialSlot`]), a lane count ([`SerialLaneCount`]),
//! or anything a downstream crate implements (block tables, data sources).
//!
//! Saving snapshots every item into a fresh [`Group`] and writes it with
//! `save_tree`. The blake3 hash of the written snapshot is remembered so
//! [`OperatorSerializer::is_dirty`] can tell whether the graph diverged
//! from what is on disk.

use roiflow_core::{Graph, OperatorId, SlotId, Value};
use tracing::debug;

use crate::convert::{attr_to_value, value_to_attr};
use crate::error::StorageError;
use crate::group::{Attr, Group};
use crate::hash::hash_group;
use crate::traits::GroupStore;

/// Version tag written into every serializer group.
pub const STORAGE_VERSION: &str = "0.1";

/// One piece of serializable operator state.
pub trait SerialItem: Send {
    /// Writes this item's state into `group`.
    fn serialize(&self, graph: &Graph, group: &mut Group) -> Result<(), StorageError>;

    /// Restores this item's state from `group`. Missing keys leave the
    /// graph untouched.
    fn deserialize(&self, graph: &Graph, group: &Group) -> Result<(), StorageError>;
}

// ---------------------------------------------------------------------------
// SerialSlot
// ---------------------------------------------------------------------------

/// The directly-set value of an input slot. Multislots are stored as a
/// subgroup with a `len` attribute and one entry per subslot, named by
/// index.
pub struct SerialSlot {
    slot: SlotId,
    key: String,
    legacy_keys: Vec<String>,
}

impl SerialSlot {
    pub fn new(slot: SlotId, key: &str) -> Self {
        SerialSlot {
            slot,
            key: key.to_string(),
            legacy_keys: Vec::new(),
        }
    }

    /// Also accepts `key` when loading; saving always uses the current key.
    pub fn with_legacy_key(mut self, key: &str) -> Self {
        self.legacy_keys.push(key.to_string());
        self
    }

    fn stored_key<'a>(&'a self, group: &Group) -> Option<&'a str> {
        std::iter::once(&self.key)
            .chain(&self.legacy_keys)
            .find(|k| group.attr(k).is_some() || group.group(k).is_some())
            .map(String::as_str)
    }
}

fn write_slot(graph: &Graph, slot: SlotId, group: &mut Group, key: &str) -> Result<(), StorageError> {
    if graph.level(slot)? == 0 {
        if let Some(value) = graph.own_value(slot)? {
            group.set_attr(key, value_to_attr(&value)?);
        }
        return Ok(());
    }
    let len = graph.len(slot)?;
    let sub = group.ensure_group(key);
    sub.set_attr("len", Attr::Int(len as i64));
    for i in 0..len {
        write_slot(graph, graph.subslot(slot, i)?, sub, &i.to_string())?;
    }
    Ok(())
}

fn read_slot(graph: &Graph, slot: SlotId, group: &Group, key: &str) -> Result<(), StorageError> {
    if graph.level(slot)? == 0 {
        if let Some(attr) = group.attr(key) {
            let value: Value = attr_to_value(attr, graph.kind(slot)?)?;
            graph.set_value(slot, value)?;
        }
        return Ok(());
    }
    let Some(sub) = group.group(key) else {
        return Ok(());
    };
    let len = sub
        .attr("len")
        .and_then(Attr::as_int)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| StorageError::Corrupt {
            reason: format!("multislot group '{key}' has no valid 'len'"),
        })?;
    if graph.len(slot)? != len {
        graph.resize(slot, len)?;
    }
    for i in 0..len {
        read_slot(graph, graph.subslot(slot, i)?, sub, &i.to_string())?;
    }
    Ok(())
}

impl SerialItem for SerialSlot {
    fn serialize(&self, graph: &Graph, group: &mut Group) -> Result<(), StorageError> {
        write_slot(graph, self.slot, group, &self.key)
    }

    fn deserialize(&self, graph: &Graph, group: &Group) -> Result<(), StorageError> {
        match self.stored_key(group) {
            Some(key) => read_slot(graph, self.slot, group, key),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// SerialLaneCount
// ---------------------------------------------------------------------------

/// The number of lanes of a lane group.
pub struct SerialLaneCount {
    group: OperatorId,
    key: String,
}

impl SerialLaneCount {
    pub fn new(group: OperatorId) -> Self {
        SerialLaneCount {
            group,
            key: "NumLanes".to_string(),
        }
    }
}

impl SerialItem for SerialLaneCount {
    fn serialize(&self, graph: &Graph, group: &mut Group) -> Result<(), StorageError> {
        let lanes = graph.lane_count(self.group)?;
        group.set_attr(&self.key, Attr::Int(lanes as i64));
        Ok(())
    }

    fn deserialize(&self, graph: &Graph, group: &Group) -> Result<(), StorageError> {
        let Some(attr) = group.attr(&self.key) else {
            return Ok(());
        };
        let lanes = attr
            .as_int()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| StorageError::Corrupt {
                reason: format!("'{}' is not a lane count: {attr:?}", self.key),
            })?;
        graph.resize_lanes(self.group, lanes)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OperatorSerializer
// ---------------------------------------------------------------------------

/// Saves and loads a list of items under one named top-level group.
pub struct OperatorSerializer {
    name: String,
    items: Vec<Box<dyn SerialItem>>,
    saved_hash: Option<blake3::Hash>,
}

impl OperatorSerializer {
    pub fn new(name: &str) -> Self {
        OperatorSerializer {
            name: name.to_string(),
            items: Vec::new(),
            saved_hash: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn with_item(mut self, item: impl SerialItem + 'static) -> Self {
        self.items.push(Box::new(item));
        self
    }

    pub fn add_item(&mut self, item: Box<dyn SerialItem>) {
        self.items.push(item);
    }

    /// The group this serializer would write right now.
    pub fn snapshot(&self, graph: &Graph) -> Result<Group, StorageError> {
        let mut group =
            Group::new().with_attr("StorageVersion", Attr::Str(STORAGE_VERSION.to_string()));
        for item in &self.items {
            item.serialize(graph, &mut group)?;
        }
        Ok(group)
    }

    pub fn save(&mut self, graph: &Graph, store: &mut dyn GroupStore) -> Result<(), StorageError> {
        let snapshot = self.snapshot(graph)?;
        store.save_tree(&self.name, &snapshot)?;
        self.saved_hash = Some(hash_group(&snapshot)?);
        debug!(serializer = %self.name, "saved");
        Ok(())
    }

    /// Restores every item in order. A missing group is not an error: the
    /// project simply predates this serializer.
    pub fn load(&mut self, graph: &Graph, store: &dyn GroupStore) -> Result<(), StorageError> {
        if !store.has_group(&self.name)? {
            debug!(serializer = %self.name, "nothing stored");
            return Ok(());
        }
        let group = store.load_tree(&self.name)?;
        for item in &self.items {
            item.deserialize(graph, &group)?;
        }
        self.saved_hash = Some(hash_group(&self.snapshot(graph)?)?);
        debug!(serializer = %self.name, "loaded");
        Ok(())
    }

    /// True if the graph state differs from the last save or load.
    pub fn is_dirty(&self, graph: &Graph) -> Result<bool, StorageError> {
        match self.saved_hash {
            Some(saved) => Ok(hash_group(&self.snapshot(graph)?)? != saved),
            None => Ok(true),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_key_is_found_when_current_is_absent() {
        let item = SerialSlot::new(SlotId(0), "axistags").with_legacy_key("axisorder");
        let legacy = Group::new().with_attr("axisorder", Attr::Str("tzyxc".into()));
        assert_eq!(item.stored_key(&legacy), Some("axisorder"));

        let both = legacy.with_attr("axistags", Attr::Str("zyxc".into()));
        assert_eq!(item.stored_key(&both), Some("axistags"));
        assert_eq!(item.stored_key(&Group::new()), None);
    }
}
