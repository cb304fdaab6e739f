//! Persisting the datasets assigned to a (multi)slot of [`DatasetInfo`]s.
//!
//! Level-0 slots store the info's persisted form as a subgroup; multislots
//! store a `len` attribute and one subgroup per element, named by index,
//! mirroring how slot values are stored. With a payload store attached,
//! in-memory arrays are imported into the project and saved as
//! project-internal data. Otherwise, and for placeholders, sources without
//! a persisted form are skipped with a warning and come back empty.

use std::sync::Arc;

use tracing::warn;

use roiflow_core::{Graph, SlotId, Value};
use roiflow_storage::{Attr, Group, PayloadStore, SerialItem, StorageError};

use crate::source::{DataSource, DatasetInfo};

pub struct SerialDataset {
    slot: SlotId,
    key: String,
    payloads: Option<Arc<dyn PayloadStore>>,
}

impl SerialDataset {
    pub fn new(slot: SlotId, key: &str) -> Self {
        SerialDataset {
            slot,
            key: key.to_string(),
            payloads: None,
        }
    }

    /// Imports in-memory datasets into `store` when saving.
    pub fn with_payload_store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.payloads = Some(store);
        self
    }
}

fn persisted_form(info: &DatasetInfo, payloads: Option<&dyn PayloadStore>) -> Result<Group, StorageError> {
    match (&info.source, payloads) {
        (DataSource::Preloaded { .. }, Some(store)) => info.import_as_local(store)?.to_persisted_form(),
        _ => info.to_persisted_form(),
    }
}

fn write_infos(
    graph: &Graph,
    slot: SlotId,
    group: &mut Group,
    key: &str,
    payloads: Option<&dyn PayloadStore>,
) -> Result<(), StorageError> {
    if graph.level(slot)? == 0 {
        let Some(value) = graph.own_value(slot)? else {
            return Ok(());
        };
        let Some(info) = value.downcast_ref::<DatasetInfo>() else {
            return Err(StorageError::Unsupported {
                reason: format!("'{key}' does not hold a dataset"),
            });
        };
        match persisted_form(info, payloads) {
            Ok(form) => {
                *group.ensure_group(key) = form;
            }
            Err(StorageError::Unsupported { reason }) => {
                warn!(dataset = %info.nickname, %reason, "dataset not saved");
            }
            Err(e) => return Err(e),
        }
        return Ok(());
    }
    let len = graph.len(slot)?;
    let sub = group.ensure_group(key);
    sub.set_attr("len", Attr::Int(len as i64));
    for i in 0..len {
        write_infos(graph, graph.subslot(slot, i)?, sub, &i.to_string(), payloads)?;
    }
    Ok(())
}

fn read_infos(graph: &Graph, slot: SlotId, group: &Group, key: &str) -> Result<(), StorageError> {
    let Some(sub) = group.group(key) else {
        return Ok(());
    };
    if graph.level(slot)? == 0 {
        let info = DatasetInfo::from_persisted_form(sub)?;
        graph.set_value(slot, Value::object(info))?;
        return Ok(());
    }
    let len = sub
        .attr("len")
        .and_then(Attr::as_int)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| StorageError::Corrupt {
            reason: format!("dataset group '{key}' has no valid 'len'"),
        })?;
    if graph.len(slot)? != len {
        graph.resize(slot, len)?;
    }
    for i in 0..len {
        read_infos(graph, graph.subslot(slot, i)?, sub, &i.to_string())?;
    }
    Ok(())
}

impl SerialItem for SerialDataset {
    fn serialize(&self, graph: &Graph, group: &mut Group) -> Result<(), StorageError> {
        write_infos(graph, self.slot, group, &self.key, self.payloads.as_deref())
    }

    fn deserialize(&self, graph: &Graph, group: &Group) -> Result<(), StorageError> {
        read_infos(graph, self.slot, group, &self.key)
    }
}
