//! Data selection across lanes: one [`OpDataSelectionGroup`] per lane.
//!
//! `DatasetGroup` is indexed `[lane][role]`; the working directory and the
//! role names are shared by every lane. Lanes are added with all of their
//! datasets at once, and a lane whose datasets fail to configure is
//! removed again before the error is returned.

use std::sync::Arc;

use tracing::{debug, warn};

use roiflow_core::{CoreError, CoreResult, Graph, LaneGroup, OperatorId, SlotId, Value};

use crate::reader::ReaderRegistry;
use crate::roles::OpDataSelectionGroup;
use crate::source::DatasetInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiLaneDataSelection {
    group: OperatorId,
}

impl MultiLaneDataSelection {
    /// Adds the lane group to `graph`.
    pub fn add(
        graph: &Graph,
        readers: Arc<ReaderRegistry>,
        force_axis_order: &[&str],
    ) -> CoreResult<Self> {
        let orders: Vec<String> = force_axis_order.iter().map(|s| s.to_string()).collect();
        let group = graph.add_operator(LaneGroup::new(
            "DataSelection",
            move || {
                Box::new(
                    OpDataSelectionGroup::new(Arc::clone(&readers))
                        .with_force_axis_order(orders.as_slice()),
                )
            },
            &["WorkingDirectory", "DatasetRoles"],
        ))?;
        Ok(MultiLaneDataSelection { group })
    }

    pub fn id(&self) -> OperatorId {
        self.group
    }

    pub fn set_roles(&self, graph: &Graph, roles: &[&str]) -> CoreResult<()> {
        let slot = graph.input(self.group, "DatasetRoles")?;
        graph.set_value(slot, Value::StrList(roles.iter().map(|r| r.to_string()).collect()))
    }

    pub fn set_working_directory(&self, graph: &Graph, dir: &str) -> CoreResult<()> {
        graph.set_value(graph.input(self.group, "WorkingDirectory")?, Value::Str(dir.to_string()))
    }

    pub fn roles(&self, graph: &Graph) -> CoreResult<Vec<String>> {
        let value = graph.value(graph.input(self.group, "DatasetRoles")?)?;
        value
            .as_str_list()
            .map(<[String]>::to_vec)
            .ok_or_else(|| CoreError::constraint("DataSelection", "roles must be a list of names"))
    }

    pub fn lane_count(&self, graph: &Graph) -> CoreResult<usize> {
        graph.lane_count(self.group)
    }

    /// Appends a lane holding `infos`, one per role (`None` leaves a role
    /// empty). Returns the new lane's index.
    pub fn push_lane(&self, graph: &Graph, infos: Vec<Option<DatasetInfo>>) -> CoreResult<usize> {
        let roles = self.roles(graph)?;
        if infos.len() > roles.len() {
            return Err(CoreError::constraint(
                "DataSelection",
                format!("{} datasets given for {} roles", infos.len(), roles.len()),
            ));
        }
        let lane = self.lane_count(graph)?;
        graph.insert_lane(self.group, lane)?;
        if let Err(err) = self.fill_lane(graph, lane, roles.len(), infos) {
            if let Err(cleanup) = graph.remove_lane(self.group, lane) {
                warn!(lane, error = %cleanup, "could not roll back failed lane");
            }
            return Err(err);
        }
        debug!(lane, "lane added");
        Ok(lane)
    }

    fn fill_lane(
        &self,
        graph: &Graph,
        lane: usize,
        roles: usize,
        infos: Vec<Option<DatasetInfo>>,
    ) -> CoreResult<()> {
        let datasets = graph.subslot(graph.input(self.group, "DatasetGroup")?, lane)?;
        graph.resize(datasets, roles)?;
        for (role, info) in infos.into_iter().enumerate() {
            if let Some(info) = info {
                graph.set_value(graph.subslot(datasets, role)?, Value::object(info))?;
            }
        }
        Ok(())
    }

    /// Removes the last lane.
    pub fn drop_last_lane(&self, graph: &Graph) -> CoreResult<()> {
        let lanes = self.lane_count(graph)?;
        if lanes == 0 {
            return Err(CoreError::InvalidLaneIndex { index: 0, len: 0 });
        }
        graph.remove_lane(self.group, lanes - 1)
    }

    /// The input slot holding `[lane][role]`'s dataset.
    pub fn dataset_slot(&self, graph: &Graph, lane: usize, role: usize) -> CoreResult<SlotId> {
        let datasets = graph.input(self.group, "DatasetGroup")?;
        graph.subslot(graph.subslot(datasets, lane)?, role)
    }

    /// The image of one role in one lane.
    pub fn image(&self, graph: &Graph, lane: usize, role: usize) -> CoreResult<SlotId> {
        let images = graph.output(self.group, "ImageGroup")?;
        graph.subslot(graph.subslot(images, lane)?, role)
    }

    /// A lane output by name (`Image`, `ImageName`, ...).
    pub fn lane_output(&self, graph: &Graph, name: &str, lane: usize) -> CoreResult<SlotId> {
        graph.subslot(graph.output(self.group, name)?, lane)
    }
}
