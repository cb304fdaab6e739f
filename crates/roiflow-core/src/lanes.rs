//! Lane groups: one logical pipeline instantiated once per data item.
//!
//! A [`LaneGroup`] wraps an operator factory. Every slot of the wrapped
//! operator appears on the group one level higher, indexed by lane, except
//! for broadcast inputs which keep their level and are shared read-only by
//! every lane.
//!
//! Lanes grow only at the end and shrink only from the end. Each lane
//! change is a single structural batch over all lane-indexed slots, so
//! observers see every prepare of the change before the inner operator is
//! built (or torn down) and every commit after.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::graph::Graph;
use crate::id::{OperatorId, SlotId};
use crate::lazy::LazyResult;
use crate::observer::{ChangeKind, StructuralChange};
use crate::operator::{unsupported_output, ExecuteContext, OpContext, Operator};
use crate::roi::Roi;
use crate::slot::{Direction, SlotRef, SlotSpec};

/// Builds one lane's inner operator.
pub type OperatorFactory = Arc<dyn Fn() -> Box<dyn Operator> + Send + Sync>;

/// A position-indexed collection of identical inner operators.
pub struct LaneGroup {
    name: String,
    factory: OperatorFactory,
    template: Vec<SlotSpec>,
    broadcast: Vec<String>,
    lanes: Vec<OperatorId>,
}

impl LaneGroup {
    /// Wraps `factory`. Inputs named in `broadcast` are shared by all lanes.
    pub fn new(
        name: &str,
        factory: impl Fn() -> Box<dyn Operator> + Send + Sync + 'static,
        broadcast: &[&str],
    ) -> Self {
        let template = factory().slots();
        LaneGroup {
            name: name.to_string(),
            factory: Arc::new(factory),
            template,
            broadcast: broadcast.iter().map(|s| s.to_string()).collect(),
            lanes: Vec::new(),
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, index: usize) -> Option<OperatorId> {
        self.lanes.get(index).copied()
    }

    pub fn lanes(&self) -> &[OperatorId] {
        &self.lanes
    }

    fn is_broadcast(&self, spec: &SlotSpec) -> bool {
        spec.direction == Direction::Input && self.broadcast.contains(&spec.name)
    }

    /// Lane-indexed slots whose length still equals the lane count, i.e.
    /// those a lane change has not already resized through a connection.
    fn pending_slots(&self, ctx: &OpContext<'_>) -> CoreResult<Vec<SlotId>> {
        let mut slots = Vec::new();
        for spec in self.template.iter().filter(|s| !self.is_broadcast(s)) {
            let slot = match spec.direction {
                Direction::Input => ctx.input(&spec.name)?,
                Direction::Output => ctx.output(&spec.name)?,
            };
            if ctx.len(slot)? == self.lanes.len() {
                slots.push(slot);
            }
        }
        Ok(slots)
    }

    /// Appends a lane. `index` must equal the current lane count.
    pub fn insert_lane(&mut self, ctx: &mut OpContext<'_>, index: usize) -> CoreResult<()> {
        if index != self.lanes.len() {
            return Err(CoreError::InvalidLaneIndex {
                index,
                len: self.lanes.len(),
            });
        }
        let owner = ctx.operator_id();
        let roots = self.pending_slots(ctx)?;
        let factory = self.factory.clone();
        let template = self.template.clone();
        let broadcast = self.broadcast.clone();

        let mut created = None;
        let mut entered = false;
        let mut built = false;
        let result = ctx.state().structural_batch(
            &roots,
            ChangeKind::Insert,
            index,
            Some(owner),
            |state| {
                entered = true;
                let lane = state.insert_node(Some(owner), factory())?;
                created = Some(lane);
                state.reconfigure(lane)?;
                let mut refresh = Vec::new();
                for spec in &template {
                    match spec.direction {
                        Direction::Input => {
                            let inner = state.named_input(lane, &spec.name)?;
                            let outer = state.named_input(owner, &spec.name)?;
                            let up = if broadcast.contains(&spec.name) {
                                outer
                            } else {
                                state.subslot(outer, index)?
                            };
                            state.link(inner, up)?;
                            if spec.level > 0 {
                                state.mirror(inner, up)?;
                            }
                            refresh.push(inner);
                        }
                        Direction::Output => {
                            let inner = state.named_output(lane, &spec.name)?;
                            let outer = state.named_output(owner, &spec.name)?;
                            let outer = state.subslot(outer, index)?;
                            state.link(outer, inner)?;
                            if spec.level > 0 {
                                state.mirror(outer, inner)?;
                            }
                            refresh.push(outer);
                        }
                    }
                }
                built = true;
                Ok(refresh)
            },
        );
        if entered && !built {
            self.undo_insert(ctx, &roots, index, created);
            return result;
        }
        if let Some(lane) = created {
            self.lanes.push(lane);
            debug!(group = %self.name, index, lane = lane.0, "lane inserted");
        }
        result
    }

    /// Drops a half-built lane: its operator, then the subslots the insert
    /// added.
    fn undo_insert(
        &self,
        ctx: &mut OpContext<'_>,
        roots: &[SlotId],
        index: usize,
        created: Option<OperatorId>,
    ) {
        let owner = ctx.operator_id();
        if let Some(lane) = created {
            if let Err(e) = ctx.state().remove_operator(lane) {
                warn!(group = %self.name, index, error = %e, "could not drop half-built lane");
            }
        }
        let grown: Vec<SlotId> = roots
            .iter()
            .copied()
            .filter(|&slot| matches!(ctx.len(slot), Ok(n) if n == index + 1))
            .collect();
        if grown.is_empty() {
            return;
        }
        let undone = ctx.state().structural_batch(
            &grown,
            ChangeKind::Remove,
            index,
            Some(owner),
            |_| Ok(Vec::new()),
        );
        match undone {
            Ok(()) => debug!(group = %self.name, index, "half-built lane rolled back"),
            Err(e) => warn!(group = %self.name, index, error = %e, "could not roll back lane slots"),
        }
    }

    /// Removes the last lane. Any other index is rejected.
    pub fn remove_lane(&mut self, ctx: &mut OpContext<'_>, index: usize) -> CoreResult<()> {
        if index + 1 != self.lanes.len() {
            return Err(CoreError::InvalidLaneIndex {
                index,
                len: self.lanes.len(),
            });
        }
        let owner = ctx.operator_id();
        let lane = self.lanes[index];
        let roots = self.pending_slots(ctx)?;
        let result = ctx.state().structural_batch(
            &roots,
            ChangeKind::Remove,
            index,
            Some(owner),
            move |state| {
                state.remove_operator(lane)?;
                Ok(Vec::new())
            },
        );
        self.lanes.pop();
        debug!(group = %self.name, index, lane = lane.0, "lane removed");
        result
    }

    /// Grows by appending or shrinks from the end until `len` lanes exist.
    pub fn resize_lanes(&mut self, ctx: &mut OpContext<'_>, len: usize) -> CoreResult<()> {
        while self.lanes.len() < len {
            self.insert_lane(ctx, self.lanes.len())?;
        }
        while self.lanes.len() > len {
            self.remove_lane(ctx, self.lanes.len() - 1)?;
        }
        Ok(())
    }
}

impl Operator for LaneGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn category(&self) -> &str {
        "lanes"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        self.template
            .iter()
            .map(|spec| {
                if self.is_broadcast(spec) {
                    spec.clone()
                } else {
                    let mut lifted = spec.clone().level(spec.level + 1).append_only();
                    lifted.default = None;
                    lifted
                }
            })
            .collect()
    }

    fn configure(&mut self, _ctx: &mut OpContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    fn execute(
        &self,
        _ctx: &ExecuteContext<'_>,
        output: &SlotRef,
        _roi: &Roi,
    ) -> CoreResult<LazyResult> {
        // Lane outputs are forwarded from the inner operators, so requests
        // never stop here.
        Err(unsupported_output(&self.name, output))
    }

    fn propagate_dirty(
        &mut self,
        _ctx: &mut OpContext<'_>,
        _input: &SlotRef,
        _roi: &Roi,
    ) -> CoreResult<()> {
        Ok(())
    }

    fn on_input_resized(
        &mut self,
        ctx: &mut OpContext<'_>,
        input: &SlotRef,
        change: &StructuralChange,
    ) -> CoreResult<()> {
        if !input.path.is_empty() || self.broadcast.contains(&input.name) {
            return Ok(());
        }
        while self.lanes.len() < change.final_len {
            self.insert_lane(ctx, self.lanes.len())?;
        }
        while self.lanes.len() > change.final_len {
            self.remove_lane(ctx, self.lanes.len() - 1)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Graph conveniences
// ---------------------------------------------------------------------------

impl Graph {
    fn with_lanes<R>(
        &self,
        group: OperatorId,
        f: impl FnOnce(&mut LaneGroup, &mut OpContext<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.mutate(|state| {
            let result = state.with_operator_mut(group, f);
            let refreshed = state.reconfigure(group);
            let value = result?;
            refreshed?;
            Ok(value)
        })
    }

    /// Appends a lane to a [`LaneGroup`].
    pub fn insert_lane(&self, group: OperatorId, index: usize) -> CoreResult<()> {
        self.with_lanes(group, |lanes, ctx| lanes.insert_lane(ctx, index))
    }

    /// Removes the trailing lane of a [`LaneGroup`].
    pub fn remove_lane(&self, group: OperatorId, index: usize) -> CoreResult<()> {
        self.with_lanes(group, |lanes, ctx| lanes.remove_lane(ctx, index))
    }

    pub fn resize_lanes(&self, group: OperatorId, len: usize) -> CoreResult<()> {
        self.with_lanes(group, |lanes, ctx| lanes.resize_lanes(ctx, len))
    }

    pub fn lane_count(&self, group: OperatorId) -> CoreResult<usize> {
        self.with_operator::<LaneGroup, _>(group, |lanes| lanes.lane_count())
    }

    pub fn lane(&self, group: OperatorId, index: usize) -> CoreResult<OperatorId> {
        let (lane, len) =
            self.with_operator::<LaneGroup, _>(group, |lanes| (lanes.lane(index), lanes.lane_count()))?;
        lane.ok_or(CoreError::InvalidLaneIndex { index, len })
    }
}
