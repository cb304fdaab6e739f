//! Graph: the explicit context every operator lives in.
//!
//! [`Graph`] is a cheap, cloneable handle around one mutation lock and one
//! worker pool. All structural work (adding operators, connecting slots,
//! setting values, resizing multislots, running `configure()`) happens on
//! [`GraphState`] while the lock is held. `get(roi)` plans a computation
//! under the lock and hands back a [`LazyResult`]; the computation itself
//! runs after the lock is released, on the caller's thread or the pool.
//!
//! Observer events raised by a mutation are queued while the lock is held
//! and delivered once it is released, so observers may read the graph (or
//! mutate it; their own events are delivered after the current ones). One
//! thread delivers at a time, which keeps events in the order they were
//! raised across threads.
//!
//! # Layout
//!
//! - Operators are nodes of a petgraph `StableGraph`. Only output-to-input
//!   connections become edges; they are what the cycle check walks.
//! - Slots live in an arena keyed by [`SlotId`]. Multislot children are
//!   arena entries pointing back at their parent.
//! - Forwarding connections are allowed in two shapes: an inner operator's
//!   input driven by its parent's input, and a parent's output driven by an
//!   inner operator's output.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use futures::executor::ThreadPool;
use indexmap::IndexMap;
use petgraph::algo::has_path_connecting;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::Directed;
use tracing::{debug, warn};

use crate::config::GraphConfig;
use crate::error::{CoreError, CoreResult};
use crate::id::{ObserverId, OperatorId, SlotId};
use crate::lazy::LazyResult;
use crate::meta::Meta;
use crate::observer::{
    ChangeKind, ObserverError, ObserverFailure, ObserverFn, PendingEvent, SlotEvent,
    StructuralChange,
};
use crate::operator::{ExecuteContext, OpContext, Operator};
use crate::roi::Roi;
use crate::slot::{Direction, SlotData, SlotRef};
use crate::value::{Value, ValueKind};

/// Node weight: one operator instance and its slot tables.
pub(crate) struct OperatorNode {
    pub name: String,
    pub category: String,
    /// Taken out while one of the operator's callbacks runs.
    pub operator: Option<Box<dyn Operator>>,
    /// Set while the operator is taken out. An operator that is missing
    /// while not busy was lost to a panic.
    pub busy: bool,
    pub inputs: IndexMap<String, SlotId>,
    pub outputs: IndexMap<String, SlotId>,
    pub parent: Option<OperatorId>,
    pub children: Vec<OperatorId>,
    pub configured: bool,
    pub configure_count: u64,
}

/// Edge weight: an output-to-input connection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SlotLink {
    pub from: SlotId,
    pub to: SlotId,
}

/// Everything guarded by the graph's mutation lock.
pub(crate) struct GraphState {
    pub ops: StableGraph<OperatorNode, SlotLink, Directed, u32>,
    pub slots: HashMap<SlotId, SlotData>,
    pub failures: Vec<ObserverFailure>,
    pub pool: ThreadPool,
    pending: VecDeque<PendingEvent>,
    delivering: bool,
    next_slot: u32,
    next_observer: u32,
}

impl GraphState {
    fn new(pool: ThreadPool) -> Self {
        GraphState {
            ops: StableGraph::new(),
            slots: HashMap::new(),
            failures: Vec::new(),
            pool,
            pending: VecDeque::new(),
            delivering: false,
            next_slot: 0,
            next_observer: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub fn node(&self, id: OperatorId) -> CoreResult<&OperatorNode> {
        self.ops
            .node_weight(id.into())
            .ok_or(CoreError::OperatorNotFound { id })
    }

    pub fn node_mut(&mut self, id: OperatorId) -> CoreResult<&mut OperatorNode> {
        self.ops
            .node_weight_mut(id.into())
            .ok_or(CoreError::OperatorNotFound { id })
    }

    pub fn slot(&self, id: SlotId) -> CoreResult<&SlotData> {
        self.slots.get(&id).ok_or(CoreError::SlotNotFound { id })
    }

    pub fn slot_mut(&mut self, id: SlotId) -> CoreResult<&mut SlotData> {
        self.slots.get_mut(&id).ok_or(CoreError::SlotNotFound { id })
    }

    /// Takes an operator out of its node for a callback. `None` means one
    /// of its callbacks is already running further up the stack.
    pub(crate) fn take_operator(&mut self, id: OperatorId) -> CoreResult<Option<Box<dyn Operator>>> {
        let node = self.node_mut(id)?;
        match node.operator.take() {
            Some(op) => {
                node.busy = true;
                Ok(Some(op))
            }
            None if node.busy => Ok(None),
            None => Err(CoreError::OperatorLost {
                name: node.name.clone(),
            }),
        }
    }

    pub(crate) fn return_operator(&mut self, id: OperatorId, op: Box<dyn Operator>) {
        if let Ok(node) = self.node_mut(id) {
            node.operator = Some(op);
            node.busy = false;
        }
    }

    /// Called when the lock is recovered after a panic: operators that were
    /// out for a callback are gone, and the events of the interrupted
    /// mutation are dropped.
    fn recover_after_panic(&mut self) {
        for node in self.ops.node_weights_mut() {
            if node.busy {
                node.busy = false;
                warn!(operator = %node.name, "operator lost to a panic in one of its callbacks");
            }
        }
        self.pending.clear();
    }

    pub fn named_input(&self, op: OperatorId, name: &str) -> CoreResult<SlotId> {
        let node = self.node(op)?;
        node.inputs
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownSlot {
                operator: node.name.clone(),
                name: name.to_string(),
            })
    }

    pub fn named_output(&self, op: OperatorId, name: &str) -> CoreResult<SlotId> {
        let node = self.node(op)?;
        node.outputs
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownSlot {
                operator: node.name.clone(),
                name: name.to_string(),
            })
    }

    pub fn subslot(&self, slot: SlotId, index: usize) -> CoreResult<SlotId> {
        let data = self.slot(slot)?;
        data.children
            .get(index)
            .copied()
            .ok_or(CoreError::InvalidLaneIndex {
                index,
                len: data.children.len(),
            })
    }

    pub fn slot_ref(&self, slot: SlotId) -> CoreResult<SlotRef> {
        let mut path = Vec::new();
        let mut cur = self.slot(slot)?;
        while let Some(parent) = cur.parent {
            path.push(cur.index);
            cur = self.slot(parent)?;
        }
        path.reverse();
        Ok(SlotRef {
            id: slot,
            name: cur.name.clone(),
            path,
        })
    }

    pub fn is_ready(&self, slot: SlotId) -> bool {
        self.slots.get(&slot).is_some_and(|s| s.ready)
    }

    /// Follows upstream links to the slot that actually provides data.
    pub fn resolve(&self, slot: SlotId) -> CoreResult<SlotId> {
        let mut cur = slot;
        while let Some(up) = self.slot(cur)?.upstream {
            cur = up;
        }
        Ok(cur)
    }

    pub fn meta_of(&self, slot: SlotId) -> CoreResult<Meta> {
        let src = self.slot(self.resolve(slot)?)?;
        if src.is_input() {
            Ok(src
                .value
                .as_ref()
                .or(src.default.as_ref())
                .map(Meta::for_value)
                .unwrap_or_default())
        } else {
            Ok(src.meta.clone())
        }
    }

    pub fn value_of(&self, slot: SlotId) -> CoreResult<Value> {
        let data = self.slot(slot)?;
        let not_ready = || CoreError::NotReady {
            slot,
            name: data.name.clone(),
        };
        if !data.ready {
            return Err(not_ready());
        }
        let src = self.slot(self.resolve(slot)?)?;
        src.value
            .as_ref()
            .or(src.default.as_ref())
            .cloned()
            .ok_or_else(not_ready)
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    pub(crate) fn alloc_slot(&mut self, data: SlotData) -> SlotId {
        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        self.slots.insert(id, data);
        id
    }

    /// Adds an operator (root if `parent` is `None`), wires its declared
    /// slots and configures it if no mandatory input is missing.
    pub fn add_operator(
        &mut self,
        parent: Option<OperatorId>,
        op: Box<dyn Operator>,
    ) -> CoreResult<OperatorId> {
        let id = self.insert_node(parent, op)?;
        self.reconfigure(id)?;
        Ok(id)
    }

    /// Adds an operator and its slots without configuring it.
    pub(crate) fn insert_node(
        &mut self,
        parent: Option<OperatorId>,
        op: Box<dyn Operator>,
    ) -> CoreResult<OperatorId> {
        if let Some(p) = parent {
            self.node(p)?;
        }
        let specs = op.slots();
        let node = OperatorNode {
            name: op.name().to_string(),
            category: op.category().to_string(),
            operator: Some(op),
            busy: false,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            parent,
            children: Vec::new(),
            configured: false,
            configure_count: 0,
        };
        let id = OperatorId::from(self.ops.add_node(node));

        let mut created = Vec::with_capacity(specs.len());
        for spec in &specs {
            let slot = self.alloc_slot(SlotData::from_spec(spec, id));
            let node = self.node_mut(id)?;
            match spec.direction {
                Direction::Input => node.inputs.insert(spec.name.clone(), slot),
                Direction::Output => node.outputs.insert(spec.name.clone(), slot),
            };
            created.push(slot);
        }
        for slot in created {
            self.update_ready(slot);
        }
        if let Some(p) = parent {
            self.node_mut(p)?.children.push(id);
        }
        debug!(operator = %self.node(id)?.name, id = id.0, "operator added");
        Ok(id)
    }

    /// Tears down an operator: children first, then every owned slot.
    /// Consumers that were connected to it become unready.
    pub fn remove_operator(&mut self, id: OperatorId) -> CoreResult<()> {
        self.clear_children(id)?;
        let node = self.node(id)?;
        let owned: Vec<SlotId> = node
            .inputs
            .values()
            .chain(node.outputs.values())
            .copied()
            .collect();
        let parent = node.parent;
        debug!(operator = %node.name, id = id.0, "operator removed");

        let mut orphans = Vec::new();
        for slot in owned {
            self.delete_slot_tree(slot, &mut orphans);
        }
        self.ops.remove_node(id.into());
        if let Some(p) = parent {
            if let Ok(pnode) = self.node_mut(p) {
                pnode.children.retain(|&c| c != id);
            }
        }
        self.refresh_orphans(orphans)
    }

    pub fn clear_children(&mut self, id: OperatorId) -> CoreResult<()> {
        let children = self.node(id)?.children.clone();
        for child in children.into_iter().rev() {
            self.remove_operator(child)?;
        }
        Ok(())
    }

    /// Removes a slot and its subslots from the arena, recording downstream
    /// slots that lost their upstream.
    pub(crate) fn delete_slot_tree(&mut self, slot: SlotId, orphans: &mut Vec<SlotId>) {
        let Some(data) = self.slots.remove(&slot) else {
            return;
        };
        for child in data.children {
            self.delete_slot_tree(child, orphans);
        }
        if let Some(up) = data.upstream {
            if let Some(u) = self.slots.get_mut(&up) {
                u.downstream.retain(|&d| d != slot);
            }
        }
        for down in data.downstream {
            if let Some(d) = self.slots.get_mut(&down) {
                d.upstream = None;
                orphans.push(down);
            }
        }
    }

    /// Notifies slots that lost their upstream, returning the first error.
    pub(crate) fn refresh_orphans(&mut self, orphans: Vec<SlotId>) -> CoreResult<()> {
        let mut first_err = None;
        for slot in orphans {
            if !self.slots.contains_key(&slot) {
                continue;
            }
            self.fire(slot, &SlotEvent::Disconnect { slot });
            if let Err(e) = self.slot_changed(slot) {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Runs `f` with the operator downcast to `T`.
    pub fn with_operator_mut<T: Operator + 'static, R>(
        &mut self,
        id: OperatorId,
        f: impl FnOnce(&mut T, &mut OpContext<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let name = self.node(id)?.name.clone();
        let mut op = self
            .take_operator(id)?
            .ok_or(CoreError::Reentrant { name })?;
        let result = match (*op).as_any_mut().downcast_mut::<T>() {
            Some(typed) => {
                let mut ctx = OpContext::new(self, id);
                f(typed, &mut ctx)
            }
            None => Err(CoreError::WrongOperatorType {
                id,
                expected: std::any::type_name::<T>(),
            }),
        };
        self.return_operator(id, op);
        result
    }

    // -----------------------------------------------------------------------
    // Connections and values
    // -----------------------------------------------------------------------

    /// Raw link without validation or notification.
    pub(crate) fn link(&mut self, down: SlotId, up: SlotId) -> CoreResult<()> {
        self.slot_mut(down)?.upstream = Some(up);
        self.slot_mut(up)?.downstream.push(down);
        Ok(())
    }

    /// Raw unlink; also drops the operator edge if one was recorded.
    fn detach(&mut self, down: SlotId) -> CoreResult<Option<SlotId>> {
        let data = self.slot_mut(down)?;
        let Some(up) = data.upstream.take() else {
            return Ok(None);
        };
        let down_owner = data.owner;
        if let Some(u) = self.slots.get_mut(&up) {
            u.downstream.retain(|&d| d != down);
            let edge = self
                .ops
                .edges_connecting(u.owner.into(), down_owner.into())
                .find(|e| e.weight().from == up && e.weight().to == down)
                .map(|e| e.id());
            if let Some(edge) = edge {
                self.ops.remove_edge(edge);
            }
        }
        Ok(Some(up))
    }

    /// Connects `down` to be driven by `up`, replacing any prior connection.
    pub fn connect(&mut self, down: SlotId, up: SlotId) -> CoreResult<()> {
        let d = self.slot(down)?;
        let u = self.slot(up)?;
        let mismatch = |reason: &str| CoreError::TypeMismatch {
            downstream: down,
            upstream: up,
            reason: reason.to_string(),
        };
        if down == up {
            return Err(mismatch("a slot cannot drive itself"));
        }
        let is_edge = match (d.direction, u.direction) {
            (Direction::Input, Direction::Output) => true,
            (Direction::Input, Direction::Input) => {
                if self.node(d.owner)?.parent != Some(u.owner) {
                    return Err(mismatch(
                        "an input can only forward an input of its enclosing operator",
                    ));
                }
                false
            }
            (Direction::Output, Direction::Output) => {
                if self.node(u.owner)?.parent != Some(d.owner) {
                    return Err(CoreError::NotAnInput {
                        slot: down,
                        name: d.name.clone(),
                    });
                }
                false
            }
            (Direction::Output, Direction::Input) => {
                return Err(CoreError::NotAnInput {
                    slot: down,
                    name: d.name.clone(),
                })
            }
        };
        if d.level != u.level {
            return Err(mismatch(&format!(
                "level {} cannot connect to level {}",
                d.level, u.level
            )));
        }
        if !d.kind.compatible(u.kind) {
            return Err(mismatch(&format!("{:?} cannot accept {:?}", d.kind, u.kind)));
        }
        let (up_owner, down_owner, level) = (u.owner, d.owner, d.level);
        if is_edge
            && (up_owner == down_owner
                || has_path_connecting(&self.ops, down_owner.into(), up_owner.into(), None))
        {
            return Err(CoreError::CycleDetected { id: down_owner });
        }

        self.detach(down)?;
        self.slot_mut(down)?.value = None;
        self.link(down, up)?;
        if is_edge {
            self.ops
                .add_edge(up_owner.into(), down_owner.into(), SlotLink { from: up, to: down });
        }
        if level > 0 {
            self.mirror(down, up)?;
        }
        self.slot_changed(down)?;
        if self.is_ready(down) {
            self.dirty_full(down);
        }
        Ok(())
    }

    /// Makes multislot `down` match `up`'s length and links subslots pairwise.
    pub(crate) fn mirror(&mut self, down: SlotId, up: SlotId) -> CoreResult<()> {
        let target = self.slot(up)?.children.len();
        let existing = self.slot(down)?.children.len();
        for i in 0..existing.min(target) {
            let dc = self.subslot(down, i)?;
            let uc = self.subslot(up, i)?;
            if self.slot(dc)?.upstream != Some(uc) {
                self.detach(dc)?;
                self.slot_mut(dc)?.value = None;
                self.link(dc, uc)?;
                if self.slot(dc)?.level > 0 {
                    self.mirror(dc, uc)?;
                }
            }
        }
        // New subslots are linked to their upstream partners by the batch.
        self.resize(down, target, None)
    }

    /// Severs `slot`'s upstream connection.
    pub fn disconnect(&mut self, slot: SlotId) -> CoreResult<()> {
        if self.detach(slot)?.is_none() {
            return Ok(());
        }
        self.fire(slot, &SlotEvent::Disconnect { slot });
        self.slot_changed(slot)
    }

    /// Sets a directly-held value on an input, disconnecting it first.
    /// Setting a value on a multislot sets it on every subslot.
    pub fn set_value(&mut self, slot: SlotId, value: Value) -> CoreResult<()> {
        let data = self.slot(slot)?;
        if !data.is_input() {
            return Err(CoreError::NotAnInput {
                slot,
                name: data.name.clone(),
            });
        }
        if !data.kind.accepts(&value) {
            return Err(CoreError::TypeMismatch {
                downstream: slot,
                upstream: slot,
                reason: format!("{:?} slot cannot hold {:?}", data.kind, value.kind()),
            });
        }
        if data.level > 0 {
            let children = data.children.clone();
            for child in children {
                self.set_value(child, value.clone())?;
            }
            return Ok(());
        }
        if data.upstream.is_none() && data.value.as_ref() == Some(&value) {
            return Ok(());
        }

        self.detach(slot)?;
        self.slot_mut(slot)?.value = Some(value);
        self.slot_changed(slot)?;
        if self.is_ready(slot) {
            self.dirty_full(slot);
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Plans the computation of `roi` on `slot`.
    pub fn request(&self, slot: SlotId, roi: &Roi) -> CoreResult<LazyResult> {
        let data = self.slot(slot)?;
        if !data.ready {
            return Err(CoreError::NotReady {
                slot,
                name: data.name.clone(),
            });
        }
        if data.level > 0 {
            return Err(CoreError::InvalidRoi {
                roi: roi.to_string(),
                reason: format!("'{}' is a multislot; request one of its subslots", data.name),
            });
        }
        let src_id = self.resolve(slot)?;
        let src = self.slot(src_id)?;
        let held = src.value.as_ref().or(if src.is_input() {
            src.default.as_ref()
        } else {
            None
        });
        if let Some(value) = held {
            let array = value.as_array().ok_or_else(|| {
                CoreError::compute(format!("slot '{}' holds {:?}, not an array", src.name, value))
            })?;
            roi.check_within(array.shape())?;
            return Ok(LazyResult::ready(roi.slice(array)));
        }
        if src.is_input() {
            return Err(CoreError::NotReady {
                slot: src_id,
                name: src.name.clone(),
            });
        }
        if let Some(shape) = &src.meta.shape {
            roi.check_within(shape)?;
        }

        let owner = src.owner;
        let node = self.node(owner)?;
        let op = node.operator.as_ref().ok_or_else(|| unavailable(node))?;
        let slot_ref = self.slot_ref(src_id)?;
        let ctx = ExecuteContext::new(self, owner);
        op.execute(&ctx, &slot_ref, roi)
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    pub fn observe(&mut self, slot: SlotId, observer: ObserverFn) -> CoreResult<ObserverId> {
        let id = ObserverId(self.next_observer);
        self.next_observer += 1;
        self.slot_mut(slot)?.observers.push((id, observer));
        Ok(id)
    }

    pub fn unobserve(&mut self, slot: SlotId, id: ObserverId) -> CoreResult<bool> {
        let observers = &mut self.slot_mut(slot)?.observers;
        let before = observers.len();
        observers.retain(|(oid, _)| *oid != id);
        Ok(observers.len() != before)
    }

    /// Queues `event` for every current observer of `slot`, in
    /// registration order. Delivery happens once the lock is released.
    pub(crate) fn fire(&mut self, slot: SlotId, event: &SlotEvent) {
        let Some(data) = self.slots.get(&slot) else {
            return;
        };
        if data.observers.is_empty() {
            return;
        }
        let observers = data.observers.iter().map(|(_, o)| Arc::clone(o)).collect();
        self.pending.push_back(PendingEvent {
            slot,
            event: event.clone(),
            observers,
        });
    }

    /// Whether the caller should deliver queued events now.
    fn claim_delivery(&mut self) -> bool {
        if self.delivering || self.pending.is_empty() {
            return false;
        }
        self.delivering = true;
        true
    }

    pub(crate) fn record_failure(&mut self, slot: SlotId, event: &'static str, message: String) {
        tracing::warn!(slot = slot.0, event, %message, "observer failed");
        self.failures.push(ObserverFailure {
            slot,
            event,
            message,
        });
    }
}

// ---------------------------------------------------------------------------
// Graph handle
// ---------------------------------------------------------------------------

struct GraphInner {
    config: GraphConfig,
    state: Mutex<GraphState>,
}

/// Shared handle to one dataflow graph.
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl Graph {
    /// Creates a graph with its own worker pool.
    pub fn new(config: GraphConfig) -> CoreResult<Self> {
        let pool = ThreadPool::builder()
            .pool_size(config.worker_threads.max(1))
            .name_prefix(format!("{}-worker-", config.name))
            .create()
            .map_err(|e| CoreError::WorkerPool {
                reason: e.to_string(),
            })?;
        debug!(graph = %config.name, workers = config.worker_threads, "graph created");
        Ok(Graph {
            inner: Arc::new(GraphInner {
                config,
                state: Mutex::new(GraphState::new(pool)),
            }),
        })
    }

    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, GraphState> {
        match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => {
                let mut state = poisoned.into_inner();
                state.recover_after_panic();
                self.inner.state.clear_poison();
                state
            }
        }
    }

    /// Runs a mutation under the lock, then delivers the observer events
    /// it raised.
    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut GraphState) -> R) -> R {
        let (result, deliver) = {
            let mut state = self.lock();
            let result = f(&mut state);
            let deliver = state.claim_delivery();
            (result, deliver)
        };
        if deliver {
            self.deliver_pending();
        }
        result
    }

    fn deliver_pending(&self) {
        let _reset = DeliveryReset(self);
        loop {
            let next = {
                let mut state = self.lock();
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.delivering = false;
                }
                next
            };
            let Some(pending) = next else {
                return;
            };
            let failures: Vec<ObserverError> = pending
                .observers
                .iter()
                .filter_map(|observer| observer(&pending.event).err())
                .collect();
            if !failures.is_empty() {
                let mut state = self.lock();
                for err in failures {
                    state.record_failure(pending.slot, pending.event.label(), err.to_string());
                }
            }
        }
    }

    pub fn pool(&self) -> ThreadPool {
        self.lock().pool.clone()
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    /// Adds a root operator to the graph.
    pub fn add_operator(&self, op: impl Operator + 'static) -> CoreResult<OperatorId> {
        self.mutate(|state| state.add_operator(None, Box::new(op)))
    }

    pub fn add_operator_boxed(&self, op: Box<dyn Operator>) -> CoreResult<OperatorId> {
        self.mutate(|state| state.add_operator(None, op))
    }

    pub fn remove_operator(&self, id: OperatorId) -> CoreResult<()> {
        self.mutate(|state| state.remove_operator(id))
    }

    pub fn operator_name(&self, id: OperatorId) -> CoreResult<String> {
        Ok(self.lock().node(id)?.name.clone())
    }

    pub fn operator_category(&self, id: OperatorId) -> CoreResult<String> {
        Ok(self.lock().node(id)?.category.clone())
    }

    pub fn children(&self, id: OperatorId) -> CoreResult<Vec<OperatorId>> {
        Ok(self.lock().node(id)?.children.clone())
    }

    pub fn parent(&self, id: OperatorId) -> CoreResult<Option<OperatorId>> {
        Ok(self.lock().node(id)?.parent)
    }

    pub fn operator_count(&self) -> usize {
        self.lock().ops.node_count()
    }

    /// Number of successful `configure()` runs of an operator.
    pub fn configure_count(&self, id: OperatorId) -> CoreResult<u64> {
        Ok(self.lock().node(id)?.configure_count)
    }

    pub fn is_configured(&self, id: OperatorId) -> CoreResult<bool> {
        Ok(self.lock().node(id)?.configured)
    }

    /// Re-runs `configure()` on an operator with unchanged inputs.
    pub fn reconfigure(&self, id: OperatorId) -> CoreResult<()> {
        self.mutate(|state| state.reconfigure(id))
    }

    /// Borrows an operator as its concrete type.
    pub fn with_operator<T: Operator + 'static, R>(
        &self,
        id: OperatorId,
        f: impl FnOnce(&T) -> R,
    ) -> CoreResult<R> {
        let state = self.lock();
        let node = state.node(id)?;
        let op = node.operator.as_ref().ok_or_else(|| unavailable(node))?;
        (**op)
            .as_any()
            .downcast_ref::<T>()
            .map(f)
            .ok_or(CoreError::WrongOperatorType {
                id,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Mutably borrows an operator as its concrete type, with a context for
    /// structural changes it makes.
    pub fn with_operator_mut<T: Operator + 'static, R>(
        &self,
        id: OperatorId,
        f: impl FnOnce(&mut T, &mut OpContext<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.mutate(|state| state.with_operator_mut(id, f))
    }

    // -----------------------------------------------------------------------
    // Slots
    // -----------------------------------------------------------------------

    pub fn input(&self, op: OperatorId, name: &str) -> CoreResult<SlotId> {
        self.lock().named_input(op, name)
    }

    pub fn output(&self, op: OperatorId, name: &str) -> CoreResult<SlotId> {
        self.lock().named_output(op, name)
    }

    pub fn subslot(&self, slot: SlotId, index: usize) -> CoreResult<SlotId> {
        self.lock().subslot(slot, index)
    }

    pub fn slot_ref(&self, slot: SlotId) -> CoreResult<SlotRef> {
        self.lock().slot_ref(slot)
    }

    /// Number of subslots of a multislot.
    pub fn len(&self, slot: SlotId) -> CoreResult<usize> {
        Ok(self.lock().slot(slot)?.children.len())
    }

    pub fn level(&self, slot: SlotId) -> CoreResult<usize> {
        Ok(self.lock().slot(slot)?.level)
    }

    pub fn kind(&self, slot: SlotId) -> CoreResult<ValueKind> {
        Ok(self.lock().slot(slot)?.kind)
    }

    pub fn upstream(&self, slot: SlotId) -> CoreResult<Option<SlotId>> {
        Ok(self.lock().slot(slot)?.upstream)
    }

    pub fn is_ready(&self, slot: SlotId) -> CoreResult<bool> {
        Ok(self.lock().slot(slot)?.ready)
    }

    pub fn meta(&self, slot: SlotId) -> CoreResult<Meta> {
        self.lock().meta_of(slot)
    }

    /// The value held by (or published on) a ready slot.
    pub fn value(&self, slot: SlotId) -> CoreResult<Value> {
        self.lock().value_of(slot)
    }

    /// The value set directly on an input, ignoring defaults and connections.
    pub fn own_value(&self, slot: SlotId) -> CoreResult<Option<Value>> {
        Ok(self.lock().slot(slot)?.value.clone())
    }

    pub fn set_value(&self, slot: SlotId, value: impl Into<Value>) -> CoreResult<()> {
        let value = value.into();
        self.mutate(|state| state.set_value(slot, value))
    }

    pub fn connect(&self, downstream: SlotId, upstream: SlotId) -> CoreResult<()> {
        self.mutate(|state| state.connect(downstream, upstream))
    }

    pub fn disconnect(&self, slot: SlotId) -> CoreResult<()> {
        self.mutate(|state| state.disconnect(slot))
    }

    /// Requests `roi` from a slot. The returned handle is lazy.
    pub fn get(&self, slot: SlotId, roi: &Roi) -> CoreResult<LazyResult> {
        self.lock().request(slot, roi)
    }

    /// Requests a slot's full extent.
    pub fn get_all(&self, slot: SlotId) -> CoreResult<LazyResult> {
        let state = self.lock();
        let roi = state.meta_of(slot)?.full_roi();
        state.request(slot, &roi)
    }

    /// Issues a dirty notification on `slot` directly.
    pub fn set_dirty(&self, slot: SlotId, roi: &Roi) -> CoreResult<()> {
        self.mutate(|state| state.set_dirty(slot, roi))
    }

    /// Runs a lazy result on the worker pool.
    pub fn spawn<T: Send + 'static>(&self, lazy: LazyResult<T>) -> LazyResult<T> {
        let pool = self.pool();
        lazy.spawn_on(&pool)
    }

    // -----------------------------------------------------------------------
    // Multislots
    // -----------------------------------------------------------------------

    pub fn insert_slot(&self, slot: SlotId, index: usize) -> CoreResult<()> {
        self.mutate(|state| {
            state.structural_batch(&[slot], ChangeKind::Insert, index, None, |_| Ok(Vec::new()))
        })
    }

    pub fn remove_slot(&self, slot: SlotId, index: usize) -> CoreResult<()> {
        self.mutate(|state| {
            state.structural_batch(&[slot], ChangeKind::Remove, index, None, |_| Ok(Vec::new()))
        })
    }

    pub fn resize(&self, slot: SlotId, len: usize) -> CoreResult<()> {
        self.mutate(|state| state.resize(slot, len, None))
    }

    // -----------------------------------------------------------------------
    // Observers
    // -----------------------------------------------------------------------

    /// Registers a raw observer receiving every event on `slot`.
    pub fn observe(
        &self,
        slot: SlotId,
        observer: impl Fn(&SlotEvent) -> Result<(), ObserverError> + Send + Sync + 'static,
    ) -> CoreResult<ObserverId> {
        self.lock().observe(slot, Arc::new(observer))
    }

    pub fn unobserve(&self, slot: SlotId, id: ObserverId) -> CoreResult<bool> {
        self.lock().unobserve(slot, id)
    }

    pub fn notify_dirty(
        &self,
        slot: SlotId,
        f: impl Fn(&Roi) + Send + Sync + 'static,
    ) -> CoreResult<ObserverId> {
        self.observe(slot, move |event| {
            if let SlotEvent::Dirty { roi, .. } = event {
                f(roi);
            }
            Ok(())
        })
    }

    pub fn notify_ready(&self, slot: SlotId, f: impl Fn() + Send + Sync + 'static) -> CoreResult<ObserverId> {
        self.observe(slot, move |event| {
            if matches!(event, SlotEvent::Ready { .. }) {
                f();
            }
            Ok(())
        })
    }

    pub fn notify_unready(&self, slot: SlotId, f: impl Fn() + Send + Sync + 'static) -> CoreResult<ObserverId> {
        self.observe(slot, move |event| {
            if matches!(event, SlotEvent::Unready { .. }) {
                f();
            }
            Ok(())
        })
    }

    /// Prepare phase of an insert.
    pub fn notify_insert(
        &self,
        slot: SlotId,
        f: impl Fn(&StructuralChange) + Send + Sync + 'static,
    ) -> CoreResult<ObserverId> {
        self.observe(slot, move |event| {
            if let SlotEvent::Prepare(change) = event {
                if change.kind == ChangeKind::Insert {
                    f(change);
                }
            }
            Ok(())
        })
    }

    /// Commit phase of an insert.
    pub fn notify_inserted(
        &self,
        slot: SlotId,
        f: impl Fn(&StructuralChange) + Send + Sync + 'static,
    ) -> CoreResult<ObserverId> {
        self.observe(slot, move |event| {
            if let SlotEvent::Commit(change) = event {
                if change.kind == ChangeKind::Insert {
                    f(change);
                }
            }
            Ok(())
        })
    }

    /// Prepare phase of a removal.
    pub fn notify_remove(
        &self,
        slot: SlotId,
        f: impl Fn(&StructuralChange) + Send + Sync + 'static,
    ) -> CoreResult<ObserverId> {
        self.observe(slot, move |event| {
            if let SlotEvent::Prepare(change) = event {
                if change.kind == ChangeKind::Remove {
                    f(change);
                }
            }
            Ok(())
        })
    }

    /// Commit phase of a removal.
    pub fn notify_removed(
        &self,
        slot: SlotId,
        f: impl Fn(&StructuralChange) + Send + Sync + 'static,
    ) -> CoreResult<ObserverId> {
        self.observe(slot, move |event| {
            if let SlotEvent::Commit(change) = event {
                if change.kind == ChangeKind::Remove {
                    f(change);
                }
            }
            Ok(())
        })
    }

    /// Drains the failures collected from observers and dirty propagation.
    pub fn take_observer_failures(&self) -> Vec<ObserverFailure> {
        std::mem::take(&mut self.lock().failures)
    }
}

/// Releases the delivery role if an observer panics.
struct DeliveryReset<'a>(&'a Graph);

impl Drop for DeliveryReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.0.lock();
            state.delivering = false;
            state.pending.clear();
        }
    }
}

fn unavailable(node: &OperatorNode) -> CoreError {
    if node.busy {
        CoreError::Reentrant {
            name: node.name.clone(),
        }
    } else {
        CoreError::OperatorLost {
            name: node.name.clone(),
        }
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.inner.config.name)
            .finish_non_exhaustive()
    }
}
