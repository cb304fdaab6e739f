//! The [`Operator`] trait and the contexts handed to its callbacks.
//!
//! Operators never touch the graph directly. Structural callbacks
//! (`configure`, `propagate_dirty`, `on_input_resized`) receive an
//! [`OpContext`] with mutable access to the graph state; `execute` receives
//! a read-only [`ExecuteContext`] and returns a [`LazyResult`] whose work
//! runs after the mutation lock is released.

use std::any::Any;

use futures::executor::ThreadPool;

use crate::error::{CoreError, CoreResult};
use crate::graph::GraphState;
use crate::id::{OperatorId, SlotId};
use crate::lazy::LazyResult;
use crate::meta::Meta;
use crate::observer::{ChangeKind, StructuralChange};
use crate::roi::Roi;
use crate::slot::{SlotRef, SlotSpec};
use crate::value::Value;

/// Downcasting support for boxed operators.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A computation node with named input and output slots.
///
/// `configure()` may run many times and must be idempotent: it recomputes
/// output metadata from the current inputs and fully replaces any internal
/// child operators it owns.
pub trait Operator: AsAny + Send {
    fn name(&self) -> &str;

    fn category(&self) -> &str {
        "general"
    }

    /// The fixed slot declarations, read once when the operator is added.
    fn slots(&self) -> Vec<SlotSpec>;

    /// Recomputes output metadata. Called whenever an input changes and all
    /// mandatory inputs are ready.
    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()>;

    /// Produces the data for `roi` of `output`.
    fn execute(
        &self,
        ctx: &ExecuteContext<'_>,
        output: &SlotRef,
        roi: &Roi,
    ) -> CoreResult<LazyResult>;

    /// Maps a dirty input region to dirty output regions. The default
    /// invalidates every output in full.
    fn propagate_dirty(
        &mut self,
        ctx: &mut OpContext<'_>,
        input: &SlotRef,
        roi: &Roi,
    ) -> CoreResult<()> {
        let _ = (input, roi);
        for output in ctx.outputs()? {
            ctx.set_dirty_full(output)?;
        }
        Ok(())
    }

    /// Called after an input multislot was resized by someone other than
    /// this operator.
    fn on_input_resized(
        &mut self,
        ctx: &mut OpContext<'_>,
        input: &SlotRef,
        change: &StructuralChange,
    ) -> CoreResult<()> {
        let _ = (ctx, input, change);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OpContext
// ---------------------------------------------------------------------------

/// Mutable access to the graph for one operator's structural callbacks.
pub struct OpContext<'a> {
    state: &'a mut GraphState,
    op: OperatorId,
}

impl<'a> OpContext<'a> {
    pub(crate) fn new(state: &'a mut GraphState, op: OperatorId) -> Self {
        OpContext { state, op }
    }

    pub(crate) fn state(&mut self) -> &mut GraphState {
        self.state
    }

    pub fn operator_id(&self) -> OperatorId {
        self.op
    }

    /// This operator's top-level input slot `name`.
    pub fn input(&self, name: &str) -> CoreResult<SlotId> {
        self.state.named_input(self.op, name)
    }

    /// This operator's top-level output slot `name`.
    pub fn output(&self, name: &str) -> CoreResult<SlotId> {
        self.state.named_output(self.op, name)
    }

    /// All top-level outputs in declaration order.
    pub fn outputs(&self) -> CoreResult<Vec<SlotId>> {
        Ok(self.state.node(self.op)?.outputs.values().copied().collect())
    }

    pub fn child_input(&self, child: OperatorId, name: &str) -> CoreResult<SlotId> {
        self.state.named_input(child, name)
    }

    pub fn child_output(&self, child: OperatorId, name: &str) -> CoreResult<SlotId> {
        self.state.named_output(child, name)
    }

    pub fn slot_ref(&self, slot: SlotId) -> CoreResult<SlotRef> {
        self.state.slot_ref(slot)
    }

    pub fn is_ready(&self, slot: SlotId) -> bool {
        self.state.is_ready(slot)
    }

    pub fn meta(&self, slot: SlotId) -> CoreResult<Meta> {
        self.state.meta_of(slot)
    }

    pub fn value(&self, slot: SlotId) -> CoreResult<Value> {
        self.state.value_of(slot)
    }

    pub fn len(&self, slot: SlotId) -> CoreResult<usize> {
        Ok(self.state.slot(slot)?.children.len())
    }

    pub fn subslot(&self, slot: SlotId, index: usize) -> CoreResult<SlotId> {
        self.state.subslot(slot, index)
    }

    /// The slot driving `slot`, if it is connected.
    pub fn upstream(&self, slot: SlotId) -> CoreResult<Option<SlotId>> {
        Ok(self.state.slot(slot)?.upstream)
    }

    /// Publishes output metadata. Downstream slots see it once
    /// `configure()` returns.
    pub fn set_meta(&mut self, output: SlotId, meta: Meta) -> CoreResult<()> {
        self.state.slot_mut(output)?.meta = meta;
        Ok(())
    }

    /// Publishes a non-array output value together with its metadata.
    pub fn publish(&mut self, output: SlotId, value: Value) -> CoreResult<()> {
        let data = self.state.slot_mut(output)?;
        data.meta = Meta::for_value(&value);
        data.value = Some(value);
        Ok(())
    }

    /// Keeps an output unready even after a successful `configure()`.
    pub fn hold_unready(&mut self, output: SlotId, held: bool) -> CoreResult<()> {
        self.state.slot_mut(output)?.held_unready = held;
        Ok(())
    }

    /// Creates an internal operator owned by this one.
    pub fn add_child(&mut self, op: impl Operator + 'static) -> CoreResult<OperatorId> {
        self.state.add_operator(Some(self.op), Box::new(op))
    }

    pub fn add_child_boxed(&mut self, op: Box<dyn Operator>) -> CoreResult<OperatorId> {
        self.state.add_operator(Some(self.op), op)
    }

    pub fn remove_child(&mut self, child: OperatorId) -> CoreResult<()> {
        self.state.remove_operator(child)
    }

    /// Tears down every internal operator this one owns.
    pub fn clear_children(&mut self) -> CoreResult<()> {
        self.state.clear_children(self.op)
    }

    pub fn children(&self) -> CoreResult<Vec<OperatorId>> {
        Ok(self.state.node(self.op)?.children.clone())
    }

    pub fn connect(&mut self, downstream: SlotId, upstream: SlotId) -> CoreResult<()> {
        self.state.connect(downstream, upstream)
    }

    pub fn disconnect(&mut self, slot: SlotId) -> CoreResult<()> {
        self.state.disconnect(slot)
    }

    pub fn set_value(&mut self, slot: SlotId, value: Value) -> CoreResult<()> {
        self.state.set_value(slot, value)
    }

    pub fn set_dirty(&mut self, slot: SlotId, roi: &Roi) -> CoreResult<()> {
        self.state.set_dirty(slot, roi)
    }

    /// Invalidates the whole extent of `slot` (every subslot of a multislot).
    pub fn set_dirty_full(&mut self, slot: SlotId) -> CoreResult<()> {
        self.state.slot(slot)?;
        self.state.dirty_full(slot);
        Ok(())
    }

    /// Inserts a subslot, with this operator as the initiator (its own
    /// `on_input_resized` is not called).
    pub fn insert_slot(&mut self, slot: SlotId, index: usize) -> CoreResult<()> {
        self.state
            .structural_batch(&[slot], ChangeKind::Insert, index, Some(self.op), |_| Ok(Vec::new()))
    }

    pub fn remove_slot(&mut self, slot: SlotId, index: usize) -> CoreResult<()> {
        self.state
            .structural_batch(&[slot], ChangeKind::Remove, index, Some(self.op), |_| Ok(Vec::new()))
    }

    /// Grows or shrinks a multislot at its end.
    pub fn resize(&mut self, slot: SlotId, len: usize) -> CoreResult<()> {
        self.state.resize(slot, len, Some(self.op))
    }

    /// Runs `f` against a child operator of concrete type `T`.
    pub fn with_child<T: Operator + 'static, R>(
        &mut self,
        child: OperatorId,
        f: impl FnOnce(&mut T, &mut OpContext<'_>) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.state.with_operator_mut(child, f)
    }
}

// ---------------------------------------------------------------------------
// ExecuteContext
// ---------------------------------------------------------------------------

/// Read-only access to the graph while an operator plans a computation.
pub struct ExecuteContext<'a> {
    state: &'a GraphState,
    op: OperatorId,
}

impl<'a> ExecuteContext<'a> {
    pub(crate) fn new(state: &'a GraphState, op: OperatorId) -> Self {
        ExecuteContext { state, op }
    }

    pub fn operator_id(&self) -> OperatorId {
        self.op
    }

    pub fn input(&self, name: &str) -> CoreResult<SlotId> {
        self.state.named_input(self.op, name)
    }

    pub fn subslot(&self, slot: SlotId, index: usize) -> CoreResult<SlotId> {
        self.state.subslot(slot, index)
    }

    pub fn meta(&self, slot: SlotId) -> CoreResult<Meta> {
        self.state.meta_of(slot)
    }

    pub fn value(&self, slot: SlotId) -> CoreResult<Value> {
        self.state.value_of(slot)
    }

    /// Requests `roi` from another slot; the result stays deferred.
    pub fn get(&self, slot: SlotId, roi: &Roi) -> CoreResult<LazyResult> {
        self.state.request(slot, roi)
    }

    pub fn pool(&self) -> &ThreadPool {
        &self.state.pool
    }
}

/// Helper for operators that only ever serve array data from `execute`.
pub fn unsupported_output(op: &str, output: &SlotRef) -> CoreError {
    CoreError::UnknownSlot {
        operator: op.to_string(),
        name: output.name.clone(),
    }
}
