//! Small operators shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ndarray::{ArrayD, IxDyn};

use roiflow_core::{
    Array, CoreError, CoreResult, ExecuteContext, Graph, GraphConfig, LazyResult, OpContext,
    Operator, Roi, SlotEvent, SlotId, SlotRef, SlotSpec, ValueKind,
};

pub fn graph() -> Graph {
    Graph::new(GraphConfig::named("test").with_worker_threads(2)).unwrap()
}

/// `0, 1, 2, ...` laid out in `shape`.
pub fn ramp(shape: &[usize]) -> Array {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|v| v as f32).collect())
        .unwrap()
        .into_shared()
}

/// Records every event delivered to a slot.
pub fn record(graph: &Graph, slot: SlotId) -> Arc<Mutex<Vec<SlotEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    graph
        .observe(slot, move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        })
        .unwrap();
    log
}

pub fn dirty_rois(log: &Arc<Mutex<Vec<SlotEvent>>>) -> Vec<Roi> {
    log.lock()
        .unwrap()
        .iter()
        .filter_map(|e| match e {
            SlotEvent::Dirty { roi, .. } => Some(roi.clone()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// OpPiper: Input -> Output unchanged, counting executions
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct OpPiper {
    pub executions: Arc<AtomicUsize>,
}

impl Operator for OpPiper {
    fn name(&self) -> &str {
        "OpPiper"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Input", ValueKind::Array),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let meta = ctx.meta(ctx.input("Input")?)?;
        let output = ctx.output("Output")?;
        ctx.set_meta(output, meta)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        ctx.get(ctx.input("Input")?, roi)
    }

    fn propagate_dirty(&mut self, ctx: &mut OpContext<'_>, _input: &SlotRef, roi: &Roi) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        ctx.set_dirty(output, roi)
    }
}

// ---------------------------------------------------------------------------
// OpAdd: A + B, shapes must agree
// ---------------------------------------------------------------------------

pub struct OpAdd;

impl Operator for OpAdd {
    fn name(&self) -> &str {
        "OpAdd"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("A", ValueKind::Array),
            SlotSpec::input("B", ValueKind::Array),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let a = ctx.meta(ctx.input("A")?)?;
        let b = ctx.meta(ctx.input("B")?)?;
        if a.shape != b.shape {
            return Err(CoreError::constraint(
                "Add",
                format!("shape of A {:?} differs from shape of B {:?}", a.shape, b.shape),
            ));
        }
        let output = ctx.output("Output")?;
        ctx.set_meta(output, a)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        let a = ctx.get(ctx.input("A")?, roi)?;
        let b = ctx.get(ctx.input("B")?, roi)?;
        Ok(LazyResult::join_all(vec![a, b]).map(|parts| Ok((&parts[0] + &parts[1]).into_shared())))
    }

    fn propagate_dirty(&mut self, ctx: &mut OpContext<'_>, _input: &SlotRef, roi: &Roi) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        ctx.set_dirty(output, roi)
    }
}

// ---------------------------------------------------------------------------
// OpWrapped: rebuilds an inner OpPiper on every configure
// ---------------------------------------------------------------------------

/// Forwards through an internal piper. Rejects inputs whose first axis is
/// longer than `limit`, after having built its child.
#[derive(Default)]
pub struct OpWrapped {
    pub limit: Option<usize>,
}

impl Operator for OpWrapped {
    fn name(&self) -> &str {
        "OpWrapped"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Input", ValueKind::Array),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        ctx.clear_children()?;
        let child = ctx.add_child(OpPiper::default())?;
        let input = ctx.input("Input")?;
        let output = ctx.output("Output")?;
        let child_in = ctx.child_input(child, "Input")?;
        let child_out = ctx.child_output(child, "Output")?;
        ctx.connect(child_in, input)?;
        ctx.connect(output, child_out)?;

        let len = ctx.meta(input)?.shape.and_then(|s| s.first().copied()).unwrap_or(0);
        if let Some(limit) = self.limit {
            if len > limit {
                return Err(CoreError::constraint("Wrapped", format!("length {len} exceeds {limit}")));
            }
        }
        Ok(())
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, output: &SlotRef, _roi: &Roi) -> CoreResult<LazyResult> {
        Err(roiflow_core::operator::unsupported_output("OpWrapped", output))
    }

    fn propagate_dirty(&mut self, _ctx: &mut OpContext<'_>, _input: &SlotRef, _roi: &Roi) -> CoreResult<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// OpCollect: a level-1 input with no outputs
// ---------------------------------------------------------------------------

pub struct OpCollect {
    pub append_only: bool,
}

impl Operator for OpCollect {
    fn name(&self) -> &str {
        "OpCollect"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        let spec = SlotSpec::input("Items", ValueKind::Int).level(1).optional();
        vec![if self.append_only { spec.append_only() } else { spec }]
    }

    fn configure(&mut self, _ctx: &mut OpContext<'_>) -> CoreResult<()> {
        Ok(())
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, output: &SlotRef, _roi: &Roi) -> CoreResult<LazyResult> {
        Err(roiflow_core::operator::unsupported_output("OpCollect", output))
    }
}

// ---------------------------------------------------------------------------
// OpRejecting: a source whose configure always fails
// ---------------------------------------------------------------------------

pub struct OpRejecting;

impl Operator for OpRejecting {
    fn name(&self) -> &str {
        "OpRejecting"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![SlotSpec::output("Output", ValueKind::Array)]
    }

    fn configure(&mut self, _ctx: &mut OpContext<'_>) -> CoreResult<()> {
        Err(CoreError::constraint("Rejecting", "never configures"))
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, output: &SlotRef, _roi: &Roi) -> CoreResult<LazyResult> {
        Err(roiflow_core::operator::unsupported_output("OpRejecting", output))
    }
}

// ---------------------------------------------------------------------------
// OpFragile: a piper that panics in its callbacks
// ---------------------------------------------------------------------------

/// Panics in `configure()` once `trip` is set, and in every
/// `propagate_dirty()`.
#[derive(Default)]
pub struct OpFragile {
    pub trip: Arc<AtomicBool>,
}

impl Operator for OpFragile {
    fn name(&self) -> &str {
        "OpFragile"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Input", ValueKind::Array),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        if self.trip.swap(false, Ordering::SeqCst) {
            panic!("configure tripped");
        }
        let meta = ctx.meta(ctx.input("Input")?)?;
        let output = ctx.output("Output")?;
        ctx.set_meta(output, meta)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        ctx.get(ctx.input("Input")?, roi)
    }

    fn propagate_dirty(&mut self, _ctx: &mut OpContext<'_>, _input: &SlotRef, _roi: &Roi) -> CoreResult<()> {
        panic!("dirty propagation tripped");
    }
}
