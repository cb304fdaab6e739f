//! Operator lifecycle: connections, values, readiness and configure().

mod common;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;

use common::{graph, ramp, record, OpAdd, OpCollect, OpFragile, OpPiper, OpWrapped};
use roiflow_core::{
    CoreError, CoreResult, ExecuteContext, LazyResult, OpContext, Operator, Roi, SlotEvent,
    SlotRef, SlotSpec, Value, ValueKind,
};

/// Multiplies its input by `Factor`, which defaults to 2.
struct OpScale;

impl Operator for OpScale {
    fn name(&self) -> &str {
        "OpScale"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Input", ValueKind::Array),
            SlotSpec::input("Factor", ValueKind::Float).default_value(Value::Float(2.0)),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let meta = ctx.meta(ctx.input("Input")?)?;
        let output = ctx.output("Output")?;
        ctx.set_meta(output, meta)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        let factor = match ctx.value(ctx.input("Factor")?)? {
            Value::Float(f) => f as f32,
            other => return Err(CoreError::compute(format!("bad factor {other:?}"))),
        };
        Ok(ctx.get(ctx.input("Input")?, roi)?.map(move |a| Ok(a.mapv(|v| v * factor).into_shared())))
    }
}

#[test]
fn output_becomes_ready_once_input_is_set() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    let input = g.input(op, "Input").unwrap();
    let output = g.output(op, "Output").unwrap();
    let log = record(&g, output);

    assert!(!g.is_ready(output).unwrap());
    assert!(!g.is_configured(op).unwrap());

    g.set_value(input, ramp(&[10])).unwrap();
    assert!(g.is_ready(output).unwrap());
    assert_eq!(g.meta(output).unwrap().shape, Some(vec![10]));

    let readies = log
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, SlotEvent::Ready { .. }))
        .count();
    assert_eq!(readies, 1);
}

#[test]
fn get_returns_requested_region() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    g.set_value(g.input(op, "Input").unwrap(), ramp(&[4, 3])).unwrap();
    let output = g.output(op, "Output").unwrap();

    let full = g.get_all(output).unwrap().wait().unwrap();
    assert_eq!(full, ramp(&[4, 3]));

    let roi = Roi::new(&[1, 0], &[3, 2]).unwrap();
    let part = g.get(output, &roi).unwrap().wait().unwrap();
    assert_eq!(part.shape(), &[2, 2]);
    assert_eq!(part.iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0, 6.0, 7.0]);
}

#[test]
fn sub_region_agrees_with_enclosing_region() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    g.set_value(g.input(op, "Input").unwrap(), ramp(&[12])).unwrap();
    let output = g.output(op, "Output").unwrap();

    let outer = Roi::new(&[2], &[10]).unwrap();
    let inner = Roi::new(&[4], &[7]).unwrap();
    let big = g.get(output, &outer).unwrap().wait().unwrap();
    let small = g.get(output, &inner).unwrap().wait().unwrap();
    assert_eq!(small, inner.relative_to(outer.start()).slice(&big));
}

#[test]
fn request_outside_shape_is_rejected() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    g.set_value(g.input(op, "Input").unwrap(), ramp(&[5])).unwrap();
    let roi = Roi::new(&[3], &[8]).unwrap();
    let err = g.get(g.output(op, "Output").unwrap(), &roi).err().unwrap();
    assert!(matches!(err, CoreError::InvalidRoi { .. }));
}

#[test]
fn request_on_unready_slot_fails() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    let err = g.get_all(g.output(op, "Output").unwrap()).err().unwrap();
    assert!(matches!(err, CoreError::NotReady { .. }));
}

#[test]
fn default_value_makes_input_ready() {
    let g = graph();
    let op = g.add_operator(OpScale).unwrap();
    assert!(g.is_ready(g.input(op, "Factor").unwrap()).unwrap());
    g.set_value(g.input(op, "Input").unwrap(), ramp(&[3])).unwrap();
    let out = g.get_all(g.output(op, "Output").unwrap()).unwrap().wait().unwrap();
    assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![0.0, 2.0, 4.0]);

    g.set_value(g.input(op, "Factor").unwrap(), 10.0).unwrap();
    let out = g.get_all(g.output(op, "Output").unwrap()).unwrap().wait().unwrap();
    assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![0.0, 10.0, 20.0]);
}

#[test]
fn set_value_on_output_is_rejected() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    let err = g.set_value(g.output(op, "Output").unwrap(), ramp(&[2])).unwrap_err();
    assert!(matches!(err, CoreError::NotAnInput { .. }));
}

#[test]
fn set_value_of_wrong_kind_is_rejected() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    let err = g.set_value(g.input(op, "Input").unwrap(), 3i64).unwrap_err();
    assert!(matches!(err, CoreError::TypeMismatch { .. }));
}

#[test]
fn connecting_output_to_unrelated_output_is_rejected() {
    let g = graph();
    let a = g.add_operator(OpPiper::default()).unwrap();
    let b = g.add_operator(OpPiper::default()).unwrap();
    let err = g
        .connect(g.output(b, "Output").unwrap(), g.output(a, "Output").unwrap())
        .unwrap_err();
    assert!(matches!(err, CoreError::NotAnInput { .. }));
}

#[test]
fn connecting_mismatched_levels_is_rejected() {
    let g = graph();
    let source = g.add_operator(OpPiper::default()).unwrap();
    let sink = g.add_operator(OpCollect { append_only: false }).unwrap();
    let err = g
        .connect(g.input(sink, "Items").unwrap(), g.output(source, "Output").unwrap())
        .unwrap_err();
    assert!(matches!(err, CoreError::TypeMismatch { .. }));
}

#[test]
fn closing_a_cycle_is_rejected() {
    let g = graph();
    let a = g.add_operator(OpPiper::default()).unwrap();
    let b = g.add_operator(OpPiper::default()).unwrap();
    g.connect(g.input(b, "Input").unwrap(), g.output(a, "Output").unwrap()).unwrap();
    let err = g
        .connect(g.input(a, "Input").unwrap(), g.output(b, "Output").unwrap())
        .unwrap_err();
    assert_eq!(err, CoreError::CycleDetected { id: a });
}

#[test]
fn disconnecting_one_of_two_parallel_links_keeps_the_other() {
    let g = graph();
    let source = g.add_operator(OpPiper::default()).unwrap();
    let add = g.add_operator(OpAdd).unwrap();
    let src_out = g.output(source, "Output").unwrap();
    let a = g.input(add, "A").unwrap();
    let b = g.input(add, "B").unwrap();
    g.connect(a, src_out).unwrap();
    g.connect(b, src_out).unwrap();

    g.disconnect(a).unwrap();
    let back = g.input(source, "Input").unwrap();
    let add_out = g.output(add, "Output").unwrap();
    assert_eq!(g.connect(back, add_out).unwrap_err(), CoreError::CycleDetected { id: source });

    g.disconnect(b).unwrap();
    g.connect(back, add_out).unwrap();
}

#[test]
fn connected_consumer_sees_upstream_data() {
    let g = graph();
    let a = g.add_operator(OpPiper::default()).unwrap();
    let b = g.add_operator(OpPiper::default()).unwrap();
    g.connect(g.input(b, "Input").unwrap(), g.output(a, "Output").unwrap()).unwrap();
    assert!(!g.is_ready(g.output(b, "Output").unwrap()).unwrap());

    g.set_value(g.input(a, "Input").unwrap(), ramp(&[6])).unwrap();
    let out = g.get_all(g.output(b, "Output").unwrap()).unwrap().wait().unwrap();
    assert_eq!(out, ramp(&[6]));
}

#[test]
fn connecting_replaces_a_held_value() {
    let g = graph();
    let a = g.add_operator(OpPiper::default()).unwrap();
    let b = g.add_operator(OpPiper::default()).unwrap();
    let b_in = g.input(b, "Input").unwrap();
    g.set_value(b_in, ramp(&[2])).unwrap();
    g.set_value(g.input(a, "Input").unwrap(), ramp(&[5])).unwrap();

    g.connect(b_in, g.output(a, "Output").unwrap()).unwrap();
    assert_eq!(g.own_value(b_in).unwrap(), None);
    assert_eq!(g.meta(g.output(b, "Output").unwrap()).unwrap().shape, Some(vec![5]));
}

#[test]
fn removing_upstream_makes_consumer_unready() {
    let g = graph();
    let a = g.add_operator(OpPiper::default()).unwrap();
    let b = g.add_operator(OpPiper::default()).unwrap();
    let b_out = g.output(b, "Output").unwrap();
    g.connect(g.input(b, "Input").unwrap(), g.output(a, "Output").unwrap()).unwrap();
    g.set_value(g.input(a, "Input").unwrap(), ramp(&[3])).unwrap();
    assert!(g.is_ready(b_out).unwrap());

    let log = record(&g, b_out);
    g.remove_operator(a).unwrap();
    assert!(!g.is_ready(b_out).unwrap());
    assert!(!g.is_configured(b).unwrap());
    assert!(log
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SlotEvent::Unready { .. })));
}

#[test]
fn equal_value_does_not_reconfigure() {
    let g = graph();
    let op = g.add_operator(OpPiper::default()).unwrap();
    let input = g.input(op, "Input").unwrap();
    g.set_value(input, ramp(&[4])).unwrap();
    let runs = g.configure_count(op).unwrap();

    g.set_value(input, ramp(&[4])).unwrap();
    assert_eq!(g.configure_count(op).unwrap(), runs);

    g.set_value(input, ramp(&[5])).unwrap();
    assert_eq!(g.configure_count(op).unwrap(), runs + 1);
}

#[test]
fn reconfigure_is_idempotent() {
    let g = graph();
    let op = g.add_operator(OpWrapped::default()).unwrap();
    g.set_value(g.input(op, "Input").unwrap(), ramp(&[7])).unwrap();
    let output = g.output(op, "Output").unwrap();
    let meta = g.meta(output).unwrap();
    assert_eq!(g.children(op).unwrap().len(), 1);

    for _ in 0..3 {
        g.reconfigure(op).unwrap();
        assert_eq!(g.children(op).unwrap().len(), 1);
        assert_eq!(g.meta(output).unwrap(), meta);
    }
    let out = g.get_all(output).unwrap().wait().unwrap();
    assert_eq!(out, ramp(&[7]));
}

#[test]
fn rejected_configure_tears_down_children() {
    let g = graph();
    let op = g.add_operator(OpWrapped { limit: Some(4) }).unwrap();
    let input = g.input(op, "Input").unwrap();
    let output = g.output(op, "Output").unwrap();

    g.set_value(input, ramp(&[3])).unwrap();
    assert_eq!(g.children(op).unwrap().len(), 1);
    assert!(g.is_ready(output).unwrap());

    let err = g.set_value(input, ramp(&[9])).unwrap_err();
    assert!(matches!(err, CoreError::ConstraintViolation { ref subsystem, .. } if subsystem == "Wrapped"));
    assert!(g.children(op).unwrap().is_empty());
    assert!(!g.is_ready(output).unwrap());
    assert!(!g.is_configured(op).unwrap());

    // A valid value brings the operator back.
    g.set_value(input, ramp(&[2])).unwrap();
    assert_eq!(g.children(op).unwrap().len(), 1);
    assert!(g.is_ready(output).unwrap());
}

#[test]
fn mismatched_inputs_raise_constraint_violation() {
    let g = graph();
    let op = g.add_operator(OpAdd).unwrap();
    let output = g.output(op, "Output").unwrap();
    g.set_value(g.input(op, "A").unwrap(), ramp(&[4])).unwrap();

    let err = g.set_value(g.input(op, "B").unwrap(), ramp(&[5])).unwrap_err();
    assert_eq!(err.to_string().split(':').next(), Some("Add"));
    assert!(!g.is_ready(output).unwrap());

    g.set_value(g.input(op, "B").unwrap(), ramp(&[4])).unwrap();
    let sum = g.get_all(output).unwrap().wait().unwrap();
    assert_eq!(sum.iter().copied().collect::<Vec<_>>(), vec![0.0, 2.0, 4.0, 6.0]);
}

#[test]
fn wrong_operator_type_is_reported() {
    let g = graph();
    let op = g.add_operator(OpAdd).unwrap();
    let err = g.with_operator::<OpPiper, _>(op, |_| ()).unwrap_err();
    assert!(matches!(err, CoreError::WrongOperatorType { .. }));
}

#[test]
fn panicking_configure_is_reported_and_the_operator_survives() {
    let g = graph();
    let fragile = OpFragile::default();
    fragile.trip.store(true, Ordering::SeqCst);
    let op = g.add_operator(fragile).unwrap();
    let input = g.input(op, "Input").unwrap();
    let output = g.output(op, "Output").unwrap();

    let err = g.set_value(input, ramp(&[4])).unwrap_err();
    assert!(matches!(err, CoreError::Compute { ref reason } if reason.contains("panicked")));
    assert!(!g.is_ready(output).unwrap());

    g.set_value(input, ramp(&[5])).unwrap();
    assert!(g.is_ready(output).unwrap());
    assert_eq!(g.get_all(output).unwrap().wait().unwrap(), ramp(&[5]));
}

#[test]
fn operator_lost_to_a_panic_is_reported_instead_of_skipped() {
    let g = graph();
    let op = g.add_operator(OpFragile::default()).unwrap();
    let input = g.input(op, "Input").unwrap();
    g.set_value(input, ramp(&[4])).unwrap();

    let unwound = panic::catch_unwind(AssertUnwindSafe(|| g.set_dirty(input, &Roi::full(&[4]))));
    assert!(unwound.is_err());

    // The graph stays usable, and the missing operator is an error.
    let err = g.set_value(input, ramp(&[6])).unwrap_err();
    assert!(matches!(err, CoreError::OperatorLost { ref name } if name == "OpFragile"));
    let err = g.with_operator::<OpFragile, _>(op, |_| ()).unwrap_err();
    assert!(matches!(err, CoreError::OperatorLost { .. }));
    assert_eq!(g.operator_name(op).unwrap(), "OpFragile");
}
