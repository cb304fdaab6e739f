//! `OpArrayPiper`: forwards its input unchanged.

use roiflow_core::{
    CoreResult, ExecuteContext, LazyResult, OpContext, Operator, Roi, SlotRef, SlotSpec,
    ValueKind,
};

#[derive(Debug, Default)]
pub struct OpArrayPiper;

impl OpArrayPiper {
    pub fn new() -> Self {
        OpArrayPiper
    }
}

impl Operator for OpArrayPiper {
    fn name(&self) -> &str {
        "OpArrayPiper"
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
        ctx.get(ctx.input("Input")?, roi)
    }

    fn propagate_dirty(&mut self, ctx: &mut OpContext<'_>, _input: &SlotRef, roi: &Roi) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        ctx.set_dirty(output, roi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use roiflow_core::{Graph, GraphConfig, Value};

    #[test]
    fn forwards_requests_and_shape() {
        let graph = Graph::new(GraphConfig::named("piper").with_worker_threads(1)).unwrap();
        let op = graph.add_operator(OpArrayPiper::new()).unwrap();
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap()
            .into_shared();
        graph
            .set_value(graph.input(op, "Input").unwrap(), Value::Array(data))
            .unwrap();
        let out = graph.output(op, "Output").unwrap();
        assert_eq!(graph.meta(out).unwrap().shape, Some(vec![2, 3]));
        let row = graph.get(out, &Roi::new(&[1, 0], &[2, 3]).unwrap()).unwrap().wait().unwrap();
        assert_eq!(row.iter().copied().collect::<Vec<_>>(), vec![3.0, 4.0, 5.0]);
    }
}
