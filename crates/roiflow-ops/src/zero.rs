//! `OpZeroSource`: a zero-filled placeholder for data that is not
//! available.

use ndarray::{ArrayD, IxDyn};

use roiflow_core::{
    CoreResult, DType, ExecuteContext, LazyResult, Meta, OpContext, Operator, Roi, SlotRef,
    SlotSpec, ValueKind,
};

#[derive(Debug, Clone)]
pub struct OpZeroSource {
    shape: Vec<usize>,
    dtype: DType,
    axes: Option<String>,
}

impl OpZeroSource {
    pub fn new(shape: &[usize], dtype: DType) -> Self {
        OpZeroSource {
            shape: shape.to_vec(),
            dtype,
            axes: None,
        }
    }

    pub fn with_axes(mut self, axes: &str) -> Self {
        self.axes = Some(axes.to_string());
        self
    }
}

impl Operator for OpZeroSource {
    fn name(&self) -> &str {
        "OpZeroSource"
    }

    fn category(&self) -> &str {
        "source"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![SlotSpec::output("Output", ValueKind::Array)]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let mut meta = Meta::array(&self.shape, self.dtype);
        meta.axes.clone_from(&self.axes);
        let output = ctx.output("Output")?;
        ctx.set_meta(output, meta)
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        Ok(LazyResult::ready(ArrayD::zeros(IxDyn(&roi.shape())).into_shared()))
    }
}
