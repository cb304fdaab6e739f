//! `OpReorderAxes`: presents the input under another axis order.
//!
//! Axes are single-character labels. Output axes missing from the input are
//! inserted with extent 1; input axes missing from the output are dropped,
//! which is only allowed for singleton axes. Requests and dirty regions are
//! mapped through the same transform.

use std::collections::HashSet;

use ndarray::IxDyn;
use tracing::debug;

use roiflow_core::{
    Array, CoreError, CoreResult, ExecuteContext, LazyResult, OpContext, Operator, Roi, SlotRef,
    SlotSpec, ValueKind,
};

/// Conventional axis labels for data that declares none.
pub fn default_axes(ndim: usize) -> CoreResult<&'static str> {
    Ok(match ndim {
        1 => "x",
        2 => "yx",
        3 => "zyx",
        4 => "zyxc",
        5 => "tzyxc",
        _ => {
            return Err(CoreError::constraint(
                "ReorderAxes",
                format!("no default axis order for {ndim} dimensions"),
            ))
        }
    })
}

/// The mapping between one input axis order and one output axis order.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisPlan {
    input_axes: Vec<char>,
    output_axes: Vec<char>,
    output_shape: Vec<usize>,
}

impl AxisPlan {
    pub fn new(input_axes: &str, input_shape: &[usize], output_axes: &str) -> CoreResult<Self> {
        let input: Vec<char> = input_axes.chars().collect();
        let output: Vec<char> = output_axes.chars().collect();
        if input.len() != input_shape.len() {
            return Err(CoreError::constraint(
                "ReorderAxes",
                format!("axes '{input_axes}' do not match shape {input_shape:?}"),
            ));
        }
        for axes in [&input, &output] {
            let mut seen = HashSet::new();
            if let Some(dup) = axes.iter().find(|c| !seen.insert(**c)) {
                return Err(CoreError::constraint(
                    "ReorderAxes",
                    format!("axis '{dup}' appears twice"),
                ));
            }
        }
        for (axis, &extent) in input.iter().zip(input_shape) {
            if extent != 1 && !output.contains(axis) {
                return Err(CoreError::constraint(
                    "ReorderAxes",
                    format!("cannot drop axis '{axis}' of extent {extent}"),
                ));
            }
        }
        let output_shape = output
            .iter()
            .map(|axis| {
                input
                    .iter()
                    .position(|a| a == axis)
                    .map_or(1, |i| input_shape[i])
            })
            .collect();
        Ok(AxisPlan {
            input_axes: input,
            output_axes: output,
            output_shape,
        })
    }

    pub fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }

    pub fn output_axes(&self) -> String {
        self.output_axes.iter().collect()
    }

    /// Maps bounds from one axis order to another; axes absent from `from`
    /// become `[0, 1)`.
    fn map_roi(roi: &Roi, from: &[char], to: &[char]) -> CoreResult<Roi> {
        let mut start = Vec::with_capacity(to.len());
        let mut stop = Vec::with_capacity(to.len());
        for axis in to {
            match from.iter().position(|a| a == axis) {
                Some(i) => {
                    start.push(roi.start()[i]);
                    stop.push(roi.stop()[i]);
                }
                None => {
                    start.push(0);
                    stop.push(1);
                }
            }
        }
        Roi::new(&start, &stop)
    }

    /// The input region backing an output request.
    pub fn to_input_roi(&self, roi: &Roi) -> CoreResult<Roi> {
        Self::map_roi(roi, &self.output_axes, &self.input_axes)
    }

    /// The output region affected by an input region.
    pub fn to_output_roi(&self, roi: &Roi) -> CoreResult<Roi> {
        Self::map_roi(roi, &self.input_axes, &self.output_axes)
    }

    /// Rearranges input-ordered data into output order.
    pub fn to_output(&self, data: &Array) -> CoreResult<Array> {
        let shape_err = |e: ndarray::ShapeError| CoreError::compute(format!("axis reorder: {e}"));
        let kept: Vec<usize> = (0..self.input_axes.len())
            .filter(|&i| self.output_axes.contains(&self.input_axes[i]))
            .collect();
        let kept_shape: Vec<usize> = kept.iter().map(|&i| data.shape()[i]).collect();
        let squeezed = data
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&kept_shape))
            .map_err(shape_err)?;

        let perm: Vec<usize> = self
            .output_axes
            .iter()
            .filter_map(|axis| {
                kept.iter()
                    .position(|&i| self.input_axes[i] == *axis)
            })
            .collect();
        let permuted = squeezed.permuted_axes(IxDyn(&perm));

        let out_shape: Vec<usize> = self
            .output_axes
            .iter()
            .map(|axis| {
                self.input_axes
                    .iter()
                    .position(|a| a == axis)
                    .map_or(1, |i| data.shape()[i])
            })
            .collect();
        let out = permuted
            .as_standard_layout()
            .into_owned()
            .into_shape_with_order(IxDyn(&out_shape))
            .map_err(shape_err)?;
        Ok(out.into_shared())
    }
}

#[derive(Debug, Default)]
pub struct OpReorderAxes {
    plan: Option<AxisPlan>,
}

impl OpReorderAxes {
    pub fn new() -> Self {
        OpReorderAxes { plan: None }
    }

    pub fn plan(&self) -> Option<&AxisPlan> {
        self.plan.as_ref()
    }
}

impl Operator for OpReorderAxes {
    fn name(&self) -> &str {
        "OpReorderAxes"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Input", ValueKind::Array),
            SlotSpec::input("AxisOrder", ValueKind::Str),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let meta = ctx.meta(ctx.input("Input")?)?;
        let order = ctx.value(ctx.input("AxisOrder")?)?;
        let order = order
            .as_str()
            .ok_or_else(|| CoreError::constraint("ReorderAxes", "axis order must be a string"))?;
        let shape = meta
            .shape
            .clone()
            .ok_or_else(|| CoreError::constraint("ReorderAxes", "input declares no shape"))?;
        let input_axes = match &meta.axes {
            Some(axes) => axes.clone(),
            None => default_axes(shape.len())?.to_string(),
        };
        let plan = AxisPlan::new(&input_axes, &shape, order)?;
        debug!(from = %input_axes, to = %order, "axis plan");

        let mut out = meta;
        out.shape = Some(plan.output_shape().to_vec());
        out.axes = Some(plan.output_axes());
        self.plan = Some(plan);
        let output = ctx.output("Output")?;
        ctx.set_meta(output, out)
    }

    fn execute(&self, ctx: &ExecuteContext<'_>, output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        let plan = self.plan.clone().ok_or_else(|| CoreError::NotReady {
            slot: output.id,
            name: output.name.clone(),
        })?;
        let upstream = ctx.get(ctx.input("Input")?, &plan.to_input_roi(roi)?)?;
        Ok(upstream.map(move |data| plan.to_output(&data)))
    }

    fn propagate_dirty(&mut self, ctx: &mut OpContext<'_>, input: &SlotRef, roi: &Roi) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        match (&self.plan, input.name.as_str()) {
            (Some(plan), "Input") => {
                let mapped = plan.to_output_roi(roi)?;
                ctx.set_dirty(output, &mapped)
            }
            _ => ctx.set_dirty_full(output),
        }
    }
}
