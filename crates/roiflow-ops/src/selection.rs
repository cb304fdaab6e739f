//! `OpDataSelection`: one dataset, presented in a workflow's axis order.
//!
//! Inputs:
//! - `RoleName`: the role this dataset plays (names the channels)
//! - `WorkingDirectory`: base for relative file paths
//! - `Dataset`: a [`DatasetInfo`] object
//!
//! Outputs `Image` (the reordered data), `AllowLabels` and `ImageName`.
//! Every configure rebuilds the provider chain from scratch.

use std::sync::Arc;

use tracing::debug;

use roiflow_core::operator::unsupported_output;
use roiflow_core::{
    CoreError, CoreResult, ExecuteContext, LazyResult, Meta, OpContext, Operator, Roi, SlotRef,
    SlotSpec, Value, ValueKind,
};

use crate::reader::ReaderRegistry;
use crate::reorder::OpReorderAxes;
use crate::source::{check_axes, DatasetInfo};

const SUBSYSTEM: &str = "DataSelection";

pub struct OpDataSelection {
    readers: Arc<ReaderRegistry>,
    force_axis_order: Vec<String>,
}

impl Default for OpDataSelection {
    fn default() -> Self {
        Self::new(Arc::new(ReaderRegistry::new()))
    }
}

impl OpDataSelection {
    /// A selection presenting data as `tczyx`.
    pub fn new(readers: Arc<ReaderRegistry>) -> Self {
        OpDataSelection {
            readers,
            force_axis_order: vec!["tczyx".to_string()],
        }
    }

    /// Axis orders the output may take; the shortest one holding every
    /// non-singleton axis of the data wins. An empty list keeps the data's
    /// own order.
    pub fn with_force_axis_order<S: AsRef<str>>(mut self, orders: &[S]) -> Self {
        self.force_axis_order = orders.iter().map(|o| o.as_ref().to_string()).collect();
        self
    }
}

/// Picks the output axis order for data labelled `axes` with `shape`.
pub fn output_axis_order(axes: &str, shape: &[usize], allowed: &[String]) -> CoreResult<String> {
    if !axes.contains('x') || !axes.contains('y') {
        return Err(CoreError::constraint(
            SUBSYSTEM,
            format!("data must always have at least the axes x and y, got '{axes}'"),
        ));
    }
    let mut order = if allowed.is_empty() {
        axes.to_string()
    } else {
        let minimal: Vec<char> = axes
            .chars()
            .zip(shape)
            .filter(|&(_, &extent)| extent != 1)
            .map(|(axis, _)| axis)
            .collect();
        allowed
            .iter()
            .filter(|order| minimal.iter().all(|axis| order.contains(*axis)))
            .min_by_key(|order| order.len())
            .cloned()
            .ok_or_else(|| {
                CoreError::constraint(
                    SUBSYSTEM,
                    format!(
                        "the axes of your dataset ({axes}) are not compatible with any of the allowed axis configurations ({})",
                        allowed.join(", ")
                    ),
                )
            })?
    };
    if !order.contains('c') {
        order.push('c');
    }
    Ok(order)
}

fn channel_names(role: &str, channels: usize) -> Vec<String> {
    if channels <= 1 {
        vec![role.to_string()]
    } else {
        (0..channels).map(|i| format!("{role}-{i}")).collect()
    }
}

impl Operator for OpDataSelection {
    fn name(&self) -> &str {
        "OpDataSelection"
    }

    fn category(&self) -> &str {
        "selection"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("RoleName", ValueKind::Str).default_value(Value::Str(String::new())),
            SlotSpec::input("WorkingDirectory", ValueKind::Str)
                .default_value(Value::Str(String::new())),
            SlotSpec::input("Dataset", ValueKind::Object),
            SlotSpec::output("Image", ValueKind::Array),
            SlotSpec::output("AllowLabels", ValueKind::Bool),
            SlotSpec::output("ImageName", ValueKind::Str),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        ctx.clear_children()?;

        let dataset = ctx.value(ctx.input("Dataset")?)?;
        let info = dataset.downcast_ref::<DatasetInfo>().ok_or_else(|| {
            CoreError::constraint(SUBSYSTEM, "Dataset must hold a DatasetInfo")
        })?;
        let role = ctx.value(ctx.input("RoleName")?)?;
        let role = role.as_str().unwrap_or_default();
        let working_dir = ctx.value(ctx.input("WorkingDirectory")?)?;
        let working_dir = working_dir.as_str().unwrap_or_default();

        let channels = match (&info.axes, &info.shape) {
            (Some(axes), Some(shape)) => {
                check_axes(axes, shape)?;
                axes.chars()
                    .position(|a| a == 'c')
                    .and_then(|i| shape.get(i).copied())
                    .unwrap_or(1)
            }
            _ => 1,
        };
        let mut overrides = Meta::default();
        overrides.extras.insert(
            "channel_names".into(),
            serde_json::json!(channel_names(role, channels)),
        );

        let provider = info.get_provider(ctx, &overrides, &self.readers, working_dir)?;
        let meta = ctx.meta(provider)?;
        let (Some(axes), Some(shape)) = (meta.axes.as_deref(), meta.shape.as_deref()) else {
            return Err(CoreError::constraint(SUBSYSTEM, "provider declares no axes or shape"));
        };
        let order = output_axis_order(axes, shape, &self.force_axis_order)?;
        debug!(dataset = %info.nickname, from = %axes, to = %order, "data selected");

        let reorder = ctx.add_child(OpReorderAxes::new())?;
        let reorder_in = ctx.child_input(reorder, "Input")?;
        ctx.connect(reorder_in, provider)?;
        let axis_order = ctx.child_input(reorder, "AxisOrder")?;
        ctx.set_value(axis_order, Value::Str(order))?;

        let image = ctx.output("Image")?;
        let reordered = ctx.child_output(reorder, "Output")?;
        ctx.connect(image, reordered)?;
        let allow_labels = ctx.output("AllowLabels")?;
        ctx.publish(allow_labels, Value::Bool(info.allow_labels))?;
        let image_name = ctx.output("ImageName")?;
        ctx.publish(image_name, Value::Str(info.nickname.clone()))
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, output: &SlotRef, _roi: &Roi) -> CoreResult<LazyResult> {
        Err(unsupported_output(self.name(), output))
    }

    fn propagate_dirty(&mut self, _ctx: &mut OpContext<'_>, _input: &SlotRef, _roi: &Roi) -> CoreResult<()> {
        // Inputs only ever trigger a rebuild.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn shortest_compatible_order_wins() {
        let allowed = orders(&["tzyxc", "yxc"]);
        assert_eq!(output_axis_order("yx", &[4, 5], &allowed).unwrap(), "yxc");
        assert_eq!(output_axis_order("zyx", &[3, 4, 5], &allowed).unwrap(), "tzyxc");
        // Singleton axes do not need a home in the output.
        assert_eq!(output_axis_order("zyx", &[1, 4, 5], &allowed).unwrap(), "yxc");
    }

    #[test]
    fn channel_axis_is_appended() {
        assert_eq!(output_axis_order("zyx", &[2, 3, 4], &[]).unwrap(), "zyxc");
        let err = output_axis_order("cyx", &[2, 3, 4], &orders(&["yx"])).unwrap_err();
        assert!(err.to_string().contains("not compatible"));
    }

    #[test]
    fn x_and_y_are_required() {
        let err = output_axis_order("zx", &[3, 4], &[]).unwrap_err();
        assert!(err.to_string().contains("at least the axes x and y"));
    }

    #[test]
    fn channel_names_follow_the_role() {
        assert_eq!(channel_names("Raw", 1), vec!["Raw"]);
        assert_eq!(channel_names("Raw", 2), vec!["Raw-0", "Raw-1"]);
    }
}
