//! `OpMetadataInjector`: forwards data while overriding metadata fields.
//!
//! `Metadata` holds a JSON form of [`Meta`]; every field it sets replaces
//! the input's, extras are merged key by key.

use roiflow_core::{
    CoreError, CoreResult, ExecuteContext, LazyResult, Meta, OpContext, Operator, Roi, SlotRef,
    SlotSpec, Value, ValueKind,
};

#[derive(Debug, Default)]
pub struct OpMetadataInjector;

impl OpMetadataInjector {
    pub fn new() -> Self {
        OpMetadataInjector
    }

    /// The slot value carrying `overrides`.
    pub fn overrides_value(overrides: &Meta) -> CoreResult<Value> {
        serde_json::to_value(overrides)
            .map(Value::Json)
            .map_err(|e| CoreError::constraint("MetadataInjector", e.to_string()))
    }
}

impl Operator for OpMetadataInjector {
    fn name(&self) -> &str {
        "OpMetadataInjector"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("Input", ValueKind::Array),
            SlotSpec::input("Metadata", ValueKind::Json),
            SlotSpec::output("Output", ValueKind::Array),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let meta = ctx.meta(ctx.input("Input")?)?;
        let overrides = match ctx.value(ctx.input("Metadata")?)? {
            Value::Json(json) => serde_json::from_value::<Meta>(json)
                .map_err(|e| CoreError::constraint("MetadataInjector", format!("bad metadata: {e}")))?,
            other => {
                return Err(CoreError::constraint(
                    "MetadataInjector",
                    format!("metadata must be JSON, got {other:?}"),
                ))
            }
        };
        let output = ctx.output("Output")?;
        ctx.set_meta(output, meta.merged(&overrides))
    }

    fn execute(&self, ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        ctx.get(ctx.input("Input")?, roi)
    }

    fn propagate_dirty(&mut self, ctx: &mut OpContext<'_>, input: &SlotRef, roi: &Roi) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        if input.name == "Input" {
            ctx.set_dirty(output, roi)
        } else {
            ctx.set_dirty_full(output)
        }
    }
}
