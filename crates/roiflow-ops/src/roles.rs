//! `OpDataSelectionGroup`: one [`OpDataSelection`] per dataset role.
//!
//! `DatasetRoles` names the roles (e.g. raw data, prediction mask);
//! `DatasetGroup[i]` holds the [`DatasetInfo`](crate::DatasetInfo) for role
//! `i`. The inner selections live in a [`LaneGroup`] sharing the working
//! directory. `ImageGroup` exposes every role's image; `Image`, `Image1`
//! and `Image2` expose the first three roles directly and stay unready
//! when the role has no dataset slot.

use std::sync::Arc;

use tracing::debug;

use roiflow_core::operator::unsupported_output;
use roiflow_core::{
    CoreError, CoreResult, ExecuteContext, LaneGroup, LazyResult, OpContext, Operator, OperatorId,
    Roi, SlotId, SlotRef, SlotSpec, Value, ValueKind,
};

use crate::reader::ReaderRegistry;
use crate::selection::OpDataSelection;

/// Outputs forwarding a single role's image, by role index.
const ROLE_IMAGES: [&str; 3] = ["Image", "Image1", "Image2"];

pub struct OpDataSelectionGroup {
    readers: Arc<ReaderRegistry>,
    force_axis_order: Vec<String>,
    roles: Vec<String>,
    inner: Option<OperatorId>,
}

impl Default for OpDataSelectionGroup {
    fn default() -> Self {
        Self::new(Arc::new(ReaderRegistry::new()))
    }
}

impl OpDataSelectionGroup {
    pub fn new(readers: Arc<ReaderRegistry>) -> Self {
        OpDataSelectionGroup {
            readers,
            force_axis_order: vec!["tczyx".to_string()],
            roles: Vec::new(),
            inner: None,
        }
    }

    pub fn with_force_axis_order<S: AsRef<str>>(mut self, orders: &[S]) -> Self {
        self.force_axis_order = orders.iter().map(|o| o.as_ref().to_string()).collect();
        self
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// The lane group holding one selection per role.
    pub fn selections(&self) -> Option<OperatorId> {
        self.inner
    }

    fn build_inner(&self, ctx: &mut OpContext<'_>) -> CoreResult<OperatorId> {
        let readers = Arc::clone(&self.readers);
        let orders = self.force_axis_order.clone();
        let inner = ctx.add_child(LaneGroup::new(
            "DataSelectionRoles",
            move || {
                Box::new(OpDataSelection::new(Arc::clone(&readers)).with_force_axis_order(orders.as_slice()))
            },
            &["WorkingDirectory"],
        ))?;
        let outer_wd = ctx.input("WorkingDirectory")?;
        let inner_wd = ctx.child_input(inner, "WorkingDirectory")?;
        ctx.connect(inner_wd, outer_wd)?;
        let outer_datasets = ctx.input("DatasetGroup")?;
        let inner_datasets = ctx.child_input(inner, "Dataset")?;
        ctx.connect(inner_datasets, outer_datasets)?;
        let images = ctx.output("ImageGroup")?;
        let inner_images = ctx.child_output(inner, "Image")?;
        ctx.connect(images, inner_images)?;
        Ok(inner)
    }

    /// Points `output` at `source`, or holds it unready if there is none.
    fn forward(ctx: &mut OpContext<'_>, output: SlotId, source: Option<SlotId>) -> CoreResult<()> {
        match source {
            Some(source) => {
                if ctx.upstream(output)? != Some(source) {
                    ctx.connect(output, source)?;
                }
                ctx.hold_unready(output, false)
            }
            None => {
                ctx.disconnect(output)?;
                ctx.hold_unready(output, true)
            }
        }
    }
}

impl Operator for OpDataSelectionGroup {
    fn name(&self) -> &str {
        "OpDataSelectionGroup"
    }

    fn category(&self) -> &str {
        "selection"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![
            SlotSpec::input("WorkingDirectory", ValueKind::Str)
                .default_value(Value::Str(String::new())),
            SlotSpec::input("DatasetRoles", ValueKind::StrList),
            SlotSpec::input("DatasetGroup", ValueKind::Object).level(1).optional(),
            SlotSpec::output("ImageGroup", ValueKind::Array).level(1),
            SlotSpec::output("Image", ValueKind::Array),
            SlotSpec::output("Image1", ValueKind::Array),
            SlotSpec::output("Image2", ValueKind::Array),
            SlotSpec::output("AllowLabels", ValueKind::Bool),
            SlotSpec::output("ImageName", ValueKind::Str),
        ]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let roles = ctx.value(ctx.input("DatasetRoles")?)?;
        let roles = roles
            .as_str_list()
            .ok_or_else(|| CoreError::constraint("DataSelection", "roles must be a list of names"))?
            .to_vec();

        // An unconnected dataset group follows the roles; a connected one is
        // sized by whoever drives it.
        let datasets = ctx.input("DatasetGroup")?;
        if ctx.upstream(datasets)?.is_none() && ctx.len(datasets)? != roles.len() {
            ctx.resize(datasets, roles.len())?;
        }

        let alive = match self.inner {
            Some(inner) => ctx.children()?.contains(&inner),
            None => false,
        };
        let inner = if alive && self.roles == roles {
            self.inner.ok_or_else(|| CoreError::constraint("DataSelection", "role group lost its lanes"))?
        } else {
            ctx.clear_children()?;
            self.inner = None;
            let inner = self.build_inner(ctx)?;
            debug!(roles = ?roles, "role group rebuilt");
            self.inner = Some(inner);
            self.roles = roles;
            inner
        };

        let role_names = ctx.child_input(inner, "RoleName")?;
        let lanes = ctx.len(role_names)?;
        for (i, role) in self.roles.iter().take(lanes).enumerate() {
            let slot = ctx.subslot(role_names, i)?;
            ctx.set_value(slot, Value::Str(role.clone()))?;
        }

        let inner_images = ctx.child_output(inner, "Image")?;
        for (i, name) in ROLE_IMAGES.iter().enumerate() {
            let output = ctx.output(name)?;
            let source = if i < lanes { Some(ctx.subslot(inner_images, i)?) } else { None };
            Self::forward(ctx, output, source)?;
        }
        for name in ["AllowLabels", "ImageName"] {
            let output = ctx.output(name)?;
            let inner_output = ctx.child_output(inner, name)?;
            let source = if lanes > 0 { Some(ctx.subslot(inner_output, 0)?) } else { None };
            Self::forward(ctx, output, source)?;
        }
        Ok(())
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, output: &SlotRef, _roi: &Roi) -> CoreResult<LazyResult> {
        // Every output is forwarded from the inner selections.
        Err(unsupported_output(self.name(), output))
    }

    fn propagate_dirty(&mut self, _ctx: &mut OpContext<'_>, _input: &SlotRef, _roi: &Roi) -> CoreResult<()> {
        Ok(())
    }
}
