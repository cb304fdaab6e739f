//! Readiness, reconfiguration and dirty propagation.
//!
//! Readiness flows forward: a level-0 input is ready when it holds a value,
//! has a default, or is connected to a ready upstream; an output is ready
//! when its owner is configured; a multislot is ready when every subslot
//! is. Each readiness flip fires exactly one `Ready`/`Unready` event.
//!
//! Any change to an input re-runs the owner's `configure()`. A failing
//! `configure()` tears down the operator's internal children, leaves its
//! outputs unready and returns the error to whoever triggered the change.
//! A panicking `configure()` is reported the same way.
//!
//! Dirty notifications travel depth-first, one delivery per connection.
//! Nothing is deduplicated, so a diamond delivers once along each edge.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::graph::GraphState;
use crate::id::{OperatorId, SlotId};
use crate::observer::SlotEvent;
use crate::operator::OpContext;
use crate::roi::Roi;

impl GraphState {
    fn compute_ready(&self, slot: SlotId) -> bool {
        let Some(data) = self.slots.get(&slot) else {
            return false;
        };
        let base = if let Some(up) = data.upstream {
            self.is_ready(up)
        } else if data.is_input() {
            data.level > 0 || data.value.is_some() || data.default.is_some()
        } else {
            self.node(data.owner).is_ok_and(|n| n.configured) && !data.held_unready
        };
        base && data.children.iter().all(|&c| self.is_ready(c))
    }

    /// Recomputes the cached readiness of `slot`, firing an event on change.
    /// Parents and downstream multislots are refreshed in turn.
    pub(crate) fn update_ready(&mut self, slot: SlotId) {
        let ready = self.compute_ready(slot);
        let Some(data) = self.slots.get_mut(&slot) else {
            return;
        };
        if data.ready == ready {
            return;
        }
        data.ready = ready;
        let parent = data.parent;
        let multi_downstream = if data.level > 0 {
            data.downstream.clone()
        } else {
            Vec::new()
        };
        let event = if ready {
            SlotEvent::Ready { slot }
        } else {
            SlotEvent::Unready { slot }
        };
        self.fire(slot, &event);
        if let Some(p) = parent {
            self.update_ready(p);
        }
        for d in multi_downstream {
            self.update_ready(d);
        }
    }

    /// Refreshes `slot` and everything it drives, reconfiguring consumers.
    fn propagate_change(&mut self, slot: SlotId) -> CoreResult<()> {
        let data = self.slot(slot)?;
        let children = data.children.clone();
        let downstream = data.downstream.clone();
        let level = data.level;

        for child in children {
            self.propagate_change(child)?;
        }
        self.update_ready(slot);
        if level == 0 {
            for d in downstream {
                self.slot_changed(d)?;
            }
        } else {
            // Subslot links carry the per-element changes; here only the
            // multislot's own readiness and its consumer need refreshing.
            for d in downstream {
                self.update_ready(d);
                let down = self.slot(d)?;
                if down.is_input() {
                    let owner = down.owner;
                    self.reconfigure(owner)?;
                }
            }
        }
        Ok(())
    }

    /// Entry point after the value, connection or metadata behind `slot`
    /// changed.
    pub(crate) fn slot_changed(&mut self, slot: SlotId) -> CoreResult<()> {
        self.propagate_change(slot)?;
        let data = self.slot(slot)?;
        if data.is_input() {
            let owner = data.owner;
            self.reconfigure(owner)?;
        }
        Ok(())
    }

    /// Runs `configure()` if every mandatory input is ready, otherwise
    /// marks the operator unconfigured.
    pub(crate) fn reconfigure(&mut self, id: OperatorId) -> CoreResult<()> {
        let node = self.node(id)?;
        let inputs: Vec<SlotId> = node.inputs.values().copied().collect();
        let outputs: Vec<SlotId> = node.outputs.values().copied().collect();
        let was_configured = node.configured;
        let name = node.name.clone();

        let mandatory_ready = inputs
            .iter()
            .all(|s| self.slots.get(s).is_some_and(|d| d.optional || d.ready));
        if !mandatory_ready {
            if was_configured {
                debug!(operator = %name, "inputs no longer ready");
                self.node_mut(id)?.configured = false;
                for output in outputs {
                    self.slot_changed(output)?;
                }
            }
            return Ok(());
        }

        let Some(mut op) = self.take_operator(id)? else {
            debug!(operator = %name, "configure already running, skipped");
            return Ok(());
        };
        let result = {
            let mut ctx = OpContext::new(self, id);
            panic::catch_unwind(AssertUnwindSafe(|| op.configure(&mut ctx)))
                .unwrap_or_else(|_| Err(CoreError::compute(format!("configure of '{name}' panicked"))))
        };
        self.return_operator(id, op);

        match result {
            Ok(()) => {
                let node = self.node_mut(id)?;
                node.configured = true;
                node.configure_count += 1;
                debug!(operator = %name, runs = node.configure_count, "configured");
                for output in outputs {
                    self.slot_changed(output)?;
                }
                Ok(())
            }
            Err(err) => {
                warn!(operator = %name, error = %err, "configure rejected");
                self.clear_children(id)?;
                self.node_mut(id)?.configured = false;
                for output in outputs {
                    if let Err(e) = self.slot_changed(output) {
                        debug!(operator = %name, error = %e, "unready cascade after failed configure");
                    }
                }
                Err(err)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dirty propagation
    // -----------------------------------------------------------------------

    /// Validates `roi` against the slot's shape, then delivers it.
    pub(crate) fn set_dirty(&mut self, slot: SlotId, roi: &Roi) -> CoreResult<()> {
        if self.slot(slot)?.level == 0 {
            if let Some(shape) = self.meta_of(slot)?.shape {
                roi.check_within(&shape)?;
            }
        }
        self.deliver_dirty(slot, roi);
        Ok(())
    }

    /// Invalidates the full extent of `slot` (every subslot of a multislot).
    pub(crate) fn dirty_full(&mut self, slot: SlotId) {
        let Some(data) = self.slots.get(&slot) else {
            return;
        };
        if data.level > 0 {
            for child in data.children.clone() {
                self.dirty_full(child);
            }
            return;
        }
        let roi = self
            .meta_of(slot)
            .map(|m| m.full_roi())
            .unwrap_or_else(|_| Roi::scalar());
        self.deliver_dirty(slot, &roi);
    }

    /// Fires observers, lets the owner map an input's dirty region onto its
    /// outputs, then forwards along every downstream connection.
    pub(crate) fn deliver_dirty(&mut self, slot: SlotId, roi: &Roi) {
        let Some(data) = self.slots.get(&slot) else {
            return;
        };
        if data.level > 0 {
            for child in data.children.clone() {
                self.dirty_full(child);
            }
            return;
        }
        let is_input = data.is_input();
        let owner = data.owner;
        let downstream = data.downstream.clone();

        self.fire(
            slot,
            &SlotEvent::Dirty {
                slot,
                roi: roi.clone(),
            },
        );

        if is_input && self.node(owner).is_ok_and(|n| n.configured) {
            match self.take_operator(owner) {
                Ok(Some(mut op)) => {
                    let result = self.slot_ref(slot).and_then(|slot_ref| {
                        let mut ctx = OpContext::new(self, owner);
                        op.propagate_dirty(&mut ctx, &slot_ref, roi)
                    });
                    self.return_operator(owner, op);
                    if let Err(e) = result {
                        self.record_failure(slot, "dirty", e.to_string());
                    }
                }
                Ok(None) => {}
                Err(e) => self.record_failure(slot, "dirty", e.to_string()),
            }
        }

        for d in downstream {
            self.deliver_dirty(d, roi);
        }
    }
}
