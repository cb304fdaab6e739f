//! Two-phase structural changes on multislots.
//!
//! Every insert or remove runs as one batch over a set of root multislots
//! plus every multislot that mirrors them downstream:
//!
//! 1. validate every slot in the batch (nothing fires on failure),
//! 2. fire `Prepare` on every slot,
//! 3. apply the change (with an optional middle action, e.g. building or
//!    tearing down a lane's operator),
//! 4. fire `Commit` on every slot,
//! 5. let affected owners react (`on_input_resized`), then refresh
//!    readiness and reconfigure.
//!
//! All prepares of a batch precede its commits. A nested batch started by
//! an owner's reaction in step 5 runs to completion before the outer batch
//! returns, so commits of different changes never interleave.

use std::collections::HashSet;

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::graph::GraphState;
use crate::id::{OperatorId, SlotId};
use crate::observer::{ChangeKind, SlotEvent, StructuralChange};
use crate::operator::OpContext;

/// Extra slots a middle action wants refreshed once the batch commits.
pub(crate) type Refresh = Vec<SlotId>;

impl GraphState {
    /// Multislots that must change together with `roots`: the roots
    /// themselves followed by every downstream multislot of equal level.
    fn batch_members(&self, roots: &[SlotId]) -> CoreResult<Vec<SlotId>> {
        let mut members = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: std::collections::VecDeque<SlotId> = roots.iter().copied().collect();
        while let Some(slot) = queue.pop_front() {
            if !seen.insert(slot) {
                continue;
            }
            let data = self.slot(slot)?;
            if data.level == 0 {
                return Err(CoreError::NotMultiSlot {
                    slot,
                    name: data.name.clone(),
                });
            }
            members.push(slot);
            for &d in &data.downstream {
                if self.slot(d)?.level == data.level {
                    queue.push_back(d);
                }
            }
        }
        Ok(members)
    }

    fn validate_change(&self, slot: SlotId, kind: ChangeKind, index: usize) -> CoreResult<()> {
        let data = self.slot(slot)?;
        let len = data.children.len();
        let ok = match kind {
            ChangeKind::Insert => index <= len && (!data.append_only || index == len),
            ChangeKind::Remove => index < len && (!data.append_only || index + 1 == len),
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::InvalidLaneIndex { index, len })
        }
    }

    /// Runs one insert/remove batch. `initiator` is the operator making the
    /// change; its own `on_input_resized` is skipped. `middle` runs between
    /// prepare and commit (after applying an insert, before applying a
    /// removal) and returns slots to refresh afterwards.
    pub(crate) fn structural_batch(
        &mut self,
        roots: &[SlotId],
        kind: ChangeKind,
        index: usize,
        initiator: Option<OperatorId>,
        middle: impl FnOnce(&mut GraphState) -> CoreResult<Refresh>,
    ) -> CoreResult<()> {
        let members = self.batch_members(roots)?;
        for &slot in &members {
            self.validate_change(slot, kind, index)?;
        }
        let changes: Vec<StructuralChange> = members
            .iter()
            .map(|&slot| {
                let len = self.slots.get(&slot).map_or(0, |d| d.children.len());
                StructuralChange {
                    slot,
                    kind,
                    index,
                    final_len: match kind {
                        ChangeKind::Insert => len + 1,
                        ChangeKind::Remove => len - 1,
                    },
                }
            })
            .collect();
        debug!(?kind, index, slots = members.len(), "structural change");

        for change in &changes {
            self.fire(change.slot, &SlotEvent::Prepare(change.clone()));
        }

        let mut first_err: Option<CoreError> = None;
        let mut refresh = Vec::new();
        let mut orphans = Vec::new();
        let mut middle = Some(middle);

        if kind == ChangeKind::Remove {
            if let Some(action) = middle.take() {
                match action(self) {
                    Ok(extra) => refresh.extend(extra),
                    Err(e) => {
                        first_err.get_or_insert(e);
                    }
                }
            }
        }

        let mut inserted = Vec::new();
        for &slot in &members {
            match kind {
                ChangeKind::Insert => inserted.push((slot, self.apply_insert(slot, index)?)),
                ChangeKind::Remove => self.apply_remove(slot, index, &mut orphans)?,
            }
        }
        for &(slot, child) in &inserted {
            let partner = match self.slot(slot)?.upstream {
                Some(up) => self.slot(up)?.children.get(index).copied(),
                None => None,
            };
            if let Some(partner) = partner {
                self.link(child, partner)?;
            }
        }

        if let Some(action) = middle.take() {
            match action(self) {
                Ok(extra) => refresh.extend(extra),
                Err(e) => {
                    first_err.get_or_insert(e);
                }
            }
        }

        for change in &changes {
            self.fire(change.slot, &SlotEvent::Commit(change.clone()));
        }

        // Owners react first so that lanes they add or drop exist before
        // readiness is recomputed.
        for change in &changes {
            let Ok(data) = self.slot(change.slot) else {
                continue;
            };
            if !data.is_input() || Some(data.owner) == initiator {
                continue;
            }
            let owner = data.owner;
            if let Err(e) = self.notify_resized(owner, change) {
                first_err.get_or_insert(e);
            }
        }

        for &(_, child) in &inserted {
            let nested = self
                .slots
                .get(&child)
                .and_then(|d| d.upstream.filter(|_| d.level > 0));
            if let Some(up) = nested {
                if let Err(e) = self.mirror(child, up) {
                    first_err.get_or_insert(e);
                }
            }
        }
        if let Err(e) = self.refresh_orphans(orphans) {
            first_err.get_or_insert(e);
        }
        let touched = refresh
            .into_iter()
            .chain(inserted.iter().map(|&(_, child)| child));
        for slot in touched.collect::<Vec<_>>() {
            if !self.slots.contains_key(&slot) {
                continue;
            }
            if let Err(e) = self.slot_changed(slot) {
                first_err.get_or_insert(e);
            }
        }

        let mut owners = Vec::new();
        for &slot in &members {
            self.update_ready(slot);
            if let Ok(data) = self.slot(slot) {
                if data.is_input() && !owners.contains(&data.owner) {
                    owners.push(data.owner);
                }
            }
        }
        for owner in owners {
            if self.node(owner).is_err() {
                continue;
            }
            if let Err(e) = self.reconfigure(owner) {
                first_err.get_or_insert(e);
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    fn apply_insert(&mut self, slot: SlotId, index: usize) -> CoreResult<SlotId> {
        let child_data = self.slot(slot)?.child_of(slot, index);
        let child = self.alloc_slot(child_data);
        let data = self.slot_mut(slot)?;
        data.children.insert(index, child);
        let shifted: Vec<SlotId> = data.children[index + 1..].to_vec();
        for (offset, s) in shifted.into_iter().enumerate() {
            self.slot_mut(s)?.index = index + 1 + offset;
        }
        Ok(child)
    }

    fn apply_remove(&mut self, slot: SlotId, index: usize, orphans: &mut Vec<SlotId>) -> CoreResult<()> {
        let data = self.slot_mut(slot)?;
        let child = data.children.remove(index);
        let shifted: Vec<SlotId> = data.children[index..].to_vec();
        for (offset, s) in shifted.into_iter().enumerate() {
            self.slot_mut(s)?.index = index + offset;
        }
        self.delete_slot_tree(child, orphans);
        Ok(())
    }

    fn notify_resized(&mut self, owner: OperatorId, change: &StructuralChange) -> CoreResult<()> {
        let slot_ref = self.slot_ref(change.slot)?;
        let Some(mut op) = self.take_operator(owner)? else {
            return Ok(());
        };
        let result = {
            let mut ctx = OpContext::new(self, owner);
            op.on_input_resized(&mut ctx, &slot_ref, change)
        };
        self.return_operator(owner, op);
        result
    }

    /// Grows or shrinks a multislot at its end, one batch per element.
    pub(crate) fn resize(
        &mut self,
        slot: SlotId,
        len: usize,
        initiator: Option<OperatorId>,
    ) -> CoreResult<()> {
        loop {
            let current = self.slot(slot)?.children.len();
            if current == len {
                return Ok(());
            }
            let (kind, index) = if current < len {
                (ChangeKind::Insert, current)
            } else {
                (ChangeKind::Remove, current - 1)
            };
            self.structural_batch(&[slot], kind, index, initiator, |_| Ok(Vec::new()))?;
        }
    }
}
