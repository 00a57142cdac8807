use super::{remove_slot, SubmixNode, VoiceGraph};
use crate::{
    FilterParameters, Handle, HandleKind, RenderBackend, Result, SampleDecoder, SlotId,
    VoiceGraphError, VoiceId,
};

impl<B: RenderBackend, D: SampleDecoder> VoiceGraph<B, D> {
    /// Creates a submix feeding `outputs` (the root when empty).
    ///
    /// The new submix is placed one stage below the lowest target. Nothing is
    /// allocated when a target is invalid, the lowest target already sits at
    /// stage 0, or the submix table is full.
    pub fn create_submix(&mut self, outputs: &[Handle]) -> Result<Handle> {
        let mut targets: Vec<SlotId> = Vec::with_capacity(outputs.len().max(1));
        for &output in outputs {
            let slot = self.submix_slot(output)?;
            if !targets.contains(&slot) {
                targets.push(slot);
            }
        }
        if targets.iter().any(|&slot| slot != self.root) {
            targets.retain(|&slot| slot != self.root);
        }
        if targets.is_empty() {
            targets.push(self.live_root()?);
        }

        let floor = targets
            .iter()
            .filter_map(|&slot| self.submixes.get(slot))
            .map(|node| node.stage)
            .min()
            .unwrap_or(self.config.root_stage);
        if floor == 0 {
            return Err(VoiceGraphError::StageExhausted(floor));
        }
        let stage = floor - 1;

        if self.submixes.is_full() {
            return Err(VoiceGraphError::CapacityExhausted {
                kind: HandleKind::Submix,
                capacity: self.submixes.capacity(),
            });
        }

        let voice = self
            .backend
            .create_submix_voice(self.output.channels, self.output.sample_rate, stage)
            .inspect_err(|err| tracing::warn!(%err, stage, "failed to create submix voice"))?;
        let slot = match self.submixes.insert(SubmixNode::new(voice, stage)) {
            Ok(slot) => slot,
            Err(node) => {
                self.backend.destroy_voice(node.voice);
                return Err(VoiceGraphError::CapacityExhausted {
                    kind: HandleKind::Submix,
                    capacity: self.submixes.capacity(),
                });
            }
        };

        for target in targets {
            self.link_submix(slot, target);
        }
        self.push_submix_sends(slot);

        let handle = Handle::submix(slot);
        tracing::debug!(%handle, stage, outputs = ?self.outputs(handle), "created submix");
        Ok(handle)
    }

    /// Routes a source into `target`. A non-root target replaces the default
    /// route to the root; other existing sends are kept.
    pub fn connect_source(&mut self, source: Handle, target: Handle) -> Result<()> {
        let src = self.source_slot(source)?;
        let tgt = self.submix_slot(target)?;
        if self.sources.get(src).is_some_and(|node| node.outputs.contains(&tgt)) {
            return Err(VoiceGraphError::DuplicateRoute {
                from: source,
                to: target,
            });
        }

        if tgt != self.root {
            self.unlink_source(src, self.root);
        }
        self.link_source(src, tgt);
        self.push_source_sends(src);
        tracing::debug!(%source, %target, "routed source");
        Ok(())
    }

    /// Routes a submix into `target`, which must be processed at a later
    /// stage. A non-root target replaces the default route to the root.
    pub fn connect_submix(&mut self, submix: Handle, target: Handle) -> Result<()> {
        let (from, node) = self.submix_entry(submix)?;
        let (from_stage, outputs) = (node.stage, node.outputs.clone());
        let (to, target_node) = self.submix_entry(target)?;
        let to_stage = target_node.stage;

        if from == self.root {
            return Err(VoiceGraphError::RootSubmix("routed"));
        }
        if from == to {
            return Err(VoiceGraphError::SelfRoute(submix));
        }
        if outputs.contains(&to) {
            return Err(VoiceGraphError::DuplicateRoute {
                from: submix,
                to: target,
            });
        }
        if from_stage >= to_stage {
            return Err(VoiceGraphError::StageOrder {
                from: submix,
                from_stage,
                to: target,
                to_stage,
            });
        }

        if to != self.root {
            self.unlink_submix(from, self.root);
        }
        self.link_submix(from, to);
        self.push_submix_sends(from);
        tracing::debug!(%submix, %target, "routed submix");
        Ok(())
    }

    /// Removes the route from a source into `target`. A source left without
    /// any route falls back to the root.
    pub fn disconnect_source(&mut self, source: Handle, target: Handle) -> Result<()> {
        let src = self.source_slot(source)?;
        let tgt = self.submix_slot(target)?;
        if !self.unlink_source(src, tgt) {
            return Err(VoiceGraphError::RouteNotFound {
                from: source,
                to: target,
            });
        }
        if self.sources.get(src).is_some_and(|node| node.outputs.is_empty()) {
            self.link_source(src, self.root);
        }
        self.push_source_sends(src);
        tracing::debug!(%source, %target, "unrouted source");
        Ok(())
    }

    /// Removes the route from a submix into `target`. A submix left without
    /// any route falls back to the root.
    pub fn disconnect_submix(&mut self, submix: Handle, target: Handle) -> Result<()> {
        let from = self.submix_slot(submix)?;
        let to = self.submix_slot(target)?;
        if from == to {
            return Err(VoiceGraphError::SelfRoute(submix));
        }
        if !self.unlink_submix(from, to) {
            return Err(VoiceGraphError::RouteNotFound {
                from: submix,
                to: target,
            });
        }
        self.reroute_orphaned_submix(from);
        self.push_submix_sends(from);
        tracing::debug!(%submix, %target, "unrouted submix");
        Ok(())
    }

    /// Deletes a source or a non-root submix together with every edge that
    /// touches it. Returns `false`, changing nothing, for the root and for
    /// handles that do not address a live node.
    pub fn delete_node(&mut self, handle: Handle) -> bool {
        match handle.kind() {
            Some(HandleKind::Source) => self.delete_source(handle),
            Some(HandleKind::Submix) => self.delete_submix(handle),
            None => false,
        }
    }

    fn delete_source(&mut self, handle: Handle) -> bool {
        let Ok(slot) = self.source_slot(handle) else {
            return false;
        };
        let Some(node) = self.sources.remove(slot) else {
            return false;
        };
        for &target in &node.outputs {
            if let Some(submix) = self.submixes.get_mut(target) {
                remove_slot(&mut submix.sources, slot);
            }
        }
        self.backend.stop(node.voice);
        self.backend.destroy_voice(node.voice);
        tracing::debug!(%handle, key = %node.key, "deleted source");
        true
    }

    fn delete_submix(&mut self, handle: Handle) -> bool {
        let Ok(slot) = self.submix_slot(handle) else {
            return false;
        };
        if slot == self.root {
            tracing::debug!("refusing to delete the root submix");
            return false;
        }
        let Some(mut node) = self.submixes.remove(slot) else {
            return false;
        };

        for &target in &node.outputs {
            if let Some(down) = self.submixes.get_mut(target) {
                remove_slot(&mut down.inputs, slot);
            }
        }
        for &input in &node.inputs {
            if let Some(up) = self.submixes.get_mut(input) {
                remove_slot(&mut up.outputs, slot);
            }
            self.reroute_orphaned_submix(input);
            self.push_submix_sends(input);
        }
        for &source in &node.sources {
            let orphaned = match self.sources.get_mut(source) {
                Some(src) => {
                    remove_slot(&mut src.outputs, slot);
                    src.outputs.is_empty()
                }
                None => false,
            };
            if orphaned {
                self.link_source(source, self.root);
            }
            self.push_source_sends(source);
        }

        self.backend.destroy_voice(node.voice);
        for instance in node.effects.take_instances() {
            self.backend.release_effect(instance);
        }
        tracing::debug!(%handle, stage = node.stage, "deleted submix");
        true
    }

    /// Sets the output volume of a source or submix, clamped to the
    /// configured range.
    pub fn set_volume(&mut self, handle: Handle, volume: f32) -> Result<()> {
        let limit = self.config.max_volume;
        let volume = volume.clamp(-limit, limit);
        let voice = match handle.kind() {
            Some(HandleKind::Source) => {
                let slot = self.source_slot(handle)?;
                let node = self
                    .sources
                    .get_mut(slot)
                    .ok_or(VoiceGraphError::InvalidHandle(handle))?;
                node.volume = volume;
                node.voice
            }
            Some(HandleKind::Submix) => {
                let slot = self.submix_slot(handle)?;
                let node = self
                    .submixes
                    .get_mut(slot)
                    .ok_or(VoiceGraphError::InvalidHandle(handle))?;
                node.volume = volume;
                node.voice
            }
            None => return Err(VoiceGraphError::InvalidHandle(handle)),
        };
        self.backend.set_volume(voice, volume);
        Ok(())
    }

    /// Applies a voice filter to a source or submix. Frequency and
    /// `one_over_q` are clamped to the configured limits.
    pub fn set_filter(&mut self, handle: Handle, filter: FilterParameters) -> Result<()> {
        let voice = self.voice_of(handle)?;
        let filter = FilterParameters {
            kind: filter.kind,
            frequency: filter.frequency.clamp(0.0, self.config.max_filter_frequency),
            one_over_q: filter.one_over_q.clamp(0.0, self.config.max_filter_one_over_q),
        };
        self.backend.set_filter(voice, &filter);
        Ok(())
    }

    pub(crate) fn link_source(&mut self, source: SlotId, target: SlotId) {
        if let Some(node) = self.sources.get_mut(source) {
            node.outputs.push(target);
        }
        if let Some(submix) = self.submixes.get_mut(target) {
            submix.sources.push(source);
        }
    }

    pub(crate) fn unlink_source(&mut self, source: SlotId, target: SlotId) -> bool {
        let removed = self
            .sources
            .get_mut(source)
            .is_some_and(|node| remove_slot(&mut node.outputs, target));
        if removed {
            if let Some(submix) = self.submixes.get_mut(target) {
                remove_slot(&mut submix.sources, source);
            }
        }
        removed
    }

    fn link_submix(&mut self, from: SlotId, to: SlotId) {
        if let Some(node) = self.submixes.get_mut(from) {
            node.outputs.push(to);
        }
        if let Some(node) = self.submixes.get_mut(to) {
            node.inputs.push(from);
        }
    }

    fn unlink_submix(&mut self, from: SlotId, to: SlotId) -> bool {
        let removed = self
            .submixes
            .get_mut(from)
            .is_some_and(|node| remove_slot(&mut node.outputs, to));
        if removed {
            if let Some(node) = self.submixes.get_mut(to) {
                remove_slot(&mut node.inputs, from);
            }
        }
        removed
    }

    fn reroute_orphaned_submix(&mut self, slot: SlotId) {
        let orphaned = self
            .submixes
            .get(slot)
            .is_some_and(|node| node.outputs.is_empty());
        if orphaned && slot != self.root {
            self.link_submix(slot, self.root);
        }
    }

    /// Mirrors the source's output list onto its native send list.
    pub(crate) fn push_source_sends(&mut self, source: SlotId) {
        let Some(node) = self.sources.get(source) else {
            return;
        };
        let voice = node.voice;
        let targets = self.target_voices(&node.outputs);
        self.apply_sends(Handle::source(source), voice, &targets);
    }

    fn push_submix_sends(&mut self, submix: SlotId) {
        let Some(node) = self.submixes.get(submix) else {
            return;
        };
        let voice = node.voice;
        let targets = self.target_voices(&node.outputs);
        self.apply_sends(Handle::submix(submix), voice, &targets);
    }

    fn target_voices(&self, outputs: &[SlotId]) -> Vec<VoiceId> {
        outputs
            .iter()
            .filter_map(|&slot| self.submixes.get(slot))
            .map(|node| node.voice)
            .collect()
    }

    fn apply_sends(&mut self, handle: Handle, voice: VoiceId, targets: &[VoiceId]) {
        if let Err(err) = self.backend.set_sends(voice, targets) {
            tracing::warn!(%handle, %err, "failed to update sends");
        }
    }
}
