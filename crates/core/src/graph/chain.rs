use super::VoiceGraph;
use crate::{
    EffectKind, EffectParameters, EffectSlot, Handle, MeterLevels, RenderBackend, Result,
    SampleDecoder, SlotId, VoiceGraphError,
};

impl<B: RenderBackend, D: SampleDecoder> VoiceGraph<B, D> {
    /// Creates a native effect and inserts it into the submix's chain at
    /// `position` (appends when `None`). Returns the index it landed at.
    ///
    /// If the backend refuses the new chain, the effect is released and the
    /// previous chain is submitted again.
    pub fn add_effect(
        &mut self,
        submix: Handle,
        kind: EffectKind,
        active: bool,
        position: Option<usize>,
    ) -> Result<usize> {
        let (slot, node) = self.submix_entry(submix)?;
        let len = node.effects.len();
        if let Some(index) = position.filter(|&index| index > len) {
            return Err(VoiceGraphError::EffectIndexOutOfRange { index, len });
        }

        let channels = self.output.channels;
        let instance = self
            .backend
            .create_effect(kind, channels)
            .inspect_err(|err| tracing::warn!(%submix, %kind, %err, "failed to create effect"))?;

        let Some(node) = self.submixes.get_mut(slot) else {
            self.backend.release_effect(instance);
            return Err(VoiceGraphError::InvalidHandle(submix));
        };
        let index = node
            .effects
            .insert(position, EffectSlot::new(kind, instance, active, channels));

        if let Err(err) = self.submit_chain(slot) {
            tracing::warn!(%submix, %kind, %err, "backend rejected effect chain");
            if let Some(node) = self.submixes.get_mut(slot) {
                node.effects.remove(index);
            }
            self.backend.release_effect(instance);
            if let Err(err) = self.submit_chain(slot) {
                tracing::warn!(%submix, %err, "failed to restore previous effect chain");
            }
            return Err(err);
        }

        tracing::debug!(%submix, %kind, index, active, "added effect");
        Ok(index)
    }

    /// Writes a parameter block. `index: None` targets the most recently
    /// added effect of the block's kind.
    pub fn set_effect_parameters(
        &mut self,
        submix: Handle,
        index: Option<usize>,
        parameters: EffectParameters,
    ) -> Result<()> {
        let kind = parameters.kind();
        if kind.is_read_only() {
            return Err(VoiceGraphError::ReadOnlyEffect(kind));
        }
        let (slot, node) = self.submix_entry(submix)?;
        let index = node.effects.resolve(index, kind)?;
        let voice = node.voice;

        self.backend
            .set_effect_parameters(voice, index, &parameters)
            .inspect_err(|err| {
                tracing::warn!(%submix, %kind, index, %err, "failed to set effect parameters")
            })?;

        if let Some(entry) = self
            .submixes
            .get_mut(slot)
            .and_then(|node| node.effects.get_mut(index))
        {
            entry.parameters = parameters;
        }
        Ok(())
    }

    /// Index of the most recently added effect of `kind`.
    pub fn find_effect(&self, submix: Handle, kind: EffectKind) -> Option<usize> {
        self.submix_entry(submix)
            .ok()
            .and_then(|(_, node)| node.effects.find(kind))
    }

    /// Current parameter block stored for the effect at `index`.
    pub fn effect_parameters(&self, submix: Handle, index: usize) -> Option<&EffectParameters> {
        let (_, node) = self.submix_entry(submix).ok()?;
        node.effects.get(index).map(|entry| &entry.parameters)
    }

    pub fn effect_kinds(&self, submix: Handle) -> Vec<EffectKind> {
        self.submix_entry(submix)
            .map(|(_, node)| node.effects.kinds())
            .unwrap_or_default()
    }

    pub fn effect_count(&self, submix: Handle) -> usize {
        self.submix_entry(submix)
            .map(|(_, node)| node.effects.len())
            .unwrap_or(0)
    }

    /// Reads peak and RMS levels back from a volume meter. `index: None`
    /// targets the most recently added meter.
    pub fn volume_meter_levels(
        &mut self,
        submix: Handle,
        index: Option<usize>,
    ) -> Result<MeterLevels> {
        let (_, node) = self.submix_entry(submix)?;
        let index = node.effects.resolve(index, EffectKind::VolumeMeter)?;
        let voice = node.voice;

        match self.backend.effect_parameters(voice, index) {
            Ok(EffectParameters::VolumeMeter(levels)) => Ok(levels),
            Ok(other) => Err(VoiceGraphError::EffectKindMismatch {
                index,
                expected: EffectKind::VolumeMeter,
                found: other.kind(),
            }),
            Err(err) => {
                tracing::warn!(%submix, index, %err, "failed to read volume meter");
                Err(err)
            }
        }
    }

    /// Enables or bypasses one effect and resubmits the chain.
    pub fn set_effect_active(&mut self, submix: Handle, index: usize, active: bool) -> Result<()> {
        let (slot, _) = self.submix_entry(submix)?;
        let previous = {
            let Some(node) = self.submixes.get_mut(slot) else {
                return Err(VoiceGraphError::InvalidHandle(submix));
            };
            let len = node.effects.len();
            let entry = node
                .effects
                .get_mut(index)
                .ok_or(VoiceGraphError::EffectIndexOutOfRange { index, len })?;
            std::mem::replace(&mut entry.active, active)
        };
        if previous == active {
            return Ok(());
        }

        if let Err(err) = self.submit_chain(slot) {
            tracing::warn!(%submix, index, %err, "failed to toggle effect");
            if let Some(entry) = self
                .submixes
                .get_mut(slot)
                .and_then(|node| node.effects.get_mut(index))
            {
                entry.active = previous;
            }
            if let Err(err) = self.submit_chain(slot) {
                tracing::warn!(%submix, %err, "failed to restore previous effect chain");
            }
            return Err(err);
        }
        tracing::debug!(%submix, index, active, "toggled effect");
        Ok(())
    }

    /// Detaches the native chain, installs the full descriptor list and
    /// writes back every stored parameter block, since a new chain starts
    /// from defaults.
    fn submit_chain(&mut self, slot: SlotId) -> Result<()> {
        let Some(node) = self.submixes.get(slot) else {
            return Ok(());
        };
        let voice = node.voice;
        let descriptors = node.effects.descriptors(self.output.channels);
        let blocks: Vec<(usize, EffectParameters)> = node
            .effects
            .iter()
            .enumerate()
            .filter(|(_, entry)| !entry.kind.is_read_only())
            .map(|(index, entry)| (index, entry.parameters.clone()))
            .collect();

        self.backend.set_effect_chain(voice, &[])?;
        if descriptors.is_empty() {
            return Ok(());
        }
        self.backend.set_effect_chain(voice, &descriptors)?;

        for (index, parameters) in blocks {
            if let Err(err) = self.backend.set_effect_parameters(voice, index, &parameters) {
                tracing::warn!(
                    submix = %Handle::submix(slot),
                    index,
                    %err,
                    "failed to restore effect parameters"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::graph;
    use crate::{EchoParameters, Handle, ReverbParameters};

    use super::*;

    #[test]
    fn add_effect_appends_and_find_prefers_latest() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();

        assert_eq!(graph.add_effect(bus, EffectKind::Reverb, true, None).unwrap(), 0);
        assert_eq!(graph.find_effect(bus, EffectKind::Reverb), Some(0));
        assert_eq!(graph.add_effect(bus, EffectKind::Echo, true, None).unwrap(), 1);
        assert_eq!(graph.add_effect(bus, EffectKind::Reverb, false, None).unwrap(), 2);

        assert_eq!(graph.find_effect(bus, EffectKind::Reverb), Some(2));
        assert_eq!(graph.find_effect(bus, EffectKind::Equalizer), None);
        assert_eq!(graph.effect_count(bus), 3);

        let voice = graph.voice_id(bus).unwrap();
        let chain = &graph.backend().voice(voice).unwrap().effect_chain;
        assert_eq!(chain.len(), 3);
        assert!(!chain[2].active);
        assert_eq!(chain[0].output_channels, 2);
    }

    #[test]
    fn insert_position_moves_later_effects() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph.add_effect(bus, EffectKind::Reverb, true, None).unwrap();
        graph.add_effect(bus, EffectKind::Echo, true, None).unwrap();

        assert_eq!(
            graph.add_effect(bus, EffectKind::Equalizer, true, Some(0)).unwrap(),
            0
        );
        assert_eq!(
            graph.effect_kinds(bus),
            vec![EffectKind::Equalizer, EffectKind::Reverb, EffectKind::Echo]
        );
        assert!(matches!(
            graph.add_effect(bus, EffectKind::Echo, true, Some(9)),
            Err(VoiceGraphError::EffectIndexOutOfRange { index: 9, len: 3 })
        ));
        assert_eq!(graph.backend().effect_count(), 3);
    }

    #[test]
    fn failed_chain_is_rolled_back() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph.add_effect(bus, EffectKind::Reverb, true, None).unwrap();

        graph.backend_mut().failures.set_effect_chain = true;
        assert!(graph.add_effect(bus, EffectKind::Echo, true, None).is_err());
        assert_eq!(graph.effect_kinds(bus), vec![EffectKind::Reverb]);
        assert_eq!(graph.backend().effect_count(), 1);

        graph.backend_mut().failures.set_effect_chain = false;
        graph.add_effect(bus, EffectKind::Echo, true, None).unwrap();
        let voice = graph.voice_id(bus).unwrap();
        assert_eq!(graph.backend().voice(voice).unwrap().effect_chain.len(), 2);
    }

    #[test]
    fn failed_effect_creation_changes_nothing() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph.backend_mut().failures.create_effect = true;
        assert!(matches!(
            graph.add_effect(bus, EffectKind::Echo, true, None),
            Err(VoiceGraphError::Backend { .. })
        ));
        assert_eq!(graph.effect_count(bus), 0);
    }

    #[test]
    fn parameters_resolve_by_kind_and_survive_rebuilds() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph.add_effect(bus, EffectKind::Echo, true, None).unwrap();

        let echo = EffectParameters::Echo(EchoParameters {
            feedback: 0.1,
            ..EchoParameters::default()
        });
        graph.set_effect_parameters(bus, None, echo.clone()).unwrap();
        assert_eq!(graph.effect_parameters(bus, 0), Some(&echo));

        // Inserting in front shifts the echo to index 1; its block must follow.
        graph.add_effect(bus, EffectKind::Reverb, true, Some(0)).unwrap();
        let voice = graph.voice_id(bus).unwrap();
        assert_eq!(
            graph.backend().voice(voice).unwrap().effect_parameters.get(&1),
            Some(&echo)
        );
    }

    #[test]
    fn parameter_errors_leave_stored_block_untouched() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph.add_effect(bus, EffectKind::Reverb, true, None).unwrap();
        let reverb = EffectParameters::Reverb(ReverbParameters {
            decay_time: 4.0,
            ..ReverbParameters::default()
        });

        assert!(matches!(
            graph.set_effect_parameters(bus, Some(3), reverb.clone()),
            Err(VoiceGraphError::EffectIndexOutOfRange { .. })
        ));
        assert!(matches!(
            graph.set_effect_parameters(
                bus,
                None,
                EffectParameters::Echo(EchoParameters::default())
            ),
            Err(VoiceGraphError::EffectNotFound(EffectKind::Echo))
        ));
        assert!(matches!(
            graph.set_effect_parameters(bus, None, EffectKind::VolumeMeter.default_parameters(2)),
            Err(VoiceGraphError::ReadOnlyEffect(EffectKind::VolumeMeter))
        ));

        graph.backend_mut().failures.set_effect_parameters = true;
        assert!(graph.set_effect_parameters(bus, None, reverb).is_err());
        assert_eq!(
            graph.effect_parameters(bus, 0),
            Some(&EffectParameters::Reverb(ReverbParameters::default()))
        );
    }

    #[test]
    fn reads_volume_meter_levels() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph.add_effect(bus, EffectKind::Reverb, true, None).unwrap();
        let meter = graph.add_effect(bus, EffectKind::VolumeMeter, true, None).unwrap();

        assert_eq!(
            graph.volume_meter_levels(bus, None).unwrap(),
            MeterLevels::silent(2)
        );

        let voice = graph.voice_id(bus).unwrap();
        let levels = MeterLevels {
            peak: vec![0.9, 0.8],
            rms: vec![0.4, 0.3],
        };
        graph
            .backend_mut()
            .set_meter_levels(voice, meter, levels.clone());
        assert_eq!(graph.volume_meter_levels(bus, Some(meter)).unwrap(), levels);
        assert!(matches!(
            graph.volume_meter_levels(bus, Some(0)),
            Err(VoiceGraphError::EffectKindMismatch { .. })
        ));
    }

    #[test]
    fn toggling_resubmits_chain() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph.add_effect(bus, EffectKind::Echo, true, None).unwrap();
        graph.set_effect_active(bus, 0, false).unwrap();

        let voice = graph.voice_id(bus).unwrap();
        assert!(!graph.backend().voice(voice).unwrap().effect_chain[0].active);
        assert!(graph.set_effect_active(bus, 1, true).is_err());

        graph.backend_mut().failures.set_effect_chain = true;
        assert!(graph.set_effect_active(bus, 0, true).is_err());
        graph.backend_mut().failures.set_effect_chain = false;
        graph.set_effect_active(bus, 0, true).unwrap();
        assert!(graph.backend().voice(voice).unwrap().effect_chain[0].active);
    }

    #[test]
    fn effect_ops_reject_source_and_stale_handles() {
        let mut graph = graph();
        graph.load_sound("a.wav", "a").unwrap();
        let source = graph.play("a", 1.0).unwrap();
        assert!(matches!(
            graph.add_effect(source, EffectKind::Echo, true, None),
            Err(VoiceGraphError::InvalidHandle(_))
        ));

        let bus = graph.create_submix(&[]).unwrap();
        graph.delete_node(bus);
        assert!(graph.add_effect(bus, EffectKind::Echo, true, None).is_err());
        assert_eq!(graph.find_effect(bus, EffectKind::Echo), None);
        assert_eq!(graph.effect_count(bus), 0);
        assert_eq!(graph.effect_count(Handle::ROOT), 0);
    }
}
