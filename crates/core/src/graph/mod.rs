//! The voice graph: sources and submixes held in slot tables, wired together
//! by send edges, and mirrored onto a [`RenderBackend`].
//!
//! Submixes are ordered by *stage*. The root submix sits at the configured
//! root stage and every other submix is created one stage below the lowest of
//! its targets, so following any edge always leads to a strictly higher
//! stage. That ordering is what keeps the graph acyclic; `connect_submix`
//! re-checks it for edges added after creation.
//!
//! ```rust,ignore
//! use voicegraph_core::{GraphConfig, SimulatedBackend, VoiceGraph, WavDecoder, Handle};
//!
//! let mut graph = VoiceGraph::new(
//!     SimulatedBackend::new(),
//!     WavDecoder::new(),
//!     GraphConfig::default(),
//! )?;
//! let music = graph.create_submix(&[])?;
//! graph.load_sound("theme.wav", "theme")?;
//! let theme = graph.play("theme", 0.8)?;
//! graph.connect_source(theme, music)?;
//! ```

mod chain;
mod node;
mod routing;
mod snapshot;

use crate::handle::HandleTable;
use crate::{
    GraphConfig, Handle, HandleKind, OutputDetails, RenderBackend, Result, SampleBank,
    SampleDecoder, SlotId, VoiceGraphError, VoiceId, WavDecoder,
};

pub(crate) use node::{remove_slot, SourceNode, SubmixNode};
pub use snapshot::{EffectSnapshot, GraphSnapshot, SourceSnapshot, SubmixSnapshot};

/// Owner of every node, edge and native voice.
///
/// Create one per output device with [`VoiceGraph::new`] and pass it by
/// reference to whatever needs to play sounds. Dropping the graph (or calling
/// [`VoiceGraph::shutdown`]) destroys every native voice it created.
pub struct VoiceGraph<B: RenderBackend, D: SampleDecoder = WavDecoder> {
    pub(crate) backend: B,
    pub(crate) samples: SampleBank<D>,
    pub(crate) config: GraphConfig,
    pub(crate) output: OutputDetails,
    pub(crate) sources: HandleTable<SourceNode>,
    pub(crate) submixes: HandleTable<SubmixNode>,
    pub(crate) root: SlotId,
    shut_down: bool,
}

impl<B: RenderBackend, D: SampleDecoder> VoiceGraph<B, D> {
    /// Validates `config` and creates the root submix.
    pub fn new(mut backend: B, decoder: D, config: GraphConfig) -> Result<Self> {
        config.validate()?;
        let output = backend.output_details();
        let voice =
            backend.create_submix_voice(output.channels, output.sample_rate, config.root_stage)?;

        let mut submixes = HandleTable::new(config.submix_capacity);
        let root = match submixes.insert(SubmixNode::new(voice, config.root_stage)) {
            Ok(slot) => slot,
            Err(node) => {
                backend.destroy_voice(node.voice);
                return Err(VoiceGraphError::Config(
                    "submix table has no room for the root".to_string(),
                ));
            }
        };
        debug_assert_eq!(Handle::submix(root), Handle::ROOT);

        tracing::debug!(
            channels = output.channels,
            sample_rate = output.sample_rate,
            root_stage = config.root_stage,
            "voice graph ready"
        );

        Ok(Self {
            backend,
            samples: SampleBank::new(decoder),
            sources: HandleTable::new(config.source_capacity),
            submixes,
            config,
            output,
            root,
            shut_down: false,
        })
    }

    /// Destroys every source, then every submix from the lowest stage up,
    /// releasing effect instances along the way. Safe to call more than once;
    /// afterwards every handle, including the root, is invalid.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        for node in self.sources.drain() {
            self.backend.stop(node.voice);
            self.backend.destroy_voice(node.voice);
        }

        let mut submixes = self.submixes.drain();
        submixes.sort_by_key(|node| node.stage);
        for mut node in submixes {
            self.backend.destroy_voice(node.voice);
            for instance in node.effects.take_instances() {
                self.backend.release_effect(instance);
            }
        }
        tracing::debug!("voice graph shut down");
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn output_details(&self) -> OutputDetails {
        self.output
    }

    pub fn samples(&self) -> &SampleBank<D> {
        &self.samples
    }

    /// Handle of the root submix.
    pub fn root(&self) -> Handle {
        Handle::submix(self.root)
    }

    /// Whether `handle` addresses a live node.
    pub fn contains(&self, handle: Handle) -> bool {
        match handle.kind() {
            Some(HandleKind::Source) => self.source_slot(handle).is_ok(),
            Some(HandleKind::Submix) => self.submix_slot(handle).is_ok(),
            None => false,
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// Number of live submixes, root included.
    pub fn submix_count(&self) -> usize {
        self.submixes.len()
    }

    pub fn source_handles(&self) -> Vec<Handle> {
        self.sources.occupied().into_iter().map(Handle::source).collect()
    }

    pub fn submix_handles(&self) -> Vec<Handle> {
        self.submixes.occupied().into_iter().map(Handle::submix).collect()
    }

    pub fn stage(&self, submix: Handle) -> Option<u32> {
        self.submix_entry(submix).ok().map(|(_, node)| node.stage)
    }

    /// Submixes `handle` sends into. Works for sources and submixes.
    pub fn outputs(&self, handle: Handle) -> Vec<Handle> {
        let outputs = match handle.kind() {
            Some(HandleKind::Source) => self.source_entry(handle).ok().map(|(_, n)| &n.outputs),
            Some(HandleKind::Submix) => self.submix_entry(handle).ok().map(|(_, n)| &n.outputs),
            None => None,
        };
        outputs
            .map(|slots| slots.iter().copied().map(Handle::submix).collect())
            .unwrap_or_default()
    }

    /// Submixes feeding into `submix`.
    pub fn inputs(&self, submix: Handle) -> Vec<Handle> {
        self.submix_entry(submix)
            .map(|(_, node)| node.inputs.iter().copied().map(Handle::submix).collect())
            .unwrap_or_default()
    }

    /// Sources feeding into `submix`.
    pub fn sources_of(&self, submix: Handle) -> Vec<Handle> {
        self.submix_entry(submix)
            .map(|(_, node)| node.sources.iter().copied().map(Handle::source).collect())
            .unwrap_or_default()
    }

    /// Native voice behind `handle`.
    pub fn voice_id(&self, handle: Handle) -> Option<VoiceId> {
        self.voice_of(handle).ok()
    }

    pub fn volume(&self, handle: Handle) -> Option<f32> {
        match handle.kind()? {
            HandleKind::Source => self.source_entry(handle).ok().map(|(_, n)| n.volume),
            HandleKind::Submix => self.submix_entry(handle).ok().map(|(_, n)| n.volume),
        }
    }

    /// Walks every node and verifies edge symmetry, stage ordering and the
    /// "every non-root node has an output" rule.
    pub fn check_invariants(&self) -> Result<()> {
        let fail = |msg: String| Err(VoiceGraphError::Invariant(msg));

        for (slot, node) in self.sources.iter() {
            let handle = Handle::source(slot);
            if node.outputs.is_empty() {
                return fail(format!("{handle} has no outputs"));
            }
            if has_duplicates(&node.outputs) {
                return fail(format!("{handle} has duplicate outputs"));
            }
            for &target in &node.outputs {
                let Some(submix) = self.submixes.get(target) else {
                    return fail(format!("{handle} sends into a dead submix"));
                };
                if !submix.sources.contains(&slot) {
                    return fail(format!("{} does not list {handle}", Handle::submix(target)));
                }
            }
        }

        for (slot, node) in self.submixes.iter() {
            let handle = Handle::submix(slot);
            if slot == self.root {
                if !node.outputs.is_empty() {
                    return fail(format!("root {handle} has outputs"));
                }
            } else if node.outputs.is_empty() {
                return fail(format!("{handle} has no outputs"));
            }
            if has_duplicates(&node.outputs)
                || has_duplicates(&node.inputs)
                || has_duplicates(&node.sources)
            {
                return fail(format!("{handle} has duplicate edges"));
            }
            for &target in &node.outputs {
                let Some(down) = self.submixes.get(target) else {
                    return fail(format!("{handle} sends into a dead submix"));
                };
                if down.stage <= node.stage {
                    return fail(format!(
                        "{handle} (stage {}) feeds {} (stage {})",
                        node.stage,
                        Handle::submix(target),
                        down.stage
                    ));
                }
                if !down.inputs.contains(&slot) {
                    return fail(format!("{} does not list input {handle}", Handle::submix(target)));
                }
            }
            for &input in &node.inputs {
                if !self
                    .submixes
                    .get(input)
                    .is_some_and(|up| up.outputs.contains(&slot))
                {
                    return fail(format!("{handle} lists a stale input"));
                }
            }
            for &source in &node.sources {
                if !self
                    .sources
                    .get(source)
                    .is_some_and(|src| src.outputs.contains(&slot))
                {
                    return fail(format!("{handle} lists a stale source"));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn source_entry(&self, handle: Handle) -> Result<(SlotId, &SourceNode)> {
        handle
            .as_source()
            .and_then(|slot| self.sources.get(slot).map(|node| (slot, node)))
            .ok_or_else(|| rejected(handle))
    }

    pub(crate) fn submix_entry(&self, handle: Handle) -> Result<(SlotId, &SubmixNode)> {
        handle
            .as_submix()
            .and_then(|slot| self.submixes.get(slot).map(|node| (slot, node)))
            .ok_or_else(|| rejected(handle))
    }

    pub(crate) fn source_slot(&self, handle: Handle) -> Result<SlotId> {
        self.source_entry(handle).map(|(slot, _)| slot)
    }

    pub(crate) fn submix_slot(&self, handle: Handle) -> Result<SlotId> {
        self.submix_entry(handle).map(|(slot, _)| slot)
    }

    /// Root slot, or an error once the graph has been shut down.
    pub(crate) fn live_root(&self) -> Result<SlotId> {
        self.submix_slot(self.root())
    }

    pub(crate) fn voice_of(&self, handle: Handle) -> Result<VoiceId> {
        match handle.kind() {
            Some(HandleKind::Source) => self.source_entry(handle).map(|(_, n)| n.voice),
            Some(HandleKind::Submix) => self.submix_entry(handle).map(|(_, n)| n.voice),
            None => Err(rejected(handle)),
        }
    }
}

impl<B: RenderBackend, D: SampleDecoder> Drop for VoiceGraph<B, D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<B: RenderBackend, D: SampleDecoder> std::fmt::Debug for VoiceGraph<B, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceGraph")
            .field("sources", &self.sources.len())
            .field("submixes", &self.submixes.len())
            .field("output", &self.output)
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

fn rejected(handle: Handle) -> VoiceGraphError {
    tracing::trace!(%handle, "rejected handle");
    VoiceGraphError::InvalidHandle(handle)
}

fn has_duplicates(slots: &[SlotId]) -> bool {
    slots
        .iter()
        .enumerate()
        .any(|(i, slot)| slots[i + 1..].contains(slot))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use super::*;
    use crate::{DecodedSample, SampleEncoding, SimulatedBackend, WaveFormat};

    /// Decoder that fabricates one second of 16-bit mono silence at 1 kHz
    /// for any path.
    #[derive(Debug, Default)]
    pub(crate) struct SilenceDecoder;

    impl SampleDecoder for SilenceDecoder {
        fn load(&mut self, _path: &Path) -> Result<DecodedSample> {
            Ok(DecodedSample {
                format: WaveFormat::packed(SampleEncoding::Pcm, 1, 1_000, 16),
                data: Arc::from(vec![0_u8; 2_000]),
            })
        }
    }

    pub(crate) type TestGraph = VoiceGraph<SimulatedBackend, SilenceDecoder>;

    pub(crate) fn graph() -> TestGraph {
        graph_with(GraphConfig::default())
    }

    pub(crate) fn graph_with(config: GraphConfig) -> TestGraph {
        VoiceGraph::new(SimulatedBackend::new(), SilenceDecoder, config).unwrap()
    }

    #[test]
    fn starts_with_root_only() {
        let graph = graph();
        assert_eq!(graph.root(), Handle::ROOT);
        assert_eq!(graph.submix_count(), 1);
        assert_eq!(graph.stage(Handle::ROOT), Some(128));
        assert!(graph.outputs(Handle::ROOT).is_empty());
        assert_eq!(graph.backend().voice_count(), 1);
        graph.check_invariants().unwrap();
    }

    #[test]
    fn rejects_invalid_config() {
        let config = GraphConfig {
            root_stage: 0,
            ..GraphConfig::default()
        };
        let result = VoiceGraph::new(SimulatedBackend::new(), SilenceDecoder, config);
        assert!(matches!(result, Err(VoiceGraphError::Config(_))));
    }

    #[test]
    fn rejects_negative_filter_limit() {
        let config = GraphConfig {
            max_filter_frequency: -1.0,
            ..GraphConfig::default()
        };
        let result = VoiceGraph::new(SimulatedBackend::new(), SilenceDecoder, config);
        assert!(matches!(result, Err(VoiceGraphError::Config(_))));
    }

    #[test]
    fn fails_cleanly_when_root_voice_cannot_be_created() {
        let mut backend = SimulatedBackend::new();
        backend.failures.create_voice = true;
        let result = VoiceGraph::new(backend, SilenceDecoder, GraphConfig::default());
        assert!(matches!(result, Err(VoiceGraphError::Backend { .. })));
    }

    #[test]
    fn shutdown_releases_every_native_object() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        graph
            .add_effect(bus, crate::EffectKind::Reverb, true, None)
            .unwrap();
        graph.load_sound("a.wav", "a").unwrap();
        graph.play("a", 1.0).unwrap();
        assert_eq!(graph.backend().voice_count(), 3);

        graph.shutdown();
        assert_eq!(graph.backend().voice_count(), 0);
        assert_eq!(graph.backend().effect_count(), 0);
        assert!(!graph.contains(Handle::ROOT));
        assert!(graph.create_submix(&[]).is_err());

        graph.shutdown();
    }

    #[test]
    fn contains_checks_tag_and_occupancy() {
        let mut graph = graph();
        let bus = graph.create_submix(&[]).unwrap();
        assert!(graph.contains(bus));
        assert!(!graph.contains(Handle::from_raw(bus.raw() & 0x0fff_ffff | 0x1000_0000)));
        assert!(!graph.contains(Handle::from_raw(0x2000_00ff)));
        assert!(!graph.contains(Handle::from_raw(u32::MAX)));
    }
}
