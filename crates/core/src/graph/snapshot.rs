use serde::{Deserialize, Serialize};

use super::VoiceGraph;
use crate::{EffectKind, Handle, PlaybackState, RenderBackend, SampleDecoder};

/// Serializable view of the whole graph, used by the command line runner and
/// handy in test failure output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub submixes: Vec<SubmixSnapshot>,
    pub sources: Vec<SourceSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmixSnapshot {
    pub handle: Handle,
    pub stage: u32,
    pub volume: f32,
    pub outputs: Vec<Handle>,
    pub inputs: Vec<Handle>,
    pub sources: Vec<Handle>,
    pub effects: Vec<EffectSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectSnapshot {
    pub kind: EffectKind,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSnapshot {
    pub handle: Handle,
    pub key: String,
    pub state: PlaybackState,
    pub volume: f32,
    pub outputs: Vec<Handle>,
}

impl GraphSnapshot {
    pub fn submix(&self, handle: Handle) -> Option<&SubmixSnapshot> {
        self.submixes.iter().find(|submix| submix.handle == handle)
    }

    pub fn source(&self, handle: Handle) -> Option<&SourceSnapshot> {
        self.sources.iter().find(|source| source.handle == handle)
    }
}

impl<B: RenderBackend, D: SampleDecoder> VoiceGraph<B, D> {
    /// Captures every node in slot order, root first.
    pub fn snapshot(&self) -> GraphSnapshot {
        let handles = |slots: &[crate::SlotId], make: fn(crate::SlotId) -> Handle| {
            slots.iter().copied().map(make).collect::<Vec<_>>()
        };

        let submixes = self
            .submixes
            .iter()
            .map(|(slot, node)| SubmixSnapshot {
                handle: Handle::submix(slot),
                stage: node.stage,
                volume: node.volume,
                outputs: handles(&node.outputs, Handle::submix),
                inputs: handles(&node.inputs, Handle::submix),
                sources: handles(&node.sources, Handle::source),
                effects: node
                    .effects
                    .iter()
                    .map(|entry| EffectSnapshot {
                        kind: entry.kind,
                        active: entry.active,
                    })
                    .collect(),
            })
            .collect();

        let sources = self
            .sources
            .iter()
            .map(|(slot, node)| SourceSnapshot {
                handle: Handle::source(slot),
                key: node.key.clone(),
                state: node.state,
                volume: node.volume,
                outputs: handles(&node.outputs, Handle::submix),
            })
            .collect();

        GraphSnapshot { submixes, sources }
    }
}
