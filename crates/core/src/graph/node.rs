use std::sync::Arc;

use crate::{DecodedSample, EffectChain, PlaybackBuffer, PlaybackState, SlotId, VoiceId};

/// One playing or queued sound instance.
#[derive(Debug)]
pub(crate) struct SourceNode {
    pub voice: VoiceId,
    pub key: String,
    pub sample: Arc<DecodedSample>,
    pub buffer: PlaybackBuffer,
    pub state: PlaybackState,
    pub volume: f32,
    /// Submixes this source sends into.
    pub outputs: Vec<SlotId>,
}

/// One mix bus. Edges are stored on both ends as slot ids.
#[derive(Debug)]
pub(crate) struct SubmixNode {
    pub voice: VoiceId,
    pub stage: u32,
    pub volume: f32,
    pub outputs: Vec<SlotId>,
    pub inputs: Vec<SlotId>,
    pub sources: Vec<SlotId>,
    pub effects: EffectChain,
}

impl SubmixNode {
    pub fn new(voice: VoiceId, stage: u32) -> Self {
        Self {
            voice,
            stage,
            volume: 1.0,
            outputs: Vec::new(),
            inputs: Vec::new(),
            sources: Vec::new(),
            effects: EffectChain::new(),
        }
    }
}

/// Removes every occurrence of `slot`; returns whether anything was removed.
pub(crate) fn remove_slot(list: &mut Vec<SlotId>, slot: SlotId) -> bool {
    let before = list.len();
    list.retain(|entry| *entry != slot);
    list.len() != before
}
