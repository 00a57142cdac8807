use std::collections::{BTreeMap, HashMap, VecDeque};

use super::{
    EffectDescriptor, EffectInstance, FilterParameters, OutputDetails, PlaybackBuffer, QueueState,
    RenderBackend, VoiceId, WaveFormat, LOOP_INFINITE,
};
use crate::{EffectKind, EffectParameters, MeterLevels, Result, VoiceGraphError};

/// What a simulated voice was created as.
#[derive(Debug, Clone, PartialEq)]
pub enum SimVoiceKind {
    Source { format: WaveFormat },
    Submix { channels: u32, stage: u32 },
}

/// Everything the simulated renderer knows about one voice.
#[derive(Debug, Clone)]
pub struct SimVoice {
    pub kind: SimVoiceKind,
    pub sends: Vec<VoiceId>,
    pub volume: f32,
    pub filter: Option<FilterParameters>,
    pub running: bool,
    pub samples_played: u64,
    pub effect_chain: Vec<EffectDescriptor>,
    pub effect_parameters: BTreeMap<usize, EffectParameters>,
    // Frames left in each queued buffer.
    queue: VecDeque<u64>,
}

impl SimVoice {
    fn new(kind: SimVoiceKind) -> Self {
        Self {
            kind,
            sends: Vec::new(),
            volume: 1.0,
            filter: None,
            running: false,
            samples_played: 0,
            effect_chain: Vec::new(),
            effect_parameters: BTreeMap::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn buffers_queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stage(&self) -> Option<u32> {
        match self.kind {
            SimVoiceKind::Submix { stage, .. } => Some(stage),
            SimVoiceKind::Source { .. } => None,
        }
    }
}

/// Commands the simulation can be told to refuse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FailurePlan {
    pub create_voice: bool,
    pub submit_buffer: bool,
    pub create_effect: bool,
    pub set_effect_chain: bool,
    pub set_effect_parameters: bool,
}

/// Deterministic in-memory renderer.
///
/// Source voices consume their queued buffers only when [`advance`] is
/// called, which lets tests and the command line runner decide exactly when a
/// sound finishes.
///
/// [`advance`]: SimulatedBackend::advance
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    output: OutputDetails,
    voices: HashMap<VoiceId, SimVoice>,
    effects: HashMap<EffectInstance, EffectKind>,
    next_voice: u64,
    next_effect: u64,
    pub failures: FailurePlan,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_output(output: OutputDetails) -> Self {
        Self {
            output,
            ..Self::default()
        }
    }

    pub fn voice(&self, voice: VoiceId) -> Option<&SimVoice> {
        self.voices.get(&voice)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    pub fn effect_count(&self) -> usize {
        self.effects.len()
    }

    /// Overrides the levels a volume meter at `index` reports.
    pub fn set_meter_levels(&mut self, voice: VoiceId, index: usize, levels: MeterLevels) {
        if let Some(sim) = self.voices.get_mut(&voice) {
            sim.effect_parameters
                .insert(index, EffectParameters::VolumeMeter(levels));
        }
    }

    /// Renders `frames` frames on every running source voice.
    pub fn advance(&mut self, frames: u64) {
        for sim in self.voices.values_mut() {
            if !sim.running || !matches!(sim.kind, SimVoiceKind::Source { .. }) {
                continue;
            }
            let mut budget = frames;
            while budget > 0 {
                let Some(remaining) = sim.queue.front_mut() else {
                    break;
                };
                let consumed = budget.min(*remaining);
                *remaining -= consumed;
                budget -= consumed;
                sim.samples_played += consumed;
                if *remaining == 0 {
                    sim.queue.pop_front();
                }
            }
        }
    }

    fn voice_mut(&mut self, voice: VoiceId, operation: &'static str) -> Result<&mut SimVoice> {
        self.voices
            .get_mut(&voice)
            .ok_or_else(|| VoiceGraphError::backend(operation, format!("unknown voice {voice:?}")))
    }

    fn allocate_voice(&mut self, kind: SimVoiceKind) -> Result<VoiceId> {
        if self.failures.create_voice {
            return Err(VoiceGraphError::backend("create voice", "injected failure"));
        }
        let id = VoiceId(self.next_voice);
        self.next_voice += 1;
        self.voices.insert(id, SimVoice::new(kind));
        Ok(id)
    }
}

fn buffer_frames(format: &WaveFormat, buffer: &PlaybackBuffer) -> u64 {
    if buffer.loop_length > 0 && buffer.loop_count == LOOP_INFINITE {
        return u64::MAX;
    }
    let available = format
        .frames_in(buffer.len_bytes())
        .saturating_sub(u64::from(buffer.play_begin));
    let first_pass = match buffer.play_length {
        0 => available,
        length => u64::from(length).min(available),
    };
    first_pass + u64::from(buffer.loop_length) * u64::from(buffer.loop_count)
}

impl RenderBackend for SimulatedBackend {
    fn output_details(&self) -> OutputDetails {
        self.output
    }

    fn create_source_voice(
        &mut self,
        format: &WaveFormat,
        _max_frequency_ratio: f32,
    ) -> Result<VoiceId> {
        self.allocate_voice(SimVoiceKind::Source { format: *format })
    }

    fn create_submix_voice(
        &mut self,
        channels: u32,
        _sample_rate: u32,
        stage: u32,
    ) -> Result<VoiceId> {
        self.allocate_voice(SimVoiceKind::Submix { channels, stage })
    }

    fn destroy_voice(&mut self, voice: VoiceId) {
        self.voices.remove(&voice);
    }

    fn submit_buffer(&mut self, voice: VoiceId, buffer: &PlaybackBuffer) -> Result<()> {
        if self.failures.submit_buffer {
            return Err(VoiceGraphError::backend("submit buffer", "injected failure"));
        }
        let sim = self.voice_mut(voice, "submit buffer")?;
        let SimVoiceKind::Source { format } = sim.kind else {
            return Err(VoiceGraphError::backend("submit buffer", "not a source voice"));
        };
        sim.queue.push_back(buffer_frames(&format, buffer));
        Ok(())
    }

    fn flush_buffers(&mut self, voice: VoiceId) {
        if let Some(sim) = self.voices.get_mut(&voice) {
            sim.queue.clear();
            sim.samples_played = 0;
        }
    }

    fn start(&mut self, voice: VoiceId) {
        if let Some(sim) = self.voices.get_mut(&voice) {
            sim.running = true;
        }
    }

    fn stop(&mut self, voice: VoiceId) {
        if let Some(sim) = self.voices.get_mut(&voice) {
            sim.running = false;
        }
    }

    fn set_volume(&mut self, voice: VoiceId, volume: f32) {
        if let Some(sim) = self.voices.get_mut(&voice) {
            sim.volume = volume;
        }
    }

    fn set_filter(&mut self, voice: VoiceId, filter: &FilterParameters) {
        if let Some(sim) = self.voices.get_mut(&voice) {
            sim.filter = Some(*filter);
        }
    }

    fn set_sends(&mut self, voice: VoiceId, targets: &[VoiceId]) -> Result<()> {
        if let Some(missing) = targets.iter().find(|target| !self.voices.contains_key(*target)) {
            return Err(VoiceGraphError::backend(
                "set sends",
                format!("unknown target {missing:?}"),
            ));
        }
        self.voice_mut(voice, "set sends")?.sends = targets.to_vec();
        Ok(())
    }

    fn create_effect(&mut self, kind: EffectKind, _channels: u32) -> Result<EffectInstance> {
        if self.failures.create_effect {
            return Err(VoiceGraphError::backend("create effect", "injected failure"));
        }
        let id = EffectInstance(self.next_effect);
        self.next_effect += 1;
        self.effects.insert(id, kind);
        Ok(id)
    }

    fn release_effect(&mut self, instance: EffectInstance) {
        self.effects.remove(&instance);
    }

    fn set_effect_chain(&mut self, voice: VoiceId, chain: &[EffectDescriptor]) -> Result<()> {
        if self.failures.set_effect_chain && !chain.is_empty() {
            return Err(VoiceGraphError::backend("set effect chain", "injected failure"));
        }
        if let Some(missing) = chain.iter().find(|d| !self.effects.contains_key(&d.instance)) {
            return Err(VoiceGraphError::backend(
                "set effect chain",
                format!("unknown effect {:?}", missing.instance),
            ));
        }
        let sim = self.voice_mut(voice, "set effect chain")?;
        sim.effect_chain = chain.to_vec();
        sim.effect_parameters.clear();
        Ok(())
    }

    fn set_effect_parameters(
        &mut self,
        voice: VoiceId,
        index: usize,
        parameters: &EffectParameters,
    ) -> Result<()> {
        if self.failures.set_effect_parameters {
            return Err(VoiceGraphError::backend("set effect parameters", "injected failure"));
        }
        let effects = &self.effects;
        let sim = self
            .voices
            .get_mut(&voice)
            .ok_or_else(|| VoiceGraphError::backend("set effect parameters", "unknown voice"))?;
        let descriptor = sim.effect_chain.get(index).ok_or_else(|| {
            VoiceGraphError::backend("set effect parameters", format!("no effect at {index}"))
        })?;
        if effects.get(&descriptor.instance) != Some(&parameters.kind()) {
            return Err(VoiceGraphError::backend(
                "set effect parameters",
                "parameter block does not match effect",
            ));
        }
        sim.effect_parameters.insert(index, parameters.clone());
        Ok(())
    }

    fn effect_parameters(&mut self, voice: VoiceId, index: usize) -> Result<EffectParameters> {
        let channels = self.output.channels;
        let effects = &self.effects;
        let sim = self
            .voices
            .get(&voice)
            .ok_or_else(|| VoiceGraphError::backend("get effect parameters", "unknown voice"))?;
        let descriptor = sim.effect_chain.get(index).ok_or_else(|| {
            VoiceGraphError::backend("get effect parameters", format!("no effect at {index}"))
        })?;
        let kind = effects.get(&descriptor.instance).copied().ok_or_else(|| {
            VoiceGraphError::backend("get effect parameters", "effect was released")
        })?;
        Ok(sim
            .effect_parameters
            .get(&index)
            .cloned()
            .unwrap_or_else(|| kind.default_parameters(channels)))
    }

    fn queue_state(&self, voice: VoiceId) -> QueueState {
        self.voices
            .get(&voice)
            .map(|sim| QueueState {
                samples_played: sim.samples_played,
                buffers_queued: sim.queue.len() as u32,
            })
            .unwrap_or_default()
    }
}
