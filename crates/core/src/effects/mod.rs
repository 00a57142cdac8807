//! Effect kinds, their parameter blocks and the per-submix effect chain.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{EffectDescriptor, EffectInstance, Result, VoiceGraphError};

/// DSP effects a submix can host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    Reverb,
    VolumeMeter,
    Echo,
    Equalizer,
    MasteringLimiter,
    FxReverb,
}

impl EffectKind {
    /// Parameter block a freshly created effect of this kind starts with.
    /// Meter blocks hold one level per output channel.
    pub fn default_parameters(self, channels: u32) -> EffectParameters {
        match self {
            EffectKind::Reverb => EffectParameters::Reverb(ReverbParameters::default()),
            EffectKind::VolumeMeter => EffectParameters::VolumeMeter(MeterLevels::silent(channels)),
            EffectKind::Echo => EffectParameters::Echo(EchoParameters::default()),
            EffectKind::Equalizer => EffectParameters::Equalizer(EqualizerParameters::default()),
            EffectKind::MasteringLimiter => {
                EffectParameters::MasteringLimiter(MasteringLimiterParameters::default())
            }
            EffectKind::FxReverb => EffectParameters::FxReverb(FxReverbParameters::default()),
        }
    }

    /// Meters only report levels; they accept no parameter writes.
    pub fn is_read_only(self) -> bool {
        matches!(self, EffectKind::VolumeMeter)
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EffectKind::Reverb => "reverb",
            EffectKind::VolumeMeter => "volume meter",
            EffectKind::Echo => "echo",
            EffectKind::Equalizer => "equalizer",
            EffectKind::MasteringLimiter => "mastering limiter",
            EffectKind::FxReverb => "fx reverb",
        };
        f.write_str(name)
    }
}

/// Native reverb settings. Delays are in milliseconds, gains in dB.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbParameters {
    pub wet_dry_mix: f32,
    pub reflections_delay: u32,
    pub reverb_delay: u8,
    pub rear_delay: u8,
    pub room_filter_freq: f32,
    pub room_filter_main: f32,
    pub room_filter_hf: f32,
    pub reflections_gain: f32,
    pub reverb_gain: f32,
    pub decay_time: f32,
    pub density: f32,
    pub room_size: f32,
}

impl Default for ReverbParameters {
    fn default() -> Self {
        Self {
            wet_dry_mix: 100.0,
            reflections_delay: 5,
            reverb_delay: 5,
            rear_delay: 5,
            room_filter_freq: 5_000.0,
            room_filter_main: 0.0,
            room_filter_hf: 0.0,
            reflections_gain: 0.0,
            reverb_gain: 0.0,
            decay_time: 1.0,
            density: 100.0,
            room_size: 100.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoParameters {
    pub wet_dry_mix: f32,
    pub feedback: f32,
    pub delay_ms: f32,
}

impl Default for EchoParameters {
    fn default() -> Self {
        Self {
            wet_dry_mix: 0.5,
            feedback: 0.5,
            delay_ms: 500.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub center: f32,
    pub gain: f32,
    pub bandwidth: f32,
}

/// Four-band parametric equaliser.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EqualizerParameters {
    pub bands: [EqBand; 4],
}

impl Default for EqualizerParameters {
    fn default() -> Self {
        let band = |center| EqBand {
            center,
            gain: 1.0,
            bandwidth: 1.0,
        };
        Self {
            bands: [band(100.0), band(800.0), band(2_000.0), band(10_000.0)],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasteringLimiterParameters {
    pub release: u32,
    pub loudness: u32,
}

impl Default for MasteringLimiterParameters {
    fn default() -> Self {
        Self {
            release: 6,
            loudness: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FxReverbParameters {
    pub diffusion: f32,
    pub room_size: f32,
}

impl Default for FxReverbParameters {
    fn default() -> Self {
        Self {
            diffusion: 0.9,
            room_size: 0.6,
        }
    }
}

/// Peak and RMS levels reported by a volume meter, one entry per channel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeterLevels {
    pub peak: Vec<f32>,
    pub rms: Vec<f32>,
}

impl MeterLevels {
    pub fn silent(channels: u32) -> Self {
        let channels = channels as usize;
        Self {
            peak: vec![0.0; channels],
            rms: vec![0.0; channels],
        }
    }

    pub fn channels(&self) -> usize {
        self.peak.len()
    }
}

/// Parameter block for any effect kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EffectParameters {
    Reverb(ReverbParameters),
    VolumeMeter(MeterLevels),
    Echo(EchoParameters),
    Equalizer(EqualizerParameters),
    MasteringLimiter(MasteringLimiterParameters),
    FxReverb(FxReverbParameters),
}

impl EffectParameters {
    pub fn kind(&self) -> EffectKind {
        match self {
            EffectParameters::Reverb(_) => EffectKind::Reverb,
            EffectParameters::VolumeMeter(_) => EffectKind::VolumeMeter,
            EffectParameters::Echo(_) => EffectKind::Echo,
            EffectParameters::Equalizer(_) => EffectKind::Equalizer,
            EffectParameters::MasteringLimiter(_) => EffectKind::MasteringLimiter,
            EffectParameters::FxReverb(_) => EffectKind::FxReverb,
        }
    }
}

/// One effect hosted by a submix.
#[derive(Debug, Clone)]
pub struct EffectSlot {
    pub kind: EffectKind,
    pub instance: EffectInstance,
    pub parameters: EffectParameters,
    pub active: bool,
}

impl EffectSlot {
    pub fn new(kind: EffectKind, instance: EffectInstance, active: bool, channels: u32) -> Self {
        Self {
            kind,
            instance,
            parameters: kind.default_parameters(channels),
            active,
        }
    }
}

/// Ordered effect list owned by a submix node.
#[derive(Debug, Clone, Default)]
pub struct EffectChain {
    entries: Vec<EffectSlot>,
}

impl EffectChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EffectSlot> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut EffectSlot> {
        self.entries.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EffectSlot> + '_ {
        self.entries.iter()
    }

    /// Inserts at `position`, or appends when `position` is `None`. Positions
    /// past the end append. Returns the index the entry ended up at.
    pub fn insert(&mut self, position: Option<usize>, slot: EffectSlot) -> usize {
        match position {
            Some(index) if index < self.entries.len() => {
                self.entries.insert(index, slot);
                index
            }
            _ => {
                self.entries.push(slot);
                self.entries.len() - 1
            }
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<EffectSlot> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// Index of the most recently added effect of `kind`.
    pub fn find(&self, kind: EffectKind) -> Option<usize> {
        self.entries.iter().rposition(|slot| slot.kind == kind)
    }

    /// Resolves an explicit index or, when `None`, the last effect of `kind`,
    /// and checks that the entry really is of that kind.
    pub fn resolve(&self, index: Option<usize>, kind: EffectKind) -> Result<usize> {
        let index = match index {
            Some(index) => index,
            None => self.find(kind).ok_or(VoiceGraphError::EffectNotFound(kind))?,
        };
        let slot = self
            .entries
            .get(index)
            .ok_or(VoiceGraphError::EffectIndexOutOfRange {
                index,
                len: self.entries.len(),
            })?;
        if slot.kind != kind {
            return Err(VoiceGraphError::EffectKindMismatch {
                index,
                expected: kind,
                found: slot.kind,
            });
        }
        Ok(index)
    }

    /// Full descriptor list to hand to the backend.
    pub fn descriptors(&self, output_channels: u32) -> Vec<EffectDescriptor> {
        self.entries
            .iter()
            .map(|slot| EffectDescriptor {
                instance: slot.instance,
                active: slot.active,
                output_channels,
            })
            .collect()
    }

    pub fn kinds(&self) -> Vec<EffectKind> {
        self.entries.iter().map(|slot| slot.kind).collect()
    }

    /// Empties the chain and returns the native instances it owned.
    pub fn take_instances(&mut self) -> Vec<EffectInstance> {
        self.entries.drain(..).map(|slot| slot.instance).collect()
    }
}
