//! Core library for the voice graph.
//!
//! A [`VoiceGraph`] owns every playing sound ("source") and every mix bus
//! ("submix"), hands out generation-checked [`Handle`]s for them, and keeps a
//! [`RenderBackend`] in sync with the routing, volume, filter and effect state
//! it tracks. Each module owns one concern: handle allocation, effect chains,
//! sample decoding, routing and playback.

pub mod backend;
pub mod config;
pub mod effects;
pub mod error;
pub mod graph;
pub mod handle;
pub mod playback;
pub mod sample;

pub use backend::{
    EffectDescriptor, EffectInstance, FailurePlan, FilterKind, FilterParameters, OutputDetails,
    PlaybackBuffer, QueueState, RenderBackend, SampleEncoding, SimVoice, SimVoiceKind,
    SimulatedBackend, VoiceId, WaveFormat, LOOP_INFINITE,
};
pub use config::{AppConfig, GraphConfig};
pub use effects::{
    EchoParameters, EffectChain, EffectKind, EffectParameters, EffectSlot, EqBand,
    EqualizerParameters, FxReverbParameters, MasteringLimiterParameters, MeterLevels,
    ReverbParameters,
};
pub use error::{Result, VoiceGraphError};
pub use graph::{EffectSnapshot, GraphSnapshot, SourceSnapshot, SubmixSnapshot, VoiceGraph};
pub use handle::{Handle, HandleKind, HandleTable, SlotId, GENERATION_MASK, MAX_SLOTS};
pub use playback::{LoopRegion, PlaybackState};
pub use sample::{DecodedSample, SampleBank, SampleDecoder, WavDecoder};
