//! Seam between the graph and the native rendering engine.
//!
//! The graph never mixes audio itself. It issues commands through
//! [`RenderBackend`] and treats every call as either fire-and-forget or a
//! synchronous query; the renderer runs on its own thread, so a query issued
//! right after a command may still observe the old state.

mod simulated;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{EffectKind, EffectParameters, Result};

pub use simulated::{FailurePlan, SimVoice, SimVoiceKind, SimulatedBackend};

/// Loop count that repeats the loop region until the voice is stopped.
pub const LOOP_INFINITE: u32 = 255;

/// Identifier of a native voice owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VoiceId(pub u64);

/// Identifier of a native effect instance owned by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectInstance(pub u64);

/// Sample encoding of a PCM stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleEncoding {
    Pcm,
    IeeeFloat,
}

/// Format description copied from a decoded asset onto each source voice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveFormat {
    pub encoding: SampleEncoding,
    pub channels: u16,
    pub samples_per_sec: u32,
    pub avg_bytes_per_sec: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

impl WaveFormat {
    /// Builds a packed interleaved format from its basic parameters. Sizes
    /// that do not fit their fields saturate; use [`try_packed`](Self::try_packed)
    /// for layouts read from untrusted headers.
    pub fn packed(
        encoding: SampleEncoding,
        channels: u16,
        samples_per_sec: u32,
        bits_per_sample: u16,
    ) -> Self {
        let block_align = channels.saturating_mul(bits_per_sample / 8);
        Self {
            encoding,
            channels,
            samples_per_sec,
            avg_bytes_per_sec: samples_per_sec.saturating_mul(u32::from(block_align)),
            block_align,
            bits_per_sample,
        }
    }

    /// Like [`packed`](Self::packed), but `None` when the block alignment or
    /// the byte rate overflows.
    pub fn try_packed(
        encoding: SampleEncoding,
        channels: u16,
        samples_per_sec: u32,
        bits_per_sample: u16,
    ) -> Option<Self> {
        let block_align = channels.checked_mul(bits_per_sample / 8)?;
        let avg_bytes_per_sec = samples_per_sec.checked_mul(u32::from(block_align))?;
        Some(Self {
            encoding,
            channels,
            samples_per_sec,
            avg_bytes_per_sec,
            block_align,
            bits_per_sample,
        })
    }

    /// Number of whole frames in `bytes` bytes of audio.
    pub fn frames_in(&self, bytes: usize) -> u64 {
        if self.block_align == 0 {
            return 0;
        }
        (bytes / usize::from(self.block_align)) as u64
    }
}

/// Channel layout and rate of the device output, which every submix uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputDetails {
    pub channels: u32,
    pub sample_rate: u32,
}

impl Default for OutputDetails {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48_000,
        }
    }
}

/// Audio buffer submitted to a source voice. Positions are in frames.
#[derive(Debug, Clone)]
pub struct PlaybackBuffer {
    pub data: Arc<[u8]>,
    pub play_begin: u32,
    /// Zero plays to the end of `data`.
    pub play_length: u32,
    pub loop_begin: u32,
    pub loop_length: u32,
    pub loop_count: u32,
    pub end_of_stream: bool,
}

impl PlaybackBuffer {
    /// Plays the whole buffer once.
    pub fn whole(data: Arc<[u8]>) -> Self {
        Self {
            data,
            play_begin: 0,
            play_length: 0,
            loop_begin: 0,
            loop_length: 0,
            loop_count: 0,
            end_of_stream: true,
        }
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }
}

/// Snapshot of a source voice's queue as reported by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueState {
    pub samples_played: u64,
    pub buffers_queued: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    LowPass,
    BandPass,
    HighPass,
    Notch,
    LowPassOnePole,
    HighPassOnePole,
}

/// State-variable filter settings applied per voice. `frequency` is the
/// normalised radian frequency the renderer expects.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParameters {
    pub kind: FilterKind,
    pub frequency: f32,
    pub one_over_q: f32,
}

impl Default for FilterParameters {
    fn default() -> Self {
        Self {
            kind: FilterKind::LowPass,
            frequency: 1.0,
            one_over_q: 1.0,
        }
    }
}

/// One entry of the chain handed to [`RenderBackend::set_effect_chain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectDescriptor {
    pub instance: EffectInstance,
    pub active: bool,
    pub output_channels: u32,
}

/// Commands the graph issues to the rendering engine.
///
/// Failures are reported as [`VoiceGraphError::Backend`](crate::VoiceGraphError::Backend).
pub trait RenderBackend {
    fn output_details(&self) -> OutputDetails;

    fn create_source_voice(
        &mut self,
        format: &WaveFormat,
        max_frequency_ratio: f32,
    ) -> Result<VoiceId>;

    /// Creates a submix processed at `stage`; lower stages are mixed first.
    fn create_submix_voice(
        &mut self,
        channels: u32,
        sample_rate: u32,
        stage: u32,
    ) -> Result<VoiceId>;

    fn destroy_voice(&mut self, voice: VoiceId);

    fn submit_buffer(&mut self, voice: VoiceId, buffer: &PlaybackBuffer) -> Result<()>;

    fn flush_buffers(&mut self, voice: VoiceId);

    fn start(&mut self, voice: VoiceId);

    fn stop(&mut self, voice: VoiceId);

    fn set_volume(&mut self, voice: VoiceId, volume: f32);

    fn set_filter(&mut self, voice: VoiceId, filter: &FilterParameters);

    /// Replaces the voice's complete send list.
    fn set_sends(&mut self, voice: VoiceId, targets: &[VoiceId]) -> Result<()>;

    fn create_effect(&mut self, kind: EffectKind, channels: u32) -> Result<EffectInstance>;

    fn release_effect(&mut self, instance: EffectInstance);

    /// Replaces the voice's complete effect chain. Chains cannot be patched
    /// in place; an empty slice detaches every effect.
    fn set_effect_chain(&mut self, voice: VoiceId, chain: &[EffectDescriptor]) -> Result<()>;

    fn set_effect_parameters(
        &mut self,
        voice: VoiceId,
        index: usize,
        parameters: &EffectParameters,
    ) -> Result<()>;

    fn effect_parameters(&mut self, voice: VoiceId, index: usize) -> Result<EffectParameters>;

    fn queue_state(&self, voice: VoiceId) -> QueueState;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_format_derives_alignment() {
        let format = WaveFormat::packed(SampleEncoding::Pcm, 2, 44_100, 16);
        assert_eq!(format.block_align, 4);
        assert_eq!(format.avg_bytes_per_sec, 176_400);
        assert_eq!(format.frames_in(4_410 * 4), 4_410);
    }

    #[test]
    fn try_packed_rejects_overflowing_layouts() {
        assert_eq!(
            WaveFormat::try_packed(SampleEncoding::Pcm, 2, 44_100, 16),
            Some(WaveFormat::packed(SampleEncoding::Pcm, 2, 44_100, 16))
        );
        // 32768 channels of 16 bit do not fit a u16 block alignment.
        assert_eq!(
            WaveFormat::try_packed(SampleEncoding::Pcm, 32_768, 44_100, 16),
            None
        );
        // 65535 byte frames at 192 kHz overflow the u32 byte rate.
        assert_eq!(
            WaveFormat::try_packed(SampleEncoding::Pcm, 65_535, 192_000, 8),
            None
        );

        let saturated = WaveFormat::packed(SampleEncoding::Pcm, 32_768, 192_000, 16);
        assert_eq!(saturated.block_align, u16::MAX);
        assert_eq!(saturated.avg_bytes_per_sec, u32::MAX);
    }

    #[test]
    fn zero_alignment_has_no_frames() {
        let mut format = WaveFormat::packed(SampleEncoding::Pcm, 1, 8_000, 8);
        format.block_align = 0;
        assert_eq!(format.frames_in(128), 0);
    }
}
