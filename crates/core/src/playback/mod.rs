//! Source lifecycle: starting sounds, stopping them, and noticing when they
//! run out of data.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::graph::{SourceNode, VoiceGraph};
use crate::{
    Handle, HandleKind, PlaybackBuffer, RenderBackend, Result, SampleDecoder, SlotId,
    VoiceGraphError, LOOP_INFINITE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Playing,
    Stopped,
}

/// Loop region in seconds. A `count` of [`LOOP_INFINITE`] repeats until the
/// source is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoopRegion {
    pub begin: f32,
    pub length: f32,
    pub count: u32,
}

impl LoopRegion {
    pub fn infinite(begin: f32, length: f32) -> Self {
        Self {
            begin,
            length,
            count: LOOP_INFINITE,
        }
    }
}

fn seconds_to_frames(seconds: f32, sample_rate: u32) -> u32 {
    (seconds.max(0.0) * sample_rate as f32) as u32
}

impl<B: RenderBackend, D: SampleDecoder> VoiceGraph<B, D> {
    /// Decodes `path` and makes it playable under `key`.
    pub fn load_sound(&mut self, path: impl AsRef<Path>, key: &str) -> Result<()> {
        let path = path.as_ref();
        self.samples.load(path, key)?;
        tracing::debug!(?path, key, "loaded sound");
        Ok(())
    }

    /// Forgets `key`. Sources already playing it keep their data.
    pub fn unload_sound(&mut self, key: &str) -> bool {
        let removed = self.samples.unload(key);
        if removed {
            tracing::debug!(key, "unloaded sound");
        }
        removed
    }

    /// Starts a new source playing the sound bound to `key` once, routed to
    /// the root.
    pub fn play(&mut self, key: &str, volume: f32) -> Result<Handle> {
        self.start_source(key, volume, None)
    }

    /// Plays only `region`: starts at its beginning, plays its length, then
    /// repeats it `count` more times.
    pub fn play_loop(&mut self, key: &str, region: LoopRegion, volume: f32) -> Result<Handle> {
        self.start_source(key, volume, Some(region))
    }

    fn start_source(
        &mut self,
        key: &str,
        volume: f32,
        region: Option<LoopRegion>,
    ) -> Result<Handle> {
        let sample = self
            .samples
            .get(key)
            .ok_or_else(|| VoiceGraphError::UnknownSample(key.to_string()))?;
        let root = self.live_root()?;
        if self.sources.is_full() {
            return Err(VoiceGraphError::CapacityExhausted {
                kind: HandleKind::Source,
                capacity: self.sources.capacity(),
            });
        }

        let mut buffer = PlaybackBuffer::whole(sample.data.clone());
        if let Some(region) = region {
            let rate = sample.format.samples_per_sec;
            buffer.loop_begin = seconds_to_frames(region.begin, rate);
            buffer.loop_length = seconds_to_frames(region.length, rate);
            buffer.loop_count = region.count.min(LOOP_INFINITE);
            buffer.play_begin = buffer.loop_begin;
            buffer.play_length = buffer.loop_length;
        }

        let voice = self
            .backend
            .create_source_voice(&sample.format, self.config.max_frequency_ratio)
            .inspect_err(|err| tracing::warn!(key, %err, "failed to create source voice"))?;
        if let Err(err) = self.backend.submit_buffer(voice, &buffer) {
            tracing::warn!(key, %err, "failed to submit buffer");
            self.backend.destroy_voice(voice);
            return Err(err);
        }

        let limit = self.config.max_volume;
        let volume = volume.clamp(-limit, limit);
        let node = SourceNode {
            voice,
            key: key.to_string(),
            sample,
            buffer,
            state: PlaybackState::Playing,
            volume,
            outputs: Vec::new(),
        };
        let slot = match self.sources.insert(node) {
            Ok(slot) => slot,
            Err(node) => {
                self.backend.destroy_voice(node.voice);
                return Err(VoiceGraphError::CapacityExhausted {
                    kind: HandleKind::Source,
                    capacity: self.sources.capacity(),
                });
            }
        };

        self.link_source(slot, root);
        self.push_source_sends(slot);
        self.backend.set_volume(voice, volume);
        self.backend.start(voice);

        let handle = Handle::source(slot);
        tracing::debug!(%handle, key, looped = region.is_some(), "started source");
        Ok(handle)
    }

    /// Pauses a playing source. Stopping a stopped source does nothing.
    pub fn stop(&mut self, source: Handle) -> Result<()> {
        let slot = self.source_slot(source)?;
        let Some(node) = self.sources.get_mut(slot) else {
            return Err(VoiceGraphError::InvalidHandle(source));
        };
        if node.state == PlaybackState::Playing {
            node.state = PlaybackState::Stopped;
            self.backend.stop(node.voice);
        }
        Ok(())
    }

    /// Continues a stopped source from where it was stopped.
    pub fn resume(&mut self, source: Handle) -> Result<()> {
        let slot = self.source_slot(source)?;
        let Some(node) = self.sources.get_mut(slot) else {
            return Err(VoiceGraphError::InvalidHandle(source));
        };
        if node.state == PlaybackState::Stopped {
            node.state = PlaybackState::Playing;
            self.backend.start(node.voice);
        }
        Ok(())
    }

    /// Restarts a source from the beginning of its play region.
    pub fn play_again(&mut self, source: Handle) -> Result<()> {
        let slot = self.source_slot(source)?;
        self.restart(source, slot)
    }

    /// Restarts a source playing `length` seconds from `begin`. A zero
    /// length plays to the end of the sample.
    pub fn play_again_range(&mut self, source: Handle, begin: f32, length: f32) -> Result<()> {
        let slot = self.source_slot(source)?;
        if let Some(node) = self.sources.get_mut(slot) {
            let rate = node.sample.format.samples_per_sec;
            node.buffer.play_begin = seconds_to_frames(begin, rate);
            node.buffer.play_length = seconds_to_frames(length, rate);
        }
        self.restart(source, slot)
    }

    fn restart(&mut self, source: Handle, slot: SlotId) -> Result<()> {
        let Some(node) = self.sources.get_mut(slot) else {
            return Err(VoiceGraphError::InvalidHandle(source));
        };
        let voice = node.voice;
        if node.state == PlaybackState::Playing {
            self.backend.stop(voice);
        }
        self.backend.flush_buffers(voice);

        if let Err(err) = self.backend.submit_buffer(voice, &node.buffer) {
            tracing::warn!(%source, %err, "failed to resubmit buffer");
            node.state = PlaybackState::Stopped;
            return Err(err);
        }
        self.backend.start(voice);
        node.state = PlaybackState::Playing;
        tracing::debug!(%source, "restarted source");
        Ok(())
    }

    /// Stops every source, deleting them as well when `destroy` is set.
    pub fn stop_all(&mut self, destroy: bool) {
        for slot in self.sources.occupied() {
            let handle = Handle::source(slot);
            if destroy {
                self.delete_node(handle);
            } else if let Err(err) = self.stop(handle) {
                tracing::warn!(%handle, %err, "failed to stop source");
            }
        }
        tracing::debug!(destroy, "stopped all sources");
    }

    /// Resumes every stopped source.
    pub fn resume_all(&mut self) {
        for slot in self.sources.occupied() {
            let handle = Handle::source(slot);
            if let Err(err) = self.resume(handle) {
                tracing::warn!(%handle, %err, "failed to resume source");
            }
        }
    }

    /// Marks playing sources whose queue ran dry as stopped. Call once per
    /// tick; returns the sources that finished during this call.
    pub fn update(&mut self) -> Vec<Handle> {
        let mut finished = Vec::new();
        for slot in self.sources.occupied() {
            let Some(node) = self.sources.get_mut(slot) else {
                continue;
            };
            if node.state != PlaybackState::Playing {
                continue;
            }
            if self.backend.queue_state(node.voice).buffers_queued == 0 {
                self.backend.stop(node.voice);
                node.state = PlaybackState::Stopped;
                finished.push(Handle::source(slot));
            }
        }
        if !finished.is_empty() {
            tracing::debug!(count = finished.len(), "sources finished");
        }
        finished
    }

    /// Fraction of the sample played so far, in `[0, 1]`. Stopped sources
    /// report 1.0 and invalid handles 0.0.
    pub fn progress(&self, source: Handle) -> f32 {
        let Ok((_, node)) = self.source_entry(source) else {
            return 0.0;
        };
        if node.state == PlaybackState::Stopped {
            return 1.0;
        }
        let format = &node.sample.format;
        if format.samples_per_sec == 0 || format.avg_bytes_per_sec == 0 {
            return 1.0;
        }
        let total = node.buffer.len_bytes() as f32 / format.avg_bytes_per_sec as f32;
        if total <= 0.0 {
            return 1.0;
        }
        let played = self.backend.queue_state(node.voice).samples_played as f32
            / format.samples_per_sec as f32;
        (played / total).clamp(0.0, 1.0)
    }

    pub fn playback_state(&self, source: Handle) -> Option<PlaybackState> {
        self.source_entry(source).ok().map(|(_, node)| node.state)
    }

    /// Key the source was started from.
    pub fn source_key(&self, source: Handle) -> Option<&str> {
        self.source_entry(source).ok().map(|(_, node)| node.key.as_str())
    }
}
