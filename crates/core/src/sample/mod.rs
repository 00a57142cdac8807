//! Decoded sample storage addressed by application keys.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hound::{SampleFormat, WavReader};

use crate::{Result, SampleEncoding, VoiceGraphError, WaveFormat};

/// Raw interleaved PCM plus the format needed to play it.
#[derive(Debug, Clone)]
pub struct DecodedSample {
    pub format: WaveFormat,
    pub data: Arc<[u8]>,
}

impl DecodedSample {
    /// Length of the sample in seconds.
    pub fn duration_seconds(&self) -> f32 {
        if self.format.avg_bytes_per_sec == 0 {
            return 0.0;
        }
        self.data.len() as f32 / self.format.avg_bytes_per_sec as f32
    }
}

/// Turns files into [`DecodedSample`]s.
pub trait SampleDecoder {
    fn load(&mut self, path: &Path) -> Result<DecodedSample>;

    /// Called once the last key referring to `path` has been unloaded.
    fn unload(&mut self, _path: &Path) {}
}

/// WAV decoder backed by `hound`. Accepts `.wav` files and paths without an
/// extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct WavDecoder;

impl WavDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl SampleDecoder for WavDecoder {
    fn load(&mut self, path: &Path) -> Result<DecodedSample> {
        match path.extension().and_then(OsStr::to_str) {
            None => {}
            Some(ext) if ext.eq_ignore_ascii_case("wav") => {}
            Some(ext) => return Err(VoiceGraphError::UnsupportedFormat(ext.to_string())),
        }

        let mut reader = WavReader::open(path)?;
        let spec = reader.spec();
        let width = usize::from(spec.bits_per_sample).div_ceil(8);
        let encoding = match spec.sample_format {
            SampleFormat::Float => SampleEncoding::IeeeFloat,
            SampleFormat::Int => SampleEncoding::Pcm,
        };
        let format = WaveFormat::try_packed(
            encoding,
            spec.channels,
            spec.sample_rate,
            (width * 8) as u16,
        )
        .ok_or_else(|| {
            VoiceGraphError::UnsupportedFormat(format!(
                "{} channels of {} bits at {} Hz",
                spec.channels, spec.bits_per_sample, spec.sample_rate
            ))
        })?;
        let mut data = Vec::with_capacity(reader.len() as usize * width);

        match spec.sample_format {
            SampleFormat::Float => {
                if spec.bits_per_sample != 32 {
                    return Err(VoiceGraphError::UnsupportedFormat(format!(
                        "{}-bit float",
                        spec.bits_per_sample
                    )));
                }
                for sample in reader.samples::<f32>() {
                    data.extend_from_slice(&sample?.to_le_bytes());
                }
            }
            SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    let sample = sample?;
                    match width {
                        // 8-bit WAV data is unsigned.
                        1 => data.push((sample + 128) as u8),
                        _ => data.extend_from_slice(&sample.to_le_bytes()[..width]),
                    }
                }
            }
        }

        tracing::debug!(?path, ?format, bytes = data.len(), "decoded wav file");
        Ok(DecodedSample {
            format,
            data: data.into(),
        })
    }
}

/// Key → sample registry. Decoded data is cached per path, so several keys
/// may share one file, and playing sources keep their data alive after the
/// key is unloaded.
#[derive(Debug, Default)]
pub struct SampleBank<D> {
    decoder: D,
    by_path: HashMap<PathBuf, Arc<DecodedSample>>,
    keys: HashMap<String, PathBuf>,
}

impl<D: SampleDecoder> SampleBank<D> {
    pub fn new(decoder: D) -> Self {
        Self {
            decoder,
            by_path: HashMap::new(),
            keys: HashMap::new(),
        }
    }

    /// Decodes `path` (unless already cached) and binds it to `key`,
    /// replacing any previous binding of that key.
    pub fn load(&mut self, path: &Path, key: &str) -> Result<()> {
        if !self.by_path.contains_key(path) {
            let sample = self.decoder.load(path)?;
            self.by_path.insert(path.to_path_buf(), Arc::new(sample));
        }
        if let Some(previous) = self.keys.insert(key.to_string(), path.to_path_buf()) {
            if previous != path {
                self.release_if_unused(&previous);
            }
        }
        Ok(())
    }

    /// Drops the binding for `key`. Returns `false` for unknown keys.
    pub fn unload(&mut self, key: &str) -> bool {
        let Some(path) = self.keys.remove(key) else {
            return false;
        };
        self.release_if_unused(&path);
        true
    }

    pub fn get(&self, key: &str) -> Option<Arc<DecodedSample>> {
        let path = self.keys.get(key)?;
        self.by_path.get(path).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    fn release_if_unused(&mut self, path: &Path) {
        if self.keys.values().any(|bound| bound == path) {
            return;
        }
        if self.by_path.remove(path).is_some() {
            self.decoder.unload(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use hound::{WavSpec, WavWriter};

    use super::*;

    #[derive(Default)]
    struct CountingDecoder {
        loads: usize,
        unloads: Vec<PathBuf>,
    }

    impl SampleDecoder for CountingDecoder {
        fn load(&mut self, _path: &Path) -> Result<DecodedSample> {
            self.loads += 1;
            Ok(DecodedSample {
                format: WaveFormat::packed(SampleEncoding::Pcm, 1, 100, 16),
                data: Arc::from(vec![0_u8; 200]),
            })
        }

        fn unload(&mut self, path: &Path) {
            self.unloads.push(path.to_path_buf());
        }
    }

    fn write_wav(path: &Path, spec: WavSpec, frames: usize) {
        let mut writer = WavWriter::create(path, spec).unwrap();
        for i in 0..frames * usize::from(spec.channels) {
            match spec.sample_format {
                SampleFormat::Float => writer.write_sample(i as f32 / 100.0).unwrap(),
                SampleFormat::Int if spec.bits_per_sample == 8 => {
                    writer.write_sample((i % 100) as i8).unwrap()
                }
                SampleFormat::Int => writer.write_sample((i * 10) as i16).unwrap(),
            }
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn decodes_pcm16_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = WavSpec {
            channels: 2,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        write_wav(&path, spec, 441);

        let sample = WavDecoder::new().load(&path).unwrap();
        assert_eq!(sample.format.encoding, SampleEncoding::Pcm);
        assert_eq!(sample.format.block_align, 4);
        assert_eq!(sample.format.avg_bytes_per_sec, 88_200);
        assert_eq!(sample.data.len(), 441 * 4);
        assert_eq!(&sample.data[2..4], &10_i16.to_le_bytes());
        assert!((sample.duration_seconds() - 0.02).abs() < 1e-6);
    }

    #[test]
    fn decodes_unsigned_eight_bit_and_float() {
        let dir = tempfile::tempdir().unwrap();
        let eight = dir.path().join("eight.wav");
        write_wav(
            &eight,
            WavSpec {
                channels: 1,
                sample_rate: 8_000,
                bits_per_sample: 8,
                sample_format: SampleFormat::Int,
            },
            4,
        );
        let sample = WavDecoder::new().load(&eight).unwrap();
        assert_eq!(&sample.data[..], &[128, 129, 130, 131]);

        let float = dir.path().join("float");
        write_wav(
            &float,
            WavSpec {
                channels: 1,
                sample_rate: 8_000,
                bits_per_sample: 32,
                sample_format: SampleFormat::Float,
            },
            2,
        );
        let sample = WavDecoder::new().load(&float).unwrap();
        assert_eq!(sample.format.encoding, SampleEncoding::IeeeFloat);
        assert_eq!(sample.data.len(), 8);
    }

    #[test]
    fn rejects_other_extensions() {
        let err = WavDecoder::new().load(Path::new("music.ogg")).unwrap_err();
        assert!(matches!(err, VoiceGraphError::UnsupportedFormat(ref ext) if ext == "ogg"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WavDecoder::new().load(&dir.path().join("nope.wav")).is_err());
    }

    #[test]
    fn shares_decoded_data_between_keys() {
        let mut bank = SampleBank::new(CountingDecoder::default());
        bank.load(Path::new("kick.wav"), "kick").unwrap();
        bank.load(Path::new("kick.wav"), "kick-alt").unwrap();
        assert_eq!(bank.decoder().loads, 1);
        assert_eq!(bank.len(), 2);

        assert!(bank.unload("kick"));
        assert!(bank.decoder().unloads.is_empty());
        assert!(bank.get("kick-alt").is_some());

        assert!(bank.unload("kick-alt"));
        assert_eq!(bank.decoder().unloads, vec![PathBuf::from("kick.wav")]);
        assert!(!bank.unload("kick-alt"));
    }

    #[test]
    fn unloading_keeps_outstanding_data_alive() {
        let mut bank = SampleBank::new(CountingDecoder::default());
        bank.load(Path::new("snare.wav"), "snare").unwrap();
        let held = bank.get("snare").unwrap();
        bank.unload("snare");
        assert!(bank.get("snare").is_none());
        assert_eq!(held.data.len(), 200);
    }

    #[test]
    fn rebinding_a_key_releases_the_old_file() {
        let mut bank = SampleBank::new(CountingDecoder::default());
        bank.load(Path::new("a.wav"), "hit").unwrap();
        bank.load(Path::new("b.wav"), "hit").unwrap();
        assert_eq!(bank.decoder().unloads, vec![PathBuf::from("a.wav")]);
        assert_eq!(bank.len(), 1);
    }
}
