//! Recorded sample banks for the sampled instruments.

use std::fmt;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use hound::{SampleFormat, WavReader};
use tracing::debug;

use super::parse_note_name;
use crate::error::LoadError;
use crate::instruments::InstrumentKind;

/// One recording, played back repitched for nearby notes.
pub struct SampleZone {
    pub root_pitch: u8,
    pub sample_rate: u32,
    /// Mono, -1.0 -> 1.0
    pub frames: Arc<[f32]>,
}

impl fmt::Debug for SampleZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleZone")
            .field("root_pitch", &self.root_pitch)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames.len())
            .finish()
    }
}

impl SampleZone {
    /// Source frames to advance per output frame when playing `pitch`.
    pub fn playback_rate(&self, pitch: u8, output_rate: f32) -> f32 {
        let semitones = pitch as f32 - self.root_pitch as f32;
        2.0_f32.powf(semitones / 12.0) * self.sample_rate as f32 / output_rate
    }

    /// Linear interpolation at a fractional frame position.
    pub fn frame_at(&self, position: f32) -> Option<f32> {
        let index = position as usize;
        let current = *self.frames.get(index)?;
        let next = self.frames.get(index + 1).copied().unwrap_or(0.0);
        let frac = position - index as f32;
        Some(current + (next - current) * frac)
    }
}

#[derive(Debug, Default)]
pub struct SampleBank {
    zones: Vec<Arc<SampleZone>>,
}

impl SampleBank {
    pub fn new(mut zones: Vec<SampleZone>) -> Self {
        zones.sort_by_key(|z| z.root_pitch);
        Self {
            zones: zones.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// The zone recorded closest to `pitch`; ties go to the lower recording.
    pub fn nearest(&self, pitch: u8) -> Option<Arc<SampleZone>> {
        self.zones
            .iter()
            .min_by_key(|z| (z.root_pitch as i16 - pitch as i16).abs())
            .cloned()
    }
}

/// Produces the sample bank for an instrument. Runs on a background thread.
pub trait SampleLoader: Send + Sync {
    fn load(&self, kind: InstrumentKind) -> Result<SampleBank, LoadError>;
}

/// Loads `<root>/<instrument dir>/<note>.wav`, e.g. `piano/Ds1.wav`.
#[derive(Debug, Clone)]
pub struct WavDirLoader {
    root: PathBuf,
}

impl WavDirLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SampleLoader for WavDirLoader {
    fn load(&self, kind: InstrumentKind) -> Result<SampleBank, LoadError> {
        let dir = self.root.join(kind.dir_name());
        let mut zones = Vec::new();

        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("wav") {
                continue;
            }
            let Some(root_pitch) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| parse_note_name(s).ok())
            else {
                debug!("Skipping {}: not named after a note", path.display());
                continue;
            };

            let invalid = |source| LoadError::InvalidWav {
                path: path.clone(),
                source,
            };
            let reader = WavReader::open(&path).map_err(invalid)?;
            let (sample_rate, frames) = decode_wav(reader).map_err(invalid)?;
            zones.push(SampleZone {
                root_pitch,
                sample_rate,
                frames: frames.into(),
            });
        }

        if zones.is_empty() {
            return Err(LoadError::NoSamples(dir));
        }
        debug!("Loaded {} zones for {}", zones.len(), kind);
        Ok(SampleBank::new(zones))
    }
}

/// Integer PCM at any depth or IEEE float, any channel count mixed down to mono.
fn decode_wav<R: Read>(mut reader: WavReader<R>) -> Result<(u32, Vec<f32>), hound::Error> {
    let spec = reader.spec();
    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = 1.0 / (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
    };

    let channels = spec.channels.max(1) as usize;
    let frames = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();

    Ok((spec.sample_rate, frames))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};
    use std::io::Cursor;

    fn make_wav(spec: WavSpec, samples: &[i32]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        for s in samples {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    fn int_spec(channels: u16, sample_rate: u32, bits_per_sample: u16) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format: SampleFormat::Int,
        }
    }

    fn decode(bytes: Vec<u8>) -> Result<(u32, Vec<f32>), hound::Error> {
        decode_wav(WavReader::new(Cursor::new(bytes))?)
    }

    #[test]
    fn decodes_stereo_to_mono() {
        let wav = make_wav(int_spec(2, 22050, 16), &[16384, 0, -16384, -16384]);
        let (rate, frames) = decode(wav).unwrap();
        assert_eq!(rate, 22050);
        assert_eq!(frames, vec![0.25, -0.5]);
    }

    #[test]
    fn decodes_24_bit_and_float() {
        let (_, frames) = decode(make_wav(int_spec(1, 44100, 24), &[4_194_304, -8_388_608])).unwrap();
        assert_eq!(frames, vec![0.5, -1.0]);

        let spec = WavSpec {
            channels: 1,
            sample_rate: 48000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(0.75_f32).unwrap();
        writer.write_sample(-0.25_f32).unwrap();
        writer.finalize().unwrap();

        let (rate, frames) = decode(cursor.into_inner()).unwrap();
        assert_eq!(rate, 48000);
        assert_eq!(frames, vec![0.75, -0.25]);
    }

    /// 16-bit mono PCM in a WAVE_FORMAT_EXTENSIBLE header, as most DAWs write it
    fn extensible_wav(samples: &[i16]) -> Vec<u8> {
        const PCM_SUBFORMAT: [u8; 16] = [
            0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38,
            0x9B, 0x71,
        ];
        let data_size = (samples.len() * 2) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(4 + 8 + 40 + 8 + data_size).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&40u32.to_le_bytes());
        buf.extend_from_slice(&0xFFFEu16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&44100u32.to_le_bytes());
        buf.extend_from_slice(&(44100u32 * 2).to_le_bytes());
        buf.extend_from_slice(&2u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(&22u16.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(&4u32.to_le_bytes());
        buf.extend_from_slice(&PCM_SUBFORMAT);
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_size.to_le_bytes());
        for s in samples {
            buf.extend_from_slice(&s.to_le_bytes());
        }
        buf
    }

    #[test]
    fn decodes_extensible_pcm() {
        let (rate, frames) = decode(extensible_wav(&[16384, -32768])).unwrap();
        assert_eq!(rate, 44100);
        assert_eq!(frames, vec![0.5, -1.0]);
    }

    #[test]
    fn rejects_non_wav() {
        assert!(decode(b"definitely not audio".to_vec()).is_err());
    }

    #[test]
    fn nearest_zone_and_rate() {
        let zone = |root_pitch| SampleZone {
            root_pitch,
            sample_rate: 44100,
            frames: vec![0.0; 4].into(),
        };
        let bank = SampleBank::new(vec![zone(69), zone(57), zone(60)]);

        assert_eq!(bank.nearest(58).unwrap().root_pitch, 57);
        assert_eq!(bank.nearest(66).unwrap().root_pitch, 69);
        assert_eq!(bank.nearest(100).unwrap().root_pitch, 69);

        let a = bank.nearest(69).unwrap();
        assert!((a.playback_rate(81, 44100.0) - 2.0).abs() < 1e-5);
        assert!((a.playback_rate(69, 22050.0) - 2.0).abs() < 1e-5);
    }

    #[test]
    fn interpolates_between_frames() {
        let zone = SampleZone {
            root_pitch: 60,
            sample_rate: 44100,
            frames: vec![0.0, 1.0].into(),
        };
        assert_eq!(zone.frame_at(0.5), Some(0.5));
        assert_eq!(zone.frame_at(1.0), Some(1.0));
        assert_eq!(zone.frame_at(2.0), None);
    }

    #[test]
    fn loads_a_directory_of_notes() {
        let root = std::env::temp_dir().join(format!("chordcast-samples-{}", std::process::id()));
        let dir = root.join(InstrumentKind::Bass.dir_name());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("A1.wav"), make_wav(int_spec(1, 44100, 16), &[0, 1000, 2000])).unwrap();
        fs::write(dir.join("Ds2.wav"), extensible_wav(&[0, -1000])).unwrap();
        fs::write(dir.join("notes.txt"), b"ignored").unwrap();

        let bank = WavDirLoader::new(&root).load(InstrumentKind::Bass).unwrap();
        assert_eq!(bank.len(), 2);
        assert_eq!(bank.nearest(33).unwrap().root_pitch, 33);
        assert_eq!(bank.nearest(40).unwrap().root_pitch, 39);

        let missing = WavDirLoader::new(&root).load(InstrumentKind::Piano);
        assert!(matches!(missing, Err(LoadError::Io(_))));

        let guitar = root.join(InstrumentKind::Guitar.dir_name());
        fs::create_dir_all(&guitar).unwrap();
        fs::write(guitar.join("E2.wav"), b"RIFF....").unwrap();
        let broken = WavDirLoader::new(&root).load(InstrumentKind::Guitar);
        assert!(matches!(broken, Err(LoadError::InvalidWav { .. })));
        fs::remove_dir_all(&root).ok();
    }
}
