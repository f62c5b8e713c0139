mod instrument;
mod mixer;
mod output;
mod sampler;
mod source;
mod voice;

pub use instrument::{OscConfig, SynthPatch, Wave};
pub use mixer::Mixer;
pub use output::{CaptureSink, DeviceOutput, NoteStart, OutputBus, Timbre, VoiceCommand, VoiceSink};
pub use sampler::{SampleBank, SampleLoader, SampleZone, WavDirLoader};
pub use source::{SoundSource, SourceId, SynthesizedVoice};
pub use voice::{ADSRConfig, Envelope, EnvelopeState};

use crate::error::TriggerError;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// 60 -> "C4"
pub fn note_name(pitch: u8) -> String {
    let octave = pitch as i32 / 12 - 1;
    format!("{}{}", NOTE_NAMES[pitch as usize % 12], octave)
}

/// Parses scientific pitch notation ("C4", "F#2", "Bb3", "Ds1") into a MIDI pitch.
pub fn parse_note_name(name: &str) -> Result<u8, TriggerError> {
    let malformed = || TriggerError::MalformedNote(name.to_string());

    let mut chars = name.chars();
    let letter = chars.next().ok_or_else(malformed)?;
    let base: i32 = match letter.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return Err(malformed()),
    };

    let rest = chars.as_str();
    let (shift, octave) = match rest.chars().next() {
        Some('#') | Some('s') => (1, &rest[1..]),
        Some('b') => (-1, &rest[1..]),
        _ => (0, rest),
    };
    let octave: i32 = octave.parse().map_err(|_| malformed())?;

    let pitch = (octave + 1) * 12 + base + shift;
    u8::try_from(pitch)
        .ok()
        .filter(|p| *p <= 127)
        .ok_or_else(malformed)
}
