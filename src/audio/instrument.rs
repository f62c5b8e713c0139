use serde::{Deserialize, Serialize};

use super::ADSRConfig;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Square,
    Saw,
}

impl Wave {
    /// `phase` in [0, 1)
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Wave::Sine => (phase * 2.0 * std::f32::consts::PI).sin(),
            Wave::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Wave::Saw => phase * 2.0 - 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OscConfig {
    pub wave: Wave,
    pub gain: f32,
    pub semitone: i8,
}

/// Oscillator stack behind a synthesized voice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthPatch {
    pub oscillators: Vec<OscConfig>,
    pub adsr: ADSRConfig,
    /// A new note cuts off the one still sounding
    #[serde(default)]
    pub mono: bool,
}

impl SynthPatch {
    /// Per-oscillator phase increments for `pitch`, in cycles per frame.
    pub fn phase_steps(&self, pitch: u8, sample_rate: f32) -> Vec<f32> {
        self.oscillators
            .iter()
            .map(|osc| {
                let note = (pitch as i16 + osc.semitone as i16).clamp(0, 127) as u8;
                super::midi_to_freq(note) / sample_rate
            })
            .collect()
    }
}
