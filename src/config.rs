use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::audio::{ADSRConfig, OscConfig, SynthPatch, Wave};
use crate::composition::Role;
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// BPM used when a composition carries no usable tempo
    pub default_tempo: f64,
    /// Seconds between `start()` and beat zero
    pub start_lead: f64,
    /// Seconds after the last note ends before the session stops itself
    pub trailing_margin: f64,
    /// Seconds a callback fires ahead of the audio time it schedules
    pub schedule_ahead: f64,
    /// Half-width of the humanization window, in seconds
    pub humanize_window: f64,
    pub playhead_interval_ms: u64,
    pub role_gain: RoleGain,
    pub output: OutputConfig,
    pub poly_patch: SynthPatch,
    pub bass_patch: SynthPatch,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleGain {
    pub chord: f32,
    pub melody: f32,
    pub bass: f32,
}

impl RoleGain {
    pub fn for_role(&self, role: Role) -> f32 {
        match role {
            Role::Chord => self.chord,
            Role::Melody => self.melody,
            Role::Bass => self.bass,
        }
    }
}

impl Default for RoleGain {
    fn default() -> Self {
        Self {
            chord: 0.9,
            melody: 1.0,
            bass: 1.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Preferred device rate; the device default is used when unset or unsupported
    pub sample_rate: Option<u32>,
    pub master_gain: f32,
    pub voice_queue_capacity: usize,
    pub max_polyphony: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_rate: None,
            master_gain: 0.5,
            voice_queue_capacity: 4096,
            max_polyphony: 12,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_tempo: 120.0,
            start_lead: 0.1,
            trailing_margin: 0.5,
            schedule_ahead: 0.025,
            humanize_window: 0.0075,
            playhead_interval_ms: 100,
            role_gain: RoleGain::default(),
            output: OutputConfig::default(),
            poly_patch: SynthPatch {
                oscillators: vec![
                    OscConfig {
                        wave: Wave::Sine,
                        gain: 0.6,
                        semitone: 0,
                    },
                    OscConfig {
                        wave: Wave::Sine,
                        gain: 0.15,
                        semitone: 19,
                    },
                ],
                adsr: ADSRConfig {
                    attack: 0.01,
                    decay: 0.5,
                    sustain: 0.1,
                    release: 1.2,
                },
                mono: false,
            },
            bass_patch: SynthPatch {
                oscillators: vec![OscConfig {
                    wave: Wave::Saw,
                    gain: 0.5,
                    semitone: 0,
                }],
                adsr: ADSRConfig {
                    attack: 0.05,
                    decay: 0.3,
                    sustain: 0.4,
                    release: 0.8,
                },
                mono: true,
            },
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        ron::from_str(&text).map_err(|e| EngineError::Config(e.to_string()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| EngineError::Config(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn seconds_per_beat(tempo_bpm: f64) -> f64 {
        60.0 / tempo_bpm
    }
}
