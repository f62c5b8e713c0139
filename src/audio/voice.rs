use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ADSRConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeState {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    Release { time: f32, from: f32 },
    Finished,
}

/// Per-voice ADSR state, advanced one frame at a time from the output callback.
#[derive(Debug, Clone)]
pub struct Envelope {
    state: EnvelopeState,
    level: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self::new()
    }
}

impl Envelope {
    pub fn new() -> Self {
        Self {
            state: EnvelopeState::Attack { time: 0.0 },
            level: 0.0,
        }
    }

    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_finished(&self) -> bool {
        self.state == EnvelopeState::Finished
    }

    pub fn is_releasing(&self) -> bool {
        matches!(
            self.state,
            EnvelopeState::Release { .. } | EnvelopeState::Finished
        )
    }

    /// Starts the release stage from whatever level the envelope is at.
    pub fn release(&mut self) {
        if !self.is_releasing() {
            self.state = EnvelopeState::Release {
                time: 0.0,
                from: self.level,
            };
        }
    }

    pub fn advance(&mut self, adsr: &ADSRConfig, dt: f32) -> f32 {
        self.state = match self.state {
            EnvelopeState::Attack { time } => {
                let time = time + dt;
                if time >= adsr.attack {
                    self.level = 1.0;
                    EnvelopeState::Decay { time: 0.0 }
                } else {
                    self.level = time / adsr.attack;
                    EnvelopeState::Attack { time }
                }
            }
            EnvelopeState::Decay { time } => {
                let time = time + dt;
                if time >= adsr.decay {
                    self.level = adsr.sustain;
                    EnvelopeState::Sustain
                } else {
                    self.level = 1.0 - (1.0 - adsr.sustain) * (time / adsr.decay);
                    EnvelopeState::Decay { time }
                }
            }
            EnvelopeState::Sustain => {
                self.level = adsr.sustain;
                EnvelopeState::Sustain
            }
            EnvelopeState::Release { time, from } => {
                let time = time + dt;
                if time >= adsr.release {
                    self.level = 0.0;
                    EnvelopeState::Finished
                } else {
                    self.level = from * (1.0 - time / adsr.release);
                    EnvelopeState::Release { time, from }
                }
            }
            EnvelopeState::Finished => {
                self.level = 0.0;
                EnvelopeState::Finished
            }
        };
        self.level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adsr() -> ADSRConfig {
        ADSRConfig {
            attack: 0.1,
            decay: 0.1,
            sustain: 0.5,
            release: 0.2,
        }
    }

    #[test]
    fn walks_through_every_stage() {
        let adsr = adsr();
        let mut env = Envelope::new();

        env.advance(&adsr, 0.05);
        assert!((env.level() - 0.5).abs() < 1e-6);

        env.advance(&adsr, 0.05);
        assert_eq!(env.level(), 1.0);
        assert_eq!(env.state(), EnvelopeState::Decay { time: 0.0 });

        env.advance(&adsr, 0.1);
        assert_eq!(env.state(), EnvelopeState::Sustain);
        env.advance(&adsr, 1.0);
        assert_eq!(env.level(), 0.5);

        env.release();
        env.advance(&adsr, 0.1);
        assert!((env.level() - 0.25).abs() < 1e-6);
        env.advance(&adsr, 0.1);
        assert!(env.is_finished());
        assert_eq!(env.level(), 0.0);
    }

    #[test]
    fn release_during_attack_starts_from_current_level() {
        let adsr = adsr();
        let mut env = Envelope::new();
        env.advance(&adsr, 0.02);
        let level = env.level();

        env.release();
        assert_eq!(env.state(), EnvelopeState::Release { time: 0.0, from: level });

        // A second release does not restart the stage
        env.advance(&adsr, 0.1);
        env.release();
        assert!(matches!(env.state(), EnvelopeState::Release { time, .. } if time > 0.0));
    }

    #[test]
    fn zero_length_stages_are_skipped() {
        let adsr = ADSRConfig {
            attack: 0.0,
            decay: 0.0,
            sustain: 0.8,
            release: 0.0,
        };
        let mut env = Envelope::new();
        env.advance(&adsr, 0.001);
        env.advance(&adsr, 0.001);
        assert_eq!(env.level(), 0.8);

        env.release();
        env.advance(&adsr, 0.001);
        assert!(env.is_finished());
    }
}
