use std::fmt;
use std::sync::Arc;

use super::{NoteStart, OutputBus, SynthPatch, Timbre, VoiceCommand, parse_note_name};
use crate::error::TriggerError;
use crate::instruments::InstrumentKind;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// Shared by chords and melody
    PolySynth,
    BassSynth,
    Sampled(InstrumentKind),
}

impl SourceId {
    pub fn is_synth(self) -> bool {
        !matches!(self, SourceId::Sampled(_))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceId::PolySynth => write!(f, "poly synth"),
            SourceId::BassSynth => write!(f, "bass synth"),
            SourceId::Sampled(kind) => write!(f, "{} sampler", kind),
        }
    }
}

/// Anything that can sound a note.
pub trait SoundSource: Send + Sync {
    fn id(&self) -> SourceId;

    /// Sounds `note` ("C4") for `duration` seconds starting at context time `at`.
    fn trigger(&self, note: &str, duration: f64, at: f64, velocity: f32)
    -> Result<(), TriggerError>;

    /// Silences everything this source is playing or has queued.
    fn release_all(&self);
}

/// Oscillator voice. Always ready and plays any pitch.
pub struct SynthesizedVoice {
    id: SourceId,
    patch: Arc<SynthPatch>,
    bus: Arc<OutputBus>,
}

impl SynthesizedVoice {
    pub fn new(id: SourceId, patch: SynthPatch, bus: Arc<OutputBus>) -> Self {
        Self {
            id,
            patch: Arc::new(patch),
            bus,
        }
    }

    pub fn patch(&self) -> &SynthPatch {
        &self.patch
    }
}

impl SoundSource for SynthesizedVoice {
    fn id(&self) -> SourceId {
        self.id
    }

    fn trigger(
        &self,
        note: &str,
        duration: f64,
        at: f64,
        velocity: f32,
    ) -> Result<(), TriggerError> {
        let pitch = parse_note_name(note)?;
        self.bus.submit(VoiceCommand::Start(NoteStart {
            source: self.id,
            pitch,
            velocity,
            at,
            duration,
            timbre: Timbre::Synth(self.patch.clone()),
        }))
    }

    fn release_all(&self) {
        if let Err(e) = self.bus.submit(VoiceCommand::ReleaseAll(self.id)) {
            warn!("Could not release {}: {}", self.id, e);
        }
    }
}
