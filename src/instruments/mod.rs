mod registry;
mod resolver;

pub use registry::{InstrumentRegistry, Readiness, ReadinessChange, SampledInstrument};
pub use resolver::{Dispatch, Resolver, TriggerRequest};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::composition::Role;

/// General MIDI program number
pub type Program = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrumentKind {
    Piano,
    Guitar,
    Bass,
}

impl InstrumentKind {
    pub const ALL: [InstrumentKind; 3] = [
        InstrumentKind::Piano,
        InstrumentKind::Guitar,
        InstrumentKind::Bass,
    ];

    /// Range covered by the recorded samples
    pub fn range(self) -> PitchRange {
        match self {
            InstrumentKind::Piano => PitchRange::new(21, 108),
            InstrumentKind::Guitar => PitchRange::new(45, 72),
            InstrumentKind::Bass => PitchRange::new(28, 55),
        }
    }

    /// Directory name used by sample loaders
    pub fn dir_name(self) -> &'static str {
        match self {
            InstrumentKind::Piano => "piano",
            InstrumentKind::Guitar => "guitar-acoustic",
            InstrumentKind::Bass => "bass-electric",
        }
    }

    /// Which sampled instrument, if any, plays `program` on `role`.
    pub fn for_program(role: Role, program: Program) -> Option<InstrumentKind> {
        match role {
            Role::Chord | Role::Melody => match program {
                0..=7 | 16..=23 => Some(InstrumentKind::Piano),
                24..=31 => Some(InstrumentKind::Guitar),
                _ => None,
            },
            Role::Bass => match program {
                32..=39 => Some(InstrumentKind::Bass),
                _ => None,
            },
        }
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::Piano => write!(f, "grand piano"),
            InstrumentKind::Guitar => write!(f, "acoustic guitar"),
            InstrumentKind::Bass => write!(f, "electric bass"),
        }
    }
}

/// Inclusive MIDI pitch range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PitchRange {
    pub min: u8,
    pub max: u8,
}

impl PitchRange {
    pub const fn new(min: u8, max: u8) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, pitch: u8) -> bool {
        (self.min..=self.max).contains(&pitch)
    }
}

/// Instrument chosen by the user per role. Independent of the generation
/// settings and kept across sessions until changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSelections {
    pub chords: Program,
    pub melody: Program,
    pub bass: Program,
}

impl Default for InstrumentSelections {
    fn default() -> Self {
        Self {
            chords: 0,
            melody: 0,
            bass: 33,
        }
    }
}

impl InstrumentSelections {
    pub fn for_role(&self, role: Role) -> Program {
        match role {
            Role::Chord => self.chords,
            Role::Melody => self.melody,
            Role::Bass => self.bass,
        }
    }

    pub fn set(&mut self, role: Role, program: Program) {
        match role {
            Role::Chord => self.chords = program,
            Role::Melody => self.melody = program,
            Role::Bass => self.bass = program,
        }
    }

    /// Overlay suggestions from a loaded composition. Unknown names are ignored.
    pub fn apply(&mut self, suggested: &SuggestedInstruments) {
        for role in Role::ALL {
            if let Some(program) = suggested.for_role(role).and_then(InstrumentChoice::program) {
                self.set(role, program);
            }
        }
    }
}

/// An instrument named either by program number or by a short name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InstrumentChoice {
    Program(Program),
    Named(String),
}

impl InstrumentChoice {
    pub fn program(&self) -> Option<Program> {
        match self {
            InstrumentChoice::Program(program) if *program <= 127 => Some(*program),
            InstrumentChoice::Program(_) => None,
            InstrumentChoice::Named(name) => match name.to_ascii_lowercase().as_str() {
                "piano" => Some(0),
                "guitar" => Some(24),
                "bass" => Some(33),
                "synth" => Some(81),
                other => other.parse::<Program>().ok().filter(|p| *p <= 127),
            },
        }
    }
}

impl std::str::FromStr for InstrumentChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let choice = match s.parse::<Program>() {
            Ok(program) => InstrumentChoice::Program(program),
            Err(_) => InstrumentChoice::Named(s.to_string()),
        };
        match choice.program() {
            Some(_) => Ok(choice),
            None => Err(format!("unknown instrument `{}`", s)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestedInstruments {
    #[serde(default)]
    pub chords: Option<InstrumentChoice>,
    #[serde(default)]
    pub melody: Option<InstrumentChoice>,
    #[serde(default)]
    pub bass: Option<InstrumentChoice>,
}

impl SuggestedInstruments {
    pub fn for_role(&self, role: Role) -> Option<&InstrumentChoice> {
        match role {
            Role::Chord => self.chords.as_ref(),
            Role::Melody => self.melody.as_ref(),
            Role::Bass => self.bass.as_ref(),
        }
    }
}
