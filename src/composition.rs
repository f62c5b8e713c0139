//! Normalization of generated compositions into typed note events.
//!
//! The generation service answers in one of three shapes:
//! - a bare JSON array of chord blocks (`[{notes, duration}]`) laid out back to back
//! - an object with `chords` / `melody` / `bass` event streams and a `tempo`
//! - an object carrying only a `progression` array of blocks
//!
//! Parsing is lenient: an entry that fails its shape checks is dropped and
//! logged, never surfaced as an error. Only a composition with nothing left to
//! play is rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::instruments::{InstrumentChoice, SuggestedInstruments};

const DEFAULT_BLOCK_BEATS: f64 = 4.0;
const DEFAULT_VELOCITY: f64 = 80.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Chord,
    Melody,
    Bass,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Chord, Role::Melody, Role::Bass];

    /// Bass is the rhythmic anchor and keeps exact timing
    pub fn is_humanized(self) -> bool {
        !matches!(self, Role::Bass)
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Chord => "Chords",
            Role::Melody => "Melody",
            Role::Bass => "Bass",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteEvent {
    pub pitch: u8,
    pub start_beat: f64,
    pub duration_beats: f64,
    /// 0.0 -> 1.0
    pub velocity: f32,
    pub role: Role,
}

impl NoteEvent {
    pub fn end_beat(&self) -> f64 {
        self.start_beat + self.duration_beats
    }
}

/// A normalized composition. Events are grouped by role (chords, melody, bass)
/// and each group is ordered by start beat, ties keeping their source order.
#[derive(Debug, Clone)]
pub struct Composition {
    events: Vec<NoteEvent>,
    tempo_bpm: f64,
    total_beats: f64,
    suggested: SuggestedInstruments,
}

impl Composition {
    pub fn from_json(text: &str, default_tempo: f64) -> Result<Self> {
        let payload: CompositionPayload = serde_json::from_str(text)?;
        normalize(payload, default_tempo)
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    pub fn events_for(&self, role: Role) -> impl Iterator<Item = &NoteEvent> {
        self.events.iter().filter(move |e| e.role == role)
    }

    pub fn tempo_bpm(&self) -> f64 {
        self.tempo_bpm
    }

    pub fn total_beats(&self) -> f64 {
        self.total_beats
    }

    pub fn suggested_instruments(&self) -> &SuggestedInstruments {
        &self.suggested
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Raw payload as received from the generation service.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CompositionPayload {
    Blocks(Vec<Value>),
    Streams(StreamPayload),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamPayload {
    #[serde(default)]
    pub chords: Option<Vec<Value>>,
    #[serde(default)]
    pub melody: Option<Vec<Value>>,
    #[serde(default)]
    pub bass: Option<Vec<Value>>,
    #[serde(default)]
    pub progression: Option<Vec<Value>>,
    #[serde(default)]
    pub tempo: Option<Value>,
    #[serde(default)]
    pub instruments: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    note: Option<f64>,
    time: Option<f64>,
    duration: Option<f64>,
    velocity: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    notes: Option<Vec<f64>>,
    duration: Option<f64>,
    velocity: Option<f64>,
}

pub fn normalize(payload: CompositionPayload, default_tempo: f64) -> Result<Composition> {
    let (mut events, tempo, suggested) = match payload {
        CompositionPayload::Blocks(blocks) => {
            (normalize_blocks(&blocks), None, SuggestedInstruments::default())
        }
        CompositionPayload::Streams(streams) => {
            let has_streams =
                streams.chords.is_some() || streams.melody.is_some() || streams.bass.is_some();
            let events = if has_streams {
                let mut events = Vec::new();
                for (role, stream) in [
                    (Role::Chord, &streams.chords),
                    (Role::Melody, &streams.melody),
                    (Role::Bass, &streams.bass),
                ] {
                    if let Some(stream) = stream {
                        events.extend(normalize_stream(stream, role));
                    }
                }
                events
            } else if let Some(progression) = &streams.progression {
                normalize_blocks(progression)
            } else {
                Vec::new()
            };
            let tempo = streams.tempo.as_ref().and_then(Value::as_f64);
            let suggested = streams
                .instruments
                .as_ref()
                .map(normalize_suggestions)
                .unwrap_or_default();
            (events, tempo, suggested)
        }
    };

    if events.is_empty() {
        return Err(EngineError::EmptyComposition);
    }

    // Stable: a role's simultaneous events keep their source order
    events.sort_by(|a, b| {
        role_rank(a.role)
            .cmp(&role_rank(b.role))
            .then(a.start_beat.total_cmp(&b.start_beat))
    });

    let tempo_bpm = match tempo {
        Some(bpm) if bpm.is_finite() && bpm > 0.0 => bpm,
        _ => default_tempo,
    };
    let total_beats = events.iter().map(NoteEvent::end_beat).fold(0.0, f64::max);

    debug!(
        "Normalized {} events at {} BPM over {} beats",
        events.len(),
        tempo_bpm,
        total_beats
    );

    Ok(Composition {
        events,
        tempo_bpm,
        total_beats,
        suggested,
    })
}

/// Each role's suggestion stands alone; a malformed one drops only itself.
fn normalize_suggestions(value: &Value) -> SuggestedInstruments {
    let choice = |key: &str| {
        let entry = value.get(key)?;
        match InstrumentChoice::deserialize(entry) {
            Ok(choice) => Some(choice),
            Err(e) => {
                debug!("Dropping {} instrument suggestion {}: {}", key, entry, e);
                None
            }
        }
    };
    SuggestedInstruments {
        chords: choice("chords"),
        melody: choice("melody"),
        bass: choice("bass"),
    }
}

fn role_rank(role: Role) -> u8 {
    match role {
        Role::Chord => 0,
        Role::Melody => 1,
        Role::Bass => 2,
    }
}

fn normalize_stream(stream: &[Value], role: Role) -> Vec<NoteEvent> {
    stream
        .iter()
        .filter_map(|value| {
            let event = RawEvent::deserialize(value).ok();
            let note = event.and_then(|raw| {
                let pitch = to_pitch(raw.note?)?;
                let start_beat = raw.time.filter(|t| t.is_finite() && *t >= 0.0)?;
                let duration_beats = raw.duration.filter(|d| d.is_finite() && *d > 0.0)?;
                Some(NoteEvent {
                    pitch,
                    start_beat,
                    duration_beats,
                    velocity: to_velocity(raw.velocity),
                    role,
                })
            });
            if note.is_none() {
                debug!("Dropping malformed {:?} event: {}", role, value);
            }
            note
        })
        .collect()
}

/// Blocks play back to back; each starts where the previous one ended.
fn normalize_blocks(blocks: &[Value]) -> Vec<NoteEvent> {
    let mut events = Vec::new();
    let mut cursor = 0.0;

    for value in blocks {
        let Ok(block) = RawBlock::deserialize(value) else {
            debug!("Dropping malformed chord block: {}", value);
            continue;
        };
        let duration = block.duration.unwrap_or(DEFAULT_BLOCK_BEATS);
        if !duration.is_finite() || duration <= 0.0 {
            debug!("Dropping chord block with duration {}", duration);
            continue;
        }

        let velocity = to_velocity(block.velocity);
        for note in block.notes.unwrap_or_default() {
            match to_pitch(note) {
                Some(pitch) => events.push(NoteEvent {
                    pitch,
                    start_beat: cursor,
                    duration_beats: duration,
                    velocity,
                    role: Role::Chord,
                }),
                None => debug!("Dropping chord note {}", note),
            }
        }
        cursor += duration;
    }

    events
}

fn to_pitch(note: f64) -> Option<u8> {
    let rounded = note.round();
    (rounded.is_finite() && (0.0..=127.0).contains(&rounded)).then_some(rounded as u8)
}

fn to_velocity(velocity: Option<f64>) -> f32 {
    let raw = velocity.filter(|v| v.is_finite()).unwrap_or(DEFAULT_VELOCITY);
    (raw / 127.0).clamp(0.0, 1.0) as f32
}
