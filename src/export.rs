//! Standard MIDI File export of a normalized composition.

use midly::num::{u4, u7, u15, u24, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::fs;
use std::path::Path;
use tracing::info;

use crate::composition::{Composition, Role};
use crate::error::{EngineError, Result};
use crate::instruments::InstrumentSelections;

pub const TICKS_PER_BEAT: u16 = 480;

fn channel(role: Role) -> u8 {
    match role {
        Role::Chord => 0,
        Role::Melody => 1,
        Role::Bass => 2,
    }
}

/// Format 1: a tempo track, then one track per role that has notes.
pub fn to_smf_bytes(composition: &Composition, selections: &InstrumentSelections) -> Result<Vec<u8>> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_BEAT)),
    ));

    let micros_per_beat = (60_000_000.0 / composition.tempo_bpm()).round() as u32;
    smf.tracks.push(vec![
        meta(0, MetaMessage::Tempo(u24::new(micros_per_beat.min(0xFF_FFFF)))),
        meta(0, MetaMessage::EndOfTrack),
    ]);

    for role in Role::ALL {
        let mut notes = composition.events_for(role).peekable();
        if notes.peek().is_none() {
            continue;
        }
        let channel = u4::new(channel(role));

        // (tick, is_on, message); offs sort before ons at the same tick
        let mut timeline: Vec<(u64, bool, MidiMessage)> = Vec::new();
        for note in notes {
            let key = u7::new(note.pitch.min(127));
            let vel = u7::new(((note.velocity * 127.0).round() as u8).clamp(1, 127));
            timeline.push((to_ticks(note.start_beat), true, MidiMessage::NoteOn { key, vel }));
            timeline.push((
                to_ticks(note.end_beat()),
                false,
                MidiMessage::NoteOff {
                    key,
                    vel: u7::new(0),
                },
            ));
        }
        timeline.sort_by_key(|(tick, is_on, _)| (*tick, *is_on));

        let mut track = vec![
            meta(0, MetaMessage::TrackName(role.label().as_bytes())),
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel,
                    message: MidiMessage::ProgramChange {
                        program: u7::new(selections.for_role(role).min(127)),
                    },
                },
            },
        ];

        let mut last = 0;
        for (tick, _, message) in timeline {
            let delta = (tick - last).min(0x0FFF_FFFF) as u32;
            last = tick;
            track.push(TrackEvent {
                delta: u28::new(delta),
                kind: TrackEventKind::Midi { channel, message },
            });
        }
        track.push(meta(0, MetaMessage::EndOfTrack));
        smf.tracks.push(track);
    }

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes)
        .map_err(|e| EngineError::Export(e.to_string()))?;
    Ok(bytes)
}

pub fn write_smf(
    path: &Path,
    composition: &Composition,
    selections: &InstrumentSelections,
) -> Result<()> {
    let bytes = to_smf_bytes(composition, selections)?;
    fs::write(path, &bytes)?;
    info!("Exported {} bytes of MIDI to {}", bytes.len(), path.display());
    Ok(())
}

fn to_ticks(beats: f64) -> u64 {
    (beats * TICKS_PER_BEAT as f64).round().max(0.0) as u64
}

fn meta(delta: u32, message: MetaMessage<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn composition() -> Composition {
        Composition::from_json(
            r#"{
                "chords": [{"note": 60, "time": 0, "duration": 2}, {"note": 64, "time": 0, "duration": 2}],
                "bass": [{"note": 36, "time": 1, "duration": 1, "velocity": 127}],
                "tempo": 100
            }"#,
            120.0,
        )
        .unwrap()
    }

    #[test]
    fn one_track_per_role_with_notes() {
        let bytes = to_smf_bytes(&composition(), &InstrumentSelections::default()).unwrap();
        assert_eq!(&bytes[0..4], b"MThd");

        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.format, Format::Parallel);
        assert_eq!(smf.header.timing, Timing::Metrical(u15::new(480)));
        // tempo + chords + bass; melody is empty
        assert_eq!(smf.tracks.len(), 3);
        assert!(smf.tracks[0].iter().any(|e| matches!(
            e.kind,
            TrackEventKind::Meta(MetaMessage::Tempo(t)) if t.as_int() == 600_000
        )));
    }

    #[test]
    fn bass_track_carries_program_channel_and_timing() {
        let bytes = to_smf_bytes(&composition(), &InstrumentSelections::default()).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        let bass = &smf.tracks[2];

        let program = bass.iter().find_map(|e| match e.kind {
            TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange { program },
            } => Some((channel.as_int(), program.as_int())),
            _ => None,
        });
        assert_eq!(program, Some((2, 33)));

        let mut tick = 0;
        let mut on_at = None;
        for event in bass {
            tick += event.delta.as_int();
            if let TrackEventKind::Midi {
                message: MidiMessage::NoteOn { key, vel },
                ..
            } = event.kind
            {
                assert_eq!(key.as_int(), 36);
                assert_eq!(vel.as_int(), 127);
                on_at = Some(tick);
            }
        }
        assert_eq!(on_at, Some(480));
        assert_eq!(tick, 960);
    }

    #[test]
    fn writes_to_disk() {
        let path = std::env::temp_dir().join(format!("chordcast-{}.mid", std::process::id()));
        write_smf(&path, &composition(), &InstrumentSelections::default()).unwrap();
        assert!(fs::metadata(&path).unwrap().len() > 14);
        fs::remove_file(&path).ok();
    }
}
