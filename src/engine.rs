use crossbeam::channel::{Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::composition::{Composition, Role};
use crate::context::AudioEngineContext;
use crate::events::TransportEvent;
use crate::export;
use crate::instruments::{InstrumentChoice, InstrumentSelections};
use crate::timing::{Transport, TransportState};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    Load(Composition),
    Play,
    Stop,
    SetInstrument { role: Role, choice: InstrumentChoice },
    /// `None` returns to the composition's own tempo
    SetTempo(Option<f64>),
    Export(PathBuf),
    /// The one-time, user-initiated audio start
    InitializeAudio,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineUpdate {
    CompositionLoaded {
        events: usize,
        tempo_bpm: f64,
        total_beats: f64,
    },
    PlaybackState {
        state: TransportState,
    },
    LastNote {
        name: String,
    },
    Instruments(InstrumentSelections),
    Exported(PathBuf),
    Error {
        message: String,
    },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
}

pub fn spawn_engine(context: Arc<AudioEngineContext>) -> EngineHandle {
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    std::thread::spawn(move || {
        engine_thread(context, command_rx, update_tx);
    });

    EngineHandle {
        command_tx,
        update_rx,
    }
}

struct EngineState {
    transport: Transport,
    composition: Option<Composition>,
    selections: InstrumentSelections,
    tempo_override: Option<f64>,
}

fn engine_thread(
    context: Arc<AudioEngineContext>,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    let transport = Transport::new(context);
    let transport_rx = transport.subscribe();
    let mut state = EngineState {
        transport,
        composition: None,
        selections: InstrumentSelections::default(),
        tempo_override: None,
    };

    loop {
        crossbeam::select! {
            recv(command_rx) -> command => match command {
                Ok(command) => handle_command(&mut state, command, &update_tx),
                Err(crossbeam::channel::RecvError) => break,
            },
            recv(transport_rx) -> event => {
                if let Ok(event) = event {
                    forward_event(event, &update_tx);
                }
            }
        }
    }

    state.transport.stop();
    debug!("Engine thread finished");
}

fn handle_command(state: &mut EngineState, command: EngineCommand, update_tx: &Sender<EngineUpdate>) {
    let error = |message: String| {
        let _ = update_tx.send(EngineUpdate::Error { message });
    };

    match command {
        EngineCommand::Load(composition) => {
            // A new composition always replaces what is playing
            state.transport.stop();
            state.selections.apply(composition.suggested_instruments());

            info!(
                "Composition loaded: {} events at {} BPM",
                composition.len(),
                composition.tempo_bpm()
            );
            let _ = update_tx.send(EngineUpdate::CompositionLoaded {
                events: composition.len(),
                tempo_bpm: composition.tempo_bpm(),
                total_beats: composition.total_beats(),
            });
            let _ = update_tx.send(EngineUpdate::Instruments(state.selections));
            state.composition = Some(composition);
        }

        EngineCommand::Play => {
            let Some(ref composition) = state.composition else {
                error("Nothing to play: load a composition first".into());
                return;
            };
            let context = state.transport.context();
            if !context.is_initialized() {
                if let Err(e) = context.initialize() {
                    error(format!("Failed to start audio: {}", e));
                    return;
                }
            }
            if let Err(e) =
                state
                    .transport
                    .start_at_tempo(composition, &state.selections, state.tempo_override)
            {
                error(format!("Failed to start playback: {}", e));
            }
        }

        EngineCommand::Stop => state.transport.stop(),

        EngineCommand::SetInstrument { role, choice } => match choice.program() {
            Some(program) => {
                state.selections.set(role, program);
                let _ = update_tx.send(EngineUpdate::Instruments(state.selections));
            }
            None => error(format!("Unknown instrument {:?} for {}", choice, role.label())),
        },

        EngineCommand::SetTempo(tempo) => {
            state.tempo_override = tempo.filter(|bpm| bpm.is_finite() && *bpm > 0.0);
        }

        EngineCommand::Export(path) => {
            let Some(ref composition) = state.composition else {
                error("Nothing to export: load a composition first".into());
                return;
            };
            match export::write_smf(&path, composition, &state.selections) {
                Ok(()) => {
                    let _ = update_tx.send(EngineUpdate::Exported(path));
                }
                Err(e) => error(format!("Failed to export MIDI: {}", e)),
            }
        }

        EngineCommand::InitializeAudio => {
            if let Err(e) = state.transport.context().initialize() {
                error(format!("Failed to start audio: {}", e));
            }
        }
    }
}

fn forward_event(event: TransportEvent, update_tx: &Sender<EngineUpdate>) {
    let update = match event {
        TransportEvent::StateChanged(state) => EngineUpdate::PlaybackState { state },
        TransportEvent::NoteTriggered { note, .. } => EngineUpdate::LastNote { name: note },
        TransportEvent::NoteSkipped { role, pitch, reason } => {
            debug!("{} note {} skipped: {}", role.label(), pitch, reason);
            return;
        }
        TransportEvent::SessionEnded { .. } => return,
    };
    let _ = update_tx.send(update);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::CaptureSink;
    use crate::config::EngineConfig;
    use std::time::Duration;

    fn engine() -> EngineHandle {
        let context = Arc::new(AudioEngineContext::new(EngineConfig {
            start_lead: 0.0,
            ..EngineConfig::default()
        }));
        context.initialize_with_sink(Arc::new(CaptureSink::new()));
        spawn_engine(context)
    }

    fn composition() -> Composition {
        Composition::from_json(
            r#"{"melody": [{"note": 69, "time": 0, "duration": 0.25}], "tempo": 240,
                "instruments": {"melody": "guitar"}}"#,
            120.0,
        )
        .unwrap()
    }

    fn wait_for(handle: &EngineHandle, matches: impl Fn(&EngineUpdate) -> bool) -> EngineUpdate {
        loop {
            let update = handle
                .update_rx
                .recv_timeout(Duration::from_secs(2))
                .unwrap();
            if matches(&update) {
                return update;
            }
        }
    }

    #[test]
    fn load_applies_suggested_instruments() {
        let handle = engine();
        handle.command_tx.send(EngineCommand::Load(composition())).unwrap();

        let loaded = wait_for(&handle, |u| matches!(u, EngineUpdate::CompositionLoaded { .. }));
        assert_eq!(
            loaded,
            EngineUpdate::CompositionLoaded {
                events: 1,
                tempo_bpm: 240.0,
                total_beats: 0.25,
            }
        );
        let EngineUpdate::Instruments(selections) =
            wait_for(&handle, |u| matches!(u, EngineUpdate::Instruments(_)))
        else {
            unreachable!()
        };
        assert_eq!(selections.melody, 24);
    }

    #[test]
    fn play_reports_notes_and_completion() {
        let handle = engine();
        handle.command_tx.send(EngineCommand::Load(composition())).unwrap();
        handle.command_tx.send(EngineCommand::Play).unwrap();

        wait_for(&handle, |u| {
            *u == EngineUpdate::PlaybackState {
                state: TransportState::Playing,
            }
        });
        let note = wait_for(&handle, |u| matches!(u, EngineUpdate::LastNote { .. }));
        assert_eq!(note, EngineUpdate::LastNote { name: "A4".into() });

        // One sixteenth at 240 BPM plus the trailing margin
        wait_for(&handle, |u| {
            *u == EngineUpdate::PlaybackState {
                state: TransportState::Idle,
            }
        });
    }

    #[test]
    fn play_without_a_composition_is_an_error() {
        let handle = engine();
        handle.command_tx.send(EngineCommand::Play).unwrap();
        assert!(matches!(
            wait_for(&handle, |_| true),
            EngineUpdate::Error { .. }
        ));
    }

    #[test]
    fn unknown_instrument_is_reported() {
        let handle = engine();
        handle
            .command_tx
            .send(EngineCommand::SetInstrument {
                role: Role::Bass,
                choice: InstrumentChoice::Named("kazoo".into()),
            })
            .unwrap();
        assert!(matches!(
            wait_for(&handle, |_| true),
            EngineUpdate::Error { .. }
        ));

        handle
            .command_tx
            .send(EngineCommand::SetInstrument {
                role: Role::Bass,
                choice: InstrumentChoice::Program(34),
            })
            .unwrap();
        let EngineUpdate::Instruments(selections) = wait_for(&handle, |_| true) else {
            unreachable!()
        };
        assert_eq!(selections.bass, 34);
    }

    #[test]
    fn export_writes_a_file() {
        let handle = engine();
        let path = std::env::temp_dir().join(format!("chordcast-engine-{}.mid", std::process::id()));
        handle.command_tx.send(EngineCommand::Load(composition())).unwrap();
        handle.command_tx.send(EngineCommand::Export(path.clone())).unwrap();

        assert_eq!(
            wait_for(&handle, |u| matches!(u, EngineUpdate::Exported(_))),
            EngineUpdate::Exported(path.clone())
        );
        std::fs::remove_file(&path).ok();
    }
}
