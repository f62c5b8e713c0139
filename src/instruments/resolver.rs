use std::sync::Arc;

use tracing::warn;

use super::{InstrumentRegistry, Program};
use crate::audio::{SoundSource, SourceId, SynthesizedVoice, note_name};
use crate::composition::Role;
use crate::error::TriggerError;

/// One note about to sound, fully timed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriggerRequest {
    pub role: Role,
    pub program: Program,
    pub pitch: u8,
    /// Seconds
    pub duration: f64,
    /// Context clock seconds
    pub at: f64,
    pub velocity: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// `fallback_used` is set when the resolved source faulted and the role's
    /// synthesized voice stood in for it.
    Played {
        source: SourceId,
        fallback_used: bool,
    },
    Skipped {
        error: TriggerError,
    },
}

/// Picks the sound source for each note at trigger time.
///
/// Priority: the selected sampled instrument when it is ready and covers the
/// pitch, otherwise the role's synthesized voice. Chords and melody share the
/// polyphonic voice; bass has its own.
pub struct Resolver {
    registry: Arc<InstrumentRegistry>,
    poly: Arc<SynthesizedVoice>,
    bass: Arc<SynthesizedVoice>,
}

impl Resolver {
    pub fn new(
        registry: Arc<InstrumentRegistry>,
        poly: Arc<SynthesizedVoice>,
        bass: Arc<SynthesizedVoice>,
    ) -> Self {
        Self {
            registry,
            poly,
            bass,
        }
    }

    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    pub fn fallback(&self, role: Role) -> Arc<dyn SoundSource> {
        match role {
            Role::Chord | Role::Melody => self.poly.clone(),
            Role::Bass => self.bass.clone(),
        }
    }

    /// Pure in the registry's current readiness snapshot.
    pub fn resolve(&self, role: Role, program: Program, pitch: u8) -> Arc<dyn SoundSource> {
        match self.registry.lookup(role, program) {
            Some(instrument) if instrument.is_ready() && instrument.covers(pitch) => {
                instrument.clone()
            }
            _ => self.fallback(role),
        }
    }

    /// Resolves and triggers one note. A faulting source is retried once on the
    /// role's fallback; a note that still fails is skipped.
    pub fn dispatch(&self, request: &TriggerRequest) -> Dispatch {
        let source = self.resolve(request.role, request.program, request.pitch);
        let note = note_name(request.pitch);

        let error = match source.trigger(&note, request.duration, request.at, request.velocity) {
            Ok(()) => {
                return Dispatch::Played {
                    source: source.id(),
                    fallback_used: false,
                };
            }
            Err(e) => e,
        };

        let fallback = self.fallback(request.role);
        if fallback.id() == source.id() {
            warn!("Skipping {} {}: {}", request.role.label(), note, error);
            return Dispatch::Skipped { error };
        }

        warn!(
            "{} failed on {} ({}), retrying on {}",
            note,
            source.id(),
            error,
            fallback.id()
        );
        match fallback.trigger(&note, request.duration, request.at, request.velocity) {
            Ok(()) => Dispatch::Played {
                source: fallback.id(),
                fallback_used: true,
            },
            Err(error) => {
                warn!("Skipping {} {}: {}", request.role.label(), note, error);
                Dispatch::Skipped { error }
            }
        }
    }

    /// Silences every source this resolver can hand out.
    pub fn release_all(&self) {
        self.poly.release_all();
        self.bass.release_all();
        for instrument in self.registry.instruments() {
            instrument.release_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        CaptureSink, OutputBus, SampleBank, SampleZone, Timbre, VoiceCommand, VoiceSink,
    };
    use crate::config::EngineConfig;
    use crate::instruments::InstrumentKind;
    use parking_lot::Mutex;

    fn bank() -> SampleBank {
        SampleBank::new(vec![SampleZone {
            root_pitch: 60,
            sample_rate: 44100,
            frames: vec![0.0; 16].into(),
        }])
    }

    fn resolver_with(sink: Arc<dyn VoiceSink>) -> Resolver {
        let config = EngineConfig::default();
        let bus = Arc::new(OutputBus::new());
        bus.install(sink);
        let registry = Arc::new(InstrumentRegistry::new(bus.clone()));
        Resolver::new(
            registry,
            Arc::new(SynthesizedVoice::new(
                SourceId::PolySynth,
                config.poly_patch,
                bus.clone(),
            )),
            Arc::new(SynthesizedVoice::new(
                SourceId::BassSynth,
                config.bass_patch,
                bus,
            )),
        )
    }

    fn request(role: Role, program: Program, pitch: u8) -> TriggerRequest {
        TriggerRequest {
            role,
            program,
            pitch,
            duration: 0.5,
            at: 0.0,
            velocity: 0.8,
        }
    }

    #[test]
    fn unready_instrument_falls_back() {
        let resolver = resolver_with(Arc::new(CaptureSink::new()));
        assert_eq!(resolver.resolve(Role::Chord, 0, 60).id(), SourceId::PolySynth);
        assert_eq!(resolver.resolve(Role::Bass, 33, 40).id(), SourceId::BassSynth);

        resolver.registry().begin_loading(InstrumentKind::Piano);
        assert_eq!(resolver.resolve(Role::Chord, 0, 60).id(), SourceId::PolySynth);
    }

    #[test]
    fn ready_instrument_in_range_is_used() {
        let resolver = resolver_with(Arc::new(CaptureSink::new()));
        resolver.registry().mark_ready(InstrumentKind::Guitar, bank());

        assert_eq!(
            resolver.resolve(Role::Melody, 25, 60).id(),
            SourceId::Sampled(InstrumentKind::Guitar)
        );
    }

    #[test]
    fn out_of_range_pitch_always_falls_back() {
        let resolver = resolver_with(Arc::new(CaptureSink::new()));
        resolver.registry().mark_ready(InstrumentKind::Guitar, bank());
        resolver.registry().mark_ready(InstrumentKind::Bass, bank());

        for pitch in [0, 44, 73, 127] {
            assert_eq!(resolver.resolve(Role::Melody, 24, pitch).id(), SourceId::PolySynth);
        }
        assert_eq!(resolver.resolve(Role::Bass, 33, 27).id(), SourceId::BassSynth);
        assert_eq!(resolver.resolve(Role::Bass, 33, 56).id(), SourceId::BassSynth);
    }

    #[test]
    fn unmapped_program_uses_the_synth() {
        let resolver = resolver_with(Arc::new(CaptureSink::new()));
        for kind in InstrumentKind::ALL {
            resolver.registry().mark_ready(kind, bank());
        }
        assert_eq!(resolver.resolve(Role::Chord, 81, 60).id(), SourceId::PolySynth);
        assert_eq!(resolver.resolve(Role::Bass, 0, 40).id(), SourceId::BassSynth);
    }

    #[test]
    fn resolution_is_deterministic() {
        let resolver = resolver_with(Arc::new(CaptureSink::new()));
        resolver.registry().mark_ready(InstrumentKind::Piano, bank());

        for role in Role::ALL {
            for program in [0, 20, 24, 33, 81] {
                for pitch in [20, 21, 50, 108, 109] {
                    let first = resolver.resolve(role, program, pitch).id();
                    for _ in 0..3 {
                        assert_eq!(resolver.resolve(role, program, pitch).id(), first);
                    }
                }
            }
        }
    }

    /// Refuses sampled notes, accepts everything else.
    #[derive(Default)]
    struct NoSamplesSink {
        accepted: Mutex<Vec<VoiceCommand>>,
    }

    impl VoiceSink for NoSamplesSink {
        fn submit(&self, command: VoiceCommand) -> Result<(), TriggerError> {
            if let VoiceCommand::Start(note) = &command {
                if matches!(note.timbre, Timbre::Sample(_)) {
                    return Err(TriggerError::QueueFull);
                }
            }
            self.accepted.lock().push(command);
            Ok(())
        }
    }

    #[test]
    fn faulting_source_is_retried_on_the_fallback() {
        let sink = Arc::new(NoSamplesSink::default());
        let resolver = resolver_with(sink.clone());
        resolver.registry().mark_ready(InstrumentKind::Piano, bank());

        let dispatch = resolver.dispatch(&request(Role::Chord, 0, 60));
        assert_eq!(
            dispatch,
            Dispatch::Played {
                source: SourceId::PolySynth,
                fallback_used: true,
            }
        );
        assert_eq!(sink.accepted.lock().len(), 1);
    }

    #[derive(Default)]
    struct RejectingSink {
        attempts: Mutex<usize>,
    }

    impl VoiceSink for RejectingSink {
        fn submit(&self, _command: VoiceCommand) -> Result<(), TriggerError> {
            *self.attempts.lock() += 1;
            Err(TriggerError::QueueFull)
        }
    }

    #[test]
    fn failing_fallback_skips_the_note_without_a_second_try() {
        let sink = Arc::new(RejectingSink::default());
        let resolver = resolver_with(sink.clone());

        let dispatch = resolver.dispatch(&request(Role::Bass, 33, 40));
        assert_eq!(
            dispatch,
            Dispatch::Skipped {
                error: TriggerError::QueueFull
            }
        );
        assert_eq!(*sink.attempts.lock(), 1);
    }

    #[test]
    fn sampled_then_fallback_both_failing_is_skipped() {
        let sink = Arc::new(RejectingSink::default());
        let resolver = resolver_with(sink.clone());
        resolver.registry().mark_ready(InstrumentKind::Guitar, bank());

        let dispatch = resolver.dispatch(&request(Role::Melody, 24, 60));
        assert!(matches!(dispatch, Dispatch::Skipped { .. }));
        assert_eq!(*sink.attempts.lock(), 2);
    }

    #[test]
    fn dispatch_sends_the_exact_time_and_velocity() {
        let capture = Arc::new(CaptureSink::new());
        let resolver = resolver_with(capture.clone());
        let mut req = request(Role::Melody, 0, 72);
        req.at = 3.25;

        assert_eq!(
            resolver.dispatch(&req),
            Dispatch::Played {
                source: SourceId::PolySynth,
                fallback_used: false,
            }
        );
        let started = capture.started();
        assert_eq!(started[0].pitch, 72);
        assert_eq!(started[0].at, 3.25);
        assert_eq!(started[0].velocity, 0.8);
    }
}
