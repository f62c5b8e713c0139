use arc_swap::ArcSwapOption;
use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::JoinHandle;
use tracing::{info, warn};

use super::{InstrumentKind, PitchRange, Program};
use crate::audio::{
    NoteStart, OutputBus, SampleBank, SampleLoader, SoundSource, SourceId, Timbre, VoiceCommand,
    parse_note_name,
};
use crate::composition::Role;
use crate::error::TriggerError;

/// Sample loading progress. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Readiness {
    Unloaded = 0,
    Loading = 1,
    Ready = 2,
}

impl Readiness {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Readiness::Unloaded,
            1 => Readiness::Loading,
            _ => Readiness::Ready,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessChange {
    pub kind: InstrumentKind,
    pub readiness: Readiness,
}

/// Sample-backed instrument. Unready until its bank has been delivered.
pub struct SampledInstrument {
    kind: InstrumentKind,
    range: PitchRange,
    readiness: AtomicU8,
    bank: ArcSwapOption<SampleBank>,
    bus: Arc<OutputBus>,
}

impl SampledInstrument {
    fn new(kind: InstrumentKind, bus: Arc<OutputBus>) -> Self {
        Self {
            kind,
            range: kind.range(),
            readiness: AtomicU8::new(Readiness::Unloaded as u8),
            bank: ArcSwapOption::empty(),
            bus,
        }
    }

    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    pub fn range(&self) -> PitchRange {
        self.range
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::from_u8(self.readiness.load(Ordering::Acquire))
    }

    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    pub fn covers(&self, pitch: u8) -> bool {
        self.range.contains(pitch)
    }

    /// Unloaded -> Loading. False if loading already began.
    fn begin_loading(&self) -> bool {
        self.readiness
            .compare_exchange(
                Readiness::Unloaded as u8,
                Readiness::Loading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Publishes the bank, then flips to Ready. False if it was already Ready.
    fn complete(&self, bank: SampleBank) -> bool {
        if self.is_ready() {
            return false;
        }
        self.bank.store(Some(Arc::new(bank)));
        self.readiness.swap(Readiness::Ready as u8, Ordering::AcqRel) != Readiness::Ready as u8
    }
}

impl SoundSource for SampledInstrument {
    fn id(&self) -> SourceId {
        SourceId::Sampled(self.kind)
    }

    fn trigger(
        &self,
        note: &str,
        duration: f64,
        at: f64,
        velocity: f32,
    ) -> Result<(), TriggerError> {
        let pitch = parse_note_name(note)?;
        if !self.range.contains(pitch) {
            return Err(TriggerError::OutOfRange {
                pitch,
                instrument: self.id(),
            });
        }
        let zone = self
            .bank
            .load_full()
            .and_then(|bank| bank.nearest(pitch))
            .ok_or(TriggerError::NotLoaded(self.id()))?;

        self.bus.submit(VoiceCommand::Start(NoteStart {
            source: self.id(),
            pitch,
            velocity,
            at,
            duration,
            timbre: Timbre::Sample(zone),
        }))
    }

    fn release_all(&self) {
        if let Err(e) = self.bus.submit(VoiceCommand::ReleaseAll(self.id())) {
            warn!("Could not release {}: {}", self.id(), e);
        }
    }
}

/// Every sampled instrument and its readiness. Readiness flags are written by
/// loader threads and read lock-free at trigger time.
pub struct InstrumentRegistry {
    instruments: Vec<Arc<SampledInstrument>>,
    watchers: Mutex<Vec<Sender<ReadinessChange>>>,
}

impl InstrumentRegistry {
    pub fn new(bus: Arc<OutputBus>) -> Self {
        Self {
            instruments: InstrumentKind::ALL
                .iter()
                .map(|kind| Arc::new(SampledInstrument::new(*kind, bus.clone())))
                .collect(),
            watchers: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, kind: InstrumentKind) -> &Arc<SampledInstrument> {
        // ALL order is the construction order
        let index = InstrumentKind::ALL
            .iter()
            .position(|k| *k == kind)
            .unwrap_or_default();
        &self.instruments[index]
    }

    pub fn instruments(&self) -> &[Arc<SampledInstrument>] {
        &self.instruments
    }

    /// The sampled instrument that plays `program` on `role`, ready or not.
    pub fn lookup(&self, role: Role, program: Program) -> Option<&Arc<SampledInstrument>> {
        InstrumentKind::for_program(role, program).map(|kind| self.get(kind))
    }

    pub fn range_of(&self, role: Role, program: Program) -> Option<PitchRange> {
        self.lookup(role, program).map(|instrument| instrument.range())
    }

    pub fn readiness(&self, kind: InstrumentKind) -> Readiness {
        self.get(kind).readiness()
    }

    pub fn snapshot(&self) -> Vec<(InstrumentKind, Readiness)> {
        self.instruments
            .iter()
            .map(|instrument| (instrument.kind(), instrument.readiness()))
            .collect()
    }

    pub fn subscribe(&self) -> Receiver<ReadinessChange> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.watchers.lock().push(tx);
        rx
    }

    pub fn begin_loading(&self, kind: InstrumentKind) -> bool {
        let started = self.get(kind).begin_loading();
        if started {
            self.notify(kind, Readiness::Loading);
        }
        started
    }

    /// Delivers a loaded bank. Ready is final; later deliveries are ignored.
    pub fn mark_ready(&self, kind: InstrumentKind, bank: SampleBank) -> bool {
        let instrument = self.get(kind);
        if instrument.readiness() == Readiness::Unloaded {
            self.begin_loading(kind);
        }
        let changed = instrument.complete(bank);
        if changed {
            info!("{} loaded", kind);
            self.notify(kind, Readiness::Ready);
        }
        changed
    }

    /// Runs `loader` for `kind` on a background thread. A failed load leaves the
    /// instrument in Loading, so playback keeps using the synthesized fallback.
    pub fn spawn_load(
        self: &Arc<Self>,
        kind: InstrumentKind,
        loader: Arc<dyn SampleLoader>,
    ) -> Option<JoinHandle<()>> {
        if !self.begin_loading(kind) {
            return None;
        }
        info!("Loading {} samples...", kind);

        let registry = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name(format!("chordcast-load-{}", kind.dir_name()))
            .spawn(move || match loader.load(kind) {
                Ok(bank) => {
                    registry.mark_ready(kind, bank);
                }
                Err(e) => warn!("Failed to load {} samples: {}", kind, e),
            });

        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Could not start loader for {}: {}", kind, e);
                None
            }
        }
    }

    fn notify(&self, kind: InstrumentKind, readiness: Readiness) {
        let change = ReadinessChange { kind, readiness };
        self.watchers.lock().retain(|tx| tx.send(change).is_ok());
    }
}
