//! Session lifecycle and the clock thread that fires scheduled entries.
//!
//! A session is planned in one go: every note becomes a pending entry keyed by
//! its fire time, plus a final entry that ends the session. The clock thread
//! sleeps until the earliest entry is due and takes it out under the session
//! lock. Notes fire with the lock held. Scheduled callbacks run with it
//! released, under the `firing` lock instead, which `stop()` waits on, so
//! `stop()` returning still means nothing from that session can fire again.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info};

use crate::audio::note_name;
use crate::composition::{Composition, Role};
use crate::config::EngineConfig;
use crate::context::AudioEngineContext;
use crate::error::{EngineError, Result};
use crate::events::{EndReason, EventBus, TransportEvent};
use crate::instruments::{Dispatch, InstrumentSelections, TriggerRequest};

const MAX_VELOCITY: f32 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Scheduling,
    Playing,
    Stopping,
}

impl TransportState {
    pub fn is_live(self) -> bool {
        matches!(self, TransportState::Scheduling | TransportState::Playing)
    }
}

/// A note placed on the session timeline, before humanization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedNote {
    pub role: Role,
    pub pitch: u8,
    /// Seconds from beat zero
    pub start: f64,
    /// Seconds
    pub duration: f64,
    pub velocity: f32,
}

/// Converts beats to seconds at a fixed tempo. Keeps the composition's order.
pub fn plan(composition: &Composition, tempo_bpm: f64) -> Vec<PlannedNote> {
    let seconds_per_beat = EngineConfig::seconds_per_beat(tempo_bpm);
    composition
        .events()
        .iter()
        .map(|event| PlannedNote {
            role: event.role,
            pitch: event.pitch,
            start: event.start_beat * seconds_per_beat,
            duration: event.duration_beats * seconds_per_beat,
            velocity: event.velocity,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionInfo {
    pub id: u64,
    pub tempo_bpm: f64,
    /// Context time of beat zero
    pub starts_at: f64,
    pub total_beats: f64,
    pub notes: usize,
}

/// Identifies one pending entry of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackHandle {
    session: u64,
    key: Key,
}

/// (fire time in nanoseconds of context time, insertion order)
type Key = (u64, u64);

type Callback = Box<dyn FnOnce(f64) + Send>;

enum Entry {
    Note {
        role: Role,
        pitch: u8,
        duration: f64,
        velocity: f32,
    },
    Callback(Callback),
    Finish,
}

struct Pending {
    /// Context time the entry's sound belongs to
    at: f64,
    entry: Entry,
}

struct Session {
    id: u64,
    state: TransportState,
    pending: BTreeMap<Key, Pending>,
    next_seq: u64,
    starts_at: Option<f64>,
    tempo_bpm: f64,
    total_beats: f64,
    selections: InstrumentSelections,
    shutdown: bool,
}

impl Session {
    fn insert(&mut self, fire_at: f64, at: f64, entry: Entry) -> Key {
        let key = ((fire_at.max(0.0) * 1e9) as u64, self.next_seq);
        self.next_seq += 1;
        self.pending.insert(key, Pending { at, entry });
        key
    }
}

struct Shared {
    context: Arc<AudioEngineContext>,
    events: EventBus,
    session: Mutex<Session>,
    wake: Condvar,
    /// Held by the clock thread while a scheduled callback runs
    firing: Mutex<()>,
}

impl Shared {
    fn set_state(&self, session: &mut Session, state: TransportState) {
        if session.state != state {
            session.state = state;
            self.events.publish(TransportEvent::StateChanged(state));
        }
    }

    /// Cancels everything pending, silences every voice and returns to Idle.
    fn teardown(&self, session: &mut Session, reason: EndReason) {
        self.set_state(session, TransportState::Stopping);
        let cancelled = session.pending.len();
        session.pending.clear();
        session.starts_at = None;
        self.context.release_all();
        self.set_state(session, TransportState::Idle);

        info!(
            "Session {} ended ({:?}, {} entries cancelled)",
            session.id, reason, cancelled
        );
        self.events.publish(TransportEvent::SessionEnded { reason });
    }

    /// Fires a note or ends the session. A callback is handed back to run
    /// once the session is unlocked.
    fn fire(&self, session: &mut Session, pending: Pending) -> Option<(Callback, f64)> {
        match pending.entry {
            Entry::Note {
                role,
                pitch,
                duration,
                velocity,
            } => {
                let request = TriggerRequest {
                    role,
                    program: session.selections.for_role(role),
                    pitch,
                    duration,
                    at: pending.at,
                    velocity,
                };
                let event = match self.context.resolver().dispatch(&request) {
                    Dispatch::Played {
                        source,
                        fallback_used,
                    } => TransportEvent::NoteTriggered {
                        role,
                        pitch,
                        note: note_name(pitch),
                        source,
                        fallback_used,
                    },
                    Dispatch::Skipped { error } => TransportEvent::NoteSkipped {
                        role,
                        pitch,
                        reason: error,
                    },
                };
                self.events.publish(event);
            }
            Entry::Callback(callback) => return Some((callback, pending.at)),
            Entry::Finish => self.teardown(session, EndReason::Completed),
        }
        None
    }
}

/// Plays one composition at a time against the shared audio context.
///
/// Scheduled callbacks run on the transport's clock thread with the session
/// unlocked, so they may read the transport or stop it.
pub struct Transport {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Transport {
    pub fn new(context: Arc<AudioEngineContext>) -> Self {
        let shared = Arc::new(Shared {
            context,
            events: EventBus::new(),
            session: Mutex::new(Session {
                id: 0,
                state: TransportState::Idle,
                pending: BTreeMap::new(),
                next_seq: 0,
                starts_at: None,
                tempo_bpm: 0.0,
                total_beats: 0.0,
                selections: InstrumentSelections::default(),
                shutdown: false,
            }),
            wake: Condvar::new(),
            firing: Mutex::new(()),
        });

        let clock_shared = shared.clone();
        let thread = std::thread::spawn(move || clock_thread(clock_shared));

        Self {
            shared,
            thread: Some(thread),
        }
    }

    pub fn context(&self) -> &Arc<AudioEngineContext> {
        &self.shared.context
    }

    pub fn start(
        &self,
        composition: &Composition,
        selections: &InstrumentSelections,
    ) -> Result<SessionInfo> {
        self.start_at_tempo(composition, selections, None)
    }

    /// Starts a session, replacing any live one. `tempo` overrides the
    /// composition's own tempo for this session.
    pub fn start_at_tempo(
        &self,
        composition: &Composition,
        selections: &InstrumentSelections,
        tempo: Option<f64>,
    ) -> Result<SessionInfo> {
        if composition.is_empty() {
            return Err(EngineError::EmptyComposition);
        }
        let context = &self.shared.context;
        if !context.is_initialized() {
            return Err(EngineError::NotInitialized);
        }
        let config = context.config();
        let tempo_bpm = tempo
            .filter(|bpm| bpm.is_finite() && *bpm > 0.0)
            .unwrap_or(composition.tempo_bpm());

        {
            let mut session = self.shared.session.lock();
            if session.state.is_live() {
                self.shared.teardown(&mut session, EndReason::Replaced);
            }
        }
        self.wait_for_callback();

        let mut session = self.shared.session.lock();
        if session.state.is_live() {
            self.shared.teardown(&mut session, EndReason::Replaced);
        }

        session.id += 1;
        session.tempo_bpm = tempo_bpm;
        session.total_beats = composition.total_beats();
        session.selections = *selections;
        self.shared.set_state(&mut session, TransportState::Scheduling);

        let starts_at = context.now() + config.start_lead;
        let ahead = config.schedule_ahead;
        let notes = plan(composition, tempo_bpm);
        for note in &notes {
            let at = starts_at + context.humanizer().humanize(note.start, note.role);
            let gain = config.role_gain.for_role(note.role);
            session.insert(
                at - ahead,
                at,
                Entry::Note {
                    role: note.role,
                    pitch: note.pitch,
                    duration: note.duration,
                    velocity: (note.velocity * gain).clamp(0.0, MAX_VELOCITY),
                },
            );
        }

        let ends_at = starts_at
            + composition.total_beats() * EngineConfig::seconds_per_beat(tempo_bpm)
            + config.trailing_margin;
        session.insert(ends_at, ends_at, Entry::Finish);

        session.starts_at = Some(starts_at);
        self.shared.set_state(&mut session, TransportState::Playing);
        self.shared.wake.notify_all();

        info!(
            "Session {} playing {} notes at {} BPM",
            session.id,
            notes.len(),
            tempo_bpm
        );

        Ok(SessionInfo {
            id: session.id,
            tempo_bpm,
            starts_at,
            total_beats: composition.total_beats(),
            notes: notes.len(),
        })
    }

    /// Ends the live session. Nothing it scheduled fires after this returns.
    /// A no-op while idle.
    pub fn stop(&self) {
        {
            let mut session = self.shared.session.lock();
            if session.state == TransportState::Idle {
                return;
            }
            self.shared.teardown(&mut session, EndReason::Stopped);
            self.shared.wake.notify_all();
        }
        self.wait_for_callback();
    }

    /// Blocks until a callback already taken off the queue has returned. A
    /// callback stopping its own transport is not waited for.
    fn wait_for_callback(&self) {
        let on_clock = self
            .thread
            .as_ref()
            .is_some_and(|t| t.thread().id() == std::thread::current().id());
        if !on_clock {
            drop(self.shared.firing.lock());
        }
    }

    pub fn state(&self) -> TransportState {
        self.shared.session.lock().state
    }

    /// Entries still waiting to fire, not counting the end-of-session marker.
    pub fn pending_count(&self) -> usize {
        pending_notes(&self.shared.session.lock())
    }

    pub fn position_beats(&self) -> f64 {
        position(&self.shared)
    }

    /// Runs `callback` at `offset` seconds after beat zero of the live session.
    /// The callback receives the exact context time it was scheduled for.
    pub fn schedule(
        &self,
        offset: f64,
        callback: impl FnOnce(f64) + Send + 'static,
    ) -> Option<CallbackHandle> {
        let mut session = self.shared.session.lock();
        let starts_at = session.starts_at?;
        if !session.state.is_live() {
            return None;
        }

        let at = starts_at + offset.max(0.0);
        let ahead = self.shared.context.config().schedule_ahead;
        let key = session.insert(at - ahead, at, Entry::Callback(Box::new(callback)));
        self.shared.wake.notify_all();

        Some(CallbackHandle {
            session: session.id,
            key,
        })
    }

    /// False if the entry already fired or belongs to an ended session.
    pub fn cancel(&self, handle: CallbackHandle) -> bool {
        let mut session = self.shared.session.lock();
        if handle.session != session.id {
            return false;
        }
        session.pending.remove(&handle.key).is_some()
    }

    pub fn subscribe(&self) -> crossbeam::channel::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn probe(&self) -> TransportProbe {
        TransportProbe {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        {
            let mut session = self.shared.session.lock();
            if session.state.is_live() {
                self.shared.teardown(&mut session, EndReason::Stopped);
            }
            session.shutdown = true;
            self.shared.wake.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Read-only view of a transport for pollers.
#[derive(Clone)]
pub struct TransportProbe {
    shared: Arc<Shared>,
}

impl TransportProbe {
    pub fn state(&self) -> TransportState {
        self.shared.session.lock().state
    }

    pub fn position_beats(&self) -> f64 {
        position(&self.shared)
    }

    pub fn total_beats(&self) -> f64 {
        self.shared.session.lock().total_beats
    }
}

fn pending_notes(session: &Session) -> usize {
    session
        .pending
        .values()
        .filter(|p| !matches!(p.entry, Entry::Finish))
        .count()
}

/// Beats elapsed since beat zero; 0 while idle or during the lead-in.
fn position(shared: &Shared) -> f64 {
    let (starts_at, tempo_bpm) = {
        let session = shared.session.lock();
        match session.starts_at {
            Some(starts_at) => (starts_at, session.tempo_bpm),
            None => return 0.0,
        }
    };
    let elapsed = shared.context.now() - starts_at;
    (elapsed / EngineConfig::seconds_per_beat(tempo_bpm)).max(0.0)
}

fn clock_thread(shared: Arc<Shared>) {
    let clock = shared.context.clock();
    let mut session = shared.session.lock();

    loop {
        if session.shutdown {
            break;
        }
        let Some(&(fire_nanos, _)) = session.pending.keys().next() else {
            shared.wake.wait(&mut session);
            continue;
        };

        let due = clock.instant_at(fire_nanos as f64 / 1e9);
        if Instant::now() < due {
            shared.wake.wait_until(&mut session, due);
            continue;
        }

        let Some((_, pending)) = session.pending.pop_first() else {
            continue;
        };
        if let Some((callback, at)) = shared.fire(&mut session, pending) {
            // Taken before unlocking, so a racing stop() waits for this callback
            let _firing = shared.firing.lock();
            MutexGuard::unlocked(&mut session, || callback(at));
        }
    }
    debug!("Transport clock stopped");
}
