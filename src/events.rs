use crossbeam::channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::SourceId;
use crate::composition::Role;
use crate::error::TriggerError;
use crate::timing::TransportState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// `stop()` was called
    Stopped,
    /// Auto-stop after the last note
    Completed,
    /// A new session took over
    Replaced,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(TransportState),
    NoteTriggered {
        role: Role,
        pitch: u8,
        note: String,
        source: SourceId,
        fallback_used: bool,
    },
    NoteSkipped {
        role: Role,
        pitch: u8,
        reason: TriggerError,
    },
    SessionEnded {
        reason: EndReason,
    },
}

/// Fan-out of transport notifications. Subscribers that hang up are dropped
/// on the next publish.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<TransportEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: TransportEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
