mod humanize;
mod playhead;
mod transport;

pub use humanize::Humanizer;
pub use playhead::PlayheadPublisher;
pub use transport::{
    CallbackHandle, PlannedNote, SessionInfo, Transport, TransportProbe, TransportState, plan,
};

use std::time::Instant;

/// Monotonic context clock. Every absolute time in the engine is seconds on
/// this clock.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    origin: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    /// The instant a context time refers to
    pub fn instant_at(&self, seconds: f64) -> Instant {
        self.origin + std::time::Duration::from_secs_f64(seconds.max(0.0))
    }
}
