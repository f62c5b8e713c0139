use crossbeam::channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{TransportProbe, TransportState};

/// Samples the transport position on a fixed period for display. Purely
/// derived; scheduling never reads from it.
pub struct PlayheadPublisher {
    position: Arc<AtomicU64>,
    updates: Receiver<f64>,
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl PlayheadPublisher {
    pub fn spawn(probe: TransportProbe, interval: Duration) -> Self {
        let position = Arc::new(AtomicU64::new(0f64.to_bits()));
        let (update_tx, updates) = crossbeam::channel::bounded(64);
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(1);

        let shared = position.clone();
        let thread = std::thread::spawn(move || {
            let ticker = crossbeam::channel::tick(interval);
            loop {
                crossbeam::select! {
                    recv(shutdown_rx) -> _ => break,
                    recv(ticker) -> _ => {
                        let beats = match probe.state() {
                            TransportState::Playing => probe.position_beats(),
                            _ => 0.0,
                        };
                        shared.store(beats.to_bits(), Ordering::Relaxed);
                        // A slow reader just misses ticks
                        let _ = update_tx.try_send(beats);
                    }
                }
            }
        });

        Self {
            position,
            updates,
            shutdown_tx,
            thread: Some(thread),
        }
    }

    /// Beats since the session's beat zero as of the last tick.
    pub fn position_beats(&self) -> f64 {
        f64::from_bits(self.position.load(Ordering::Relaxed))
    }

    pub fn updates(&self) -> &Receiver<f64> {
        &self.updates
    }
}

impl Drop for PlayheadPublisher {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
