use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

use crate::audio::{DeviceOutput, OutputBus, SourceId, SynthesizedVoice, VoiceSink};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::instruments::{InstrumentRegistry, Resolver};
use crate::timing::{Clock, Humanizer};

/// The audio graph: one clock, one output bus, the instrument registry and
/// the fallback voices. Built once and shared by reference with the transport.
///
/// Sound stays off until [`initialize`](Self::initialize) (or a headless sink)
/// has been installed on the bus.
pub struct AudioEngineContext {
    config: EngineConfig,
    clock: Clock,
    bus: Arc<OutputBus>,
    registry: Arc<InstrumentRegistry>,
    resolver: Resolver,
    humanizer: Humanizer,
    device: Mutex<Option<DeviceOutput>>,
}

impl AudioEngineContext {
    pub fn new(config: EngineConfig) -> Self {
        let bus = Arc::new(OutputBus::new());
        let registry = Arc::new(InstrumentRegistry::new(bus.clone()));
        let poly = SynthesizedVoice::new(SourceId::PolySynth, config.poly_patch.clone(), bus.clone());
        let bass = SynthesizedVoice::new(SourceId::BassSynth, config.bass_patch.clone(), bus.clone());
        let resolver = Resolver::new(registry.clone(), Arc::new(poly), Arc::new(bass));

        Self {
            humanizer: Humanizer::new(config.humanize_window),
            clock: Clock::new(),
            config,
            bus,
            registry,
            resolver,
            device: Mutex::new(None),
        }
    }

    /// Opens the default output device. Safe to call again once it succeeded.
    pub fn initialize(&self) -> Result<()> {
        let mut device = self.device.lock();
        if device.is_some() {
            return Ok(());
        }
        let (output, sink) = DeviceOutput::open(&self.config.output, self.clock)?;
        info!("Audio initialized at {} Hz", output.sample_rate());
        self.bus.install(sink);
        *device = Some(output);
        Ok(())
    }

    /// Routes all sound to `sink` instead of a device.
    pub fn initialize_with_sink(&self, sink: Arc<dyn VoiceSink>) {
        self.bus.install(sink);
    }

    pub fn is_initialized(&self) -> bool {
        self.bus.is_installed()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<OutputBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<InstrumentRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn humanizer(&self) -> &Humanizer {
        &self.humanizer
    }

    /// Forces every sounding or queued voice to release now.
    pub fn release_all(&self) {
        self.resolver.release_all();
    }
}
