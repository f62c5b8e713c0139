use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam::channel::Sender;
use parking_lot::{Mutex, RwLock};
use ringbuf::{HeapProd, HeapRb, traits::Producer, traits::Split};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

use super::{Mixer, SampleZone, SourceId, SynthPatch};
use crate::config::OutputConfig;
use crate::error::{EngineError, Result, TriggerError};
use crate::timing::Clock;

#[derive(Debug, Clone)]
pub enum Timbre {
    Synth(Arc<SynthPatch>),
    Sample(Arc<SampleZone>),
}

#[derive(Debug, Clone)]
pub struct NoteStart {
    pub source: SourceId,
    pub pitch: u8,
    pub velocity: f32,
    /// Context clock seconds
    pub at: f64,
    /// Seconds
    pub duration: f64,
    pub timbre: Timbre,
}

#[derive(Debug, Clone)]
pub enum VoiceCommand {
    Start(NoteStart),
    /// Drops queued notes of this source and releases its sounding voices now
    ReleaseAll(SourceId),
}

/// Where sound sources deliver their notes.
pub trait VoiceSink: Send + Sync {
    fn submit(&self, command: VoiceCommand) -> std::result::Result<(), TriggerError>;
}

/// The single output bus shared by every sound source. Empty until the audio
/// output has been initialized.
#[derive(Default)]
pub struct OutputBus {
    sink: RwLock<Option<Arc<dyn VoiceSink>>>,
}

impl OutputBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, sink: Arc<dyn VoiceSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn detach(&self) -> Option<Arc<dyn VoiceSink>> {
        self.sink.write().take()
    }

    pub fn is_installed(&self) -> bool {
        self.sink.read().is_some()
    }

    pub fn submit(&self, command: VoiceCommand) -> std::result::Result<(), TriggerError> {
        match self.sink.read().as_ref() {
            Some(sink) => sink.submit(command),
            None => Err(TriggerError::NotInitialized),
        }
    }
}

/// Records every command instead of sounding it. Backs headless sessions.
#[derive(Debug, Default)]
pub struct CaptureSink {
    commands: Mutex<Vec<VoiceCommand>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<VoiceCommand> {
        self.commands.lock().clone()
    }

    pub fn started(&self) -> Vec<NoteStart> {
        self.commands
            .lock()
            .iter()
            .filter_map(|command| match command {
                VoiceCommand::Start(note) => Some(note.clone()),
                VoiceCommand::ReleaseAll(_) => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }
}

impl VoiceSink for CaptureSink {
    fn submit(&self, command: VoiceCommand) -> std::result::Result<(), TriggerError> {
        self.commands.lock().push(command);
        Ok(())
    }
}

struct RingSink {
    producer: Mutex<HeapProd<VoiceCommand>>,
}

impl VoiceSink for RingSink {
    fn submit(&self, command: VoiceCommand) -> std::result::Result<(), TriggerError> {
        self.producer
            .lock()
            .try_push(command)
            .map_err(|_| TriggerError::QueueFull)
    }
}

/// The default output device, driven from a dedicated thread that owns the
/// cpal stream for as long as this handle lives.
pub struct DeviceOutput {
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl DeviceOutput {
    pub fn open(config: &OutputConfig, clock: Clock) -> Result<(Self, Arc<dyn VoiceSink>)> {
        let ring = HeapRb::<VoiceCommand>::new(config.voice_queue_capacity.max(1));
        let (producer, consumer) = ring.split();

        let (ready_tx, ready_rx) = crossbeam::channel::bounded::<Result<u32>>(1);
        let (shutdown_tx, shutdown_rx) = crossbeam::channel::bounded::<()>(1);
        let settings = config.clone();

        let thread = std::thread::Builder::new()
            .name("chordcast-output".into())
            .spawn(move || match build_stream(&settings, Mixer::new(consumer, &settings, clock)) {
                Ok((stream, sample_rate)) => {
                    let _ = ready_tx.send(Ok(sample_rate));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| EngineError::AudioOutput("output thread exited".into()))??;

        let sink: Arc<dyn VoiceSink> = Arc::new(RingSink {
            producer: Mutex::new(producer),
        });

        Ok((
            Self {
                shutdown_tx,
                thread: Some(thread),
                sample_rate,
            },
            sink,
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_stream(settings: &OutputConfig, mut mixer: Mixer) -> Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| EngineError::AudioOutput("no output device".into()))?;

    let preferred = settings.sample_rate.and_then(|rate| {
        device.supported_output_configs().ok()?.find_map(|range| {
            let fits = range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= rate
                && range.max_sample_rate().0 >= rate;
            fits.then(|| range.with_sample_rate(cpal::SampleRate(rate)))
        })
    });
    let supported = match preferred {
        Some(config) => config,
        None => device.default_output_config().map_err(output_error)?,
    };

    let sample_rate = supported.sample_rate().0;
    let stream_config: cpal::StreamConfig = supported.into();
    mixer.configure(sample_rate as f32, stream_config.channels as usize);

    info!(
        "Audio output: {} channels, {} Hz",
        stream_config.channels, sample_rate
    );

    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| mixer.render(data),
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(output_error)?;
    stream.play().map_err(output_error)?;

    Ok((stream, sample_rate))
}

fn output_error(e: impl std::fmt::Display) -> EngineError {
    EngineError::AudioOutput(e.to_string())
}
