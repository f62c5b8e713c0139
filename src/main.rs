use std::path::PathBuf;
use std::sync::Arc;

use chordcast::audio::{CaptureSink, SampleLoader, WavDirLoader};
use chordcast::{
    AudioEngineContext, Composition, EngineConfig, InstrumentChoice, InstrumentKind,
    InstrumentSelections, Role, Transport, TransportEvent, export,
};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Plays a generated composition through the chordcast engine
#[derive(Parser, Debug)]
#[command(name = "chordcast")]
#[command(version)]
struct Args {
    /// Composition JSON as produced by the generation service
    composition: PathBuf,

    /// Engine configuration (RON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Tempo override in BPM
    #[arg(long)]
    tempo: Option<f64>,

    /// Chord instrument: program number or piano/guitar/bass/synth
    #[arg(long)]
    chords: Option<InstrumentChoice>,

    #[arg(long)]
    melody: Option<InstrumentChoice>,

    #[arg(long)]
    bass: Option<InstrumentChoice>,

    /// Directory holding piano/, guitar-acoustic/ and bass-electric/ samples
    #[arg(long)]
    samples: Option<PathBuf>,

    /// Also write the composition as a MIDI file
    #[arg(long)]
    export: Option<PathBuf>,

    /// Run the full schedule without opening an audio device
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chordcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    let text = std::fs::read_to_string(&args.composition)?;
    let composition = Composition::from_json(&text, config.default_tempo)?;

    let mut selections = InstrumentSelections::default();
    selections.apply(composition.suggested_instruments());
    for (role, choice) in [
        (Role::Chord, &args.chords),
        (Role::Melody, &args.melody),
        (Role::Bass, &args.bass),
    ] {
        if let Some(program) = choice.as_ref().and_then(InstrumentChoice::program) {
            selections.set(role, program);
        }
    }

    if let Some(path) = &args.export {
        export::write_smf(path, &composition, &selections)?;
    }

    let context = Arc::new(AudioEngineContext::new(config));

    if let Some(root) = &args.samples {
        let loader: Arc<dyn SampleLoader> = Arc::new(WavDirLoader::new(root));
        for kind in InstrumentKind::ALL {
            context.registry().spawn_load(kind, loader.clone());
        }
    }

    let capture = Arc::new(CaptureSink::new());
    if args.dry_run {
        context.initialize_with_sink(capture.clone());
    } else {
        context.initialize()?;
    }

    let transport = Transport::new(context);
    let events = transport.subscribe();
    let session = transport.start_at_tempo(&composition, &selections, args.tempo)?;
    info!(
        "Playing {} notes over {} beats at {} BPM",
        session.notes, session.total_beats, session.tempo_bpm
    );

    for event in events.iter() {
        match event {
            TransportEvent::NoteTriggered {
                role,
                note,
                source,
                fallback_used,
                ..
            } => {
                let marker = if fallback_used { " (fallback)" } else { "" };
                println!("{:<7} {:<4} {}{}", role.label(), note, source, marker);
            }
            TransportEvent::SessionEnded { reason } => {
                info!("Finished: {:?}", reason);
                break;
            }
            _ => {}
        }
    }

    if args.dry_run {
        info!("{} notes captured", capture.started().len());
    }

    Ok(())
}
