use std::path::PathBuf;

use thiserror::Error;

use crate::audio::SourceId;

/// Errors surfaced to callers of the engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Normalization left nothing to play
    #[error("composition has no playable events")]
    EmptyComposition,

    /// `start()` was called before the one-time audio initialization
    #[error("audio output is not initialized")]
    NotInitialized,

    #[error("invalid composition payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("audio output error: {0}")]
    AudioOutput(String),

    #[error("MIDI export error: {0}")]
    Export(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// A single note failed to sound. Never fatal for a session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TriggerError {
    #[error("malformed note name `{0}`")]
    MalformedNote(String),

    #[error("pitch {pitch} is outside the range of {instrument}")]
    OutOfRange { pitch: u8, instrument: SourceId },

    #[error("{0} has no samples loaded")]
    NotLoaded(SourceId),

    #[error("audio output is not initialized")]
    NotInitialized,

    #[error("voice queue is full")]
    QueueFull,
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid WAV data in {}: {source}", .path.display())]
    InvalidWav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("no usable samples under {}", .0.display())]
    NoSamples(PathBuf),
}
