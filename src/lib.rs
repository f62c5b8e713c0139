pub mod audio;
pub mod composition;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod instruments;
pub mod timing;

pub use composition::{Composition, NoteEvent, Role};
pub use config::EngineConfig;
pub use context::AudioEngineContext;
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine};
pub use error::{EngineError, LoadError, Result, TriggerError};
pub use events::{EndReason, EventBus, TransportEvent};
pub use instruments::{InstrumentChoice, InstrumentKind, InstrumentSelections, Readiness};
pub use timing::{PlayheadPublisher, Transport, TransportState};
