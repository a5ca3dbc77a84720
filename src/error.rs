//! Error types for cantoria.

use crate::engine::EngineError;
use crate::score::EngineId;
use thiserror::Error;

/// Error type for renderer-level operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid score snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("Invalid tempo map: {0}")]
    InvalidTempoMap(String),

    #[error("A render is already in progress")]
    RenderInProgress,

    #[error("No render is in progress")]
    NotRendering,

    #[error("Listener not found")]
    ListenerNotFound,

    #[error("Task graph is malformed: {0}")]
    Graph(#[from] crate::task::graph::GraphError),

    #[error("Failed to derive content key: {0}")]
    Key(#[from] KeyError),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure while serializing a key source bundle.
#[derive(Error, Debug)]
#[error("{0}")]
pub struct KeyError(#[from] pub serde_json::Error);

/// Failure of a single pipeline task. Isolated to that task's phrase;
/// the runner converts it into a `Failed` status and keeps going.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Engine request failed: {0}")]
    Engine(#[from] EngineError),

    #[error("Phrase has no singer")]
    MissingSinger,

    #[error("No frame rate registered for engine {0:?}")]
    UnknownEngine(EngineId),

    #[error("Query has no phonemes")]
    EmptyPhonemeList,

    #[error("Frame count mismatch: expected {expected}, got {actual}")]
    FrameCountMismatch { expected: i64, actual: i64 },

    #[error("Frame length {0} is below the one-frame minimum")]
    FrameLengthTooShort(i64),

    #[error("Final phoneme is {0:?}, expected a trailing pau")]
    MissingTrailingPau(String),

    #[error("Failed to derive content key: {0}")]
    Key(#[from] KeyError),

    #[error("Internal pipeline error: {0}")]
    Internal(String),
}
