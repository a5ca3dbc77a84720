//! Incremental phrase-rendering pipeline for singing-voice editors.
//!
//! For every edit to a multi-track score, the pipeline recomputes the
//! audio artifacts needed to preview the result: per-phrase engine
//! queries, f0 curves, volume envelopes and synthesized waveforms. The
//! heart of the crate is a cache-aware DAG scheduler that partitions
//! tracks into phrases, drives four dependent stages per phrase through a
//! remote engine, skips unchanged work via content-addressed caches,
//! isolates per-phrase failures and can be interrupted between tasks.
//!
//! # Primary API
//!
//! - [`SongRenderer`] / [`SongRendererBuilder`]: main entry point
//! - [`SynthClient`]: the four engine operations a host must provide
//! - [`ScoreSnapshot`]: read-only score input of one render
//! - [`RenderEvent`]: progress stream for UI layers
//! - [`TaskSelector`]: pluggable scheduling policy
//!
//! # Example
//!
//! ```ignore
//! use cantoria::{RenderConfig, SongRenderer, StyleId};
//!
//! let renderer = SongRenderer::builder()
//!     .engine(my_engine_client)
//!     .config(RenderConfig::new(StyleId(6000)))
//!     .build()?;
//!
//! renderer.add_listener(|event| ui.update(event));
//! let result = renderer.render(&snapshot)?;
//! ```

// Error types
pub mod error;
pub use error::{Error, KeyError, Result, StageError};

// Main entry point
mod system;
pub use system::{RenderResult, RenderStats, SongRenderer, SongRendererBuilder};

// Configuration
mod config;
pub use config::RenderConfig;

// Score model
pub mod score;
pub use score::{
    EngineId, Note, NoteId, PhonemeTimingEdit, ScoreSnapshot, Singer, StyleId, TrackId,
    TrackSnapshot, PITCH_EDIT_NO_DATA,
};

// Time base
mod tempo;
pub use tempo::{Tempo, TempoMap};

// Phrases
mod phrase;
pub use phrase::{extract_phrases, Phrase};

// Queries and engine-facing notes
pub mod query;
pub use query::{EngineNote, FrameAudioQuery, FramePhoneme, PAU};

// Content-addressed keys
pub mod key;
pub use key::{PhraseKey, PitchKey, QueryKey, VoiceKey, VolumeKey};

// Engine client
mod engine;
pub use engine::{EngineError, SingingVoice, SynthClient};

// Events
mod event;
pub use event::{EventBus, ListenerId, PhraseQueryResult, RenderEvent, StageResult};

// Caches
mod cache;
pub use cache::RenderCache;

// Task graph and runner
pub mod task;
pub use task::runner::{
    InOrderSelector, PlayheadProximitySelector, SelectorContext, TaskSelector,
};
pub use task::{RunStatus, SkipPolicy, TaskKind};

// Stage logic
pub mod stages;
pub use stages::TaskOutput;

// Playhead handle for the proximity selector
pub use atomic_float::AtomicF64;
