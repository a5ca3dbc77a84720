//! Client interface to the remote synthesis engine.

use crate::query::{EngineNote, FrameAudioQuery};
use crate::score::{EngineId, StyleId};
use thiserror::Error;

/// Error returned by an engine operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine unreachable: {0}")]
    Unreachable(String),

    #[error("engine rejected the request: {0}")]
    Rejected(String),

    #[error("engine response invalid: {0}")]
    InvalidResponse(String),
}

/// An encoded audio blob produced by voice synthesis. Opaque to the
/// pipeline; decoding and playback belong to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SingingVoice {
    pub data: Vec<u8>,
}

impl SingingVoice {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

/// The four engine operations the pipeline depends on.
///
/// Every call takes and returns plain values; transport, retries and
/// process management live behind the implementation. Each operation may
/// fail, and failures are reported as failed task results rather than
/// aborting the render.
pub trait SynthClient: Send + Sync {
    /// Build a frame audio query (phonemes, f0, volume) for the notes.
    fn fetch_frame_audio_query(
        &self,
        engine_id: EngineId,
        style_id: StyleId,
        frame_rate: f64,
        notes: &[EngineNote],
    ) -> Result<FrameAudioQuery, EngineError>;

    /// Generate an f0 curve for the query, one value per frame.
    fn fetch_sing_frame_f0(
        &self,
        engine_id: EngineId,
        style_id: StyleId,
        notes: &[EngineNote],
        query: &FrameAudioQuery,
    ) -> Result<Vec<f64>, EngineError>;

    /// Generate a volume envelope for the query, one value per frame.
    fn fetch_sing_frame_volume(
        &self,
        engine_id: EngineId,
        style_id: StyleId,
        notes: &[EngineNote],
        query: &FrameAudioQuery,
    ) -> Result<Vec<f64>, EngineError>;

    /// Synthesize the query into an encoded waveform.
    fn frame_synthesis(
        &self,
        engine_id: EngineId,
        style_id: StyleId,
        query: &FrameAudioQuery,
    ) -> Result<SingingVoice, EngineError>;
}
