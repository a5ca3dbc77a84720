//! Score snapshot types: the read-only input of a render pass.

use crate::tempo::TempoMap;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Identifies a track within a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct TrackId(pub u64);

/// Identifies a note within a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NoteId(pub u64);

/// Identifies a synthesis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EngineId(pub u64);

/// Identifies a voice style within an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct StyleId(pub u32);

/// The voice assigned to a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Singer {
    pub engine_id: EngineId,
    pub style_id: StyleId,
}

/// A score note. Position and duration are in ticks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Note {
    pub id: NoteId,
    pub position: i64,
    pub duration: i64,
    /// MIDI note number.
    pub note_number: i32,
    pub lyric: String,
}

impl Note {
    #[inline]
    pub fn end(&self) -> i64 {
        self.position + self.duration
    }
}

/// Sentinel in the dense pitch-edit vector marking frames with no edit.
pub const PITCH_EDIT_NO_DATA: f64 = -1.0;

/// A user-authored offset of one phoneme's start within a note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhonemeTimingEdit {
    /// Which of the note's phonemes the edit moves, in phoneme order.
    pub phoneme_index_in_note: usize,
    /// Signed offset applied to the phoneme's start, in seconds.
    pub offset_seconds: f64,
}

/// One track of the score snapshot.
#[derive(Debug, Clone, Default)]
pub struct TrackSnapshot {
    pub singer: Option<Singer>,
    /// Notes sorted by position.
    pub notes: Vec<Note>,
    /// Transposition applied around engine calls, in semitones.
    pub key_range_adjustment: i32,
    /// Gain applied to generated volume, in decibels.
    pub volume_range_adjustment: f64,
    /// Dense f0 overrides indexed by editor frame; `PITCH_EDIT_NO_DATA`
    /// marks untouched frames.
    pub pitch_edit: Vec<f64>,
    /// Timing edits grouped by the note they belong to.
    pub phoneme_timing_edits: BTreeMap<NoteId, Vec<PhonemeTimingEdit>>,
}

/// Immutable view of the score taken at the start of a render.
#[derive(Debug, Clone)]
pub struct ScoreSnapshot {
    pub tempo_map: TempoMap,
    pub tracks: BTreeMap<TrackId, TrackSnapshot>,
    /// Note ids excluded from phrase extraction, per track.
    pub overlapping_note_ids: BTreeMap<TrackId, BTreeSet<NoteId>>,
    /// Output frame rate of each known engine, in frames per second.
    pub engine_frame_rates: BTreeMap<EngineId, f64>,
    /// Frame rate of editor-side data such as pitch edits.
    pub editor_frame_rate: f64,
}

impl ScoreSnapshot {
    pub fn validate(&self) -> Result<()> {
        self.tempo_map.validate()?;
        if !self.editor_frame_rate.is_finite() || self.editor_frame_rate <= 0.0 {
            return Err(Error::InvalidSnapshot(format!(
                "editor frame rate must be positive, got {}",
                self.editor_frame_rate
            )));
        }
        for (engine_id, rate) in &self.engine_frame_rates {
            if !rate.is_finite() || *rate <= 0.0 {
                return Err(Error::InvalidSnapshot(format!(
                    "frame rate for engine {:?} must be positive, got {}",
                    engine_id, rate
                )));
            }
        }
        for (track_id, track) in &self.tracks {
            for pair in track.notes.windows(2) {
                if pair[1].position < pair[0].position {
                    return Err(Error::InvalidSnapshot(format!(
                        "notes of track {:?} are not sorted by position",
                        track_id
                    )));
                }
            }
            for note in &track.notes {
                if note.duration <= 0 {
                    return Err(Error::InvalidSnapshot(format!(
                        "note {:?} has non-positive duration {}",
                        note.id, note.duration
                    )));
                }
            }
            if let Some(singer) = &track.singer {
                if !self.engine_frame_rates.contains_key(&singer.engine_id) {
                    return Err(Error::InvalidSnapshot(format!(
                        "track {:?} uses engine {:?} with no registered frame rate",
                        track_id, singer.engine_id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Frame rate of the engine, if registered.
    pub fn engine_frame_rate(&self, engine_id: EngineId) -> Option<f64> {
        self.engine_frame_rates.get(&engine_id).copied()
    }
}
