//! Frame audio queries and the note transform that feeds the engine.

use crate::error::StageError;
use crate::score::{Note, NoteId};
use crate::tempo::TempoMap;
use serde::Serialize;

/// The silence phoneme. Queries begin and end with one.
pub const PAU: &str = "pau";

/// One phoneme of a query, spanning `frame_length` frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramePhoneme {
    pub phoneme: String,
    pub frame_length: i64,
    /// The score note this phoneme belongs to; `None` for rests.
    pub note_id: Option<NoteId>,
}

/// Engine-returned description of a phrase: per-frame phonemes plus dense
/// f0 and volume arrays, one value per frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameAudioQuery {
    pub phonemes: Vec<FramePhoneme>,
    pub frame_rate: f64,
    pub f0: Vec<f64>,
    pub volume: Vec<f64>,
}

impl FrameAudioQuery {
    /// Total frame count, defined as the sum of phoneme frame lengths.
    pub fn frame_count(&self) -> i64 {
        self.phonemes.iter().map(|p| p.frame_length).sum()
    }

    /// Assert the structural invariants every well-formed query satisfies:
    /// at least one phoneme, every frame length >= 1, f0 and volume arrays
    /// matching the frame count, and a trailing pau.
    pub fn validate(&self) -> Result<(), StageError> {
        let last = self.phonemes.last().ok_or(StageError::EmptyPhonemeList)?;
        if last.phoneme != PAU {
            return Err(StageError::MissingTrailingPau(last.phoneme.clone()));
        }
        for phoneme in &self.phonemes {
            if phoneme.frame_length < 1 {
                return Err(StageError::FrameLengthTooShort(phoneme.frame_length));
            }
        }
        let frame_count = self.frame_count();
        for actual in [self.f0.len() as i64, self.volume.len() as i64] {
            if actual != frame_count {
                return Err(StageError::FrameCountMismatch {
                    expected: frame_count,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// A note as sent to the engine: silent notes carry no key and no id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineNote {
    pub id: Option<NoteId>,
    pub key: Option<i32>,
    pub frame_length: i64,
    pub lyric: String,
}

impl EngineNote {
    fn rest(frame_length: i64) -> Self {
        Self {
            id: None,
            key: None,
            frame_length,
            lyric: String::new(),
        }
    }
}

/// Build the engine-facing note list for a phrase: a leading rest covering
/// the first-rest duration, one note per score note, and a fixed trailing
/// rest. Frame boundaries are rounded per absolute position so adjacent
/// lengths stay consistent, then every length is raised to the one-frame
/// minimum by stealing from the following note.
pub fn notes_for_engine(
    tempo_map: &TempoMap,
    first_rest_duration: i64,
    notes: &[Note],
    frame_rate: f64,
    last_rest_duration_seconds: f64,
) -> Vec<EngineNote> {
    let frame_at = |tick: i64| (tempo_map.tick_to_seconds(tick) * frame_rate).round() as i64;

    let mut engine_notes = Vec::with_capacity(notes.len() + 2);
    if let Some(first) = notes.first() {
        let rest_start = first.position - first_rest_duration;
        engine_notes.push(EngineNote::rest(frame_at(first.position) - frame_at(rest_start)));
    }
    for note in notes {
        engine_notes.push(EngineNote {
            id: Some(note.id),
            key: Some(note.note_number),
            frame_length: frame_at(note.end()) - frame_at(note.position),
            lyric: note.lyric.clone(),
        });
    }
    engine_notes.push(EngineNote::rest(
        (last_rest_duration_seconds * frame_rate).round() as i64,
    ));

    // Left-to-right minimum-length pass: a too-short note steals the
    // deficit from its successor.
    let len = engine_notes.len();
    for i in 0..len {
        let frame_length = engine_notes[i].frame_length;
        if frame_length < 1 {
            if i + 1 < len {
                engine_notes[i + 1].frame_length -= 1 - frame_length;
            }
            engine_notes[i].frame_length = 1;
        }
    }
    engine_notes
}

/// Transpose every keyed note. Rests are untouched.
pub fn shift_note_keys(notes: &mut [EngineNote], semitones: i32) {
    for note in notes.iter_mut() {
        if let Some(key) = note.key.as_mut() {
            *key += semitones;
        }
    }
}

/// Frequency ratio of a transposition in semitones.
#[inline]
pub fn semitone_ratio(semitones: f64) -> f64 {
    2f64.powf(semitones / 12.0)
}

/// Scale every f0 value by a transposition in semitones.
pub fn shift_f0(f0: &mut [f64], semitones: f64) {
    let ratio = semitone_ratio(semitones);
    for value in f0.iter_mut() {
        *value *= ratio;
    }
}

/// Amplitude ratio of a gain in decibels.
#[inline]
pub fn decibel_ratio(decibels: f64) -> f64 {
    10f64.powf(decibels / 20.0)
}
