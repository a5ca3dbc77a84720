//! Phrase extraction: splitting a track's notes into renderable units.

use crate::config::RenderConfig;
use crate::engine::SingingVoice;
use crate::key::{PhraseKey, PhraseSource, PitchKey, QueryKey, VoiceKey, VolumeKey};
use crate::query::FrameAudioQuery;
use crate::score::{Note, ScoreSnapshot, Singer, TrackId};
use crate::tempo::TempoMap;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A contiguous run of one track's notes, rendered as a unit.
///
/// Created by the extractor with the score-derived fields filled in; the
/// pipeline populates each artifact slot at most once as its stage
/// succeeds. A phrase whose pipeline failed anywhere carries
/// `error_occurred_during_rendering` instead of the missing artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct Phrase {
    pub track_id: TrackId,
    pub singer: Option<Singer>,
    /// Leading rest in ticks, ending at the first note.
    pub first_rest_duration: i64,
    pub notes: Vec<Note>,
    /// Tick position of the first note.
    pub start_ticks: i64,
    /// Tick position where the last note ends.
    pub end_ticks: i64,
    /// Absolute start of the leading rest, in seconds.
    pub start_time: f64,

    pub query_key: Option<QueryKey>,
    pub query: Option<Arc<FrameAudioQuery>>,
    pub timing_adjusted_query: Option<Arc<FrameAudioQuery>>,
    pub pitch_key: Option<PitchKey>,
    pub pitch: Option<Arc<Vec<f64>>>,
    pub volume_key: Option<VolumeKey>,
    pub volume: Option<Arc<Vec<f64>>>,
    pub voice_key: Option<VoiceKey>,
    pub voice: Option<Arc<SingingVoice>>,
    pub error_occurred_during_rendering: bool,
}

impl Phrase {
    /// True once all four artifacts are present.
    pub fn is_fully_rendered(&self) -> bool {
        self.query.is_some() && self.pitch.is_some() && self.volume.is_some() && self.voice.is_some()
    }
}

/// Leading rest of a phrase starting at `position`: the available gap
/// capped at one quarter note, raised to the configured minimum duration,
/// floored to one tick.
fn first_rest_duration(
    tempo_map: &TempoMap,
    position: i64,
    previous_phrase_end: Option<i64>,
    min_duration_seconds: f64,
) -> i64 {
    let gap = match previous_phrase_end {
        Some(end) => position - end,
        None => position,
    };
    let rest = gap.min(tempo_map.tpqn);

    let note_on_seconds = tempo_map.tick_to_seconds(position);
    let min_rest_start = tempo_map.seconds_to_ticks(note_on_seconds - min_duration_seconds);
    let min_rest = (position as f64 - min_rest_start).ceil() as i64;

    rest.max(min_rest).max(1)
}

/// Split every track of the snapshot into phrases, keyed by content.
///
/// Overlapping notes are dropped up front; a new phrase starts at every
/// tick gap between consecutive notes. Tracks without notes contribute
/// nothing.
pub fn extract_phrases(
    snapshot: &ScoreSnapshot,
    config: &RenderConfig,
) -> Result<BTreeMap<PhraseKey, Phrase>> {
    let tempo_map = &snapshot.tempo_map;
    let mut phrases = BTreeMap::new();

    for (&track_id, track) in &snapshot.tracks {
        let overlapping = snapshot.overlapping_note_ids.get(&track_id);
        let notes: Vec<&Note> = track
            .notes
            .iter()
            .filter(|note| !overlapping.is_some_and(|ids| ids.contains(&note.id)))
            .collect();

        let mut previous_phrase_end: Option<i64> = None;
        let mut run_start = 0;
        for i in 0..notes.len() {
            let run_ends = match notes.get(i + 1) {
                Some(next) => next.position != notes[i].end(),
                None => true,
            };
            if !run_ends {
                continue;
            }

            let run: Vec<Note> = notes[run_start..=i].iter().map(|n| (*n).clone()).collect();
            run_start = i + 1;

            let first_rest = first_rest_duration(
                tempo_map,
                run[0].position,
                previous_phrase_end,
                config.first_rest_min_duration_seconds,
            );
            let start_ticks = run[0].position;
            let end_ticks = run[run.len() - 1].end();
            previous_phrase_end = Some(end_ticks);
            let start_time = tempo_map.tick_to_seconds(start_ticks - first_rest);

            let key = PhraseKey::from_source(&PhraseSource {
                first_rest_duration: first_rest,
                notes: &run,
                start_time,
                track_id,
            })
            .map_err(crate::Error::Key)?;

            phrases.insert(
                key,
                Phrase {
                    track_id,
                    singer: track.singer,
                    first_rest_duration: first_rest,
                    notes: run,
                    start_ticks,
                    end_ticks,
                    start_time,
                    query_key: None,
                    query: None,
                    timing_adjusted_query: None,
                    pitch_key: None,
                    pitch: None,
                    volume_key: None,
                    volume: None,
                    voice_key: None,
                    voice: None,
                    error_occurred_during_rendering: false,
                },
            );
        }
    }
    Ok(phrases)
}
