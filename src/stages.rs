//! Per-task stage logic: inputs, engine calls and post-processing.

use crate::cache::RenderCache;
use crate::config::RenderConfig;
use crate::engine::{SingingVoice, SynthClient};
use crate::error::StageError;
use crate::key::{
    PhraseKey, PitchKey, PitchSource, QueryKey, QuerySource, VoiceKey, VoiceSource, VolumeKey,
    VolumeSource,
};
use crate::phrase::Phrase;
use crate::query::{
    decibel_ratio, notes_for_engine, shift_f0, shift_note_keys, EngineNote, FrameAudioQuery, PAU,
};
use crate::score::{NoteId, ScoreSnapshot, Singer, TrackId, TrackSnapshot};
use crate::task::runner::TaskExecutor;
use crate::task::{Task, TaskKind};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Settled result of one task, reported through the runner's events.
#[derive(Debug, Clone)]
pub enum TaskOutput {
    Query {
        phrase_key: PhraseKey,
        key: QueryKey,
        query: Arc<FrameAudioQuery>,
    },
    TimingAdjustment {
        track_id: TrackId,
    },
    Pitch {
        phrase_key: PhraseKey,
        key: PitchKey,
        pitch: Arc<Vec<f64>>,
    },
    Volume {
        phrase_key: PhraseKey,
        key: VolumeKey,
        volume: Arc<Vec<f64>>,
    },
    Voice {
        phrase_key: PhraseKey,
        key: VoiceKey,
        voice: Arc<SingingVoice>,
    },
}

/// Runs stage logic against one render's phrase map, the shared caches
/// and the engine client. Artifact slots are written only after a stage
/// fully succeeded, and the caches only together with them.
pub struct StageExecutor<'a> {
    pub snapshot: &'a ScoreSnapshot,
    pub config: &'a RenderConfig,
    pub phrases: &'a mut BTreeMap<PhraseKey, Phrase>,
    pub caches: &'a RenderCache,
    pub engine: &'a dyn SynthClient,
}

impl TaskExecutor for StageExecutor<'_> {
    fn is_cached(&mut self, task: &Task) -> bool {
        let probe = || -> Result<bool, StageError> {
            match &task.kind {
                TaskKind::QueryGeneration { phrase_key } => {
                    let phrase = self.phrase(phrase_key)?;
                    let key = self.query_key(phrase)?;
                    Ok(self.caches.contains_query(&key))
                }
                TaskKind::PhonemeTimingAdjustment { .. } => Ok(false),
                TaskKind::PitchGeneration { phrase_key } => {
                    let phrase = self.phrase(phrase_key)?;
                    let key = self.pitch_key(phrase)?;
                    Ok(self.caches.contains_pitch(&key))
                }
                TaskKind::VolumeGeneration { phrase_key } => {
                    let phrase = self.phrase(phrase_key)?;
                    let key = self.volume_key(phrase)?.0;
                    Ok(self.caches.contains_volume(&key))
                }
                TaskKind::VoiceSynthesis { phrase_key } => {
                    let phrase = self.phrase(phrase_key)?;
                    let key = self.voice_key(phrase)?.0;
                    Ok(self.caches.contains_voice(&key))
                }
            }
        };
        probe().unwrap_or(false)
    }

    fn execute(&mut self, task: &Task) -> Result<TaskOutput, StageError> {
        match &task.kind {
            TaskKind::QueryGeneration { phrase_key } => self.run_query_generation(phrase_key),
            TaskKind::PhonemeTimingAdjustment { track_id } => {
                self.run_timing_adjustment(*track_id)
            }
            TaskKind::PitchGeneration { phrase_key } => self.run_pitch_generation(phrase_key),
            TaskKind::VolumeGeneration { phrase_key } => self.run_volume_generation(phrase_key),
            TaskKind::VoiceSynthesis { phrase_key } => self.run_voice_synthesis(phrase_key),
        }
    }
}

impl StageExecutor<'_> {
    fn phrase(&self, phrase_key: &PhraseKey) -> Result<&Phrase, StageError> {
        self.phrases
            .get(phrase_key)
            .ok_or_else(|| StageError::Internal(format!("phrase {} not in map", phrase_key)))
    }

    fn track(&self, track_id: TrackId) -> Result<&TrackSnapshot, StageError> {
        self.snapshot
            .tracks
            .get(&track_id)
            .ok_or_else(|| StageError::Internal(format!("track {:?} not in snapshot", track_id)))
    }

    /// Singer, engine frame rate and owning track of a phrase.
    fn engine_info(&self, phrase: &Phrase) -> Result<(Singer, f64, &TrackSnapshot), StageError> {
        let singer = phrase.singer.ok_or(StageError::MissingSinger)?;
        let frame_rate = self
            .snapshot
            .engine_frame_rate(singer.engine_id)
            .ok_or(StageError::UnknownEngine(singer.engine_id))?;
        Ok((singer, frame_rate, self.track(phrase.track_id)?))
    }

    fn engine_notes(&self, phrase: &Phrase, frame_rate: f64, semitones: i32) -> Vec<EngineNote> {
        let mut notes = notes_for_engine(
            &self.snapshot.tempo_map,
            phrase.first_rest_duration,
            &phrase.notes,
            frame_rate,
            self.config.last_rest_duration_seconds,
        );
        shift_note_keys(&mut notes, -semitones);
        notes
    }

    fn query_key(&self, phrase: &Phrase) -> Result<QueryKey, StageError> {
        let (singer, frame_rate, track) = self.engine_info(phrase)?;
        Ok(QueryKey::from_source(&QuerySource {
            engine_id: singer.engine_id,
            engine_frame_rate: frame_rate,
            style_id: self.config.singing_teacher_style_id,
            tpqn: self.snapshot.tempo_map.tpqn,
            tempos: &self.snapshot.tempo_map.tempos,
            first_rest_duration: phrase.first_rest_duration,
            notes: &phrase.notes,
            key_range_adjustment: track.key_range_adjustment,
        })?)
    }

    fn pitch_key(&self, phrase: &Phrase) -> Result<PitchKey, StageError> {
        let (singer, frame_rate, track) = self.engine_info(phrase)?;
        let adjusted = phrase.timing_adjusted_query.as_ref().ok_or_else(|| {
            StageError::Internal("timing-adjusted query missing before pitch generation".into())
        })?;
        Ok(PitchKey::from_source(&PitchSource {
            engine_id: singer.engine_id,
            engine_frame_rate: frame_rate,
            style_id: self.config.singing_teacher_style_id,
            tpqn: self.snapshot.tempo_map.tpqn,
            tempos: &self.snapshot.tempo_map.tempos,
            first_rest_duration: phrase.first_rest_duration,
            notes: &phrase.notes,
            key_range_adjustment: track.key_range_adjustment,
            query: adjusted,
        })?)
    }

    /// The query volume generation works on: the phrase's query with the
    /// generated pitch installed and the user's pitch edits applied.
    fn volume_working_query(&self, phrase: &Phrase) -> Result<FrameAudioQuery, StageError> {
        let (_, _, track) = self.engine_info(phrase)?;
        let query = phrase.query.as_ref().ok_or_else(|| {
            StageError::Internal("query missing before volume generation".into())
        })?;
        let pitch = phrase.pitch.as_ref().ok_or_else(|| {
            StageError::Internal("pitch missing before volume generation".into())
        })?;
        let mut working = (**query).clone();
        working.f0 = (**pitch).clone();
        apply_pitch_edit(
            &mut working,
            phrase.start_time,
            &track.pitch_edit,
            self.snapshot.editor_frame_rate,
        );
        Ok(working)
    }

    fn volume_key(&self, phrase: &Phrase) -> Result<(VolumeKey, FrameAudioQuery), StageError> {
        let (singer, frame_rate, track) = self.engine_info(phrase)?;
        let working = self.volume_working_query(phrase)?;
        let key = VolumeKey::from_source(&VolumeSource {
            engine_id: singer.engine_id,
            engine_frame_rate: frame_rate,
            style_id: self.config.singing_teacher_style_id,
            tpqn: self.snapshot.tempo_map.tpqn,
            tempos: &self.snapshot.tempo_map.tempos,
            first_rest_duration: phrase.first_rest_duration,
            notes: &phrase.notes,
            key_range_adjustment: track.key_range_adjustment,
            volume_range_adjustment: track.volume_range_adjustment,
            fade_out_duration_seconds: self.config.fade_out_duration_seconds,
            query: &working,
        })?;
        Ok((key, working))
    }

    /// The query handed to synthesis: the volume working query with the
    /// generated volume installed as well.
    fn voice_key(&self, phrase: &Phrase) -> Result<(VoiceKey, FrameAudioQuery), StageError> {
        let (singer, _, _) = self.engine_info(phrase)?;
        let volume = phrase.volume.as_ref().ok_or_else(|| {
            StageError::Internal("volume missing before voice synthesis".into())
        })?;
        let mut working = self.volume_working_query(phrase)?;
        working.volume = (**volume).clone();
        let key = VoiceKey::from_source(&VoiceSource {
            singer,
            query: &working,
        })?;
        Ok((key, working))
    }

    fn run_query_generation(&mut self, phrase_key: &PhraseKey) -> Result<TaskOutput, StageError> {
        let phrase = self.phrase(phrase_key)?;
        let (singer, frame_rate, track) = self.engine_info(phrase)?;
        let semitones = track.key_range_adjustment;
        let key = self.query_key(phrase)?;

        let query = match self.caches.get_query(&key) {
            Some(query) => query,
            None => {
                let notes = self.engine_notes(phrase, frame_rate, semitones);
                let mut query = self.engine.fetch_frame_audio_query(
                    singer.engine_id,
                    self.config.singing_teacher_style_id,
                    frame_rate,
                    &notes,
                )?;
                query.validate()?;
                // Undo the transposition the engine saw.
                shift_f0(&mut query.f0, semitones as f64);
                let query = Arc::new(query);
                self.caches.put_query(key.clone(), Arc::clone(&query));
                query
            }
        };

        let phrase = self.phrase_mut(phrase_key)?;
        phrase.query_key = Some(key.clone());
        phrase.query = Some(Arc::clone(&query));
        Ok(TaskOutput::Query {
            phrase_key: phrase_key.clone(),
            key,
            query,
        })
    }

    fn run_timing_adjustment(&mut self, track_id: TrackId) -> Result<TaskOutput, StageError> {
        let edits = self.track(track_id)?.phoneme_timing_edits.clone();

        // Phrases whose query generation succeeded, in score order.
        let mut targets: Vec<(i64, PhraseKey)> = self
            .phrases
            .iter()
            .filter(|(_, p)| p.track_id == track_id && p.query.is_some())
            .map(|(key, p)| (p.start_ticks, key.clone()))
            .collect();
        targets.sort_by_key(|(start_ticks, _)| *start_ticks);

        for (_, phrase_key) in targets {
            let phrase = self.phrase(&phrase_key)?;
            let query = phrase.query.as_ref().ok_or_else(|| {
                StageError::Internal("query missing during timing adjustment".into())
            })?;
            let mut adjusted = (**query).clone();
            apply_phoneme_timing_edits(&mut adjusted, &edits)?;
            self.phrase_mut(&phrase_key)?.timing_adjusted_query = Some(Arc::new(adjusted));
        }
        Ok(TaskOutput::TimingAdjustment { track_id })
    }

    fn run_pitch_generation(&mut self, phrase_key: &PhraseKey) -> Result<TaskOutput, StageError> {
        let phrase = self.phrase(phrase_key)?;
        let (singer, frame_rate, track) = self.engine_info(phrase)?;
        let semitones = track.key_range_adjustment;
        let key = self.pitch_key(phrase)?;

        let pitch = match self.caches.get_pitch(&key) {
            Some(pitch) => pitch,
            None => {
                let adjusted = Arc::clone(phrase.timing_adjusted_query.as_ref().ok_or_else(
                    || {
                        StageError::Internal(
                            "timing-adjusted query missing before pitch generation".into(),
                        )
                    },
                )?);
                let notes = self.engine_notes(phrase, frame_rate, semitones);
                let mut pitch = self.engine.fetch_sing_frame_f0(
                    singer.engine_id,
                    self.config.singing_teacher_style_id,
                    &notes,
                    &adjusted,
                )?;
                let expected = adjusted.frame_count();
                if pitch.len() as i64 != expected {
                    return Err(StageError::FrameCountMismatch {
                        expected,
                        actual: pitch.len() as i64,
                    });
                }
                shift_f0(&mut pitch, semitones as f64);
                let pitch = Arc::new(pitch);
                self.caches.put_pitch(key.clone(), Arc::clone(&pitch));
                pitch
            }
        };

        let phrase = self.phrase_mut(phrase_key)?;
        phrase.pitch_key = Some(key.clone());
        phrase.pitch = Some(Arc::clone(&pitch));
        Ok(TaskOutput::Pitch {
            phrase_key: phrase_key.clone(),
            key,
            pitch,
        })
    }

    fn run_volume_generation(&mut self, phrase_key: &PhraseKey) -> Result<TaskOutput, StageError> {
        let phrase = self.phrase(phrase_key)?;
        let (singer, frame_rate, track) = self.engine_info(phrase)?;
        let semitones = track.key_range_adjustment;
        let gain = decibel_ratio(track.volume_range_adjustment);
        let (key, working) = self.volume_key(phrase)?;

        let volume = match self.caches.get_volume(&key) {
            Some(volume) => volume,
            None => {
                let notes = self.engine_notes(phrase, frame_rate, semitones);
                // The engine expects the un-transposed pitch it generated.
                let mut engine_query = working.clone();
                shift_f0(&mut engine_query.f0, -(semitones as f64));
                let mut volume = self.engine.fetch_sing_frame_volume(
                    singer.engine_id,
                    self.config.singing_teacher_style_id,
                    &notes,
                    &engine_query,
                )?;
                let expected = working.frame_count();
                if volume.len() as i64 != expected {
                    return Err(StageError::FrameCountMismatch {
                        expected,
                        actual: volume.len() as i64,
                    });
                }
                for value in volume.iter_mut() {
                    *value *= gain;
                }
                mute_last_pau(
                    &mut volume,
                    &working,
                    self.config.fade_out_duration_seconds,
                )?;
                let volume = Arc::new(volume);
                self.caches.put_volume(key.clone(), Arc::clone(&volume));
                volume
            }
        };

        let phrase = self.phrase_mut(phrase_key)?;
        phrase.volume_key = Some(key.clone());
        phrase.volume = Some(Arc::clone(&volume));
        Ok(TaskOutput::Volume {
            phrase_key: phrase_key.clone(),
            key,
            volume,
        })
    }

    fn run_voice_synthesis(&mut self, phrase_key: &PhraseKey) -> Result<TaskOutput, StageError> {
        let phrase = self.phrase(phrase_key)?;
        let (singer, _, _) = self.engine_info(phrase)?;
        let (key, working) = self.voice_key(phrase)?;

        let voice = match self.caches.get_voice(&key) {
            Some(voice) => voice,
            None => {
                let voice =
                    self.engine
                        .frame_synthesis(singer.engine_id, singer.style_id, &working)?;
                let voice = Arc::new(voice);
                self.caches.put_voice(key.clone(), Arc::clone(&voice));
                voice
            }
        };

        let phrase = self.phrase_mut(phrase_key)?;
        phrase.voice_key = Some(key.clone());
        phrase.voice = Some(Arc::clone(&voice));
        Ok(TaskOutput::Voice {
            phrase_key: phrase_key.clone(),
            key,
            voice,
        })
    }

    fn phrase_mut(&mut self, phrase_key: &PhraseKey) -> Result<&mut Phrase, StageError> {
        self.phrases
            .get_mut(phrase_key)
            .ok_or_else(|| StageError::Internal(format!("phrase {} not in map", phrase_key)))
    }
}

/// Overwrite f0 frames with the user's pitch edits, resampled from the
/// editor frame rate to the query's frame rate.
pub fn apply_pitch_edit(
    query: &mut FrameAudioQuery,
    start_time: f64,
    pitch_edit: &[f64],
    editor_frame_rate: f64,
) {
    if pitch_edit.is_empty() {
        return;
    }
    let start_frame = (start_time * query.frame_rate).round() as i64;
    for (i, f0) in query.f0.iter_mut().enumerate() {
        let seconds = (start_frame + i as i64) as f64 / query.frame_rate;
        let index = (seconds * editor_frame_rate).round() as i64;
        if index < 0 || index as usize >= pitch_edit.len() {
            continue;
        }
        let edited = pitch_edit[index as usize];
        if edited > 0.0 {
            *f0 = edited;
        }
    }
}

/// Move phoneme boundaries by the user's timing edits, then re-clip them
/// so boundaries stay strictly increasing, every phoneme keeps at least
/// one frame, and the phrase's total frame count is unchanged.
pub fn apply_phoneme_timing_edits(
    query: &mut FrameAudioQuery,
    edits: &BTreeMap<NoteId, Vec<crate::score::PhonemeTimingEdit>>,
) -> Result<(), StageError> {
    let phoneme_count = query.phonemes.len();
    if phoneme_count == 0 {
        return Err(StageError::EmptyPhonemeList);
    }
    if edits.is_empty() {
        return Ok(());
    }
    let total = query.frame_count();
    if total < phoneme_count as i64 {
        return Err(StageError::Internal(
            "phrase has more phonemes than frames".into(),
        ));
    }

    // Cumulative start boundaries; index 0 and phoneme_count stay pinned
    // to the phrase edges.
    let mut boundaries = Vec::with_capacity(phoneme_count + 1);
    boundaries.push(0i64);
    for phoneme in &query.phonemes {
        boundaries.push(boundaries.last().copied().unwrap_or(0) + phoneme.frame_length);
    }

    let mut occurrence: HashMap<NoteId, usize> = HashMap::new();
    for (i, phoneme) in query.phonemes.iter().enumerate() {
        let Some(note_id) = phoneme.note_id else {
            continue;
        };
        let index_in_note = {
            let counter = occurrence.entry(note_id).or_insert(0);
            let current = *counter;
            *counter += 1;
            current
        };
        if i == 0 {
            continue;
        }
        if let Some(edit) = edits
            .get(&note_id)
            .and_then(|list| list.iter().find(|e| e.phoneme_index_in_note == index_in_note))
        {
            boundaries[i] += (edit.offset_seconds * query.frame_rate).round() as i64;
        }
    }

    for boundary in boundaries[1..phoneme_count].iter_mut() {
        *boundary = (*boundary).clamp(0, total);
    }
    for i in 1..phoneme_count {
        boundaries[i] = boundaries[i].max(boundaries[i - 1] + 1);
    }
    for i in (1..phoneme_count).rev() {
        boundaries[i] = boundaries[i].min(boundaries[i + 1] - 1);
    }

    for (i, phoneme) in query.phonemes.iter_mut().enumerate() {
        phoneme.frame_length = boundaries[i + 1] - boundaries[i];
    }
    Ok(())
}

fn linear_interpolation(x1: f64, y1: f64, x2: f64, y2: f64, x: f64) -> f64 {
    y1 + (y2 - y1) * (x - x1) / (x2 - x1)
}

/// Silence the trailing pau: a linear fade over the first `F` frames of
/// the pau, hard zero afterwards. A single-frame fade halves that frame.
pub fn mute_last_pau(
    volume: &mut [f64],
    query: &FrameAudioQuery,
    fade_out_seconds: f64,
) -> Result<(), StageError> {
    let last = query.phonemes.last().ok_or(StageError::EmptyPhonemeList)?;
    if last.phoneme != PAU {
        return Err(StageError::MissingTrailingPau(last.phoneme.clone()));
    }
    let total = query.frame_count();
    if volume.len() as i64 != total {
        return Err(StageError::FrameCountMismatch {
            expected: total,
            actual: volume.len() as i64,
        });
    }

    let pau_length = last.frame_length;
    let pau_start = (total - pau_length) as usize;
    let fade_frames = ((fade_out_seconds * query.frame_rate).round() as i64).clamp(0, pau_length);

    if fade_frames == 1 {
        volume[pau_start] *= 0.5;
    } else {
        for i in 0..fade_frames {
            volume[pau_start + i as usize] *=
                linear_interpolation(0.0, 1.0, (fade_frames - 1) as f64, 0.0, i as f64);
        }
    }
    for value in volume[pau_start + fade_frames as usize..].iter_mut() {
        *value = 0.0;
    }
    Ok(())
}
