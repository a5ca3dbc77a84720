//! Shared fixtures: a deterministic mock engine and snapshot builders.

#![allow(dead_code)]

use cantoria::{
    EngineError, EngineId, EngineNote, FrameAudioQuery, FramePhoneme, Note, NoteId, RenderConfig,
    RenderEvent, ScoreSnapshot, SingingVoice, Singer, SongRenderer, StyleId, SynthClient, TempoMap,
    TrackId, TrackSnapshot, PAU,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const ENGINE: EngineId = EngineId(1);
pub const FRAME_RATE: f64 = 93.75;
pub const TPQN: i64 = 480;

pub fn singer() -> Singer {
    Singer {
        engine_id: ENGINE,
        style_id: StyleId(1),
    }
}

/// Deterministic stand-in for the remote engine. Counts calls per
/// operation and can be told to reject queries whose notes carry a
/// marker lyric.
#[derive(Default)]
pub struct MockEngine {
    pub query_calls: AtomicUsize,
    pub f0_calls: AtomicUsize,
    pub volume_calls: AtomicUsize,
    pub synthesis_calls: AtomicUsize,
    pub fail_query_lyric: Mutex<Option<String>>,
}

impl MockEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_queries_with_lyric(lyric: &str) -> Arc<Self> {
        let engine = Self::default();
        *engine.fail_query_lyric.lock() = Some(lyric.to_string());
        Arc::new(engine)
    }

    pub fn total_calls(&self) -> usize {
        self.query_calls.load(Ordering::Relaxed)
            + self.f0_calls.load(Ordering::Relaxed)
            + self.volume_calls.load(Ordering::Relaxed)
            + self.synthesis_calls.load(Ordering::Relaxed)
    }

    fn note_frequency(key: i32) -> f64 {
        440.0 * 2f64.powf((key - 69) as f64 / 12.0)
    }
}

impl SynthClient for MockEngine {
    fn fetch_frame_audio_query(
        &self,
        _engine_id: EngineId,
        _style_id: StyleId,
        frame_rate: f64,
        notes: &[EngineNote],
    ) -> Result<FrameAudioQuery, EngineError> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        if let Some(marker) = self.fail_query_lyric.lock().as_deref() {
            if notes.iter().any(|n| n.lyric == marker) {
                return Err(EngineError::Rejected(format!(
                    "cannot voice lyric {:?}",
                    marker
                )));
            }
        }

        let phonemes: Vec<FramePhoneme> = notes
            .iter()
            .map(|note| FramePhoneme {
                phoneme: if note.key.is_some() {
                    note.lyric.clone()
                } else {
                    PAU.to_string()
                },
                frame_length: note.frame_length,
                note_id: note.id,
            })
            .collect();
        let mut f0 = Vec::new();
        let mut volume = Vec::new();
        for note in notes {
            let frequency = note.key.map(Self::note_frequency).unwrap_or(0.0);
            for _ in 0..note.frame_length {
                f0.push(frequency);
                volume.push(1.0);
            }
        }
        Ok(FrameAudioQuery {
            phonemes,
            frame_rate,
            f0,
            volume,
        })
    }

    fn fetch_sing_frame_f0(
        &self,
        _engine_id: EngineId,
        _style_id: StyleId,
        notes: &[EngineNote],
        query: &FrameAudioQuery,
    ) -> Result<Vec<f64>, EngineError> {
        self.f0_calls.fetch_add(1, Ordering::Relaxed);
        let mut f0 = Vec::new();
        for note in notes {
            let frequency = note.key.map(Self::note_frequency).unwrap_or(0.0);
            for _ in 0..note.frame_length {
                f0.push(frequency);
            }
        }
        f0.resize(query.frame_count() as usize, 0.0);
        Ok(f0)
    }

    fn fetch_sing_frame_volume(
        &self,
        _engine_id: EngineId,
        _style_id: StyleId,
        _notes: &[EngineNote],
        query: &FrameAudioQuery,
    ) -> Result<Vec<f64>, EngineError> {
        self.volume_calls.fetch_add(1, Ordering::Relaxed);
        Ok(vec![0.5; query.frame_count() as usize])
    }

    fn frame_synthesis(
        &self,
        _engine_id: EngineId,
        _style_id: StyleId,
        query: &FrameAudioQuery,
    ) -> Result<SingingVoice, EngineError> {
        self.synthesis_calls.fetch_add(1, Ordering::Relaxed);
        let mut data = query.frame_count().to_le_bytes().to_vec();
        data.extend(query.f0.iter().take(8).flat_map(|v| v.to_le_bytes()));
        Ok(SingingVoice::new(data))
    }
}

/// Contiguous quarter notes starting at `start_tick`, ids counted from 1.
pub fn quarter_notes(start_tick: i64, keys: &[i32]) -> Vec<Note> {
    keys.iter()
        .enumerate()
        .map(|(i, &key)| Note {
            id: NoteId(i as u64 + 1),
            position: start_tick + i as i64 * TPQN,
            duration: TPQN,
            note_number: key,
            lyric: "la".to_string(),
        })
        .collect()
}

pub fn one_track_snapshot(notes: Vec<Note>, with_singer: bool) -> ScoreSnapshot {
    multi_track_snapshot(vec![(TrackId(1), with_singer.then(singer), notes)])
}

pub fn multi_track_snapshot(
    tracks: Vec<(TrackId, Option<Singer>, Vec<Note>)>,
) -> ScoreSnapshot {
    let tracks = tracks
        .into_iter()
        .map(|(track_id, singer, notes)| {
            (
                track_id,
                TrackSnapshot {
                    singer,
                    notes,
                    ..TrackSnapshot::default()
                },
            )
        })
        .collect();
    ScoreSnapshot {
        tempo_map: TempoMap::constant(TPQN, 120.0),
        tracks,
        overlapping_note_ids: BTreeMap::new(),
        engine_frame_rates: BTreeMap::from([(ENGINE, FRAME_RATE)]),
        editor_frame_rate: FRAME_RATE,
    }
}

pub fn test_renderer(engine: Arc<MockEngine>) -> SongRenderer {
    SongRenderer::builder()
        .engine_arc(engine)
        .config(RenderConfig::new(StyleId(0)))
        .build()
        .unwrap()
}

/// Record every event a renderer emits.
pub fn record_events(renderer: &SongRenderer) -> Arc<Mutex<Vec<RenderEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    renderer.add_listener(move |event| sink.lock().push(event.clone()));
    events
}

/// Compact event labels for order assertions.
pub fn event_names(events: &[RenderEvent]) -> Vec<&'static str> {
    events
        .iter()
        .map(|event| match event {
            RenderEvent::RenderingStarted => "renderingStarted",
            RenderEvent::CacheLoadFinished { .. } => "cacheLoadFinished",
            RenderEvent::TrackQueryGenerationStarted { .. } => "trackQueryGenerationStarted",
            RenderEvent::TrackQueryGenerationFinished { .. } => "trackQueryGenerationFinished",
            RenderEvent::PitchGenerationStarted { .. } => "pitchGenerationStarted",
            RenderEvent::PitchGenerationFinished { .. } => "pitchGenerationFinished",
            RenderEvent::VolumeGenerationStarted { .. } => "volumeGenerationStarted",
            RenderEvent::VolumeGenerationFinished { .. } => "volumeGenerationFinished",
            RenderEvent::VoiceSynthesisStarted { .. } => "voiceSynthesisStarted",
            RenderEvent::VoiceSynthesisFinished { .. } => "voiceSynthesisFinished",
            RenderEvent::RenderingCompleted => "renderingCompleted",
        })
        .collect()
}
