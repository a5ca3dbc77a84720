//! Renderer facade: cache ownership, render lifecycle, event adaptation.

use crate::cache::RenderCache;
use crate::config::RenderConfig;
use crate::engine::SynthClient;
use crate::event::{
    EventBus, ListenerId, PhraseQueryResult, RenderEvent, StageResult,
};
use crate::key::PhraseKey;
use crate::phrase::{extract_phrases, Phrase};
use crate::score::{ScoreSnapshot, TrackId};
use crate::stages::{StageExecutor, TaskOutput};
use crate::task::builder::{build_tasks, query_task_counts};
use crate::task::graph::TaskGraph;
use crate::task::runner::{
    InOrderSelector, RunOutcome, TaskEvent, TaskRunner, TaskSelector,
};
use crate::task::TaskKind;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Counters describing one completed render.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub tasks_executed: usize,
    pub cache_hits: usize,
    pub failures: usize,
}

/// Outcome of [`SongRenderer::render`].
#[derive(Debug)]
pub enum RenderResult {
    /// The pipeline ran to completion. Phrases whose stages all succeeded
    /// carry their four artifacts; the rest are flagged.
    Complete {
        phrases: BTreeMap<PhraseKey, Phrase>,
        stats: RenderStats,
    },
    /// Interruption was requested; partial work is kept in the caches.
    Interrupted,
}

/// Incremental renderer for singing tracks.
///
/// Owns the four artifact caches, the event stream and the scheduling
/// policy. One render runs at a time; caches persist across renders so a
/// re-render of unchanged content costs no engine calls.
///
/// # Example
/// ```ignore
/// let renderer = SongRenderer::builder()
///     .engine(client)
///     .config(RenderConfig::new(StyleId(6000)))
///     .build()?;
///
/// renderer.add_listener(|event| println!("{event:?}"));
/// match renderer.render(&snapshot)? {
///     RenderResult::Complete { phrases, .. } => play(phrases),
///     RenderResult::Interrupted => {}
/// }
/// ```
pub struct SongRenderer {
    config: RenderConfig,
    engine: Arc<dyn SynthClient>,
    caches: RenderCache,
    events: EventBus,
    selector: Mutex<Box<dyn TaskSelector>>,
    prioritize_cached: bool,
    is_rendering: AtomicBool,
    interruption_requested: AtomicBool,
}

impl SongRenderer {
    pub fn builder() -> SongRendererBuilder {
        SongRendererBuilder::default()
    }

    /// Register a listener for render events. Listeners run synchronously
    /// on the rendering thread, in registration order.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RenderEvent) + Send + Sync + 'static,
    {
        self.events.add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<()> {
        self.events.remove_listener(id)
    }

    pub fn is_rendering(&self) -> bool {
        self.is_rendering.load(Ordering::Acquire)
    }

    /// Ask the in-flight render to stop after the current task. Errors if
    /// no render is running.
    pub fn request_interruption(&self) -> Result<()> {
        if !self.is_rendering() {
            return Err(Error::NotRendering);
        }
        self.interruption_requested.store(true, Ordering::Release);
        Ok(())
    }

    /// The shared artifact caches.
    pub fn caches(&self) -> &RenderCache {
        &self.caches
    }

    /// Render every phrase of the snapshot, reusing cached artifacts.
    ///
    /// Fails if a render is already in progress or the snapshot is
    /// malformed. Per-phrase failures do not fail the render; they are
    /// reported through the event stream and the phrase error flags.
    pub fn render(&self, snapshot: &ScoreSnapshot) -> Result<RenderResult> {
        self.is_rendering
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::RenderInProgress)?;
        let _guard = RenderingGuard(&self.is_rendering);
        self.interruption_requested.store(false, Ordering::Release);

        snapshot.validate()?;
        self.events.emit(&RenderEvent::RenderingStarted);

        let mut phrases = extract_phrases(snapshot, &self.config)?;
        let tasks = build_tasks(&phrases, snapshot);
        let query_counts = query_task_counts(&tasks, &phrases);
        let graph = TaskGraph::new(tasks)?;
        info!(
            phrases = phrases.len(),
            tasks = graph.len(),
            "rendering started"
        );

        let phrase_tracks: BTreeMap<PhraseKey, TrackId> = phrases
            .iter()
            .map(|(key, phrase)| (key.clone(), phrase.track_id))
            .collect();
        let phrase_starts: BTreeMap<PhraseKey, f64> = phrases
            .iter()
            .map(|(key, phrase)| (key.clone(), phrase.start_time))
            .collect();

        let mut adapter = EventAdapter::new(&self.events, phrase_tracks, query_counts);
        let executor = StageExecutor {
            snapshot,
            config: &self.config,
            phrases: &mut phrases,
            caches: &self.caches,
            engine: &*self.engine,
        };

        let mut selector = self.selector.lock();
        let report = TaskRunner::new(
            &graph,
            executor,
            &mut **selector,
            |event| adapter.handle(&event),
            self.prioritize_cached,
            &self.interruption_requested,
            &phrase_starts,
        )
        .run();
        drop(selector);

        match report.outcome {
            RunOutcome::Completed => {
                for (index, status) in report.statuses.iter().enumerate() {
                    if status.is_failed_or_skipped() {
                        if let Some(key) = graph.tasks()[index].kind.phrase_key() {
                            if let Some(phrase) = phrases.get_mut(key) {
                                phrase.error_occurred_during_rendering = true;
                            }
                        }
                    }
                }
                adapter.finish();
                self.events.emit(&RenderEvent::RenderingCompleted);
                info!(
                    executed = report.tasks_executed,
                    cache_hits = report.cache_hits,
                    failures = report.failures,
                    "rendering completed"
                );
                Ok(RenderResult::Complete {
                    phrases,
                    stats: RenderStats {
                        tasks_executed: report.tasks_executed,
                        cache_hits: report.cache_hits,
                        failures: report.failures,
                    },
                })
            }
            RunOutcome::Interrupted => {
                adapter.finish();
                info!(executed = report.tasks_executed, "rendering interrupted");
                Ok(RenderResult::Interrupted)
            }
        }
    }
}

/// Clears the rendering flag on scope exit, error paths included.
struct RenderingGuard<'a>(&'a AtomicBool);

impl Drop for RenderingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Builder for [`SongRenderer`].
pub struct SongRendererBuilder {
    config: RenderConfig,
    engine: Option<Arc<dyn SynthClient>>,
    selector: Option<Box<dyn TaskSelector>>,
    prioritize_cached: bool,
}

impl Default for SongRendererBuilder {
    fn default() -> Self {
        Self {
            config: RenderConfig::default(),
            engine: None,
            selector: None,
            prioritize_cached: true,
        }
    }
}

impl SongRendererBuilder {
    /// Set the engine client. Required.
    pub fn engine<C>(mut self, engine: C) -> Self
    where
        C: SynthClient + 'static,
    {
        self.engine = Some(Arc::new(engine));
        self
    }

    /// Set the engine client from an existing shared handle.
    pub fn engine_arc(mut self, engine: Arc<dyn SynthClient>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Scheduling policy consulted when no cached work is pending.
    /// Defaults to construction order.
    pub fn selector<S>(mut self, selector: S) -> Self
    where
        S: TaskSelector + 'static,
    {
        self.selector = Some(Box::new(selector));
        self
    }

    /// Whether cached tasks preempt the selector. Defaults to true.
    pub fn prioritize_cached(mut self, prioritize_cached: bool) -> Self {
        self.prioritize_cached = prioritize_cached;
        self
    }

    pub fn build(self) -> Result<SongRenderer> {
        let engine = self.engine.ok_or_else(|| {
            Error::InvalidConfig("No engine client configured. Use .engine() to set one.".into())
        })?;
        self.config.validate()?;
        Ok(SongRenderer {
            config: self.config,
            engine,
            caches: RenderCache::new(),
            events: EventBus::new(),
            selector: Mutex::new(
                self.selector.unwrap_or_else(|| Box::new(InOrderSelector)),
            ),
            prioritize_cached: self.prioritize_cached,
            is_rendering: AtomicBool::new(false),
            interruption_requested: AtomicBool::new(false),
        })
    }
}

/// Per-track progress of query generation, grouped into one start/finish
/// event pair per track.
struct QueryGroup {
    started: bool,
    remaining: usize,
    results: Vec<PhraseQueryResult>,
}

/// Translates task lifecycle events into the public event stream: tracks
/// the warm-cache prefix and groups query results per track.
struct EventAdapter<'a> {
    events: &'a EventBus,
    phrase_tracks: BTreeMap<PhraseKey, TrackId>,
    query_groups: BTreeMap<TrackId, QueryGroup>,
    cache_load_active: bool,
    cache_loaded: BTreeSet<PhraseKey>,
}

impl<'a> EventAdapter<'a> {
    fn new(
        events: &'a EventBus,
        phrase_tracks: BTreeMap<PhraseKey, TrackId>,
        query_counts: BTreeMap<TrackId, usize>,
    ) -> Self {
        let query_groups = query_counts
            .into_iter()
            .map(|(track_id, remaining)| {
                (
                    track_id,
                    QueryGroup {
                        started: false,
                        remaining,
                        results: Vec::new(),
                    },
                )
            })
            .collect();
        Self {
            events,
            phrase_tracks,
            query_groups,
            cache_load_active: true,
            cache_loaded: BTreeSet::new(),
        }
    }

    fn handle(&mut self, event: &TaskEvent<'_>) {
        match event {
            TaskEvent::Started { task, is_cached } => {
                if self.cache_load_active && !*is_cached {
                    self.emit_cache_load_finished();
                }
                match &task.kind {
                    TaskKind::QueryGeneration { phrase_key } => {
                        if let Some(track_id) = self.phrase_tracks.get(phrase_key).copied() {
                            let group = self.query_groups.get_mut(&track_id);
                            if let Some(group) = group {
                                if !group.started {
                                    group.started = true;
                                    self.events.emit(
                                        &RenderEvent::TrackQueryGenerationStarted { track_id },
                                    );
                                }
                            }
                        }
                    }
                    TaskKind::PhonemeTimingAdjustment { .. } => {}
                    TaskKind::PitchGeneration { phrase_key } => {
                        self.events.emit(&RenderEvent::PitchGenerationStarted {
                            phrase_key: phrase_key.clone(),
                        });
                    }
                    TaskKind::VolumeGeneration { phrase_key } => {
                        self.events.emit(&RenderEvent::VolumeGenerationStarted {
                            phrase_key: phrase_key.clone(),
                        });
                    }
                    TaskKind::VoiceSynthesis { phrase_key } => {
                        self.events.emit(&RenderEvent::VoiceSynthesisStarted {
                            phrase_key: phrase_key.clone(),
                        });
                    }
                }
            }
            TaskEvent::Finished {
                task,
                is_cached,
                result,
            } => {
                if self.cache_load_active && *is_cached && result.is_ok() {
                    if let Some(phrase_key) = task.kind.phrase_key() {
                        self.cache_loaded.insert(phrase_key.clone());
                    }
                }
                match &task.kind {
                    TaskKind::QueryGeneration { phrase_key } => {
                        self.finish_query(phrase_key, *result);
                    }
                    TaskKind::PhonemeTimingAdjustment { .. } => {}
                    TaskKind::PitchGeneration { phrase_key } => {
                        let result = match result {
                            Ok(TaskOutput::Pitch { key, pitch, .. }) => StageResult::Success {
                                key: key.clone(),
                                artifact: Arc::clone(pitch),
                            },
                            Ok(_) => StageResult::Error {
                                cause: "unexpected task output".to_string(),
                            },
                            Err(error) => StageResult::Error {
                                cause: error.to_string(),
                            },
                        };
                        self.events.emit(&RenderEvent::PitchGenerationFinished {
                            phrase_key: phrase_key.clone(),
                            result,
                        });
                    }
                    TaskKind::VolumeGeneration { phrase_key } => {
                        let result = match result {
                            Ok(TaskOutput::Volume { key, volume, .. }) => StageResult::Success {
                                key: key.clone(),
                                artifact: Arc::clone(volume),
                            },
                            Ok(_) => StageResult::Error {
                                cause: "unexpected task output".to_string(),
                            },
                            Err(error) => StageResult::Error {
                                cause: error.to_string(),
                            },
                        };
                        self.events.emit(&RenderEvent::VolumeGenerationFinished {
                            phrase_key: phrase_key.clone(),
                            result,
                        });
                    }
                    TaskKind::VoiceSynthesis { phrase_key } => {
                        let result = match result {
                            Ok(TaskOutput::Voice { key, voice, .. }) => StageResult::Success {
                                key: key.clone(),
                                artifact: Arc::clone(voice),
                            },
                            Ok(_) => StageResult::Error {
                                cause: "unexpected task output".to_string(),
                            },
                            Err(error) => StageResult::Error {
                                cause: error.to_string(),
                            },
                        };
                        self.events.emit(&RenderEvent::VoiceSynthesisFinished {
                            phrase_key: phrase_key.clone(),
                            result,
                        });
                    }
                }
            }
        }
    }

    fn finish_query(
        &mut self,
        phrase_key: &PhraseKey,
        result: &std::result::Result<TaskOutput, crate::error::StageError>,
    ) {
        let Some(track_id) = self.phrase_tracks.get(phrase_key).copied() else {
            return;
        };
        let Some(group) = self.query_groups.get_mut(&track_id) else {
            return;
        };
        let result = match result {
            Ok(TaskOutput::Query { key, query, .. }) => StageResult::Success {
                key: key.clone(),
                artifact: Arc::clone(query),
            },
            Ok(_) => StageResult::Error {
                cause: "unexpected task output".to_string(),
            },
            Err(error) => StageResult::Error {
                cause: error.to_string(),
            },
        };
        group.results.push(PhraseQueryResult {
            phrase_key: phrase_key.clone(),
            result,
        });
        group.remaining = group.remaining.saturating_sub(1);
        if group.remaining == 0 {
            let results = std::mem::take(&mut group.results);
            self.events
                .emit(&RenderEvent::TrackQueryGenerationFinished { track_id, results });
        }
    }

    /// Close the warm-cache prefix if it is still open.
    fn emit_cache_load_finished(&mut self) {
        if !self.cache_load_active {
            return;
        }
        self.cache_load_active = false;
        self.events.emit(&RenderEvent::CacheLoadFinished {
            phrase_keys: std::mem::take(&mut self.cache_loaded),
        });
    }

    fn finish(&mut self) {
        self.emit_cache_load_finished();
    }
}
