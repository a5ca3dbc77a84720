//! Task graph primitives for the rendering pipeline.

pub mod builder;
pub mod graph;
pub mod runner;

use crate::key::PhraseKey;
use crate::score::TrackId;

/// Index of a task within its graph. Assigned in construction order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

/// How a task reacts when dependencies fail or get skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipPolicy {
    /// One broken dependency is enough to skip the task.
    AnyDependencyFailedOrSkipped,
    /// The task still runs unless every dependency broke.
    AllDependenciesFailedOrSkipped,
}

/// Execution state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    AwaitingDependencies,
    Runnable,
    Running,
    Success,
    Failed,
    Skipped,
}

impl RunStatus {
    /// A settled task will never run again this render.
    #[inline]
    pub fn is_settled(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::Skipped)
    }

    #[inline]
    pub fn is_failed_or_skipped(self) -> bool {
        matches!(self, RunStatus::Failed | RunStatus::Skipped)
    }
}

/// Result of the cache probe performed when a task becomes runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Unchecked,
    Cached,
    NotCached,
}

/// What a task computes. Four of the five kinds work on a single phrase;
/// phoneme timing adjustment batches a whole track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    QueryGeneration { phrase_key: PhraseKey },
    PhonemeTimingAdjustment { track_id: TrackId },
    PitchGeneration { phrase_key: PhraseKey },
    VolumeGeneration { phrase_key: PhraseKey },
    VoiceSynthesis { phrase_key: PhraseKey },
}

impl TaskKind {
    /// Whether the artifact of this kind lives in a content-addressed
    /// cache. Timing adjustment is a pure transform and is recomputed.
    pub fn is_cacheable(&self) -> bool {
        !matches!(self, TaskKind::PhonemeTimingAdjustment { .. })
    }

    /// The phrase this task works on, if it is phrase-scoped.
    pub fn phrase_key(&self) -> Option<&PhraseKey> {
        match self {
            TaskKind::QueryGeneration { phrase_key }
            | TaskKind::PitchGeneration { phrase_key }
            | TaskKind::VolumeGeneration { phrase_key }
            | TaskKind::VoiceSynthesis { phrase_key } => Some(phrase_key),
            TaskKind::PhonemeTimingAdjustment { .. } => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::QueryGeneration { .. } => "query-generation",
            TaskKind::PhonemeTimingAdjustment { .. } => "phoneme-timing-adjustment",
            TaskKind::PitchGeneration { .. } => "pitch-generation",
            TaskKind::VolumeGeneration { .. } => "volume-generation",
            TaskKind::VoiceSynthesis { .. } => "voice-synthesis",
        }
    }
}

/// A node of the pipeline graph.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub dependencies: Vec<TaskId>,
    pub skip_policy: SkipPolicy,
}
