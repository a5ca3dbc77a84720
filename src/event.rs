//! Render event stream with synchronous, ordered fan-out.

use crate::engine::SingingVoice;
use crate::key::{PhraseKey, PitchKey, QueryKey, VoiceKey, VolumeKey};
use crate::query::FrameAudioQuery;
use crate::score::TrackId;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of one pipeline stage for one phrase.
#[derive(Debug, Clone)]
pub enum StageResult<K, A> {
    Success { key: K, artifact: A },
    Error { cause: String },
}

impl<K, A> StageResult<K, A> {
    pub fn is_success(&self) -> bool {
        matches!(self, StageResult::Success { .. })
    }
}

/// Query generation outcome for one phrase of a track.
#[derive(Debug, Clone)]
pub struct PhraseQueryResult {
    pub phrase_key: PhraseKey,
    pub result: StageResult<QueryKey, Arc<FrameAudioQuery>>,
}

/// Progress of a render, delivered to listeners synchronously and in
/// registration order.
#[derive(Debug, Clone)]
pub enum RenderEvent {
    RenderingStarted,
    /// The warm-cache prefix of the run is over: every artifact loaded
    /// purely from cache so far belongs to one of these phrases.
    CacheLoadFinished {
        phrase_keys: BTreeSet<PhraseKey>,
    },
    TrackQueryGenerationStarted {
        track_id: TrackId,
    },
    /// All query tasks of the track settled; per-phrase results are
    /// delivered together.
    TrackQueryGenerationFinished {
        track_id: TrackId,
        results: Vec<PhraseQueryResult>,
    },
    PitchGenerationStarted {
        phrase_key: PhraseKey,
    },
    PitchGenerationFinished {
        phrase_key: PhraseKey,
        result: StageResult<PitchKey, Arc<Vec<f64>>>,
    },
    VolumeGenerationStarted {
        phrase_key: PhraseKey,
    },
    VolumeGenerationFinished {
        phrase_key: PhraseKey,
        result: StageResult<VolumeKey, Arc<Vec<f64>>>,
    },
    VoiceSynthesisStarted {
        phrase_key: PhraseKey,
    },
    VoiceSynthesisFinished {
        phrase_key: PhraseKey,
        result: StageResult<VoiceKey, Arc<SingingVoice>>,
    },
    RenderingCompleted,
}

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&RenderEvent) + Send + Sync>;

/// Listener registry. Emission snapshots the listener list, so a listener
/// may register or remove listeners re-entrantly; such changes take
/// effect from the next event.
#[derive(Default)]
pub struct EventBus {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&RenderEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> Result<()> {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        if listeners.len() == before {
            return Err(Error::ListenerNotFound);
        }
        Ok(())
    }

    pub fn emit(&self, event: &RenderEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}
