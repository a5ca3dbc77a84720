//! Content-addressed artifact caches shared across renders.

use crate::engine::SingingVoice;
use crate::key::{PitchKey, QueryKey, VoiceKey, VolumeKey};
use crate::query::FrameAudioQuery;
use dashmap::DashMap;
use std::sync::Arc;

/// The four artifact caches. Keys are content hashes, so an entry is valid
/// for any render whose inputs hash the same; entries are never evicted.
/// A stage writes its cache only after it fully succeeded.
#[derive(Debug, Default)]
pub struct RenderCache {
    queries: DashMap<QueryKey, Arc<FrameAudioQuery>>,
    pitches: DashMap<PitchKey, Arc<Vec<f64>>>,
    volumes: DashMap<VolumeKey, Arc<Vec<f64>>>,
    voices: DashMap<VoiceKey, Arc<SingingVoice>>,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_query(&self, key: &QueryKey) -> Option<Arc<FrameAudioQuery>> {
        self.queries.get(key).map(|entry| Arc::clone(&entry))
    }

    pub fn put_query(&self, key: QueryKey, query: Arc<FrameAudioQuery>) {
        self.queries.insert(key, query);
    }

    pub fn contains_query(&self, key: &QueryKey) -> bool {
        self.queries.contains_key(key)
    }

    pub fn get_pitch(&self, key: &PitchKey) -> Option<Arc<Vec<f64>>> {
        self.pitches.get(key).map(|entry| Arc::clone(&entry))
    }

    pub fn put_pitch(&self, key: PitchKey, pitch: Arc<Vec<f64>>) {
        self.pitches.insert(key, pitch);
    }

    pub fn contains_pitch(&self, key: &PitchKey) -> bool {
        self.pitches.contains_key(key)
    }

    pub fn get_volume(&self, key: &VolumeKey) -> Option<Arc<Vec<f64>>> {
        self.volumes.get(key).map(|entry| Arc::clone(&entry))
    }

    pub fn put_volume(&self, key: VolumeKey, volume: Arc<Vec<f64>>) {
        self.volumes.insert(key, volume);
    }

    pub fn contains_volume(&self, key: &VolumeKey) -> bool {
        self.volumes.contains_key(key)
    }

    pub fn get_voice(&self, key: &VoiceKey) -> Option<Arc<SingingVoice>> {
        self.voices.get(key).map(|entry| Arc::clone(&entry))
    }

    pub fn put_voice(&self, key: VoiceKey, voice: Arc<SingingVoice>) {
        self.voices.insert(key, voice);
    }

    pub fn contains_voice(&self, key: &VoiceKey) -> bool {
        self.voices.contains_key(key)
    }

    /// Entry counts as (queries, pitches, volumes, voices).
    pub fn sizes(&self) -> (usize, usize, usize, usize) {
        (
            self.queries.len(),
            self.pitches.len(),
            self.volumes.len(),
            self.voices.len(),
        )
    }

    pub fn clear(&self) {
        self.queries.clear();
        self.pitches.clear();
        self.volumes.clear();
        self.voices.clear();
    }
}
