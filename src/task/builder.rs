//! Pipeline construction: one task chain per phrase, one timing
//! adjustment per track.

use super::{SkipPolicy, Task, TaskId, TaskKind};
use crate::key::PhraseKey;
use crate::phrase::Phrase;
use crate::score::{ScoreSnapshot, TrackId};
use std::collections::BTreeMap;

/// Instantiate the pipeline tasks for every phrase with a singer.
///
/// Per track: each phrase gets a dependency-free query task; a single
/// timing-adjustment task depends on all of them but runs as long as at
/// least one query succeeded; each phrase then chains pitch (query +
/// adjustment), volume (pitch) and voice (volume), where any broken
/// upstream short-circuits the rest of that phrase only.
///
/// Tasks are numbered in construction order: tracks in id order, phrases
/// in score order within a track.
pub fn build_tasks(
    phrases: &BTreeMap<PhraseKey, Phrase>,
    snapshot: &ScoreSnapshot,
) -> Vec<Task> {
    let mut tasks = Vec::new();

    for &track_id in snapshot.tracks.keys() {
        let mut track_phrases: Vec<(&PhraseKey, &Phrase)> = phrases
            .iter()
            .filter(|(_, p)| p.track_id == track_id && p.singer.is_some())
            .collect();
        track_phrases.sort_by_key(|(_, p)| p.start_ticks);
        if track_phrases.is_empty() {
            continue;
        }

        let query_ids: Vec<(PhraseKey, TaskId)> = track_phrases
            .iter()
            .map(|(key, _)| {
                let id = TaskId(tasks.len());
                tasks.push(Task {
                    id,
                    kind: TaskKind::QueryGeneration {
                        phrase_key: (*key).clone(),
                    },
                    dependencies: Vec::new(),
                    skip_policy: SkipPolicy::AnyDependencyFailedOrSkipped,
                });
                ((*key).clone(), id)
            })
            .collect();

        let adjustment_id = TaskId(tasks.len());
        tasks.push(Task {
            id: adjustment_id,
            kind: TaskKind::PhonemeTimingAdjustment { track_id },
            dependencies: query_ids.iter().map(|(_, id)| *id).collect(),
            skip_policy: SkipPolicy::AllDependenciesFailedOrSkipped,
        });

        for (phrase_key, query_id) in query_ids {
            let pitch_id = TaskId(tasks.len());
            tasks.push(Task {
                id: pitch_id,
                kind: TaskKind::PitchGeneration {
                    phrase_key: phrase_key.clone(),
                },
                dependencies: vec![query_id, adjustment_id],
                skip_policy: SkipPolicy::AnyDependencyFailedOrSkipped,
            });
            let volume_id = TaskId(tasks.len());
            tasks.push(Task {
                id: volume_id,
                kind: TaskKind::VolumeGeneration {
                    phrase_key: phrase_key.clone(),
                },
                dependencies: vec![pitch_id],
                skip_policy: SkipPolicy::AnyDependencyFailedOrSkipped,
            });
            tasks.push(Task {
                id: TaskId(tasks.len()),
                kind: TaskKind::VoiceSynthesis { phrase_key },
                dependencies: vec![volume_id],
                skip_policy: SkipPolicy::AnyDependencyFailedOrSkipped,
            });
        }
    }
    tasks
}

/// Query task counts per track, used for grouping query events.
pub fn query_task_counts(tasks: &[Task], phrases: &BTreeMap<PhraseKey, Phrase>) -> BTreeMap<TrackId, usize> {
    let mut counts = BTreeMap::new();
    for task in tasks {
        if let TaskKind::QueryGeneration { phrase_key } = &task.kind {
            if let Some(phrase) = phrases.get(phrase_key) {
                *counts.entry(phrase.track_id).or_insert(0) += 1;
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RenderConfig;
    use crate::phrase::extract_phrases;
    use crate::score::{EngineId, Note, NoteId, Singer, StyleId, TrackSnapshot};
    use crate::task::graph::TaskGraph;
    use crate::tempo::TempoMap;
    use std::collections::BTreeMap;

    fn note(id: u64, position: i64) -> Note {
        Note {
            id: NoteId(id),
            position,
            duration: 480,
            note_number: 60,
            lyric: "a".to_string(),
        }
    }

    fn snapshot(singer: bool, notes: Vec<Note>) -> ScoreSnapshot {
        let mut tracks = BTreeMap::new();
        tracks.insert(
            TrackId(1),
            TrackSnapshot {
                singer: singer.then_some(Singer {
                    engine_id: EngineId(1),
                    style_id: StyleId(0),
                }),
                notes,
                ..TrackSnapshot::default()
            },
        );
        ScoreSnapshot {
            tempo_map: TempoMap::constant(480, 120.0),
            tracks,
            overlapping_note_ids: BTreeMap::new(),
            engine_frame_rates: BTreeMap::from([(EngineId(1), 93.75)]),
            editor_frame_rate: 93.75,
        }
    }

    #[test]
    fn test_no_singer_no_tasks() {
        let snapshot = snapshot(false, vec![note(1, 480)]);
        let phrases = extract_phrases(&snapshot, &RenderConfig::default()).unwrap();
        assert_eq!(phrases.len(), 1);
        assert!(build_tasks(&phrases, &snapshot).is_empty());
    }

    #[test]
    fn test_single_phrase_chain() {
        let snapshot = snapshot(true, vec![note(1, 480)]);
        let phrases = extract_phrases(&snapshot, &RenderConfig::default()).unwrap();
        let tasks = build_tasks(&phrases, &snapshot);
        // query, adjustment, pitch, volume, voice
        assert_eq!(tasks.len(), 5);
        let graph = TaskGraph::new(tasks).unwrap();

        assert!(matches!(
            graph.task(TaskId(0)).kind,
            TaskKind::QueryGeneration { .. }
        ));
        assert!(matches!(
            graph.task(TaskId(1)).kind,
            TaskKind::PhonemeTimingAdjustment { .. }
        ));
        assert_eq!(graph.parents(TaskId(1)), &[TaskId(0)]);
        assert_eq!(graph.parents(TaskId(2)), &[TaskId(0), TaskId(1)]);
        assert_eq!(graph.parents(TaskId(3)), &[TaskId(2)]);
        assert_eq!(graph.parents(TaskId(4)), &[TaskId(3)]);
    }

    #[test]
    fn test_two_phrases_share_adjustment() {
        let snapshot = snapshot(true, vec![note(1, 480), note(2, 1920)]);
        let phrases = extract_phrases(&snapshot, &RenderConfig::default()).unwrap();
        let tasks = build_tasks(&phrases, &snapshot);
        // 2 queries + 1 adjustment + 2 * (pitch, volume, voice)
        assert_eq!(tasks.len(), 9);
        let graph = TaskGraph::new(tasks).unwrap();

        let adjustment = graph
            .tasks()
            .iter()
            .find(|t| matches!(t.kind, TaskKind::PhonemeTimingAdjustment { .. }))
            .unwrap();
        assert_eq!(adjustment.dependencies.len(), 2);
        assert_eq!(
            adjustment.skip_policy,
            SkipPolicy::AllDependenciesFailedOrSkipped
        );

        for task in graph.tasks() {
            if matches!(task.kind, TaskKind::PitchGeneration { .. }) {
                assert!(task.dependencies.contains(&adjustment.id));
            }
        }
    }

    #[test]
    fn test_query_task_counts() {
        let snapshot = snapshot(true, vec![note(1, 480), note(2, 1920)]);
        let phrases = extract_phrases(&snapshot, &RenderConfig::default()).unwrap();
        let tasks = build_tasks(&phrases, &snapshot);
        let counts = query_task_counts(&tasks, &phrases);
        assert_eq!(counts, BTreeMap::from([(TrackId(1), 2)]));
    }
}
