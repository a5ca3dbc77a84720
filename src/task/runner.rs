//! Single-threaded cooperative DAG runner with cache-first scheduling.

use super::graph::TaskGraph;
use super::{CacheStatus, RunStatus, Task, TaskId};
use crate::error::StageError;
use crate::key::PhraseKey;
use crate::stages::TaskOutput;
use atomic_float::AtomicF64;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Executes a task's stage logic. The runner only sees settled results;
/// a returned error marks the task failed without touching its siblings.
pub trait TaskExecutor {
    /// Probe whether the task's artifact can be served from cache.
    fn is_cached(&mut self, task: &Task) -> bool;

    fn execute(&mut self, task: &Task) -> Result<TaskOutput, StageError>;
}

/// What the selector sees when asked for the next task.
pub struct SelectorContext<'a> {
    pub tasks: &'a [Task],
    pub statuses: &'a [RunStatus],
    /// Absolute start time of every phrase, for proximity policies.
    pub phrase_starts: &'a BTreeMap<PhraseKey, f64>,
}

impl SelectorContext<'_> {
    /// Runnable task ids in construction order.
    pub fn runnable(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, status)| **status == RunStatus::Runnable)
            .map(|(index, _)| TaskId(index))
    }
}

/// Picks the next task when no cached work is pending. Returning `None`
/// ends the run; the runner treats everything still unsettled as skipped.
pub trait TaskSelector: Send {
    fn select(&mut self, ctx: &SelectorContext<'_>) -> Option<TaskId>;
}

/// Default policy: first runnable task in construction order.
#[derive(Debug, Default)]
pub struct InOrderSelector;

impl TaskSelector for InOrderSelector {
    fn select(&mut self, ctx: &SelectorContext<'_>) -> Option<TaskId> {
        ctx.runnable().next()
    }
}

/// Prefers the runnable task whose phrase starts nearest the playhead, so
/// the audible region becomes playable first. The playhead position in
/// seconds is shared with the host as an `AtomicF64` it writes from its
/// playback side; tasks with no phrase (timing adjustment) rank by
/// construction order at distance zero since they gate every downstream
/// stage of their track.
#[derive(Debug, Default)]
pub struct PlayheadProximitySelector {
    playhead: Arc<AtomicF64>,
}

impl PlayheadProximitySelector {
    pub fn new(playhead: Arc<AtomicF64>) -> Self {
        Self { playhead }
    }

    /// Handle the host writes the playback position to.
    pub fn playhead(&self) -> Arc<AtomicF64> {
        Arc::clone(&self.playhead)
    }
}

impl TaskSelector for PlayheadProximitySelector {
    fn select(&mut self, ctx: &SelectorContext<'_>) -> Option<TaskId> {
        let playhead = self.playhead.load(Ordering::Acquire);
        ctx.runnable().min_by(|&a, &b| {
            let distance = |id: TaskId| {
                ctx.tasks[id.0]
                    .kind
                    .phrase_key()
                    .and_then(|key| ctx.phrase_starts.get(key))
                    .map(|start| (start - playhead).abs())
                    .unwrap_or(0.0)
            };
            distance(a)
                .partial_cmp(&distance(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        })
    }
}

/// Lifecycle notifications emitted while the runner executes tasks.
#[derive(Debug)]
pub enum TaskEvent<'a> {
    Started {
        task: &'a Task,
        is_cached: bool,
    },
    Finished {
        task: &'a Task,
        is_cached: bool,
        result: &'a Result<TaskOutput, StageError>,
    },
}

/// How the run loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Interrupted,
}

/// Final report of a run: the outcome, every task's settled status, and
/// simple counters for observability.
#[derive(Debug)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub statuses: Vec<RunStatus>,
    pub tasks_executed: usize,
    pub cache_hits: usize,
    pub failures: usize,
}

/// Drives a task graph to completion.
///
/// The loop is single-threaded and cooperative: it checks the
/// interruption flag, probes caches for newly runnable tasks, prefers
/// cached work (cheap, and it unblocks descendants early), asks the
/// selector otherwise, executes one task to completion, then propagates
/// the result downstream.
pub struct TaskRunner<'a, E, F>
where
    E: TaskExecutor,
    F: FnMut(TaskEvent<'_>),
{
    graph: &'a TaskGraph,
    executor: E,
    selector: &'a mut dyn TaskSelector,
    on_event: F,
    prioritize_cached: bool,
    interrupt: &'a AtomicBool,
    phrase_starts: &'a BTreeMap<PhraseKey, f64>,
    statuses: Vec<RunStatus>,
    cache_statuses: Vec<CacheStatus>,
    pending_cache_check: VecDeque<TaskId>,
    cached_runnable: Vec<TaskId>,
}

impl<'a, E, F> TaskRunner<'a, E, F>
where
    E: TaskExecutor,
    F: FnMut(TaskEvent<'_>),
{
    pub fn new(
        graph: &'a TaskGraph,
        executor: E,
        selector: &'a mut dyn TaskSelector,
        on_event: F,
        prioritize_cached: bool,
        interrupt: &'a AtomicBool,
        phrase_starts: &'a BTreeMap<PhraseKey, f64>,
    ) -> Self {
        let mut statuses = vec![RunStatus::AwaitingDependencies; graph.len()];
        let mut pending_cache_check = VecDeque::new();
        for task in graph.tasks() {
            if task.dependencies.is_empty() {
                statuses[task.id.0] = RunStatus::Runnable;
                pending_cache_check.push_back(task.id);
            }
        }
        Self {
            graph,
            executor,
            selector,
            on_event,
            prioritize_cached,
            interrupt,
            phrase_starts,
            statuses,
            cache_statuses: vec![CacheStatus::Unchecked; graph.len()],
            pending_cache_check,
            cached_runnable: Vec::new(),
        }
    }

    pub fn run(mut self) -> RunReport {
        let mut tasks_executed = 0;
        let mut cache_hits = 0;
        let mut failures = 0;

        let outcome = loop {
            if self.interrupt.load(Ordering::Acquire) {
                debug!("interruption requested, leaving run loop");
                break RunOutcome::Interrupted;
            }

            self.drain_cache_checks();

            let Some(task_id) = self.pick_next() else {
                break RunOutcome::Completed;
            };

            let task = self.graph.task(task_id);
            let is_cached = self.cache_statuses[task_id.0] == CacheStatus::Cached;
            self.statuses[task_id.0] = RunStatus::Running;
            (self.on_event)(TaskEvent::Started { task, is_cached });
            debug!(task = task.kind.label(), cached = is_cached, "task started");

            let result = self.executor.execute(task);
            tasks_executed += 1;
            match &result {
                Ok(_) => {
                    if is_cached {
                        cache_hits += 1;
                    }
                    self.statuses[task_id.0] = RunStatus::Success;
                }
                Err(error) => {
                    failures += 1;
                    warn!(task = task.kind.label(), %error, "task failed");
                    self.statuses[task_id.0] = RunStatus::Failed;
                }
            }
            (self.on_event)(TaskEvent::Finished {
                task,
                is_cached,
                result: &result,
            });

            match result {
                Ok(_) => self.propagate_success(task_id),
                Err(_) => self.propagate_failure(task_id),
            }
        };

        // Nothing left runs: everything not settled is skipped.
        for status in self.statuses.iter_mut() {
            if matches!(
                status,
                RunStatus::AwaitingDependencies | RunStatus::Runnable
            ) {
                *status = RunStatus::Skipped;
            }
        }

        RunReport {
            outcome,
            statuses: self.statuses,
            tasks_executed,
            cache_hits,
            failures,
        }
    }

    fn drain_cache_checks(&mut self) {
        while let Some(task_id) = self.pending_cache_check.pop_front() {
            let task = self.graph.task(task_id);
            let status = if !task.kind.is_cacheable() {
                CacheStatus::NotCached
            } else if self.executor.is_cached(task) {
                CacheStatus::Cached
            } else {
                CacheStatus::NotCached
            };
            self.cache_statuses[task_id.0] = status;
            if status == CacheStatus::Cached {
                self.cached_runnable.push(task_id);
            }
        }
    }

    fn pick_next(&mut self) -> Option<TaskId> {
        if self.prioritize_cached {
            // The stack may hold tasks a selector already ran.
            while let Some(task_id) = self.cached_runnable.pop() {
                if self.statuses[task_id.0] == RunStatus::Runnable {
                    return Some(task_id);
                }
            }
        }
        let ctx = SelectorContext {
            tasks: self.graph.tasks(),
            statuses: &self.statuses,
            phrase_starts: self.phrase_starts,
        };
        let picked = self.selector.select(&ctx)?;
        if self.statuses[picked.0] != RunStatus::Runnable {
            warn!(task = picked.0, "selector returned a non-runnable task, stopping");
            return None;
        }
        Some(picked)
    }

    fn propagate_success(&mut self, task_id: TaskId) {
        for &child in self.graph.children(task_id) {
            if self.statuses[child.0] != RunStatus::AwaitingDependencies {
                continue;
            }
            if self.all_parents_settled(child) {
                self.statuses[child.0] = RunStatus::Runnable;
                self.pending_cache_check.push_back(child);
            }
        }
    }

    /// Depth-first skip propagation. A skipped child keeps propagating;
    /// a child whose policy lets it survive becomes runnable once all its
    /// parents settled.
    fn propagate_failure(&mut self, task_id: TaskId) {
        let mut stack = vec![task_id];
        while let Some(current) = stack.pop() {
            for &child in self.graph.children(current) {
                if self.statuses[child.0] != RunStatus::AwaitingDependencies {
                    continue;
                }
                let child_task = self.graph.task(child);
                let parents = self.graph.parents(child);
                let should_skip = match child_task.skip_policy {
                    super::SkipPolicy::AnyDependencyFailedOrSkipped => parents
                        .iter()
                        .any(|&p| self.statuses[p.0].is_failed_or_skipped()),
                    super::SkipPolicy::AllDependenciesFailedOrSkipped => parents
                        .iter()
                        .all(|&p| self.statuses[p.0].is_failed_or_skipped()),
                };
                if should_skip {
                    self.statuses[child.0] = RunStatus::Skipped;
                    stack.push(child);
                } else if self.all_parents_settled(child) {
                    self.statuses[child.0] = RunStatus::Runnable;
                    self.pending_cache_check.push_back(child);
                }
            }
        }
    }

    fn all_parents_settled(&self, task_id: TaskId) -> bool {
        self.graph
            .parents(task_id)
            .iter()
            .all(|&p| self.statuses[p.0].is_settled())
    }
}
