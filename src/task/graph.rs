//! Validated task graph with parent and child adjacency.

use super::{Task, TaskId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("task id {0} does not match its position {1}")]
    IdOutOfOrder(usize, usize),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: usize, dependency: usize },

    #[error("task {task} lists dependency {dependency} twice")]
    DuplicateDependency { task: usize, dependency: usize },

    #[error("dependency cycle involving task {0}")]
    Cycle(usize),
}

/// A set of tasks plus its parents and children maps. Construction
/// validates ids, dependency references and acyclicity.
#[derive(Debug)]
pub struct TaskGraph {
    tasks: Vec<Task>,
    children: Vec<Vec<TaskId>>,
}

impl TaskGraph {
    pub fn new(tasks: Vec<Task>) -> Result<Self, GraphError> {
        for (index, task) in tasks.iter().enumerate() {
            if task.id.0 != index {
                return Err(GraphError::IdOutOfOrder(task.id.0, index));
            }
        }
        let mut children: Vec<Vec<TaskId>> = vec![Vec::new(); tasks.len()];
        for task in &tasks {
            for (i, &dep) in task.dependencies.iter().enumerate() {
                if dep.0 >= tasks.len() {
                    return Err(GraphError::UnknownDependency {
                        task: task.id.0,
                        dependency: dep.0,
                    });
                }
                if task.dependencies[..i].contains(&dep) {
                    return Err(GraphError::DuplicateDependency {
                        task: task.id.0,
                        dependency: dep.0,
                    });
                }
                children[dep.0].push(task.id);
            }
        }

        let graph = Self { tasks, children };
        graph.check_acyclic()?;
        Ok(graph)
    }

    /// Kahn's algorithm; any task never reaching in-degree zero sits on a
    /// cycle.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        let mut in_degree: Vec<usize> =
            self.tasks.iter().map(|t| t.dependencies.len()).collect();
        let mut queue: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|t| t.dependencies.is_empty())
            .map(|t| t.id)
            .collect();
        let mut visited = 0;
        while let Some(id) = queue.pop() {
            visited += 1;
            for &child in self.children(id) {
                in_degree[child.0] -= 1;
                if in_degree[child.0] == 0 {
                    queue.push(child);
                }
            }
        }
        if visited != self.tasks.len() {
            let on_cycle = in_degree
                .iter()
                .position(|&d| d > 0)
                .unwrap_or_default();
            return Err(GraphError::Cycle(on_cycle));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn parents(&self, id: TaskId) -> &[TaskId] {
        &self.tasks[id.0].dependencies
    }

    pub fn children(&self, id: TaskId) -> &[TaskId] {
        &self.children[id.0]
    }
}
