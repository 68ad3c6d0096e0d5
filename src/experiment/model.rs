//! Experiment record: ordered sub-tasks plus their positional implementations.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::task::Task;
use super::workspace::{SharedWorkspace, Workspace};

/// Implementation state of one sub-task.
#[derive(Debug, Clone, Default)]
pub enum Implementation {
    /// The sub-task has not been successfully generated in this experiment's lifetime.
    #[default]
    NotImplemented,
    /// The sub-task's files live in this workspace (possibly the shared experiment workspace).
    Implemented(SharedWorkspace),
}

impl Implementation {
    pub fn is_implemented(&self) -> bool {
        matches!(self, Implementation::Implemented(_))
    }

    pub fn workspace(&self) -> Option<&SharedWorkspace> {
        match self {
            Implementation::Implemented(ws) => Some(ws),
            Implementation::NotImplemented => None,
        }
    }
}

/// An ordered sequence of tasks and the evolving artifacts that implement them.
///
/// `sub_implementations` always has exactly one slot per sub-task; slot `i`
/// belongs to `sub_tasks[i]`.
#[derive(Debug)]
pub struct Experiment<T: Task> {
    id: Uuid,
    created_at: DateTime<Utc>,
    sub_tasks: Vec<T>,
    sub_implementations: Vec<Implementation>,
    experiment_workspace: SharedWorkspace,
    based_experiments: Vec<Arc<Experiment<T>>>,
    result: Option<serde_json::Value>,
}

impl<T: Task> Experiment<T> {
    /// Creates an experiment with every sub-task unimplemented.
    pub fn new(sub_tasks: Vec<T>, workspace: Workspace) -> Self {
        let sub_implementations = vec![Implementation::NotImplemented; sub_tasks.len()];
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            sub_tasks,
            sub_implementations,
            experiment_workspace: SharedWorkspace::new(workspace),
            based_experiments: Vec::new(),
            result: None,
        }
    }

    /// Records the experiments this one was derived from.
    pub fn with_based_experiments(mut self, based: Vec<Arc<Experiment<T>>>) -> Self {
        self.based_experiments = based;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sub_tasks(&self) -> &[T] {
        &self.sub_tasks
    }

    pub fn sub_implementations(&self) -> &[Implementation] {
        &self.sub_implementations
    }

    pub fn implementation(&self, index: usize) -> Option<&Implementation> {
        self.sub_implementations.get(index)
    }

    pub fn is_implemented(&self, index: usize) -> bool {
        self.sub_implementations
            .get(index)
            .is_some_and(Implementation::is_implemented)
    }

    pub fn implemented_count(&self) -> usize {
        self.sub_implementations
            .iter()
            .filter(|i| i.is_implemented())
            .count()
    }

    pub fn len(&self) -> usize {
        self.sub_tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sub_tasks.is_empty()
    }

    /// The experiment-level workspace that sub-tasks share by default.
    pub fn experiment_workspace(&self) -> &SharedWorkspace {
        &self.experiment_workspace
    }

    /// Workspace sub-task `index` reads from: its own once bound, otherwise the shared one.
    pub fn workspace_for(&self, index: usize) -> &SharedWorkspace {
        self.sub_implementations
            .get(index)
            .and_then(Implementation::workspace)
            .unwrap_or(&self.experiment_workspace)
    }

    pub fn based_experiments(&self) -> &[Arc<Experiment<T>>] {
        &self.based_experiments
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.result.as_ref()
    }

    pub fn set_result(&mut self, result: serde_json::Value) {
        self.result = Some(result);
    }

    /// Binds sub-task `index` to `workspace` unless it already has one.
    ///
    /// Returns the workspace the sub-task is bound to afterwards, or `None`
    /// when `index` is out of range.
    pub(crate) fn bind_implementation(
        &mut self,
        index: usize,
        workspace: impl FnOnce() -> SharedWorkspace,
    ) -> Option<SharedWorkspace> {
        let slot = self.sub_implementations.get_mut(index)?;
        if let Implementation::NotImplemented = slot {
            *slot = Implementation::Implemented(workspace());
        }
        slot.workspace().cloned()
    }
}
