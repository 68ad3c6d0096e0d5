//! Candidate generation across bounded parallel workers.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{EvolveError, LlmError};
use crate::experiment::{validate_relative, Experiment, FileMap, Task, Workspace};
use crate::knowledge::QueriedKnowledge;
use crate::metrics::MetricsCollector;

/// Result of one generation attempt for one sub-task.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    /// The task was not part of this round (already passing, given up, ...).
    NotAttempted,
    /// Generation was attempted and failed; the reason becomes a failure trace.
    Failed(String),
    /// A code bundle ready to be merged.
    Generated(FileMap),
}

impl Candidate {
    pub fn is_generated(&self) -> bool {
        matches!(self, Candidate::Generated(_))
    }

    pub fn is_attempted(&self) -> bool {
        !matches!(self, Candidate::NotAttempted)
    }

    pub fn files(&self) -> Option<&FileMap> {
        match self {
            Candidate::Generated(files) => Some(files),
            _ => None,
        }
    }
}

/// Why a single task could not be generated.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Only this task is affected (malformed payload, missing file, ...).
    #[error("{0}")]
    Task(String),

    /// The completion service cannot serve any task.
    #[error("completion service unavailable: {0}")]
    Fatal(#[source] LlmError),
}

impl From<LlmError> for GenerationError {
    fn from(err: LlmError) -> Self {
        if err.is_unavailable() {
            GenerationError::Fatal(err)
        } else {
            GenerationError::Task(err.to_string())
        }
    }
}

/// Produces the code for a single sub-task.
#[async_trait]
pub trait TaskCoder<T: Task>: Send + Sync {
    /// Generates the files for `task`.
    ///
    /// `workspace` is a read-only copy of the files already committed to the
    /// workspace the task writes into.
    async fn implement_one_task(
        &self,
        task: &T,
        queried: &QueriedKnowledge,
        workspace: &Workspace,
    ) -> Result<FileMap, GenerationError>;
}

/// Produces one candidate per sub-task for a round.
#[async_trait]
pub trait EvolvingStrategy<T: Task>: Send + Sync {
    /// Returns candidates positionally aligned with `experiment.sub_tasks()`.
    ///
    /// Only tasks covered by `queried` are attempted; the rest are
    /// [`Candidate::NotAttempted`].
    async fn implement(
        &self,
        experiment: &Experiment<T>,
        queried: &QueriedKnowledge,
    ) -> Result<Vec<Candidate>, EvolveError>;
}

/// Runs a [`TaskCoder`] for every attempted task, at most `max_concurrency` at a time.
pub struct MultiProcessEvolvingStrategy<T: Task> {
    coder: Arc<dyn TaskCoder<T>>,
    max_concurrency: usize,
    metrics: MetricsCollector,
}

impl<T: Task> MultiProcessEvolvingStrategy<T> {
    pub fn new(coder: Arc<dyn TaskCoder<T>>, max_concurrency: usize) -> Self {
        Self {
            coder,
            max_concurrency: max_concurrency.max(1),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn run_one(
        &self,
        index: usize,
        task: &T,
        queried: &QueriedKnowledge,
        workspace: Workspace,
        semaphore: &Semaphore,
    ) -> Result<Candidate, LlmError> {
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return Ok(Candidate::Failed("worker pool closed".to_string())),
        };
        self.metrics.inc_workers();
        let result = self
            .coder
            .implement_one_task(task, queried, &workspace)
            .await;
        self.metrics.dec_workers();

        match result {
            Ok(files) if files.is_empty() => {
                warn!(index, task = task.name(), "Coder returned no files");
                Ok(Candidate::Failed("generation produced no files".to_string()))
            }
            Ok(files) => {
                if let Some(err) = files.keys().find_map(|name| validate_relative(name).err()) {
                    warn!(index, task = task.name(), error = %err, "Coder returned an invalid file name");
                    return Ok(Candidate::Failed(err.to_string()));
                }
                debug!(index, task = task.name(), files = files.len(), "Generated candidate");
                Ok(Candidate::Generated(files))
            }
            Err(GenerationError::Task(reason)) => {
                warn!(index, task = task.name(), reason = %reason, "Generation failed");
                Ok(Candidate::Failed(reason))
            }
            Err(GenerationError::Fatal(err)) => Err(err),
        }
    }
}

#[async_trait]
impl<T: Task> EvolvingStrategy<T> for MultiProcessEvolvingStrategy<T> {
    async fn implement(
        &self,
        experiment: &Experiment<T>,
        queried: &QueriedKnowledge,
    ) -> Result<Vec<Candidate>, EvolveError> {
        let semaphore = Semaphore::new(self.max_concurrency);

        // Workspace copies are taken before any worker starts, so every task
        // sees the same committed state.
        let mut jobs = Vec::new();
        for (index, task) in experiment.sub_tasks().iter().enumerate() {
            if queried.covers(&task.fingerprint()) {
                let workspace = experiment.workspace_for(index).cloned().await;
                jobs.push((index, task, workspace));
            }
        }
        info!(
            attempted = jobs.len(),
            total = experiment.len(),
            max_concurrency = self.max_concurrency,
            "Generating candidates"
        );

        let results = join_all(jobs.into_iter().map(|(index, task, workspace)| {
            let semaphore = &semaphore;
            async move {
                (
                    index,
                    self.run_one(index, task, queried, workspace, semaphore).await,
                )
            }
        }))
        .await;

        let mut candidates = vec![Candidate::NotAttempted; experiment.len()];
        for (index, result) in results {
            candidates[index] = result.map_err(EvolveError::ServiceUnavailable)?;
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::CodingTask;
    use crate::knowledge::KnowledgeBase;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns scripted outcomes keyed by task name, tracking peak concurrency.
    struct ScriptedCoder {
        outcomes: HashMap<String, Result<FileMap, String>>,
        fatal_for: Option<String>,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedCoder {
        fn new(outcomes: Vec<(&str, Result<FileMap, String>)>) -> Self {
            Self {
                outcomes: outcomes
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v))
                    .collect(),
                fatal_for: None,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl TaskCoder<CodingTask> for ScriptedCoder {
        async fn implement_one_task(
            &self,
            task: &CodingTask,
            _queried: &QueriedKnowledge,
            _workspace: &Workspace,
        ) -> Result<FileMap, GenerationError> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.fatal_for.as_deref() == Some(task.name.as_str()) {
                return Err(GenerationError::Fatal(LlmError::MissingApiBase));
            }
            match self.outcomes.get(&task.name) {
                Some(Ok(files)) => Ok(files.clone()),
                Some(Err(reason)) => Err(GenerationError::Task(reason.clone())),
                None => Err(GenerationError::Task("unscripted".to_string())),
            }
        }
    }

    fn file(name: &str, content: &str) -> FileMap {
        FileMap::from([(name.to_string(), content.to_string())])
    }

    fn experiment(names: &[&str]) -> Experiment<CodingTask> {
        let tasks = names
            .iter()
            .map(|n| CodingTask::new(*n, format!("implement {}", n)))
            .collect();
        Experiment::new(tasks, Workspace::new())
    }

    #[tokio::test]
    async fn test_candidates_are_positional() {
        let exp = experiment(&["a", "b", "c"]);
        let coder = ScriptedCoder::new(vec![
            ("a", Ok(file("a.py", "A"))),
            ("b", Err("bad json".to_string())),
            ("c", Ok(file("c.py", "C"))),
        ]);
        let strategy = MultiProcessEvolvingStrategy::new(Arc::new(coder), 2);
        let queried = KnowledgeBase::default().query(exp.sub_tasks()).await;

        let candidates = strategy.implement(&exp, &queried).await.expect("implement");
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0], Candidate::Generated(file("a.py", "A")));
        assert_eq!(candidates[1], Candidate::Failed("bad json".to_string()));
        assert_eq!(candidates[2], Candidate::Generated(file("c.py", "C")));
    }

    #[tokio::test]
    async fn test_only_queried_tasks_are_attempted() {
        let exp = experiment(&["a", "b"]);
        let coder = ScriptedCoder::new(vec![
            ("a", Ok(file("a.py", "A"))),
            ("b", Ok(file("b.py", "B"))),
        ]);
        let strategy = MultiProcessEvolvingStrategy::new(Arc::new(coder), 4);
        let queried = KnowledgeBase::default()
            .query(&exp.sub_tasks()[1..])
            .await;

        let candidates = strategy.implement(&exp, &queried).await.expect("implement");
        assert_eq!(candidates[0], Candidate::NotAttempted);
        assert!(candidates[1].is_generated());
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let names = ["a", "b", "c", "d", "e", "f"];
        let exp = experiment(&names);
        let coder = Arc::new(ScriptedCoder::new(
            names.iter().map(|n| (*n, Ok(file("x.py", n)))).collect(),
        ));
        let strategy = MultiProcessEvolvingStrategy::new(coder.clone(), 2);
        let queried = KnowledgeBase::default().query(exp.sub_tasks()).await;

        strategy.implement(&exp, &queried).await.expect("implement");
        assert!(coder.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_fatal_error_propagates() {
        let exp = experiment(&["a", "b"]);
        let mut coder = ScriptedCoder::new(vec![("a", Ok(file("a.py", "A")))]);
        coder.fatal_for = Some("b".to_string());
        let strategy = MultiProcessEvolvingStrategy::new(Arc::new(coder), 2);
        let queried = KnowledgeBase::default().query(exp.sub_tasks()).await;

        let err = strategy.implement(&exp, &queried).await.unwrap_err();
        assert!(matches!(err, EvolveError::ServiceUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_bundle_is_a_failure() {
        let exp = experiment(&["a"]);
        let coder = ScriptedCoder::new(vec![("a", Ok(FileMap::new()))]);
        let strategy = MultiProcessEvolvingStrategy::new(Arc::new(coder), 1);
        let queried = KnowledgeBase::default().query(exp.sub_tasks()).await;

        let candidates = strategy.implement(&exp, &queried).await.expect("implement");
        assert!(matches!(candidates[0], Candidate::Failed(_)));
    }

    #[tokio::test]
    async fn test_escaping_file_name_is_a_task_failure() {
        let exp = experiment(&["a", "b"]);
        let coder = ScriptedCoder::new(vec![
            ("a", Ok(file("a.py", "A"))),
            ("b", Ok(file("../escape.py", "B"))),
        ]);
        let strategy = MultiProcessEvolvingStrategy::new(Arc::new(coder), 2);
        let queried = KnowledgeBase::default().query(exp.sub_tasks()).await;

        let candidates = strategy.implement(&exp, &queried).await.expect("implement");
        assert!(candidates[0].is_generated());
        assert!(matches!(&candidates[1], Candidate::Failed(reason) if reason.contains("../escape.py")));
    }

    #[test]
    fn test_llm_error_classification() {
        assert!(matches!(
            GenerationError::from(LlmError::RequestFailed("refused".into())),
            GenerationError::Fatal(_)
        ));
        assert!(matches!(
            GenerationError::from(LlmError::ParseError("bad".into())),
            GenerationError::Task(_)
        ));
        assert!(matches!(
            GenerationError::from(LlmError::Timeout("elapsed".into())),
            GenerationError::Task(_)
        ));
    }
}
