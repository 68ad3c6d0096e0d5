//! Evaluator trait and verdict types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::experiment::{Experiment, Task};

/// Verdict and feedback for one sub-task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFeedback {
    pub passed: bool,
    /// Free text suitable for reinjection as a failure trace.
    pub feedback: String,
}

impl TaskFeedback {
    pub fn pass(feedback: impl Into<String>) -> Self {
        Self {
            passed: true,
            feedback: feedback.into(),
        }
    }

    pub fn fail(feedback: impl Into<String>) -> Self {
        Self {
            passed: false,
            feedback: feedback.into(),
        }
    }
}

/// Per-task verdicts of one evaluator, positionally aligned with the sub-tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub evaluator: String,
    pub tasks: Vec<TaskFeedback>,
}

impl EvaluationReport {
    pub fn new(evaluator: impl Into<String>, tasks: Vec<TaskFeedback>) -> Self {
        Self {
            evaluator: evaluator.into(),
            tasks,
        }
    }

    /// True when every sub-task passed.
    pub fn overall_passed(&self) -> bool {
        self.tasks.iter().all(|t| t.passed)
    }

    pub fn passed(&self, index: usize) -> bool {
        self.tasks.get(index).is_some_and(|t| t.passed)
    }

    pub fn feedback(&self, index: usize) -> Option<&str> {
        self.tasks.get(index).map(|t| t.feedback.as_str())
    }

    pub fn passed_count(&self) -> usize {
        self.tasks.iter().filter(|t| t.passed).count()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Fails with [`EvaluationError::ReportMismatch`] unless one verdict exists per sub-task.
    pub fn ensure_len(&self, expected: usize) -> Result<(), EvaluationError> {
        if self.tasks.len() == expected {
            Ok(())
        } else {
            Err(EvaluationError::ReportMismatch {
                name: self.evaluator.clone(),
                expected,
                actual: self.tasks.len(),
            })
        }
    }
}

/// Scores an experiment's current artifacts.
///
/// Evaluators only read the experiment; they never modify its workspaces.
#[async_trait]
pub trait Evaluator<T: Task>: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, experiment: &Experiment<T>) -> Result<EvaluationReport, EvaluationError>;
}

/// Feedback used for sub-tasks that have never been generated.
pub const NOT_IMPLEMENTED_FEEDBACK: &str = "The task has not been implemented yet.";
