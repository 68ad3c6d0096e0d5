//! Composite evaluator combining several concerns.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::info;

use super::report::{EvaluationReport, Evaluator, TaskFeedback};
use crate::error::EvaluationError;
use crate::experiment::{Experiment, Task};

/// Runs every sub-evaluator and combines their verdicts.
///
/// A task passes only if every sub-evaluator passes it. Feedback is the
/// concatenation of each sub-evaluator's feedback, prefixed with its name, in
/// the order the evaluators were added.
pub struct MultiEvaluator<T: Task> {
    evaluators: Vec<Arc<dyn Evaluator<T>>>,
}

impl<T: Task> Default for MultiEvaluator<T> {
    fn default() -> Self {
        Self {
            evaluators: Vec::new(),
        }
    }
}

impl<T: Task> MultiEvaluator<T> {
    pub fn new(evaluators: Vec<Arc<dyn Evaluator<T>>>) -> Self {
        Self { evaluators }
    }

    pub fn with(mut self, evaluator: Arc<dyn Evaluator<T>>) -> Self {
        self.evaluators.push(evaluator);
        self
    }

    pub fn len(&self) -> usize {
        self.evaluators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.evaluators.is_empty()
    }
}

#[async_trait]
impl<T: Task> Evaluator<T> for MultiEvaluator<T> {
    fn name(&self) -> &str {
        "multi"
    }

    async fn evaluate(&self, experiment: &Experiment<T>) -> Result<EvaluationReport, EvaluationError> {
        let results = join_all(self.evaluators.iter().map(|e| e.evaluate(experiment))).await;

        let mut reports = Vec::with_capacity(results.len());
        for result in results {
            let report = result?;
            report.ensure_len(experiment.len())?;
            reports.push(report);
        }

        let tasks: Vec<TaskFeedback> = (0..experiment.len())
            .map(|index| {
                let passed = reports.iter().all(|r| r.passed(index));
                let feedback = reports
                    .iter()
                    .map(|r| format!("[{}] {}", r.evaluator, r.feedback(index).unwrap_or_default()))
                    .collect::<Vec<_>>()
                    .join("\n");
                TaskFeedback { passed, feedback }
            })
            .collect();

        let combined = EvaluationReport::new("multi", tasks);
        info!(
            evaluators = reports.len(),
            passed = combined.passed_count(),
            total = combined.len(),
            "Evaluation finished"
        );
        Ok(combined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{CodingTask, Workspace};

    /// Returns fixed verdicts.
    struct Fixed {
        name: &'static str,
        verdicts: Vec<bool>,
    }

    #[async_trait]
    impl Evaluator<CodingTask> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        async fn evaluate(
            &self,
            _experiment: &Experiment<CodingTask>,
        ) -> Result<EvaluationReport, EvaluationError> {
            Ok(EvaluationReport::new(
                self.name,
                self.verdicts
                    .iter()
                    .map(|p| {
                        if *p {
                            TaskFeedback::pass("fine")
                        } else {
                            TaskFeedback::fail("broken")
                        }
                    })
                    .collect(),
            ))
        }
    }

    fn experiment(n: usize) -> Experiment<CodingTask> {
        let tasks = (0..n)
            .map(|i| CodingTask::new(format!("t{}", i), "x"))
            .collect();
        Experiment::new(tasks, Workspace::new())
    }

    #[tokio::test]
    async fn test_and_semantics_and_feedback_order() {
        let multi = MultiEvaluator::default()
            .with(Arc::new(Fixed {
                name: "spec",
                verdicts: vec![true, true],
            }))
            .with(Arc::new(Fixed {
                name: "exec",
                verdicts: vec![true, false],
            }));

        let report = multi.evaluate(&experiment(2)).await.expect("evaluate");
        assert!(report.passed(0));
        assert!(!report.passed(1));
        assert!(!report.overall_passed());
        assert_eq!(report.feedback(1), Some("[spec] fine\n[exec] broken"));
    }

    #[tokio::test]
    async fn test_misaligned_report_is_rejected() {
        let multi = MultiEvaluator::new(vec![Arc::new(Fixed {
            name: "short",
            verdicts: vec![true],
        })]);

        let err = multi.evaluate(&experiment(2)).await.unwrap_err();
        assert!(matches!(err, EvaluationError::ReportMismatch { .. }));
    }
}
