//! Static structural checks: required files and signatures.

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::report::{EvaluationReport, Evaluator, TaskFeedback, NOT_IMPLEMENTED_FEEDBACK};
use crate::error::EvaluationError;
use crate::experiment::{Experiment, Implementation, Task};

/// Checks that each implemented sub-task produced its required files and that
/// its code contains every required signature pattern.
///
/// Signatures are searched in the task's output file when it has one, and in
/// every file of its workspace otherwise.
#[derive(Debug, Clone, Default)]
pub struct SpecComplianceEvaluator;

impl SpecComplianceEvaluator {
    pub fn new() -> Self {
        Self
    }

    fn compile(patterns: &[String]) -> Result<Vec<(String, Regex)>, EvaluationError> {
        patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map(|re| (p.clone(), re))
                    .map_err(|source| EvaluationError::InvalidSignature {
                        pattern: p.clone(),
                        source,
                    })
            })
            .collect()
    }
}

#[async_trait]
impl<T: Task> Evaluator<T> for SpecComplianceEvaluator {
    fn name(&self) -> &str {
        "spec_compliance"
    }

    async fn evaluate(&self, experiment: &Experiment<T>) -> Result<EvaluationReport, EvaluationError> {
        let mut verdicts = Vec::with_capacity(experiment.len());

        for (task, implementation) in experiment
            .sub_tasks()
            .iter()
            .zip(experiment.sub_implementations())
        {
            let Implementation::Implemented(shared) = implementation else {
                verdicts.push(TaskFeedback::fail(NOT_IMPLEMENTED_FEEDBACK));
                continue;
            };
            let signatures = Self::compile(&task.required_signatures())?;
            let workspace = shared.read().await;

            let mut problems = Vec::new();
            for file in task.required_files() {
                if !workspace.contains(&file) {
                    problems.push(format!("Required file `{}` is missing.", file));
                }
            }

            let haystack = match task.output_file() {
                Some(file) => workspace.get_file_or(file, "").to_string(),
                None => workspace.all_codes(),
            };
            for (pattern, re) in &signatures {
                if !re.is_match(&haystack) {
                    problems.push(format!("Required signature `{}` was not found.", pattern));
                }
            }

            debug!(task = task.name(), problems = problems.len(), "Spec compliance checked");
            verdicts.push(if problems.is_empty() {
                TaskFeedback::pass("All required files and signatures are present.")
            } else {
                TaskFeedback::fail(problems.join("\n"))
            });
        }

        Ok(EvaluationReport::new(
            <Self as Evaluator<T>>::name(self),
            verdicts,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolving::{assign_code_list_to_evo, Candidate};
    use crate::experiment::{CodingTask, FileMap, Workspace};

    fn file(name: &str, content: &str) -> FileMap {
        FileMap::from([(name.to_string(), content.to_string())])
    }

    #[tokio::test]
    async fn test_verdicts_per_task() {
        let tasks = vec![
            CodingTask::new("load", "Load")
                .with_output_file("load_data.py")
                .with_signature(r"def load_data\("),
            CodingTask::new("model", "Model")
                .with_output_file("model_lgb.py")
                .with_signature(r"def model_workflow\("),
            CodingTask::new("ensemble", "Ensemble").with_output_file("ensemble.py"),
        ];
        let mut exp = Experiment::new(tasks, Workspace::new());
        assign_code_list_to_evo(
            &mut exp,
            &[
                Candidate::Generated(file("load_data.py", "def load_data(path):\n    ...")),
                Candidate::Generated(file("model_lgb.py", "def train():\n    ...")),
                Candidate::NotAttempted,
            ],
        )
        .await
        .expect("merge");

        let report = Evaluator::<CodingTask>::evaluate(&SpecComplianceEvaluator::new(), &exp)
            .await
            .expect("evaluate");

        assert_eq!(report.len(), 3);
        assert!(report.passed(0));
        assert!(!report.passed(1));
        assert!(report.feedback(1).unwrap().contains("def model_workflow"));
        assert!(!report.passed(2));
        assert_eq!(report.feedback(2), Some(NOT_IMPLEMENTED_FEEDBACK));
    }

    #[tokio::test]
    async fn test_missing_required_file() {
        let tasks = vec![CodingTask::new("workflow", "Main").with_output_file("main.py")];
        let mut exp = Experiment::new(tasks, Workspace::new());
        assign_code_list_to_evo(&mut exp, &[Candidate::Generated(file("other.py", "x"))])
            .await
            .expect("merge");

        let report = Evaluator::<CodingTask>::evaluate(&SpecComplianceEvaluator::new(), &exp)
            .await
            .expect("evaluate");
        assert!(report.feedback(0).unwrap().contains("`main.py` is missing"));
    }

    #[tokio::test]
    async fn test_invalid_signature_is_an_error() {
        let tasks = vec![CodingTask::new("bad", "Bad").with_signature("def (")];
        let mut exp = Experiment::new(tasks, Workspace::new());
        assign_code_list_to_evo(&mut exp, &[Candidate::Generated(file("a.py", "x"))])
            .await
            .expect("merge");

        let err = Evaluator::<CodingTask>::evaluate(&SpecComplianceEvaluator::new(), &exp)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::InvalidSignature { .. }));
    }
}
