//! The round loop: query, generate, merge, evaluate, record.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use super::config::EvolveConfig;
use crate::error::EvolveError;
use crate::evaluation::{Evaluator, TaskFeedback, NOT_IMPLEMENTED_FEEDBACK};
use crate::evolving::{assign_code_list_to_evo, Candidate, EvolvingStrategy, MergeSummary};
use crate::experiment::{Experiment, FileMap, Task};
use crate::knowledge::{KnowledgeBase, Outcome};
use crate::metrics::{GenerationStatus, MetricsCollector};

/// State of an evolving run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Pending,
    InProgress,
    /// Every sub-task passes.
    Converged,
    /// The round or time budget ran out first.
    Exhausted,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LoopState::Converged | LoopState::Exhausted)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Pending => write!(f, "pending"),
            LoopState::InProgress => write!(f, "in_progress"),
            LoopState::Converged => write!(f, "converged"),
            LoopState::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// A sub-task that failed to generate in a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationFailure {
    pub index: usize,
    pub reason: String,
}

/// What happened in one round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundRecord {
    /// 1-based round number.
    pub round: usize,
    /// Indices handed to the strategy this round.
    pub attempted: Vec<usize>,
    pub generation_failures: Vec<GenerationFailure>,
    /// True when nothing generated and the round was skipped.
    pub aborted: bool,
    /// Absent for aborted rounds.
    pub merge: Option<MergeSummary>,
    /// Effective per-task verdicts after this round, one per sub-task.
    pub verdicts: Vec<TaskFeedback>,
    pub overall_passed: bool,
    pub duration_ms: u64,
}

/// Terminal result of [`EvolvingLoop::run`].
#[derive(Debug)]
pub struct RunOutcome<T: Task> {
    pub state: LoopState,
    pub experiment: Experiment<T>,
    pub history: Vec<RoundRecord>,
}

impl<T: Task> RunOutcome<T> {
    pub fn converged(&self) -> bool {
        self.state == LoopState::Converged
    }

    pub fn rounds(&self) -> usize {
        self.history.len()
    }

    /// Verdicts after the last round, or every task failing if no round ran.
    pub fn final_verdicts(&self) -> Vec<TaskFeedback> {
        self.history
            .last()
            .map(|r| r.verdicts.clone())
            .unwrap_or_else(|| initial_verdicts(self.experiment.len()))
    }
}

fn initial_verdicts(len: usize) -> Vec<TaskFeedback> {
    vec![TaskFeedback::fail(NOT_IMPLEMENTED_FEEDBACK); len]
}

/// Drives an [`Experiment`] through rounds until it converges or a budget runs out.
///
/// Rounds are strictly sequential. Within a round the knowledge base is
/// queried once, before generation, and only written after evaluation, so
/// generation never sees the round's own records.
///
/// A task that passed stays passed unless it is regenerated. Passing tasks are
/// not queried again, so the strategy only regenerates one when a failing task
/// shares its fingerprint.
pub struct EvolvingLoop<T: Task> {
    strategy: Arc<dyn EvolvingStrategy<T>>,
    evaluator: Arc<dyn Evaluator<T>>,
    knowledge: Arc<KnowledgeBase>,
    config: EvolveConfig,
    metrics: MetricsCollector,
}

impl<T: Task> EvolvingLoop<T> {
    /// Creates a loop with a fresh knowledge base built from `config.knowledge`.
    pub fn new(
        strategy: Arc<dyn EvolvingStrategy<T>>,
        evaluator: Arc<dyn Evaluator<T>>,
        config: EvolveConfig,
    ) -> Self {
        let knowledge = Arc::new(KnowledgeBase::new(config.knowledge.clone()));
        Self {
            strategy,
            evaluator,
            knowledge,
            config,
            metrics: MetricsCollector::new(),
        }
    }

    /// Uses an existing (for example persisted) knowledge base.
    ///
    /// Retrieval and give-up limits then come from the attached base, and
    /// `config().knowledge` is replaced with its settings.
    pub fn with_knowledge(mut self, knowledge: Arc<KnowledgeBase>) -> Self {
        self.config.knowledge = knowledge.config().clone();
        self.knowledge = knowledge;
        self
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge
    }

    pub fn config(&self) -> &EvolveConfig {
        &self.config
    }

    /// Runs rounds until convergence or exhaustion.
    ///
    /// Exhaustion is a normal outcome. Errors are reserved for fatal
    /// conditions: an unavailable completion service, an unwritable
    /// workspace, or a failing evaluator.
    #[instrument(skip_all, fields(experiment = %experiment.id(), tasks = experiment.len()))]
    pub async fn run(&self, mut experiment: Experiment<T>) -> Result<RunOutcome<T>, EvolveError> {
        self.config.validate()?;

        let started = Instant::now();
        let mut state = LoopState::Pending;
        let mut verdicts = initial_verdicts(experiment.len());
        let mut history: Vec<RoundRecord> = Vec::new();

        if experiment.is_empty() {
            info!("Experiment has no sub-tasks");
            self.metrics.record_run("converged");
            return Ok(RunOutcome {
                state: LoopState::Converged,
                experiment,
                history,
            });
        }

        for round in 1..=self.config.max_rounds {
            if let Some(budget) = self.config.time_budget {
                if started.elapsed() >= budget {
                    warn!(round, elapsed_secs = started.elapsed().as_secs(), "Time budget exhausted");
                    break;
                }
            }
            if state == LoopState::Pending {
                state = LoopState::InProgress;
            }

            let record = self.run_round(round, &mut experiment, &mut verdicts).await?;
            let Some(record) = record else {
                info!(round, "No sub-task left to attempt");
                break;
            };
            let converged = record.overall_passed;
            history.push(record);

            if converged {
                state = LoopState::Converged;
                break;
            }
        }

        if state != LoopState::Converged {
            state = LoopState::Exhausted;
        }
        self.metrics.record_run(&state.to_string());
        info!(
            state = %state,
            rounds = history.len(),
            passed = verdicts.iter().filter(|v| v.passed).count(),
            total = verdicts.len(),
            elapsed_secs = started.elapsed().as_secs_f64(),
            "Evolving run finished"
        );

        Ok(RunOutcome {
            state,
            experiment,
            history,
        })
    }

    /// Runs one round. Returns `None` when no sub-task is eligible.
    async fn run_round(
        &self,
        round: usize,
        experiment: &mut Experiment<T>,
        verdicts: &mut [TaskFeedback],
    ) -> Result<Option<RoundRecord>, EvolveError> {
        let round_started = Instant::now();

        let mut targets = Vec::new();
        for (index, task) in experiment.sub_tasks().iter().enumerate() {
            if verdicts[index].passed {
                continue;
            }
            if self.knowledge.has_given_up(&task.fingerprint()).await {
                debug!(round, index, task = task.name(), "Task given up");
                continue;
            }
            targets.push(task);
        }
        if targets.is_empty() {
            return Ok(None);
        }

        let queried = self.knowledge.query(targets.iter().copied()).await;
        info!(
            round,
            targets = targets.len(),
            as_of_sequence = queried.as_of_sequence(),
            "Round started"
        );

        let candidates = self.strategy.implement(experiment, &queried).await?;
        if candidates.len() != experiment.len() {
            return Err(EvolveError::CandidateMismatch {
                expected: experiment.len(),
                actual: candidates.len(),
            });
        }

        let attempted: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_attempted())
            .map(|(i, _)| i)
            .collect();
        let generation_failures: Vec<GenerationFailure> = candidates
            .iter()
            .enumerate()
            .filter_map(|(index, c)| match c {
                Candidate::Failed(reason) => Some(GenerationFailure {
                    index,
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect();
        for candidate in &candidates {
            self.metrics.record_generation(match candidate {
                Candidate::Generated(_) => GenerationStatus::Generated,
                Candidate::Failed(_) => GenerationStatus::Failed,
                Candidate::NotAttempted => GenerationStatus::Skipped,
            });
        }

        // Generation failures are failure traces whatever happens next.
        for failure in &generation_failures {
            let task = &experiment.sub_tasks()[failure.index];
            self.knowledge
                .record(
                    task,
                    &FileMap::new(),
                    Outcome::failure(format!("Code generation failed: {}", failure.reason)),
                )
                .await;
        }

        let generated = candidates.iter().filter(|c| c.is_generated()).count();
        if generated == 0 && self.config.abort_on_all_generation_failed {
            warn!(
                round,
                failures = generation_failures.len(),
                "Every attempted task failed to generate, aborting round"
            );
            let record = RoundRecord {
                round,
                attempted,
                generation_failures,
                aborted: true,
                merge: None,
                verdicts: verdicts.to_vec(),
                overall_passed: false,
                duration_ms: elapsed_ms(round_started.elapsed()),
            };
            self.metrics
                .record_round(true, round_started.elapsed().as_secs_f64());
            return Ok(Some(record));
        }

        let merge = assign_code_list_to_evo(experiment, &candidates).await?;

        let report = self.evaluator.evaluate(experiment).await?;
        report.ensure_len(experiment.len())?;

        for (index, verdict) in report.tasks.iter().enumerate() {
            let regenerated = candidates[index].is_generated();
            if verdicts[index].passed && !regenerated {
                continue;
            }
            verdicts[index] = verdict.clone();
        }

        for (index, candidate) in candidates.iter().enumerate() {
            let Candidate::Generated(files) = candidate else {
                continue;
            };
            let verdict = &report.tasks[index];
            self.metrics.record_verdict(verdict.passed);
            let outcome = if verdict.passed {
                Outcome::success(verdict.feedback.clone())
            } else {
                Outcome::failure(verdict.feedback.clone())
            };
            self.knowledge
                .record(&experiment.sub_tasks()[index], files, outcome)
                .await;
        }

        let overall_passed = verdicts.iter().all(|v| v.passed);
        experiment.set_result(json!({
            "round": round,
            "overall_passed": overall_passed,
            "report": report,
        }));

        let duration = round_started.elapsed();
        self.metrics.record_round(false, duration.as_secs_f64());
        info!(
            round,
            generated,
            failed = generation_failures.len(),
            passed = verdicts.iter().filter(|v| v.passed).count(),
            total = verdicts.len(),
            "Round finished"
        );

        Ok(Some(RoundRecord {
            round,
            attempted,
            generation_failures,
            aborted: false,
            merge: Some(merge),
            verdicts: verdicts.to_vec(),
            overall_passed,
            duration_ms: elapsed_ms(duration),
        }))
    }
}

fn elapsed_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
