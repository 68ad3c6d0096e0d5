//! Merging a round's candidates into the experiment.

use serde::Serialize;
use tracing::{debug, error, info};

use super::strategy::Candidate;
use crate::error::{EvolveError, WorkspaceError};
use crate::experiment::{Experiment, SharedWorkspace, Task, Workspace, WorkspaceSnapshot};

/// What a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    /// Indices whose candidate files were injected.
    pub merged: Vec<usize>,
    /// Indices without a generated candidate, left untouched.
    pub skipped: Vec<usize>,
    /// Indices bound to a workspace for the first time by this merge.
    pub newly_bound: Vec<usize>,
    /// Total number of file writes.
    pub files_written: usize,
}

/// Applies `candidates` to `experiment`, strictly in index order.
///
/// For each generated candidate the sub-task is bound to a workspace if it has
/// none yet: the experiment's shared workspace, or a fresh one for tasks that
/// need isolation. The candidate's files are then injected into that
/// workspace. Because injection follows index order, a later-indexed task wins
/// when two candidates write the same file of a shared workspace.
///
/// Non-generated candidates are skipped. If any injection fails, every touched
/// workspace is restored and no binding is kept.
pub async fn assign_code_list_to_evo<T: Task>(
    experiment: &mut Experiment<T>,
    candidates: &[Candidate],
) -> Result<MergeSummary, EvolveError> {
    if candidates.len() != experiment.len() {
        return Err(EvolveError::CandidateMismatch {
            expected: experiment.len(),
            actual: candidates.len(),
        });
    }

    let mut summary = MergeSummary::default();
    let mut plan: Vec<(usize, SharedWorkspace)> = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        if !candidate.is_generated() {
            summary.skipped.push(index);
            continue;
        }
        let target = match experiment.implementation(index).and_then(|i| i.workspace()) {
            Some(bound) => bound.clone(),
            None => {
                summary.newly_bound.push(index);
                if experiment.sub_tasks()[index].needs_isolation() {
                    SharedWorkspace::new(Workspace::new())
                } else {
                    experiment.experiment_workspace().clone()
                }
            }
        };
        plan.push((index, target));
    }

    let mut snapshots: Vec<(SharedWorkspace, WorkspaceSnapshot)> = Vec::new();
    for (_, target) in &plan {
        if !snapshots.iter().any(|(ws, _)| ws.ptr_eq(target)) {
            let snapshot = target.read().await.snapshot();
            snapshots.push((target.clone(), snapshot));
        }
    }

    for (index, target) in &plan {
        let Some(files) = candidates[*index].files() else {
            continue;
        };
        let result = target.write().await.inject_files(files);
        if let Err(err) = result {
            error!(index, error = %err, "Merge failed, restoring workspaces");
            rollback(snapshots).await?;
            return Err(err.into());
        }
        debug!(index, files = files.len(), "Merged candidate");
        summary.merged.push(*index);
        summary.files_written += files.len();
    }

    for (index, target) in plan {
        experiment.bind_implementation(index, || target);
    }

    info!(
        merged = summary.merged.len(),
        skipped = summary.skipped.len(),
        newly_bound = summary.newly_bound.len(),
        files = summary.files_written,
        "Merged candidates"
    );
    Ok(summary)
}

async fn rollback(
    snapshots: Vec<(SharedWorkspace, WorkspaceSnapshot)>,
) -> Result<(), WorkspaceError> {
    for (workspace, snapshot) in snapshots.into_iter().rev() {
        workspace.write().await.restore(snapshot)?;
    }
    Ok(())
}
