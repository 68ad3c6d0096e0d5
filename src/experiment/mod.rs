//! Task, workspace and experiment data model.
//!
//! - [`Task`]: capability trait every sub-task implements (description + fingerprint)
//! - [`Workspace`] / [`SharedWorkspace`]: file-addressed artifact container and its aliasing handle
//! - [`Experiment`]: ordered sub-tasks with positional [`Implementation`] slots

pub mod model;
pub mod task;
pub mod workspace;

pub use model::{Experiment, Implementation};
pub use task::{CodingTask, Fingerprint, Task};
pub use workspace::{validate_relative, FileMap, SharedWorkspace, Workspace, WorkspaceSnapshot};
