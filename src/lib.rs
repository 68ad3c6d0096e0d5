//! evo-forge: evolving code synthesis over decomposed tasks.
//!
//! An experiment is an ordered list of sub-tasks sharing an artifact
//! workspace. Each round, every sub-task that does not pass yet gets a new
//! candidate from the completion service, informed by similar past successes
//! and its own past failures. Candidates are merged in index order, evaluated,
//! and the outcomes feed the knowledge base for the next round.

// Core modules
pub mod cli;
pub mod error;
pub mod evaluation;
pub mod evolving;
pub mod experiment;
pub mod knowledge;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod scenario;
pub mod utils;

// Re-export commonly used types
pub use error::{EvaluationError, EvolveError, KnowledgeError, LlmError, WorkspaceError};
pub use experiment::{CodingTask, Experiment, Implementation, Task, Workspace};
pub use orchestrator::{EvolveConfig, EvolvingLoop, LoopState, RunOutcome};
