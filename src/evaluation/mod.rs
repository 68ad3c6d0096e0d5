//! Evaluation of generated artifacts.
//!
//! - [`SpecComplianceEvaluator`]: required files and signature patterns
//! - [`ExecutionEvaluator`]: end-to-end run in a scratch directory or container
//! - [`MultiEvaluator`]: AND-composite of several evaluators

pub mod execution;
pub mod multi;
pub mod report;
pub mod spec_compliance;

pub use execution::{ExecutionConfig, ExecutionEvaluator, RunVerdict, SandboxConfig};
pub use multi::MultiEvaluator;
pub use report::{EvaluationReport, Evaluator, TaskFeedback, NOT_IMPLEMENTED_FEEDBACK};
pub use spec_compliance::SpecComplianceEvaluator;
