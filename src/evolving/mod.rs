//! Candidate generation and merging.
//!
//! A round's generation is split in two phases separated by a barrier:
//!
//! 1. [`EvolvingStrategy::implement`] runs one [`TaskCoder`] per attempted
//!    sub-task, in parallel up to a concurrency limit, against a frozen
//!    [`QueriedKnowledge`](crate::knowledge::QueriedKnowledge) snapshot.
//! 2. [`assign_code_list_to_evo`] merges the resulting [`Candidate`]s into the
//!    experiment single-threaded and in index order.

pub mod llm_coder;
pub mod merge;
pub mod prompts;
pub mod strategy;

pub use llm_coder::{parse_code_payload, LlmTaskCoder};
pub use merge::{assign_code_list_to_evo, MergeSummary};
pub use prompts::{PromptError, PromptRenderer, PromptTemplates};
pub use strategy::{
    Candidate, EvolvingStrategy, GenerationError, MultiProcessEvolvingStrategy, TaskCoder,
};
