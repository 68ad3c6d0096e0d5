//! Error types for evo-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Workspace file management and filesystem projection
//! - Knowledge base persistence
//! - Completion-service (LLM) interactions
//! - Evaluation of generated artifacts
//! - The evolving loop itself (fatal run conditions)

use thiserror::Error;

/// Errors that can occur while manipulating a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("File '{0}' not found in workspace")]
    NotFound(String),

    #[error("Invalid workspace path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Failed to walk template directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during knowledge base persistence.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("Unsupported knowledge base format version {0}")]
    UnsupportedVersion(u32),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: LITELLM_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("Missing API base URL: LITELLM_API_BASE environment variable not set")]
    MissingApiBase,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: u32 },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Returns true when the completion service itself cannot be reached or used.
    ///
    /// These conditions affect every task equally, so the evolving loop treats them
    /// as fatal rather than as a per-task generation failure.
    pub fn is_unavailable(&self) -> bool {
        match self {
            LlmError::MissingApiKey | LlmError::MissingApiBase | LlmError::RequestFailed(_) => true,
            LlmError::ApiError { code, .. } => matches!(code, 401 | 403 | 500..=599),
            LlmError::ParseError(_)
            | LlmError::Timeout(_)
            | LlmError::RateLimited(_)
            | LlmError::ContextLengthExceeded { .. }
            | LlmError::Io(_) => false,
        }
    }
}

/// Errors that can occur while evaluating an experiment.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("Evaluator '{name}' failed: {reason}")]
    EvaluatorFailed { name: String, reason: String },

    #[error("Invalid signature pattern '{pattern}': {source}")]
    InvalidSignature {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Report from '{name}' covers {actual} tasks, expected {expected}")]
    ReportMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fatal errors that terminate an evolving run.
///
/// Recoverable conditions (a task failing to generate, a task failing evaluation,
/// a round in which nothing could be generated) never surface here; they are
/// recorded in the round history and the knowledge base instead.
#[derive(Debug, Error)]
pub enum EvolveError {
    #[error("Completion service unavailable: {0}")]
    ServiceUnavailable(#[source] LlmError),

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Knowledge base error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::orchestrator::ConfigError),

    #[error("Strategy returned {actual} candidates for {expected} sub-tasks")]
    CandidateMismatch { expected: usize, actual: usize },
}
