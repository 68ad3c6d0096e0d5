//! Metrics module for Prometheus-based monitoring.
//!
//! Tracks runs, rounds, per-task generation outcomes and verdicts, and
//! completion-service usage.
//!
//! # Example
//!
//! ```ignore
//! use evo_forge::metrics::{export_metrics, init_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_verdict(true);
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{GenerationStatus, MetricsCollector, TokenUsage};
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, GENERATIONS_TOTAL, LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL,
    REGISTRY, ROUNDS_TOTAL, ROUND_DURATION, RUNS_TOTAL, TASK_VERDICTS_TOTAL,
};
