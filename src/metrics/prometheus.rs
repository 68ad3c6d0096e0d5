//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by evo-forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all evo-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Completed evolving runs, labeled by terminal state.
pub static RUNS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Evolution rounds, labeled by outcome (evaluated/aborted).
pub static ROUNDS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Round duration in seconds.
pub static ROUND_DURATION: OnceLock<Histogram> = OnceLock::new();

/// Per-task generation outcomes, labeled by status (generated/failed/skipped).
pub static GENERATIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Per-task evaluation verdicts, labeled by verdict (passed/failed).
pub static TASK_VERDICTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Total LLM API requests, labeled by model and status.
pub static LLM_REQUESTS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// LLM API request latency in seconds, labeled by model.
pub static LLM_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Total tokens used, labeled by model and type (input/output).
pub static LLM_TOKENS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Number of generation workers currently running.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Calling this more than once is harmless: the first registration wins.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric creation or registration fails.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    if REGISTRY.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let runs_total = CounterVec::new(
        Opts::new("evo_forge_runs_total", "Completed evolving runs"),
        &["state"],
    )?;

    let rounds_total = CounterVec::new(
        Opts::new("evo_forge_rounds_total", "Evolution rounds executed"),
        &["outcome"],
    )?;

    let round_duration = Histogram::with_opts(
        HistogramOpts::new(
            "evo_forge_round_duration_seconds",
            "Evolution round duration in seconds",
        )
        .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 900.0]),
    )?;

    let generations_total = CounterVec::new(
        Opts::new(
            "evo_forge_generations_total",
            "Per-task generation outcomes",
        ),
        &["status"],
    )?;

    let task_verdicts_total = CounterVec::new(
        Opts::new("evo_forge_task_verdicts_total", "Per-task evaluation verdicts"),
        &["verdict"],
    )?;

    let llm_requests_total = CounterVec::new(
        Opts::new("evo_forge_llm_requests_total", "Total LLM API requests"),
        &["model", "status"],
    )?;

    let llm_latency = HistogramVec::new(
        HistogramOpts::new(
            "evo_forge_llm_latency_seconds",
            "LLM API request latency in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["model"],
    )?;

    let llm_tokens_total = CounterVec::new(
        Opts::new("evo_forge_llm_tokens_total", "Total tokens used"),
        &["model", "type"],
    )?;

    let active_workers = Gauge::new(
        "evo_forge_active_workers",
        "Number of generation workers currently running",
    )?;

    registry.register(Box::new(runs_total.clone()))?;
    registry.register(Box::new(rounds_total.clone()))?;
    registry.register(Box::new(round_duration.clone()))?;
    registry.register(Box::new(generations_total.clone()))?;
    registry.register(Box::new(task_verdicts_total.clone()))?;
    registry.register(Box::new(llm_requests_total.clone()))?;
    registry.register(Box::new(llm_latency.clone()))?;
    registry.register(Box::new(llm_tokens_total.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // A concurrent initializer may have won the race; keep its instances.
    let _ = REGISTRY.set(registry);
    let _ = RUNS_TOTAL.set(runs_total);
    let _ = ROUNDS_TOTAL.set(rounds_total);
    let _ = ROUND_DURATION.set(round_duration);
    let _ = GENERATIONS_TOTAL.set(generations_total);
    let _ = TASK_VERDICTS_TOTAL.set(task_verdicts_total);
    let _ = LLM_REQUESTS_TOTAL.set(llm_requests_total);
    let _ = LLM_LATENCY.set(llm_latency);
    let _ = LLM_TOKENS_TOTAL.set(llm_tokens_total);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead of metrics when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
