//! High-level recording interface over the Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library users that never export metrics pay nothing.

use super::prometheus::{
    ACTIVE_WORKERS, GENERATIONS_TOTAL, LLM_LATENCY, LLM_REQUESTS_TOTAL, LLM_TOKENS_TOTAL,
    ROUNDS_TOTAL, ROUND_DURATION, RUNS_TOTAL, TASK_VERDICTS_TOTAL,
};

/// Token usage information for LLM requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenUsage {
    /// Number of input/prompt tokens.
    pub input_tokens: u64,
    /// Number of output/completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Per-task generation outcome, as reported to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Generated,
    Failed,
    Skipped,
}

impl GenerationStatus {
    fn as_label(self) -> &'static str {
        match self {
            GenerationStatus::Generated => "generated",
            GenerationStatus::Failed => "failed",
            GenerationStatus::Skipped => "skipped",
        }
    }
}

/// Metrics collector for recording evo-forge operational metrics.
///
/// # Example
///
/// ```ignore
/// use evo_forge::metrics::{init_metrics, MetricsCollector, TokenUsage};
///
/// init_metrics()?;
/// let collector = MetricsCollector::new();
/// collector.record_round(false, 12.5);
/// collector.record_llm_request("gpt-4", true, 2.5, TokenUsage::new(1000, 500));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record the terminal state of a run (e.g. "converged", "exhausted").
    pub fn record_run(&self, state: &str) {
        if let Some(runs) = RUNS_TOTAL.get() {
            runs.with_label_values(&[state]).inc();
        }
        tracing::trace!(state = state, "Recorded run metric");
    }

    /// Record one evolution round.
    pub fn record_round(&self, aborted: bool, duration_secs: f64) {
        let outcome = if aborted { "aborted" } else { "evaluated" };
        if let Some(rounds) = ROUNDS_TOTAL.get() {
            rounds.with_label_values(&[outcome]).inc();
        }
        if let Some(duration) = ROUND_DURATION.get() {
            duration.observe(duration_secs);
        }
        tracing::trace!(
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded round metric"
        );
    }

    /// Record a per-task generation outcome.
    pub fn record_generation(&self, status: GenerationStatus) {
        if let Some(generations) = GENERATIONS_TOTAL.get() {
            generations.with_label_values(&[status.as_label()]).inc();
        }
    }

    /// Record a per-task evaluation verdict.
    pub fn record_verdict(&self, passed: bool) {
        let verdict = if passed { "passed" } else { "failed" };
        if let Some(verdicts) = TASK_VERDICTS_TOTAL.get() {
            verdicts.with_label_values(&[verdict]).inc();
        }
    }

    /// Record an LLM API request.
    pub fn record_llm_request(
        &self,
        model: &str,
        success: bool,
        latency_secs: f64,
        tokens: TokenUsage,
    ) {
        let status = if success { "success" } else { "failure" };

        if let Some(llm_requests) = LLM_REQUESTS_TOTAL.get() {
            llm_requests.with_label_values(&[model, status]).inc();
        }

        if let Some(llm_latency) = LLM_LATENCY.get() {
            llm_latency
                .with_label_values(&[model])
                .observe(latency_secs);
        }

        if let Some(llm_tokens) = LLM_TOKENS_TOTAL.get() {
            llm_tokens
                .with_label_values(&[model, "input"])
                .inc_by(tokens.input_tokens as f64);
            llm_tokens
                .with_label_values(&[model, "output"])
                .inc_by(tokens.output_tokens as f64);
        }

        tracing::trace!(
            model = model,
            status = status,
            latency_secs = latency_secs,
            input_tokens = tokens.input_tokens,
            output_tokens = tokens.output_tokens,
            "Recorded LLM request metric"
        );
    }

    pub fn inc_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.inc();
        }
    }

    pub fn dec_workers(&self) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.dec();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{export_metrics, init_metrics};

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_token_usage() {
        let usage = TokenUsage::new(1000, 500);
        assert_eq!(usage.total(), 1500);
        assert_eq!(TokenUsage::default().total(), 0);
    }

    #[test]
    fn test_record_round_and_run() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_round(false, 3.5);
        collector.record_round(true, 0.1);
        collector.record_run("converged");

        let text = export_metrics();
        assert!(text.contains("evo_forge_rounds_total{outcome=\"aborted\"}"));
        assert!(text.contains("evo_forge_runs_total{state=\"converged\"}"));
    }

    #[test]
    fn test_record_generation_and_verdicts() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_generation(GenerationStatus::Generated);
        collector.record_generation(GenerationStatus::Failed);
        collector.record_generation(GenerationStatus::Skipped);
        collector.record_verdict(true);
        collector.record_verdict(false);

        let text = export_metrics();
        assert!(text.contains("status=\"skipped\""));
        assert!(text.contains("verdict=\"passed\""));
    }

    #[test]
    fn test_record_llm_request() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_llm_request("gpt-4", true, 2.5, TokenUsage::new(1000, 500));
        collector.record_llm_request("claude-3", false, 5.0, TokenUsage::default());
    }

    #[test]
    fn test_workers_gauge() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();
        collector.inc_workers();
        collector.dec_workers();
    }
}
