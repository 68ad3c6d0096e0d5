//! CLI command definitions for evo-forge.
//!
//! `run` drives an experiment definition through the evolving loop against an
//! OpenAI-compatible completion endpoint. `knowledge` inspects a persisted
//! knowledge base.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::evaluation::{
    Evaluator, ExecutionConfig, ExecutionEvaluator, MultiEvaluator, SpecComplianceEvaluator,
};
use crate::evolving::{LlmTaskCoder, MultiProcessEvolvingStrategy, PromptTemplates};
use crate::experiment::{CodingTask, Experiment, Task, Workspace};
use crate::knowledge::{KnowledgeBase, KnowledgeConfig};
use crate::llm::{LiteLlmClient, DEFAULT_MODEL};
use crate::metrics::{export_metrics, init_metrics};
use crate::orchestrator::{EvolveConfig, EvolvingLoop, RoundRecord, RunOutcome};
use crate::scenario::Scenario;

/// Default output directory for run artifacts.
const DEFAULT_OUTPUT_DIR: &str = "./evo-output";

/// Evolving code generation over a decomposed experiment.
#[derive(Parser)]
#[command(name = "evo-forge")]
#[command(about = "Evolve code for a set of sub-tasks until an evaluator accepts it")]
#[command(version)]
#[command(
    long_about = "evo-forge generates code for every sub-task of an experiment, evaluates it, and feeds successes and failures back into later rounds until every sub-task passes or the budget runs out.\n\nExample usage:\n  evo-forge run --experiment ./experiment.yaml --output ./evo-output"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the evolving loop over an experiment definition.
    Run(RunArgs),

    /// Inspect a persisted knowledge base.
    #[command(alias = "kb")]
    Knowledge(KnowledgeArgs),
}

/// Arguments for `evo-forge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Experiment definition (YAML).
    #[arg(short = 'e', long)]
    pub experiment: PathBuf,

    /// Output directory for the final workspace and round history.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT_DIR)]
    pub output: PathBuf,

    /// Model override; defaults to the experiment's model, then LITELLM_DEFAULT_MODEL.
    #[arg(short = 'm', long)]
    pub model: Option<String>,

    /// Base URL of the OpenAI-compatible endpoint.
    #[arg(long, env = "LITELLM_API_BASE")]
    pub api_base: String,

    /// API key for the endpoint.
    #[arg(long, env = "LITELLM_API_KEY")]
    pub api_key: Option<String>,

    /// Override the experiment's round budget.
    #[arg(long)]
    pub max_rounds: Option<usize>,

    /// Override the experiment's generation concurrency.
    #[arg(long)]
    pub max_concurrency: Option<usize>,

    /// Knowledge base file: loaded when it exists, saved after the run.
    #[arg(short = 'k', long)]
    pub knowledge: Option<PathBuf>,

    /// Write Prometheus metrics (text format) to this file after the run.
    #[arg(long)]
    pub metrics: Option<PathBuf>,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Arguments for `evo-forge knowledge`.
#[derive(Parser, Debug)]
pub struct KnowledgeArgs {
    #[command(subcommand)]
    pub command: KnowledgeSubcommand,
}

/// Knowledge subcommands.
#[derive(clap::Subcommand, Debug)]
pub enum KnowledgeSubcommand {
    /// Summarise a knowledge base file.
    Show(KnowledgeShowArgs),
}

/// Arguments for `evo-forge knowledge show`.
#[derive(Parser, Debug)]
pub struct KnowledgeShowArgs {
    /// Knowledge base file written by `evo-forge run --knowledge`.
    pub path: PathBuf,

    /// Output JSON summary.
    #[arg(short = 'j', long)]
    pub json: bool,
}

/// Experiment definition loaded from YAML.
///
/// Relative paths are resolved against the definition file's directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExperimentFile {
    #[serde(default)]
    pub scenario: Scenario,
    pub tasks: Vec<CodingTask>,
    /// Directory whose files seed the shared workspace.
    #[serde(default)]
    pub template_dir: Option<PathBuf>,
    /// File names or glob patterns shown to the model as existing code.
    #[serde(default)]
    pub context_files: Vec<String>,
    /// YAML file with `system` / `user` prompt templates.
    #[serde(default)]
    pub prompts: Option<PathBuf>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Check required files and signatures.
    #[serde(default = "default_true")]
    pub spec_compliance: bool,
    /// Run the assembled workspace end-to-end.
    #[serde(default)]
    pub execution: Option<ExecutionConfig>,
    #[serde(default)]
    pub evolve: EvolveConfig,
}

fn default_true() -> bool {
    true
}

impl ExperimentFile {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read experiment file {}", path.display()))?;
        let mut file: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse experiment file {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        file.template_dir = file.template_dir.map(|p| base.join(p));
        file.prompts = file.prompts.map(|p| base.join(p));
        Ok(file)
    }
}

/// Summary printed at the end of a run.
#[derive(Debug, Serialize)]
struct RunSummary {
    state: String,
    rounds: usize,
    passed: usize,
    total: usize,
    output_dir: String,
    tasks: Vec<TaskSummary>,
}

#[derive(Debug, Serialize)]
struct TaskSummary {
    name: String,
    passed: bool,
    feedback: String,
}

/// Parse CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// This is a convenience function that parses CLI args and runs the command.
/// For more control over logging initialization, use `parse_cli()` and `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_evolve_command(args).await,
        Commands::Knowledge(args) => match args.command {
            KnowledgeSubcommand::Show(args) => run_knowledge_show_command(args).await,
        },
    }
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_evolve_command(args: RunArgs) -> anyhow::Result<()> {
    let definition = ExperimentFile::from_yaml_file(&args.experiment)?;
    if args.metrics.is_some() {
        init_metrics()?;
    }

    let mut config = definition.evolve.clone();
    if let Some(rounds) = args.max_rounds {
        config.max_rounds = rounds;
    }
    if let Some(concurrency) = args.max_concurrency {
        config.max_concurrency = concurrency;
    }
    config.validate()?;

    let model = args
        .model
        .clone()
        .or_else(|| definition.model.clone())
        .or_else(|| std::env::var("LITELLM_DEFAULT_MODEL").ok())
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());

    info!(
        experiment = %args.experiment.display(),
        tasks = definition.tasks.len(),
        model = %model,
        max_rounds = config.max_rounds,
        "Starting evolving run"
    );

    let mut workspace = Workspace::new();
    if let Some(dir) = &definition.template_dir {
        let seeded = workspace
            .inject_from_dir(dir)
            .with_context(|| format!("Failed to seed workspace from {}", dir.display()))?;
        info!(dir = %dir.display(), files = seeded, "Seeded workspace from template");
    }
    let experiment = Experiment::new(definition.tasks.clone(), workspace);

    let client = LiteLlmClient::new(args.api_base.clone(), args.api_key.clone(), model.clone())?;
    let mut coder = LlmTaskCoder::new(Arc::new(client), definition.scenario.clone())?
        .with_model(model)
        .with_context_files(definition.context_files.clone());
    if let Some(path) = &definition.prompts {
        let templates = PromptTemplates::from_yaml_file(path)
            .with_context(|| format!("Failed to load prompts from {}", path.display()))?;
        coder = coder.with_templates(templates.compile()?);
    }
    if let Some(temperature) = definition.temperature {
        coder = coder.with_temperature(temperature);
    }
    if let Some(max_tokens) = definition.max_tokens {
        coder = coder.with_max_tokens(max_tokens);
    }

    let strategy = Arc::new(MultiProcessEvolvingStrategy::<CodingTask>::new(
        Arc::new(coder),
        config.max_concurrency,
    ));
    let evaluator = build_evaluator(&definition)?;

    let knowledge = load_knowledge(args.knowledge.as_deref(), config.knowledge.clone()).await?;
    let evolving =
        EvolvingLoop::new(strategy, evaluator, config).with_knowledge(Arc::clone(&knowledge));

    let outcome = evolving.run(experiment).await?;

    write_outputs(&outcome, &args.output).await?;
    if let Some(path) = &args.knowledge {
        knowledge.save_json(path).await?;
    }
    if let Some(path) = &args.metrics {
        std::fs::write(path, export_metrics())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    print_summary(&outcome, &args.output, args.json)?;
    Ok(())
}

fn build_evaluator(definition: &ExperimentFile) -> anyhow::Result<Arc<dyn Evaluator<CodingTask>>> {
    let mut evaluators: Vec<Arc<dyn Evaluator<CodingTask>>> = Vec::new();
    if definition.spec_compliance {
        evaluators.push(Arc::new(SpecComplianceEvaluator::new()));
    }
    if let Some(execution) = &definition.execution {
        evaluators.push(Arc::new(ExecutionEvaluator::new(execution.clone())?));
    }
    match evaluators.len() {
        0 => anyhow::bail!("Experiment enables no evaluator: set spec_compliance or execution"),
        1 => Ok(evaluators.remove(0)),
        _ => Ok(Arc::new(MultiEvaluator::new(evaluators))),
    }
}

async fn load_knowledge(
    path: Option<&Path>,
    config: KnowledgeConfig,
) -> anyhow::Result<Arc<KnowledgeBase>> {
    match path {
        Some(path) if path.exists() => {
            let kb = KnowledgeBase::load_json(path, config)
                .await
                .with_context(|| format!("Failed to load knowledge base {}", path.display()))?;
            let stats = kb.stats().await;
            info!(
                path = %path.display(),
                fingerprints = stats.fingerprints,
                successes = stats.successes,
                failures = stats.failures,
                "Loaded knowledge base"
            );
            Ok(Arc::new(kb))
        }
        Some(path) => {
            warn!(path = %path.display(), "Knowledge base file not found, starting empty");
            Ok(Arc::new(KnowledgeBase::new(config)))
        }
        None => Ok(Arc::new(KnowledgeBase::new(config))),
    }
}

/// Writes the final workspace(s) and the round history below `output`.
///
/// The shared workspace goes to `workspace/`; isolated sub-task workspaces go
/// to `isolated/<task name>/`.
async fn write_outputs(outcome: &RunOutcome<CodingTask>, output: &Path) -> anyhow::Result<()> {
    let experiment = &outcome.experiment;
    let workspace_dir = output.join("workspace");
    experiment
        .experiment_workspace()
        .read()
        .await
        .materialize(&workspace_dir)?;

    for (task, implementation) in experiment
        .sub_tasks()
        .iter()
        .zip(experiment.sub_implementations())
    {
        if let Some(ws) = implementation.workspace() {
            if !ws.ptr_eq(experiment.experiment_workspace()) {
                ws.read()
                    .await
                    .materialize(&output.join("isolated").join(task.name()))?;
            }
        }
    }

    let history: &[RoundRecord] = &outcome.history;
    let history_json = serde_json::json!({
        "state": outcome.state,
        "experiment_id": experiment.id(),
        "tasks": experiment.sub_tasks(),
        "rounds": history,
        "result": experiment.result(),
    });
    std::fs::write(
        output.join("history.json"),
        serde_json::to_string_pretty(&history_json)?,
    )?;
    info!(output = %output.display(), rounds = history.len(), "Wrote run outputs");
    Ok(())
}

fn print_summary(outcome: &RunOutcome<CodingTask>, output: &Path, json: bool) -> anyhow::Result<()> {
    let verdicts = outcome.final_verdicts();
    let summary = RunSummary {
        state: outcome.state.to_string(),
        rounds: outcome.rounds(),
        passed: verdicts.iter().filter(|v| v.passed).count(),
        total: verdicts.len(),
        output_dir: output.display().to_string(),
        tasks: outcome
            .experiment
            .sub_tasks()
            .iter()
            .zip(verdicts)
            .map(|(task, verdict)| TaskSummary {
                name: task.name().to_string(),
                passed: verdict.passed,
                feedback: verdict.feedback,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if outcome.converged() {
        println!("✓ Converged after {} rounds", summary.rounds);
    } else {
        println!("✗ Exhausted after {} rounds", summary.rounds);
    }
    println!("  Passed:     {}/{}", summary.passed, summary.total);
    println!("  Output dir: {}", summary.output_dir);
    for task in &summary.tasks {
        let mark = if task.passed { "✓" } else { "✗" };
        println!("  {} {}", mark, task.name);
        if !task.passed {
            for line in task.feedback.lines().take(5) {
                println!("      {}", line);
            }
        }
    }
    Ok(())
}

// ============================================================================
// Knowledge Command Implementation
// ============================================================================

async fn run_knowledge_show_command(args: KnowledgeShowArgs) -> anyhow::Result<()> {
    let kb = KnowledgeBase::load_json(&args.path, KnowledgeConfig::default())
        .await
        .with_context(|| format!("Failed to load knowledge base {}", args.path.display()))?;
    let stats = kb.stats().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Knowledge base: {}", args.path.display());
    println!("  Fingerprints: {}", stats.fingerprints);
    println!("  Successes:    {}", stats.successes);
    println!("  Failures:     {}", stats.failures);
    Ok(())
}
