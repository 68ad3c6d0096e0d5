//! Runtime evaluation: run the assembled artifact tree end-to-end.
//!
//! The experiment's files are materialized into a scratch directory and a
//! command is executed there, either as a local child process with a cleared
//! environment or inside a Docker container without network access. Generated
//! code is never executed in the caller's working directory.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::report::{EvaluationReport, Evaluator, TaskFeedback, NOT_IMPLEMENTED_FEEDBACK};
use crate::error::EvaluationError;
use crate::experiment::{Experiment, Task};

const CONTAINER_WORKDIR: &str = "/workspace";

/// Container settings for sandboxed execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Docker image to use.
    pub image: String,
    /// Memory limit in MB.
    pub memory_mb: u64,
    /// CPU limit (number of cores); 0 means unlimited.
    pub cpu_limit: f64,
    /// Network mode ("none", "bridge", "host").
    pub network_mode: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "python:3.11-slim".to_string(),
            memory_mb: 4096,
            cpu_limit: 0.0,
            network_mode: "none".to_string(),
        }
    }
}

impl SandboxConfig {
    /// Arguments for `docker run` executing `command` in `host_dir`.
    pub fn docker_run_args(
        &self,
        name: &str,
        host_dir: &Path,
        env: &[(String, String)],
        command: &[String],
    ) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            format!("--memory={}m", self.memory_mb),
            format!("--network={}", self.network_mode),
        ];
        if self.cpu_limit > 0.0 {
            args.push(format!("--cpus={}", self.cpu_limit));
        }
        for (key, value) in env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.extend([
            "-v".to_string(),
            format!("{}:{}", host_dir.display(), CONTAINER_WORKDIR),
            "-w".to_string(),
            CONTAINER_WORKDIR.to_string(),
            self.image.clone(),
        ]);
        args.extend(command.iter().cloned());
        args
    }
}

/// Execution settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Program and arguments, run from the materialized workspace root.
    pub command: Vec<String>,
    /// Wall-clock limit for one run.
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    /// When set, stdout must contain this text for the run to pass.
    #[serde(default)]
    pub success_marker: Option<String>,
    /// Run inside Docker instead of as a local process.
    #[serde(default)]
    pub sandbox: Option<SandboxConfig>,
    /// Extra environment variables for the run.
    #[serde(default)]
    pub env: Vec<(String, String)>,
    /// How many trailing output lines go into the feedback.
    #[serde(default = "default_tail_lines")]
    pub feedback_tail_lines: usize,
}

fn default_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_tail_lines() -> usize {
    40
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl ExecutionConfig {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            timeout: default_timeout(),
            success_marker: None,
            sandbox: None,
            env: Vec::new(),
            feedback_tail_lines: default_tail_lines(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_success_marker(mut self, marker: impl Into<String>) -> Self {
        self.success_marker = Some(marker.into());
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Outcome of one run of the artifact tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunVerdict {
    pub passed: bool,
    pub feedback: String,
}

/// Runs the whole artifact tree once and applies the verdict to every
/// implemented sub-task.
///
/// Files of isolated sub-task workspaces are laid over the shared workspace in
/// index order before running.
#[derive(Debug, Clone)]
pub struct ExecutionEvaluator {
    config: ExecutionConfig,
}

impl ExecutionEvaluator {
    pub fn new(config: ExecutionConfig) -> Result<Self, EvaluationError> {
        if config.command.is_empty() {
            return Err(EvaluationError::EvaluatorFailed {
                name: "execution".to_string(),
                reason: "command must not be empty".to_string(),
            });
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    async fn materialize<T: Task>(
        experiment: &Experiment<T>,
        dir: &Path,
    ) -> Result<(), EvaluationError> {
        experiment
            .experiment_workspace()
            .read()
            .await
            .materialize(dir)?;
        for implementation in experiment.sub_implementations() {
            if let Some(ws) = implementation.workspace() {
                if !ws.ptr_eq(experiment.experiment_workspace()) {
                    ws.read().await.materialize(dir)?;
                }
            }
        }
        Ok(())
    }

    /// Returns the command plus the container name when running sandboxed.
    fn build_command(&self, dir: &Path) -> (Command, Option<String>) {
        let (mut command, container) = match &self.config.sandbox {
            Some(sandbox) => {
                let name = format!("evo-forge-eval-{}", Uuid::new_v4());
                let mut cmd = Command::new("docker");
                cmd.args(sandbox.docker_run_args(
                    &name,
                    dir,
                    &self.config.env,
                    &self.config.command,
                ));
                (cmd, Some(name))
            }
            None => {
                let mut cmd = Command::new(&self.config.command[0]);
                cmd.args(&self.config.command[1..])
                    .current_dir(dir)
                    .env_clear()
                    .envs(self.config.env.iter().map(|(k, v)| (k, v)));
                if let Some(path) = std::env::var_os("PATH") {
                    cmd.env("PATH", path);
                }
                // Own process group, so a timeout can take down grandchildren too.
                #[cfg(unix)]
                cmd.process_group(0);
                (cmd, None)
            }
        };
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        (command, container)
    }

    /// Materializes `experiment` into a scratch directory and runs the command there.
    pub async fn run<T: Task>(&self, experiment: &Experiment<T>) -> Result<RunVerdict, EvaluationError> {
        let scratch = tempfile::Builder::new()
            .prefix("evo-forge-eval-")
            .tempdir()?;
        Self::materialize(experiment, scratch.path()).await?;

        let started = std::time::Instant::now();
        let (mut command, container) = self.build_command(scratch.path());
        info!(command = ?self.config.command, sandboxed = container.is_some(), "Running artifact tree");

        let child = command.spawn()?;
        let pid = child.id();
        let output = match tokio::time::timeout(self.config.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout_secs = self.config.timeout.as_secs(), "Execution timed out");
                reap(pid, container.as_deref()).await;
                return Ok(RunVerdict {
                    passed: false,
                    feedback: format!(
                        "Execution timed out after {} seconds.",
                        self.config.timeout.as_secs_f64()
                    ),
                });
            }
        };
        debug!(
            status = ?output.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Execution finished"
        );
        Ok(self.judge(&output))
    }

    fn judge(&self, output: &Output) -> RunVerdict {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            let status = output
                .status
                .code()
                .map_or_else(|| "killed by signal".to_string(), |c| format!("exit code {}", c));
            return RunVerdict {
                passed: false,
                feedback: format!(
                    "Execution failed ({}).\nstderr:\n{}\nstdout:\n{}",
                    status,
                    tail(&stderr, self.config.feedback_tail_lines),
                    tail(&stdout, self.config.feedback_tail_lines)
                ),
            };
        }

        if let Some(marker) = &self.config.success_marker {
            if !stdout.contains(marker.as_str()) {
                return RunVerdict {
                    passed: false,
                    feedback: format!(
                        "Execution finished but did not print `{}`.\nstdout:\n{}",
                        marker,
                        tail(&stdout, self.config.feedback_tail_lines)
                    ),
                };
            }
        }

        RunVerdict {
            passed: true,
            feedback: "Execution succeeded.".to_string(),
        }
    }
}

/// Stops whatever a timed-out run left behind.
///
/// Dropping the child only kills the direct process: the `docker` client in
/// sandboxed mode, or the command's leader locally.
async fn reap(pid: Option<u32>, container: Option<&str>) {
    let (program, args) = match (container, pid) {
        (Some(name), _) => ("docker", vec!["rm".to_string(), "-f".to_string(), name.to_string()]),
        (None, Some(pid)) if cfg!(unix) => (
            "kill",
            vec!["-KILL".to_string(), "--".to_string(), format!("-{}", pid)],
        ),
        _ => return,
    };
    match Command::new(program)
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => debug!(program, ?args, ?status, "Cleaned up timed-out run"),
        Err(e) => debug!(program, ?args, error = %e, "Failed to clean up timed-out run"),
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}

#[async_trait]
impl<T: Task> Evaluator<T> for ExecutionEvaluator {
    fn name(&self) -> &str {
        "execution"
    }

    async fn evaluate(&self, experiment: &Experiment<T>) -> Result<EvaluationReport, EvaluationError> {
        let verdict = self.run(experiment).await?;
        let tasks = experiment
            .sub_implementations()
            .iter()
            .map(|implementation| {
                if implementation.is_implemented() {
                    TaskFeedback {
                        passed: verdict.passed,
                        feedback: verdict.feedback.clone(),
                    }
                } else {
                    TaskFeedback::fail(NOT_IMPLEMENTED_FEEDBACK)
                }
            })
            .collect();
        Ok(EvaluationReport::new("execution", tasks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evolving::{assign_code_list_to_evo, Candidate};
    use crate::experiment::{CodingTask, FileMap, Workspace};

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    async fn implemented_experiment(files: &[(&str, &str)]) -> Experiment<CodingTask> {
        let tasks = vec![
            CodingTask::new("workflow", "Main").with_output_file("main.sh"),
            CodingTask::new("later", "Not yet"),
        ];
        let mut exp = Experiment::new(tasks, Workspace::new());
        let bundle: FileMap = files
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assign_code_list_to_evo(&mut exp, &[Candidate::Generated(bundle), Candidate::NotAttempted])
            .await
            .expect("merge");
        exp
    }

    #[tokio::test]
    async fn test_successful_run_with_marker() {
        let exp = implemented_experiment(&[("main.sh", "echo scores ready")]).await;
        let evaluator = ExecutionEvaluator::new(
            ExecutionConfig::new(sh("sh main.sh")).with_success_marker("scores ready"),
        )
        .expect("evaluator");

        let report = Evaluator::<CodingTask>::evaluate(&evaluator, &exp)
            .await
            .expect("evaluate");
        assert!(report.passed(0));
        assert!(!report.passed(1), "unimplemented tasks never pass");
    }

    #[tokio::test]
    async fn test_failure_feedback_contains_stderr_tail() {
        let exp = implemented_experiment(&[("main.sh", "echo 'KeyError: id' >&2; exit 3")]).await;
        let evaluator =
            ExecutionEvaluator::new(ExecutionConfig::new(sh("sh main.sh"))).expect("evaluator");

        let verdict = evaluator.run(&exp).await.expect("run");
        assert!(!verdict.passed);
        assert!(verdict.feedback.contains("exit code 3"));
        assert!(verdict.feedback.contains("KeyError: id"));
    }

    #[tokio::test]
    async fn test_missing_marker_fails() {
        let exp = implemented_experiment(&[("main.sh", "echo nothing")]).await;
        let evaluator = ExecutionEvaluator::new(
            ExecutionConfig::new(sh("sh main.sh")).with_success_marker("DONE"),
        )
        .expect("evaluator");

        let verdict = evaluator.run(&exp).await.expect("run");
        assert!(!verdict.passed);
        assert!(verdict.feedback.contains("`DONE`"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let exp = implemented_experiment(&[("main.sh", "sleep 5")]).await;
        let evaluator = ExecutionEvaluator::new(
            ExecutionConfig::new(sh("sh main.sh")).with_timeout(Duration::from_millis(200)),
        )
        .expect("evaluator");

        let verdict = evaluator.run(&exp).await.expect("run");
        assert!(!verdict.passed);
        assert!(verdict.feedback.contains("timed out"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_processes() {
        let out = tempfile::tempdir().expect("tempdir");
        let exp = implemented_experiment(&[(
            "main.sh",
            "(sleep 1; echo late > \"$OUT/late.txt\") &\nwait",
        )])
        .await;
        let evaluator = ExecutionEvaluator::new(
            ExecutionConfig::new(sh("sh main.sh"))
                .with_env("OUT", out.path().display().to_string())
                .with_timeout(Duration::from_millis(200)),
        )
        .expect("evaluator");

        let verdict = evaluator.run(&exp).await.expect("run");
        assert!(verdict.feedback.contains("timed out"));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!out.path().join("late.txt").exists());
    }

    #[test]
    fn test_sandboxed_command_names_its_container() {
        let evaluator = ExecutionEvaluator::new(
            ExecutionConfig::new(vec!["python".to_string(), "main.py".to_string()])
                .with_sandbox(SandboxConfig::default()),
        )
        .expect("evaluator");

        let (command, container) = evaluator.build_command(Path::new("/tmp/ws"));
        let name = container.expect("container name");
        assert!(name.starts_with("evo-forge-eval-"));
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let at = args.iter().position(|a| a == "--name").expect("--name");
        assert_eq!(args[at + 1], name);

        let local = ExecutionEvaluator::new(ExecutionConfig::new(vec!["true".to_string()]))
            .expect("evaluator");
        assert!(local.build_command(Path::new("/tmp/ws")).1.is_none());
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        std::env::set_var("EVO_FORGE_SECRET_FOR_TEST", "leak");
        let exp = implemented_experiment(&[("main.sh", "echo \"[$EVO_FORGE_SECRET_FOR_TEST][$GIVEN]\"")]).await;
        let evaluator = ExecutionEvaluator::new(
            ExecutionConfig::new(sh("sh main.sh"))
                .with_env("GIVEN", "yes")
                .with_success_marker("[][yes]"),
        )
        .expect("evaluator");

        let verdict = evaluator.run(&exp).await.expect("run");
        assert!(verdict.passed, "{}", verdict.feedback);
    }

    #[tokio::test]
    async fn test_evaluation_does_not_touch_workspace() {
        let exp = implemented_experiment(&[("main.sh", "echo hi > out.txt")]).await;
        let evaluator =
            ExecutionEvaluator::new(ExecutionConfig::new(sh("sh main.sh"))).expect("evaluator");

        evaluator.run(&exp).await.expect("run");
        assert!(!exp.experiment_workspace().read().await.contains("out.txt"));
    }

    #[test]
    fn test_empty_command_rejected() {
        assert!(ExecutionEvaluator::new(ExecutionConfig::new(vec![])).is_err());
    }

    #[test]
    fn test_docker_args() {
        let args = SandboxConfig::default().docker_run_args(
            "c1",
            Path::new("/tmp/ws"),
            &[("SEED".to_string(), "7".to_string())],
            &["python".to_string(), "main.py".to_string()],
        );
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.contains(&"--memory=4096m".to_string()));
        assert!(args.contains(&"/tmp/ws:/workspace".to_string()));
        assert!(args.contains(&"SEED=7".to_string()));
        assert_eq!(&args[args.len() - 2..], &["python".to_string(), "main.py".to_string()]);
    }

    #[test]
    fn test_config_from_yaml() {
        let config: ExecutionConfig = serde_yaml::from_str(
            "command: [python, main.py]\ntimeout: 30\nsuccess_marker: OK\n",
        )
        .expect("yaml");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.feedback_tail_lines, 40);
        assert!(config.sandbox.is_none());
    }
}
