//! Task coder backed by a completion service.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tera::Context;
use tracing::{debug, instrument};

use super::prompts::{PromptError, PromptRenderer, PromptTemplates};
use super::strategy::{GenerationError, TaskCoder};
use crate::experiment::{validate_relative, FileMap, Task, Workspace};
use crate::knowledge::{KnowledgeRecord, QueriedKnowledge};
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::metrics::{MetricsCollector, TokenUsage};
use crate::scenario::Scenario;
use crate::utils::json_extraction::parse_json_object;

#[derive(Debug, Serialize)]
struct PromptPrecedent<'a> {
    task_information: &'a str,
    code: String,
    feedback: &'a str,
    similarity: f64,
}

#[derive(Debug, Serialize)]
struct PromptFailure<'a> {
    task_information: &'a str,
    code: String,
    feedback: &'a str,
}

impl<'a> From<&'a KnowledgeRecord> for PromptFailure<'a> {
    fn from(record: &'a KnowledgeRecord) -> Self {
        Self {
            task_information: &record.task_information,
            code: record.code_text(),
            feedback: &record.feedback,
        }
    }
}

#[derive(Debug, Serialize)]
struct PromptFile<'a> {
    name: &'a str,
    content: &'a str,
}

/// Generates task code by prompting an [`LlmProvider`] in JSON mode.
///
/// The prompt combines the task description, the scenario, similar successful
/// precedents, the most recent failure trace, and the workspace files the new
/// code must stay consistent with. The response must be a JSON object whose
/// `code` field is either the content of the task's output file or a map of
/// file names to contents.
pub struct LlmTaskCoder {
    provider: Arc<dyn LlmProvider>,
    renderer: PromptRenderer,
    scenario: Scenario,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    context_patterns: Vec<String>,
    metrics: MetricsCollector,
}

impl LlmTaskCoder {
    /// Creates a coder with the default prompt templates.
    pub fn new(provider: Arc<dyn LlmProvider>, scenario: Scenario) -> Result<Self, PromptError> {
        Ok(Self {
            provider,
            renderer: PromptTemplates::default().compile()?,
            scenario,
            model: String::new(),
            temperature: None,
            max_tokens: None,
            context_patterns: Vec::new(),
            metrics: MetricsCollector::new(),
        })
    }

    /// Replaces the prompt templates.
    pub fn with_templates(mut self, renderer: PromptRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    /// Model to request; empty uses the provider's default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// File names or glob patterns whose current contents are shown to the model.
    pub fn with_context_files(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.context_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    fn build_context<T: Task + ?Sized>(
        &self,
        task: &T,
        queried: &QueriedKnowledge,
        workspace: &Workspace,
    ) -> Result<Context, GenerationError> {
        let fingerprint = task.fingerprint();

        let similar: Vec<PromptPrecedent<'_>> = queried
            .similar_successes(&fingerprint)
            .iter()
            .map(|p| PromptPrecedent {
                task_information: &p.record.task_information,
                code: p.record.code_text(),
                feedback: &p.record.feedback,
                similarity: p.similarity,
            })
            .collect();
        let failure = queried
            .most_relevant_failure(&fingerprint)
            .map(PromptFailure::from);

        let own_file = task.output_file();
        let mut seen = BTreeSet::new();
        let mut context_files = Vec::new();
        for pattern in &self.context_patterns {
            let matches = workspace
                .files_matching(pattern)
                .map_err(|e| GenerationError::Task(e.to_string()))?;
            for (name, content) in matches {
                if Some(name) != own_file && seen.insert(name) {
                    context_files.push(PromptFile { name, content });
                }
            }
        }
        let latest_code = own_file.and_then(|f| workspace.get_file(f).ok());

        let mut ctx = Context::new();
        ctx.insert("task_information", &task.information());
        ctx.insert("task_name", task.name());
        ctx.insert("output_file", &own_file);
        ctx.insert("scenario", &self.scenario.full_description());
        ctx.insert("similar_successes", &similar);
        ctx.insert("former_failure", &failure);
        ctx.insert("context_files", &context_files);
        ctx.insert("latest_code", &latest_code);
        Ok(ctx)
    }
}

#[async_trait]
impl<T: Task> TaskCoder<T> for LlmTaskCoder {
    #[instrument(skip_all, fields(task = task.name()))]
    async fn implement_one_task(
        &self,
        task: &T,
        queried: &QueriedKnowledge,
        workspace: &Workspace,
    ) -> Result<FileMap, GenerationError> {
        let ctx = self.build_context(task, queried, workspace)?;
        let (system, user) = self
            .renderer
            .render(&ctx)
            .map_err(|e| GenerationError::Task(format!("prompt rendering failed: {}", e)))?;

        let mut request =
            GenerationRequest::new(self.model.clone(), vec![Message::system(system), Message::user(user)])
                .with_json_mode();
        if let Some(t) = self.temperature {
            request = request.with_temperature(t);
        }
        if let Some(m) = self.max_tokens {
            request = request.with_max_tokens(m);
        }

        let started = Instant::now();
        let result = self.provider.generate(request).await;
        let latency = started.elapsed().as_secs_f64();
        let model_label: &str = if self.model.is_empty() { "default" } else { &self.model };

        let response = match result {
            Ok(response) => {
                self.metrics.record_llm_request(
                    model_label,
                    true,
                    latency,
                    TokenUsage::new(
                        response.usage.prompt_tokens as u64,
                        response.usage.completion_tokens as u64,
                    ),
                );
                response
            }
            Err(e) => {
                self.metrics
                    .record_llm_request(model_label, false, latency, TokenUsage::default());
                return Err(e.into());
            }
        };

        let content = response
            .first_content()
            .ok_or_else(|| GenerationError::Task("completion returned no choices".to_string()))?;
        debug!(chars = content.len(), latency_secs = latency, "Received completion");
        parse_code_payload(content, task.output_file())
    }
}

/// Extracts the `code` field of a completion into a file map.
pub fn parse_code_payload(
    content: &str,
    output_file: Option<&str>,
) -> Result<FileMap, GenerationError> {
    let payload = parse_json_object(content)
        .map_err(|e| GenerationError::Task(format!("malformed completion: {}", e)))?;
    let code = payload
        .get("code")
        .ok_or_else(|| GenerationError::Task("completion has no \"code\" field".to_string()))?;

    let files = match code {
        Value::String(text) => match output_file {
            Some(name) => FileMap::from([(name.to_string(), text.clone())]),
            None => {
                return Err(GenerationError::Task(
                    "\"code\" is a string but the task has no output file".to_string(),
                ))
            }
        },
        Value::Object(map) => {
            let mut files = FileMap::new();
            for (name, value) in map {
                let Value::String(text) = value else {
                    return Err(GenerationError::Task(format!(
                        "content of \"{}\" is not a string",
                        name
                    )));
                };
                files.insert(name.clone(), text.clone());
            }
            files
        }
        _ => {
            return Err(GenerationError::Task(
                "\"code\" must be a string or an object".to_string(),
            ))
        }
    };

    if files.is_empty() {
        return Err(GenerationError::Task("\"code\" contains no files".to_string()));
    }
    for name in files.keys() {
        validate_relative(name).map_err(|e| GenerationError::Task(e.to_string()))?;
    }
    if let Some(name) = output_file {
        if !files.contains_key(name) {
            return Err(GenerationError::Task(format!(
                "required file \"{}\" missing from completion",
                name
            )));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::experiment::CodingTask;
    use crate::knowledge::{KnowledgeBase, Outcome};
    use crate::llm::{Choice, GenerationResponse, Usage};
    use std::sync::Mutex;

    /// Replies with a fixed body and keeps every request it saw.
    struct MockProvider {
        reply: Result<String, fn() -> LlmError>,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl MockProvider {
        fn replying(body: &str) -> Self {
            Self {
                reply: Ok(body.to_string()),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing(err: fn() -> LlmError) -> Self {
            Self {
                reply: Err(err),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> GenerationRequest {
            self.requests
                .lock()
                .unwrap()
                .last()
                .cloned()
                .expect("a request was made")
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().unwrap().push(request);
            match &self.reply {
                Ok(body) => Ok(GenerationResponse {
                    id: "mock".to_string(),
                    model: "mock".to_string(),
                    choices: vec![Choice {
                        index: 0,
                        message: Message::assistant(body.clone()),
                        finish_reason: "stop".to_string(),
                    }],
                    usage: Usage::default(),
                }),
                Err(make) => Err(make()),
            }
        }
    }

    fn workflow_task() -> CodingTask {
        CodingTask::new("workflow", "Glue the pipeline together").with_output_file("main.py")
    }

    #[tokio::test]
    async fn test_string_code_maps_to_output_file() {
        let provider = Arc::new(MockProvider::replying(r#"{"code": "print('hi')"}"#));
        let coder = LlmTaskCoder::new(provider.clone(), Scenario::new("Predict check-ins."))
            .expect("coder");
        let task = workflow_task();
        let queried = KnowledgeBase::default().query([&task]).await;

        let files = coder
            .implement_one_task(&task, &queried, &Workspace::new())
            .await
            .expect("generated");
        assert_eq!(files["main.py"], "print('hi')");

        let request = provider.last_request();
        assert!(request.json_mode);
        assert_eq!(request.messages[0].role, "system");
        assert!(request.messages[0].content.contains("Glue the pipeline together"));
        assert!(request.messages[0].content.contains("Predict check-ins."));
    }

    #[tokio::test]
    async fn test_prompt_includes_knowledge_and_context_files() {
        let kb = KnowledgeBase::default();
        let task = workflow_task();
        kb.record(
            &task,
            &FileMap::from([("main.py".to_string(), "broken()".to_string())]),
            Outcome::failure("NameError: broken"),
        )
        .await;
        let queried = kb.query([&task]).await;

        let mut ws = Workspace::new();
        ws.inject_files(&FileMap::from([
            ("load_data.py".to_string(), "def load_data(): ...".to_string()),
            ("main.py".to_string(), "old main".to_string()),
            ("model_lgb.py".to_string(), "def model_workflow(): ...".to_string()),
        ]))
        .expect("inject");

        let provider = Arc::new(MockProvider::replying(r#"{"code": {"main.py": "new"}}"#));
        let coder = LlmTaskCoder::new(provider.clone(), Scenario::default())
            .expect("coder")
            .with_context_files(["load_data.py", "model_*.py", "*.py"]);
        coder
            .implement_one_task(&task, &queried, &ws)
            .await
            .expect("generated");

        let request = provider.last_request();
        let system = &request.messages[0].content;
        let user = &request.messages[1].content;
        assert!(system.contains("NameError: broken"));
        assert!(user.contains("---------- load_data.py ----------"));
        assert!(user.contains("---------- model_lgb.py ----------"));
        assert_eq!(user.matches("---------- load_data.py").count(), 1);
        assert!(!user.contains("---------- main.py"));
        assert!(user.contains("old main"), "latest code is shown");
    }

    #[tokio::test]
    async fn test_unavailable_service_is_fatal() {
        let provider = Arc::new(MockProvider::failing(|| LlmError::MissingApiBase));
        let coder = LlmTaskCoder::new(provider, Scenario::default()).expect("coder");
        let task = workflow_task();
        let queried = KnowledgeBase::default().query([&task]).await;

        let err = coder
            .implement_one_task(&task, &queried, &Workspace::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Fatal(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_per_task() {
        let provider = Arc::new(MockProvider::failing(|| LlmError::RateLimited("slow down".into())));
        let coder = LlmTaskCoder::new(provider, Scenario::default()).expect("coder");
        let task = workflow_task();
        let queried = KnowledgeBase::default().query([&task]).await;

        let err = coder
            .implement_one_task(&task, &queried, &Workspace::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Task(_)));
    }

    #[test]
    fn test_parse_code_payload_variants() {
        let files = parse_code_payload(
            "```json\n{\"code\": {\"a.py\": \"A\", \"b.py\": \"B\"}}\n```",
            None,
        )
        .expect("map payload");
        assert_eq!(files.len(), 2);

        assert!(matches!(
            parse_code_payload(r#"{"code": "x"}"#, None),
            Err(GenerationError::Task(_))
        ));
        assert!(matches!(
            parse_code_payload(r#"{"code": {"other.py": "x"}}"#, Some("main.py")),
            Err(GenerationError::Task(msg)) if msg.contains("main.py")
        ));
        assert!(matches!(
            parse_code_payload(r#"{"answer": "x"}"#, Some("main.py")),
            Err(GenerationError::Task(_))
        ));
        assert!(matches!(
            parse_code_payload("not json at all", Some("main.py")),
            Err(GenerationError::Task(_))
        ));
        assert!(matches!(
            parse_code_payload(r#"{"code": {"a.py": 1}}"#, None),
            Err(GenerationError::Task(_))
        ));
    }

    #[test]
    fn test_parse_code_payload_rejects_escaping_names() {
        assert!(matches!(
            parse_code_payload(r#"{"code": {"a.py": "A", "../escape.py": "x"}}"#, None),
            Err(GenerationError::Task(msg)) if msg.contains("../escape.py")
        ));
        assert!(matches!(
            parse_code_payload(r#"{"code": {"/etc/abs.py": "x"}}"#, None),
            Err(GenerationError::Task(msg)) if msg.contains("absolute")
        ));
    }
}
