//! Prompt templates for the LLM task coder.
//!
//! Templates are plain [Tera](https://keats.github.io/tera/) strings with two
//! recognised keys, `system` and `user`. The defaults are compiled in; a YAML
//! file can override either key.
//!
//! Variables available to both templates:
//! - `task_information`, `task_name`, `output_file`
//! - `scenario`: the experiment's shared description
//! - `similar_successes`: list of `{task_information, code, feedback, similarity}`
//! - `former_failure`: `{task_information, code, feedback}` or null
//! - `context_files`: list of `{name, content}`
//! - `latest_code`: the task's current code, or null

use std::path::Path;

use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use thiserror::Error;

const SYSTEM_TEMPLATE: &str = "system";
const USER_TEMPLATE: &str = "user";

/// Errors raised while loading or rendering prompt templates.
#[derive(Debug, Error)]
pub enum PromptError {
    #[error("Failed to read prompt file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid prompt file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Template error: {0}")]
    Tera(#[from] tera::Error),
}

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a world-class software engineer. You implement one step of a larger pipeline at a time, and your code must run as-is.
{% if scenario %}
{{ scenario }}
{% endif %}
Your current task is:
{{ task_information }}
{% if similar_successes %}
Here are successful implementations of similar tasks. Reuse what applies:
{% for precedent in similar_successes %}
=====Similar task {{ loop.index }} (similarity {{ precedent.similarity | round(precision=2) }})=====
{{ precedent.task_information }}
=====Code=====
{{ precedent.code }}
{% endfor %}{% endif %}
{% if former_failure %}
Your previous attempt at this task failed. Fix the problems described in the feedback.
=====Previous code=====
{{ former_failure.code }}
=====Feedback=====
{{ former_failure.feedback }}
{% endif %}
Respond with a JSON object containing a single key "code".
{% if output_file %}The value of "code" is the complete content of `{{ output_file }}` as a string.{% else %}The value of "code" is an object mapping relative file names to their complete contents.{% endif %}"#;

pub const DEFAULT_USER_PROMPT: &str = r#"{% if context_files %}The following files already exist in the workspace. Your code must be consistent with them:
{% for file in context_files %}
---------- {{ file.name }} ----------
{{ file.content }}
{% endfor %}{% endif %}
{% if latest_code %}
Your latest version of the code for this task:
{{ latest_code }}
{% endif %}
Write the code for the task now."#;

/// Prompt templates with the recognised keys `system` and `user`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptTemplates {
    pub system: String,
    pub user: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            user: DEFAULT_USER_PROMPT.to_string(),
        }
    }
}

impl PromptTemplates {
    /// Loads templates from YAML; missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, PromptError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, PromptError> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Parses both templates, failing on syntax errors.
    pub fn compile(&self) -> Result<PromptRenderer, PromptError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(vec![
            (SYSTEM_TEMPLATE, self.system.as_str()),
            (USER_TEMPLATE, self.user.as_str()),
        ])?;
        Ok(PromptRenderer { tera })
    }
}

/// Compiled templates ready for rendering.
#[derive(Debug, Clone)]
pub struct PromptRenderer {
    tera: Tera,
}

impl PromptRenderer {
    /// Renders `(system, user)` prompts.
    pub fn render(&self, context: &Context) -> Result<(String, String), PromptError> {
        let system = self.tera.render(SYSTEM_TEMPLATE, context)?;
        let user = self.tera.render(USER_TEMPLATE, context)?;
        Ok((system.trim().to_string(), user.trim().to_string()))
    }
}
