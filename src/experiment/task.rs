//! Task capability and the concrete coding task used by the CLI.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A unit of work that can be targeted for code generation.
///
/// The only behavior a task needs is a stable, deterministic description. That
/// description is both prompt content and the knowledge-base key, so two tasks
/// with identical descriptions deliberately share precedents.
pub trait Task: Send + Sync + fmt::Debug {
    /// Short human-readable name used in logs and reports.
    fn name(&self) -> &str;

    /// Full description of the task (prompt content and fingerprint source).
    fn information(&self) -> String;

    /// File this task is expected to produce, if it produces exactly one.
    fn output_file(&self) -> Option<&str> {
        None
    }

    /// Whether the task needs its own workspace instead of co-writing the
    /// experiment's shared artifact tree.
    fn needs_isolation(&self) -> bool {
        false
    }

    /// Files that must exist once the task is implemented.
    fn required_files(&self) -> Vec<String> {
        self.output_file()
            .map(|f| vec![f.to_string()])
            .unwrap_or_default()
    }

    /// Regex patterns (e.g. function signatures) that must appear in the task's files.
    fn required_signatures(&self) -> Vec<String> {
        Vec::new()
    }

    /// Knowledge-base key for this task.
    fn fingerprint(&self) -> Fingerprint {
        Fingerprint::new(self.information())
    }
}

/// Stable key identifying a task description in the knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short SHA-256 digest, used in logs instead of the full description.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(self.0.as_bytes());
        hex::encode(&hash[..6])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A code-generation task loaded from an experiment definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodingTask {
    /// Task name.
    pub name: String,
    /// What the generated code must do.
    pub description: String,
    /// File the task writes, when it owns a single file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    /// Whether the task gets an isolated workspace.
    #[serde(default)]
    pub isolated: bool,
    /// Patterns that must appear in the produced code.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_signatures: Vec<String>,
    /// Task-type-specific metadata, included in the description in key order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CodingTask {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            output_file: None,
            isolated: false,
            required_signatures: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_output_file(mut self, file: impl Into<String>) -> Self {
        self.output_file = Some(file.into());
        self
    }

    pub fn with_signature(mut self, pattern: impl Into<String>) -> Self {
        self.required_signatures.push(pattern.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }
}

impl Task for CodingTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn information(&self) -> String {
        let mut info = format!("name: {}\ndescription: {}", self.name, self.description);
        for (key, value) in &self.metadata {
            info.push_str(&format!("\n{}: {}", key, value));
        }
        info
    }

    fn output_file(&self) -> Option<&str> {
        self.output_file.as_deref()
    }

    fn needs_isolation(&self) -> bool {
        self.isolated
    }

    fn required_signatures(&self) -> Vec<String> {
        self.required_signatures.clone()
    }
}
