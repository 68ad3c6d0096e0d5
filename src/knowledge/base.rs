//! Append-only knowledge base of past attempts.
//!
//! Every evaluated attempt is recorded under its task fingerprint, either as a
//! successful precedent or as a failure trace. Queries return an owned
//! [`QueriedKnowledge`] snapshot, so records appended after a query are never
//! visible through it.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use ndarray::Array1;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::similarity::{cosine_similarity, TextEmbedder, DEFAULT_DIMENSION};
use crate::error::KnowledgeError;
use crate::experiment::{FileMap, Fingerprint, Task};

const FORMAT_VERSION: u32 = 1;

/// Retrieval settings for the knowledge base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Maximum similar successful precedents returned per task.
    pub similar_success_limit: usize,
    /// Maximum former failure traces returned per task.
    pub former_failure_limit: usize,
    /// Minimum description similarity for a precedent to count as similar.
    pub similarity_threshold: f64,
    /// Dimension of description embeddings.
    pub embedding_dimension: usize,
    /// Tasks with at least this many failure traces are no longer attempted.
    pub max_failures_before_giving_up: Option<usize>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            similar_success_limit: 5,
            former_failure_limit: 5,
            similarity_threshold: 0.0,
            embedding_dimension: DEFAULT_DIMENSION,
            max_failures_before_giving_up: None,
        }
    }
}

/// Outcome of an attempt, with the feedback that explains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    Success { feedback: String },
    Failure { feedback: String },
}

impl Outcome {
    pub fn success(feedback: impl Into<String>) -> Self {
        Outcome::Success {
            feedback: feedback.into(),
        }
    }

    pub fn failure(feedback: impl Into<String>) -> Self {
        Outcome::Failure {
            feedback: feedback.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn feedback(&self) -> &str {
        match self {
            Outcome::Success { feedback } | Outcome::Failure { feedback } => feedback,
        }
    }
}

/// One recorded attempt: the task description, the code and its feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    pub task_information: String,
    pub code: FileMap,
    pub feedback: String,
    /// Monotonic insertion order across the whole knowledge base.
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
}

impl KnowledgeRecord {
    /// Renders the code with `File:` headers for prompt inclusion.
    pub fn code_text(&self) -> String {
        let mut out = String::new();
        for (name, content) in &self.code {
            out.push_str(&format!("File: {}\n{}\n", name, content));
        }
        out
    }
}

/// Everything known about one fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub successes: Vec<KnowledgeRecord>,
    pub failures: Vec<KnowledgeRecord>,
}

/// A successful precedent together with its similarity to the queried task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPrecedent {
    pub similarity: f64,
    pub record: KnowledgeRecord,
}

/// Per-round, read-only projection of the knowledge base.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueriedKnowledge {
    similar_successes: HashMap<Fingerprint, Vec<RankedPrecedent>>,
    former_failures: HashMap<Fingerprint, Vec<KnowledgeRecord>>,
    as_of_sequence: u64,
}

impl QueriedKnowledge {
    /// Whether `fingerprint` was part of the query.
    pub fn covers(&self, fingerprint: &Fingerprint) -> bool {
        self.similar_successes.contains_key(fingerprint)
    }

    /// Similar successful precedents, most similar first.
    pub fn similar_successes(&self, fingerprint: &Fingerprint) -> &[RankedPrecedent] {
        self.similar_successes
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Former failure traces, most recent first.
    pub fn former_failures(&self, fingerprint: &Fingerprint) -> &[KnowledgeRecord] {
        self.former_failures
            .get(fingerprint)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The single failure trace a generator should learn from.
    pub fn most_relevant_failure(&self, fingerprint: &Fingerprint) -> Option<&KnowledgeRecord> {
        self.former_failures(fingerprint).first()
    }

    /// Sequence number of the first record *not* visible in this snapshot.
    pub fn as_of_sequence(&self) -> u64 {
        self.as_of_sequence
    }

    pub fn fingerprints(&self) -> impl Iterator<Item = &Fingerprint> {
        self.similar_successes.keys()
    }

    pub fn len(&self) -> usize {
        self.similar_successes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.similar_successes.is_empty()
    }
}

#[derive(Debug, Default)]
struct KnowledgeStore {
    entries: HashMap<Fingerprint, KnowledgeEntry>,
    embeddings: HashMap<Fingerprint, Array1<f64>>,
    next_sequence: u64,
}

/// On-disk representation.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedKnowledge {
    version: u32,
    next_sequence: u64,
    entries: Vec<PersistedEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    fingerprint: Fingerprint,
    #[serde(flatten)]
    entry: KnowledgeEntry,
}

/// Summary counts used by the CLI and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KnowledgeStats {
    pub fingerprints: usize,
    pub successes: usize,
    pub failures: usize,
}

/// Append-only store of successful precedents and failure traces.
#[derive(Debug)]
pub struct KnowledgeBase {
    config: KnowledgeConfig,
    embedder: TextEmbedder,
    store: RwLock<KnowledgeStore>,
}

impl Default for KnowledgeBase {
    fn default() -> Self {
        Self::new(KnowledgeConfig::default())
    }
}

impl KnowledgeBase {
    pub fn new(config: KnowledgeConfig) -> Self {
        let embedder = TextEmbedder::new(config.embedding_dimension);
        Self {
            config,
            embedder,
            store: RwLock::new(KnowledgeStore::default()),
        }
    }

    pub fn config(&self) -> &KnowledgeConfig {
        &self.config
    }

    /// Appends an attempt for `task` under its fingerprint.
    pub async fn record<T: Task + ?Sized>(&self, task: &T, code: &FileMap, outcome: Outcome) {
        let fingerprint = task.fingerprint();
        let embedding = self.embedder.embed(fingerprint.as_str());

        let mut store = self.store.write().await;
        let sequence = store.next_sequence;
        store.next_sequence += 1;

        let record = KnowledgeRecord {
            task_information: task.information(),
            code: code.clone(),
            feedback: outcome.feedback().to_string(),
            sequence,
            recorded_at: Utc::now(),
        };

        store
            .embeddings
            .entry(fingerprint.clone())
            .or_insert(embedding);
        let entry = store.entries.entry(fingerprint.clone()).or_default();
        if outcome.is_success() {
            entry.successes.push(record);
        } else {
            entry.failures.push(record);
        }

        debug!(
            task = task.name(),
            fingerprint = %fingerprint.digest(),
            success = outcome.is_success(),
            sequence,
            "Recorded knowledge"
        );
    }

    /// Builds the read-only snapshot for `tasks`.
    ///
    /// Successful precedents are drawn from every fingerprint and ranked by
    /// description similarity (ties: most recent first). Failure traces come
    /// from the task's own fingerprint, most recent first.
    pub async fn query<'a, T, I>(&self, tasks: I) -> QueriedKnowledge
    where
        T: Task + ?Sized + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let store = self.store.read().await;
        let mut snapshot = QueriedKnowledge {
            as_of_sequence: store.next_sequence,
            ..Default::default()
        };

        for task in tasks {
            let fingerprint = task.fingerprint();
            if snapshot.similar_successes.contains_key(&fingerprint) {
                continue;
            }
            let query_embedding = store
                .embeddings
                .get(&fingerprint)
                .cloned()
                .unwrap_or_else(|| self.embedder.embed(fingerprint.as_str()));

            let mut ranked: Vec<RankedPrecedent> = store
                .entries
                .iter()
                .flat_map(|(fp, entry)| {
                    let similarity = store
                        .embeddings
                        .get(fp)
                        .map(|e| cosine_similarity(&query_embedding, e))
                        .unwrap_or(0.0);
                    entry.successes.iter().map(move |record| RankedPrecedent {
                        similarity,
                        record: record.clone(),
                    })
                })
                .filter(|p| p.similarity >= self.config.similarity_threshold)
                .collect();
            ranked.sort_by_key(|p| Reverse((OrderedFloat(p.similarity), p.record.sequence)));
            ranked.truncate(self.config.similar_success_limit);

            let failures: Vec<KnowledgeRecord> = store
                .entries
                .get(&fingerprint)
                .map(|entry| {
                    entry
                        .failures
                        .iter()
                        .rev()
                        .take(self.config.former_failure_limit)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();

            snapshot.similar_successes.insert(fingerprint.clone(), ranked);
            snapshot.former_failures.insert(fingerprint, failures);
        }

        snapshot
    }

    /// Number of failure traces recorded for `fingerprint`.
    pub async fn failure_count(&self, fingerprint: &Fingerprint) -> usize {
        self.store
            .read()
            .await
            .entries
            .get(fingerprint)
            .map_or(0, |e| e.failures.len())
    }

    /// Whether the give-up policy excludes `fingerprint` from further attempts.
    pub async fn has_given_up(&self, fingerprint: &Fingerprint) -> bool {
        match self.config.max_failures_before_giving_up {
            Some(limit) => self.failure_count(fingerprint).await >= limit,
            None => false,
        }
    }

    /// Copy of the entry for `fingerprint`, if any.
    pub async fn entry(&self, fingerprint: &Fingerprint) -> Option<KnowledgeEntry> {
        self.store.read().await.entries.get(fingerprint).cloned()
    }

    pub async fn stats(&self) -> KnowledgeStats {
        let store = self.store.read().await;
        KnowledgeStats {
            fingerprints: store.entries.len(),
            successes: store.entries.values().map(|e| e.successes.len()).sum(),
            failures: store.entries.values().map(|e| e.failures.len()).sum(),
        }
    }

    /// Writes the knowledge base as JSON.
    pub async fn save_json(&self, path: &Path) -> Result<(), KnowledgeError> {
        let store = self.store.read().await;
        let mut entries: Vec<PersistedEntry> = store
            .entries
            .iter()
            .map(|(fingerprint, entry)| PersistedEntry {
                fingerprint: fingerprint.clone(),
                entry: entry.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

        let persisted = PersistedKnowledge {
            version: FORMAT_VERSION,
            next_sequence: store.next_sequence,
            entries,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(&persisted)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), fingerprints = store.entries.len(), "Saved knowledge base");
        Ok(())
    }

    /// Loads a knowledge base previously written by [`KnowledgeBase::save_json`].
    pub async fn load_json(path: &Path, config: KnowledgeConfig) -> Result<Self, KnowledgeError> {
        let content = tokio::fs::read_to_string(path).await?;
        let persisted: PersistedKnowledge = serde_json::from_str(&content)?;
        if persisted.version != FORMAT_VERSION {
            return Err(KnowledgeError::UnsupportedVersion(persisted.version));
        }

        let kb = Self::new(config);
        {
            let mut store = kb.store.write().await;
            let mut max_sequence = None;
            for PersistedEntry { fingerprint, entry } in persisted.entries {
                let highest = entry
                    .successes
                    .iter()
                    .chain(entry.failures.iter())
                    .map(|r| r.sequence)
                    .max();
                max_sequence = max_sequence.max(highest);
                store
                    .embeddings
                    .insert(fingerprint.clone(), kb.embedder.embed(fingerprint.as_str()));
                store.entries.insert(fingerprint, entry);
            }
            store.next_sequence = persisted
                .next_sequence
                .max(max_sequence.map_or(0, |s| s + 1));
        }
        info!(path = %path.display(), "Loaded knowledge base");
        Ok(kb)
    }
}
