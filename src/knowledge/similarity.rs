//! Lexical similarity between task descriptions.
//!
//! Descriptions are turned into fixed-size hashed feature vectors (word unigrams,
//! word bigrams and character trigrams) and compared with cosine similarity.
//! Identical descriptions always score 1.0, which is what the knowledge base
//! relies on to rank a task's own precedents first.

use ndarray::Array1;
use sha2::{Digest, Sha256};

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 128;

/// Hash-based text embedder.
#[derive(Debug, Clone)]
pub struct TextEmbedder {
    dimension: usize,
}

impl Default for TextEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl TextEmbedder {
    /// Creates an embedder; dimensions below 8 are raised to 8.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embeds `text` into a unit-length vector (all zeros for blank text).
    pub fn embed(&self, text: &str) -> Array1<f64> {
        let mut embedding = Array1::zeros(self.dimension);
        let lower = text.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return embedding;
        }

        // Word unigrams
        let word_dim = self.dimension / 2;
        for word in &words {
            let pos = hash_to_index(word, word_dim);
            embedding[pos] += 1.0;
        }

        // Word bigrams capture short phrases like "load data"
        let offset = word_dim;
        let bigram_dim = self.dimension / 4;
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            embedding[offset + hash_to_index(&bigram, bigram_dim)] += 0.5;
        }

        // Character trigrams over the joined words
        let offset = offset + bigram_dim;
        let trigram_dim = self.dimension - offset;
        let chars: Vec<char> = words.join(" ").chars().collect();
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            embedding[offset + hash_to_index(&trigram, trigram_dim)] += 0.25;
        }

        normalize(&mut embedding);
        embedding
    }

    /// Cosine similarity between two texts.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        cosine_similarity(&self.embed(a), &self.embed(b))
    }
}

/// Cosine similarity in [-1, 1]; 0.0 when either vector is (near) zero or
/// the lengths differ.
pub fn cosine_similarity(a: &Array1<f64>, b: &Array1<f64>) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let norm_a = a.dot(a).sqrt();
    let norm_b = b.dot(b).sqrt();
    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }
    a.dot(b) / (norm_a * norm_b)
}

fn hash_to_index(input: &str, max_index: usize) -> usize {
    if max_index == 0 {
        return 0;
    }
    let hash = Sha256::digest(input.as_bytes());
    let value = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) as usize;
    value % max_index
}

fn normalize(v: &mut Array1<f64>) {
    let norm = v.dot(v).sqrt();
    if norm > 1e-10 {
        v.mapv_inplace(|x| x / norm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_text_scores_one() {
        let embedder = TextEmbedder::default();
        let sim = embedder.similarity(
            "name: feature\ndescription: engineer features",
            "name: feature\ndescription: engineer features",
        );
        assert!((sim - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_related_text_beats_unrelated() {
        let embedder = TextEmbedder::default();
        let query = "load the training data from csv files";
        let related = embedder.similarity(query, "load the test data from csv files");
        let unrelated = embedder.similarity(query, "ensemble model predictions by averaging");
        assert!(related > unrelated, "{} <= {}", related, unrelated);
    }

    #[test]
    fn test_blank_text() {
        let embedder = TextEmbedder::new(16);
        assert_eq!(embedder.similarity("", "anything"), 0.0);
        assert!(embedder.embed("   ").iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_minimum_dimension() {
        assert_eq!(TextEmbedder::new(2).dimension(), 8);
    }
}
