//! Knowledge accumulated across evolution rounds.
//!
//! - [`KnowledgeBase`]: append-only store keyed by task fingerprint
//! - [`QueriedKnowledge`]: immutable per-round snapshot handed to strategies
//! - [`TextEmbedder`]: lexical similarity used to rank precedents

pub mod base;
pub mod similarity;

pub use base::{
    KnowledgeBase, KnowledgeConfig, KnowledgeEntry, KnowledgeRecord, KnowledgeStats, Outcome,
    QueriedKnowledge, RankedPrecedent,
};
pub use similarity::{cosine_similarity, TextEmbedder};
