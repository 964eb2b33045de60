//! Lexical retrieval: tokenisation, BM25, similarity strategies and card assignment.

/// Card-to-key assignment.
pub mod assign;
/// BM25 index and term-overlap scoring.
pub mod bm25;
/// Text normalisation helpers.
pub mod helper;
/// Pluggable similarity strategies.
pub mod strategy;

pub use assign::{CardAssignment, KeyAssigner};
pub use bm25::{term_overlap_score, Bm25Index, Bm25Params};
pub use helper::{humanize_key, jaccard_similarity, tokenize, word_count};
pub use strategy::{
    Bm25Strategy, DocumentScorer, Embedder, EmbeddingStrategy, HashingEmbedder,
    SimilarityStrategy,
};
