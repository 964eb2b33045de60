use std::{
    collections::hash_map::DefaultHasher,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use anyhow::{ensure, Result};

use crate::lexical::{
    bm25::{Bm25Index, Bm25Params},
    helper::tokenize,
};

/// Scores a query against the documents of one topic key.
pub trait DocumentScorer: Send + Sync + fmt::Debug {
    /// One score per document, in document order.
    fn scores(&self, query: &str) -> Vec<f32>;

    /// Number of indexed documents.
    fn len(&self) -> usize;

    /// True when nothing is indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds per-key document scorers. BM25 is the default; embeddings are optional.
pub trait SimilarityStrategy: Send + Sync + fmt::Debug {
    /// Short name used in logs and cache keys.
    fn label(&self) -> &'static str;

    /// Indexes the documents of one topic key.
    fn index(&self, documents: &[String]) -> Result<Box<dyn DocumentScorer>>;

    /// A best score must be strictly above this to be accepted.
    fn min_score(&self) -> f32;
}

impl DocumentScorer for Bm25Index {
    fn scores(&self, query: &str) -> Vec<f32> {
        Self::scores(self, query)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }
}

/// Lexical BM25 similarity.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bm25Strategy {
    params: Bm25Params,
}

impl Bm25Strategy {
    /// Creates the strategy.
    #[must_use]
    pub const fn new(params: Bm25Params) -> Self {
        Self { params }
    }
}

impl SimilarityStrategy for Bm25Strategy {
    fn label(&self) -> &'static str {
        "bm25"
    }

    fn index(&self, documents: &[String]) -> Result<Box<dyn DocumentScorer>> {
        Ok(Box::new(Bm25Index::build(documents, self.params)))
    }

    fn min_score(&self) -> f32 {
        0.0
    }
}

/// Turns text into a dense vector.
pub trait Embedder: Send + Sync + fmt::Debug {
    /// Embeds one text.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Cosine similarity over embeddings, accepting matches above `min_score`.
#[derive(Debug, Clone)]
pub struct EmbeddingStrategy {
    embedder: Arc<dyn Embedder>,
    min_score: f32,
}

impl EmbeddingStrategy {
    /// Creates the strategy.
    #[must_use]
    pub fn new(embedder: Arc<dyn Embedder>, min_score: f32) -> Self {
        Self {
            embedder,
            min_score,
        }
    }
}

impl SimilarityStrategy for EmbeddingStrategy {
    fn label(&self) -> &'static str {
        "embedding"
    }

    fn index(&self, documents: &[String]) -> Result<Box<dyn DocumentScorer>> {
        let vectors = documents
            .iter()
            .map(|doc| self.embedder.embed(doc))
            .collect::<Result<Vec<_>>>()?;
        Ok(Box::new(EmbeddingIndex {
            embedder: Arc::clone(&self.embedder),
            vectors,
        }))
    }

    fn min_score(&self) -> f32 {
        self.min_score
    }
}

#[derive(Debug)]
struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    vectors: Vec<Vec<f32>>,
}

impl DocumentScorer for EmbeddingIndex {
    fn scores(&self, query: &str) -> Vec<f32> {
        // An unembeddable query matches nothing.
        let Ok(query_vec) = self.embedder.embed(query) else {
            return vec![0.0; self.vectors.len()];
        };
        self.vectors
            .iter()
            .map(|doc| cosine_similarity(&query_vec, doc))
            .collect()
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }
}

/// Cosine of the angle between two vectors; zero for mismatched or zero-length vectors.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Feature-hashed bag-of-words embedder. Needs no model, so it works offline.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    /// Creates an embedder with `dims` buckets.
    pub fn new(dims: usize) -> Result<Self> {
        ensure!(dims > 0, "embedding dimension must be positive");
        Ok(Self { dims })
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; self.dims];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() % self.dims as u64) as usize;
            vector[bucket] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut vector {
                *value /= norm;
            }
        }
        Ok(vector)
    }
}
