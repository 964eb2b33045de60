use std::collections::HashMap;

use crate::{config::IndexSettings, lexical::helper::tokenize};

/// BM25 tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bm25Params {
    /// Term-frequency saturation.
    pub k1: f32,
    /// Length normalisation.
    pub b: f32,
    /// Lower bound for IDF.
    pub idf_floor: f32,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self::from(&IndexSettings::default())
    }
}

impl From<&IndexSettings> for Bm25Params {
    fn from(settings: &IndexSettings) -> Self {
        Self {
            k1: settings.k1,
            b: settings.b,
            idf_floor: settings.idf_floor,
        }
    }
}

/// BM25 index over a small document set (the cards of one topic key).
#[derive(Debug, Clone)]
pub struct Bm25Index {
    params: Bm25Params,
    term_freqs: Vec<HashMap<String, usize>>,
    doc_lens: Vec<usize>,
    avg_len: f32,
    idf: HashMap<String, f32>,
}

impl Bm25Index {
    /// Tokenises and indexes `documents`.
    #[must_use]
    pub fn build(documents: &[String], params: Bm25Params) -> Self {
        let mut term_freqs = Vec::with_capacity(documents.len());
        let mut doc_lens = Vec::with_capacity(documents.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for document in documents {
            let tokens = tokenize(document);
            doc_lens.push(tokens.len());
            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_default() += 1;
            }
            for term in freqs.keys() {
                *doc_freq.entry(term.clone()).or_default() += 1;
            }
            term_freqs.push(freqs);
        }
        let total_len: usize = doc_lens.iter().sum();
        let avg_len = if documents.is_empty() {
            0.0
        } else {
            total_len as f32 / documents.len() as f32
        };
        let n = documents.len() as f32;
        let idf = doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f32;
                let raw = ((n - df + 0.5) / (df + 0.5)).ln();
                (term, raw.max(params.idf_floor))
            })
            .collect();
        Self {
            params,
            term_freqs,
            doc_lens,
            avg_len,
            idf,
        }
    }

    /// One BM25 score per document, in document order.
    #[must_use]
    pub fn scores(&self, query: &str) -> Vec<f32> {
        let query_tokens = tokenize(query);
        let Bm25Params { k1, b, .. } = self.params;
        // All-empty documents would divide by zero; any positive length works since tf is 0.
        let avg_len = if self.avg_len > 0.0 { self.avg_len } else { 1.0 };
        self.term_freqs
            .iter()
            .zip(&self.doc_lens)
            .map(|(freqs, &len)| {
                let length_norm = k1 * (1.0 - b + b * len as f32 / avg_len);
                query_tokens
                    .iter()
                    .filter_map(|token| {
                        let tf = *freqs.get(token)? as f32;
                        let idf = self.idf.get(token)?;
                        Some(idf * tf * (k1 + 1.0) / (tf + length_norm))
                    })
                    .sum()
            })
            .collect()
    }

    /// Inverse document frequency of a term, if it occurs in the index.
    #[must_use]
    pub fn idf(&self, term: &str) -> Option<f32> {
        self.idf.get(term).copied()
    }

    /// Number of documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    /// True when no documents were indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }
}

/// Saturated term overlap, `sum(tf / (tf + saturation))` over query tokens found in the document.
#[must_use]
pub fn term_overlap_score(query_tokens: &[String], document_tokens: &[String], saturation: f32) -> f32 {
    query_tokens
        .iter()
        .map(|token| document_tokens.iter().filter(|t| *t == token).count())
        .filter(|&tf| tf > 0)
        .map(|tf| {
            let tf = tf as f32;
            tf / (tf + saturation)
        })
        .sum()
}
