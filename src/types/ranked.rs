//! Scored candidates and ranked result lists

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::errors::{RagError, Result};
use crate::types::chunk::{Chunk, MetadataFilter};

/// Which retrieval signals feed the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    /// Nearest-neighbor search only
    #[serde(alias = "vector-only")]
    Vector,
    /// BM25 only
    #[serde(alias = "keyword-only")]
    Keyword,
    /// Normalized weighted fusion of both
    Hybrid,
}

impl Default for RetrievalMode {
    fn default() -> Self {
        RetrievalMode::Hybrid
    }
}

/// Per-call retrieval request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: usize,
    pub filters: Option<MetadataFilter>,
}

impl RetrievalRequest {
    /// Create a request; `top_k` must be positive
    pub fn new(query: impl Into<String>, top_k: usize) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::ConfigError(
                "top_k must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            query: query.into(),
            top_k,
            filters: None,
        })
    }

    pub fn with_filters(mut self, filters: MetadataFilter) -> Self {
        self.filters = if filters.is_empty() { None } else { Some(filters) };
        self
    }

    /// Same request with a different result count
    pub fn with_top_k(&self, top_k: usize) -> Self {
        Self {
            query: self.query.clone(),
            top_k: top_k.max(1),
            filters: self.filters.clone(),
        }
    }
}

/// A chunk with a retriever- or reranker-specific score
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub chunk: Arc<Chunk>,
    pub score: f64,
}

impl ScoredCandidate {
    pub fn new(chunk: Arc<Chunk>, score: f64) -> Self {
        Self { chunk, score }
    }

    pub fn id(&self) -> &str {
        &self.chunk.id
    }
}

/// Candidates ordered by descending score
///
/// Ties keep their original retrieval order (stable sort), never chunk id
/// order. NaN scores sort last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankedResult {
    candidates: Vec<ScoredCandidate>,
}

impl RankedResult {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Sort candidates by descending score, keeping input order on ties
    pub fn from_unsorted(mut candidates: Vec<ScoredCandidate>) -> Self {
        candidates.sort_by(|a, b| compare_desc(a.score, b.score));
        Self { candidates }
    }

    /// Sort then keep the best `top_k`
    pub fn top_k(candidates: Vec<ScoredCandidate>, top_k: usize) -> Self {
        let mut ranked = Self::from_unsorted(candidates);
        ranked.truncate(top_k);
        ranked
    }

    pub fn truncate(&mut self, len: usize) {
        self.candidates.truncate(len);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScoredCandidate> {
        self.candidates.iter()
    }

    pub fn candidates(&self) -> &[ScoredCandidate] {
        &self.candidates
    }

    pub fn scores(&self) -> Vec<f64> {
        self.candidates.iter().map(|c| c.score).collect()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.id()).collect()
    }

    pub fn into_vec(self) -> Vec<ScoredCandidate> {
        self.candidates
    }
}

impl IntoIterator for RankedResult {
    type Item = ScoredCandidate;
    type IntoIter = std::vec::IntoIter<ScoredCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.into_iter()
    }
}

impl<'a> IntoIterator for &'a RankedResult {
    type Item = &'a ScoredCandidate;
    type IntoIter = std::slice::Iter<'a, ScoredCandidate>;

    fn into_iter(self) -> Self::IntoIter {
        self.candidates.iter()
    }
}

fn compare_desc(a: f64, b: f64) -> Ordering {
    let key = |s: f64| if s.is_nan() { f64::NEG_INFINITY } else { s };
    key(b).total_cmp(&key(a))
}
