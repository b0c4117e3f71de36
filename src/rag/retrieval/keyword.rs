// Term-frequency (BM25) retriever over an in-memory inverted index
//
// The index is an immutable snapshot. Re-indexing builds a new snapshot off
// to the side and swaps the shared pointer, so in-flight queries keep the
// snapshot they started with and never see a half-built index.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::info;

use crate::rag::retrieval::tokenizer::TextTokenizer;
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::{Chunk, MetadataFilter, RankedResult, RetrievalRequest, ScoredCandidate};

/// BM25 free parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bm25Params {
    /// Term-frequency saturation
    pub k1: f64,
    /// Document-length normalization (0.0 to 1.0)
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    doc: usize,
    tf: u32,
}

/// Immutable BM25 index snapshot
#[derive(Debug)]
pub struct Bm25Index {
    chunks: Vec<Arc<Chunk>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    postings: HashMap<String, Vec<Posting>>,
    tokenizer: TextTokenizer,
    params: Bm25Params,
}

impl Bm25Index {
    /// Index with no documents
    pub fn empty(tokenizer: TextTokenizer, params: Bm25Params) -> Self {
        Self::build(Vec::new(), tokenizer, params)
    }

    /// Build a snapshot over `chunks`; O(corpus size)
    ///
    /// Insertion order is kept and breaks score ties at query time.
    pub fn build(chunks: Vec<Arc<Chunk>>, tokenizer: TextTokenizer, params: Bm25Params) -> Self {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut doc_lengths = Vec::with_capacity(chunks.len());

        for (doc, chunk) in chunks.iter().enumerate() {
            let tokens = tokenizer.tokenize(&chunk.text);
            doc_lengths.push(tokens.len());

            let mut term_freqs: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *term_freqs.entry(token).or_insert(0) += 1;
            }

            for (term, tf) in term_freqs {
                postings.entry(term).or_default().push(Posting { doc, tf });
            }
        }

        let total: usize = doc_lengths.iter().sum();
        let avg_doc_length = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f64 / doc_lengths.len() as f64
        };

        Self {
            chunks,
            doc_lengths,
            avg_doc_length,
            postings,
            tokenizer,
            params,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Indexed chunks in insertion order
    pub fn chunks(&self) -> &[Arc<Chunk>] {
        &self.chunks
    }

    /// Number of distinct indexed terms
    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    /// Non-negative inverse document frequency
    fn idf(&self, doc_freq: usize) -> f64 {
        let n = self.chunks.len() as f64;
        let df = doc_freq as f64;
        (1.0 + (n - df + 0.5) / (df + 0.5)).ln()
    }

    /// BM25 score per matching document; O(query terms × postings)
    fn score(&self, query: &str) -> HashMap<usize, f64> {
        let mut scores: HashMap<usize, f64> = HashMap::new();
        let Bm25Params { k1, b } = self.params;

        for term in self.tokenizer.tokenize(query) {
            let Some(postings) = self.postings.get(&term) else {
                continue;
            };
            let idf = self.idf(postings.len());

            for posting in postings {
                let tf = f64::from(posting.tf);
                let length_ratio = if self.avg_doc_length > 0.0 {
                    self.doc_lengths[posting.doc] as f64 / self.avg_doc_length
                } else {
                    1.0
                };
                let denom = tf + k1 * (1.0 - b + b * length_ratio);
                *scores.entry(posting.doc).or_insert(0.0) += idf * tf * (k1 + 1.0) / denom;
            }
        }

        scores
    }

    /// Top `top_k` chunks sharing at least one term with `query`
    ///
    /// Ties are broken by insertion order. An empty index or a query without
    /// indexable terms yields an empty result.
    pub fn search(&self, query: &str, top_k: usize, filter: Option<&MetadataFilter>) -> RankedResult {
        if self.is_empty() || top_k == 0 {
            return RankedResult::empty();
        }

        let mut scored: Vec<(usize, f64)> = self
            .score(query)
            .into_iter()
            .filter(|(doc, _)| filter.map_or(true, |f| f.matches(&self.chunks[*doc])))
            .collect();

        scored.sort_by(|(doc_a, score_a), (doc_b, score_b)| {
            score_b.total_cmp(score_a).then(doc_a.cmp(doc_b))
        });
        scored.truncate(top_k);

        RankedResult::from_unsorted(
            scored
                .into_iter()
                .map(|(doc, score)| ScoredCandidate::new(self.chunks[doc].clone(), score))
                .collect(),
        )
    }
}

/// Keyword retriever holding the current BM25 snapshot
pub struct KeywordRetriever {
    current: RwLock<Arc<Bm25Index>>,
    tokenizer: TextTokenizer,
    params: Bm25Params,
    telemetry: Option<TelemetryCollector>,
}

impl KeywordRetriever {
    /// Create retriever with an empty index
    pub fn new() -> Self {
        Self::with_params(TextTokenizer::new(), Bm25Params::default())
    }

    /// Create with custom tokenizer and BM25 parameters
    pub fn with_params(tokenizer: TextTokenizer, params: Bm25Params) -> Self {
        Self {
            current: RwLock::new(Arc::new(Bm25Index::empty(tokenizer, params))),
            tokenizer,
            params,
            telemetry: None,
        }
    }

    /// Report index rebuilds to `telemetry`
    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Replace the whole index
    ///
    /// The snapshot is built without holding the lock; only the pointer swap
    /// takes the write lock.
    pub fn index(&self, chunks: Vec<Arc<Chunk>>) {
        let started = Instant::now();
        let count = chunks.len();
        let snapshot = Arc::new(Bm25Index::build(chunks, self.tokenizer, self.params));

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = snapshot;

        let duration_ms = started.elapsed().as_millis() as u64;
        info!(chunks = count, duration_ms, "keyword index rebuilt");
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(PipelineEvent::IndexRebuilt {
                chunks: count,
                duration_ms,
                timestamp: Instant::now(),
            });
        }
    }

    /// Convenience wrapper over owned chunks
    pub fn index_chunks(&self, chunks: Vec<Chunk>) {
        self.index(chunks.into_iter().map(Arc::new).collect());
    }

    /// Current snapshot, valid for as long as the caller holds it
    pub fn snapshot(&self) -> Arc<Bm25Index> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Retrieve top `top_k` chunks for `query`
    pub fn retrieve(&self, query: &str, top_k: usize) -> RankedResult {
        self.snapshot().search(query, top_k, None)
    }

    /// Retrieve honouring the request's metadata filters
    pub fn retrieve_request(&self, request: &RetrievalRequest) -> RankedResult {
        self.snapshot()
            .search(&request.query, request.top_k, request.filters.as_ref())
    }

    /// Full indexed corpus, in insertion order
    pub fn documents(&self) -> Vec<Arc<Chunk>> {
        self.snapshot().chunks().to_vec()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

impl Default for KeywordRetriever {
    fn default() -> Self {
        Self::new()
    }
}
