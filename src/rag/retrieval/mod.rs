// Retrieval stage: BM25, vector and hybrid fusion retrievers
pub mod hybrid;
pub mod keyword;
pub mod tokenizer;
pub mod vector;

use serde::{Deserialize, Serialize};

pub use hybrid::{fuse, normalize, HybridRetriever};
pub use keyword::{Bm25Index, Bm25Params, KeywordRetriever};
pub use tokenizer::TextTokenizer;
pub use vector::VectorRetriever;

use crate::types::RetrievalMode;

/// Retrieval configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Candidates handed to the reranker
    pub top_k: usize,
    /// Which signals to use
    pub mode: RetrievalMode,
    /// Weight of the vector signal in hybrid mode (0.0 to 1.0)
    pub hybrid_vector_weight: f64,
    /// Each retriever fetches `top_k × over_fetch_factor` before fusion
    pub over_fetch_factor: usize,
    /// Timeout for each embedding / vector index / chunk store call
    pub vector_timeout_ms: u64,
    /// Dictionary segmentation for Chinese/Japanese text
    pub segment_cjk: bool,
    /// BM25 parameters
    pub bm25: Bm25Params,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            mode: RetrievalMode::Hybrid,
            hybrid_vector_weight: 0.7,
            over_fetch_factor: 2,
            vector_timeout_ms: 5_000,
            segment_cjk: true,
            bm25: Bm25Params::default(),
        }
    }
}
