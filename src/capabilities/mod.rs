//! External capabilities consumed by the pipeline
//!
//! The embedding model, vector index, chunk store, relevance models and LLM
//! live outside this crate. The pipeline only sees these traits; concrete
//! adapters are in `crate::providers`.

pub mod deadline;

pub use deadline::Deadline;

use async_trait::async_trait;
use std::sync::Arc;

use crate::errors::Result;
use crate::types::{Chunk, MetadataFilter};

/// Text embedding model
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Nearest-neighbor index over chunk embeddings
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Up to `k` `(chunk_id, score)` pairs, best first
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f64)>>;
}

/// Authoritative chunk storage
///
/// Errors from a chunk store are corpus-level and should be reported as
/// `RagError::ChunkStoreUnavailable`.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get_chunk(&self, id: &str) -> Result<Option<Arc<Chunk>>>;

    async fn list_chunks(&self, filter: Option<&MetadataFilter>) -> Result<Vec<Arc<Chunk>>>;
}

/// Remote relevance model
///
/// Returns one score per text, in input order.
#[async_trait]
pub trait RelevanceModel: Send + Sync {
    async fn score_relevance(&self, query: &str, texts: &[String]) -> Result<Vec<f64>>;
}

/// In-process relevance model (cross-encoder)
///
/// Synchronous; callers run it on a blocking thread.
pub trait LocalRelevanceModel: Send + Sync {
    fn score_pairs(&self, query: &str, texts: &[String]) -> Result<Vec<f64>>;
}

/// LLM completion, the consumer of assembled context
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}
