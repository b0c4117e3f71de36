// Vector retriever: embedding + nearest-neighbor lookup + chunk resolution
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::capabilities::{ChunkStore, Deadline, Embedder, VectorIndex};
use crate::errors::{RagError, Result};
use crate::types::{RankedResult, RetrievalRequest, ScoredCandidate};

const RETRIEVER: &str = "vector";

/// Retriever backed by the external embedding model and vector index
pub struct VectorRetriever {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    store: Arc<dyn ChunkStore>,
    timeout: Duration,
}

impl VectorRetriever {
    /// Create retriever; every external call is bounded by `timeout`
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        store: Arc<dyn ChunkStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            index,
            store,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retrieve without filters or deadline
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<RankedResult> {
        let request = RetrievalRequest::new(query, top_k)?;
        self.retrieve_request(&request, &Deadline::none()).await
    }

    /// Embed the query, issue one `nearest` call with `k = top_k`, and resolve
    /// each hit through the chunk store
    ///
    /// Embedding failure fails fast with `EmbeddingUnavailable`. An index
    /// failure is `RetrieverUnavailable`. A chunk store that errors (rather
    /// than timing out) is `ChunkStoreUnavailable`, which callers must not
    /// degrade. Ids the store no longer knows are skipped.
    pub async fn retrieve_request(
        &self,
        request: &RetrievalRequest,
        deadline: &Deadline,
    ) -> Result<RankedResult> {
        let embedding = deadline
            .bound(self.timeout, self.embedder.embed(&request.query))
            .await
            .map_err(|e| match e {
                RagError::DeadlineExceeded => e,
                other => RagError::EmbeddingUnavailable(other.to_string()),
            })?;

        let hits = deadline
            .bound(
                self.timeout,
                self.index
                    .nearest(&embedding, request.top_k, request.filters.as_ref()),
            )
            .await
            .map_err(|e| unavailable(&e))?;

        let mut candidates = Vec::with_capacity(hits.len());
        for (id, score) in hits {
            let resolved = deadline
                .bound(self.timeout, self.store.get_chunk(&id))
                .await
                .map_err(|e| match e {
                    e if e.is_timeout() => unavailable(&e),
                    e if e.is_corpus_level() => e,
                    other => RagError::ChunkStoreUnavailable(other.to_string()),
                })?;

            let Some(chunk) = resolved else {
                debug!(chunk_id = %id, "vector hit missing from chunk store, skipped");
                continue;
            };

            if let Some(filter) = &request.filters {
                if !filter.matches(&chunk) {
                    continue;
                }
            }

            candidates.push(ScoredCandidate::new(chunk, score));
        }

        let mut ranked = RankedResult::from_unsorted(candidates);
        ranked.truncate(request.top_k);
        Ok(ranked)
    }
}

fn unavailable(error: &RagError) -> RagError {
    RagError::RetrieverUnavailable {
        retriever: RETRIEVER.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{InMemoryChunkStore, InMemoryVectorIndex};
    use crate::types::{Chunk, MetadataFilter};
    use async_trait::async_trait;

    struct FixedEmbedder(Vec<f32>);

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(self.0.clone())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(RagError::Generic("model not loaded".to_string()))
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![1.0, 0.0])
        }
    }

    fn fixtures() -> (Arc<InMemoryChunkStore>, Arc<InMemoryVectorIndex>) {
        let store = Arc::new(InMemoryChunkStore::new(vec![
            Chunk::in_source("a", "alpha text", "doc", 0),
            Chunk::in_source("b", "beta text", "doc", 1),
            Chunk::in_source("c", "gamma text", "other", 0),
        ]));
        let index = Arc::new(InMemoryVectorIndex::new());
        index.upsert("a", vec![1.0, 0.0]);
        index.upsert("b", vec![0.7, 0.7]);
        index.upsert("c", vec![0.0, 1.0]);
        (store, index)
    }

    fn retriever(embedder: Arc<dyn Embedder>) -> VectorRetriever {
        let (store, index) = fixtures();
        VectorRetriever::new(embedder, index, store, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_resolves_nearest_chunks() {
        let retriever = retriever(Arc::new(FixedEmbedder(vec![1.0, 0.0])));
        let result = retriever.retrieve("alpha", 2).await.unwrap();

        assert_eq!(result.ids(), vec!["a", "b"]);
        assert!(result.candidates()[0].score > result.candidates()[1].score);
    }

    #[tokio::test]
    async fn test_embedding_failure_fails_fast() {
        let retriever = retriever(Arc::new(FailingEmbedder));
        let err = retriever.retrieve("alpha", 2).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_embedding_timeout_is_failure() {
        let retriever = retriever(Arc::new(SlowEmbedder));
        let err = retriever.retrieve("alpha", 2).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    }

    #[tokio::test]
    async fn test_filters_forwarded_and_rechecked() {
        let retriever = retriever(Arc::new(FixedEmbedder(vec![0.0, 1.0])));
        let request = RetrievalRequest::new("gamma", 3)
            .unwrap()
            .with_filters(MetadataFilter::new().with("source", "doc"));

        let result = retriever
            .retrieve_request(&request, &Deadline::none())
            .await
            .unwrap();
        assert!(result.iter().all(|c| c.chunk.source() == Some("doc")));
        assert!(!result.ids().contains(&"c"));
    }

    #[tokio::test]
    async fn test_unknown_ids_skipped() {
        let (store, index) = fixtures();
        index.upsert("ghost", vec![1.0, 0.0]);
        let retriever = VectorRetriever::new(
            Arc::new(FixedEmbedder(vec![1.0, 0.0])),
            index,
            store,
            Duration::from_millis(200),
        );

        let result = retriever.retrieve("alpha", 4).await.unwrap();
        assert!(!result.ids().contains(&"ghost"));
        assert_eq!(result.len(), 3);
    }
}
