// End-to-end RAG pipeline: retrieve -> rerank -> assemble context
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::capabilities::{ChunkStore, Deadline, Embedder, Generator, LocalRelevanceModel, RelevanceModel, VectorIndex};
use crate::config::RagConfig;
use crate::errors::{RagError, Result};
use crate::providers::{HttpRelevanceModel, OllamaEmbedder};
use crate::rag::context::{AssembledContext, ContextBuilder, ContextConfig};
use crate::rag::reranking::{CrossEncoder, ReRankConfig, ReRanker};
use crate::rag::retrieval::{
    HybridRetriever, KeywordRetriever, RetrievalConfig, TextTokenizer, VectorRetriever,
};
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::{Chunk, RankedResult, RetrievalMode, RetrievalRequest};

/// RAG pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RAGConfig {
    /// Retrieval parameters
    pub retrieval: RetrievalConfig,
    /// Re-ranking configuration
    pub rerank: ReRankConfig,
    /// Context assembly configuration
    pub context: ContextConfig,
    /// Enable/disable RAG pipeline
    pub enabled: bool,
    /// Default request deadline
    pub deadline_ms: Option<u64>,
}

impl Default for RAGConfig {
    fn default() -> Self {
        Self {
            retrieval: RetrievalConfig::default(),
            rerank: ReRankConfig::default(),
            context: ContextConfig::default(),
            enabled: true,
            deadline_ms: None,
        }
    }
}

/// RAG pipeline result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RAGResult {
    /// Original query
    pub query: String,
    /// Augmented prompt with context
    pub augmented_prompt: String,
    /// Assembled context
    pub context: AssembledContext,
    /// Number of documents retrieved
    pub documents_retrieved: usize,
    /// Number of documents after re-ranking
    pub documents_reranked: usize,
}

impl RAGResult {
    fn empty(query: &str) -> Self {
        Self {
            query: query.to_string(),
            augmented_prompt: query.to_string(),
            context: AssembledContext::empty(),
            documents_retrieved: 0,
            documents_reranked: 0,
        }
    }

    /// Matches were found but none fit the token budget
    pub fn budget_exhausted(&self) -> bool {
        self.context.is_empty() && self.documents_reranked > 0
    }
}

/// End-to-end RAG pipeline
pub struct RAGPipeline {
    store: Arc<dyn ChunkStore>,
    keyword: Arc<KeywordRetriever>,
    vector: Option<Arc<VectorRetriever>>,
    hybrid: HybridRetriever,
    reranker: ReRanker,
    context_builder: ContextBuilder,
    config: RAGConfig,
    telemetry: TelemetryCollector,
}

impl RAGPipeline {
    /// Create keyword-only pipeline with default configuration
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self::with_config(store, RAGConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(store: Arc<dyn ChunkStore>, config: RAGConfig) -> Self {
        let telemetry = TelemetryCollector::new();
        let tokenizer = TextTokenizer::with_cjk_segmentation(config.retrieval.segment_cjk);
        let keyword = Arc::new(
            KeywordRetriever::with_params(tokenizer, config.retrieval.bm25)
                .with_telemetry(telemetry.clone()),
        );

        Self {
            hybrid: Self::hybrid_for(&keyword, None, &config.retrieval, &telemetry),
            reranker: ReRanker::with_config(config.rerank.clone()).with_telemetry(telemetry.clone()),
            context_builder: ContextBuilder::with_config(config.context.clone())
                .with_telemetry(telemetry.clone()),
            store,
            keyword,
            vector: None,
            config,
            telemetry,
        }
    }

    /// Build a pipeline from file configuration
    ///
    /// With a vector index, queries are embedded through the configured
    /// embedding service. The remote reranker is attached when a URL is
    /// configured; the local cross-encoder when a model is configured and
    /// loads. A model that fails to load is logged and its tier skipped.
    pub async fn from_config(
        config: &RagConfig,
        store: Arc<dyn ChunkStore>,
        index: Option<Arc<dyn VectorIndex>>,
    ) -> Result<Self> {
        config.validate()?;
        let mut pipeline = Self::with_config(store, config.rag_config());

        if let Some(index) = index {
            let embedder = OllamaEmbedder::with_config(
                &config.embedding.base_url,
                &config.embedding.model,
                Duration::from_millis(config.embedding.timeout_ms),
            )?;
            pipeline = pipeline.with_vector(Arc::new(embedder), index);
        }

        if let Some(url) = &config.rerank.remote_url {
            let model = HttpRelevanceModel::with_timeout(
                url,
                config.rerank.remote_model.as_deref(),
                Duration::from_millis(config.rerank.remote_timeout_ms),
            )?;
            pipeline = pipeline.with_remote_reranker(Arc::new(model));
        }

        if let Some(model_id) = config.rerank.local_model.clone() {
            let loaded = tokio::task::spawn_blocking(move || CrossEncoder::load(&model_id))
                .await
                .map_err(|e| RagError::ModelError(e.to_string()))?;
            match loaded {
                Ok(encoder) => pipeline = pipeline.with_local_reranker(Arc::new(encoder)),
                Err(e) => warn!(error = %format!("{:#}", e), "cross-encoder failed to load, local tier disabled"),
            }
        }

        Ok(pipeline)
    }

    /// Attach the vector retriever
    pub fn with_vector(mut self, embedder: Arc<dyn Embedder>, index: Arc<dyn VectorIndex>) -> Self {
        let vector = Arc::new(VectorRetriever::new(
            embedder,
            index,
            self.store.clone(),
            Duration::from_millis(self.config.retrieval.vector_timeout_ms),
        ));
        self.hybrid = Self::hybrid_for(
            &self.keyword,
            Some(vector.clone()),
            &self.config.retrieval,
            &self.telemetry,
        );
        self.vector = Some(vector);
        self
    }

    /// Attach the remote relevance model tier
    pub fn with_remote_reranker(mut self, model: Arc<dyn RelevanceModel>) -> Self {
        self.reranker = self.reranker.with_remote(model);
        self
    }

    /// Attach the local cross-encoder tier
    pub fn with_local_reranker(mut self, model: Arc<dyn LocalRelevanceModel>) -> Self {
        self.reranker = self.reranker.with_local(model);
        self
    }

    fn hybrid_for(
        keyword: &Arc<KeywordRetriever>,
        vector: Option<Arc<VectorRetriever>>,
        config: &RetrievalConfig,
        telemetry: &TelemetryCollector,
    ) -> HybridRetriever {
        HybridRetriever::new(keyword.clone(), vector, config.hybrid_vector_weight)
            .with_over_fetch(config.over_fetch_factor)
            .with_telemetry(telemetry.clone())
    }

    /// Rebuild the keyword index from every chunk in the store
    ///
    /// Queries running meanwhile keep using the previous index.
    pub async fn index_corpus(&self) -> Result<usize> {
        let chunks = self.store.list_chunks(None).await.map_err(|e| match e {
            e if e.is_corpus_level() => e,
            other => RagError::ChunkStoreUnavailable(other.to_string()),
        })?;

        let count = chunks.len();
        self.index_chunks(chunks);
        Ok(count)
    }

    /// Replace the keyword index with `chunks`
    pub fn index_chunks(&self, chunks: Vec<Arc<Chunk>>) {
        self.keyword.index(chunks);
    }

    /// Execute RAG pipeline: retrieve -> rerank -> build context
    pub async fn execute(&self, query: &str) -> Result<RAGResult> {
        let request = RetrievalRequest::new(query, self.config.retrieval.top_k)?;
        let deadline = Deadline::from_millis(self.config.deadline_ms);
        self.execute_with_request(&request, &deadline).await
    }

    /// Execute with explicit request parameters and deadline
    ///
    /// On deadline expiry the stages already completed are kept: retrieval
    /// falls back to the keyword signal and reranking to the rule-based tier.
    pub async fn execute_with_request(
        &self,
        request: &RetrievalRequest,
        deadline: &Deadline,
    ) -> Result<RAGResult> {
        if !self.config.enabled {
            // RAG disabled - return empty result
            return Ok(RAGResult::empty(&request.query));
        }

        let started = Instant::now();

        // Step 1: Retrieve candidates
        let candidates = self.retrieve(request, deadline).await?;
        let documents_retrieved = candidates.len();
        self.check_deadline(deadline, "retrieval");

        // Step 2: Re-rank candidates
        let ranked = match self
            .reranker
            .rerank_top_k(&request.query, candidates.clone(), self.config.rerank.top_k, deadline)
            .await
        {
            Ok(ranked) => ranked,
            Err(e) => {
                warn!(error = %e, "reranking failed, keeping fused order");
                let mut kept = candidates;
                kept.truncate(self.config.rerank.top_k);
                kept
            }
        };
        let documents_reranked = ranked.len();
        self.check_deadline(deadline, "rerank");

        // Step 3: Assemble context against the current corpus snapshot
        let snapshot = self.keyword.snapshot();
        let context = self.context_builder.assemble(&ranked, snapshot.chunks());

        // Step 4: Augment prompt with context
        let augmented_prompt = self.context_builder.augment_prompt(&request.query, &context);

        info!(
            documents_retrieved,
            documents_reranked,
            context_tokens = context.token_count,
            duration_ms = started.elapsed().as_millis() as u64,
            "rag pipeline completed"
        );

        Ok(RAGResult {
            query: request.query.clone(),
            augmented_prompt,
            context,
            documents_retrieved,
            documents_reranked,
        })
    }

    /// First-stage retrieval in the configured mode
    pub async fn retrieve(&self, request: &RetrievalRequest, deadline: &Deadline) -> Result<RankedResult> {
        match self.config.retrieval.mode {
            RetrievalMode::Hybrid => {
                self.hybrid
                    .retrieve_weighted(request, self.config.retrieval.hybrid_vector_weight, deadline)
                    .await
            }
            RetrievalMode::Keyword => Ok(self.retrieve_keyword(request)),
            RetrievalMode::Vector => {
                let Some(vector) = &self.vector else {
                    self.degraded("vector", "no vector retriever configured");
                    return Ok(self.retrieve_keyword(request));
                };

                let started = Instant::now();
                match vector.retrieve_request(request, deadline).await {
                    Ok(hits) => {
                        self.completed("vector", hits.len(), started);
                        Ok(hits)
                    }
                    Err(e) if e.is_corpus_level() => Err(e),
                    Err(e) => {
                        self.degraded("vector", &e.to_string());
                        Ok(self.retrieve_keyword(request))
                    }
                }
            }
        }
    }

    fn retrieve_keyword(&self, request: &RetrievalRequest) -> RankedResult {
        let started = Instant::now();
        let hits = self.keyword.retrieve_request(request);
        self.completed("keyword", hits.len(), started);
        hits
    }

    /// Run the pipeline and generate an answer from the augmented prompt
    pub async fn answer(&self, generator: &dyn Generator, query: &str) -> Result<String> {
        let result = self.execute(query).await?;
        generator.generate(&result.augmented_prompt).await
    }

    /// Execute and return only the augmented prompt
    pub async fn augment(&self, query: &str) -> Result<String> {
        let result = self.execute(query).await?;
        Ok(result.augmented_prompt)
    }

    fn completed(&self, retriever: &str, hits: usize, started: Instant) {
        self.telemetry.record(PipelineEvent::RetrievalCompleted {
            retriever: retriever.to_string(),
            hits,
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Instant::now(),
        });
    }

    fn degraded(&self, retriever: &str, reason: &str) {
        warn!(retriever, reason, "falling back to keyword retrieval");
        self.telemetry.record(PipelineEvent::RetrieverDegraded {
            retriever: retriever.to_string(),
            reason: reason.to_string(),
            timestamp: Instant::now(),
        });
    }

    fn check_deadline(&self, deadline: &Deadline, stage: &str) {
        if deadline.is_expired() {
            warn!(stage, "request deadline expired, continuing with completed stages");
            self.telemetry.record(PipelineEvent::DeadlineExpired {
                stage: stage.to_string(),
                timestamp: Instant::now(),
            });
        }
    }

    /// Shared telemetry collector for this pipeline
    pub fn telemetry(&self) -> TelemetryCollector {
        self.telemetry.clone()
    }

    /// Check if RAG is enabled
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Enable or disable RAG pipeline
    pub fn set_enabled(&mut self, enabled: bool) {
        self.config.enabled = enabled;
    }

    /// Get current configuration
    pub fn config(&self) -> &RAGConfig {
        &self.config
    }

    /// Number of chunks in the current keyword index
    pub fn indexed_chunks(&self) -> usize {
        self.keyword.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InMemoryChunkStore;

    fn store() -> Arc<InMemoryChunkStore> {
        Arc::new(InMemoryChunkStore::new(vec![
            Chunk::in_source("1", "python is great", "doc", 0),
            Chunk::in_source("2", "python has snakes", "doc", 1),
            Chunk::in_source("3", "rust has ownership", "book", 0),
        ]))
    }

    #[test]
    fn test_rag_config_default() {
        let config = RAGConfig::default();
        assert!(config.enabled);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.rerank.top_k, 5);
        assert_eq!(config.context.max_context_tokens, 4000);
    }

    #[tokio::test]
    async fn test_index_corpus_counts_chunks() {
        let pipeline = RAGPipeline::new(store());
        assert_eq!(pipeline.index_corpus().await.unwrap(), 3);
        assert_eq!(pipeline.indexed_chunks(), 3);
    }

    #[tokio::test]
    async fn test_disabled_pipeline_returns_bare_query() {
        let mut pipeline = RAGPipeline::new(store());
        pipeline.index_corpus().await.unwrap();
        pipeline.set_enabled(false);

        let result = pipeline.execute("python").await.unwrap();
        assert_eq!(result.augmented_prompt, "python");
        assert!(result.context.is_empty());
        assert!(!result.budget_exhausted());
    }

    #[tokio::test]
    async fn test_hybrid_without_vector_uses_keyword() {
        let pipeline = RAGPipeline::new(store());
        pipeline.index_corpus().await.unwrap();

        let result = pipeline.execute("snakes").await.unwrap();
        assert_eq!(result.documents_retrieved, 1);
        assert!(result.context.included_chunk_ids.contains(&"2".to_string()));
        assert!(result.augmented_prompt.contains("python has snakes"));
    }

    #[tokio::test]
    async fn test_vector_mode_without_retriever_degrades() {
        let config = RAGConfig {
            retrieval: RetrievalConfig {
                mode: RetrievalMode::Vector,
                ..RetrievalConfig::default()
            },
            ..RAGConfig::default()
        };
        let pipeline = RAGPipeline::with_config(store(), config);
        pipeline.index_corpus().await.unwrap();

        let result = pipeline.execute("ownership").await.unwrap();
        assert_eq!(result.documents_retrieved, 1);
        assert_eq!(pipeline.telemetry().get_stats().degraded_retrievals, 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted_flag() {
        let config = RAGConfig {
            context: ContextConfig {
                max_context_tokens: 0,
                ..ContextConfig::default()
            },
            ..RAGConfig::default()
        };
        let pipeline = RAGPipeline::with_config(store(), config);
        pipeline.index_corpus().await.unwrap();

        let result = pipeline.execute("python").await.unwrap();
        assert!(result.context.is_empty());
        assert!(result.budget_exhausted());
        assert_eq!(result.augmented_prompt, "python");
    }

    #[tokio::test]
    async fn test_no_match_is_not_budget_exhaustion() {
        let pipeline = RAGPipeline::new(store());
        pipeline.index_corpus().await.unwrap();

        let result = pipeline.execute("haskell").await.unwrap();
        assert!(result.context.is_empty());
        assert!(!result.budget_exhausted());
    }
}
