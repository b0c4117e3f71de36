//! End-to-end tests for the retrieval pipeline
//!
//! Everything runs against in-memory providers; no Ollama, Qdrant or model
//! downloads are needed.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ragpipe::capabilities::{ChunkStore, Embedder, Generator, RelevanceModel};
use ragpipe::context::TokenCounter;
use ragpipe::providers::{InMemoryChunkStore, InMemoryVectorIndex};
use ragpipe::rag::reranking::RerankTier;
use ragpipe::rag::{ContextBuilder, ContextConfig, ContextFormat, ReRankConfig, RetrievalConfig};
use ragpipe::types::ScoredCandidate;
use ragpipe::{
    Chunk, Deadline, MetadataFilter, RAGPipeline, RagConfig, RagError, RankedResult, RetrievalMode,
    RetrievalRequest, Result,
};
use ragpipe::rag::pipeline::RAGConfig;
use ragpipe::telemetry::PipelineEvent;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn corpus() -> Vec<Chunk> {
    vec![
        Chunk::in_source("1", "python is great", "doc", 0),
        Chunk::in_source("2", "python has snakes", "doc", 1),
        Chunk::new("3", "serpents and other reptiles").with_metadata("lang", "en"),
    ]
}

fn keyword_config() -> RAGConfig {
    RAGConfig {
        retrieval: RetrievalConfig {
            mode: RetrievalMode::Keyword,
            ..RetrievalConfig::default()
        },
        ..RAGConfig::default()
    }
}

fn vector_config() -> RAGConfig {
    RAGConfig {
        retrieval: RetrievalConfig {
            mode: RetrievalMode::Vector,
            ..RetrievalConfig::default()
        },
        ..RAGConfig::default()
    }
}

fn completed_retrievers(pipeline: &RAGPipeline) -> Vec<String> {
    pipeline
        .telemetry()
        .recent_events(64)
        .into_iter()
        .filter_map(|event| match event {
            PipelineEvent::RetrievalCompleted { retriever, .. } => Some(retriever),
            _ => None,
        })
        .collect()
}

/// Maps every query to the same direction
struct StaticEmbedder;

#[async_trait]
impl Embedder for StaticEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Ok(vec![1.0, 0.0])
    }
}

struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(RagError::EmbeddingUnavailable("connection refused".to_string()))
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

struct HangingReranker {
    calls: AtomicU32,
}

#[async_trait]
impl RelevanceModel for HangingReranker {
    async fn score_relevance(&self, _query: &str, _texts: &[String]) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(Vec::new())
    }
}

struct BrokenStore;

#[async_trait]
impl ChunkStore for BrokenStore {
    async fn get_chunk(&self, _id: &str) -> Result<Option<Arc<Chunk>>> {
        Err(RagError::ChunkStoreUnavailable("disk offline".to_string()))
    }

    async fn list_chunks(&self, _filter: Option<&MetadataFilter>) -> Result<Vec<Arc<Chunk>>> {
        Err(RagError::ChunkStoreUnavailable("disk offline".to_string()))
    }
}

struct EchoGenerator;

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        Ok(format!("echo: {}", prompt))
    }
}

fn vector_index() -> Arc<InMemoryVectorIndex> {
    let index = InMemoryVectorIndex::new();
    index.upsert("3", vec![1.0, 0.0]);
    index.upsert("2", vec![0.6, 0.8]);
    index.upsert("1", vec![0.0, 1.0]);
    Arc::new(index)
}

// ---------------------------------------------------------------------------
// Retrieval
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_keyword_only_returns_both_python_chunks() {
    let pipeline = RAGPipeline::with_config(
        Arc::new(InMemoryChunkStore::new(corpus())),
        keyword_config(),
    );
    pipeline.index_corpus().await.unwrap();

    let request = RetrievalRequest::new("python", 2).unwrap();
    let hits = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();

    assert_eq!(hits.ids(), vec!["1", "2"]);
    let scores = hits.scores();
    assert!(scores[0] >= scores[1]);
}

#[tokio::test]
async fn test_keyword_retrieval_is_deterministic() {
    let pipeline = RAGPipeline::with_config(
        Arc::new(InMemoryChunkStore::new(corpus())),
        keyword_config(),
    );
    pipeline.index_corpus().await.unwrap();

    let request = RetrievalRequest::new("python snakes", 10).unwrap();
    let first = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();
    let second = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_hybrid_surfaces_semantic_match() {
    let pipeline = RAGPipeline::new(Arc::new(InMemoryChunkStore::new(corpus())))
        .with_vector(Arc::new(StaticEmbedder), vector_index());
    pipeline.index_corpus().await.unwrap();

    let result = pipeline.execute("snakes").await.unwrap();

    // Only chunk 2 mentions snakes; chunk 3 comes from the vector signal
    assert_eq!(result.documents_retrieved, 3);
    assert!(result.context.included_chunk_ids.contains(&"3".to_string()));
    assert!(result.augmented_prompt.contains("serpents"));
    assert_eq!(pipeline.telemetry().get_stats().degraded_retrievals, 0);
}

#[tokio::test]
async fn test_hybrid_degrades_to_keyword_when_embedding_down() {
    let pipeline = RAGPipeline::new(Arc::new(InMemoryChunkStore::new(corpus())))
        .with_vector(Arc::new(DownEmbedder), vector_index());
    pipeline.index_corpus().await.unwrap();

    let result = pipeline.execute("snakes").await.unwrap();

    assert!(!result.context.is_empty());
    assert!(result.context.included_chunk_ids.contains(&"2".to_string()));
    assert_eq!(pipeline.telemetry().get_stats().degraded_retrievals, 1);
}

#[tokio::test]
async fn test_filters_restrict_candidates() {
    let pipeline = RAGPipeline::with_config(
        Arc::new(InMemoryChunkStore::new(corpus())),
        keyword_config(),
    );
    pipeline.index_corpus().await.unwrap();

    let request = RetrievalRequest::new("python serpents", 10)
        .unwrap()
        .with_filters(MetadataFilter::new().with("lang", "en"));
    let hits = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();

    assert_eq!(hits.ids(), vec!["3"]);
}

#[tokio::test]
async fn test_reindex_swaps_snapshot() {
    let store = Arc::new(InMemoryChunkStore::new(corpus()));
    let pipeline = RAGPipeline::with_config(store.clone(), keyword_config());
    pipeline.index_corpus().await.unwrap();

    let request = RetrievalRequest::new("lizards", 5).unwrap();
    assert!(pipeline.retrieve(&request, &Deadline::none()).await.unwrap().is_empty());

    store.upsert(Chunk::new("4", "lizards bask in the sun"));
    assert_eq!(pipeline.index_corpus().await.unwrap(), 4);

    let hits = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();
    assert_eq!(hits.ids(), vec!["4"]);
    assert_eq!(pipeline.telemetry().get_stats().index_rebuilds, 2);
}

#[tokio::test]
async fn test_vector_mode_returns_nearest_chunks() {
    let store = Arc::new(InMemoryChunkStore::new(corpus()));
    let pipeline = RAGPipeline::with_config(store, vector_config())
        .with_vector(Arc::new(StaticEmbedder), vector_index());
    pipeline.index_corpus().await.unwrap();

    // No keyword overlap, so only the vector signal can find these
    let request = RetrievalRequest::new("reptiles nearby", 2).unwrap();
    let hits = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();

    assert_eq!(hits.ids(), vec!["3", "2"]);
    assert_eq!(completed_retrievers(&pipeline), vec!["vector"]);
    assert_eq!(pipeline.telemetry().get_stats().degraded_retrievals, 0);
}

#[tokio::test]
async fn test_vector_mode_degrades_to_keyword_when_embedding_down() {
    let store = Arc::new(InMemoryChunkStore::new(corpus()));
    let pipeline = RAGPipeline::with_config(store, vector_config())
        .with_vector(Arc::new(DownEmbedder), vector_index());
    pipeline.index_corpus().await.unwrap();

    let request = RetrievalRequest::new("great", 2).unwrap();
    let hits = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();

    assert_eq!(hits.ids(), vec!["1"]);
    assert_eq!(completed_retrievers(&pipeline), vec!["keyword"]);
    assert_eq!(pipeline.telemetry().get_stats().degraded_retrievals, 1);
}

#[tokio::test(start_paused = true)]
async fn test_vector_mode_degrades_on_embedding_timeout() {
    let config = RAGConfig {
        retrieval: RetrievalConfig {
            vector_timeout_ms: 100,
            ..vector_config().retrieval
        },
        ..vector_config()
    };
    let pipeline = RAGPipeline::with_config(Arc::new(InMemoryChunkStore::new(corpus())), config)
        .with_vector(Arc::new(SlowEmbedder), vector_index());
    pipeline.index_corpus().await.unwrap();

    let request = RetrievalRequest::new("snakes", 3).unwrap();
    let hits = pipeline.retrieve(&request, &Deadline::none()).await.unwrap();

    assert_eq!(hits.ids(), vec!["2"]);
    assert_eq!(pipeline.telemetry().get_stats().degraded_retrievals, 1);
}

#[tokio::test]
async fn test_rules_keep_phrase_boost_on_negative_similarity() {
    let filler = "x".repeat(60);
    let store = InMemoryChunkStore::new(vec![
        Chunk::new("nomatch", format!("ownership and lifetimes {}", filler)),
        Chunk::new("match", format!("the borrow checker rejects this {}", filler)),
    ]);
    // Both sit at cosine -0.447 from the query direction
    let index = InMemoryVectorIndex::new();
    index.upsert("nomatch", vec![-1.0, 2.0]);
    index.upsert("match", vec![-1.0, 2.0]);

    let pipeline = RAGPipeline::with_config(Arc::new(store), vector_config())
        .with_vector(Arc::new(StaticEmbedder), Arc::new(index));
    pipeline.index_corpus().await.unwrap();

    let result = pipeline.execute("borrow checker").await.unwrap();

    assert_eq!(result.context.included_chunk_ids[0], "match");
    assert_eq!(
        pipeline.telemetry().last_rerank_tier(),
        Some(RerankTier::RuleBased)
    );
}

// ---------------------------------------------------------------------------
// Failures and deadlines
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unreachable_store_is_a_hard_failure() {
    let pipeline = RAGPipeline::new(Arc::new(BrokenStore));
    let err = pipeline.index_corpus().await.unwrap_err();
    assert!(err.is_corpus_level());
}

#[tokio::test]
async fn test_vector_mode_store_failure_propagates() {
    let config = RAGConfig {
        retrieval: RetrievalConfig {
            mode: RetrievalMode::Vector,
            ..RetrievalConfig::default()
        },
        ..RAGConfig::default()
    };
    let pipeline = RAGPipeline::with_config(Arc::new(BrokenStore), config)
        .with_vector(Arc::new(StaticEmbedder), vector_index());

    let err = pipeline.execute("snakes").await.unwrap_err();
    assert!(matches!(err, RagError::ChunkStoreUnavailable(_)));
}

#[tokio::test]
async fn test_deadline_keeps_completed_stages() {
    let pipeline = RAGPipeline::new(Arc::new(InMemoryChunkStore::new(corpus())))
        .with_vector(Arc::new(SlowEmbedder), vector_index());
    pipeline.index_corpus().await.unwrap();

    let request = RetrievalRequest::new("snakes", 10).unwrap();
    let deadline = Deadline::after(Duration::from_millis(50));
    let result = pipeline.execute_with_request(&request, &deadline).await.unwrap();

    assert!(result.context.included_chunk_ids.contains(&"2".to_string()));

    let stats = pipeline.telemetry().get_stats();
    assert_eq!(stats.degraded_retrievals, 1);
    assert!(stats.deadline_expirations >= 1);
    assert_eq!(stats.last_rerank_tier, Some(RerankTier::RuleBased));
}

// ---------------------------------------------------------------------------
// Reranking
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_remote_timeouts_fall_back_to_rules() {
    let hanging = Arc::new(HangingReranker {
        calls: AtomicU32::new(0),
    });
    let config = RAGConfig {
        rerank: ReRankConfig {
            remote_timeout_ms: 100,
            retry_backoff_ms: 10,
            ..ReRankConfig::default()
        },
        ..keyword_config()
    };
    let pipeline = RAGPipeline::with_config(Arc::new(InMemoryChunkStore::new(corpus())), config)
        .with_remote_reranker(hanging.clone());
    pipeline.index_corpus().await.unwrap();

    let result = pipeline.execute("python").await.unwrap();

    assert_eq!(result.documents_reranked, 2);
    assert!(!result.context.is_empty());
    assert_eq!(hanging.calls.load(Ordering::SeqCst), 3);

    let stats = pipeline.telemetry().get_stats();
    assert_eq!(stats.last_rerank_tier, Some(RerankTier::RuleBased));
    assert_eq!(stats.rerank_tier_failures, 1);
    assert_eq!(stats.retry_attempts, 2);
}

#[tokio::test]
async fn test_rerank_top_k_limits_context() {
    let config = RAGConfig {
        rerank: ReRankConfig {
            top_k: 1,
            ..ReRankConfig::default()
        },
        context: ContextConfig {
            enable_context_expansion: false,
            ..ContextConfig::default()
        },
        ..keyword_config()
    };
    let pipeline = RAGPipeline::with_config(Arc::new(InMemoryChunkStore::new(corpus())), config);
    pipeline.index_corpus().await.unwrap();

    let result = pipeline.execute("python").await.unwrap();
    assert_eq!(result.documents_retrieved, 2);
    assert_eq!(result.documents_reranked, 1);
    assert_eq!(result.context.chunk_count(), 1);
}

// ---------------------------------------------------------------------------
// Context assembly
// ---------------------------------------------------------------------------

#[test]
fn test_tight_budget_truncates_first_candidate() {
    let builder = ContextBuilder::with_config(ContextConfig {
        format: ContextFormat::Plain,
        ..ContextConfig::default()
    })
    .with_counter(TokenCounter::heuristic());

    let long = Arc::new(Chunk::new("long", "word ".repeat(100)));
    let other = Arc::new(Chunk::new("other", "never reached"));
    let ranked = RankedResult::from_unsorted(vec![
        ScoredCandidate::new(long, 0.9),
        ScoredCandidate::new(other, 0.5),
    ]);

    let context = builder.build(&ranked, &[], 20, true);

    assert!(context.text.ends_with("..."));
    assert_eq!(context.included_chunk_ids, vec!["long".to_string()]);
    assert!(context.token_count <= 20);
    assert!(context.truncated);
}

#[tokio::test]
async fn test_neighbor_expansion_wraps_candidate() {
    let chunks = vec![
        Chunk::in_source("a0", "intro to ownership", "book", 0),
        Chunk::in_source("a1", "borrowing rules apply", "book", 1),
        Chunk::in_source("a2", "lifetimes follow", "book", 2),
        Chunk::in_source("b0", "unrelated cooking notes", "recipes", 1),
    ];
    let pipeline = RAGPipeline::with_config(Arc::new(InMemoryChunkStore::new(chunks)), keyword_config());
    pipeline.index_corpus().await.unwrap();

    let result = pipeline.execute("borrowing").await.unwrap();
    assert_eq!(
        result.context.included_chunk_ids,
        vec!["a0".to_string(), "a1".to_string(), "a2".to_string()]
    );
}

#[tokio::test]
async fn test_answer_uses_augmented_prompt() {
    let pipeline = RAGPipeline::with_config(
        Arc::new(InMemoryChunkStore::new(corpus())),
        keyword_config(),
    );
    pipeline.index_corpus().await.unwrap();

    let answer = pipeline.answer(&EchoGenerator, "snakes").await.unwrap();
    assert!(answer.starts_with("echo: "));
    assert!(answer.contains("python has snakes"));
    assert!(answer.contains("Question: snakes"));
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_pipeline_from_config_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[retrieval]\nmode = \"keyword\"\ntop_k = 4\n\n[rerank]\ntop_k = 2\n\n[pipeline]\nlog_level = \"debug\"\ndeadline_ms = 5000\n",
    )
    .unwrap();

    let config = RagConfig::load(Some(path)).unwrap();
    config.init_logging();

    let pipeline = RAGPipeline::from_config(&config, Arc::new(InMemoryChunkStore::new(corpus())), None)
        .await
        .unwrap();
    assert_eq!(pipeline.config().retrieval.top_k, 4);
    assert_eq!(pipeline.config().deadline_ms, Some(5000));

    pipeline.index_corpus().await.unwrap();
    let result = pipeline.execute("python").await.unwrap();
    assert_eq!(result.documents_reranked, 2);
}

#[tokio::test]
async fn test_invalid_config_rejected_by_pipeline() {
    let mut config = RagConfig::default();
    config.retrieval.hybrid_vector_weight = -0.5;

    let err = RAGPipeline::from_config(&config, Arc::new(InMemoryChunkStore::new(corpus())), None)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, RagError::ConfigError(_)));
}
