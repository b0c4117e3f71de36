// RAG (Retrieval-Augmented Generation) pipeline
//
// Components:
// - Retrieval: BM25 and vector retrievers, fused by normalized weighted sum
// - Re-ranking: remote model, local cross-encoder, rule-based fallback
// - Context Builder: token-bounded assembly with neighbor expansion
// - Pipeline: end-to-end orchestration

pub mod retrieval;
pub mod reranking;
pub mod context;
pub mod pipeline;

// Re-export key types
pub use retrieval::{HybridRetriever, KeywordRetriever, RetrievalConfig, VectorRetriever};
pub use reranking::{ReRankConfig, ReRanker, RerankTier};
pub use context::{AssembledContext, ContextBuilder, ContextConfig, ContextFormat};
pub use pipeline::{RAGConfig, RAGPipeline, RAGResult};
