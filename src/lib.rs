//! ragpipe v0.3.0 - Retrieval core for RAG
//!
//! Turns a query into a token-bounded context for an LLM prompt.
//!
//! # Architecture
//!
//! - **Retrieval**: BM25 and vector search, fused by min-max normalized
//!   weighted sum, degrading to whichever signal survives
//! - **Reranking**: remote relevance model, local cross-encoder and a
//!   rule-based scorer tried in that order
//! - **Context**: greedy assembly under a token budget with same-source
//!   neighbor expansion
//!
//! External services (embedding model, vector index, chunk store, LLM) are
//! reached through the traits in [`capabilities`].

pub mod errors;
pub mod types;
pub mod capabilities;
pub mod context;
pub mod config;
pub mod telemetry;
pub mod retry;
pub mod rag;
pub mod providers;

// Re-export commonly used types
pub use errors::{RagError, Result};
pub use config::RagConfig;
pub use capabilities::Deadline;
pub use rag::{AssembledContext, RAGPipeline, RAGResult};
pub use types::{Chunk, MetadataFilter, RankedResult, RetrievalMode, RetrievalRequest};
