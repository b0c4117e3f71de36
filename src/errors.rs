//! Error types for the retrieval pipeline
//!
//! Failures inside a single retriever or reranker tier are caught at the
//! component boundary and turned into degraded results. Only corpus-level
//! unavailability escapes `RAGPipeline` as a hard failure.

use thiserror::Error;

/// Main error type for the ragpipe crate
#[derive(Error, Debug)]
pub enum RagError {
    /// One retrieval signal is down (recoverable via degradation)
    #[error("Retriever '{retriever}' unavailable: {reason}")]
    RetrieverUnavailable { retriever: String, reason: String },

    /// Embedding capability failed or timed out
    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Chunk store unreachable (corpus-level, never degraded)
    #[error("Chunk store unavailable: {0}")]
    ChunkStoreUnavailable(String),

    /// Every reranker tier failed
    #[error("All rerank tiers exhausted")]
    RerankTierExhausted,

    /// External call exceeded its own timeout
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// Caller-supplied deadline expired
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Model loading or inference errors
    #[error("Model error: {0}")]
    ModelError(String),

    /// Tokenizer errors
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic errors with context
    #[error("Pipeline error: {0}")]
    Generic(String),
}

impl RagError {
    /// Whether this failure makes the whole corpus unreachable
    pub fn is_corpus_level(&self) -> bool {
        matches!(self, RagError::ChunkStoreUnavailable(_))
    }

    /// Whether this failure came from a timeout or an expired deadline
    pub fn is_timeout(&self) -> bool {
        matches!(self, RagError::Timeout { .. } | RagError::DeadlineExceeded)
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, RagError>;

/// Convert anyhow errors to RagError
impl From<anyhow::Error> for RagError {
    fn from(err: anyhow::Error) -> Self {
        RagError::Generic(format!("{:#}", err))
    }
}
