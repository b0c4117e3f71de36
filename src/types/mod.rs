//! Type definitions module
//! 
//! Chunks, scored candidates and the request/result shapes that flow
//! between retrieval, reranking and context assembly.

pub mod chunk;
pub mod ranked;

// Re-export commonly used types
pub use chunk::{Chunk, MetadataFilter, CHUNK_INDEX_KEY, PRIORITY_KEY, SOURCE_KEY};
pub use ranked::{RankedResult, RetrievalMode, RetrievalRequest, ScoredCandidate};
