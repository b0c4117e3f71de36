// Concrete adapters for the external capabilities
pub mod memory;
pub mod ollama;
pub mod qdrant;
pub mod relevance;

pub use memory::{cosine_similarity, InMemoryChunkStore, InMemoryVectorIndex};
pub use ollama::{OllamaEmbedder, OllamaGenerator};
pub use qdrant::QdrantVectorIndex;
pub use relevance::{parse_rerank_response, HttpRelevanceModel};
