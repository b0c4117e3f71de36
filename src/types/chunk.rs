//! Chunk records held by the chunk store
//! 
//! A chunk is created once at ingestion time and never mutated by the
//! pipeline. Retrieval stages share chunks through `Arc<Chunk>`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metadata key naming the source document
pub const SOURCE_KEY: &str = "source";

/// Metadata key holding the chunk's position within its source
pub const CHUNK_INDEX_KEY: &str = "chunk_index";

/// Optional per-chunk multiplier used by the rule-based reranker
pub const PRIORITY_KEY: &str = "priority";

/// Immutable unit of indexed text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Chunk {
    /// Create a chunk without metadata
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// Create a chunk positioned within a source document
    pub fn in_source(
        id: impl Into<String>,
        text: impl Into<String>,
        source: impl Into<String>,
        chunk_index: i64,
    ) -> Self {
        Self::new(id, text)
            .with_metadata(SOURCE_KEY, source)
            .with_metadata(CHUNK_INDEX_KEY, chunk_index.to_string())
    }

    /// Builder-style metadata insertion
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get(SOURCE_KEY).map(String::as_str)
    }

    /// Position within the source; `None` when missing or not an integer
    pub fn chunk_index(&self) -> Option<i64> {
        self.metadata
            .get(CHUNK_INDEX_KEY)
            .and_then(|v| v.trim().parse::<i64>().ok())
    }

    /// Priority multiplier; `None` when missing or not a finite number
    pub fn priority(&self) -> Option<f64> {
        self.metadata
            .get(PRIORITY_KEY)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|p| p.is_finite())
    }

    /// Character length (not bytes)
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Equality filter over chunk metadata
///
/// A chunk matches when every key is present with exactly the given value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    #[serde(flatten)]
    pub equals: HashMap<String, String>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.equals.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.matches_map(&chunk.metadata)
    }

    /// Match against a bare metadata map
    pub fn matches_map(&self, metadata: &HashMap<String, String>) -> bool {
        self.equals
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}
