//! In-process chunk store and brute-force vector index
//!
//! Useful for tests, small corpora, and as the reference behavior for the
//! networked adapters.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::capabilities::{ChunkStore, VectorIndex};
use crate::errors::Result;
use crate::types::{Chunk, MetadataFilter};

/// Chunk store backed by a vector in insertion order
#[derive(Default)]
pub struct InMemoryChunkStore {
    chunks: RwLock<Vec<Arc<Chunk>>>,
}

impl InMemoryChunkStore {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            chunks: RwLock::new(chunks.into_iter().map(Arc::new).collect()),
        }
    }

    /// Insert or replace a chunk by id
    pub fn upsert(&self, chunk: Chunk) {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let chunk = Arc::new(chunk);
        match chunks.iter_mut().find(|c| c.id == chunk.id) {
            Some(existing) => *existing = chunk,
            None => chunks.push(chunk),
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut chunks = self.chunks.write().unwrap_or_else(PoisonError::into_inner);
        let before = chunks.len();
        chunks.retain(|c| c.id != id);
        chunks.len() != before
    }

    pub fn len(&self) -> usize {
        self.chunks.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ChunkStore for InMemoryChunkStore {
    async fn get_chunk(&self, id: &str) -> Result<Option<Arc<Chunk>>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks.iter().find(|c| c.id == id).cloned())
    }

    async fn list_chunks(&self, filter: Option<&MetadataFilter>) -> Result<Vec<Arc<Chunk>>> {
        let chunks = self.chunks.read().unwrap_or_else(PoisonError::into_inner);
        Ok(chunks
            .iter()
            .filter(|c| filter.map_or(true, |f| f.matches(c)))
            .cloned()
            .collect())
    }
}

struct Entry {
    id: String,
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
}

/// Exhaustive cosine-similarity index
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<Entry>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, id: impl Into<String>, vector: Vec<f32>) {
        self.upsert_with_metadata(id, vector, HashMap::new());
    }

    /// Insert with metadata used by filtered searches
    pub fn upsert_with_metadata(
        &self,
        id: impl Into<String>,
        vector: Vec<f32>,
        metadata: HashMap<String, String>,
    ) {
        let id = id.into();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let entry = Entry { id, vector, metadata };
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f64)>> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);

        let mut scored: Vec<(String, f64)> = entries
            .iter()
            .filter(|e| filter.map_or(true, |f| f.matches_map(&e.metadata)))
            .map(|e| (e.id.clone(), cosine_similarity(vector, &e.vector)))
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Cosine similarity; 0.0 for mismatched or zero-length vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}
