// Qdrant-backed vector index
//
// Points carry the chunk id in their payload under `chunk_id`; the point id
// itself may be a UUID or integer chosen at ingestion time.
use async_trait::async_trait;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, Condition, Filter, PointId, ScoredPoint,
    SearchPointsBuilder, Value as QdrantValue,
};
use qdrant_client::Qdrant;
use std::collections::HashMap;

use crate::capabilities::VectorIndex;
use crate::errors::{RagError, Result};
use crate::types::MetadataFilter;

/// Payload key mapping a point back to its chunk
pub const CHUNK_ID_KEY: &str = "chunk_id";

/// Vector index over one Qdrant collection
pub struct QdrantVectorIndex {
    client: Qdrant,
    collection: String,
}

impl QdrantVectorIndex {
    /// Connect to `url` (gRPC port, usually 6334)
    pub fn connect(url: &str, collection: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .build()
            .map_err(|e| RagError::ConfigError(format!("Failed to create Qdrant client: {}", e)))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
        })
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn nearest(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<(String, f64)>> {
        let mut search = SearchPointsBuilder::new(&self.collection, vector.to_vec(), k as u64)
            .with_payload(true);
        if let Some(filter) = filter.and_then(to_qdrant_filter) {
            search = search.filter(filter);
        }

        let response = self
            .client
            .search_points(search)
            .await
            .map_err(|e| RagError::RetrieverUnavailable {
                retriever: "vector".to_string(),
                reason: format!("Qdrant search failed: {}", e),
            })?;

        Ok(response
            .result
            .into_iter()
            .map(|point| (chunk_id_of(&point), f64::from(point.score)))
            .collect())
    }
}

/// Equality conditions on payload keywords; `None` for an empty filter
fn to_qdrant_filter(filter: &MetadataFilter) -> Option<Filter> {
    if filter.is_empty() {
        return None;
    }

    let mut pairs: Vec<(&String, &String)> = filter.equals.iter().collect();
    pairs.sort();

    Some(Filter::must(
        pairs
            .into_iter()
            .map(|(key, value)| Condition::matches(key.clone(), value.clone())),
    ))
}

/// Chunk id from the payload, falling back to the point id
fn chunk_id_of(point: &ScoredPoint) -> String {
    point
        .payload
        .get(CHUNK_ID_KEY)
        .and_then(payload_string)
        .unwrap_or_else(|| point_id_to_string(&point.id))
}

fn payload_string(value: &QdrantValue) -> Option<String> {
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        Kind::IntegerValue(i) => Some(i.to_string()),
        _ => None,
    }
}

fn point_id_to_string(point_id: &Option<PointId>) -> String {
    match point_id.as_ref().and_then(|id| id.point_id_options.as_ref()) {
        Some(PointIdOptions::Num(n)) => n.to_string(),
        Some(PointIdOptions::Uuid(u)) => u.clone(),
        None => "unknown".to_string(),
    }
}

/// Payload for a chunk's point: metadata plus the chunk id
pub fn chunk_payload(chunk_id: &str, metadata: &HashMap<String, String>) -> HashMap<String, QdrantValue> {
    let mut payload: HashMap<String, QdrantValue> = metadata
        .iter()
        .map(|(k, v)| (k.clone(), QdrantValue::from(v.clone())))
        .collect();
    payload.insert(CHUNK_ID_KEY.to_string(), QdrantValue::from(chunk_id.to_string()));
    payload
}
