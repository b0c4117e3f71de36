// Hybrid fusion retriever
//
// Runs BM25 and vector retrieval side by side with over-fetch, min-max
// normalizes each list on its own, and merges by chunk id with a weighted
// sum. A chunk seen by only one retriever gets only that retriever's term.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::capabilities::Deadline;
use crate::errors::Result;
use crate::rag::retrieval::keyword::KeywordRetriever;
use crate::rag::retrieval::vector::VectorRetriever;
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::{RankedResult, RetrievalRequest, ScoredCandidate};

/// Min-max normalize scores into `[0, 1]`
///
/// A list with zero variance (every score equal, or a single score) maps to
/// all `1.0`. Empty input gives empty output.
pub fn normalize(scores: &[f64]) -> Vec<f64> {
    let Some(first) = scores.first() else {
        return Vec::new();
    };

    let (min, max) = scores
        .iter()
        .fold((*first, *first), |(lo, hi), s| (lo.min(*s), hi.max(*s)));
    // Halved so finite extremes like [-1e308, 1e308] cannot overflow
    let half_range = max / 2.0 - min / 2.0;

    if half_range == 0.0 || !half_range.is_finite() {
        return vec![1.0; scores.len()];
    }

    scores
        .iter()
        .map(|s| ((s / 2.0 - min / 2.0) / half_range).clamp(0.0, 1.0))
        .collect()
}

/// Weighted fusion of a vector list and a keyword list
///
/// `vector_weight` is clamped to `[0, 1]`. Candidates are merged by chunk id;
/// when an id repeats within one list only its first occurrence counts.
/// Ties keep vector-list order first, then keyword-only hits in keyword order.
pub fn fuse(
    vector: &RankedResult,
    keyword: &RankedResult,
    vector_weight: f64,
    top_k: usize,
) -> RankedResult {
    let weight = if vector_weight.is_nan() {
        0.0
    } else {
        vector_weight.clamp(0.0, 1.0)
    };

    let mut order: Vec<ScoredCandidate> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    let mut add = |list: &RankedResult, list_weight: f64| {
        let normalized = normalize(&list.scores());
        let mut seen = std::collections::HashSet::new();

        for (candidate, norm) in list.iter().zip(normalized) {
            if !seen.insert(candidate.id()) {
                continue;
            }
            let term = list_weight * norm;
            match positions.get(candidate.id()) {
                Some(&pos) => order[pos].score += term,
                None => {
                    positions.insert(candidate.id().to_string(), order.len());
                    order.push(ScoredCandidate::new(candidate.chunk.clone(), term));
                }
            }
        }
    };

    add(vector, weight);
    add(keyword, 1.0 - weight);

    for candidate in &mut order {
        candidate.score = candidate.score.clamp(0.0, 1.0);
    }

    RankedResult::top_k(order, top_k)
}

/// Fusion retriever over a keyword and an optional vector retriever
pub struct HybridRetriever {
    keyword: Arc<KeywordRetriever>,
    vector: Option<Arc<VectorRetriever>>,
    vector_weight: f64,
    over_fetch_factor: usize,
    telemetry: Option<TelemetryCollector>,
}

impl HybridRetriever {
    /// Create with the default over-fetch factor of 2
    pub fn new(
        keyword: Arc<KeywordRetriever>,
        vector: Option<Arc<VectorRetriever>>,
        vector_weight: f64,
    ) -> Self {
        Self {
            keyword,
            vector,
            vector_weight: vector_weight.clamp(0.0, 1.0),
            over_fetch_factor: 2,
            telemetry: None,
        }
    }

    pub fn with_over_fetch(mut self, factor: usize) -> Self {
        self.over_fetch_factor = factor.max(1);
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn vector_weight(&self) -> f64 {
        self.vector_weight
    }

    /// Fused retrieval with the configured weight
    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<RankedResult> {
        let request = RetrievalRequest::new(query, top_k)?;
        self.retrieve_weighted(&request, self.vector_weight, &Deadline::none())
            .await
    }

    /// Fused retrieval with an explicit `vector_weight`
    ///
    /// If the vector retriever fails or times out, fusion runs on the keyword
    /// list alone with its weight renormalized to 1.0; the failure is logged
    /// and recorded, never returned. Only corpus-level errors propagate.
    pub async fn retrieve_weighted(
        &self,
        request: &RetrievalRequest,
        vector_weight: f64,
        deadline: &Deadline,
    ) -> Result<RankedResult> {
        let started = Instant::now();
        let fetch = request.with_top_k(request.top_k.saturating_mul(self.over_fetch_factor));

        let keyword_task = {
            let keyword = self.keyword.clone();
            let fetch = fetch.clone();
            tokio::task::spawn_blocking(move || keyword.retrieve_request(&fetch))
        };

        let vector_task = async {
            match &self.vector {
                Some(vector) => Some(vector.retrieve_request(&fetch, deadline).await),
                None => None,
            }
        };

        let (keyword_outcome, vector_outcome) = tokio::join!(keyword_task, vector_task);

        let keyword_hits = match keyword_outcome {
            Ok(hits) => Some(hits),
            Err(e) => {
                self.degraded("keyword", &e.to_string());
                None
            }
        };

        let vector_hits = match vector_outcome {
            Some(Ok(hits)) => Some(hits),
            Some(Err(e)) if e.is_corpus_level() => return Err(e),
            Some(Err(e)) => {
                self.degraded("vector", &e.to_string());
                None
            }
            None => None,
        };

        let fused = match (vector_hits, keyword_hits) {
            (Some(vector), Some(keyword)) => fuse(&vector, &keyword, vector_weight, request.top_k),
            (None, Some(keyword)) => fuse(&RankedResult::empty(), &keyword, 0.0, request.top_k),
            (Some(vector), None) => fuse(&vector, &RankedResult::empty(), 1.0, request.top_k),
            (None, None) => RankedResult::empty(),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(hits = fused.len(), duration_ms, "hybrid retrieval completed");
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(PipelineEvent::RetrievalCompleted {
                retriever: "hybrid".to_string(),
                hits: fused.len(),
                duration_ms,
                timestamp: Instant::now(),
            });
        }

        Ok(fused)
    }

    fn degraded(&self, retriever: &str, reason: &str) {
        warn!(retriever, reason, "retriever failed, fusing surviving signal only");
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(PipelineEvent::RetrieverDegraded {
                retriever: retriever.to_string(),
                reason: reason.to_string(),
                timestamp: Instant::now(),
            });
        }
    }
}
