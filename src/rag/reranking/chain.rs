// Reranker tier chain
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::capabilities::{Deadline, LocalRelevanceModel, RelevanceModel};
use crate::errors::{RagError, Result};
use crate::rag::reranking::{
    ReRankConfig, RemoteTier, RerankTier, RuleBasedScorer, TierError, TierScores,
};
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::{RankedResult, ScoredCandidate};

/// Re-ranker with remote, local and rule-based tiers
///
/// Each tier fully replaces the incoming scores. The first tier that returns
/// one finite score per candidate wins; the rule-based tier always does.
pub struct ReRanker {
    config: ReRankConfig,
    remote: Option<RemoteTier>,
    local: Option<Arc<dyn LocalRelevanceModel>>,
    scorer: RuleBasedScorer,
    telemetry: Option<TelemetryCollector>,
}

impl ReRanker {
    /// Create re-ranker with only the rule-based tier
    pub fn new() -> Self {
        Self::with_config(ReRankConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: ReRankConfig) -> Self {
        Self {
            scorer: RuleBasedScorer::from_config(&config),
            config,
            remote: None,
            local: None,
            telemetry: None,
        }
    }

    /// Attach the remote relevance model tier
    pub fn with_remote(mut self, model: Arc<dyn RelevanceModel>) -> Self {
        let mut tier = RemoteTier::new(model, &self.config);
        if let Some(telemetry) = &self.telemetry {
            tier = tier.with_telemetry(telemetry.clone());
        }
        self.remote = Some(tier);
        self
    }

    /// Attach a loaded local cross-encoder
    pub fn with_local(mut self, model: Arc<dyn LocalRelevanceModel>) -> Self {
        self.local = Some(model);
        self
    }

    /// Report tier outcomes (and remote retries) to `telemetry`
    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.remote = self
            .remote
            .take()
            .map(|tier| tier.with_telemetry(telemetry.clone()));
        self.telemetry = Some(telemetry);
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn has_local(&self) -> bool {
        self.local.is_some()
    }

    /// Re-rank with the configured `top_k` and no deadline
    pub async fn rerank(&self, query: &str, candidates: RankedResult) -> Result<RankedResult> {
        self.rerank_top_k(query, candidates, self.config.top_k, &Deadline::none())
            .await
    }

    /// Re-rank `candidates` and keep the best `top_k`
    ///
    /// Output is sorted descending by the serving tier's scores, ties kept in
    /// input order. The serving tier is reported through telemetry only.
    pub async fn rerank_top_k(
        &self,
        query: &str,
        candidates: RankedResult,
        top_k: usize,
        deadline: &Deadline,
    ) -> Result<RankedResult> {
        if candidates.is_empty() {
            return Ok(RankedResult::empty());
        }

        if !self.config.enabled {
            let mut kept = candidates;
            kept.truncate(top_k);
            return Ok(kept);
        }

        let candidates = candidates.into_vec();
        let texts: Vec<String> = candidates.iter().map(|c| c.chunk.text.clone()).collect();

        for tier in RerankTier::ORDER {
            let outcome = match tier {
                RerankTier::Remote => self.score_remote(query, &texts, deadline).await,
                RerankTier::LocalCrossEncoder => self.score_local(query, &texts, deadline).await,
                RerankTier::RuleBased => Ok(self.scorer.score_all(query, &candidates)),
            };

            match outcome.and_then(|scores| validate(scores, candidates.len())) {
                Ok(scores) => {
                    self.served(tier, candidates.len());
                    let rescored = candidates
                        .into_iter()
                        .zip(scores)
                        .map(|(c, score)| ScoredCandidate::new(c.chunk, score))
                        .collect();
                    return Ok(RankedResult::top_k(rescored, top_k));
                }
                Err(TierError::Unavailable) => {
                    debug!(tier = %tier, "rerank tier not configured, skipping");
                }
                Err(e) => self.failed(tier, &e),
            }
        }

        Err(RagError::RerankTierExhausted)
    }

    async fn score_remote(&self, query: &str, texts: &[String], deadline: &Deadline) -> TierScores {
        match &self.remote {
            Some(tier) => tier.score(query, texts, deadline).await,
            None => Err(TierError::Unavailable),
        }
    }

    /// Run the cross-encoder on a blocking thread, bounded by the deadline
    async fn score_local(&self, query: &str, texts: &[String], deadline: &Deadline) -> TierScores {
        let Some(model) = self.local.clone() else {
            return Err(TierError::Unavailable);
        };
        if deadline.is_expired() {
            return Err(TierError::DeadlineExceeded);
        }

        let query = query.to_string();
        let texts = texts.to_vec();
        let handle = tokio::task::spawn_blocking(move || model.score_pairs(&query, &texts));

        let joined = match deadline.remaining() {
            Some(left) => tokio::time::timeout(left, handle)
                .await
                .map_err(|_| TierError::DeadlineExceeded)?,
            None => handle.await,
        };

        joined
            .map_err(|e| TierError::Failed(e.to_string()))?
            .map_err(|e| TierError::Failed(e.to_string()))
    }

    fn served(&self, tier: RerankTier, candidates: usize) {
        info!(tier = %tier, candidates, "rerank served");
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(PipelineEvent::RerankTierServed {
                tier,
                candidates,
                timestamp: Instant::now(),
            });
        }
    }

    fn failed(&self, tier: RerankTier, error: &TierError) {
        warn!(tier = %tier, error = %error, "rerank tier failed, falling through");
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(PipelineEvent::RerankTierFailed {
                tier,
                reason: error.to_string(),
                timestamp: Instant::now(),
            });
        }
    }

    /// Get current configuration
    pub fn config(&self) -> &ReRankConfig {
        &self.config
    }

    /// Update configuration
    ///
    /// An attached remote tier keeps the timeout and retry settings it was
    /// attached with.
    pub fn set_config(&mut self, config: ReRankConfig) {
        self.scorer = RuleBasedScorer::from_config(&config);
        self.config = config;
    }
}

impl Default for ReRanker {
    fn default() -> Self {
        Self::new()
    }
}

/// One finite score per candidate, or the tier is treated as failed
fn validate(scores: Vec<f64>, expected: usize) -> TierScores {
    if scores.len() != expected {
        return Err(TierError::ArityMismatch {
            expected,
            got: scores.len(),
        });
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(TierError::Failed("non-finite relevance score".to_string()));
    }
    Ok(scores)
}
