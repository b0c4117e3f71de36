// Remote relevance tier: external model behind bounded retries
use std::sync::Arc;
use std::time::Duration;

use crate::capabilities::{Deadline, RelevanceModel};
use crate::errors::RagError;
use crate::rag::reranking::{ReRankConfig, TierError, TierScores};
use crate::retry::RetryManager;
use crate::telemetry::TelemetryCollector;

/// First reranker tier
pub struct RemoteTier {
    model: Arc<dyn RelevanceModel>,
    timeout: Duration,
    retry: RetryManager,
}

impl RemoteTier {
    pub fn new(model: Arc<dyn RelevanceModel>, config: &ReRankConfig) -> Self {
        Self {
            model,
            timeout: Duration::from_millis(config.remote_timeout_ms),
            retry: RetryManager::with_config(config.max_retries, config.retry_backoff_ms)
                .for_operation("remote rerank"),
        }
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.retry = self.retry.with_telemetry(telemetry);
        self
    }

    /// Upper bound on time spent in this tier without a deadline
    pub fn worst_case(&self) -> Duration {
        self.timeout * self.retry.max_attempts() + self.retry.max_total_wait_time()
    }

    /// Score `texts`; each attempt is bounded by the tier timeout and the deadline
    pub async fn score(&self, query: &str, texts: &[String], deadline: &Deadline) -> TierScores {
        let model = self.model.as_ref();
        let timeout = self.timeout;

        self.retry
            .execute_with_retry(deadline, move || {
                deadline.bound(timeout, model.score_relevance(query, texts))
            })
            .await
            .map_err(|e| match e {
                RagError::DeadlineExceeded => TierError::DeadlineExceeded,
                RagError::Timeout { .. } => TierError::Timeout,
                other => TierError::Failed(other.to_string()),
            })
    }
}
