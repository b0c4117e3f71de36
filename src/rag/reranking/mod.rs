// Reranking stage: three scoring tiers tried in a fixed order
//
// - Remote: external relevance model over HTTP, retried with fixed backoff
// - Local: in-process cross-encoder, when one is loaded
// - Rule-based: deterministic boosts and penalties, never fails
pub mod chain;
pub mod cross_encoder;
pub mod remote;
pub mod scorer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use chain::ReRanker;
pub use cross_encoder::CrossEncoder;
pub use remote::RemoteTier;
pub use scorer::{ReRankConfig, RuleBasedScorer};

/// Reranker tier, in fallback order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankTier {
    Remote,
    LocalCrossEncoder,
    RuleBased,
}

impl RerankTier {
    /// Tiers in the order they are attempted
    pub const ORDER: [RerankTier; 3] = [
        RerankTier::Remote,
        RerankTier::LocalCrossEncoder,
        RerankTier::RuleBased,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RerankTier::Remote => "remote",
            RerankTier::LocalCrossEncoder => "local_cross_encoder",
            RerankTier::RuleBased => "rule_based",
        }
    }
}

impl std::fmt::Display for RerankTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a tier did not produce scores
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TierError {
    /// Tier not configured or model not loaded
    #[error("tier not configured")]
    Unavailable,

    #[error("tier failed: {0}")]
    Failed(String),

    #[error("tier timed out")]
    Timeout,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Model broke the one-score-per-text contract
    #[error("expected {expected} scores, got {got}")]
    ArityMismatch { expected: usize, got: usize },
}

/// Scores produced by one tier, aligned with the input candidates
pub type TierScores = std::result::Result<Vec<f64>, TierError>;

impl TierError {
    /// Whether falling through to the next tier should be logged as a failure
    pub fn is_failure(&self) -> bool {
        !matches!(self, TierError::Unavailable)
    }
}
