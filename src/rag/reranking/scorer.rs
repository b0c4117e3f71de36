// Rule-based relevance scorer, the last reranker tier
use serde::{Deserialize, Serialize};

use crate::types::ScoredCandidate;

/// Re-ranking configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReRankConfig {
    /// Candidates kept after reranking
    pub top_k: usize,
    /// When false, fused order is kept and only truncated
    pub enabled: bool,
    /// Base URL of an OpenAI-compatible `/v1/rerank` endpoint
    pub remote_url: Option<String>,
    pub remote_model: Option<String>,
    /// Per-attempt timeout for the remote tier
    pub remote_timeout_ms: u64,
    /// Total remote attempts, first call included; 3 means one call and two
    /// retries, so the remote tier costs at most `remote_timeout_ms * max_retries`
    /// plus backoff
    pub max_retries: u32,
    /// Fixed delay between remote attempts
    pub retry_backoff_ms: u64,
    /// Hugging Face id of a BERT cross-encoder for the local tier
    pub local_model: Option<String>,
    /// Multiplier when the query occurs verbatim in the chunk
    pub phrase_boost: f64,
    /// Multiplier for chunks shorter than `min_length` characters
    pub short_penalty: f64,
    /// Multiplier for chunks longer than `max_length` characters
    pub long_penalty: f64,
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for ReRankConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            enabled: true,
            remote_url: None,
            remote_model: None,
            remote_timeout_ms: 10_000,
            max_retries: 3,
            retry_backoff_ms: 500,
            local_model: None,
            phrase_boost: 1.5,
            short_penalty: 0.8,
            long_penalty: 0.9,
            min_length: 50,
            max_length: 2000,
        }
    }
}

/// Deterministic scorer: base score times boosts and penalties
#[derive(Debug, Clone, PartialEq)]
pub struct RuleBasedScorer {
    phrase_boost: f64,
    short_penalty: f64,
    long_penalty: f64,
    min_length: usize,
    max_length: usize,
}

impl RuleBasedScorer {
    pub fn new() -> Self {
        Self::from_config(&ReRankConfig::default())
    }

    pub fn from_config(config: &ReRankConfig) -> Self {
        Self {
            phrase_boost: config.phrase_boost,
            short_penalty: config.short_penalty,
            long_penalty: config.long_penalty,
            min_length: config.min_length,
            max_length: config.max_length,
        }
    }

    /// Score one candidate
    ///
    /// Phrase matching is case-insensitive. Length is counted in characters.
    /// A `priority` metadata value multiplies the result. Negative base
    /// scores (raw cosine similarity) are divided instead, so a boost always
    /// moves a candidate up and a penalty always moves it down.
    pub fn score(&self, query: &str, candidate: &ScoredCandidate) -> f64 {
        let mut score = candidate.score;

        if self.contains_phrase(query, &candidate.chunk.text) {
            score = scale(score, self.phrase_boost);
        }

        let length = candidate.chunk.char_len();
        if length < self.min_length {
            score = scale(score, self.short_penalty);
        } else if length > self.max_length {
            score = scale(score, self.long_penalty);
        }

        if let Some(priority) = candidate.chunk.priority() {
            score = scale(score, priority);
        }

        score
    }

    /// Scores aligned with `candidates`
    pub fn score_all(&self, query: &str, candidates: &[ScoredCandidate]) -> Vec<f64> {
        candidates.iter().map(|c| self.score(query, c)).collect()
    }

    fn contains_phrase(&self, query: &str, text: &str) -> bool {
        let query = query.trim();
        !query.is_empty() && text.to_lowercase().contains(&query.to_lowercase())
    }
}

fn scale(score: f64, factor: f64) -> f64 {
    if score < 0.0 && factor > 0.0 {
        score / factor
    } else {
        score * factor
    }
}

impl Default for RuleBasedScorer {
    fn default() -> Self {
        Self::new()
    }
}
