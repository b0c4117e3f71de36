//! Token counting for context budgets
//! 
//! Counts with the `cl100k_base` BPE tokenizer. When the tokenizer cannot be
//! loaded, falls back to a deterministic character heuristic:
//! 
//! ```text
//! approx_tokens(text) = ⌊chars(text) × 0.4⌋
//! ```
//! 
//! The heuristic is APPROXIMATE. It is never reported as exact
//! (`TokenCounter::is_exact` returns false) and can undercount dense text.
//! 
//! # Complexity
//! O(n) where n = text length

use std::fmt;
use std::sync::{Arc, OnceLock};

use tiktoken_rs::CoreBPE;
use tracing::warn;

/// Tokens per character used by the fallback heuristic
pub const HEURISTIC_TOKENS_PER_CHAR: f64 = 0.4;

static CL100K: OnceLock<Option<Arc<CoreBPE>>> = OnceLock::new();

fn shared_bpe() -> Option<Arc<CoreBPE>> {
    CL100K
        .get_or_init(|| match tiktoken_rs::cl100k_base() {
            Ok(bpe) => Some(Arc::new(bpe)),
            Err(e) => {
                warn!(error = %e, "cl100k_base unavailable, token counts are approximate");
                None
            }
        })
        .clone()
}

/// Token counter backed by a BPE tokenizer or the character heuristic
#[derive(Clone)]
pub struct TokenCounter {
    bpe: Option<Arc<CoreBPE>>,
}

impl TokenCounter {
    /// Counter using `cl100k_base`, or the heuristic if it fails to load
    pub fn new() -> Self {
        Self { bpe: shared_bpe() }
    }

    /// Counter that always uses the approximate heuristic
    pub fn heuristic() -> Self {
        Self { bpe: None }
    }

    /// Whether counts come from the real tokenizer
    pub fn is_exact(&self) -> bool {
        self.bpe.is_some()
    }

    /// Count tokens in `text`
    /// 
    /// # Examples
    /// 
    /// ```
    /// # use ragpipe::context::counter::TokenCounter;
    /// let counter = TokenCounter::heuristic();
    /// 
    /// // 100 characters × 0.4
    /// assert_eq!(counter.count(&"a".repeat(100)), 40);
    /// ```
    pub fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => Self::approximate(text),
        }
    }

    /// The character heuristic on its own
    pub fn approximate(text: &str) -> usize {
        (text.chars().count() as f64 * HEURISTIC_TOKENS_PER_CHAR) as usize
    }

    /// Batch count for multiple text segments
    /// 
    /// # Complexity
    /// O(Σ n_i) where n_i = length of each segment
    pub fn count_batch(&self, texts: &[&str]) -> usize {
        texts.iter().map(|text| self.count(text)).sum()
    }

    /// Count with detailed breakdown
    pub fn estimate_detailed(&self, text: &str) -> TokenEstimate {
        TokenEstimate {
            char_count: text.chars().count(),
            tokens: self.count(text),
            exact: self.is_exact(),
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCounter")
            .field("exact", &self.is_exact())
            .finish()
    }
}

/// Detailed token count with breakdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenEstimate {
    /// Character count in text
    pub char_count: usize,
    
    /// Token count (exact or approximate)
    pub tokens: usize,
    
    /// False when the heuristic produced `tokens`
    pub exact: bool,
}
