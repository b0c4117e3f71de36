// Context assembler: packs ranked chunks into a token-bounded string
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::context::counter::TokenCounter;
use crate::telemetry::{PipelineEvent, TelemetryCollector};
use crate::types::{Chunk, RankedResult};

/// Separator between assembled pieces
pub const SEPARATOR: &str = "\n\n---\n\n";

/// Marker appended to a truncated piece
pub const ELLIPSIS: &str = "...";

/// Context assembly configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Token budget for the assembled context
    pub max_context_tokens: usize,
    /// Pull in the chunks immediately before and after each candidate
    pub enable_context_expansion: bool,
    /// Include document metadata in context
    pub include_metadata: bool,
    /// Format for context presentation
    pub format: ContextFormat,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 4000,
            enable_context_expansion: true,
            include_metadata: true,
            format: ContextFormat::Structured,
        }
    }
}

/// Format for presenting context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextFormat {
    /// `[Document n] (source: s)` header above each chunk
    Structured,
    /// `n. text`
    Numbered,
    /// Bare chunk text
    Plain,
}

/// Assembled context for prompt augmentation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    /// The formatted context text
    pub text: String,
    /// Chunk ids in the order they appear in `text`
    pub included_chunk_ids: Vec<String>,
    /// Tokens in `text`, never above the budget it was built for
    pub token_count: usize,
    /// Whether the last piece was cut to fit
    pub truncated: bool,
}

impl AssembledContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.included_chunk_ids.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.included_chunk_ids.len()
    }
}

/// Neighbor lookup keyed by `(source, chunk_index)`
struct NeighborMap<'a> {
    by_position: HashMap<(&'a str, i64), &'a Arc<Chunk>>,
}

impl<'a> NeighborMap<'a> {
    fn new(corpus: &'a [Arc<Chunk>]) -> Self {
        let mut by_position = HashMap::with_capacity(corpus.len());
        for chunk in corpus {
            if let (Some(source), Some(index)) = (chunk.source(), chunk.chunk_index()) {
                by_position.entry((source, index)).or_insert(chunk);
            }
        }
        Self { by_position }
    }

    fn at(&self, chunk: &Chunk, offset: i64) -> Option<&'a Arc<Chunk>> {
        let source = chunk.source()?;
        let index = chunk.chunk_index()?.checked_add(offset)?;
        self.by_position.get(&(source, index)).copied()
    }
}

/// Context builder for assembling RAG context
pub struct ContextBuilder {
    config: ContextConfig,
    counter: TokenCounter,
    telemetry: Option<TelemetryCollector>,
}

impl ContextBuilder {
    /// Create new context builder with default config
    pub fn new() -> Self {
        Self::with_config(ContextConfig::default())
    }

    /// Create with custom configuration
    pub fn with_config(config: ContextConfig) -> Self {
        Self {
            config,
            counter: TokenCounter::new(),
            telemetry: None,
        }
    }

    /// Use a specific token counter
    pub fn with_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn counter(&self) -> &TokenCounter {
        &self.counter
    }

    /// Assemble with the configured budget and expansion setting
    pub fn assemble(&self, ranked: &RankedResult, corpus: &[Arc<Chunk>]) -> AssembledContext {
        self.build(
            ranked,
            corpus,
            self.config.max_context_tokens,
            self.config.enable_context_expansion,
        )
    }

    /// Pack `ranked` into at most `token_budget` tokens
    ///
    /// Candidates are visited in rank order. With `expand_neighbors`, each is
    /// preceded by its predecessor and followed by its successor from the same
    /// source, looked up in `corpus`. A chunk appears at most once. The first
    /// piece that does not fit is cut to the longest prefix that does, marked
    /// with an ellipsis, and assembly stops there.
    pub fn build(
        &self,
        ranked: &RankedResult,
        corpus: &[Arc<Chunk>],
        token_budget: usize,
        expand_neighbors: bool,
    ) -> AssembledContext {
        let neighbors = if expand_neighbors {
            NeighborMap::new(corpus)
        } else {
            NeighborMap::new(&[])
        };

        let mut visited: HashSet<&str> = HashSet::new();
        let mut text = String::new();
        let mut included = Vec::new();
        let mut truncated = false;

        'candidates: for candidate in ranked {
            let group = [
                neighbors.at(&candidate.chunk, -1),
                Some(&candidate.chunk),
                neighbors.at(&candidate.chunk, 1),
            ];

            for chunk in group.into_iter().flatten() {
                if !visited.insert(chunk.id.as_str()) {
                    continue;
                }

                let position = included.len() + 1;
                let prospective = join(&text, &self.format_piece(position, chunk, &chunk.text));
                if self.counter.count(&prospective) <= token_budget {
                    text = prospective;
                    included.push(chunk.id.clone());
                    continue;
                }

                truncated = true;
                if let Some(fitted) = self.fit_prefix(&text, position, chunk, token_budget) {
                    text = fitted;
                    included.push(chunk.id.clone());
                    debug!(chunk_id = %chunk.id, token_budget, "context truncated");
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record(PipelineEvent::ContextTruncated {
                            chunk_id: chunk.id.clone(),
                            timestamp: Instant::now(),
                        });
                    }
                }
                break 'candidates;
            }
        }

        if included.is_empty() {
            return AssembledContext {
                truncated,
                ..AssembledContext::empty()
            };
        }

        AssembledContext {
            token_count: self.counter.count(&text),
            text,
            included_chunk_ids: included,
            truncated,
        }
    }

    /// Longest char prefix of `chunk` (plus ellipsis) that still fits
    fn fit_prefix(
        &self,
        text: &str,
        position: usize,
        chunk: &Chunk,
        token_budget: usize,
    ) -> Option<String> {
        let boundaries = char_boundaries(&chunk.text);
        let candidate = |chars: usize| {
            let body = format!("{}{}", &chunk.text[..boundaries[chars]], ELLIPSIS);
            join(text, &self.format_piece(position, chunk, &body))
        };

        let (mut lo, mut hi) = (0, boundaries.len() - 1);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.counter.count(&candidate(mid)) <= token_budget {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        (lo > 0).then(|| candidate(lo))
    }

    /// Cut `text` to at most `max_tokens`, without a marker
    pub fn truncate_text(&self, text: &str, max_tokens: usize) -> String {
        if self.counter.count(text) <= max_tokens {
            return text.to_string();
        }

        let boundaries = char_boundaries(text);
        let (mut lo, mut hi) = (0, boundaries.len() - 1);
        while lo < hi {
            let mid = (lo + hi + 1) / 2;
            if self.counter.count(&text[..boundaries[mid]]) <= max_tokens {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        text[..boundaries[lo]].to_string()
    }

    fn format_piece(&self, position: usize, chunk: &Chunk, body: &str) -> String {
        match self.config.format {
            ContextFormat::Structured => match chunk.source() {
                Some(source) if self.config.include_metadata => {
                    format!("[Document {}] (source: {})\n{}", position, source, body)
                }
                _ => format!("[Document {}]\n{}", position, body),
            },
            ContextFormat::Numbered => format!("{}. {}", position, body),
            ContextFormat::Plain => body.to_string(),
        }
    }

    /// Instruction + context + question prompt
    ///
    /// An empty context yields the bare query.
    pub fn augment_prompt(&self, query: &str, context: &AssembledContext) -> String {
        if context.is_empty() {
            return query.to_string();
        }

        format!(
            "Answer the question using the documents below.\n\nRelevant documents:\n{}\n\nQuestion: {}\n\nAnswer:",
            context.text, query
        )
    }

    /// Get current configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Update configuration
    pub fn set_config(&mut self, config: ContextConfig) {
        self.config = config;
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn join(text: &str, piece: &str) -> String {
    if text.is_empty() {
        piece.to_string()
    } else {
        format!("{}{}{}", text, SEPARATOR, piece)
    }
}

/// Byte offset of every char prefix, `0..=len`
fn char_boundaries(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}
