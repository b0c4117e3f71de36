//! Configuration management for ragpipe
//!
//! Provides TOML-based configuration with defaults and validation.
//! Location: ~/.ragpipe/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::errors::{RagError, Result};
use crate::providers::ollama::{DEFAULT_EMBEDDING_MODEL, DEFAULT_OLLAMA_URL};
use crate::rag::context::ContextConfig;
use crate::rag::pipeline::RAGConfig;
use crate::rag::reranking::ReRankConfig;
use crate::rag::retrieval::RetrievalConfig;
use crate::telemetry;

/// Complete configuration for the pipeline and its providers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub retrieval: RetrievalConfig,
    pub rerank: ReRankConfig,
    pub context: ContextConfig,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineConfig,
}

/// Embedding service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub timeout_ms: u64,
}

/// Pipeline-wide switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub enabled: bool,
    /// Request deadline applied to every external call
    pub deadline_ms: Option<u64>,
    /// Default `tracing` filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            deadline_ms: None,
            log_level: "info".to_string(),
        }
    }
}

impl RagConfig {
    /// Load configuration from file or use defaults
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            Self::load_from_file(&config_path)
        } else {
            Self::load_default()
        }
    }

    /// Load configuration from specific file
    pub fn load_from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RagError::ConfigError(format!("Failed to read config: {}", e)))?;

        let config: RagConfig = toml::from_str(&contents)
            .map_err(|e| RagError::ConfigError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load default configuration from standard location or use built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Some(config_path) = Self::default_path() {
            if config_path.exists() {
                return Self::load_from_file(&config_path);
            }
        }

        Ok(RagConfig::default())
    }

    /// `~/.ragpipe/config.toml`, when a home directory is known
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".ragpipe").join("config.toml"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let retrieval = &self.retrieval;
        let rerank = &self.rerank;

        if retrieval.top_k == 0 {
            return Err(RagError::ConfigError(
                "retrieval.top_k must be greater than 0".to_string(),
            ));
        }

        if rerank.top_k == 0 {
            return Err(RagError::ConfigError(
                "rerank.top_k must be greater than 0".to_string(),
            ));
        }

        if retrieval.over_fetch_factor == 0 {
            return Err(RagError::ConfigError(
                "over_fetch_factor must be at least 1".to_string(),
            ));
        }

        if rerank.top_k > retrieval.top_k.saturating_mul(retrieval.over_fetch_factor) {
            return Err(RagError::ConfigError(format!(
                "rerank.top_k ({}) exceeds the over-fetched retrieval count ({})",
                rerank.top_k,
                retrieval.top_k.saturating_mul(retrieval.over_fetch_factor)
            )));
        }

        if !(0.0..=1.0).contains(&retrieval.hybrid_vector_weight) {
            return Err(RagError::ConfigError(
                "hybrid_vector_weight must be between 0.0 and 1.0".to_string(),
            ));
        }

        if retrieval.bm25.k1 < 0.0 || !(0.0..=1.0).contains(&retrieval.bm25.b) {
            return Err(RagError::ConfigError(
                "bm25.k1 must be non-negative and bm25.b between 0.0 and 1.0".to_string(),
            ));
        }

        if retrieval.vector_timeout_ms == 0
            || rerank.remote_timeout_ms == 0
            || self.embedding.timeout_ms == 0
        {
            return Err(RagError::ConfigError(
                "timeouts must be greater than 0".to_string(),
            ));
        }

        if rerank.max_retries == 0 {
            return Err(RagError::ConfigError(
                "rerank.max_retries must be at least 1".to_string(),
            ));
        }

        for (name, value) in [
            ("phrase_boost", rerank.phrase_boost),
            ("short_penalty", rerank.short_penalty),
            ("long_penalty", rerank.long_penalty),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(RagError::ConfigError(format!(
                    "rerank.{} must be a positive number",
                    name
                )));
            }
        }

        if rerank.min_length > rerank.max_length {
            return Err(RagError::ConfigError(
                "rerank.min_length must not exceed rerank.max_length".to_string(),
            ));
        }

        if self.pipeline.deadline_ms == Some(0) {
            return Err(RagError::ConfigError(
                "pipeline.deadline_ms must be greater than 0 when set".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &PathBuf) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RagError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| RagError::ConfigError(format!("Failed to create config dir: {}", e)))?;
        }

        std::fs::write(path, contents)
            .map_err(|e| RagError::ConfigError(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Install the `tracing` subscriber at `pipeline.log_level`
    pub fn init_logging(&self) {
        telemetry::init_tracing(&self.pipeline.log_level);
    }

    /// Stage configuration consumed by `RAGPipeline`
    pub fn rag_config(&self) -> RAGConfig {
        RAGConfig {
            retrieval: self.retrieval.clone(),
            rerank: self.rerank.clone(),
            context: self.context.clone(),
            enabled: self.pipeline.enabled,
            deadline_ms: self.pipeline.deadline_ms,
        }
    }
}
