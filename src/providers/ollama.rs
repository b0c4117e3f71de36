//! Ollama HTTP adapters
//!
//! - Embeddings: POST /api/embeddings
//! - Completion: POST /api/generate (non-streaming)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capabilities::{Embedder, Generator};
use crate::errors::{RagError, Result};

/// Default Ollama API endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default completion model
pub const DEFAULT_MODEL: &str = "qwen2.5:7b-instruct";

/// Completion timeout (60 seconds)
const GENERATE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(RagError::HttpError)
}

async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
    client: &Client,
    url: &str,
    body: &Req,
) -> Result<Resp> {
    let response = client.post(url).json(body).send().await?;

    if !response.status().is_success() {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(RagError::Generic(format!("HTTP {}: {}", status, error_text)));
    }

    Ok(response.json::<Resp>().await?)
}

/// Embedding model served by Ollama
#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_OLLAMA_URL, DEFAULT_EMBEDDING_MODEL, Duration::from_secs(30))
    }

    pub fn with_config(base_url: &str, model: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let response: EmbeddingResponse = post_json(
            &self.client,
            &url,
            &EmbeddingRequest {
                model: &self.model,
                prompt: text,
            },
        )
        .await?;

        if response.embedding.is_empty() {
            return Err(RagError::EmbeddingUnavailable(format!(
                "model '{}' returned an empty embedding",
                self.model
            )));
        }
        Ok(response.embedding)
    }
}

/// Completion model served by Ollama
#[derive(Debug, Clone)]
pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new() -> Result<Self> {
        Self::with_config(DEFAULT_OLLAMA_URL, DEFAULT_MODEL)
    }

    pub fn with_config(base_url: &str, model: &str) -> Result<Self> {
        Ok(Self {
            client: build_client(GENERATE_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);
        let response: GenerateResponse = post_json(
            &self.client,
            &url,
            &GenerateRequest {
                model: &self.model,
                prompt,
                stream: false,
            },
        )
        .await?;
        Ok(response.response)
    }
}
