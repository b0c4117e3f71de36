//! Remote relevance model over an OpenAI-compatible `/v1/rerank` endpoint

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::capabilities::RelevanceModel;
use crate::errors::{RagError, Result};

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

/// Relevance model reached over HTTP
///
/// Timeouts are left to the caller, which bounds every attempt.
#[derive(Debug, Clone)]
pub struct HttpRelevanceModel {
    client: Client,
    url: String,
    model: String,
}

impl HttpRelevanceModel {
    pub fn new(base_url: &str, model: Option<&str>) -> Result<Self> {
        Self::with_timeout(base_url, model, Duration::from_secs(30))
    }

    pub fn with_timeout(base_url: &str, model: Option<&str>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(RagError::HttpError)?;

        Ok(Self {
            client,
            url: format!("{}/v1/rerank", base_url.trim_end_matches('/')),
            model: model.unwrap_or("default").to_string(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RelevanceModel for HttpRelevanceModel {
    async fn score_relevance(&self, query: &str, texts: &[String]) -> Result<Vec<f64>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = RerankRequest {
            model: &self.model,
            query,
            documents: texts,
            top_n: texts.len(),
        };

        let response = self.client.post(&self.url).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RagError::Generic(format!("Reranker returned {}: {}", status, text)));
        }

        let json: Value = response.json().await?;
        parse_rerank_response(&json, texts.len())
    }
}

/// Scores aligned to input order from a `{results|data: [{index, relevance_score|score}]}` body
///
/// Every input index must be scored exactly once; a partial answer is an
/// error so the caller can fall back instead of ranking on missing scores.
pub fn parse_rerank_response(json: &Value, doc_count: usize) -> Result<Vec<f64>> {
    let results = json
        .get("results")
        .or_else(|| json.get("data"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| RagError::Generic("Rerank response is missing results array".to_string()))?;

    let mut scores: Vec<Option<f64>> = vec![None; doc_count];
    for item in results {
        let index = item
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| RagError::Generic("Rerank result missing index".to_string()))?
            as usize;
        let score = item
            .get("relevance_score")
            .or_else(|| item.get("score"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| RagError::Generic("Rerank result missing score".to_string()))?;

        match scores.get_mut(index) {
            Some(slot) => *slot = Some(score),
            None => {
                return Err(RagError::Generic(format!(
                    "Rerank result index {} out of range for {} documents",
                    index, doc_count
                )))
            }
        }
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| {
            s.ok_or_else(|| RagError::Generic(format!("Rerank response has no score for document {}", i)))
        })
        .collect()
}
