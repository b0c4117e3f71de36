// Local cross-encoder: BERT sequence classifier scoring (query, passage) pairs
use anyhow::{Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::sync::Arc;
use tokenizers::{Tokenizer, TruncationParams};

use crate::capabilities::LocalRelevanceModel;
use crate::errors::RagError;

/// Default Hugging Face model for the local tier
pub const DEFAULT_MODEL_ID: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";

const MAX_SEQUENCE_LENGTH: usize = 512;

/// Cross-encoder relevance model running on Candle
pub struct CrossEncoder {
    model: Arc<BertModel>,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Arc<Tokenizer>,
    device: Device,
}

impl CrossEncoder {
    /// Download (on first use) and load `model_id` from the Hugging Face hub
    pub fn load(model_id: &str) -> Result<Self> {
        let device = Device::Cpu;

        let api = Api::new().context("Failed to create HuggingFace API client")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo.get("config.json")
            .context("Failed to download model config")?;
        let tokenizer_path = repo.get("tokenizer.json")
            .context("Failed to download tokenizer")?;
        let weights_path = repo.get("model.safetensors")
            .context("Failed to download model weights")?;

        let config_contents = std::fs::read_to_string(config_path)
            .context("Failed to read config file")?;
        let config: Config = serde_json::from_str(&config_contents)
            .context("Failed to parse model config")?;
        let hidden_size = serde_json::from_str::<serde_json::Value>(&config_contents)?
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .context("Model config has no hidden_size")? as usize;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure truncation: {}", e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DType::F32, &device)
                .context("Failed to load model weights")?
        };

        let model = BertModel::load(vb.clone(), &config)
            .context("Failed to create BERT model")?;
        let pooler = candle_nn::linear(hidden_size, hidden_size, vb.pp("bert.pooler.dense"))
            .context("Failed to load pooler")?;
        let classifier = candle_nn::linear(hidden_size, 1, vb.pp("classifier"))
            .context("Failed to load classification head")?;

        Ok(Self {
            model: Arc::new(model),
            pooler,
            classifier,
            tokenizer: Arc::new(tokenizer),
            device,
        })
    }

    /// Relevance in (0, 1) for each passage, in input order
    pub fn score_batch(&self, query: &str, passages: &[String]) -> Result<Vec<f64>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }

        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, p.as_str())).collect();
        let encodings = self.tokenizer
            .encode_batch(pairs, true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let batch_size = encodings.len();
        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

        let mut ids = vec![0u32; batch_size * max_len];
        let mut type_ids = vec![0u32; batch_size * max_len];
        let mut mask = vec![0u32; batch_size * max_len];

        for (row, encoding) in encodings.iter().enumerate() {
            let start = row * max_len;
            let len = encoding.get_ids().len();
            ids[start..start + len].copy_from_slice(encoding.get_ids());
            type_ids[start..start + len].copy_from_slice(encoding.get_type_ids());
            mask[start..start + len].copy_from_slice(encoding.get_attention_mask());
        }

        let ids = Tensor::from_vec(ids, (batch_size, max_len), &self.device)?;
        let type_ids = Tensor::from_vec(type_ids, (batch_size, max_len), &self.device)?;
        let mask = Tensor::from_vec(mask, (batch_size, max_len), &self.device)?;

        let hidden = self.model.forward(&ids, &type_ids, Some(&mask))?;

        // [CLS] token -> pooler -> single logit
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.classifier.forward(&pooled)?.squeeze(1)?;

        Ok(logits
            .to_vec1::<f32>()?
            .into_iter()
            .map(|logit| sigmoid(f64::from(logit)))
            .collect())
    }
}

impl LocalRelevanceModel for CrossEncoder {
    fn score_pairs(&self, query: &str, texts: &[String]) -> crate::errors::Result<Vec<f64>> {
        self.score_batch(query, texts)
            .map_err(|e| RagError::ModelError(format!("{:#}", e)))
    }
}

/// Map a raw logit into (0, 1)
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
