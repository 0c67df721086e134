#![cfg(feature = "ml-models")]
//! Transformer embedding backend running on ONNX Runtime
//!
//! Loads `model.onnx` + `tokenizer.json` from the model cache (downloading
//! them on first use), runs batched inference and mean-pools the last hidden
//! state over non-padding tokens. Output vectors are L2-normalized.

use anyhow::{Context, Result};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use super::embeddings::{l2_normalize, EmbeddingGateway};
use super::model_download::{default_cache_dir, ModelDownloader, ModelInfo};
use crate::config::EmbeddingConfig;

const MAX_SEQ_LENGTH: usize = 512;
const BATCH_SIZE: usize = 32;

pub struct OnnxEmbedder {
    model_id: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    uses_token_type_ids: bool,
    query_prefix: String,
    document_prefix: String,
}

impl OnnxEmbedder {
    /// Resolve the configured model in the cache, downloading if needed, and load it.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = match &config.cache_dir {
            Some(dir) => dir.clone(),
            None => default_cache_dir()?,
        };
        let info = ModelInfo::for_model(&config.model)?;
        let model_dir = ModelDownloader::new(cache_dir).ensure_model(&info)?;

        let query_prefix = config
            .query_prefix
            .clone()
            .unwrap_or_else(|| info.query_prefix.clone());
        let document_prefix = config
            .document_prefix
            .clone()
            .unwrap_or_else(|| info.document_prefix.clone());

        Self::load(&info.name, &model_dir, query_prefix, document_prefix)
    }

    /// Load from a directory holding `model.onnx` and `tokenizer.json`.
    pub fn load(
        model_id: &str,
        model_dir: &Path,
        query_prefix: String,
        document_prefix: String,
    ) -> Result<Self> {
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("Failed to set optimization level")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load ONNX model: {}", model_path.display()))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

        let uses_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        info!(
            model = %model_id,
            path = %model_dir.display(),
            token_type_ids = uses_token_type_ids,
            "ONNX embedding model loaded"
        );

        Ok(Self {
            model_id: model_id.to_string(),
            session: Mutex::new(session),
            tokenizer,
            uses_token_type_ids,
            query_prefix,
            document_prefix,
        })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let batch_size = encodings.len();
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(MAX_SEQ_LENGTH))
            .max()
            .unwrap_or(1)
            .max(1);

        let mut input_ids: Vec<i64> = Vec::with_capacity(batch_size * max_len);
        let mut attention_mask: Vec<i64> = Vec::with_capacity(batch_size * max_len);
        let mut token_type_ids: Vec<i64> = Vec::with_capacity(batch_size * max_len);

        for encoding in &encodings {
            let ids = encoding.get_ids();
            let attn = encoding.get_attention_mask();
            let types = encoding.get_type_ids();
            let seq_len = ids.len().min(MAX_SEQ_LENGTH);

            for i in 0..seq_len {
                input_ids.push(ids[i] as i64);
                attention_mask.push(attn[i] as i64);
                token_type_ids.push(types[i] as i64);
            }
            for _ in seq_len..max_len {
                input_ids.push(0);
                attention_mask.push(0);
                token_type_ids.push(0);
            }
        }

        let input_ids_tensor = Tensor::from_array(([batch_size, max_len], input_ids))?;
        let attention_mask_tensor =
            Tensor::from_array(([batch_size, max_len], attention_mask.clone()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("ONNX session lock poisoned"))?;

        let outputs = if self.uses_token_type_ids {
            let token_type_ids_tensor =
                Tensor::from_array(([batch_size, max_len], token_type_ids))?;
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])?
        } else {
            session.run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
            ])?
        };

        let output = outputs
            .get("last_hidden_state")
            .or_else(|| outputs.get("sentence_embedding"))
            .context("Model output not found")?;
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();

        let mut results = Vec::with_capacity(batch_size);
        match dims.as_slice() {
            [_, seq_len_out, hidden_dim] => {
                for b in 0..batch_size {
                    let mut embedding = vec![0.0f32; *hidden_dim];
                    let mut valid_tokens = 0.0f32;
                    for s in 0..(*seq_len_out).min(max_len) {
                        if attention_mask[b * max_len + s] == 0 {
                            continue;
                        }
                        valid_tokens += 1.0;
                        let offset = (b * seq_len_out + s) * hidden_dim;
                        for (d, value) in embedding.iter_mut().enumerate() {
                            *value += data[offset + d];
                        }
                    }
                    if valid_tokens > 0.0 {
                        for value in embedding.iter_mut() {
                            *value /= valid_tokens;
                        }
                    }
                    l2_normalize(&mut embedding);
                    results.push(embedding);
                }
            }
            [_, hidden_dim] => {
                for b in 0..batch_size {
                    let mut embedding = data[b * hidden_dim..(b + 1) * hidden_dim].to_vec();
                    l2_normalize(&mut embedding);
                    results.push(embedding);
                }
            }
            other => anyhow::bail!("Unexpected model output shape: {:?}", other),
        }

        Ok(results)
    }
}

impl EmbeddingGateway for OnnxEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(BATCH_SIZE).enumerate() {
            let prefixed: Vec<String> = batch
                .iter()
                .map(|t| format!("{}{}", self.document_prefix, t))
                .collect();
            embeddings.extend(self.embed_batch(&prefixed)?);
            debug!(batch = i, done = embeddings.len(), total = texts.len(), "Embedded batch");
        }
        Ok(embeddings)
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = format!("{}{}", self.query_prefix, text);
        self.embed_batch(&[prefixed])?
            .pop()
            .context("Model returned no embedding for query")
    }
}
