// SPDX-FileCopyrightText: 2026 Memoria Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process ONNX embedding backend (all-MiniLM-L6-v2 by default).
//!
//! The model is loaded on the first `embed` call and reused afterwards.
//! Inference runs on CPU with a single intra-op thread.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use memoria_core::types::{EmbeddingInput, EmbeddingOutput, HealthStatus};
use memoria_core::{EmbeddingAdapter, MemoriaError, PluginAdapter};
use ndarray::Array2;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::TensorRef;
use tokio::sync::OnceCell;
use tracing::info;

/// Embedding dimensions for all-MiniLM-L6-v2.
pub const EMBEDDING_DIM: usize = 384;

/// A loaded ONNX session plus its tokenizer.
struct OnnxModel {
    session: Mutex<Session>,
    tokenizer: tokenizers::Tokenizer,
}

// SAFETY: the session is only reached through the Mutex; the tokenizer is
// read-only after construction.
unsafe impl Send for OnnxModel {}
unsafe impl Sync for OnnxModel {}

impl OnnxModel {
    fn load(model_dir: &Path) -> Result<Self, MemoriaError> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = tokenizers::Tokenizer::from_file(&tokenizer_path).map_err(|e| {
            MemoriaError::embedding(format!(
                "failed to load tokenizer from {}: {e}",
                tokenizer_path.display()
            ))
        })?;

        let model_path = model_dir.join("model.onnx");
        let session = Session::builder()
            .map_err(|e| onnx_err("failed to create ONNX session builder", e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| onnx_err("failed to set optimization level", e))?
            .with_intra_threads(1)
            .map_err(|e| onnx_err("failed to set thread count", e))?
            .commit_from_file(&model_path)
            .map_err(|e| {
                MemoriaError::embedding(format!(
                    "failed to load ONNX model from {}: {e}",
                    model_path.display()
                ))
            })?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    /// Embed one text into a mean-pooled (not yet normalized) vector.
    fn embed_text(&self, text: &str) -> Result<Vec<f32>, MemoriaError> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| MemoriaError::embedding(format!("tokenization failed: {e}")))?;

        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| t as i64).collect();
        let seq_len = input_ids.len();

        let input_ids = Array2::from_shape_vec((1, seq_len), input_ids)
            .map_err(|e| onnx_err("failed to shape input_ids", e))?;
        let mask = Array2::from_shape_vec((1, seq_len), attention_mask.clone())
            .map_err(|e| onnx_err("failed to shape attention_mask", e))?;
        let type_ids = Array2::from_shape_vec((1, seq_len), token_type_ids)
            .map_err(|e| onnx_err("failed to shape token_type_ids", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| MemoriaError::Internal(format!("ONNX session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => TensorRef::from_array_view(&input_ids)
                    .map_err(|e| onnx_err("failed to bind input_ids", e))?,
                "attention_mask" => TensorRef::from_array_view(&mask)
                    .map_err(|e| onnx_err("failed to bind attention_mask", e))?,
                "token_type_ids" => TensorRef::from_array_view(&type_ids)
                    .map_err(|e| onnx_err("failed to bind token_type_ids", e))?
            ])
            .map_err(|e| onnx_err("ONNX inference failed", e))?;

        // [1, seq_len, hidden]
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| onnx_err("failed to extract output tensor", e))?;
        let hidden_size = shape[shape.len() - 1] as usize;

        Ok(mean_pool_with_attention(
            data,
            &attention_mask,
            seq_len,
            hidden_size,
        ))
    }
}

fn onnx_err(context: &str, e: impl std::fmt::Display) -> MemoriaError {
    MemoriaError::embedding(format!("{context}: {e}"))
}

/// Attention-masked mean pooling over token embeddings.
fn mean_pool_with_attention(
    embeddings: &[f32],
    attention_mask: &[i64],
    seq_len: usize,
    hidden_size: usize,
) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden_size];
    let mut count = 0.0f32;

    for (i, &mask) in attention_mask.iter().enumerate().take(seq_len) {
        if mask > 0 {
            let row = &embeddings[i * hidden_size..(i + 1) * hidden_size];
            for (acc, v) in sum.iter_mut().zip(row) {
                *acc += v;
            }
            count += 1.0;
        }
    }

    if count > 0.0 {
        for val in &mut sum {
            *val /= count;
        }
    }
    sum
}

/// Local embedding backend over model files in `model_dir`.
pub struct LocalEmbedder {
    model_dir: PathBuf,
    model: String,
    loaded: OnceCell<OnnxModel>,
}

impl LocalEmbedder {
    /// Does not touch the model files; they are read on first use.
    pub fn new(model_dir: PathBuf, model: impl Into<String>) -> Self {
        Self {
            model_dir,
            model: model.into(),
            loaded: OnceCell::new(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    async fn model_handle(&self) -> Result<&OnnxModel, MemoriaError> {
        self.loaded
            .get_or_try_init(|| async {
                info!(dir = %self.model_dir.display(), "loading local embedding model");
                OnnxModel::load(&self.model_dir)
            })
            .await
    }
}

#[async_trait]
impl PluginAdapter for LocalEmbedder {
    fn name(&self) -> &str {
        "local"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    async fn health_check(&self) -> Result<HealthStatus, MemoriaError> {
        match self.loaded.get() {
            Some(model) => match model.session.lock() {
                Ok(_) => Ok(HealthStatus::Healthy),
                Err(e) => Ok(HealthStatus::Unhealthy(format!("session lock poisoned: {e}"))),
            },
            None => Ok(HealthStatus::Degraded("model not loaded yet".to_string())),
        }
    }
}

#[async_trait]
impl EmbeddingAdapter for LocalEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed(&self, input: EmbeddingInput) -> Result<EmbeddingOutput, MemoriaError> {
        let model = self.model_handle().await?;
        let embeddings = input
            .texts
            .iter()
            .map(|text| model.embed_text(text))
            .collect::<Result<Vec<_>, _>>()?;
        let dimensions = embeddings.first().map(Vec::len).unwrap_or(EMBEDDING_DIM);

        Ok(EmbeddingOutput {
            embeddings,
            dimensions,
        })
    }
}
