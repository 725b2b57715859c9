//! Bi-encoder model for semantic tool search.
//!
//! Encodes text into sentence embeddings (mean pooling over the last hidden
//! state, L2-normalized). Designed for MiniLM-class models such as
//! `all-MiniLM-L6-v2` (384 dimensions) exported to ONNX.

use super::{l2_normalize_rows, Embedder};
use crate::error::{AppError, Result};
use crossbeam::queue::ArrayQueue;
use ndarray::Array2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Tensor,
};
use std::cell::UnsafeCell;
use std::path::Path;
use tokenizers::Tokenizer;

/// A pool of ONNX sessions sharing one tokenizer.
///
/// `Session::run` needs `&mut self`. Instead of a Mutex we keep N sessions
/// and hand out indices through a lock-free queue; an index is held by at
/// most one thread between `acquire_session` and `release_session`.
pub struct BiEncoderModel {
    sessions: Vec<UnsafeCell<Session>>,
    available: ArrayQueue<usize>,
    tokenizer: Tokenizer,
    max_length: usize,
    embedding_dim: usize,
    model_id: String,
}

impl BiEncoderModel {
    /// Load `pool_size` sessions of the model plus its tokenizer.
    pub fn load(
        model_path: &Path,
        tokenizer_path: &Path,
        max_length: usize,
        embedding_dim: usize,
        pool_size: usize,
    ) -> Result<Self> {
        let pool_size = pool_size.max(1);

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            AppError::ModelError(format!("Failed to load bi-encoder tokenizer: {}", e))
        })?;

        // Read model file once
        let model_bytes = std::fs::read(model_path)
            .map_err(|e| AppError::ModelError(format!("Failed to read model file: {}", e)))?;

        let mut sessions = Vec::with_capacity(pool_size);
        let available = ArrayQueue::new(pool_size);

        for i in 0..pool_size {
            let session = Session::builder()
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .with_intra_threads(1)
                .map_err(|e| AppError::ModelError(e.to_string()))?
                .commit_from_memory(&model_bytes)
                .map_err(|e: ort::Error| AppError::ModelError(e.to_string()))?;

            sessions.push(UnsafeCell::new(session));
            available
                .push(i)
                .map_err(|_| AppError::ModelError("Failed to initialize session pool".into()))?;
        }

        tracing::info!(
            model = %model_path.display(),
            tokenizer = %tokenizer_path.display(),
            max_length,
            embedding_dim,
            pool_size,
            "Bi-encoder model loaded"
        );

        Ok(Self {
            sessions,
            available,
            tokenizer,
            max_length,
            embedding_dim,
            model_id: format!("onnx:{}", model_path.display()),
        })
    }

    fn acquire_session(&self) -> Result<usize> {
        self.available
            .pop()
            .ok_or_else(|| AppError::IndexUnavailable("No available embedding sessions".into()))
    }

    fn release_session(&self, index: usize) {
        // Only indices we acquired are ever pushed back, so this cannot overflow.
        let _ = self.available.push(index);
    }

    fn encode_on_session(&self, session_idx: usize, texts: &[String]) -> Result<Array2<f32>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| AppError::ModelError(format!("Tokenization failed: {}", e)))?;

        let batch_size = encodings.len();

        // Longest sequence in this batch, capped at max_length
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len().min(self.max_length))
            .max()
            .unwrap_or(1)
            .max(1);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let token_type_ids = vec![0i64; batch_size * max_len];

        for (i, encoding) in encodings.iter().enumerate() {
            let ids = encoding.get_ids();
            let mask = encoding.get_attention_mask();
            let len = ids.len().min(max_len);

            for j in 0..len {
                input_ids[i * max_len + j] = ids[j] as i64;
                attention_mask[i * max_len + j] = mask[j] as i64;
            }
        }

        let shape = [batch_size, max_len];
        let input_ids_tensor = Tensor::from_array((shape, input_ids))
            .map_err(|e| AppError::ModelError(e.to_string()))?;
        let attention_mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
            .map_err(|e| AppError::ModelError(e.to_string()))?;
        let token_type_ids_tensor = Tensor::from_array((shape, token_type_ids))
            .map_err(|e| AppError::ModelError(e.to_string()))?;

        // SAFETY: the ArrayQueue hands each index to at most one thread until
        // it is released, so this is the only live reference to the session.
        let session = unsafe { &mut *self.sessions[session_idx].get() };

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_mask_tensor,
                "token_type_ids" => token_type_ids_tensor,
            ])
            .map_err(|e| AppError::ModelError(format!("Bi-encoder inference failed: {}", e)))?;

        // last_hidden_state: (batch, seq_len, hidden_size)
        let hidden_state = outputs.get("last_hidden_state").ok_or_else(|| {
            AppError::ModelError("No 'last_hidden_state' output found".to_string())
        })?;

        let (shape_info, data) = hidden_state
            .try_extract_tensor::<f32>()
            .map_err(|e| AppError::ModelError(e.to_string()))?;
        let hidden_size = shape_info[2] as usize;

        if hidden_size != self.embedding_dim {
            return Err(AppError::ModelError(format!(
                "Model produces {}-dimensional embeddings, configured for {}",
                hidden_size, self.embedding_dim
            )));
        }

        // Mean pooling with attention mask
        let mut embeddings = Array2::zeros((batch_size, hidden_size));
        for i in 0..batch_size {
            let mut sum = vec![0.0f32; hidden_size];
            let mut count = 0.0f32;

            for j in 0..max_len {
                if attention_mask[i * max_len + j] == 1 {
                    let base_idx = i * max_len * hidden_size + j * hidden_size;
                    for (k, sum_val) in sum.iter_mut().enumerate() {
                        *sum_val += data[base_idx + k];
                    }
                    count += 1.0;
                }
            }

            if count > 0.0 {
                for (k, sum_val) in sum.iter().enumerate() {
                    embeddings[[i, k]] = sum_val / count;
                }
            }
        }

        l2_normalize_rows(&mut embeddings);
        Ok(embeddings)
    }
}

impl Embedder for BiEncoderModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.embedding_dim
    }

    fn max_concurrency(&self) -> Option<usize> {
        Some(self.sessions.len())
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Array2<f32>> {
        if texts.is_empty() {
            return Ok(Array2::zeros((0, self.embedding_dim)));
        }

        let session_idx = self.acquire_session()?;
        let result = self.encode_on_session(session_idx, texts);
        // Always release the session back to the pool
        self.release_session(session_idx);
        result
    }
}

// SAFETY: sessions are only reached through an index popped from the
// ArrayQueue, which gives the same exclusion a Mutex would without blocking.
// The tokenizer is used through `&self` only.
unsafe impl Send for BiEncoderModel {}
unsafe impl Sync for BiEncoderModel {}
