pub mod bi_encoder;
pub mod hashing;

pub use bi_encoder::BiEncoderModel;
pub use hashing::HashingEmbedder;

use crate::config::Config;
use crate::error::Result;
use ndarray::{Array1, Array2};
use std::sync::Arc;

/// Turns text into fixed-dimension, L2-normalized vectors.
pub trait Embedder: Send + Sync {
    /// Stable identifier folded into index snapshot hashes.
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Calls that may run at once; `None` when there is no limit.
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    /// Returns an array of shape (texts.len(), dimension).
    fn embed_batch(&self, texts: &[String]) -> Result<Array2<f32>>;

    fn embed(&self, text: &str) -> Result<Array1<f32>> {
        let batch = self.embed_batch(&[text.to_string()])?;
        Ok(batch.row(0).to_owned())
    }
}

/// Pick the embedder for the configured mode.
pub fn load_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    if config.use_onnx_embedder() {
        let pool_size = config.embedding_pool_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });
        let model = BiEncoderModel::load(
            &config.embedding_model_path,
            &config.embedding_tokenizer_path,
            config.embedding_max_length,
            config.embedding_dim,
            pool_size,
        )?;
        Ok(Arc::new(model))
    } else {
        tracing::info!(
            dimension = config.embedding_dim,
            "Using hashing embedder (no bi-encoder model configured)"
        );
        Ok(Arc::new(HashingEmbedder::new(config.embedding_dim)))
    }
}

/// Cosine similarity between a normalized query and normalized rows.
pub fn cosine_similarity(query: &Array1<f32>, rows: &Array2<f32>) -> Vec<f32> {
    // Embeddings are L2-normalized, so cosine similarity is the dot product.
    rows.outer_iter().map(|row| query.dot(&row)).collect()
}

/// Normalize every row of `matrix` to unit length in place. Zero rows stay zero.
pub(crate) fn l2_normalize_rows(matrix: &mut Array2<f32>) {
    for mut row in matrix.rows_mut() {
        let norm: f32 = row.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|v| v / norm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_of_normalized_rows() {
        let mut rows = Array2::from_shape_vec((2, 2), vec![3.0, 4.0, 0.0, 2.0]).unwrap();
        l2_normalize_rows(&mut rows);
        let query = Array1::from_vec(vec![0.0, 1.0]);
        let scores = cosine_similarity(&query, &rows);
        assert!((scores[0] - 0.8).abs() < 1e-6);
        assert!((scores[1] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_zero_row_stays_zero() {
        let mut rows = Array2::<f32>::zeros((1, 3));
        l2_normalize_rows(&mut rows);
        assert!(rows.iter().all(|v| *v == 0.0));
    }
}
