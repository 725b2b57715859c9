//! Deterministic feature-hashing embedder.
//!
//! Each word token (snake_case and punctuation split, stop words removed)
//! and each of its character trigrams is hashed into one of `dimension`
//! signed buckets. The result is L2-normalized, so cosine similarity reduces
//! to weighted token overlap. No model files, no randomness.

use super::{l2_normalize_rows, Embedder};
use crate::error::Result;
use ndarray::Array2;
use sha2::{Digest, Sha256};

const WORD_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.35;

const STOP_WORDS: &[&str] = &[
    "a", "about", "all", "an", "and", "any", "are", "as", "at", "be", "by", "can", "could", "do",
    "for", "from", "get", "how", "i", "in", "into", "is", "it", "its", "me", "my", "need", "of",
    "on", "or", "please", "some", "that", "the", "this", "to", "want", "we", "what", "which",
    "with", "would", "you", "your", "tool", "category", "description", "parameters", "examples",
    "keywords",
];

pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            dimension,
            model_id: format!("hashing-v1-{}", dimension),
        }
    }

    fn accumulate(&self, text: &str, row: &mut [f32]) {
        for token in tokenize(text) {
            self.add_feature(&token, WORD_WEIGHT, row);
            let chars: Vec<char> = token.chars().collect();
            if chars.len() > 3 {
                for window in chars.windows(3) {
                    let gram: String = window.iter().collect();
                    self.add_feature(&format!("#{}", gram), TRIGRAM_WEIGHT, row);
                }
            }
        }
    }

    fn add_feature(&self, feature: &str, weight: f32, row: &mut [f32]) {
        let digest = Sha256::digest(feature.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        let hash = u64::from_le_bytes(bytes);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        row[bucket] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Array2<f32>> {
        let mut matrix = Array2::zeros((texts.len(), self.dimension));
        for (i, text) in texts.iter().enumerate() {
            let mut row = vec![0.0f32; self.dimension];
            self.accumulate(text, &mut row);
            for (k, v) in row.into_iter().enumerate() {
                matrix[[i, k]] = v;
            }
        }
        l2_normalize_rows(&mut matrix);
        Ok(matrix)
    }
}

/// Lowercased alphanumeric tokens without stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}
