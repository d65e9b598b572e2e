//! The `Embedding` data model: `{ownerHash, chunkIndex, vector, modelId, createdAt}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Every persisted chunk has exactly one embedding; `vector.len() == dimensions`
/// declared by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
  pub owner_hash: String,
  pub chunk_index: usize,
  pub vector: Vec<f32>,
  pub model_id: String,
  pub created_at: DateTime<Utc>,
}

impl EmbeddingRecord {
  pub fn new(owner_hash: impl Into<String>, chunk_index: usize, vector: Vec<f32>, model_id: impl Into<String>) -> Self {
    Self {
      owner_hash: owner_hash.into(),
      chunk_index,
      vector,
      model_id: model_id.into(),
      created_at: Utc::now(),
    }
  }

  pub fn dimensions(&self) -> usize {
    self.vector.len()
  }
}

/// Cosine similarity between two equal-length vectors. Returns raw
/// `[-1, 1]`-range similarity (or 0.0 for a zero-magnitude input) — callers
/// that surface scores to clients apply `normalise_similarity` separately so
/// internal ranking always works on the unclamped value.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
  if a.len() != b.len() || a.is_empty() {
    return 0.0;
  }
  let mut dot = 0.0f32;
  let mut na = 0.0f32;
  let mut nb = 0.0f32;
  for (x, y) in a.iter().zip(b.iter()) {
    dot += x * y;
    na += x * x;
    nb += y * y;
  }
  if na == 0.0 || nb == 0.0 {
    return 0.0;
  }
  dot / (na.sqrt() * nb.sqrt())
}

/// Deterministic, monotonic-in-cosine clamp to `[0, 1]` used whenever a
/// similarity score is surfaced to a client (REST/duplex). Internal ranking
/// paths keep the raw cosine value from `cosine_similarity`.
pub fn normalise_similarity(cosine: f32) -> f32 {
  ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn identical_vectors_have_similarity_one() {
    let v = vec![1.0, 2.0, 3.0];
    assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
  }

  #[test]
  fn orthogonal_vectors_have_similarity_zero() {
    let a = vec![1.0, 0.0];
    let b = vec![0.0, 1.0];
    assert!(cosine_similarity(&a, &b).abs() < 1e-6);
  }

  #[test]
  fn opposite_vectors_have_similarity_minus_one() {
    let a = vec![1.0, 0.0];
    let b = vec![-1.0, 0.0];
    assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
  }

  #[test]
  fn normalisation_is_monotonic_and_clamped() {
    assert!((normalise_similarity(1.0) - 1.0).abs() < 1e-6);
    assert!((normalise_similarity(-1.0) - 0.0).abs() < 1e-6);
    assert!((normalise_similarity(0.0) - 0.5).abs() < 1e-6);
    assert!(normalise_similarity(0.2) > normalise_similarity(0.1));
  }

  #[test]
  fn mismatched_lengths_yield_zero() {
    assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
  }
}
