//! Embedding contract and vector helpers.
//!
//! Concrete embedders (OpenAI-compatible HTTP) live in the `docgraph` app
//! crate and are wrapped there with caching and the resilience policy.

use async_trait::async_trait;

use crate::error::BackendError;

/// An embedding backend.
///
/// Implementations must be deterministic for identical input; the
/// embedding cache relies on it.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, part of the cache key.
    fn model_name(&self) -> &str;

    fn dims(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}

/// Encode a vector as little-endian f32 bytes.
///
/// ```rust
/// use docgraph_core::embedding::{blob_to_vec, vec_to_blob};
///
/// let v = vec![0.5f32, -1.25];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 8);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Decode little-endian f32 bytes. Trailing bytes short of a full value are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1, 1]`; `0.0` for empty, zero or mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        0.0
    } else {
        // f32 rounding can push parallel vectors just past 1
        (dot / denom).clamp(-1.0, 1.0)
    }
}
