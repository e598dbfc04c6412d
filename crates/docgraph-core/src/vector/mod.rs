//! Vector index contract.
//!
//! Entries are keyed by chunk id and carry enough [`VectorMetadata`] for
//! ranking and synthesis to work from search results alone.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::models::PromotionLevel;

/// Payload stored next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub document_id: String,
    pub section_id: String,
    pub source: String,
    pub file_path: String,
    pub title: String,
    #[serde(default)]
    pub promotion: PromotionLevel,
    pub text: String,
}

/// One search result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    /// Cosine similarity, higher is better.
    pub score: f64,
    pub metadata: VectorMetadata,
}

/// Storage backend for chunk embeddings.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Top `k` entries by descending score, ties broken by chunk id.
    /// Entries with no positive similarity are not matches.
    ///
    /// `source` restricts the search to one source when set.
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<VectorHit>, BackendError>;

    /// Insert or replace the entry for `chunk_id`.
    async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        metadata: &VectorMetadata,
    ) -> Result<(), BackendError>;

    /// Remove the entry for `chunk_id`. Unknown ids are ignored.
    async fn delete(&self, chunk_id: &str) -> Result<(), BackendError>;
}

/// Drop hits without positive similarity, then sort by descending score
/// and chunk id, keeping the first `k`.
pub fn top_k(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.retain(|h| h.score > 0.0);
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    hits
}
