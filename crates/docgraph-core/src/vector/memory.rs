//! In-memory [`VectorStore`] with brute-force cosine search.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::BackendError;

use super::{top_k, VectorHit, VectorMetadata, VectorStore};

struct StoredVector {
    vector: Vec<f32>,
    metadata: VectorMetadata,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<HashMap<String, StoredVector>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, chunk_id: &str) -> bool {
        self.entries
            .read()
            .map(|e| e.contains_key(chunk_id))
            .unwrap_or(false)
    }
}

fn poisoned<T>(_: T) -> BackendError {
    BackendError::rejected("vector store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<VectorHit>, BackendError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.entries.read().map_err(poisoned)?;
        let hits = entries
            .iter()
            .filter(|(_, sv)| source.map_or(true, |s| sv.metadata.source == s))
            .map(|(id, sv)| VectorHit {
                chunk_id: id.clone(),
                score: cosine_similarity(vector, &sv.vector) as f64,
                metadata: sv.metadata.clone(),
            })
            .collect();
        Ok(top_k(hits, k))
    }

    async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        metadata: &VectorMetadata,
    ) -> Result<(), BackendError> {
        self.entries.write().map_err(poisoned)?.insert(
            chunk_id.to_string(),
            StoredVector {
                vector: vector.to_vec(),
                metadata: metadata.clone(),
            },
        );
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<(), BackendError> {
        self.entries.write().map_err(poisoned)?.remove(chunk_id);
        Ok(())
    }
}
