//! Fakes shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use docgraph::backends::Backends;
use docgraph::connector_fs::SourceItem;
use docgraph::docgraph_core::embedding::Embedder;
use docgraph::docgraph_core::error::BackendError;
use docgraph::docgraph_core::generation::{Generator, Prompt};
use docgraph::docgraph_core::graph::memory::InMemoryGraphStore;
use docgraph::docgraph_core::graph::{GraphResult, GraphStore, RelatedConcept, Relationship};
use docgraph::docgraph_core::models::{
    Chunk, CodeExample, Concept, Document, Section, SyncState,
};
use docgraph::docgraph_core::vector::memory::InMemoryVectorStore;

pub const DIMS: usize = 256;

// ─── Embedder ───────────────────────────────────────────────────────

/// Bag-of-words embedder: identical text gives identical vectors and
/// shared words give positive similarity.
#[derive(Default)]
pub struct WordEmbedder {
    calls: AtomicUsize,
    failure: Mutex<Option<BackendError>>,
}

impl WordEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every following call fails with `error`.
    pub fn fail_with(&self, error: BackendError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn recover(&self) {
        *self.failure.lock().unwrap() = None;
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let digest = Sha256::digest(word.to_lowercase().as_bytes());
        let mut bucket = [0u8; 8];
        bucket.copy_from_slice(&digest[..8]);
        vector[(u64::from_be_bytes(bucket) % DIMS as u64) as usize] += 1.0;
    }
    vector
}

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(bag_of_words(text))
    }
}

// ─── Generator ──────────────────────────────────────────────────────

/// Answers with a fixed string and keeps every prompt it was given.
#[derive(Default)]
pub struct RecordingGenerator {
    prompts: Mutex<Vec<Prompt>>,
}

impl RecordingGenerator {
    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn last_prompt(&self) -> Option<Prompt> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, BackendError> {
        self.prompts.lock().unwrap().push(prompt.clone());
        Ok("See [1].".to_string())
    }
}

// ─── Graph store with failing reads ─────────────────────────────────

/// Delegates writes to an in-memory store; concept lookups always fail.
#[derive(Default)]
pub struct ConceptReadsFail {
    pub inner: InMemoryGraphStore,
}

#[async_trait]
impl GraphStore for ConceptReadsFail {
    async fn upsert_document(&self, document: &Document) -> GraphResult<()> {
        self.inner.upsert_document(document).await
    }
    async fn upsert_section(&self, section: &Section) -> GraphResult<()> {
        self.inner.upsert_section(section).await
    }
    async fn upsert_chunk(&self, chunk: &Chunk) -> GraphResult<()> {
        self.inner.upsert_chunk(chunk).await
    }
    async fn upsert_concept(&self, concept: &Concept) -> GraphResult<()> {
        self.inner.upsert_concept(concept).await
    }
    async fn upsert_code_example(&self, example: &CodeExample) -> GraphResult<()> {
        self.inner.upsert_code_example(example).await
    }
    async fn create_relationship(&self, relationship: &Relationship) -> GraphResult<()> {
        self.inner.create_relationship(relationship).await
    }
    async fn delete_document(&self, document_id: &str) -> GraphResult<Vec<String>> {
        self.inner.delete_document(document_id).await
    }
    async fn get_document(&self, id: &str) -> GraphResult<Option<Document>> {
        self.inner.get_document(id).await
    }
    async fn get_documents(&self, ids: &[String]) -> GraphResult<Vec<Document>> {
        self.inner.get_documents(ids).await
    }
    async fn get_chunks(&self, ids: &[String]) -> GraphResult<Vec<Chunk>> {
        self.inner.get_chunks(ids).await
    }
    async fn get_concepts_for_chunks(&self, _chunk_ids: &[String]) -> GraphResult<Vec<Concept>> {
        Err(BackendError::rejected("graph query failed"))
    }
    async fn get_related_concepts(
        &self,
        _concept_id: &str,
        _max_hops: u32,
    ) -> GraphResult<Vec<RelatedConcept>> {
        Err(BackendError::rejected("graph query failed"))
    }
    async fn get_linked_documents(&self, document_id: &str) -> GraphResult<Vec<Document>> {
        self.inner.get_linked_documents(document_id).await
    }
    async fn document_ids_for_source(&self, source: &str) -> GraphResult<Vec<String>> {
        self.inner.document_ids_for_source(source).await
    }
    async fn get_sync_state(&self, source: &str) -> GraphResult<Option<SyncState>> {
        self.inner.get_sync_state(source).await
    }
    async fn set_sync_state(&self, state: &SyncState) -> GraphResult<()> {
        self.inner.set_sync_state(state).await
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

pub struct Harness {
    pub embedder: Arc<WordEmbedder>,
    pub vectors: Arc<InMemoryVectorStore>,
    pub generator: Arc<RecordingGenerator>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            embedder: Arc::new(WordEmbedder::default()),
            vectors: Arc::new(InMemoryVectorStore::new()),
            generator: Arc::new(RecordingGenerator::default()),
        }
    }

    pub fn backends(&self, graph: Arc<dyn GraphStore>) -> Backends {
        Backends::new(
            self.embedder.clone(),
            self.vectors.clone(),
            graph,
            self.generator.clone(),
        )
    }
}

pub fn item(path: &str, content: &str) -> SourceItem {
    SourceItem {
        path: path.to_string(),
        content: content.to_string(),
        modified_at: Utc::now(),
    }
}
