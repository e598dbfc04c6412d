//! Knowledge graph repository contract.
//!
//! The [`GraphStore`] trait is the only way the indexer and the retrieval
//! pipeline touch the graph, so any property-graph backend can sit behind
//! it. Nodes are addressed by stable string ids and edges are plain
//! `(type, source_id, target_id)` triples.
//!
//! # Contract
//!
//! | Method | Guarantee |
//! |--------|-----------|
//! | `upsert_*` | Idempotent by id: repeated calls update, never duplicate |
//! | [`create_relationship`](GraphStore::create_relationship) | Idempotent per `(type, source, target)` |
//! | [`delete_document`](GraphStore::delete_document) | Removes the document, its sections, chunks, and code examples; never concepts |
//! | `get_*(ids)` | Empty id list returns empty without touching the backend |
//! | reads | Missing optional properties map to defaults, never errors |

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BackendError;
use crate::models::{Chunk, CodeExample, Concept, Document, Section, SyncState};

pub type GraphResult<T> = Result<T, BackendError>;

/// Edge types of the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    /// Document → Section
    HasSection,
    /// Section → Chunk
    HasChunk,
    /// Chunk → CodeExample
    HasCodeExample,
    /// Chunk → Concept
    Mentions,
    /// Concept → Concept
    RelatesTo,
    /// Document → Document
    LinksTo,
}

impl RelationshipType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HasSection => "HAS_SECTION",
            Self::HasChunk => "HAS_CHUNK",
            Self::HasCodeExample => "HAS_CODE_EXAMPLE",
            Self::Mentions => "MENTIONS",
            Self::RelatesTo => "RELATES_TO",
            Self::LinksTo => "LINKS_TO",
        }
    }
}

impl FromStr for RelationshipType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HAS_SECTION" => Ok(Self::HasSection),
            "HAS_CHUNK" => Ok(Self::HasChunk),
            "HAS_CODE_EXAMPLE" => Ok(Self::HasCodeExample),
            "MENTIONS" => Ok(Self::Mentions),
            "RELATES_TO" => Ok(Self::RelatesTo),
            "LINKS_TO" => Ok(Self::LinksTo),
            other => Err(format!("unknown relationship type: {}", other)),
        }
    }
}

impl fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed edge between two nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub kind: RelationshipType,
    pub source_id: String,
    pub target_id: String,
    pub properties: serde_json::Value,
}

impl Relationship {
    pub fn new(kind: RelationshipType, source_id: &str, target_id: &str) -> Self {
        Self {
            kind,
            source_id: source_id.to_string(),
            target_id: target_id.to_string(),
            properties: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_properties(mut self, properties: serde_json::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// A concept reached by traversal, with its minimum hop distance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedConcept {
    pub concept: Concept,
    pub hops: u32,
}

/// Storage backend for the knowledge graph.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn upsert_document(&self, document: &Document) -> GraphResult<()>;

    async fn upsert_section(&self, section: &Section) -> GraphResult<()>;

    async fn upsert_chunk(&self, chunk: &Chunk) -> GraphResult<()>;

    /// Insert or update a concept. Empty aliases and absent category or
    /// description keep whatever the stored concept already has, so a bare
    /// name reference never erases a fuller declaration.
    async fn upsert_concept(&self, concept: &Concept) -> GraphResult<()>;

    async fn upsert_code_example(&self, example: &CodeExample) -> GraphResult<()>;

    /// Create an edge, or update its properties if it already exists.
    async fn create_relationship(&self, relationship: &Relationship) -> GraphResult<()>;

    /// Cascade-delete a document and everything it owns.
    ///
    /// Returns the ids of the removed chunks so callers can drop their
    /// vector entries. Concepts survive, and so do `LINKS_TO` edges from other
    /// documents, which resolve again once the document is re-indexed.
    /// Deleting an unknown id is not an error.
    async fn delete_document(&self, document_id: &str) -> GraphResult<Vec<String>>;

    async fn get_document(&self, id: &str) -> GraphResult<Option<Document>>;

    /// Documents for the given ids; unknown ids are skipped.
    async fn get_documents(&self, ids: &[String]) -> GraphResult<Vec<Document>>;

    /// Chunks for the given ids, in request order; unknown ids are skipped.
    async fn get_chunks(&self, ids: &[String]) -> GraphResult<Vec<Chunk>>;

    /// Distinct concepts mentioned by any of the given chunks.
    async fn get_concepts_for_chunks(&self, chunk_ids: &[String]) -> GraphResult<Vec<Concept>>;

    /// Concepts within `max_hops` `RELATES_TO` steps (either direction),
    /// excluding the start concept, ordered by hops then name.
    async fn get_related_concepts(
        &self,
        concept_id: &str,
        max_hops: u32,
    ) -> GraphResult<Vec<RelatedConcept>>;

    /// Existing documents this document links to.
    async fn get_linked_documents(&self, document_id: &str) -> GraphResult<Vec<Document>>;

    async fn document_ids_for_source(&self, source: &str) -> GraphResult<Vec<String>>;

    async fn get_sync_state(&self, source: &str) -> GraphResult<Option<SyncState>>;

    async fn set_sync_state(&self, state: &SyncState) -> GraphResult<()>;
}
