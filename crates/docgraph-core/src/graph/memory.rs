//! In-memory [`GraphStore`] for tests and embedded use.
//!
//! An arena of nodes keyed by id plus an edge map keyed by
//! `(type, source, target)`, all behind one `std::sync::RwLock`.
//! Traversal is breadth-first over the edge map.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::error::BackendError;
use crate::models::{Chunk, CodeExample, Concept, Document, Section, SyncState};

use super::{GraphResult, GraphStore, RelatedConcept, Relationship, RelationshipType};

type EdgeKey = (RelationshipType, String, String);

#[derive(Default)]
struct GraphData {
    documents: HashMap<String, Document>,
    sections: HashMap<String, Section>,
    chunks: HashMap<String, Chunk>,
    concepts: HashMap<String, Concept>,
    code_examples: HashMap<String, CodeExample>,
    edges: HashMap<EdgeKey, serde_json::Value>,
    sync_states: HashMap<String, SyncState>,
}

impl GraphData {
    fn targets(&self, kind: RelationshipType, source_id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .edges
            .keys()
            .filter(|(k, s, _)| *k == kind && s == source_id)
            .map(|(_, _, t)| t.clone())
            .collect();
        out.sort();
        out
    }
}

/// In-memory knowledge graph.
#[derive(Default)]
pub struct InMemoryGraphStore {
    data: RwLock<GraphData>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `(type, source, target)` edges currently stored.
    pub fn edge_count(&self) -> usize {
        self.read().map(|d| d.edges.len()).unwrap_or(0)
    }

    pub fn concept_count(&self) -> usize {
        self.read().map(|d| d.concepts.len()).unwrap_or(0)
    }

    pub fn chunk_count(&self) -> usize {
        self.read().map(|d| d.chunks.len()).unwrap_or(0)
    }

    pub fn concept(&self, id: &str) -> Option<Concept> {
        self.read().ok().and_then(|d| d.concepts.get(id).cloned())
    }

    fn read(&self) -> GraphResult<RwLockReadGuard<'_, GraphData>> {
        self.data
            .read()
            .map_err(|_| BackendError::rejected("graph store lock poisoned"))
    }

    fn write(&self) -> GraphResult<RwLockWriteGuard<'_, GraphData>> {
        self.data
            .write()
            .map_err(|_| BackendError::rejected("graph store lock poisoned"))
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_document(&self, document: &Document) -> GraphResult<()> {
        self.write()?
            .documents
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn upsert_section(&self, section: &Section) -> GraphResult<()> {
        self.write()?
            .sections
            .insert(section.id.clone(), section.clone());
        Ok(())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> GraphResult<()> {
        self.write()?.chunks.insert(chunk.id.clone(), chunk.clone());
        Ok(())
    }

    async fn upsert_concept(&self, concept: &Concept) -> GraphResult<()> {
        let mut data = self.write()?;
        let merged = match data.concepts.get(&concept.id) {
            Some(existing) => Concept {
                aliases: if concept.aliases.is_empty() {
                    existing.aliases.clone()
                } else {
                    concept.aliases.clone()
                },
                category: concept.category.clone().or_else(|| existing.category.clone()),
                description: concept
                    .description
                    .clone()
                    .or_else(|| existing.description.clone()),
                ..concept.clone()
            },
            None => concept.clone(),
        };
        data.concepts.insert(concept.id.clone(), merged);
        Ok(())
    }

    async fn upsert_code_example(&self, example: &CodeExample) -> GraphResult<()> {
        self.write()?
            .code_examples
            .insert(example.id.clone(), example.clone());
        Ok(())
    }

    async fn create_relationship(&self, relationship: &Relationship) -> GraphResult<()> {
        let key = (
            relationship.kind,
            relationship.source_id.clone(),
            relationship.target_id.clone(),
        );
        self.write()?
            .edges
            .insert(key, relationship.properties.clone());
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> GraphResult<Vec<String>> {
        let mut data = self.write()?;

        let section_ids: HashSet<String> = data
            .sections
            .values()
            .filter(|s| s.document_id == document_id)
            .map(|s| s.id.clone())
            .collect();
        let mut chunk_ids: Vec<String> = data
            .chunks
            .values()
            .filter(|c| c.document_id == document_id || section_ids.contains(&c.section_id))
            .map(|c| c.id.clone())
            .collect();
        chunk_ids.sort();
        let chunk_set: HashSet<&String> = chunk_ids.iter().collect();
        let example_ids: HashSet<String> = data
            .code_examples
            .values()
            .filter(|e| chunk_set.contains(&e.chunk_id))
            .map(|e| e.id.clone())
            .collect();

        let mut removed: HashSet<String> = HashSet::new();
        removed.insert(document_id.to_string());
        removed.extend(section_ids.iter().cloned());
        removed.extend(chunk_ids.iter().cloned());
        removed.extend(example_ids.iter().cloned());

        data.documents.remove(document_id);
        data.sections.retain(|id, _| !section_ids.contains(id));
        data.chunks.retain(|id, _| !chunk_set.contains(id));
        data.code_examples.retain(|id, _| !example_ids.contains(id));
        // Inbound links from other documents outlive a re-index of their target.
        data.edges.retain(|(kind, s, t), _| {
            !removed.contains(s) && (*kind == RelationshipType::LinksTo || !removed.contains(t))
        });

        Ok(chunk_ids)
    }

    async fn get_document(&self, id: &str) -> GraphResult<Option<Document>> {
        Ok(self.read()?.documents.get(id).cloned())
    }

    async fn get_documents(&self, ids: &[String]) -> GraphResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| data.documents.get(id).cloned())
            .collect())
    }

    async fn get_chunks(&self, ids: &[String]) -> GraphResult<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| data.chunks.get(id).cloned())
            .collect())
    }

    async fn get_concepts_for_chunks(&self, chunk_ids: &[String]) -> GraphResult<Vec<Concept>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let data = self.read()?;
        let wanted: HashSet<&String> = chunk_ids.iter().collect();
        let concept_ids: HashSet<&String> = data
            .edges
            .keys()
            .filter(|(k, s, _)| *k == RelationshipType::Mentions && wanted.contains(s))
            .map(|(_, _, t)| t)
            .collect();
        let mut concepts: Vec<Concept> = concept_ids
            .into_iter()
            .filter_map(|id| data.concepts.get(id).cloned())
            .collect();
        concepts.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(concepts)
    }

    async fn get_related_concepts(
        &self,
        concept_id: &str,
        max_hops: u32,
    ) -> GraphResult<Vec<RelatedConcept>> {
        if max_hops == 0 {
            return Ok(Vec::new());
        }
        let data = self.read()?;

        let mut neighbours: HashMap<&str, Vec<&str>> = HashMap::new();
        for (kind, s, t) in data.edges.keys() {
            if *kind == RelationshipType::RelatesTo {
                neighbours.entry(s.as_str()).or_default().push(t.as_str());
                neighbours.entry(t.as_str()).or_default().push(s.as_str());
            }
        }

        let mut seen: HashMap<&str, u32> = HashMap::new();
        seen.insert(concept_id, 0);
        let mut queue: VecDeque<(&str, u32)> = VecDeque::from([(concept_id, 0)]);
        while let Some((id, depth)) = queue.pop_front() {
            if depth == max_hops {
                continue;
            }
            for &next in neighbours.get(id).into_iter().flatten() {
                if !seen.contains_key(next) {
                    seen.insert(next, depth + 1);
                    queue.push_back((next, depth + 1));
                }
            }
        }

        let mut related: Vec<RelatedConcept> = seen
            .into_iter()
            .filter(|(id, _)| *id != concept_id)
            .filter_map(|(id, hops)| {
                data.concepts.get(id).map(|c| RelatedConcept {
                    concept: c.clone(),
                    hops,
                })
            })
            .collect();
        related.sort_by(|a, b| a.hops.cmp(&b.hops).then(a.concept.name.cmp(&b.concept.name)));
        Ok(related)
    }

    async fn get_linked_documents(&self, document_id: &str) -> GraphResult<Vec<Document>> {
        let data = self.read()?;
        let mut docs: Vec<Document> = data
            .targets(RelationshipType::LinksTo, document_id)
            .iter()
            .filter_map(|id| data.documents.get(id).cloned())
            .collect();
        docs.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(docs)
    }

    async fn document_ids_for_source(&self, source: &str) -> GraphResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .read()?
            .documents
            .values()
            .filter(|d| d.source == source)
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_sync_state(&self, source: &str) -> GraphResult<Option<SyncState>> {
        Ok(self.read()?.sync_states.get(source).cloned())
    }

    async fn set_sync_state(&self, state: &SyncState) -> GraphResult<()> {
        self.write()?
            .sync_states
            .insert(state.source.clone(), state.clone());
        Ok(())
    }
}
