//! Document indexing.
//!
//! Turns one source file into knowledge-graph nodes and edges plus one
//! vector entry per chunk, and keeps a whole source in step with its
//! snapshot via [`SyncState`].
//!
//! ```text
//! raw ──parse──▶ sections ──chunk──▶ chunks ──embed──▶ vector store
//!                   │                  │
//!                   └──── graph: Document, Section, Chunk, Concept,
//!                         CodeExample + HAS_*/MENTIONS/RELATES_TO/LINKS_TO
//! ```
//!
//! Building the node set ([`plan_document`]) is pure; only [`Indexer`]
//! talks to the backends. Re-indexing a file first cascade-deletes the old
//! document and its vectors, then writes the new plan. Ids are stable, so
//! the same content always lands on the same nodes.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use docgraph_core::chunk::{Chunker, ChunkingOptions};
use docgraph_core::error::RagError;
use docgraph_core::graph::{Relationship, RelationshipType};
use docgraph_core::models::{
    child_id, concept_id, content_hash, document_id, Chunk, CodeExample, Concept, Document,
    PromotionLevel, Section, SyncState,
};
use docgraph_core::parse::{parse, Header, ParsedDocument};
use docgraph_core::vector::VectorMetadata;

use crate::backends::Backends;
use crate::connector_fs::{SourceItem, SourceSnapshot};

/// Everything [`Indexer::index_document`] writes for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPlan {
    pub document: Document,
    pub sections: Vec<Section>,
    pub chunks: Vec<Chunk>,
    pub concepts: Vec<Concept>,
    pub code_examples: Vec<CodeExample>,
    pub relationships: Vec<Relationship>,
}

impl DocumentPlan {
    fn links(&self) -> usize {
        self.relationships
            .iter()
            .filter(|r| r.kind == RelationshipType::LinksTo)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexReport {
    pub document_id: String,
    pub title: String,
    pub sections: usize,
    pub chunks: usize,
    pub concepts: usize,
    pub code_examples: usize,
    pub links: usize,
    /// Chunks removed from the previous version of the document.
    pub replaced_chunks: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncReport {
    pub source: String,
    pub version: String,
    /// The stored version already matched; nothing was touched.
    pub skipped: bool,
    pub indexed: usize,
    pub failed: usize,
    pub removed: usize,
    pub chunks: usize,
    /// Whether the new [`SyncState`] was written.
    pub recorded: bool,
}

pub struct Indexer {
    backends: Arc<Backends>,
    chunker: Chunker,
}

impl Indexer {
    pub fn new(backends: Arc<Backends>, options: ChunkingOptions) -> Self {
        Self {
            backends,
            chunker: Chunker::new(options),
        }
    }

    pub fn backends(&self) -> &Arc<Backends> {
        &self.backends
    }

    /// Index (or re-index) one file of `source`.
    pub async fn index_document(
        &self,
        cancel: &CancellationToken,
        source: &str,
        item: &SourceItem,
    ) -> Result<IndexReport, RagError> {
        let plan = plan_document(&self.chunker, source, item);
        let document_id = plan.document.id.as_str();

        let replaced_chunks = self.remove_document(cancel, document_id).await?;
        self.write_graph(cancel, &plan).await?;
        self.write_vectors(cancel, &plan).await?;

        let report = IndexReport {
            document_id: plan.document.id.clone(),
            title: plan.document.title.clone(),
            sections: plan.sections.len(),
            chunks: plan.chunks.len(),
            concepts: plan.concepts.len(),
            code_examples: plan.code_examples.len(),
            links: plan.links(),
            replaced_chunks,
        };
        tracing::debug!(
            source,
            path = %item.path,
            document_id = %report.document_id,
            chunks = report.chunks,
            concepts = report.concepts,
            "indexed document"
        );
        Ok(report)
    }

    /// Cascade-delete a document and drop its vectors. Returns the number of
    /// chunks removed; unknown ids remove nothing.
    pub async fn remove_document(
        &self,
        cancel: &CancellationToken,
        document_id: &str,
    ) -> Result<usize, RagError> {
        let graph = self.backends.graph_store.as_ref();
        let chunk_ids = self
            .backends
            .graph(cancel, move || graph.delete_document(document_id))
            .await?;
        for chunk_id in &chunk_ids {
            self.backends.delete_vector(cancel, chunk_id).await?;
        }
        Ok(chunk_ids.len())
    }

    /// Bring the index in line with `snapshot`.
    ///
    /// Skips the source when its stored version matches. Otherwise every
    /// item is re-indexed, documents that disappeared are removed, and the
    /// new version is recorded only if every item succeeded, so a partial
    /// sync is retried next time.
    pub async fn sync_source(
        &self,
        cancel: &CancellationToken,
        snapshot: &SourceSnapshot,
    ) -> Result<SyncReport, RagError> {
        let started = Instant::now();
        let graph = self.backends.graph_store.as_ref();
        let source = snapshot.name.as_str();

        let mut report = SyncReport {
            source: snapshot.name.clone(),
            version: snapshot.version.clone(),
            ..Default::default()
        };

        let previous = self
            .backends
            .graph(cancel, move || graph.get_sync_state(source))
            .await?;
        if previous.is_some_and(|state| state.version == snapshot.version) {
            tracing::info!(source, version = %snapshot.version, "source unchanged, skipping");
            report.skipped = true;
            return Ok(report);
        }

        let mut present = HashSet::new();
        for item in &snapshot.items {
            present.insert(document_id(source, &item.path));
            match self.index_document(cancel, source, item).await {
                Ok(indexed) => {
                    report.indexed += 1;
                    report.chunks += indexed.chunks;
                }
                Err(RagError::OperationCancelled) => return Err(RagError::OperationCancelled),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(source, path = %item.path, code = e.code(), error = %e, "failed to index document");
                }
            }
        }

        let known = self
            .backends
            .graph(cancel, move || graph.document_ids_for_source(source))
            .await?;
        for stale in known.iter().filter(|id| !present.contains(*id)) {
            match self.remove_document(cancel, stale).await {
                Ok(_) => report.removed += 1,
                Err(RagError::OperationCancelled) => return Err(RagError::OperationCancelled),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(source, document_id = %stale, error = %e, "failed to remove document");
                }
            }
        }

        if report.failed == 0 {
            let state = SyncState {
                source: snapshot.name.clone(),
                version: snapshot.version.clone(),
                synced_at: Utc::now(),
            };
            let state = &state;
            self.backends
                .graph(cancel, move || graph.set_sync_state(state))
                .await?;
            report.recorded = true;
        } else {
            tracing::warn!(source, failed = report.failed, "sync incomplete, state not advanced");
        }

        tracing::info!(
            source,
            indexed = report.indexed,
            removed = report.removed,
            failed = report.failed,
            chunks = report.chunks,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "source synced"
        );
        Ok(report)
    }

    async fn write_graph(&self, cancel: &CancellationToken, plan: &DocumentPlan) -> Result<(), RagError> {
        let backends = self.backends.as_ref();
        let graph = backends.graph_store.as_ref();

        let document = &plan.document;
        backends.graph(cancel, move || graph.upsert_document(document)).await?;
        for section in &plan.sections {
            backends.graph(cancel, move || graph.upsert_section(section)).await?;
        }
        for chunk in &plan.chunks {
            backends.graph(cancel, move || graph.upsert_chunk(chunk)).await?;
        }
        for concept in &plan.concepts {
            backends.graph(cancel, move || graph.upsert_concept(concept)).await?;
        }
        for example in &plan.code_examples {
            backends
                .graph(cancel, move || graph.upsert_code_example(example))
                .await?;
        }
        for relationship in &plan.relationships {
            backends
                .graph(cancel, move || graph.create_relationship(relationship))
                .await?;
        }
        Ok(())
    }

    async fn write_vectors(&self, cancel: &CancellationToken, plan: &DocumentPlan) -> Result<(), RagError> {
        let document = &plan.document;
        for chunk in &plan.chunks {
            let title = plan
                .sections
                .iter()
                .find(|s| s.id == chunk.section_id)
                .map(|s| s.title.as_str())
                .filter(|t| !t.is_empty())
                .unwrap_or(&document.title);
            let metadata = VectorMetadata {
                document_id: document.id.clone(),
                section_id: chunk.section_id.clone(),
                source: document.source.clone(),
                file_path: document.file_path.clone(),
                title: title.to_string(),
                promotion: document.promotion,
                text: chunk.content.clone(),
            };
            let vector = self.backends.embed(cancel, &chunk.content).await?;
            self.backends
                .upsert_vector(cancel, &chunk.id, &vector, &metadata)
                .await?;
        }
        Ok(())
    }
}

/// Build the full node and edge set for one file without touching any
/// backend.
pub fn plan_document(chunker: &Chunker, source: &str, item: &SourceItem) -> DocumentPlan {
    let parsed = parse(&item.content);
    if !parsed.success {
        tracing::warn!(
            source,
            path = %item.path,
            error = parsed.error.as_deref().unwrap_or_default(),
            "front matter unreadable, indexing raw text"
        );
    }

    let document = build_document(source, item, &parsed);
    let doc_id = document.id.clone();
    let body = parsed.body.as_str();
    let starts = line_starts(body);

    let mut sections = Vec::new();
    let mut chunks = Vec::new();
    let mut relationships = Vec::new();

    for (order, span) in section_spans(body, &starts, &parsed.headers).into_iter().enumerate() {
        let section = Section {
            id: child_id(&doc_id, "section", order),
            document_id: doc_id.clone(),
            title: span.title,
            order,
            level: span.level,
        };
        relationships.push(
            Relationship::new(RelationshipType::HasSection, &doc_id, &section.id)
                .with_properties(json!({ "order": order })),
        );

        let text = &body[span.start..span.end];
        if !text.trim().is_empty() {
            for piece in chunker.chunk(text) {
                let chunk = Chunk {
                    id: child_id(&section.id, "chunk", piece.index),
                    section_id: section.id.clone(),
                    document_id: doc_id.clone(),
                    order: piece.index,
                    char_count: piece.content.chars().count(),
                    start_offset: span.start + piece.start_offset,
                    end_offset: span.start + piece.end_offset,
                    hash: content_hash(&piece.content),
                    content: piece.content,
                };
                relationships.push(Relationship::new(
                    RelationshipType::HasChunk,
                    &section.id,
                    &chunk.id,
                ));
                chunks.push(chunk);
            }
        }
        sections.push(section);
    }

    let mut code_examples: Vec<CodeExample> = Vec::new();
    for block in &parsed.code_blocks {
        let fence = starts.get(block.start_line).copied().unwrap_or(body.len());
        let Some(chunk) = chunks
            .iter()
            .find(|c| c.start_offset <= fence && fence < c.end_offset)
        else {
            continue;
        };
        let index = code_examples
            .iter()
            .filter(|e| e.chunk_id == chunk.id)
            .count();
        let description = sections
            .iter()
            .find(|s| s.id == chunk.section_id)
            .map(|s| s.title.clone())
            .filter(|t| !t.is_empty());
        let example = CodeExample {
            id: child_id(&chunk.id, "code", index),
            chunk_id: chunk.id.clone(),
            language: block.language.clone(),
            code: block.code.clone(),
            description,
        };
        relationships.push(Relationship::new(
            RelationshipType::HasCodeExample,
            &chunk.id,
            &example.id,
        ));
        code_examples.push(example);
    }

    let declared = declared_concepts(&parsed);
    let mut concepts: Vec<Concept> = declared.iter().map(|d| d.concept.clone()).collect();

    for chunk in &chunks {
        let haystack = chunk.content.to_lowercase();
        for decl in &declared {
            if decl.mentioned_in(&haystack) {
                relationships.push(Relationship::new(
                    RelationshipType::Mentions,
                    &chunk.id,
                    &decl.concept.id,
                ));
            }
        }
    }

    for decl in &declared {
        for name in &decl.related {
            let related = Concept::named(name);
            if related.id == decl.concept.id || is_blank_slug(&related.id) {
                continue;
            }
            relationships.push(Relationship::new(
                RelationshipType::RelatesTo,
                &decl.concept.id,
                &related.id,
            ));
            if !concepts.iter().any(|c| c.id == related.id) {
                concepts.push(related);
            }
        }
    }

    let mut linked = HashSet::new();
    for link in &parsed.links {
        let Some(target_path) = resolve_link(&item.path, &link.target) else {
            continue;
        };
        let target_id = document_id(source, &target_path);
        if target_id == doc_id || !linked.insert(target_id.clone()) {
            continue;
        }
        relationships.push(
            Relationship::new(RelationshipType::LinksTo, &doc_id, &target_id)
                .with_properties(json!({ "text": link.text, "path": target_path })),
        );
    }

    DocumentPlan {
        document,
        sections,
        chunks,
        concepts,
        code_examples,
        relationships,
    }
}

fn build_document(source: &str, item: &SourceItem, parsed: &ParsedDocument) -> Document {
    let title = if parsed.title.is_empty() {
        Path::new(&item.path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| item.path.clone())
    } else {
        parsed.title.clone()
    };

    let mut metadata: Map<String, Value> = parsed.frontmatter.clone().unwrap_or_default();
    if let Some(error) = &parsed.error {
        metadata.insert("parse_error".into(), Value::String(error.clone()));
    }

    Document {
        id: document_id(source, &item.path),
        source: source.to_string(),
        file_path: item.path.clone(),
        title,
        doc_type: parsed
            .field_str("type")
            .or_else(|| parsed.field_str("doc_type"))
            .map(str::to_string),
        promotion: PromotionLevel::from_lenient(parsed.field_str("promotion")),
        updated_at: item.modified_at,
        version: Some(content_hash(&item.content)),
        metadata: Value::Object(metadata),
    }
}

struct SectionSpan {
    title: String,
    level: u8,
    /// Byte range of the section text, heading line excluded.
    start: usize,
    end: usize,
}

/// Byte offset of the start of every line; a trailing newline yields a
/// final entry equal to `body.len()`.
fn line_starts(body: &str) -> Vec<usize> {
    std::iter::once(0)
        .chain(body.match_indices('\n').map(|(i, _)| i + 1))
        .collect()
}

fn section_spans(body: &str, starts: &[usize], headers: &[Header]) -> Vec<SectionSpan> {
    let line_offset = |line: usize| starts.get(line).copied().unwrap_or(body.len());
    let mut spans = Vec::with_capacity(headers.len() + 1);

    let preamble_end = headers.first().map_or(body.len(), |h| line_offset(h.line));
    if !body[..preamble_end].trim().is_empty() {
        spans.push(SectionSpan {
            title: String::new(),
            level: 1,
            start: 0,
            end: preamble_end,
        });
    }

    for (i, header) in headers.iter().enumerate() {
        let end = headers
            .get(i + 1)
            .map_or(body.len(), |next| line_offset(next.line));
        let start = line_offset(header.line + 1).min(end);
        spans.push(SectionSpan {
            title: header.text.clone(),
            level: header.level,
            start,
            end,
        });
    }
    spans
}

struct DeclaredConcept {
    concept: Concept,
    related: Vec<String>,
}

impl DeclaredConcept {
    /// `haystack` must already be lowercase.
    fn mentioned_in(&self, haystack: &str) -> bool {
        std::iter::once(&self.concept.name)
            .chain(&self.concept.aliases)
            .map(|term| term.trim().to_lowercase())
            .any(|term| !term.is_empty() && haystack.contains(&term))
    }
}

/// Concepts declared under front matter `concepts` or `tags`, either as
/// plain names or as `{name, aliases, category, description, related}`.
fn declared_concepts(parsed: &ParsedDocument) -> Vec<DeclaredConcept> {
    let mut out: Vec<DeclaredConcept> = Vec::new();
    for key in ["concepts", "tags"] {
        let items = match parsed.field(key) {
            Some(Value::Array(items)) => items.as_slice(),
            Some(single @ Value::String(_)) => std::slice::from_ref(single),
            _ => continue,
        };
        for item in items {
            let Some(decl) = declared_concept(item) else {
                continue;
            };
            if !out.iter().any(|d| d.concept.id == decl.concept.id) {
                out.push(decl);
            }
        }
    }
    out
}

fn declared_concept(value: &Value) -> Option<DeclaredConcept> {
    let decl = match value {
        Value::String(name) => DeclaredConcept {
            concept: Concept::named(name),
            related: Vec::new(),
        },
        Value::Object(map) => {
            let name = map.get("name").and_then(Value::as_str)?;
            let text = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            DeclaredConcept {
                concept: Concept {
                    aliases: string_list(map.get("aliases")),
                    category: text("category"),
                    description: text("description"),
                    ..Concept::named(name)
                },
                related: string_list(map.get("related")),
            }
        }
        _ => return None,
    };
    if is_blank_slug(&decl.concept.id) {
        return None;
    }
    Some(decl)
}

fn is_blank_slug(id: &str) -> bool {
    id == concept_id("")
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let strings = match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => vec![s.as_str()],
        _ => Vec::new(),
    };
    strings
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Resolve a relative link against the linking file's directory.
///
/// Anchors and query strings are dropped. Returns `None` for pure anchors
/// and for paths that climb above the source root.
fn resolve_link(from_path: &str, target: &str) -> Option<String> {
    let target = target.split(['#', '?']).next().unwrap_or_default();
    if target.is_empty() {
        return None;
    }

    let mut parts: Vec<&str> = match (target.starts_with('/'), from_path.rsplit_once('/')) {
        (true, _) | (false, None) => Vec::new(),
        (false, Some((dir, _))) => dir.split('/').filter(|s| !s.is_empty()).collect(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
