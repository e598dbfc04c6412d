//! GraphRAG retrieval pipeline.
//!
//! One call to [`RetrievalPipeline::query`] runs:
//!
//! 1. reject blank query text (no backend is touched)
//! 2. clamp `max_results` and pick the over-fetch `k`
//! 3. embed the query (cached)
//! 4. vector search for `k` chunks, optionally restricted to one source
//! 5. group by document and rank by promotion-boosted score
//! 6. enrich with mentioned and related concepts from the graph
//! 7. synthesize an answer from the ranked passages
//!
//! An empty search is a normal outcome with confidence `0.0`. Graph
//! enrichment is best effort: any failure other than cancellation is logged
//! and the query continues with vector results only.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use docgraph_core::error::RagError;
use docgraph_core::generation::{ContextPassage, SynthesisRequest};
use docgraph_core::models::Concept;
use docgraph_core::ranking::{clamp_max_results, confidence, over_fetch_k, rank_by_document, RankedHit};

use crate::backends::Backends;
use crate::config::RetrievalConfig;

pub const NO_RESULTS_ANSWER: &str = "No relevant information found in the indexed documentation.";

/// Per-request state. Nothing about a request lives outside this value.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// Restrict retrieval to one source.
    pub source: Option<String>,
    pub cancel: CancellationToken,
}

impl QueryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Result-count hint; clamped, never rejected.
    pub max_results: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub document_id: String,
    pub chunk_id: String,
    pub file_path: String,
    pub title: String,
    /// Raw similarity, before promotion boost.
    pub relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedConceptRef {
    pub id: String,
    pub name: String,
    pub category: Option<String>,
    /// 0 for concepts mentioned by a selected chunk.
    pub hops: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub related_concepts: Vec<RelatedConceptRef>,
    pub confidence: f64,
}

impl QueryResult {
    fn nothing_found() -> Self {
        Self {
            answer: NO_RESULTS_ANSWER.to_string(),
            sources: Vec::new(),
            related_concepts: Vec::new(),
            confidence: 0.0,
        }
    }
}

#[derive(Debug, Default)]
struct Enrichment {
    concepts: Vec<(Concept, u32)>,
}

impl Enrichment {
    fn refs(&self) -> Vec<RelatedConceptRef> {
        self.concepts
            .iter()
            .map(|(c, hops)| RelatedConceptRef {
                id: c.id.clone(),
                name: c.name.clone(),
                category: c.category.clone(),
                hops: *hops,
            })
            .collect()
    }

    fn notes(&self) -> Vec<(String, String)> {
        self.concepts
            .iter()
            .filter_map(|(c, _)| {
                c.description
                    .as_ref()
                    .map(|d| (c.name.clone(), d.clone()))
            })
            .collect()
    }
}

pub struct RetrievalPipeline {
    backends: Arc<Backends>,
    config: RetrievalConfig,
}

impl RetrievalPipeline {
    pub fn new(backends: Arc<Backends>, config: RetrievalConfig) -> Self {
        Self { backends, config }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub async fn query(
        &self,
        ctx: &QueryContext,
        text: &str,
        options: &QueryOptions,
    ) -> Result<QueryResult, RagError> {
        let query = text.trim();
        if query.is_empty() {
            return Err(RagError::EmptyInput("query text is blank".into()));
        }

        let started = Instant::now();
        let cancel = &ctx.cancel;
        let max_results = clamp_max_results(
            options.max_results,
            self.config.default_max_results,
            self.config.max_results_cap,
        );
        let k = over_fetch_k(max_results, self.config.over_fetch_factor);

        let vector = self.backends.embed(cancel, query).await?;
        let hits = self
            .backends
            .search(cancel, &vector, k, ctx.source.as_deref())
            .await?;
        if hits.is_empty() {
            tracing::info!(
                k,
                source = ctx.source.as_deref(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query matched nothing"
            );
            return Ok(QueryResult::nothing_found());
        }

        let ranked = rank_by_document(hits, max_results);

        let enrichment = match self.enrich(cancel, &ranked).await {
            Ok(enrichment) => enrichment,
            Err(RagError::OperationCancelled) => return Err(RagError::OperationCancelled),
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "graph enrichment failed, using vector results only");
                Enrichment::default()
            }
        };

        let request = SynthesisRequest {
            query: query.to_string(),
            passages: ranked
                .iter()
                .map(|r| ContextPassage {
                    title: r.hit.metadata.title.clone(),
                    file_path: r.hit.metadata.file_path.clone(),
                    text: r.hit.metadata.text.clone(),
                })
                .collect(),
            concept_notes: if self.config.include_concept_context {
                enrichment.notes()
            } else {
                Vec::new()
            },
        };
        let answer = self.backends.generate(cancel, &request.to_prompt()).await?;

        let result = QueryResult {
            answer,
            sources: ranked
                .iter()
                .map(|r| SourceRef {
                    document_id: r.hit.metadata.document_id.clone(),
                    chunk_id: r.hit.chunk_id.clone(),
                    file_path: r.hit.metadata.file_path.clone(),
                    title: r.hit.metadata.title.clone(),
                    relevance: r.hit.score,
                })
                .collect(),
            related_concepts: enrichment.refs(),
            confidence: confidence(&ranked, self.config.confidence_scale),
        };

        tracing::info!(
            max_results,
            k,
            sources = result.sources.len(),
            concepts = result.related_concepts.len(),
            confidence = result.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query answered"
        );
        Ok(result)
    }

    /// Concepts mentioned by the ranked chunks (hops 0) plus their
    /// `RELATES_TO` neighbours, each once at its smallest distance,
    /// ordered by hops then name.
    async fn enrich(&self, cancel: &CancellationToken, ranked: &[RankedHit]) -> Result<Enrichment, RagError> {
        let graph = self.backends.graph_store.as_ref();
        let chunk_ids: Vec<String> = ranked.iter().map(|r| r.hit.chunk_id.clone()).collect();
        let ids = chunk_ids.as_slice();

        let mentioned = self
            .backends
            .graph(cancel, move || graph.get_concepts_for_chunks(ids))
            .await?;

        let hops = self.config.concept_hops;
        let neighbours = if hops == 0 {
            Vec::new()
        } else {
            let lookups = mentioned.iter().map(|concept| {
                let id = concept.id.as_str();
                self.backends
                    .graph(cancel, move || graph.get_related_concepts(id, hops))
            });
            futures::future::try_join_all(lookups).await?
        };

        let mut concepts: Vec<(Concept, u32)> = mentioned.iter().cloned().map(|c| (c, 0)).collect();
        for related in neighbours.into_iter().flatten() {
            match concepts.iter_mut().find(|(c, _)| c.id == related.concept.id) {
                Some((_, existing)) => *existing = (*existing).min(related.hops),
                None => concepts.push((related.concept, related.hops)),
            }
        }
        concepts.sort_by(|(a, ah), (b, bh)| ah.cmp(bh).then_with(|| a.name.cmp(&b.name)).then_with(|| a.id.cmp(&b.id)));

        Ok(Enrichment { concepts })
    }
}
