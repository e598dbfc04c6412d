//! Retrieval pipeline behaviour over in-memory stores.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use docgraph::backends::Backends;
use docgraph::cache::EmbeddingCache;
use docgraph::config::{CacheConfig, RetrievalConfig};
use docgraph::docgraph_core::chunk::ChunkingOptions;
use docgraph::docgraph_core::error::{BackendError, RagError};
use docgraph::docgraph_core::generation::{Generator, Prompt};
use docgraph::docgraph_core::graph::memory::InMemoryGraphStore;
use docgraph::docgraph_core::graph::GraphStore;
use docgraph::docgraph_core::models::document_id;
use docgraph::indexer::Indexer;
use docgraph::pipeline::{QueryContext, QueryOptions, RetrievalPipeline, NO_RESULTS_ANSWER};

use common::{item, ConceptReadsFail, Harness};

const DEPLOY_STANDARD: &str = "---
title: Deploy guide
---
Deploying the service uses a blue green rollout.
";

const DEPLOY_PINNED: &str = "---
title: Deploy runbook
promotion: pinned
---
Deploying the service uses a blue green rollout.
";

const BREAKER: &str = "---
title: Resilience
concepts:
  - name: Circuit Breaker
    category: pattern
    description: Stops calling a failing backend.
    related: [Backoff]
---
# Breakers

The circuit breaker trips after five failures.
";

const BACKOFF: &str = "---
title: Backoff
concepts:
  - name: Backoff
    description: Waits longer between retries.
    related: [Jitter]
---
Backoff doubles the delay between attempts.
";

async fn index(backends: &Arc<Backends>, source: &str, files: &[(&str, &str)]) {
    let indexer = Indexer::new(backends.clone(), ChunkingOptions::default());
    let cancel = CancellationToken::new();
    for (path, content) in files {
        indexer
            .index_document(&cancel, source, &item(path, content))
            .await
            .unwrap();
    }
}

fn pipeline(backends: &Arc<Backends>) -> RetrievalPipeline {
    RetrievalPipeline::new(backends.clone(), RetrievalConfig::default())
}

fn in_memory(harness: &Harness) -> Arc<Backends> {
    Arc::new(harness.backends(Arc::new(InMemoryGraphStore::new())))
}

#[tokio::test]
async fn test_empty_index_returns_nothing_found() {
    let harness = Harness::new();
    let backends = in_memory(&harness);

    let result = pipeline(&backends)
        .query(&QueryContext::new(), "How is X configured?", &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.answer, NO_RESULTS_ANSWER);
    assert!(result.sources.is_empty());
    assert!(result.related_concepts.is_empty());
    assert_eq!(result.confidence, 0.0);
    assert_eq!(harness.generator.calls(), 0);
}

#[tokio::test]
async fn test_unrelated_query_matches_nothing() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(&backends, "docs", &[("deploy.md", DEPLOY_STANDARD)]).await;

    let result = pipeline(&backends)
        .query(&QueryContext::new(), "How is Zorblax configured?", &QueryOptions::default())
        .await
        .unwrap();

    assert!(result.sources.is_empty());
    assert_eq!(result.confidence, 0.0);
}

#[tokio::test]
async fn test_blank_query_is_rejected_before_any_call() {
    let harness = Harness::new();
    let backends = in_memory(&harness);

    let err = pipeline(&backends)
        .query(&QueryContext::new(), "  \n\t", &QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::EmptyInput(_)));
    assert_eq!(err.code(), "E_EMPTY_INPUT");
    assert_eq!(harness.embedder.calls(), 0);
}

#[tokio::test]
async fn test_pinned_document_outranks_equal_standard() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(
        &backends,
        "docs",
        &[("standard.md", DEPLOY_STANDARD), ("pinned.md", DEPLOY_PINNED)],
    )
    .await;

    let result = pipeline(&backends)
        .query(
            &QueryContext::new(),
            "Deploying the service uses a blue green rollout.",
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.sources.len(), 2);
    assert_eq!(result.sources[0].file_path, "pinned.md");
    assert_eq!(result.sources[1].file_path, "standard.md");
    // relevance is reported before the boost
    assert_eq!(result.sources[0].relevance, result.sources[1].relevance);
    assert!(result.sources[0].relevance <= 1.0);
    assert!(result.confidence > 0.0 && result.confidence <= 1.0);
    assert_eq!(result.answer, "See [1].");

    let prompt = harness.generator.last_prompt().unwrap();
    assert!(prompt.user.contains("[1] Deploy runbook (pinned.md)"));
    assert!(prompt.user.contains("[2] Deploy guide (standard.md)"));
}

#[tokio::test]
async fn test_max_results_is_clamped() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(
        &backends,
        "docs",
        &[("standard.md", DEPLOY_STANDARD), ("pinned.md", DEPLOY_PINNED)],
    )
    .await;
    let pipeline = pipeline(&backends);
    let ctx = QueryContext::new();

    let one = pipeline
        .query(&ctx, "blue green rollout", &QueryOptions { max_results: Some(0) })
        .await
        .unwrap();
    assert_eq!(one.sources.len(), 1);

    let all = pipeline
        .query(&ctx, "blue green rollout", &QueryOptions { max_results: Some(10_000) })
        .await
        .unwrap();
    assert_eq!(all.sources.len(), 2);
}

#[tokio::test]
async fn test_source_restriction() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(&backends, "docs", &[("deploy.md", DEPLOY_STANDARD)]).await;
    index(&backends, "wiki", &[("deploy.md", DEPLOY_PINNED)]).await;

    let result = pipeline(&backends)
        .query(
            &QueryContext::new().with_source("docs"),
            "blue green rollout",
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.sources.len(), 1);
    assert_eq!(result.sources[0].document_id, document_id("docs", "deploy.md"));
}

#[tokio::test]
async fn test_related_concepts_are_reported_by_hops() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(
        &backends,
        "docs",
        &[("resilience.md", BREAKER), ("backoff.md", BACKOFF)],
    )
    .await;

    let result = pipeline(&backends)
        .query(
            &QueryContext::new(),
            "When does the circuit breaker trip?",
            &QueryOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.sources[0].file_path, "resilience.md");
    let concepts: Vec<(&str, u32)> = result
        .related_concepts
        .iter()
        .map(|c| (c.name.as_str(), c.hops))
        .collect();
    assert_eq!(
        concepts,
        vec![("Backoff", 0), ("Circuit Breaker", 0), ("Jitter", 1)]
    );
    assert_eq!(result.related_concepts[1].category.as_deref(), Some("pattern"));

    let prompt = harness.generator.last_prompt().unwrap();
    assert!(prompt.user.contains("Related concepts:"));
    assert!(prompt.user.contains("- Circuit Breaker: Stops calling a failing backend."));
}

#[tokio::test]
async fn test_concept_context_can_be_disabled() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(&backends, "docs", &[("resilience.md", BREAKER)]).await;

    let config = RetrievalConfig {
        include_concept_context: false,
        ..RetrievalConfig::default()
    };
    let result = RetrievalPipeline::new(backends.clone(), config)
        .query(&QueryContext::new(), "circuit breaker", &QueryOptions::default())
        .await
        .unwrap();

    assert!(!result.related_concepts.is_empty());
    let prompt = harness.generator.last_prompt().unwrap();
    assert!(!prompt.user.contains("Related concepts:"));
}

#[tokio::test]
async fn test_graph_failure_degrades_to_vector_results() {
    let harness = Harness::new();
    let graph: Arc<dyn GraphStore> = Arc::new(ConceptReadsFail::default());
    let backends = Arc::new(harness.backends(graph));
    index(&backends, "docs", &[("resilience.md", BREAKER)]).await;

    let result = pipeline(&backends)
        .query(&QueryContext::new(), "circuit breaker", &QueryOptions::default())
        .await
        .unwrap();

    assert_eq!(result.sources.len(), 1);
    assert!(result.related_concepts.is_empty());
    assert_eq!(harness.generator.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_query_is_reported_distinctly() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(&backends, "docs", &[("deploy.md", DEPLOY_STANDARD)]).await;
    let embeds_before = harness.embedder.calls();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = pipeline(&backends)
        .query(
            &QueryContext::new().with_cancel(cancel),
            "blue green rollout",
            &QueryOptions::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err, RagError::OperationCancelled);
    assert_eq!(err.code(), "E_CANCELLED");
    assert_eq!(harness.embedder.calls(), embeds_before);
}

#[tokio::test]
async fn test_rejected_embedding_fails_query() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    index(&backends, "docs", &[("deploy.md", DEPLOY_STANDARD)]).await;
    harness
        .embedder
        .fail_with(BackendError::rejected("HTTP 400: bad input"));
    let before = harness.embedder.calls();

    let err = pipeline(&backends)
        .query(&QueryContext::new(), "blue green rollout", &QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::EmbeddingFailed(_)));
    assert_eq!(harness.embedder.calls(), before + 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_embedding_exhausts_retries() {
    let harness = Harness::new();
    let backends = in_memory(&harness);
    harness
        .embedder
        .fail_with(BackendError::transient("connection reset"));

    let err = pipeline(&backends)
        .query(&QueryContext::new(), "blue green rollout", &QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::BackendUnavailable { ref backend, .. } if backend == "embedding"));
    // one attempt plus the default two retries
    assert_eq!(harness.embedder.calls(), 3);
}

struct BrokenGenerator;

#[async_trait]
impl Generator for BrokenGenerator {
    async fn generate(&self, _prompt: &Prompt) -> Result<String, BackendError> {
        Err(BackendError::rejected("HTTP 400: context too long"))
    }
}

#[tokio::test]
async fn test_synthesis_failure_is_typed() {
    let harness = Harness::new();
    let backends = Arc::new(Backends::new(
        harness.embedder.clone(),
        harness.vectors.clone(),
        Arc::new(InMemoryGraphStore::new()),
        Arc::new(BrokenGenerator),
    ));
    index(&backends, "docs", &[("deploy.md", DEPLOY_STANDARD)]).await;

    let err = pipeline(&backends)
        .query(&QueryContext::new(), "blue green rollout", &QueryOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RagError::SynthesisFailed(_)));
}

#[tokio::test]
async fn test_repeated_query_embeds_once() {
    let harness = Harness::new();
    let backends = Arc::new(
        harness
            .backends(Arc::new(InMemoryGraphStore::new()))
            .with_cache(EmbeddingCache::new(&CacheConfig::default())),
    );
    index(&backends, "docs", &[("deploy.md", DEPLOY_STANDARD)]).await;
    let before = harness.embedder.calls();

    let pipeline = pipeline(&backends);
    let ctx = QueryContext::new();
    for _ in 0..2 {
        pipeline
            .query(&ctx, "How do we roll out?", &QueryOptions::default())
            .await
            .unwrap();
    }

    assert_eq!(harness.embedder.calls(), before + 1);
}
