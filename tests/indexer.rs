//! Indexing and source sync over in-memory stores.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use docgraph::backends::Backends;
use docgraph::connector_fs::SourceSnapshot;
use docgraph::docgraph_core::chunk::ChunkingOptions;
use docgraph::docgraph_core::error::BackendError;
use docgraph::docgraph_core::graph::memory::InMemoryGraphStore;
use docgraph::docgraph_core::graph::GraphStore;
use docgraph::docgraph_core::models::{child_id, document_id, PromotionLevel};
use docgraph::indexer::Indexer;

use common::{item, Harness};

const INSTALL: &str = "---
title: Install
promotion: promoted
concepts: [Cargo]
---
# Install

Run cargo install to get the binary. Then read [configuration](config.md).
";

const CONFIG: &str = "# Configuration

Settings live in a TOML file.

# Logging

Set the level with an environment variable.
";

struct Fixture {
    harness: Harness,
    graph: Arc<InMemoryGraphStore>,
    indexer: Indexer,
    cancel: CancellationToken,
}

fn fixture() -> Fixture {
    let harness = Harness::new();
    let graph = Arc::new(InMemoryGraphStore::new());
    let backends: Arc<Backends> = Arc::new(harness.backends(graph.clone()));
    Fixture {
        indexer: Indexer::new(backends, ChunkingOptions::default()),
        harness,
        graph,
        cancel: CancellationToken::new(),
    }
}

fn snapshot(files: &[(&str, &str)]) -> SourceSnapshot {
    SourceSnapshot::new("docs", files.iter().map(|(p, c)| item(p, c)).collect())
}

#[tokio::test]
async fn test_sync_indexes_and_records_state() {
    let f = fixture();
    let snap = snapshot(&[("install.md", INSTALL), ("config.md", CONFIG)]);

    let report = f.indexer.sync_source(&f.cancel, &snap).await.unwrap();

    assert!(!report.skipped);
    assert_eq!(report.indexed, 2);
    assert_eq!(report.failed, 0);
    assert!(report.recorded);
    assert_eq!(report.chunks, 3);
    assert_eq!(f.harness.vectors.len(), 3);
    assert_eq!(f.graph.chunk_count(), 3);

    let state = f.graph.get_sync_state("docs").await.unwrap().unwrap();
    assert_eq!(state.version, snap.version);

    let install = f
        .graph
        .get_document(&document_id("docs", "install.md"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(install.title, "Install");
    assert_eq!(install.promotion, PromotionLevel::Promoted);
}

#[tokio::test]
async fn test_unchanged_source_is_skipped() {
    let f = fixture();
    let snap = snapshot(&[("install.md", INSTALL)]);
    f.indexer.sync_source(&f.cancel, &snap).await.unwrap();
    let embeds = f.harness.embedder.calls();

    let again = f.indexer.sync_source(&f.cancel, &snap).await.unwrap();

    assert!(again.skipped);
    assert_eq!(again.indexed, 0);
    assert_eq!(f.harness.embedder.calls(), embeds);
}

#[tokio::test]
async fn test_vanished_documents_are_removed() {
    let f = fixture();
    f.indexer
        .sync_source(&f.cancel, &snapshot(&[("install.md", INSTALL), ("config.md", CONFIG)]))
        .await
        .unwrap();

    let report = f
        .indexer
        .sync_source(&f.cancel, &snapshot(&[("install.md", INSTALL)]))
        .await
        .unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(f.harness.vectors.len(), 1);
    assert!(f
        .graph
        .get_document(&document_id("docs", "config.md"))
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        f.graph.document_ids_for_source("docs").await.unwrap(),
        vec![document_id("docs", "install.md")]
    );
}

#[tokio::test]
async fn test_reindex_replaces_previous_chunks() {
    let f = fixture();
    let first = f
        .indexer
        .index_document(&f.cancel, "docs", &item("config.md", CONFIG))
        .await
        .unwrap();
    assert_eq!(first.chunks, 2);
    assert_eq!(first.replaced_chunks, 0);

    let second = f
        .indexer
        .index_document(&f.cancel, "docs", &item("config.md", "# Configuration\n\nShorter now.\n"))
        .await
        .unwrap();

    assert_eq!(second.document_id, first.document_id);
    assert_eq!(second.replaced_chunks, 2);
    assert_eq!(second.chunks, 1);
    assert_eq!(f.graph.chunk_count(), 1);
    assert_eq!(f.harness.vectors.len(), 1);
}

#[tokio::test]
async fn test_forward_link_survives_target_indexing() {
    let f = fixture();
    let a = "# A\n\nSee [b](b.md) for details.\n";
    let b = "# B\n\nThe details.\n";

    let report = f
        .indexer
        .sync_source(&f.cancel, &snapshot(&[("a.md", a), ("b.md", b)]))
        .await
        .unwrap();
    assert_eq!(report.indexed, 2);
    assert_eq!(report.failed, 0);

    let from_a = document_id("docs", "a.md");
    let linked = f.graph.get_linked_documents(&from_a).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].file_path, "b.md");

    f.indexer
        .index_document(&f.cancel, "docs", &item("b.md", "# B\n\nRewritten details.\n"))
        .await
        .unwrap();
    let linked = f.graph.get_linked_documents(&from_a).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].file_path, "b.md");
}

#[tokio::test]
async fn test_links_and_concepts_land_in_graph() {
    let f = fixture();
    f.indexer
        .sync_source(&f.cancel, &snapshot(&[("install.md", INSTALL), ("config.md", CONFIG)]))
        .await
        .unwrap();

    let linked = f
        .graph
        .get_linked_documents(&document_id("docs", "install.md"))
        .await
        .unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].file_path, "config.md");

    assert_eq!(f.graph.concept_count(), 1);
    let section = child_id(&document_id("docs", "install.md"), "section", 0);
    let chunk = child_id(&section, "chunk", 0);
    let mentioned = f.graph.get_concepts_for_chunks(&[chunk]).await.unwrap();
    assert_eq!(mentioned.len(), 1);
    assert_eq!(mentioned[0].id, "concept:cargo");
}

#[tokio::test]
async fn test_failures_do_not_advance_state() {
    let f = fixture();
    let snap = snapshot(&[("install.md", INSTALL), ("config.md", CONFIG)]);
    f.harness
        .embedder
        .fail_with(BackendError::rejected("HTTP 400: bad input"));

    let report = f.indexer.sync_source(&f.cancel, &snap).await.unwrap();

    assert_eq!(report.indexed, 0);
    assert_eq!(report.failed, 2);
    assert!(!report.recorded);
    assert!(f.graph.get_sync_state("docs").await.unwrap().is_none());

    f.harness.embedder.recover();
    let retried = f.indexer.sync_source(&f.cancel, &snap).await.unwrap();
    assert!(!retried.skipped);
    assert_eq!(retried.indexed, 2);
    assert!(retried.recorded);
}

#[tokio::test]
async fn test_cancelled_sync_stops() {
    let f = fixture();
    f.cancel.cancel();
    let err = f
        .indexer
        .sync_source(&f.cancel, &snapshot(&[("install.md", INSTALL)]))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "E_CANCELLED");
    assert_eq!(f.harness.embedder.calls(), 0);
}
