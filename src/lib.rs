//! # docgraph
//!
//! A GraphRAG knowledge service. Markdown documentation is decomposed into a
//! knowledge graph (documents, sections, chunks, concepts, code examples)
//! plus a vector index of chunk embeddings; questions are answered by
//! combining vector similarity with graph traversal before synthesizing a
//! cited answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Connector   │──▶│  Indexer    │──▶│ Graph store   │
//! │ filesystem  │   │ parse+chunk │   │ Vector store  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │
//!                   ┌────────────────────────┘
//!                   ▼
//!          ┌──────────────────┐     ┌──────────────┐
//!          │ RetrievalPipeline │────▶│  Generator   │
//!          └──────────────────┘     └──────────────┘
//! ```
//!
//! Every backend call goes through [`backends::Backends`], which applies
//! the timeout, retry and circuit-breaker policy of [`resilience`] and the
//! embedding [`cache`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | SQLite connection pool |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite graph and vector stores |
//! | [`openai`] | OpenAI-compatible embedder and generator |
//! | [`resilience`] | Timeout, retry, circuit breaker |
//! | [`cache`] | Embedding cache |
//! | [`backends`] | Collaborator wiring |
//! | [`connector_fs`] | Filesystem source snapshots |
//! | [`indexer`] | Document indexing and source sync |
//! | [`pipeline`] | Query answering |
//!
//! The pure parts (data model, parser, chunker, ranking, backend contracts)
//! live in [`docgraph_core`].

pub mod backends;
pub mod cache;
pub mod config;
pub mod connector_fs;
pub mod db;
pub mod indexer;
pub mod logging;
pub mod migrate;
pub mod openai;
pub mod pipeline;
pub mod resilience;
pub mod sqlite_store;

pub use docgraph_core;
