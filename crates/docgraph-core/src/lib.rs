//! # docgraph core
//!
//! Runtime-agnostic logic for docgraph: the knowledge-graph data model,
//! Markdown parsing, chunking, ranking, error types, and the contracts for
//! the four external collaborators (embedder, vector store, graph store,
//! text generator).
//!
//! No tokio, sqlx, filesystem or network dependencies live here. The
//! `docgraph` app crate supplies concrete backends and the pipelines.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod graph;
pub mod models;
pub mod parse;
pub mod ranking;
pub mod vector;

pub use error::{BackendError, RagError};
