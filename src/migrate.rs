//! Schema for the SQLite graph and vector stores.
//!
//! One table per node kind, one `edges` table keyed by
//! `(kind, source_id, target_id)`, plus `chunk_vectors` and `sync_state`.
//! Every statement is idempotent so migrations run on every start.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        file_path TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        doc_type TEXT,
        promotion TEXT,
        updated_at INTEGER NOT NULL,
        version TEXT,
        metadata_json TEXT NOT NULL DEFAULT '{}',
        UNIQUE(source, file_path)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sections (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL,
        title TEXT NOT NULL DEFAULT '',
        ord INTEGER NOT NULL,
        level INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        section_id TEXT NOT NULL,
        document_id TEXT NOT NULL,
        ord INTEGER NOT NULL,
        content TEXT NOT NULL,
        char_count INTEGER NOT NULL,
        start_offset INTEGER NOT NULL,
        end_offset INTEGER NOT NULL,
        hash TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS concepts (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        aliases_json TEXT NOT NULL DEFAULT '[]',
        category TEXT,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS code_examples (
        id TEXT PRIMARY KEY,
        chunk_id TEXT NOT NULL,
        language TEXT,
        code TEXT NOT NULL,
        description TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        kind TEXT NOT NULL,
        source_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        properties_json TEXT NOT NULL DEFAULT '{}',
        PRIMARY KEY (kind, source_id, target_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        dims INTEGER NOT NULL,
        embedding BLOB NOT NULL,
        metadata_json TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_state (
        source TEXT PRIMARY KEY,
        version TEXT NOT NULL,
        synced_at INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)",
    "CREATE INDEX IF NOT EXISTS idx_sections_document_id ON sections(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_code_examples_chunk_id ON code_examples(chunk_id)",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, kind)",
    "CREATE INDEX IF NOT EXISTS idx_chunk_vectors_source ON chunk_vectors(source)",
];

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("Failed to apply schema migration")?;
    }
    tracing::debug!(statements = SCHEMA.len(), "schema migrations applied");
    Ok(())
}
