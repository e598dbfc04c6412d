//! SQLite-backed [`GraphStore`] and [`VectorStore`].
//!
//! Both stores share one pool and the schema from [`crate::migrate`].
//! Concept traversal is a recursive CTE over the `edges` table; vector
//! search is brute-force cosine over `chunk_vectors` in process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docgraph_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docgraph_core::error::BackendError;
use docgraph_core::graph::{GraphResult, GraphStore, RelatedConcept, Relationship, RelationshipType};
use docgraph_core::models::{
    Chunk, CodeExample, Concept, Document, PromotionLevel, Section, SyncState,
};
use docgraph_core::vector::{top_k, VectorHit, VectorMetadata, VectorStore};

/// Classify a driver error for the resilience layer.
///
/// Lock contention and pool exhaustion are worth retrying; anything else
/// (constraint violations, bad SQL, decode errors) is not.
pub(crate) fn backend_error(err: sqlx::Error) -> BackendError {
    match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            BackendError::transient(err)
        }
        sqlx::Error::Database(db) => {
            let message = db.message().to_ascii_lowercase();
            if message.contains("locked") || message.contains("busy") {
                BackendError::transient(err)
            } else {
                BackendError::rejected(err)
            }
        }
        _ => BackendError::rejected(err),
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Ids owned by one document: itself, its sections, chunks and code examples.
const OWNED_IDS: &str = r#"
    SELECT ? AS id
    UNION SELECT id FROM sections WHERE document_id = ?
    UNION SELECT id FROM chunks WHERE document_id = ?
    UNION SELECT ce.id FROM code_examples ce
          JOIN chunks c ON c.id = ce.chunk_id
          WHERE c.document_id = ?
"#;

/// SQLite implementation of the knowledge-graph repository.
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document, sqlx::Error> {
    let promotion: Option<String> = row.try_get("promotion")?;
    let metadata_json: Option<String> = row.try_get("metadata_json")?;
    let title: Option<String> = row.try_get("title")?;
    Ok(Document {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        file_path: row.try_get("file_path")?,
        title: title.unwrap_or_default(),
        doc_type: row.try_get("doc_type")?,
        promotion: PromotionLevel::from_lenient(promotion.as_deref()),
        updated_at: millis_to_datetime(row.try_get("updated_at")?),
        version: row.try_get("version")?,
        metadata: metadata_json
            .and_then(|m| serde_json::from_str(&m).ok())
            .unwrap_or_else(|| serde_json::json!({})),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk, sqlx::Error> {
    let hash: Option<String> = row.try_get("hash")?;
    Ok(Chunk {
        id: row.try_get("id")?,
        section_id: row.try_get("section_id")?,
        document_id: row.try_get("document_id")?,
        order: row.try_get::<i64, _>("ord")? as usize,
        content: row.try_get("content")?,
        char_count: row.try_get::<i64, _>("char_count")? as usize,
        start_offset: row.try_get::<i64, _>("start_offset")? as usize,
        end_offset: row.try_get::<i64, _>("end_offset")? as usize,
        hash: hash.unwrap_or_default(),
    })
}

fn concept_from_row(row: &SqliteRow) -> Result<Concept, sqlx::Error> {
    let aliases_json: Option<String> = row.try_get("aliases_json")?;
    Ok(Concept {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        aliases: aliases_json
            .and_then(|a| serde_json::from_str(&a).ok())
            .unwrap_or_default(),
        category: row.try_get("category")?,
        description: row.try_get("description")?,
    })
}

const DOCUMENT_COLUMNS: &str =
    "id, source, file_path, title, doc_type, promotion, updated_at, version, metadata_json";

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn upsert_document(&self, document: &Document) -> GraphResult<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, source, file_path, title, doc_type, promotion,
                                   updated_at, version, metadata_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                file_path = excluded.file_path,
                title = excluded.title,
                doc_type = excluded.doc_type,
                promotion = excluded.promotion,
                updated_at = excluded.updated_at,
                version = excluded.version,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&document.id)
        .bind(&document.source)
        .bind(&document.file_path)
        .bind(&document.title)
        .bind(&document.doc_type)
        .bind(document.promotion.as_str())
        .bind(document.updated_at.timestamp_millis())
        .bind(&document.version)
        .bind(document.metadata.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn upsert_section(&self, section: &Section) -> GraphResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sections (id, document_id, title, ord, level)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                document_id = excluded.document_id,
                title = excluded.title,
                ord = excluded.ord,
                level = excluded.level
            "#,
        )
        .bind(&section.id)
        .bind(&section.document_id)
        .bind(&section.title)
        .bind(section.order as i64)
        .bind(section.level as i64)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn upsert_chunk(&self, chunk: &Chunk) -> GraphResult<()> {
        sqlx::query(
            r#"
            INSERT INTO chunks (id, section_id, document_id, ord, content, char_count,
                                start_offset, end_offset, hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                section_id = excluded.section_id,
                document_id = excluded.document_id,
                ord = excluded.ord,
                content = excluded.content,
                char_count = excluded.char_count,
                start_offset = excluded.start_offset,
                end_offset = excluded.end_offset,
                hash = excluded.hash
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.section_id)
        .bind(&chunk.document_id)
        .bind(chunk.order as i64)
        .bind(&chunk.content)
        .bind(chunk.char_count as i64)
        .bind(chunk.start_offset as i64)
        .bind(chunk.end_offset as i64)
        .bind(&chunk.hash)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn upsert_concept(&self, concept: &Concept) -> GraphResult<()> {
        let aliases = serde_json::to_string(&concept.aliases).map_err(BackendError::rejected)?;
        sqlx::query(
            r#"
            INSERT INTO concepts (id, name, aliases_json, category, description)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                aliases_json = CASE WHEN excluded.aliases_json = '[]'
                    THEN concepts.aliases_json ELSE excluded.aliases_json END,
                category = COALESCE(excluded.category, concepts.category),
                description = COALESCE(excluded.description, concepts.description)
            "#,
        )
        .bind(&concept.id)
        .bind(&concept.name)
        .bind(aliases)
        .bind(&concept.category)
        .bind(&concept.description)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn upsert_code_example(&self, example: &CodeExample) -> GraphResult<()> {
        sqlx::query(
            r#"
            INSERT INTO code_examples (id, chunk_id, language, code, description)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                chunk_id = excluded.chunk_id,
                language = excluded.language,
                code = excluded.code,
                description = excluded.description
            "#,
        )
        .bind(&example.id)
        .bind(&example.chunk_id)
        .bind(&example.language)
        .bind(&example.code)
        .bind(&example.description)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn create_relationship(&self, relationship: &Relationship) -> GraphResult<()> {
        sqlx::query(
            r#"
            INSERT INTO edges (kind, source_id, target_id, properties_json)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(kind, source_id, target_id) DO UPDATE SET
                properties_json = excluded.properties_json
            "#,
        )
        .bind(relationship.kind.as_str())
        .bind(&relationship.source_id)
        .bind(&relationship.target_id)
        .bind(relationship.properties.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> GraphResult<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let chunk_ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ? ORDER BY id")
                .bind(document_id)
                .fetch_all(&mut *tx)
                .await
                .map_err(backend_error)?;

        let delete_edges = format!(
            "DELETE FROM edges WHERE source_id IN ({owned}) \
             OR (kind <> '{links}' AND target_id IN ({owned}))",
            owned = OWNED_IDS,
            links = RelationshipType::LinksTo.as_str()
        );
        let mut query = sqlx::query(&delete_edges);
        for _ in 0..8 {
            query = query.bind(document_id);
        }
        query.execute(&mut *tx).await.map_err(backend_error)?;

        for statement in [
            "DELETE FROM code_examples WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
            "DELETE FROM chunks WHERE document_id = ?",
            "DELETE FROM sections WHERE document_id = ?",
            "DELETE FROM documents WHERE id = ?",
        ] {
            sqlx::query(statement)
                .bind(document_id)
                .execute(&mut *tx)
                .await
                .map_err(backend_error)?;
        }

        tx.commit().await.map_err(backend_error)?;
        Ok(chunk_ids)
    }

    async fn get_document(&self, id: &str) -> GraphResult<Option<Document>> {
        let sql = format!("SELECT {} FROM documents WHERE id = ?", DOCUMENT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;
        row.as_ref()
            .map(document_from_row)
            .transpose()
            .map_err(backend_error)
    }

    async fn get_documents(&self, ids: &[String]) -> GraphResult<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {} FROM documents WHERE id IN ({})",
            DOCUMENT_COLUMNS,
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend_error)?;
        let mut by_id: HashMap<String, Document> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let doc = document_from_row(row).map_err(backend_error)?;
            by_id.insert(doc.id.clone(), doc);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn get_chunks(&self, ids: &[String]) -> GraphResult<Vec<Chunk>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, section_id, document_id, ord, content, char_count, start_offset, end_offset, hash \
             FROM chunks WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend_error)?;
        let mut by_id: HashMap<String, Chunk> = HashMap::with_capacity(rows.len());
        for row in &rows {
            let chunk = chunk_from_row(row).map_err(backend_error)?;
            by_id.insert(chunk.id.clone(), chunk);
        }
        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    async fn get_concepts_for_chunks(&self, chunk_ids: &[String]) -> GraphResult<Vec<Concept>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            r#"
            SELECT DISTINCT c.id, c.name, c.aliases_json, c.category, c.description
            FROM edges e
            JOIN concepts c ON c.id = e.target_id
            WHERE e.kind = ? AND e.source_id IN ({})
            ORDER BY c.name, c.id
            "#,
            placeholders(chunk_ids.len())
        );
        let mut query = sqlx::query(&sql).bind(RelationshipType::Mentions.as_str());
        for id in chunk_ids {
            query = query.bind(id);
        }
        let rows = query.fetch_all(&self.pool).await.map_err(backend_error)?;
        rows.iter()
            .map(concept_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_error)
    }

    async fn get_related_concepts(
        &self,
        concept_id: &str,
        max_hops: u32,
    ) -> GraphResult<Vec<RelatedConcept>> {
        if max_hops == 0 {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            WITH RECURSIVE walk(id, hops) AS (
                SELECT ?, 0
                UNION
                SELECT CASE WHEN e.source_id = w.id THEN e.target_id ELSE e.source_id END,
                       w.hops + 1
                FROM edges e
                JOIN walk w ON e.source_id = w.id OR e.target_id = w.id
                WHERE e.kind = 'RELATES_TO' AND w.hops < ?
            )
            SELECT c.id, c.name, c.aliases_json, c.category, c.description,
                   MIN(w.hops) AS hops
            FROM walk w
            JOIN concepts c ON c.id = w.id
            WHERE w.id <> ?
            GROUP BY c.id
            ORDER BY hops, c.name
            "#,
        )
        .bind(concept_id)
        .bind(max_hops as i64)
        .bind(concept_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_error)?;

        rows.iter()
            .map(|row| {
                Ok(RelatedConcept {
                    concept: concept_from_row(row)?,
                    hops: row.try_get::<i64, _>("hops")? as u32,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(backend_error)
    }

    async fn get_linked_documents(&self, document_id: &str) -> GraphResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents d WHERE d.id IN \
             (SELECT target_id FROM edges WHERE kind = ? AND source_id = ?) \
             ORDER BY d.file_path",
            DOCUMENT_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(RelationshipType::LinksTo.as_str())
            .bind(document_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)?;
        rows.iter()
            .map(document_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_error)
    }

    async fn document_ids_for_source(&self, source: &str) -> GraphResult<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM documents WHERE source = ? ORDER BY id")
            .bind(source)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_error)
    }

    async fn get_sync_state(&self, source: &str) -> GraphResult<Option<SyncState>> {
        let row = sqlx::query("SELECT source, version, synced_at FROM sync_state WHERE source = ?")
            .bind(source)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_error)?;
        row.map(|r| -> Result<SyncState, sqlx::Error> {
            Ok(SyncState {
                source: r.try_get("source")?,
                version: r.try_get("version")?,
                synced_at: millis_to_datetime(r.try_get("synced_at")?),
            })
        })
        .transpose()
        .map_err(backend_error)
    }

    async fn set_sync_state(&self, state: &SyncState) -> GraphResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (source, version, synced_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET
                version = excluded.version,
                synced_at = excluded.synced_at
            "#,
        )
        .bind(&state.source)
        .bind(&state.version)
        .bind(state.synced_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }
}

/// SQLite implementation of the vector index.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn count(&self) -> GraphResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(backend_error)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn search(
        &self,
        vector: &[f32],
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<VectorHit>, BackendError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let rows = match source {
            Some(s) => {
                sqlx::query(
                    "SELECT chunk_id, embedding, metadata_json FROM chunk_vectors WHERE source = ?",
                )
                .bind(s)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT chunk_id, embedding, metadata_json FROM chunk_vectors")
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(backend_error)?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk_id: String = row.try_get("chunk_id").map_err(backend_error)?;
            let blob: Vec<u8> = row.try_get("embedding").map_err(backend_error)?;
            let metadata_json: String = row.try_get("metadata_json").map_err(backend_error)?;
            let metadata: VectorMetadata = match serde_json::from_str(&metadata_json) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(chunk_id = %chunk_id, error = %e, "skipping vector with unreadable metadata");
                    continue;
                }
            };
            hits.push(VectorHit {
                score: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
                chunk_id,
                metadata,
            });
        }
        Ok(top_k(hits, k))
    }

    async fn upsert(
        &self,
        chunk_id: &str,
        vector: &[f32],
        metadata: &VectorMetadata,
    ) -> Result<(), BackendError> {
        let metadata_json = serde_json::to_string(metadata).map_err(BackendError::rejected)?;
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, source, dims, embedding, metadata_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                source = excluded.source,
                dims = excluded.dims,
                embedding = excluded.embedding,
                metadata_json = excluded.metadata_json
            "#,
        )
        .bind(chunk_id)
        .bind(&metadata.source)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(metadata_json)
        .execute(&self.pool)
        .await
        .map_err(backend_error)?;
        Ok(())
    }

    async fn delete(&self, chunk_id: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM chunk_vectors WHERE chunk_id = ?")
            .bind(chunk_id)
            .execute(&self.pool)
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}
