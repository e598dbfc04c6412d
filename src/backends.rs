//! The four collaborators, wired behind the resilience layer.
//!
//! [`Backends`] owns one handle per contract plus the shared
//! [`ResilienceSet`] and [`EmbeddingCache`]. Every external call made by the
//! indexer or the retrieval pipeline goes through one of its methods, which
//! run the call under [`Resilience::call`](crate::resilience::Resilience::call)
//! and map failures to [`RagError`].

use std::future::Future;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio_util::sync::CancellationToken;

use docgraph_core::embedding::Embedder;
use docgraph_core::error::{BackendError, RagError};
use docgraph_core::generation::{Generator, Prompt};
use docgraph_core::graph::GraphStore;
use docgraph_core::vector::{VectorHit, VectorMetadata, VectorStore};

use crate::cache::{CacheKey, EmbeddingCache};
use crate::config::{Config, EmbeddingConfig, GenerationConfig};
use crate::openai::{OpenAiEmbedder, OpenAiGenerator};
use crate::resilience::ResilienceSet;
use crate::sqlite_store::{SqliteGraphStore, SqliteVectorStore};

pub struct Backends {
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: Arc<dyn VectorStore>,
    pub graph_store: Arc<dyn GraphStore>,
    pub generator: Arc<dyn Generator>,
    pub resilience: Arc<ResilienceSet>,
    pub cache: Arc<EmbeddingCache>,
}

impl Backends {
    /// Bundle backends with default policies and the cache disabled.
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<dyn GraphStore>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            graph_store,
            generator,
            resilience: Arc::new(ResilienceSet::default()),
            cache: Arc::new(EmbeddingCache::disabled()),
        }
    }

    pub fn with_resilience(mut self, resilience: ResilienceSet) -> Self {
        self.resilience = Arc::new(resilience);
        self
    }

    pub fn with_cache(mut self, cache: EmbeddingCache) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    /// Embed `text`, serving repeated text from the cache.
    pub async fn embed(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<f32>, RagError> {
        let embedder = self.embedder.as_ref();
        let key = CacheKey::new(embedder.model_name(), embedder.dims(), text);
        self.cache
            .get_or_try_insert(key, || async move {
                self.resilience
                    .embedding
                    .call(cancel, move || embedder.embed(text))
                    .await
                    .map_err(|e| e.into_rag_error("embedding", RagError::EmbeddingFailed))
            })
            .await
    }

    pub async fn search(
        &self,
        cancel: &CancellationToken,
        vector: &[f32],
        k: usize,
        source: Option<&str>,
    ) -> Result<Vec<VectorHit>, RagError> {
        let store = self.vector_store.as_ref();
        self.resilience
            .vector
            .call(cancel, move || store.search(vector, k, source))
            .await
            .map_err(|e| e.into_rag_error("vector", RagError::SearchFailed))
    }

    pub async fn upsert_vector(
        &self,
        cancel: &CancellationToken,
        chunk_id: &str,
        vector: &[f32],
        metadata: &VectorMetadata,
    ) -> Result<(), RagError> {
        let store = self.vector_store.as_ref();
        self.resilience
            .vector
            .call(cancel, move || store.upsert(chunk_id, vector, metadata))
            .await
            .map_err(|e| e.into_rag_error("vector", RagError::SearchFailed))
    }

    pub async fn delete_vector(&self, cancel: &CancellationToken, chunk_id: &str) -> Result<(), RagError> {
        let store = self.vector_store.as_ref();
        self.resilience
            .vector
            .call(cancel, move || store.delete(chunk_id))
            .await
            .map_err(|e| e.into_rag_error("vector", RagError::SearchFailed))
    }

    /// Run one graph-store operation under the graph policy.
    ///
    /// ```ignore
    /// let graph = backends.graph_store.as_ref();
    /// let chunks = backends.graph(cancel, move || graph.get_chunks(ids)).await?;
    /// ```
    pub async fn graph<T, F, Fut>(&self, cancel: &CancellationToken, op: F) -> Result<T, RagError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        self.resilience
            .graph
            .call(cancel, op)
            .await
            .map_err(|e| e.into_rag_error("graph", RagError::GraphFailed))
    }

    pub async fn generate(&self, cancel: &CancellationToken, prompt: &Prompt) -> Result<String, RagError> {
        let generator = self.generator.as_ref();
        self.resilience
            .generation
            .call(cancel, move || generator.generate(prompt))
            .await
            .map_err(|e| e.into_rag_error("generation", RagError::SynthesisFailed))
    }
}

pub fn embedder_from_config(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "disabled" => bail!("embedding provider is disabled; set [embedding] provider"),
        other => bail!("Unknown embedding provider: '{}'", other),
    }
}

pub fn generator_from_config(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiGenerator::new(config)?)),
        "disabled" => bail!("generation provider is disabled; set [generation] provider"),
        other => bail!("Unknown generation provider: '{}'", other),
    }
}

/// Open the database, apply migrations and build every configured backend.
pub async fn from_config(config: &Config) -> Result<Backends> {
    config.validate()?;
    let pool = crate::db::connect(&config.db).await?;
    crate::migrate::run_migrations(&pool)
        .await
        .context("Failed to migrate database")?;

    let embedder = embedder_from_config(&config.embedding)?;
    let generator = generator_from_config(&config.generation)?;

    tracing::info!(
        db = %config.db.path.display(),
        embedding_model = embedder.model_name(),
        cache = config.cache.enabled,
        "backends ready"
    );

    Ok(Backends::new(
        embedder,
        Arc::new(SqliteVectorStore::new(pool.clone())),
        Arc::new(SqliteGraphStore::new(pool)),
        generator,
    )
    .with_resilience(ResilienceSet::from_config(&config.resilience))
    .with_cache(EmbeddingCache::new(&config.cache)))
}
