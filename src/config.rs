use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use docgraph_core::chunk::ChunkingOptions;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/docgraph.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: i64,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: i64,
    #[serde(default = "default_true")]
    pub respect_paragraph_boundaries: bool,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: i64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_chunk_overlap(),
            respect_paragraph_boundaries: true,
            min_chunk_size: default_min_chunk_size(),
        }
    }
}

impl ChunkingConfig {
    pub fn options(&self) -> Result<ChunkingOptions> {
        ChunkingOptions::new(
            self.chunk_size,
            self.overlap,
            self.respect_paragraph_boundaries,
            self.min_chunk_size,
        )
        .map_err(|e| anyhow::anyhow!("chunking: {}", e))
    }
}

fn default_chunk_size() -> i64 {
    1500
}
fn default_chunk_overlap() -> i64 {
    200
}
fn default_min_chunk_size() -> i64 {
    100
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub default_max_results: usize,
    #[serde(default = "default_max_results_cap")]
    pub max_results_cap: usize,
    #[serde(default = "default_over_fetch_factor")]
    pub over_fetch_factor: usize,
    #[serde(default = "default_concept_hops")]
    pub concept_hops: u32,
    #[serde(default = "default_confidence_scale")]
    pub confidence_scale: f64,
    #[serde(default = "default_true")]
    pub include_concept_context: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_results: default_max_results(),
            max_results_cap: default_max_results_cap(),
            over_fetch_factor: default_over_fetch_factor(),
            concept_hops: default_concept_hops(),
            confidence_scale: default_confidence_scale(),
            include_concept_context: true,
        }
    }
}

fn default_max_results() -> usize {
    5
}
fn default_max_results_cap() -> usize {
    20
}
fn default_over_fetch_factor() -> usize {
    3
}
fn default_concept_hops() -> u32 {
    1
}
fn default_confidence_scale() -> f64 {
    1.2
}

/// Per-backend timeout, retry and circuit-breaker settings.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ResiliencePolicyConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

impl Default for ResiliencePolicyConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            failure_threshold: default_failure_threshold(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

impl ResiliencePolicyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn default_timeout_ms() -> u64 {
    10_000
}
fn default_max_retries() -> u32 {
    2
}
fn default_backoff_base_ms() -> u64 {
    200
}
fn default_backoff_max_ms() -> u64 {
    5_000
}
fn default_failure_threshold() -> u32 {
    5
}
fn default_cooldown_ms() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ResilienceConfig {
    #[serde(default)]
    pub embedding: ResiliencePolicyConfig,
    #[serde(default)]
    pub vector: ResiliencePolicyConfig,
    #[serde(default)]
    pub graph: ResiliencePolicyConfig,
    #[serde(default = "default_generation_policy")]
    pub generation: ResiliencePolicyConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            embedding: ResiliencePolicyConfig::default(),
            vector: ResiliencePolicyConfig::default(),
            graph: ResiliencePolicyConfig::default(),
            generation: default_generation_policy(),
        }
    }
}

fn default_generation_policy() -> ResiliencePolicyConfig {
    ResiliencePolicyConfig {
        timeout_ms: 60_000,
        ..Default::default()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_cache_entries")]
    pub max_entries: u64,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

fn default_cache_entries() -> u64 {
    10_000
}
fn default_cache_ttl_secs() -> u64 {
    1_800
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_tokens() -> u32 {
    800
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub filesystem: Option<FilesystemSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    #[serde(default = "default_source_name")]
    pub name: String,
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_source_name() -> String {
    "docs".to_string()
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.markdown".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.options()?;

        let r = &self.retrieval;
        if r.default_max_results < 1 {
            anyhow::bail!("retrieval.default_max_results must be >= 1");
        }
        if r.default_max_results > r.max_results_cap {
            anyhow::bail!(
                "retrieval.default_max_results ({}) must not exceed retrieval.max_results_cap ({})",
                r.default_max_results,
                r.max_results_cap
            );
        }
        if r.over_fetch_factor < 1 {
            anyhow::bail!("retrieval.over_fetch_factor must be >= 1");
        }
        if r.confidence_scale.is_nan() || r.confidence_scale <= 0.0 {
            anyhow::bail!("retrieval.confidence_scale must be > 0");
        }

        for (name, policy) in [
            ("embedding", &self.resilience.embedding),
            ("vector", &self.resilience.vector),
            ("graph", &self.resilience.graph),
            ("generation", &self.resilience.generation),
        ] {
            if policy.timeout_ms == 0 {
                anyhow::bail!("resilience.{}.timeout_ms must be > 0", name);
            }
            if policy.failure_threshold == 0 {
                anyhow::bail!("resilience.{}.failure_threshold must be > 0", name);
            }
        }

        if self.cache.enabled && self.cache.max_entries == 0 {
            anyhow::bail!("cache.max_entries must be > 0 when the cache is enabled");
        }

        if self.embedding.is_enabled() {
            if self.embedding.dims.is_none() || self.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    self.embedding.provider
                );
            }
            if self.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    self.embedding.provider
                );
            }
        }
        match self.embedding.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        if self.generation.is_enabled() && self.generation.model.is_none() {
            anyhow::bail!(
                "generation.model must be specified when provider is '{}'",
                self.generation.provider
            );
        }
        match self.generation.provider.as_str() {
            "disabled" | "openai" => {}
            other => anyhow::bail!(
                "Unknown generation provider: '{}'. Must be disabled or openai.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    Config::from_toml_str(&content)
}
