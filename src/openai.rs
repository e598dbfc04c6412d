//! OpenAI-compatible HTTP backends.
//!
//! - [`OpenAiEmbedder`] calls `POST {base_url}/embeddings`.
//! - [`OpenAiGenerator`] calls `POST {base_url}/chat/completions`.
//!
//! Failures are classified, not retried: HTTP 429, 5xx and network errors
//! are transient, everything else (other 4xx, malformed bodies) is rejected.
//! The resilience layer decides what to do with them.

use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use docgraph_core::embedding::Embedder;
use docgraph_core::error::BackendError;
use docgraph_core::generation::{Generator, Prompt};

use crate::config::{EmbeddingConfig, GenerationConfig};

fn api_key(env_var: &str) -> Result<String> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", env_var),
    }
}

fn http_client() -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()?)
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// Classify a non-success status.
fn status_error(status: StatusCode, body: &str) -> BackendError {
    let message = format!("HTTP {}: {}", status.as_u16(), body);
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        BackendError::transient(message)
    } else {
        BackendError::rejected(message)
    }
}

fn request_error(err: reqwest::Error) -> BackendError {
    if err.is_decode() || err.is_builder() {
        BackendError::rejected(err)
    } else {
        BackendError::transient(err)
    }
}

async fn post_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> Result<T, BackendError> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .map_err(request_error)?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(status_error(status, &text));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| BackendError::rejected(format!("malformed response: {}", e)))
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI-compatible embeddings endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        Ok(Self {
            client: http_client()?,
            url: endpoint(&config.base_url, "embeddings"),
            api_key: api_key(&config.api_key_env)?,
            model,
            dims,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let response: EmbeddingResponse =
            post_json(&self.client, &self.url, &self.api_key, &body).await?;
        let vector = response
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| BackendError::rejected("embedding response has no data"))?;
        if vector.len() != self.dims {
            return Err(BackendError::rejected(format!(
                "expected {} dimensions, got {}",
                self.dims,
                vector.len()
            )));
        }
        Ok(vector)
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Generator backed by an OpenAI-compatible chat completions endpoint.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        Ok(Self {
            client: http_client()?,
            url: endpoint(&config.base_url, "chat/completions"),
            api_key: api_key(&config.api_key_env)?,
            model,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &Prompt) -> Result<String, BackendError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0.0,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user},
            ],
        });
        let response: ChatResponse =
            post_json(&self.client, &self.url, &self.api_key, &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| BackendError::rejected("completion response has no content"))
    }
}
