//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`HuggingFaceProvider`]**: Hugging Face inference `feature-extraction` pipeline.
//! - **[`OpenAIProvider`]**: OpenAI (or compatible) `/embeddings` endpoint.
//!
//! Use [`create_provider`] to build one from `[embedding]` configuration; it
//! returns `Ok(None)` when the provider is `"disabled"`.
//!
//! # Retry Strategy
//!
//! Each request (one batch) is retried with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error, model loading) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Pacing *between* batches is handled by the index builder.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{endpoint_base, EmbeddingConfig};

const HUGGINGFACE_BASE_URL: &str = "https://router.huggingface.co/hf-inference/models";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Trait for embedding providers.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"sentence-transformers/all-MiniLM-L6-v2"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

// ============ Hugging Face Provider ============

/// Embedding provider using the Hugging Face inference API.
///
/// Requires an API token in the environment variable named by
/// `embedding.api_key_env` (default `HUGGINGFACEHUB_API_TOKEN`).
pub struct HuggingFaceProvider {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl HuggingFaceProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Hugging Face provider"))?;
        let api_key = read_api_key(config.api_key_env.as_deref(), "HUGGINGFACEHUB_API_TOKEN")?;
        let base = endpoint_base(config.endpoint.as_deref(), HUGGINGFACE_BASE_URL)?;
        let url = format!("{}/{}/pipeline/feature-extraction", base, model);

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model,
            url,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for HuggingFaceProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "inputs": texts,
            "options": { "wait_for_model": true },
        });
        let json = post_with_retry(
            &self.client,
            &self.url,
            &self.api_key,
            &body,
            self.max_retries,
            "Hugging Face",
        )
        .await?;
        parse_huggingface_response(&json, texts.len())
    }
}

/// Parse a `feature-extraction` response: `[[f32; dims]; n]`.
fn parse_huggingface_response(json: &serde_json::Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let rows = json
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Invalid Hugging Face response: expected an array"))?;

    let embeddings: Vec<Vec<f32>> = rows
        .iter()
        .map(|row| {
            row.as_array()
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .ok_or_else(|| anyhow::anyhow!("Invalid Hugging Face response: row is not an array"))
        })
        .collect::<Result<_>>()?;

    if embeddings.len() != expected {
        bail!(
            "Hugging Face returned {} embeddings for {} inputs",
            embeddings.len(),
            expected
        );
    }
    Ok(embeddings)
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {endpoint}/embeddings`. Requires the key in the environment
/// variable named by `embedding.api_key_env` (default `OPENAI_API_KEY`).
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = read_api_key(config.api_key_env.as_deref(), "OPENAI_API_KEY")?;
        let base = endpoint_base(config.endpoint.as_deref(), OPENAI_BASE_URL)?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            model,
            url: format!("{}/embeddings", base),
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_with_retry(
            &self.client,
            &self.url,
            &self.api_key,
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Shared plumbing ============

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .context("Failed to build HTTP client")
}

fn read_api_key(env_name: Option<&str>, default_env: &str) -> Result<String> {
    let name = env_name.unwrap_or(default_env);
    match std::env::var(name) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", name),
    }
}

/// POST a JSON body with retry/backoff and return the parsed JSON response.
///
/// - HTTP 429 or 5xx → retry with exponential backoff
/// - HTTP 4xx (not 429) → fail immediately
/// - Network error → retry
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &serde_json::Value,
    max_retries: u32,
    provider: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(provider, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error, retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        provider,
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429), no retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", provider, status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Embedding failed after retries")))
}

/// Create the [`EmbeddingProvider`] named by the configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | none (`Ok(None)`) |
/// | `"huggingface"` | [`HuggingFaceProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Box<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "huggingface" => Ok(Some(Box::new(HuggingFaceProvider::new(config)?))),
        "openai" => Ok(Some(Box::new(OpenAIProvider::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
