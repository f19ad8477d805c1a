//! Remote text-generation backends.
//!
//! The [`ModelBackend`] trait is the only thing the orchestrator and the
//! retrieval chain know about the hosted model. Failures are classified into
//! [`ModelError`] so callers can decide whether a retry makes sense:
//!
//! | Condition | Error |
//! |-----------|-------|
//! | HTTP 503 (model cold-starting / loading) | [`ModelError::Loading`] |
//! | connect / timeout / request failure | [`ModelError::Transport`] |
//! | any other non-success status, unparseable body | [`ModelError::Api`] |
//!
//! Backends never retry on their own.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use crate::config::{endpoint_base, ModelConfig};

const HUGGINGFACE_BASE_URL: &str = "https://router.huggingface.co/hf-inference/models";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("model is loading (estimated {estimated_time:?}s)")]
    Loading { estimated_time: Option<f64> },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },
}

impl ModelError {
    /// Loading and transport failures are worth another attempt; API errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ModelError::Loading { .. } | ModelError::Transport(_))
    }
}

/// Connect, timeout and request/body failures are transport errors. Anything
/// else reqwest reports (a request it could not build, a body it could not
/// decode) would fail the same way again, so it is an [`ModelError::Api`]
/// error with status `0` when no HTTP status is known.
impl From<reqwest::Error> for ModelError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            ModelError::Transport(e.to_string())
        } else {
            ModelError::Api {
                status: e.status().map_or(0, |s| s.as_u16()),
                message: e.to_string(),
            }
        }
    }
}

#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Human-readable identifier for logs, e.g. `"huggingface:mistralai/Mistral-7B-Instruct-v0.2"`.
    fn name(&self) -> &str;

    /// Generate a completion for a fully formatted prompt.
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

// ============ Hugging Face ============

/// Text generation through the Hugging Face inference API.
pub struct HuggingFaceBackend {
    client: reqwest::Client,
    name: String,
    url: String,
    api_key: String,
    max_new_tokens: u32,
    temperature: f32,
}

impl HuggingFaceBackend {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for Hugging Face backend"))?;
        let api_key = read_api_key(config.api_key_env.as_deref(), "HUGGINGFACEHUB_API_TOKEN")?;
        let base = endpoint_base(config.endpoint.as_deref(), HUGGINGFACE_BASE_URL)?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            name: format!("huggingface:{}", model),
            url: format!("{}/{}", base, model),
            api_key,
            max_new_tokens: config.max_new_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ModelBackend for HuggingFaceBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let body = serde_json::json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": self.max_new_tokens,
                "temperature": self.temperature,
                "return_full_text": false,
            },
        });
        let json = post_json(&self.client, &self.url, &self.api_key, &body).await?;
        parse_huggingface_generation(&json)
    }
}

/// Accepts `[{"generated_text": …}]` as well as a bare object.
fn parse_huggingface_generation(json: &Value) -> Result<String, ModelError> {
    let first = match json {
        Value::Array(items) => items.first(),
        other => Some(other),
    };
    first
        .and_then(|v| v.get("generated_text"))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .ok_or_else(|| ModelError::Api {
            status: 200,
            message: "response has no generated_text".to_string(),
        })
}

// ============ OpenAI-compatible ============

/// Text generation through an OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIBackend {
    client: reqwest::Client,
    name: String,
    model: String,
    url: String,
    api_key: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIBackend {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("model.model required for OpenAI backend"))?;
        let api_key = read_api_key(config.api_key_env.as_deref(), "OPENAI_API_KEY")?;
        let base = endpoint_base(config.endpoint.as_deref(), OPENAI_BASE_URL)?;

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            name: format!("openai:{}", model),
            model,
            url: format!("{}/chat/completions", base),
            api_key,
            max_tokens: config.max_new_tokens,
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ModelBackend for OpenAIBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });
        let json = post_json(&self.client, &self.url, &self.api_key, &body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| ModelError::Api {
                status: 200,
                message: "response has no choices[0].message.content".to_string(),
            })
    }
}

// ============ Shared plumbing ============

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &Value,
) -> Result<Value, ModelError> {
    let response = client.post(url).bearer_auth(api_key).json(body).send().await?;
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        return Err(classify_failure(status.as_u16(), &text));
    }

    serde_json::from_str(&text).map_err(|e| ModelError::Api {
        status: status.as_u16(),
        message: format!("invalid JSON response: {}", e),
    })
}

/// Map a non-success HTTP response from the model host to a [`ModelError`].
pub fn classify_failure(status: u16, body: &str) -> ModelError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed
        .as_ref()
        .and_then(|v| v.get("error"))
        .map(|e| match e {
            Value::String(s) => s.clone(),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| other.to_string()),
        })
        .unwrap_or_else(|| body.trim().to_string());

    if status == 503 {
        let estimated_time = parsed
            .as_ref()
            .and_then(|v| v.get("estimated_time"))
            .and_then(Value::as_f64);
        return ModelError::Loading { estimated_time };
    }

    ModelError::Api { status, message }
}

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

/// Create the backend named by `[model].provider`.
///
/// Returns `Ok(None)` for `"disabled"`, and an error when the provider is
/// enabled but cannot be constructed (missing key, bad config).
pub fn create_backend(config: &ModelConfig) -> Result<Option<Box<dyn ModelBackend>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "huggingface" => Ok(Some(Box::new(HuggingFaceBackend::new(config)?))),
        "openai" => Ok(Some(Box::new(OpenAIBackend::new(config)?))),
        other => bail!("Unknown model provider: {}", other),
    }
}
