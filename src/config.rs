//! TOML configuration.
//!
//! Every section is optional; a file containing only `[model]` is enough to
//! run the service in LLM-only mode. See `config/agent.example.toml`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            service_name: default_service_name(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:5000".to_string()
}
fn default_service_name() -> String {
    "lab-agent".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContentConfig {
    #[serde(default = "default_content_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            root: default_content_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_content_root() -> PathBuf {
    PathBuf::from("./content")
}

fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.md".to_string(),
        "**/*.txt".to_string(),
        "**/*.json".to_string(),
        "**/*.pdf".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    250
}
fn default_overlap() -> usize {
    25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Base URL override. Defaults to the provider's public endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between consecutive embedding batches, to stay under provider rate limits.
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            endpoint: None,
            api_key_env: None,
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_batch_delay_ms() -> u64 {
    1000
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            endpoint: None,
            api_key_env: None,
            max_new_tokens: default_max_new_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_max_new_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_model_timeout_secs() -> u64 {
    60
}

impl ModelConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

/// Retry policy for direct generation.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_loading_delay_ms")]
    pub loading_delay_ms: u64,
    #[serde(default = "default_transport_delay_ms")]
    pub transport_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            loading_delay_ms: default_loading_delay_ms(),
            transport_delay_ms: default_transport_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}
fn default_loading_delay_ms() -> u64 {
    5000
}
fn default_transport_delay_ms() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_persona_name() -> String {
    "Lab AI Agent".to_string()
}

fn default_system_prompt() -> String {
    "You are the Lab AI Agent, a friendly guide to this laboratory's website. \
     Answer questions about the lab's research, works, blog posts and members \
     concisely and politely. If you do not know the answer, say so honestly."
        .to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Base URL for a remote provider: `endpoint` when set, `default` otherwise.
///
/// Must be an absolute `http`/`https` URL. Trailing slashes are dropped.
pub fn endpoint_base(endpoint: Option<&str>, default: &str) -> Result<String> {
    let raw = endpoint.unwrap_or(default);
    let url =
        reqwest::Url::parse(raw).with_context(|| format!("Invalid endpoint URL: '{}'", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("Endpoint must be an http(s) URL: '{}'", raw);
    }
    Ok(raw.trim_end_matches('/').to_string())
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be smaller than chunking.max_tokens");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.model.temperature) {
        anyhow::bail!("model.temperature must be in [0.0, 2.0]");
    }

    match config.embedding.provider.as_str() {
        "disabled" | "huggingface" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, huggingface, or openai.",
            other
        ),
    }
    if config.embedding.is_enabled() && config.embedding.model.is_none() {
        anyhow::bail!(
            "embedding.model must be specified when provider is '{}'",
            config.embedding.provider
        );
    }

    match config.model.provider.as_str() {
        "disabled" | "huggingface" | "openai" => {}
        other => anyhow::bail!(
            "Unknown model provider: '{}'. Must be disabled, huggingface, or openai.",
            other
        ),
    }
    if config.model.is_enabled() && config.model.model.is_none() {
        anyhow::bail!(
            "model.model must be specified when provider is '{}'",
            config.model.provider
        );
    }

    if let Some(endpoint) = &config.embedding.endpoint {
        endpoint_base(Some(endpoint.as_str()), "").context("embedding.endpoint")?;
    }
    if let Some(endpoint) = &config.model.endpoint {
        endpoint_base(Some(endpoint.as_str()), "").context("model.endpoint")?;
    }

    Ok(())
}
