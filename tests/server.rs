//! HTTP-level tests for the chat service.
//!
//! The service is served on a real loopback port and queried with reqwest.
//! Backends are either stubs injected through [`Backends::ready`] or a real
//! Hugging Face backend pointed at a local mock model host.

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use lab_agent::config::Config;
use lab_agent::fallback::{reply_for, Category};
use lab_agent::model::{ModelBackend, ModelError};
use lab_agent::models::{RetrievalResult, RetrievedDocument};
use lab_agent::orchestrator::{Orchestrator, RetryPolicy};
use lab_agent::retrieval::{KnowledgeBase, RetrievalError};
use lab_agent::server::{router, run_server_with_backends, Backends};
use lab_agent::startup;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ─── Helpers ────────────────────────────────────────────────────────

async fn spawn_app(backends: Backends) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(backends, "lab-agent-test");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}", addr)
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        loading_delay: Duration::from_millis(5),
        transport_delay: Duration::from_millis(5),
    }
}

struct EchoModel;

#[async_trait]
impl ModelBackend for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }
    async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let last_line = prompt.lines().rev().nth(1).unwrap_or_default();
        Ok(format!("echo: {}", last_line))
    }
}

struct DownModel;

#[async_trait]
impl ModelBackend for DownModel {
    fn name(&self) -> &str {
        "down"
    }
    async fn generate(&self, _prompt: &str) -> Result<String, ModelError> {
        Err(ModelError::Transport("connection refused".to_string()))
    }
}

struct DocsKnowledge;

#[async_trait]
impl KnowledgeBase for DocsKnowledge {
    async fn query(&self, _question: &str) -> Result<RetrievalResult, RetrievalError> {
        Ok(RetrievalResult {
            answer: "From the docs.".to_string(),
            source_documents: vec![
                RetrievedDocument {
                    text: "one".to_string(),
                    source: Some("doc1.md".to_string()),
                },
                RetrievedDocument {
                    text: "two".to_string(),
                    source: None,
                },
            ],
        })
    }
}

struct PanickingKnowledge;

#[async_trait]
impl KnowledgeBase for PanickingKnowledge {
    async fn query(&self, _question: &str) -> Result<RetrievalResult, RetrievalError> {
        panic!("index corrupted");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_reports_initializing_then_mode() {
    let backends = Backends::new();
    let base = spawn_app(backends.clone()).await;
    let client = reqwest::Client::new();

    let body: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "initializing");
    assert_eq!(body["service"], "lab-agent-test");

    // /chat is unavailable until backends are published
    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "hello", "history": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);

    assert!(backends.publish(Some(Orchestrator::new(
        Some(Arc::new(DocsKnowledge)),
        Some(Arc::new(EchoModel)),
        fast_retry(),
        "persona",
    ))));
    assert!(!backends.publish(None), "second publish must be rejected");

    let body: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "rag");
}

#[tokio::test]
async fn test_chat_without_any_backend_is_503() {
    let base = spawn_app(Backends::ready(None)).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unavailable");

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["mode"], "llm-only");
}

#[tokio::test]
async fn test_malformed_chat_body_uses_error_shape() {
    let orchestrator = Orchestrator::new(None, Some(Arc::new(EchoModel)), fast_retry(), "persona");
    let base = spawn_app(Backends::ready(Some(orchestrator))).await;
    let client = reqwest::Client::new();

    // Missing `message`
    let resp = client
        .post(format!("{}/chat", base))
        .json(&json!({ "history": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"].as_str().unwrap().contains("message"));

    // Not JSON at all
    let resp = client
        .post(format!("{}/chat", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // No content type
    let resp = client
        .post(format!("{}/chat", base))
        .body(r#"{"message":"hi"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_chat_rag_reply_with_sources() {
    let orchestrator = Orchestrator::new(
        Some(Arc::new(DocsKnowledge)),
        Some(Arc::new(EchoModel)),
        fast_retry(),
        "persona",
    );
    let base = spawn_app(Backends::ready(Some(orchestrator))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "what is this lab?", "history": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], "From the docs.");
    assert_eq!(body["sources"], json!(["doc1.md"]));
}

#[tokio::test]
async fn test_chat_llm_only_tolerates_malformed_history() {
    let orchestrator = Orchestrator::new(None, Some(Arc::new(EchoModel)), fast_retry(), "persona");
    let base = spawn_app(Backends::ready(Some(orchestrator))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({
            "message": "and now?",
            "history": [["hi", "hello"], ["broken"], [1, 2], ["a", "b", "c"]]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], "echo: User: and now?");
    assert_eq!(body["sources"], json!([]));
}

#[tokio::test]
async fn test_chat_falls_back_to_local_when_model_down() {
    let orchestrator = Orchestrator::new(None, Some(Arc::new(DownModel)), fast_retry(), "persona");
    let base = spawn_app(Backends::ready(Some(orchestrator))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "hello", "history": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], reply_for(Category::Greeting));
    assert_eq!(body["sources"], json!([]));
}

#[tokio::test]
async fn test_chat_panic_becomes_apology() {
    let orchestrator = Orchestrator::new(
        Some(Arc::new(PanickingKnowledge)),
        Some(Arc::new(EchoModel)),
        fast_retry(),
        "persona",
    );
    let base = spawn_app(Backends::ready(Some(orchestrator))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "anything" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], lab_agent::orchestrator::APOLOGY_REPLY);
}

// ─── End to end against a mock model host ───────────────────────────

/// Answers 503 "loading" for the first `loading_calls` requests, then a generation.
async fn spawn_mock_model_host(loading_calls: usize) -> (String, Arc<AtomicUsize>) {
    async fn generate(
        State((calls, loading_calls)): State<(Arc<AtomicUsize>, usize)>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(body["inputs"].as_str().unwrap().ends_with("Assistant:"));
        if n <= loading_calls {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": "Model test/model is currently loading",
                    "estimated_time": 1.0
                })),
            )
        } else {
            (
                StatusCode::OK,
                Json(json!([{ "generated_text": " Generated reply. " }])),
            )
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/models/test/model", post(generate))
        .with_state((calls.clone(), loading_calls));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{}/models", addr), calls)
}

fn model_config(endpoint: &str, key_env: &str, port: u16) -> Config {
    let config: Config = toml::from_str(&format!(
        r#"
[server]
bind = "127.0.0.1:{port}"
service_name = "lab-agent"

[model]
provider = "huggingface"
model = "test/model"
endpoint = "{endpoint}"
api_key_env = "{key_env}"
timeout_secs = 5

[retry]
max_attempts = 5
loading_delay_ms = 10
transport_delay_ms = 10
"#
    ))
    .unwrap();
    lab_agent::config::validate(&config).unwrap();
    config
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

#[tokio::test]
async fn test_end_to_end_loading_retries_then_reply() {
    std::env::set_var("LAB_AGENT_TEST_HF_TOKEN_E2E", "hf_test_token");
    let (endpoint, calls) = spawn_mock_model_host(2).await;
    let port = find_free_port();
    let cfg = model_config(&endpoint, "LAB_AGENT_TEST_HF_TOKEN_E2E", port);

    let orchestrator = startup::initialize(&cfg).await;
    assert!(orchestrator.is_some());
    let backends = Backends::ready(orchestrator);

    let cfg_clone = cfg.clone();
    let server_handle = tokio::spawn(async move {
        run_server_with_backends(&cfg_clone, backends).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let health: Value = client
        .get(format!("http://127.0.0.1:{}/health", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["mode"], "llm-only");
    assert_eq!(health["service"], "lab-agent");

    let resp = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({ "message": "Tell me about the lab", "history": [["hi", "hello"]] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], "Generated reply.");
    assert_eq!(body["sources"], json!([]));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    server_handle.abort();
}

#[tokio::test]
async fn test_end_to_end_model_never_loads_uses_local_reply() {
    std::env::set_var("LAB_AGENT_TEST_HF_TOKEN_LOADING", "hf_test_token");
    let (endpoint, calls) = spawn_mock_model_host(usize::MAX).await;
    let cfg = model_config(&endpoint, "LAB_AGENT_TEST_HF_TOKEN_LOADING", find_free_port());

    let orchestrator = startup::initialize(&cfg).await.unwrap();
    let base = spawn_app(Backends::ready(Some(orchestrator))).await;

    let resp = reqwest::Client::new()
        .post(format!("{}/chat", base))
        .json(&json!({ "message": "Who are you?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["reply"], reply_for(Category::Identity));
    assert_eq!(calls.load(Ordering::SeqCst), 5);
}

// ─── Startup with a PDF that breaks the extractor ───────────────────

/// One-page PDF that draws text with `/F1` but declares no fonts.
fn pdf_without_fonts() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(
        b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << >> >> endobj\n",
    );
    let o4 = out.len();
    out.extend_from_slice(
        b"4 0 obj << /Length 23 >> stream\nBT /F1 12 Tf (Hi) Tj ET\nendstream endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 5\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in [o1, o2, o3, o4] {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(b"trailer << /Size 5 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

/// Serves both generation and feature extraction under `/models`.
async fn spawn_mock_inference_host() -> String {
    async fn generate(Json(_body): Json<Value>) -> Json<Value> {
        Json(json!([{ "generated_text": "From the lab docs." }]))
    }

    async fn embed(Json(body): Json<Value>) -> Json<Value> {
        let n = body["inputs"].as_array().map_or(0, |a| a.len());
        Json(serde_json::to_value(vec![vec![1.0f32, 0.5]; n]).unwrap())
    }

    let app = Router::new()
        .route("/models/test/model", post(generate))
        .route("/models/test/embed/pipeline/feature-extraction", post(embed));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{}/models", addr)
}

#[tokio::test]
async fn test_unparseable_pdf_does_not_block_startup() {
    std::env::set_var("LAB_AGENT_TEST_HF_TOKEN_PDF", "hf_test_token");
    let endpoint = spawn_mock_inference_host().await;

    let content = tempfile::TempDir::new().unwrap();
    std::fs::write(
        content.path().join("about.md"),
        "# About\n\nThe lab builds creative tools.",
    )
    .unwrap();
    std::fs::write(content.path().join("fontless.pdf"), pdf_without_fonts()).unwrap();

    let port = find_free_port();
    let cfg: Config = toml::from_str(&format!(
        r#"
[server]
bind = "127.0.0.1:{port}"

[content]
root = "{root}"

[embedding]
provider = "huggingface"
model = "test/embed"
endpoint = "{endpoint}"
api_key_env = "LAB_AGENT_TEST_HF_TOKEN_PDF"
batch_delay_ms = 0
max_retries = 0

[model]
provider = "huggingface"
model = "test/model"
endpoint = "{endpoint}"
api_key_env = "LAB_AGENT_TEST_HF_TOKEN_PDF"
"#,
        root = content.path().display(),
    ))
    .unwrap();
    lab_agent::config::validate(&cfg).unwrap();

    let server_handle = tokio::spawn(async move {
        lab_agent::server::run_server(&cfg).await.ok();
    });
    wait_for_server(port).await;

    let client = reqwest::Client::new();
    let mut health = Value::Null;
    for _ in 0..50 {
        health = client
            .get(format!("http://127.0.0.1:{}/health", port))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if health["status"] == "ok" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(health["status"], "ok", "initialization never finished");
    assert_eq!(health["mode"], "rag");

    let body: Value = client
        .post(format!("http://127.0.0.1:{}/chat", port))
        .json(&json!({ "message": "What does the lab build?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["reply"], "From the lab docs.");
    assert_eq!(body["sources"], json!(["about.md"]));

    server_handle.abort();
}
