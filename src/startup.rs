//! One-time backend initialization.
//!
//! Builds the model backend and, if that succeeded and embeddings are
//! configured, the knowledge index. Failures are logged once here and turn
//! into an unavailable tier; they never surface per request.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::index::KnowledgeIndex;
use crate::model::{self, ModelBackend};
use crate::orchestrator::Orchestrator;
use crate::retrieval::{KnowledgeBase, RetrievalChain};

/// Initialize backends from configuration.
///
/// Returns `None` when no remote backend could be set up at all; the HTTP
/// shell then answers `/chat` with 503.
pub async fn initialize(config: &Config) -> Option<Orchestrator> {
    let model = match model::create_backend(&config.model) {
        Ok(Some(backend)) => {
            tracing::info!(backend = backend.name(), "model backend ready");
            Some(Arc::<dyn ModelBackend>::from(backend))
        }
        Ok(None) => {
            tracing::warn!("model provider disabled");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "model backend unavailable");
            None
        }
    };

    let knowledge = match &model {
        Some(model) => build_knowledge(config, model.clone()).await,
        None => {
            if config.embedding.is_enabled() {
                tracing::warn!("skipping knowledge index: retrieval needs a model backend");
            }
            None
        }
    };

    if model.is_none() && knowledge.is_none() {
        tracing::error!("no backend configured; /chat will answer 503");
        return None;
    }

    let orchestrator = Orchestrator::from_config(config, knowledge, model);
    let state = orchestrator.state();
    tracing::info!(
        mode = state.mode(),
        index_available = state.index_available,
        model_available = state.model_available,
        "backends initialized"
    );
    Some(orchestrator)
}

async fn build_knowledge(
    config: &Config,
    model: Arc<dyn ModelBackend>,
) -> Option<Arc<dyn KnowledgeBase>> {
    // Own task: a panic while indexing costs the index, not the model.
    let task_config = config.clone();
    let built = tokio::spawn(async move { try_build_knowledge(&task_config, model).await }).await;

    match built {
        Ok(Ok(Some(chain))) => Some(Arc::new(chain)),
        Ok(Ok(None)) => {
            tracing::info!("embedding provider disabled; running without retrieval");
            None
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "knowledge index unavailable");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "knowledge index build panicked");
            None
        }
    }
}

async fn try_build_knowledge(
    config: &Config,
    model: Arc<dyn ModelBackend>,
) -> Result<Option<RetrievalChain>> {
    let Some(embedder) = embedding::create_provider(&config.embedding)? else {
        return Ok(None);
    };
    let embedder: Arc<dyn EmbeddingProvider> = Arc::from(embedder);

    let index = KnowledgeIndex::build(config, embedder.as_ref()).await?;
    let stats = index.stats();
    tracing::info!(
        documents = stats.documents,
        chunks = stats.chunks,
        skipped_duplicates = stats.skipped_duplicates,
        "knowledge index built"
    );

    Ok(Some(RetrievalChain::new(
        index,
        embedder,
        model,
        config.retrieval.top_k,
        config.persona.system_prompt.clone(),
    )))
}
