//! Retrieval-augmented answering.
//!
//! [`KnowledgeBase`] is the seam the orchestrator queries. [`RetrievalChain`]
//! implements it with "stuff" prompting: embed the question, take the top-k
//! chunks from the [`KnowledgeIndex`], paste them into one prompt and make a
//! single generation call.

use async_trait::async_trait;
use std::sync::Arc;

use crate::embedding::{embed_query, EmbeddingProvider};
use crate::index::KnowledgeIndex;
use crate::model::{ModelBackend, ModelError};
use crate::models::{RetrievalResult, RetrievedDocument};

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("query embedding failed: {0}")]
    Embedding(#[source] anyhow::Error),
    #[error("no relevant content found")]
    NoContext,
    #[error("generation failed: {0}")]
    Generation(#[from] ModelError),
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Answer a single question from indexed content.
    async fn query(&self, question: &str) -> Result<RetrievalResult, RetrievalError>;
}

pub struct RetrievalChain {
    index: KnowledgeIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    model: Arc<dyn ModelBackend>,
    top_k: usize,
    persona: String,
}

impl RetrievalChain {
    pub fn new(
        index: KnowledgeIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        model: Arc<dyn ModelBackend>,
        top_k: usize,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            index,
            embedder,
            model,
            top_k,
            persona: persona.into(),
        }
    }

    pub fn index(&self) -> &KnowledgeIndex {
        &self.index
    }
}

#[async_trait]
impl KnowledgeBase for RetrievalChain {
    async fn query(&self, question: &str) -> Result<RetrievalResult, RetrievalError> {
        let query_vec = embed_query(self.embedder.as_ref(), question)
            .await
            .map_err(RetrievalError::Embedding)?;

        let hits = self.index.search(&query_vec, self.top_k);
        if hits.is_empty() {
            return Err(RetrievalError::NoContext);
        }
        tracing::debug!(
            hits = hits.len(),
            best = hits[0].score,
            "retrieved context"
        );

        let documents: Vec<RetrievedDocument> = hits.into_iter().map(|h| h.document).collect();
        let prompt = stuff_prompt(&self.persona, &documents, question);
        let answer = self.model.generate(&prompt).await?;

        Ok(RetrievalResult {
            answer,
            source_documents: documents,
        })
    }
}

/// Format the retrieved context and the question into a single prompt.
pub fn stuff_prompt(persona: &str, documents: &[RetrievedDocument], question: &str) -> String {
    let context = documents
        .iter()
        .map(|d| d.text.trim())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}\n\nUse the following pieces of context to answer the question at the end. \
         If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
         {}\n\nQuestion: {}\nHelpful Answer:",
        persona.trim(),
        context,
        question.trim()
    )
}
