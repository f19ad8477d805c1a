//! Reply cascade for `POST /chat`.
//!
//! Each request walks three tiers in order and stops at the first reply:
//!
//! ```text
//! TRY_RETRIEVAL ──fail/skip──▶ TRY_DIRECT ──fail/skip──▶ TRY_LOCAL ──▶ DONE
//!       │                          │
//!       └──────── reply ───────────┴──────────────────────────────────▶ DONE
//! ```
//!
//! 1. **Retrieval**: the knowledge base answers the raw message. History is
//!    not forwarded; retrieval is single-turn.
//! 2. **Direct**: persona + rendered history + message go to the model with
//!    a bounded retry loop (loading and transport errors are retried after a
//!    fixed delay, anything else aborts the tier).
//! 3. **Local**: keyword-matched canned reply. Cannot fail.
//!
//! The [`Orchestrator`] is built once at startup and only read afterwards,
//! so concurrent requests share it without locking.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, RetryConfig};
use crate::fallback::LocalResponder;
use crate::model::{ModelBackend, ModelError};
use crate::models::{ChatReply, RetrievalResult, Turn};
use crate::retrieval::{KnowledgeBase, RetrievalError};

/// Returned when even the local tier could not run (the request task panicked).
pub const APOLOGY_REPLY: &str =
    "Sorry, something went wrong on my side. Please try again in a moment.";

/// Which backends were successfully initialized at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendState {
    pub index_available: bool,
    pub model_available: bool,
}

impl BackendState {
    pub fn mode(&self) -> &'static str {
        if self.index_available {
            "rag"
        } else {
            "llm-only"
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub loading_delay: Duration,
    pub transport_delay: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt, or `None` if the error is not retryable.
    fn delay_for(&self, err: &ModelError) -> Option<Duration> {
        match err {
            ModelError::Loading { .. } => Some(self.loading_delay),
            ModelError::Transport(_) => Some(self.transport_delay),
            ModelError::Api { .. } => None,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            loading_delay: Duration::from_millis(config.loading_delay_ms),
            transport_delay: Duration::from_millis(config.transport_delay_ms),
        }
    }
}

/// Why a tier produced no reply.
#[derive(Debug, thiserror::Error)]
pub enum TierFailure {
    #[error("backend not available")]
    Unavailable,
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("generation aborted on non-retryable error: {0}")]
    Aborted(ModelError),
    #[error("generation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: ModelError },
}

type TierResult = Result<ChatReply, TierFailure>;

pub struct Orchestrator {
    knowledge: Option<Arc<dyn KnowledgeBase>>,
    model: Option<Arc<dyn ModelBackend>>,
    local: LocalResponder,
    retry: RetryPolicy,
    persona: String,
}

impl Orchestrator {
    pub fn new(
        knowledge: Option<Arc<dyn KnowledgeBase>>,
        model: Option<Arc<dyn ModelBackend>>,
        retry: RetryPolicy,
        persona: impl Into<String>,
    ) -> Self {
        Self {
            knowledge,
            model,
            local: LocalResponder::new(),
            retry,
            persona: persona.into(),
        }
    }

    pub fn from_config(
        config: &Config,
        knowledge: Option<Arc<dyn KnowledgeBase>>,
        model: Option<Arc<dyn ModelBackend>>,
    ) -> Self {
        Self::new(
            knowledge,
            model,
            RetryPolicy::from(&config.retry),
            config.persona.system_prompt.clone(),
        )
    }

    pub fn state(&self) -> BackendState {
        BackendState {
            index_available: self.knowledge.is_some(),
            model_available: self.model.is_some(),
        }
    }

    /// Produce a reply for `message`. Never fails.
    pub async fn respond(&self, message: &str, history: &[Turn]) -> ChatReply {
        match self.try_retrieval(message).await {
            Ok(reply) => return reply,
            Err(TierFailure::Unavailable) => tracing::debug!("retrieval tier skipped"),
            Err(e) => tracing::warn!(error = %e, "retrieval tier failed, falling back to direct generation"),
        }

        match self.try_direct(message, history).await {
            Ok(reply) => return reply,
            Err(TierFailure::Unavailable) => tracing::debug!("direct tier skipped"),
            Err(e) => tracing::warn!(error = %e, "direct tier failed, falling back to local responder"),
        }

        self.local_reply(message)
    }

    async fn try_retrieval(&self, message: &str) -> TierResult {
        let knowledge = self.knowledge.as_ref().ok_or(TierFailure::Unavailable)?;
        let result = knowledge.query(message).await?;
        Ok(reply_from_retrieval(result))
    }

    async fn try_direct(&self, message: &str, history: &[Turn]) -> TierResult {
        let model = self.model.as_ref().ok_or(TierFailure::Unavailable)?;
        let prompt = render_prompt(&self.persona, history, message);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match model.generate(&prompt).await {
                Ok(text) => return Ok(ChatReply::text(text)),
                Err(e) => e,
            };

            let Some(delay) = self.retry.delay_for(&err) else {
                return Err(TierFailure::Aborted(err));
            };
            if attempt >= self.retry.max_attempts {
                return Err(TierFailure::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }

            tracing::info!(
                backend = model.name(),
                attempt,
                max_attempts = self.retry.max_attempts,
                error = %err,
                ?delay,
                "generation attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn local_reply(&self, message: &str) -> ChatReply {
        let category = self.local.classify(message);
        tracing::debug!(?category, "answering from local responder");
        ChatReply::text(crate::fallback::reply_for(category))
    }
}

/// Keep only documents that carry a source attribute, in order.
pub fn reply_from_retrieval(result: RetrievalResult) -> ChatReply {
    ChatReply {
        reply: result.answer,
        sources: result
            .source_documents
            .into_iter()
            .filter_map(|d| d.source)
            .collect(),
    }
}

/// Persona, then the conversation as `User:`/`Assistant:` lines, then the new message.
pub fn render_prompt(persona: &str, history: &[Turn], message: &str) -> String {
    let mut prompt = String::new();
    prompt.push_str(persona.trim());
    prompt.push_str("\n\n");
    for turn in history {
        prompt.push_str(&format!("User: {}\nAssistant: {}\n", turn.user, turn.assistant));
    }
    prompt.push_str(&format!("User: {}\nAssistant:", message));
    prompt
}
