//! Core data models used throughout the agent.
//!
//! These types describe the documents and chunks that flow through the
//! indexing pipeline, and the chat request/reply shapes served over HTTP.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw document produced by the content scanner before chunking.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Path relative to the content root, plus `#n` for entries inside a JSON file.
    pub source_id: String,
    /// Citation reported back to chat clients. `None` means the document is uncitable.
    pub source: Option<String>,
    pub title: Option<String>,
    pub content_type: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// A chunk of a document's body text.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub source_id: String,
    pub source: Option<String>,
    pub chunk_index: i64,
    pub text: String,
    pub hash: String,
}

/// A document handed back by the knowledge base.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    pub text: String,
    pub source: Option<String>,
}

/// Answer plus the documents it was grounded on.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub answer: String,
    pub source_documents: Vec<RetrievedDocument>,
}

/// One completed exchange of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub assistant: String,
}

/// Body of `POST /chat`.
///
/// `history` is kept as raw JSON so that malformed entries can be dropped
/// instead of rejecting the whole request; see [`ChatRequest::turns`].
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<serde_json::Value>,
}

impl ChatRequest {
    /// Well-formed `[user, assistant]` pairs, in order. Anything else is skipped.
    pub fn turns(&self) -> Vec<Turn> {
        self.history.iter().filter_map(turn_from_value).collect()
    }
}

fn turn_from_value(value: &serde_json::Value) -> Option<Turn> {
    match value.as_array()?.as_slice() {
        [user, assistant] => Some(Turn {
            user: user.as_str()?.to_string(),
            assistant: assistant.as_str()?.to_string(),
        }),
        _ => None,
    }
}

/// Body of a successful `POST /chat` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    pub sources: Vec<String>,
}

impl ChatReply {
    pub fn text(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
            sources: Vec::new(),
        }
    }
}
