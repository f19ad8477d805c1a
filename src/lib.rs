//! # Lab Agent
//!
//! A small chat service for a lab website. Answers visitor questions by
//! retrieval-augmented generation over the site's content when it can, by
//! direct generation from a hosted model when retrieval fails, and from a
//! canned offline responder when every remote call fails.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │  content/   │──▶│ Chunk+Embed  │──▶│ KnowledgeIndex   │
//! │ md/txt/json │   │ (startup)    │   │ (in memory)      │
//! └─────────────┘   └──────────────┘   └────────┬─────────┘
//!                                               ▼
//!  POST /chat ──▶ Orchestrator: retrieval ─▶ direct (retry) ─▶ local
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`connector_fs`] | Content directory scanner |
//! | [`extract`] | PDF text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory knowledge index |
//! | [`model`] | Text-generation backends |
//! | [`retrieval`] | Retrieval chain |
//! | [`fallback`] | Offline keyword responder |
//! | [`orchestrator`] | Reply cascade with retry policy |
//! | [`startup`] | One-time backend initialization |
//! | [`server`] | HTTP service |

pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod embedding;
pub mod extract;
pub mod fallback;
pub mod index;
pub mod model;
pub mod models;
pub mod orchestrator;
pub mod retrieval;
pub mod server;
pub mod startup;
