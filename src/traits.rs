//! Collaborator traits at the edges of the pipeline.
//!
//! The session never talks to the network directly. It drives three
//! collaborators, each behind an `async-trait` object so tests and embedders
//! can substitute their own:
//!
//! ```text
//! ┌────────────────┐   ┌─────────────────────┐   ┌──────────────┐
//! │ ContentSource  │   │ StructuredGenerator │   │ ChatBackend  │
//! │ search/sections│   │ prompt + schema     │   │ system +     │
//! │ section markup │   │  → JSON text        │   │ history →    │
//! └───────┬────────┘   └──────────┬──────────┘   │ text stream  │
//!         │                       │              └──────┬───────┘
//!         └───────────────┬───────┴─────────────────────┘
//!                         ▼
//!                    Backends → Session
//! ```
//!
//! Implementations report failures as [`anyhow::Error`]; the session converts
//! them into the typed error of the stage that made the call.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use cogno::models::{SearchResult, SectionRef, Source};
//! use cogno::traits::ContentSource;
//!
//! struct Offline;
//!
//! #[async_trait]
//! impl ContentSource for Offline {
//!     async fn search(&self, _source: Source, _query: &str) -> Result<Vec<SearchResult>> {
//!         Ok(vec![])
//!     }
//!     async fn list_sections(&self, _source: Source, _page_id: u64) -> Result<Vec<SectionRef>> {
//!         Ok(vec![])
//!     }
//!     async fn fetch_section_markup(&self, _source: Source, _page_id: u64, _index: u32) -> Result<String> {
//!         anyhow::bail!("offline")
//!     }
//! }
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use std::sync::Arc;

use crate::models::{ChatMessage, SearchResult, SectionRef, Source};

/// Incremental text fragments of one streamed reply, in arrival order.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Search, section listing, and raw section content for a corpus.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Search a corpus. An empty vector means "no results", not an error.
    async fn search(&self, source: Source, query: &str) -> Result<Vec<SearchResult>>;

    /// List the addressable sections of a page in document order.
    async fn list_sections(&self, source: Source, page_id: u64) -> Result<Vec<SectionRef>>;

    /// Fetch the rendered markup of one section. Sanitizing it is the
    /// caller's job (see [`crate::extract::section_text`]).
    async fn fetch_section_markup(&self, source: Source, page_id: u64, index: u32)
        -> Result<String>;
}

/// Schema-constrained generation.
#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.5-flash"`).
    fn model_name(&self) -> &str;

    /// Generate a response conforming to `schema` (a JSON Schema object)
    /// and return its raw JSON text. Parsing is left to the caller so a
    /// malformed response can be reported precisely.
    async fn generate(&self, prompt: &str, schema: &Value) -> Result<String>;
}

/// Streaming multi-turn chat.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"gemini-2.5-pro"`).
    fn model_name(&self) -> &str;

    /// Open a streamed reply to the last message of `history`.
    ///
    /// `history` is the full transcript so far, ending with the user's new
    /// message. An `Err` here means the stream could not be opened; errors
    /// yielded by the stream itself are mid-stream failures.
    async fn stream_reply(&self, system: &str, history: &[ChatMessage]) -> Result<TextStream>;
}

/// The three collaborators a session drives.
#[derive(Clone)]
pub struct Backends {
    pub source: Arc<dyn ContentSource>,
    pub generator: Arc<dyn StructuredGenerator>,
    pub chat: Arc<dyn ChatBackend>,
}

impl Backends {
    pub fn new(
        source: Arc<dyn ContentSource>,
        generator: Arc<dyn StructuredGenerator>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            source,
            generator,
            chat,
        }
    }
}
