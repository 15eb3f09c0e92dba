//! Model providers for lesson generation and tutoring.
//!
//! Each provider implements both [`StructuredGenerator`] and [`ChatBackend`];
//! one instance is created per model, so lessons and tutoring can use
//! different models of the same provider:
//!
//! - **`gemini`**: Google Generative Language API (`generateContent`,
//!   `streamGenerateContent?alt=sse`).
//! - **`openai`**: any OpenAI-compatible `/chat/completions` endpoint.
//! - **`disabled`**: every call fails; lets the content commands run
//!   without credentials.
//!
//! # Provider Selection
//!
//! ```rust
//! use cogno::config::GenerationConfig;
//! use cogno::generation::create_generator;
//!
//! let mut config = GenerationConfig::default();
//! config.provider = "disabled".to_string();
//! let generator = create_generator(&config).unwrap();
//! assert_eq!(generator.model_name(), "disabled");
//! ```
//!
//! Requests are made once. Failures are reported to the session, which
//! records them; there is no retry.

pub mod gemini;
pub mod openai;
pub mod sse;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::models::ChatMessage;
use crate::traits::{ChatBackend, StructuredGenerator, TextStream};

pub use gemini::GeminiModel;
pub use openai::OpenAiModel;

/// Build the lesson generator selected by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn StructuredGenerator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => Ok(Arc::new(GeminiModel::from_config(config, &config.lesson_model)?)),
        "openai" => Ok(Arc::new(OpenAiModel::from_config(config, &config.lesson_model)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Build the tutor chat backend selected by `config.provider`.
pub fn create_chat(config: &GenerationConfig) -> Result<Arc<dyn ChatBackend>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledModel)),
        "gemini" => Ok(Arc::new(GeminiModel::from_config(config, &config.tutor_model)?)),
        "openai" => Ok(Arc::new(OpenAiModel::from_config(config, &config.tutor_model)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Fails every call. Used when `generation.provider = "disabled"`.
pub struct DisabledModel;

const DISABLED: &str =
    "Generation provider is disabled; set [generation].provider in the config file";

#[async_trait]
impl StructuredGenerator for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _schema: &Value) -> Result<String> {
        bail!(DISABLED)
    }
}

#[async_trait]
impl ChatBackend for DisabledModel {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn stream_reply(&self, _system: &str, _history: &[ChatMessage]) -> Result<TextStream> {
        bail!(DISABLED)
    }
}

/// Read the API key named by the config.
fn api_key(config: &GenerationConfig) -> Result<String> {
    let var = config.key_variable();
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => bail!("{} environment variable not set", var),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Client for streaming calls: connect timeout only, so long replies are
/// not cut off.
fn streaming_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Fail with the vendor's message on a non-2xx response.
async fn ensure_success(vendor: &str, response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|v| error_message(&v))
        .unwrap_or(body);
    bail!("{} API error {}: {}", vendor, status, message.trim())
}

/// `{"error": {"message": ...}}`, the shape both vendors use.
fn error_message(body: &Value) -> Option<String> {
    body.get("error")
        .and_then(|e| e.get("message").or(Some(e)))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
