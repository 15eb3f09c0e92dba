//! OpenAI-compatible chat completions.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};

use super::{api_key, ensure_success, error_message, http_client, sse, streaming_client};
use crate::config::GenerationConfig;
use crate::models::{ChatMessage, Role};
use crate::traits::{ChatBackend, StructuredGenerator, TextStream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub struct OpenAiModel {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiModel {
    pub fn new(base_url: &str, api_key: &str, model: &str, timeout_secs: u64) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout_secs)?,
            stream_client: streaming_client(timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(config: &GenerationConfig, model: &str) -> Result<Self> {
        let key = api_key(config)?;
        let base_url = config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        Self::new(base_url, &key, model, config.timeout_secs)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[async_trait]
impl StructuredGenerator for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, schema: &Value) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "lesson", "schema": schema }
            }
        });

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint()))?;
        let response = ensure_success("OpenAI", response).await?;
        let json: Value = response.json().await?;
        completion_text(&json)
    }
}

#[async_trait]
impl ChatBackend for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_reply(&self, system: &str, history: &[ChatMessage]) -> Result<TextStream> {
        let mut messages = vec![json!({ "role": "system", "content": system })];
        messages.extend(history.iter().map(|m| {
            json!({
                "role": match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                },
                "content": m.content,
            })
        }));
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true
        });

        let response = self
            .stream_client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.endpoint()))?;
        let response = ensure_success("OpenAI", response).await?;

        let deltas = sse::events(response).filter_map(|event| async move {
            match event {
                Ok(data) => delta_text(&data).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(deltas.boxed())
    }
}

/// `choices[0].message.content` of a non-streaming completion.
fn completion_text(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing message content"))
}

/// Text of one streamed chunk; `None` for chunks that carry no text.
fn delta_text(data: &str) -> Result<Option<String>> {
    if data.trim() == "[DONE]" {
        return Ok(None);
    }
    let json: Value = serde_json::from_str(data).context("Invalid OpenAI stream chunk")?;
    if let Some(message) = error_message(&json) {
        bail!("OpenAI stream error: {}", message);
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}
