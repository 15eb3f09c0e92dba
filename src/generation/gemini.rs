//! Google Generative Language API.
//!
//! Schemas use the API's OpenAPI subset, whose type names are upper case
//! (`OBJECT`, `STRING`, ...). Chat roles are `user` and `model`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};

use super::{api_key, ensure_success, error_message, http_client, sse, streaming_client};
use crate::config::GenerationConfig;
use crate::models::{ChatMessage, Role};
use crate::traits::{ChatBackend, StructuredGenerator, TextStream};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiModel {
    client: reqwest::Client,
    stream_client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiModel {
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

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url, self.model, method)
    }
}

#[async_trait]
impl StructuredGenerator for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, schema: &Value) -> Result<String> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": to_gemini_schema(schema)
            }
        });

        let url = self.endpoint("generateContent");
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;
        let response = ensure_success("Gemini", response).await?;
        let json: Value = response.json().await?;
        match candidate_text(&json) {
            Some(text) => Ok(text),
            None => bail!("Invalid Gemini response: no candidate text"),
        }
    }
}

#[async_trait]
impl ChatBackend for GeminiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn stream_reply(&self, system: &str, history: &[ChatMessage]) -> Result<TextStream> {
        let contents: Vec<Value> = history
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        Role::User => "user",
                        Role::Assistant => "model",
                    },
                    "parts": [{ "text": m.content }]
                })
            })
            .collect();
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system }] },
            "contents": contents
        });

        let url = format!("{}?alt=sse", self.endpoint("streamGenerateContent"));
        let response = self
            .stream_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", url))?;
        let response = ensure_success("Gemini", response).await?;

        let deltas = sse::events(response).filter_map(|event| async move {
            match event {
                Ok(data) => delta_text(&data).transpose(),
                Err(e) => Some(Err(e)),
            }
        });
        Ok(deltas.boxed())
    }
}

/// Concatenated text parts of the first candidate.
fn candidate_text(json: &Value) -> Option<String> {
    let parts = json.pointer("/candidates/0/content/parts")?.as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    Some(text)
}

fn delta_text(data: &str) -> Result<Option<String>> {
    let json: Value = serde_json::from_str(data).context("Invalid Gemini stream chunk")?;
    if let Some(message) = error_message(&json) {
        bail!("Gemini stream error: {}", message);
    }
    Ok(candidate_text(&json).filter(|t| !t.is_empty()))
}

/// Rewrite a JSON Schema into the API's dialect: upper-case type names,
/// everything else unchanged.
pub fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let converted: Map<String, Value> = map
                .iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(t)) => Value::String(t.to_ascii_uppercase()),
                        _ => to_gemini_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect();
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}
