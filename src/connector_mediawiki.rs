//! MediaWiki connector.
//!
//! Implements [`ContentSource`] against the `api.php` endpoint of each
//! configured corpus:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | search | `action=query&list=search&srprop=snippet` |
//! | sections | `action=parse&prop=sections` |
//! | section markup | `action=parse&prop=text&section=<index>` |
//!
//! All requests use `format=json&formatversion=2`. The API reports many
//! failures (unknown page id, bad section) as an `error` object in a 200
//! response; those are surfaced as errors too.
//!
//! # Configuration
//!
//! ```toml
//! [sources]
//! wikipedia_api = "https://en.wikipedia.org/w/api.php"
//! wikibooks_api = "https://en.wikibooks.org/w/api.php"
//! search_limit = 10
//! timeout_secs = 30
//! ```

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use crate::config::SourcesConfig;
use crate::extract::inline_text;
use crate::models::{SearchResult, SectionRef, Source};
use crate::traits::ContentSource;

pub struct MediaWikiSource {
    client: reqwest::Client,
    config: SourcesConfig,
}

impl MediaWikiSource {
    pub fn new(config: &SourcesConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, source: Source, params: &[(&str, String)]) -> Result<T> {
        let endpoint = self.config.endpoint(source);
        let response = self
            .client
            .get(endpoint)
            .query(&[("format", "json"), ("formatversion", "2")])
            .query(params)
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", endpoint))?;

        let status = response.status();
        if !status.is_success() {
            bail!("{} returned HTTP {}", endpoint, status);
        }

        let body: serde_json::Value = response
            .json()
            .await
            .with_context(|| format!("Invalid JSON from {}", endpoint))?;
        if let Some(error) = body.get("error") {
            let error: ApiError = serde_json::from_value(error.clone()).unwrap_or_default();
            bail!("MediaWiki API error {}: {}", error.code, error.info);
        }
        serde_json::from_value(body).with_context(|| format!("Unexpected response from {}", endpoint))
    }
}

#[async_trait]
impl ContentSource for MediaWikiSource {
    async fn search(&self, source: Source, query: &str) -> Result<Vec<SearchResult>> {
        let response: SearchResponse = self
            .call(
                source,
                &[
                    ("action", "query".to_string()),
                    ("list", "search".to_string()),
                    ("srsearch", query.to_string()),
                    ("srlimit", self.config.search_limit.to_string()),
                    ("srprop", "snippet".to_string()),
                ],
            )
            .await?;

        let hits = response.query.map(|q| q.search).unwrap_or_default();
        tracing::debug!(%source, query, hits = hits.len(), "search complete");
        Ok(hits
            .into_iter()
            .map(|hit| SearchResult {
                id: hit.pageid,
                title: hit.title,
                snippet: inline_text(&hit.snippet),
            })
            .collect())
    }

    async fn list_sections(&self, source: Source, page_id: u64) -> Result<Vec<SectionRef>> {
        let response: ParseResponse<SectionsBody> = self
            .call(
                source,
                &[
                    ("action", "parse".to_string()),
                    ("pageid", page_id.to_string()),
                    ("prop", "sections".to_string()),
                ],
            )
            .await?;

        let sections = response.parse.map(|p| p.sections).unwrap_or_default();
        Ok(to_section_refs(sections))
    }

    async fn fetch_section_markup(&self, source: Source, page_id: u64, index: u32) -> Result<String> {
        let response: ParseResponse<TextBody> = self
            .call(
                source,
                &[
                    ("action", "parse".to_string()),
                    ("pageid", page_id.to_string()),
                    ("prop", "text".to_string()),
                    ("section", index.to_string()),
                ],
            )
            .await?;

        Ok(response.parse.map(|p| p.text).unwrap_or_default())
    }
}

/// Keep addressable sections. Transcluded sections have indices like
/// `T-1` and cannot be fetched by index.
fn to_section_refs(sections: Vec<RawSection>) -> Vec<SectionRef> {
    sections
        .into_iter()
        .filter_map(|s| {
            let index = match s.index.parse::<u32>() {
                Ok(index) => index,
                Err(_) => {
                    tracing::debug!(index = %s.index, "skipping non-numeric section");
                    return None;
                }
            };
            Some(SectionRef {
                index,
                title: inline_text(&s.line),
                level: s.toclevel,
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    pageid: u64,
    title: String,
    #[serde(default)]
    snippet: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse<T> {
    parse: Option<T>,
}

#[derive(Debug, Deserialize)]
struct SectionsBody {
    #[serde(default)]
    sections: Vec<RawSection>,
}

#[derive(Debug, Deserialize)]
struct RawSection {
    index: String,
    line: String,
    #[serde(default = "default_toclevel")]
    toclevel: u32,
}

fn default_toclevel() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct TextBody {
    #[serde(default)]
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_parse_and_skip_transcluded() {
        let json = r#"{"parse": {"title": "Variance", "pageid": 32344, "sections": [
            {"toclevel": 1, "level": "2", "line": "Definition", "number": "1", "index": "1"},
            {"toclevel": 2, "level": "3", "line": "<i>Discrete</i> random variable", "number": "1.1", "index": "2"},
            {"toclevel": 1, "level": "2", "line": "Notes", "number": "2", "index": "T-1"}
        ]}}"#;
        let response: ParseResponse<SectionsBody> = serde_json::from_str(json).unwrap();
        let sections = to_section_refs(response.parse.unwrap().sections);

        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].index, 2);
        assert_eq!(sections[1].title, "Discrete random variable");
        assert_eq!(sections[1].level, 2);
    }

    #[test]
    fn search_without_query_block_is_empty() {
        let response: SearchResponse = serde_json::from_str(r#"{"batchcomplete": true}"#).unwrap();
        assert!(response.query.is_none());
    }

    #[test]
    fn api_error_defaults_when_fields_missing() {
        let error: ApiError = serde_json::from_str(r#"{"code": "nosuchpageid"}"#).unwrap();
        assert_eq!(error.code, "nosuchpageid");
        assert_eq!(error.info, "");
    }
}
