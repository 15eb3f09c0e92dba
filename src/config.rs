//! TOML configuration parsing and validation.
//!
//! Every section has defaults, so an empty file (or no file at all, see
//! [`load_or_default`]) yields a working configuration. API keys are never
//! read from the file: `[generation].api_key_env` names the environment
//! variable that holds the key.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::models::Source;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub lesson: LessonConfig,
    #[serde(default)]
    pub tutor: TutorConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    #[serde(default = "default_wikipedia_api")]
    pub wikipedia_api: String,
    #[serde(default = "default_wikibooks_api")]
    pub wikibooks_api: String,
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            wikipedia_api: default_wikipedia_api(),
            wikibooks_api: default_wikibooks_api(),
            search_limit: default_search_limit(),
            user_agent: default_user_agent(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SourcesConfig {
    /// The `api.php` endpoint for a corpus.
    pub fn endpoint(&self, source: Source) -> &str {
        match source {
            Source::Wikipedia => &self.wikipedia_api,
            Source::Wikibooks => &self.wikibooks_api,
        }
    }
}

fn default_wikipedia_api() -> String {
    "https://en.wikipedia.org/w/api.php".to_string()
}
fn default_wikibooks_api() -> String {
    "https://en.wikibooks.org/w/api.php".to_string()
}
fn default_search_limit() -> u32 {
    10
}
fn default_user_agent() -> String {
    format!("cogno/{} (lesson generator)", env!("CARGO_PKG_VERSION"))
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_lesson_model")]
    pub lesson_model: String,
    #[serde(default = "default_tutor_model")]
    pub tutor_model: String,
    /// Overrides the provider's public endpoint (proxies, local gateways).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            lesson_model: default_lesson_model(),
            tutor_model: default_tutor_model(),
            base_url: None,
            api_key_env: None,
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Name of the environment variable holding the API key, falling back
    /// to the provider's conventional variable.
    pub fn key_variable(&self) -> &str {
        if let Some(var) = self.api_key_env.as_deref() {
            return var;
        }
        match self.provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            _ => "GEMINI_API_KEY",
        }
    }
}

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_lesson_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_tutor_model() -> String {
    "gemini-2.5-pro".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct LessonConfig {
    /// Characters of each snippet sent to the lesson model.
    #[serde(default = "default_snippet_chars")]
    pub snippet_chars: usize,
}

impl Default for LessonConfig {
    fn default() -> Self {
        Self {
            snippet_chars: default_snippet_chars(),
        }
    }
}

fn default_snippet_chars() -> usize {
    1500
}

#[derive(Debug, Deserialize, Clone)]
pub struct TutorConfig {
    /// Characters of grounding context embedded in the system instruction.
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default = "default_tutor_name")]
    pub name: String,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            context_chars: default_context_chars(),
            name: default_tutor_name(),
        }
    }
}

fn default_context_chars() -> usize {
    2000
}
fn default_tutor_name() -> String {
    "Cogno".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalendarConfig {
    #[serde(default = "default_review_days")]
    pub review_days: Vec<u32>,
    /// Local hour of day each review starts at.
    #[serde(default = "default_hour")]
    pub hour: u32,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
    #[serde(default = "default_alarm_minutes")]
    pub alarm_minutes: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            review_days: default_review_days(),
            hour: default_hour(),
            duration_minutes: default_duration_minutes(),
            alarm_minutes: default_alarm_minutes(),
        }
    }
}

fn default_review_days() -> Vec<u32> {
    vec![1, 3, 7]
}
fn default_hour() -> u32 {
    10
}
fn default_duration_minutes() -> u32 {
    30
}
fn default_alarm_minutes() -> u32 {
    15
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load the config at `path`, or fall back to [`Config::minimal`] when the
/// file does not exist. A file that exists but is invalid is still an error.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::minimal());
    }
    load_config(path)
}

fn validate(config: &Config) -> Result<()> {
    if !(1..=50).contains(&config.sources.search_limit) {
        bail!("sources.search_limit must be in [1, 50]");
    }
    if config.sources.timeout_secs == 0 {
        bail!("sources.timeout_secs must be > 0");
    }
    for source in Source::ALL {
        let endpoint = config.sources.endpoint(source);
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            bail!(
                "sources.{}_api must be an http(s) URL, got '{}'",
                source,
                endpoint
            );
        }
    }

    match config.generation.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }
    if config.generation.is_enabled() {
        if config.generation.lesson_model.trim().is_empty() {
            bail!("generation.lesson_model must not be empty");
        }
        if config.generation.tutor_model.trim().is_empty() {
            bail!("generation.tutor_model must not be empty");
        }
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }

    if config.lesson.snippet_chars == 0 {
        bail!("lesson.snippet_chars must be > 0");
    }
    if config.tutor.context_chars == 0 {
        bail!("tutor.context_chars must be > 0");
    }

    if config.calendar.review_days.is_empty() {
        bail!("calendar.review_days must not be empty");
    }
    if config.calendar.hour > 23 {
        bail!("calendar.hour must be in [0, 23]");
    }
    if config.calendar.duration_minutes == 0 {
        bail!("calendar.duration_minutes must be > 0");
    }

    Ok(())
}
