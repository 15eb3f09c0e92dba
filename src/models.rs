//! Core data models used throughout Cogno.
//!
//! These types represent the search results, sections, snippets, lessons, and
//! chat messages that flow through the content-to-lesson pipeline and the
//! tutor loop.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// An external corpus that pages are searched and fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Wikipedia,
    Wikibooks,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Wikipedia, Source::Wikibooks];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Wikipedia => "wikipedia",
            Source::Wikibooks => "wikibooks",
        }
    }

    /// Public host serving the human-readable pages of this corpus.
    pub fn host(&self) -> &'static str {
        match self {
            Source::Wikipedia => "en.wikipedia.org",
            Source::Wikibooks => "en.wikibooks.org",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wikipedia" | "wp" => Ok(Source::Wikipedia),
            "wikibooks" | "wb" => Ok(Source::Wikibooks),
            other => Err(format!(
                "unknown source '{}': expected wikipedia or wikibooks",
                other
            )),
        }
    }
}

/// A page hit returned by the search collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub id: u64,
    pub title: String,
    /// Plain-text excerpt around the match.
    pub snippet: String,
}

/// The page the user is currently building a lesson from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub source: Source,
    pub id: u64,
    pub title: String,
    pub url: String,
}

impl Page {
    pub fn new(source: Source, id: u64, title: impl Into<String>) -> Self {
        let title = title.into();
        let url = format!(
            "https://{}/wiki/{}",
            source.host(),
            urlencoding::encode(&title.replace(' ', "_"))
        );
        Self {
            source,
            id,
            title,
            url,
        }
    }
}

/// An addressable subsection of a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionRef {
    /// Unique within a page; the document-order key.
    pub index: u32,
    pub title: String,
    /// Depth in the table of contents (1 = top-level heading).
    pub level: u32,
}

/// The user's chosen sections, keyed and ordered by section index.
///
/// Iteration always yields ascending indices regardless of the order
/// in which sections were toggled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    sections: BTreeMap<u32, SectionRef>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the section if absent, remove it if present.
    /// Returns `true` when the section is selected afterwards.
    pub fn toggle(&mut self, section: SectionRef) -> bool {
        if self.sections.remove(&section.index).is_some() {
            false
        } else {
            self.sections.insert(section.index, section);
            true
        }
    }

    pub fn contains(&self, index: u32) -> bool {
        self.sections.contains_key(&index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionRef> {
        self.sections.values()
    }

    pub fn indices(&self) -> Vec<u32> {
        self.sections.keys().copied().collect()
    }

    pub fn to_vec(&self) -> Vec<SectionRef> {
        self.sections.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn clear(&mut self) {
        self.sections.clear();
    }
}

/// Sanitized plain text of one selected section, paired with its title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snippet {
    pub title: String,
    pub content: String,
}

/// The structured pedagogical artifact synthesized from snippets.
///
/// Field names serialize in camelCase to match the generation schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    /// Always replaced with the requested topic after synthesis.
    #[serde(default)]
    pub title: String,
    pub introduction: String,
    pub core_concepts: Vec<CoreConcept>,
    pub key_formulas: Vec<KeyFormula>,
    pub worked_example: WorkedExample,
    pub active_recall_prompts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConcept {
    pub concept: String,
    pub explanation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFormula {
    /// LaTeX source.
    pub formula: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkedExample {
    pub problem: String,
    pub solution: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the tutor transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}
