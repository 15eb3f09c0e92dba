//! Typed failures for each pipeline stage.
//!
//! Collaborators report failures as [`anyhow::Error`]; the call site that
//! wraps each external call converts them into one of these enums, which the
//! session keeps in the error slot of the stage that failed. All of them are
//! `Clone` so a slot can be read without being consumed.

use thiserror::Error;

/// Render an [`anyhow::Error`] with its context chain on one line.
pub(crate) fn detail(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("please enter a topic to search")]
    EmptyQuery,
    #[error("search failed: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SectionLoadError {
    #[error("failed to load sections: {0}")]
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContentFetchError {
    #[error("failed to fetch section {index}: {reason}")]
    Request { index: u32, reason: String },
    #[error("failed to read markup of section {index}: {reason}")]
    Markup { index: u32, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    #[error("generation request failed: {0}")]
    Request(String),
    #[error("failed to parse lesson from model response: {0}")]
    Malformed(String),
}

/// Anything that can leave the lesson slot empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LessonError {
    #[error(transparent)]
    Fetch(#[from] ContentFetchError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TutorError {
    #[error("could not reach the tutor: {0}")]
    Open(String),
    #[error("tutor reply interrupted: {0}")]
    Stream(String),
}
