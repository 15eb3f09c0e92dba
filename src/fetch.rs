//! Section content fetching.
//!
//! Fetches the selected sections of a page concurrently and turns each one
//! into a [`Snippet`]. The batch is all-or-nothing: the first failure aborts
//! it, and the successful results are returned in the order of the input
//! sections, not the order the requests completed in.

use futures::future::try_join_all;

use crate::error::{detail, ContentFetchError};
use crate::extract;
use crate::models::{Page, SectionRef, Snippet};
use crate::traits::ContentSource;

/// Fetch and sanitize one section.
pub async fn fetch_snippet(
    source: &dyn ContentSource,
    page: &Page,
    section: &SectionRef,
) -> Result<Snippet, ContentFetchError> {
    let markup = source
        .fetch_section_markup(page.source, page.id, section.index)
        .await
        .map_err(|e| ContentFetchError::Request {
            index: section.index,
            reason: detail(&e),
        })?;

    let content = extract::section_text(&markup).map_err(|e| ContentFetchError::Markup {
        index: section.index,
        reason: e.to_string(),
    })?;

    tracing::debug!(
        page_id = page.id,
        section = section.index,
        chars = content.chars().count(),
        "fetched section"
    );

    Ok(Snippet {
        title: section.title.clone(),
        content,
    })
}

/// Fetch every section concurrently, returning snippets in input order.
pub async fn fetch_snippets(
    source: &dyn ContentSource,
    page: &Page,
    sections: &[SectionRef],
) -> Result<Vec<Snippet>, ContentFetchError> {
    try_join_all(
        sections
            .iter()
            .map(|section| fetch_snippet(source, page, section)),
    )
    .await
}

/// Join snippets into the tutor's grounding context.
pub fn grounding_context(snippets: &[Snippet]) -> String {
    snippets
        .iter()
        .map(|s| format!("{}\n{}", s.title, s.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}
