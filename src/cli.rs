//! One-shot CLI commands.
//!
//! Each `run_*` function backs one `cogno` subcommand. Results go to stdout;
//! status lines go to stderr through the configured observer so stdout
//! stays parseable.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::calendar::{generate_ics, ICS_FILE_NAME};
use crate::config::Config;
use crate::connector_mediawiki::MediaWikiSource;
use crate::generation::{create_chat, create_generator};
use crate::models::{SearchResult, SectionRef, Source};
use crate::observer::ProgressMode;
use crate::render::{download_file_name, lesson_json, lesson_text};
use crate::session::{Session, SessionSettings};
use crate::traits::{Backends, ContentSource};

/// Output format of `cogno lesson`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonFormat {
    Text,
    Json,
}

impl LessonFormat {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "text" => Ok(LessonFormat::Text),
            "json" => Ok(LessonFormat::Json),
            other => bail!("Unknown format: '{}'. Must be text or json.", other),
        }
    }
}

/// Content source plus the configured model providers.
pub fn build_backends(config: &Config) -> Result<Backends> {
    let source = Arc::new(MediaWikiSource::new(&config.sources)?);
    let generator = create_generator(&config.generation)?;
    let chat = create_chat(&config.generation)?;
    Ok(Backends::new(source, generator, chat))
}

/// Build a session with an observer for `progress`.
pub fn build_session(config: &Config, progress: ProgressMode) -> Result<Session> {
    let mut session = Session::new(build_backends(config)?, SessionSettings::from_config(config));
    session.add_observer(progress.observer());
    Ok(session)
}

pub async fn run_search(config: &Config, query: &str, source: Source) -> Result<()> {
    if query.trim().is_empty() {
        bail!("Please enter a topic to search.");
    }
    let wiki = MediaWikiSource::new(&config.sources)?;
    let results = wiki
        .search(source, query.trim())
        .await
        .with_context(|| format!("Search failed on {}", source))?;

    if results.is_empty() {
        println!("No results found. Try another topic.");
        return Ok(());
    }
    print_results(&results);
    Ok(())
}

pub fn print_results(results: &[SearchResult]) {
    for (i, result) in results.iter().enumerate() {
        println!("{:>2}. {}  (page {})", i + 1, result.title, result.id);
        if !result.snippet.is_empty() {
            println!("    {}", result.snippet);
        }
    }
}

pub async fn run_sections(config: &Config, page_id: u64, source: Source) -> Result<()> {
    let wiki = MediaWikiSource::new(&config.sources)?;
    let sections = wiki
        .list_sections(source, page_id)
        .await
        .with_context(|| format!("Failed to load sections of page {}", page_id))?;

    if sections.is_empty() {
        println!("No sections.");
        return Ok(());
    }
    print_sections(&sections, |_| false);
    Ok(())
}

/// One line per section, indented by level, with `[x]` for selected ones.
pub fn print_sections(sections: &[SectionRef], selected: impl Fn(u32) -> bool) {
    for section in sections {
        let indent = "  ".repeat(section.level.saturating_sub(1) as usize);
        let mark = if selected(section.index) { "[x]" } else { "[ ]" };
        println!("{:>4} {} {}{}", section.index, mark, indent, section.title);
    }
}

/// Parse `1,3,5` into section indices.
pub fn parse_indices(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u32>()
                .with_context(|| format!("Invalid section index: '{}'", s))
        })
        .collect()
}

pub struct LessonArgs<'a> {
    pub page_id: u64,
    pub title: &'a str,
    pub sections: &'a [u32],
    pub source: Source,
    pub format: LessonFormat,
    pub output: Option<&'a Path>,
}

/// Fetch the sections of one page and synthesize a lesson from them.
pub async fn run_lesson(config: &Config, args: LessonArgs<'_>, progress: ProgressMode) -> Result<()> {
    if args.sections.is_empty() {
        bail!("Select at least one section (--sections 1,2,...)");
    }

    let mut session = build_session(config, progress)?;
    session.set_source(args.source);
    let page = SearchResult {
        id: args.page_id,
        title: args.title.to_string(),
        snippet: String::new(),
    };

    session.select_page(&page).await;
    if let Some(err) = session.sections_error() {
        bail!("{}", err);
    }
    for &index in args.sections {
        if session.toggle_section(index).is_none() {
            bail!("Page {} has no section {}", args.page_id, index);
        }
    }

    session.generate_lesson().await;
    if let Some(err) = session.lesson_error() {
        bail!("{}", err);
    }
    let Some(active) = session.active_lesson() else {
        bail!("No lesson was generated");
    };

    let rendered = match args.format {
        LessonFormat::Text => lesson_text(&active.lesson, Some(&active.page.url)),
        LessonFormat::Json => lesson_json(&active.lesson)?,
    };

    match args.output {
        Some(path) => {
            let path = resolve_output(path, || download_file_name(&active.lesson.title));
            write_file(&path, &rendered)?;
            println!("Lesson written to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}

/// Write the review calendar for `topic`, to `output` or stdout.
pub fn run_calendar(config: &Config, topic: &str, output: Option<&Path>) -> Result<()> {
    if topic.trim().is_empty() {
        bail!("Topic must not be empty");
    }
    let ics = generate_ics(topic.trim(), &chrono::Local::now(), &config.calendar);
    match output {
        Some(path) => {
            let path = resolve_output(path, || ICS_FILE_NAME.to_string());
            write_file(&path, &ics)?;
            println!("Review calendar written to {}", path.display());
        }
        None => print!("{}", ics),
    }
    Ok(())
}

/// A directory output gets the default file name appended.
pub fn resolve_output(path: &Path, default_name: impl FnOnce() -> String) -> PathBuf {
    if path.is_dir() {
        path.join(default_name())
    } else {
        path.to_path_buf()
    }
}

pub fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
