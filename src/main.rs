//! # Cogno CLI (`cogno`)
//!
//! ## Usage
//!
//! ```bash
//! cogno --config ./config/cogno.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cogno search "<query>"` | Search Wikipedia or Wikibooks |
//! | `cogno sections <page-id>` | List a page's addressable sections |
//! | `cogno lesson <page-id> --title <t> --sections 1,2` | Generate a lesson |
//! | `cogno study ["<query>"]` | Interactive search, lesson, and tutor loop |
//! | `cogno calendar "<topic>"` | Export spaced-repetition reminders (ICS) |
//! | `cogno completions <shell>` | Print a shell completion script |
//!
//! Logging is controlled by `COGNO_LOG` (default `warn`), e.g.
//! `COGNO_LOG=cogno=debug cogno search mean`.

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use cogno::cli::{self, LessonArgs, LessonFormat};
use cogno::config;
use cogno::models::Source;
use cogno::observer::ProgressMode;
use cogno::study;

/// Cogno: interactive lessons and a grounded tutor from encyclopedia articles.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cogno.example.toml` for a full example. API keys are
/// read from the environment (`GEMINI_API_KEY` or `OPENAI_API_KEY`).
#[derive(Parser)]
#[command(
    name = "cogno",
    about = "Cogno: interactive lessons and a grounded tutor from encyclopedia articles",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/cogno.toml")]
    config: PathBuf,

    /// Status output on stderr: `off`, `human`, or `json`. Defaults to
    /// `human` when stderr is a terminal.
    #[arg(long, global = true, value_parser = parse_progress)]
    progress: Option<ProgressMode>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search a corpus for pages.
    Search {
        /// The topic to search for.
        query: String,

        /// `wikipedia` or `wikibooks`.
        #[arg(long, default_value = "wikipedia")]
        source: Source,
    },

    /// List the addressable sections of a page.
    Sections {
        /// Page id (from `cogno search`).
        page_id: u64,

        #[arg(long, default_value = "wikipedia")]
        source: Source,
    },

    /// Generate a lesson from selected sections of a page.
    ///
    /// Fetches the sections concurrently, then makes one schema-constrained
    /// generation call. The lesson title is the page title.
    Lesson {
        /// Page id (from `cogno search`).
        page_id: u64,

        /// Page title; becomes the lesson title and topic.
        #[arg(long)]
        title: String,

        /// Comma-separated section indices (from `cogno sections`).
        #[arg(long)]
        sections: String,

        #[arg(long, default_value = "wikipedia")]
        source: Source,

        /// `text` or `json`.
        #[arg(long, default_value = "text")]
        format: String,

        /// Write to this file (or directory) instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Interactive loop: search, pick sections, generate, ask the tutor.
    Study {
        /// Optional first search.
        query: Option<String>,

        #[arg(long, default_value = "wikipedia")]
        source: Source,
    },

    /// Write spaced-repetition review reminders as an ICS calendar.
    Calendar {
        /// Lesson topic used in event titles.
        topic: String,

        /// Write to this file (or directory) instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print a shell completion script.
    Completions {
        shell: Shell,
    },
}

fn parse_progress(value: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(value)
        .ok_or_else(|| format!("invalid progress mode '{}': expected off, human, or json", value))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("COGNO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // Commands that don't require config
    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(*shell, &mut Cli::command(), "cogno", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_or_default(&cli.config)?;
    let progress = cli.progress.unwrap_or_else(ProgressMode::default_for_tty);

    match cli.command {
        Commands::Search { query, source } => {
            cli::run_search(&cfg, &query, source).await?;
        }
        Commands::Sections { page_id, source } => {
            cli::run_sections(&cfg, page_id, source).await?;
        }
        Commands::Lesson {
            page_id,
            title,
            sections,
            source,
            format,
            output,
        } => {
            let indices = cli::parse_indices(&sections)?;
            let args = LessonArgs {
                page_id,
                title: &title,
                sections: &indices,
                source,
                format: LessonFormat::parse(&format)?,
                output: output.as_deref(),
            };
            cli::run_lesson(&cfg, args, progress).await?;
        }
        Commands::Study { query, source } => {
            let mut session = cli::build_session(&cfg, progress)
                .context("Failed to set up the study session")?;
            session.set_source(source);
            study::run_study(&cfg, session, query.as_deref()).await?;
        }
        Commands::Calendar { topic, output } => {
            cli::run_calendar(&cfg, &topic, output.as_deref())?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
