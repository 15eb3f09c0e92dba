//! Interactive study loop (`cogno study`).
//!
//! Walks one [`Session`] through the whole pipeline from a line-oriented
//! prompt. Slash commands drive search, page and section selection, and
//! lesson generation; any other input is a question for the tutor once a
//! lesson is loaded. Tutor replies stream to stdout as they arrive.

use anyhow::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::calendar::{generate_ics, ICS_FILE_NAME};
use crate::cli::{print_results, print_sections, resolve_output, write_file};
use crate::config::Config;
use crate::models::Source;
use crate::observer::{SessionEvent, SessionObserver};
use crate::render::{download_file_name, lesson_text};
use crate::session::Session;
use crate::tutor::APOLOGY;

const HELP: &str = "\
Commands:
  /search <topic>      search the current source
  /source <name>       switch to wikipedia or wikibooks
  /open <n>            open result n and list its sections
  /toggle <i> [j ...]  select or deselect sections by index
  /generate            build a lesson from the selected sections
  /lesson              show the current lesson
  /export [path]       save the lesson as text
  /calendar [path]     save spaced-repetition reminders (.ics)
  /clear               start over
  /help                show this help
  /quit                leave
Anything else is a question for the tutor once a lesson is ready.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Search(String),
    Source(String),
    Open(String),
    Toggle(Vec<String>),
    Generate,
    Lesson,
    Export(Option<PathBuf>),
    Calendar(Option<PathBuf>),
    Clear,
    Help,
    Quit,
    Ask(String),
    Unknown(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Ask(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let path = || (!arg.is_empty()).then(|| PathBuf::from(arg));

    match name {
        "search" | "s" => Command::Search(arg.to_string()),
        "source" => Command::Source(arg.to_string()),
        "open" | "o" => Command::Open(arg.to_string()),
        "toggle" | "t" => Command::Toggle(arg.split_whitespace().map(str::to_string).collect()),
        "generate" | "g" => Command::Generate,
        "lesson" => Command::Lesson,
        "export" => Command::Export(path()),
        "calendar" => Command::Calendar(path()),
        "clear" => Command::Clear,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        other => Command::Unknown(other.to_string()),
    }
}

/// Prints tutor reply text to stdout as it streams.
struct ReplyPrinter {
    name: String,
}

impl SessionObserver for ReplyPrinter {
    fn report(&self, event: &SessionEvent) {
        let mut out = std::io::stdout().lock();
        match event {
            SessionEvent::ReplyStarted => {
                let _ = write!(out, "{}> ", self.name);
            }
            SessionEvent::ReplyDelta { chunk } => {
                let _ = write!(out, "{}", chunk);
            }
            SessionEvent::ReplyFinished { .. } => {
                let _ = writeln!(out);
            }
            _ => return,
        }
        let _ = out.flush();
    }
}

pub async fn run_study(
    config: &Config,
    mut session: Session,
    initial_query: Option<&str>,
) -> Result<()> {
    session.add_observer(Arc::new(ReplyPrinter {
        name: config.tutor.name.clone(),
    }));

    println!("{} study session on {}. Type /help for commands.", config.tutor.name, session.source());
    if let Some(query) = initial_query {
        search(&mut session, query).await;
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        let _ = std::io::stdout().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };

        if dispatch(config, &mut session, parse_command(&line)).await == Flow::Quit {
            break;
        }
    }
    Ok(())
}

/// Whether the loop keeps reading input after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// Run one command. Failures are printed and the session stays open.
async fn dispatch(config: &Config, session: &mut Session, command: Command) -> Flow {
    match command {
        Command::Empty => {}
        Command::Quit => return Flow::Quit,
        Command::Help => println!("{}", HELP),
        Command::Search(query) => search(session, &query).await,
        Command::Source(name) => match name.parse::<Source>() {
            Ok(source) => {
                session.set_source(source);
                println!("Source: {}", session.source());
                let query = session.query().to_string();
                if !query.is_empty() {
                    search(session, &query).await;
                }
            }
            Err(e) => println!("{}", e),
        },
        Command::Open(arg) => open(session, &arg).await,
        Command::Toggle(args) => toggle(session, &args),
        Command::Generate => generate(session).await,
        Command::Lesson => match session.active_lesson() {
            Some(active) => print!("{}", lesson_text(&active.lesson, Some(&active.page.url))),
            None => println!("No lesson yet. Select sections and run /generate."),
        },
        Command::Export(path) => print_failure(export(session, path)),
        Command::Calendar(path) => print_failure(calendar(config, session, path)),
        Command::Clear => {
            session.clear_search();
            println!("Cleared.");
        }
        Command::Ask(question) => ask(session, &question).await,
        Command::Unknown(name) => println!("Unknown command /{}. Type /help.", name),
    }
    Flow::Continue
}

fn print_failure(result: Result<()>) {
    if let Err(e) = result {
        println!("{:#}", e);
    }
}

async fn search(session: &mut Session, query: &str) {
    session.search(query).await;
    if let Some(err) = session.search_error() {
        println!("{}", err);
    } else if session.results().is_empty() {
        println!("No results found. Try another topic.");
    } else {
        print_results(session.results());
        println!("Open one with /open <n>.");
    }
}

async fn open(session: &mut Session, arg: &str) {
    let Some(result) = arg
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|i| session.results().get(i))
        .cloned()
    else {
        println!("Pick a result number between 1 and {}.", session.results().len());
        return;
    };

    session.select_page(&result).await;
    if let Some(err) = session.sections_error() {
        println!("{}", err);
    } else if session.sections().is_empty() {
        println!("This page has no sections to choose from.");
    } else {
        println!("{}", result.title);
        print_sections(session.sections(), |_| false);
        println!("Select with /toggle <index>, then /generate.");
    }
}

fn toggle(session: &mut Session, args: &[String]) {
    for arg in args {
        match arg.parse::<u32>().ok().and_then(|i| session.toggle_section(i)) {
            Some(_) => {}
            None => println!("No section {}.", arg),
        }
    }
    print_sections(session.sections(), |i| session.selection().contains(i));
}

async fn generate(session: &mut Session) {
    if !session.generate_lesson().await {
        if session.page().is_none() {
            println!("Open a page first.");
        } else {
            println!("Select at least one section first.");
        }
        return;
    }
    match (session.active_lesson(), session.lesson_error()) {
        (Some(active), _) => {
            print!("{}", lesson_text(&active.lesson, Some(&active.page.url)));
            println!();
            println!("Ask the tutor anything about this lesson.");
        }
        (None, Some(err)) => println!("{}", err),
        (None, None) => {}
    }
}

async fn ask(session: &mut Session, question: &str) {
    if !session.tutor_available() {
        println!("Generate a lesson first; the tutor answers questions about it.");
        return;
    }
    session.send_tutor_message(question).await;
    // The transcript keeps the same apology; streamed text is already out.
    if let Some(err) = session.tutor_error() {
        println!("{} {}", APOLOGY, err);
    }
}

fn export(session: &Session, path: Option<PathBuf>) -> Result<()> {
    let Some(active) = session.active_lesson() else {
        println!("No lesson to export.");
        return Ok(());
    };
    let default_name = || download_file_name(&active.lesson.title);
    let path = match path {
        Some(path) => resolve_output(&path, default_name),
        None => PathBuf::from(default_name()),
    };
    write_file(&path, &lesson_text(&active.lesson, Some(&active.page.url)))?;
    println!("Lesson saved to {}", path.display());
    Ok(())
}

fn calendar(config: &Config, session: &Session, path: Option<PathBuf>) -> Result<()> {
    let Some(page) = session.page() else {
        println!("Open a page first.");
        return Ok(());
    };
    let path = match path {
        Some(path) => resolve_output(&path, || ICS_FILE_NAME.to_string()),
        None => PathBuf::from(ICS_FILE_NAME),
    };
    let ics = generate_ics(&page.title, &chrono::Local::now(), &config.calendar);
    write_file(&path, &ics)?;
    println!("Review reminders saved to {}", path.display());
    Ok(())
}
