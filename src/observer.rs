//! Session status reporting.
//!
//! The session calls every registered [`SessionObserver`] after it commits a
//! change: a stage starting, finishing or failing, a lesson landing, and
//! each step of a streamed tutor reply. Status lines go to **stderr** so
//! stdout stays parseable for scripts; the `study` loop adds its own
//! observer to print reply text to stdout.

use std::io::Write;
use std::sync::Arc;

/// The asynchronous stages of the pipeline.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Stage {
    Search,
    Sections,
    Lesson,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Search => "search",
            Stage::Sections => "sections",
            Stage::Lesson => "lesson",
        }
    }
}

/// A single committed change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    /// A request was issued. `subject` is the query, page title, or topic.
    Started { stage: Stage, subject: String },
    /// Results were committed; `count` is results, sections, or concepts.
    Finished { stage: Stage, count: usize },
    Failed { stage: Stage, error: String },
    /// The tutor stream opened and the placeholder reply was appended.
    ReplyStarted,
    /// One chunk was applied to the in-progress reply.
    ReplyDelta { chunk: String },
    ReplyFinished { ok: bool },
}

/// Receives session events. Implementations must not block for long.
pub trait SessionObserver: Send + Sync {
    fn report(&self, event: &SessionEvent);
}

/// Human-friendly status lines on stderr: "lesson  generating  Variance".
pub struct StderrObserver;

impl SessionObserver for StderrObserver {
    fn report(&self, event: &SessionEvent) {
        let line = match event {
            SessionEvent::Started { stage, subject } => {
                format!("{}  {}  {}\n", stage.as_str(), verb(*stage), subject)
            }
            SessionEvent::Finished { stage, count } => {
                format!("{}  done  {} {}\n", stage.as_str(), count, noun(*stage, *count))
            }
            SessionEvent::Failed { stage, error } => {
                format!("{}  failed  {}\n", stage.as_str(), error)
            }
            // Reply text belongs on stdout; see the study loop.
            SessionEvent::ReplyStarted
            | SessionEvent::ReplyDelta { .. }
            | SessionEvent::ReplyFinished { .. } => return,
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

fn verb(stage: Stage) -> &'static str {
    match stage {
        Stage::Search => "searching",
        Stage::Sections => "loading",
        Stage::Lesson => "generating",
    }
}

fn noun(stage: Stage, count: usize) -> &'static str {
    match (stage, count == 1) {
        (Stage::Search, true) => "result",
        (Stage::Search, false) => "results",
        (Stage::Sections, true) => "section",
        (Stage::Sections, false) => "sections",
        (Stage::Lesson, true) => "concept",
        (Stage::Lesson, false) => "concepts",
    }
}

/// Machine-readable events: one JSON object per line on stderr.
pub struct JsonObserver;

impl SessionObserver for JsonObserver {
    fn report(&self, event: &SessionEvent) {
        let obj = match event {
            SessionEvent::Started { stage, subject } => serde_json::json!({
                "event": "started",
                "stage": stage.as_str(),
                "subject": subject
            }),
            SessionEvent::Finished { stage, count } => serde_json::json!({
                "event": "finished",
                "stage": stage.as_str(),
                "count": count
            }),
            SessionEvent::Failed { stage, error } => serde_json::json!({
                "event": "failed",
                "stage": stage.as_str(),
                "error": error
            }),
            SessionEvent::ReplyStarted => serde_json::json!({ "event": "reply_started" }),
            SessionEvent::ReplyDelta { chunk } => serde_json::json!({
                "event": "reply_delta",
                "chunk": chunk
            }),
            SessionEvent::ReplyFinished { ok } => serde_json::json!({
                "event": "reply_finished",
                "ok": ok
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op observer when progress is disabled.
pub struct NoObserver;

impl SessionObserver for NoObserver {
    fn report(&self, _event: &SessionEvent) {}
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    pub fn observer(&self) -> Arc<dyn SessionObserver> {
        match self {
            ProgressMode::Off => Arc::new(NoObserver),
            ProgressMode::Human => Arc::new(StderrObserver),
            ProgressMode::Json => Arc::new(JsonObserver),
        }
    }
}
