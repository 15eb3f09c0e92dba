//! The orchestrator: one learner's session from search to tutoring.
//!
//! [`Session`] owns every piece of mutable state (source, query, results,
//! page, sections, selection, lesson, tutor) and one error slot per stage.
//! Nothing fails past it: each collaborator call is converted into the error
//! of its stage and stored, and an error in one stage never clears state that
//! another stage loaded.
//!
//! # Phases
//!
//! ```text
//! Idle ─▶ Searching ─▶ Results ─▶ SectionsLoading ─▶ SectionsReady
//!                                                         │
//!                                  LessonReady ◀─ Generating
//!                                  (tutor active)
//! ```
//!
//! The phase is derived from state rather than stored, see [`Session::phase`].
//! Starting an earlier stage resets everything downstream of it: a new search
//! (or a new source) clears the page, sections, selection, lesson, and chat;
//! a new page clears sections, selection, lesson, and chat.
//!
//! # Tickets
//!
//! Every asynchronous operation is available in two halves. `begin_*`
//! applies the synchronous part and returns a request carrying a
//! [`Ticket`]; the caller executes the request against the collaborators and
//! hands the outcome to `complete_*`, which commits it only if the ticket is
//! still the current one for that stage. Work superseded in between (a second
//! search, a new page, a regeneration) is not cancelled, but its result is
//! dropped when it arrives. The `async` convenience methods ([`Session::search`],
//! [`Session::generate_lesson`], ...) run both halves back to back.

use futures::StreamExt;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{detail, LessonError, SearchError, SectionLoadError, TutorError};
use crate::fetch::fetch_snippets;
use crate::lesson::synthesize;
use crate::models::{Lesson, Page, SearchResult, SectionRef, Selection, Snippet, Source};
use crate::observer::{SessionEvent, SessionObserver, Stage};
use crate::traits::{Backends, ChatBackend, ContentSource, StructuredGenerator, TextStream};
use crate::tutor::{ChatRequest, Transcript, TutorSession};

/// Version token identifying one issued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

/// Derived position in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Searching,
    Results,
    SectionsLoading,
    SectionsReady,
    Generating,
    LessonReady,
}

/// Budgets and persona the session applies.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub snippet_chars: usize,
    pub context_chars: usize,
    pub tutor_name: String,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            snippet_chars: config.lesson.snippet_chars,
            context_chars: config.tutor.context_chars,
            tutor_name: config.tutor.name.clone(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

pub struct SearchRequest {
    ticket: Ticket,
    source: Source,
    query: String,
}

impl SearchRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn execute(&self, source: &dyn ContentSource) -> Result<Vec<SearchResult>, SearchError> {
        source
            .search(self.source, &self.query)
            .await
            .map_err(|e| SearchError::Request(detail(&e)))
    }
}

pub struct SectionsRequest {
    ticket: Ticket,
    source: Source,
    page_id: u64,
}

impl SectionsRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn execute(
        &self,
        source: &dyn ContentSource,
    ) -> Result<Vec<SectionRef>, SectionLoadError> {
        source
            .list_sections(self.source, self.page_id)
            .await
            .map_err(|e| SectionLoadError::Request(detail(&e)))
    }
}

/// Fetch the selected sections, then synthesize.
pub struct LessonRequest {
    ticket: Ticket,
    page: Page,
    sections: Vec<SectionRef>,
    snippet_chars: usize,
}

/// A synthesized lesson together with the snippets that ground it.
#[derive(Debug, Clone)]
pub struct GeneratedLesson {
    pub lesson: Lesson,
    pub snippets: Vec<Snippet>,
}

impl LessonRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn execute(
        &self,
        source: &dyn ContentSource,
        generator: &dyn StructuredGenerator,
    ) -> Result<GeneratedLesson, LessonError> {
        let snippets = fetch_snippets(source, &self.page, &self.sections).await?;
        let lesson = synthesize(generator, &self.page.title, &snippets, self.snippet_chars).await?;
        Ok(GeneratedLesson { lesson, snippets })
    }
}

/// One tutor turn. The user message is already in the transcript.
pub struct TurnRequest {
    ticket: Ticket,
    chat: ChatRequest,
}

impl TurnRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn open(&self, backend: &dyn ChatBackend) -> Result<TextStream, TutorError> {
        self.chat.open(backend).await
    }
}

/// The lesson currently on screen and everything scoped to it.
#[derive(Debug, Clone)]
pub struct ActiveLesson {
    pub page: Page,
    pub lesson: Lesson,
    pub snippets: Vec<Snippet>,
    pub tutor: TutorSession,
}

#[derive(Debug, Default)]
struct ErrorSlots {
    search: Option<SearchError>,
    sections: Option<SectionLoadError>,
    lesson: Option<LessonError>,
    tutor: Option<TutorError>,
}

#[derive(Debug, Default)]
struct Pending {
    search: Option<Ticket>,
    sections: Option<Ticket>,
    lesson: Option<Ticket>,
    turn: Option<Ticket>,
}

pub struct Session {
    backends: Backends,
    settings: SessionSettings,
    observers: Vec<Arc<dyn SessionObserver>>,

    source: Source,
    query: String,
    /// `None` until a search has completed.
    results: Option<Vec<SearchResult>>,
    page: Option<Page>,
    sections: Vec<SectionRef>,
    selection: Selection,
    active: Option<ActiveLesson>,

    errors: ErrorSlots,
    pending: Pending,
    next_ticket: u64,
}

impl Session {
    pub fn new(backends: Backends, settings: SessionSettings) -> Self {
        Self {
            backends,
            settings,
            observers: Vec::new(),
            source: Source::default(),
            query: String::new(),
            results: None,
            page: None,
            sections: Vec::new(),
            selection: Selection::new(),
            active: None,
            errors: ErrorSlots::default(),
            pending: Pending::default(),
            next_ticket: 0,
        }
    }

    /// Register a hook invoked after every committed change.
    pub fn add_observer(&mut self, observer: Arc<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    // ─── accessors ───────────────────────────────────────────────

    pub fn source(&self) -> Source {
        self.source
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn results(&self) -> &[SearchResult] {
        self.results.as_deref().unwrap_or_default()
    }

    pub fn page(&self) -> Option<&Page> {
        self.page.as_ref()
    }

    pub fn sections(&self) -> &[SectionRef] {
        &self.sections
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn active_lesson(&self) -> Option<&ActiveLesson> {
        self.active.as_ref()
    }

    pub fn lesson(&self) -> Option<&Lesson> {
        self.active.as_ref().map(|a| &a.lesson)
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        self.active.as_ref().map(|a| a.tutor.transcript())
    }

    pub fn search_error(&self) -> Option<&SearchError> {
        self.errors.search.as_ref()
    }

    pub fn sections_error(&self) -> Option<&SectionLoadError> {
        self.errors.sections.as_ref()
    }

    pub fn lesson_error(&self) -> Option<&LessonError> {
        self.errors.lesson.as_ref()
    }

    pub fn tutor_error(&self) -> Option<&TutorError> {
        self.errors.tutor.as_ref()
    }

    pub fn phase(&self) -> Phase {
        if self.pending.lesson.is_some() {
            Phase::Generating
        } else if self.active.is_some() {
            Phase::LessonReady
        } else if self.pending.sections.is_some() {
            Phase::SectionsLoading
        } else if self.page.is_some() {
            Phase::SectionsReady
        } else if self.pending.search.is_some() {
            Phase::Searching
        } else if self.results.is_some() {
            Phase::Results
        } else {
            Phase::Idle
        }
    }

    /// The tutor accepts questions only while a lesson is loaded.
    pub fn tutor_available(&self) -> bool {
        self.active.is_some() && self.errors.lesson.is_none()
    }

    /// Whether a tutor reply is being streamed.
    pub fn tutor_busy(&self) -> bool {
        self.pending.turn.is_some()
    }

    // ─── synchronous operations ──────────────────────────────────

    /// Switch corpus. Clears everything derived from the previous one,
    /// including results; the caller decides whether to search again.
    pub fn set_source(&mut self, source: Source) {
        if source == self.source {
            return;
        }
        tracing::debug!(from = %self.source, to = %source, "switching source");
        self.source = source;
        self.reset_from_search();
    }

    /// Back to a blank session on the current source.
    pub fn clear_search(&mut self) {
        self.query.clear();
        self.reset_from_search();
    }

    /// Toggle a section of the current page by index. Returns whether it is
    /// selected afterwards, or `None` when the page has no such section.
    pub fn toggle_section(&mut self, index: u32) -> Option<bool> {
        let section = self.sections.iter().find(|s| s.index == index)?.clone();
        Some(self.selection.toggle(section))
    }

    // ─── search ──────────────────────────────────────────────────

    /// Start a search. A blank query only sets the search error.
    pub fn begin_search(&mut self, query: &str) -> Option<SearchRequest> {
        let query = query.trim();
        if query.is_empty() {
            self.errors.search = Some(SearchError::EmptyQuery);
            self.notify_failed(Stage::Search, &SearchError::EmptyQuery.to_string());
            return None;
        }

        self.query = query.to_string();
        self.reset_from_search();
        let ticket = self.issue();
        self.pending.search = Some(ticket);

        tracing::info!(source = %self.source, query, ?ticket, "searching");
        self.notify(SessionEvent::Started {
            stage: Stage::Search,
            subject: query.to_string(),
        });

        Some(SearchRequest {
            ticket,
            source: self.source,
            query: query.to_string(),
        })
    }

    pub fn complete_search(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<SearchResult>, SearchError>,
    ) -> bool {
        if !take_if_current(&mut self.pending.search, ticket) {
            tracing::debug!(?ticket, "dropping stale search result");
            return false;
        }
        match result {
            Ok(results) => {
                let count = results.len();
                self.results = Some(results);
                self.notify(SessionEvent::Finished {
                    stage: Stage::Search,
                    count,
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "search failed");
                self.notify_failed(Stage::Search, &err.to_string());
                self.errors.search = Some(err);
            }
        }
        true
    }

    pub async fn search(&mut self, query: &str) -> bool {
        let Some(request) = self.begin_search(query) else {
            return false;
        };
        let source = Arc::clone(&self.backends.source);
        let result = request.execute(source.as_ref()).await;
        self.complete_search(request.ticket(), result)
    }

    // ─── sections ────────────────────────────────────────────────

    /// Select a page and start loading its sections.
    pub fn begin_select_page(&mut self, result: &SearchResult) -> SectionsRequest {
        let page = Page::new(self.source, result.id, &result.title);
        self.reset_from_page();
        let ticket = self.issue();
        self.pending.sections = Some(ticket);

        tracing::info!(source = %self.source, page_id = page.id, ?ticket, "loading sections");
        self.notify(SessionEvent::Started {
            stage: Stage::Sections,
            subject: page.title.clone(),
        });
        self.page = Some(page);

        SectionsRequest {
            ticket,
            source: self.source,
            page_id: result.id,
        }
    }

    pub fn complete_sections(
        &mut self,
        ticket: Ticket,
        result: Result<Vec<SectionRef>, SectionLoadError>,
    ) -> bool {
        if !take_if_current(&mut self.pending.sections, ticket) {
            tracing::debug!(?ticket, "dropping stale section list");
            return false;
        }
        match result {
            Ok(sections) => {
                let count = sections.len();
                self.sections = sections;
                self.notify(SessionEvent::Finished {
                    stage: Stage::Sections,
                    count,
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "section listing failed");
                self.notify_failed(Stage::Sections, &err.to_string());
                self.errors.sections = Some(err);
            }
        }
        true
    }

    pub async fn select_page(&mut self, result: &SearchResult) -> bool {
        let request = self.begin_select_page(result);
        let source = Arc::clone(&self.backends.source);
        let outcome = request.execute(source.as_ref()).await;
        self.complete_sections(request.ticket(), outcome)
    }

    // ─── lesson ──────────────────────────────────────────────────

    /// Start generating a lesson from the selected sections. Returns `None`
    /// without touching state when no page or no section is selected.
    pub fn begin_generate(&mut self) -> Option<LessonRequest> {
        let Some(page) = self.page.clone() else {
            tracing::debug!("no page selected; not generating");
            return None;
        };
        if self.selection.is_empty() {
            tracing::debug!("no sections selected; not generating");
            return None;
        }

        self.clear_lesson();
        let ticket = self.issue();
        self.pending.lesson = Some(ticket);

        tracing::info!(
            page_id = page.id,
            sections = ?self.selection.indices(),
            ?ticket,
            "generating lesson"
        );
        self.notify(SessionEvent::Started {
            stage: Stage::Lesson,
            subject: page.title.clone(),
        });

        Some(LessonRequest {
            ticket,
            page,
            sections: self.selection.to_vec(),
            snippet_chars: self.settings.snippet_chars,
        })
    }

    pub fn complete_generate(
        &mut self,
        ticket: Ticket,
        result: Result<GeneratedLesson, LessonError>,
    ) -> bool {
        if !take_if_current(&mut self.pending.lesson, ticket) {
            tracing::debug!(?ticket, "dropping stale lesson");
            return false;
        }
        let Some(page) = self.page.clone() else {
            return false;
        };
        match result {
            Ok(GeneratedLesson { lesson, snippets }) => {
                let tutor = TutorSession::new(
                    lesson.title.clone(),
                    &snippets,
                    self.settings.context_chars,
                    self.settings.tutor_name.clone(),
                );
                let count = lesson.core_concepts.len();
                self.active = Some(ActiveLesson {
                    page,
                    lesson,
                    snippets,
                    tutor,
                });
                self.errors.tutor = None;
                self.notify(SessionEvent::Finished {
                    stage: Stage::Lesson,
                    count,
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "lesson generation failed");
                self.notify_failed(Stage::Lesson, &err.to_string());
                self.errors.lesson = Some(err);
            }
        }
        true
    }

    pub async fn generate_lesson(&mut self) -> bool {
        let Some(request) = self.begin_generate() else {
            return false;
        };
        let source = Arc::clone(&self.backends.source);
        let generator = Arc::clone(&self.backends.generator);
        let result = request.execute(source.as_ref(), generator.as_ref()).await;
        self.complete_generate(request.ticket(), result)
    }

    // ─── tutor ───────────────────────────────────────────────────

    /// Start a tutor turn. Returns `None` without any change for blank
    /// input, while a reply is streaming, or when no lesson is loaded.
    pub fn begin_tutor_turn(&mut self, query: &str) -> Option<TurnRequest> {
        if !self.tutor_available() || self.pending.turn.is_some() {
            return None;
        }
        let chat = self.active.as_mut()?.tutor.begin(query)?;
        self.errors.tutor = None;
        let ticket = self.issue();
        self.pending.turn = Some(ticket);
        tracing::debug!(?ticket, turns = chat.history.len(), "asking tutor");
        Some(TurnRequest { ticket, chat })
    }

    /// The reply stream opened.
    pub fn open_reply(&mut self, ticket: Ticket) -> bool {
        let Some(tutor) = self.current_tutor(ticket) else {
            return false;
        };
        tutor.open_reply();
        self.notify(SessionEvent::ReplyStarted);
        true
    }

    /// Apply one reply chunk in arrival order.
    pub fn push_reply_chunk(&mut self, ticket: Ticket, chunk: &str) -> bool {
        let Some(tutor) = self.current_tutor(ticket) else {
            return false;
        };
        if tutor.push_chunk(chunk).is_none() {
            return false;
        }
        self.notify(SessionEvent::ReplyDelta {
            chunk: chunk.to_string(),
        });
        true
    }

    /// Finish the turn, successfully or with the error that ended it.
    pub fn complete_turn(&mut self, ticket: Ticket, outcome: Result<(), TutorError>) -> bool {
        let Some(tutor) = self.current_tutor(ticket) else {
            tracing::debug!(?ticket, "dropping stale tutor reply");
            return false;
        };
        let ok = match outcome {
            Ok(()) => {
                tutor.complete();
                true
            }
            Err(err) => {
                tutor.fail(&err);
                tracing::warn!(error = %err, "tutor turn failed");
                self.errors.tutor = Some(err);
                false
            }
        };
        self.pending.turn = None;
        self.notify(SessionEvent::ReplyFinished { ok });
        true
    }

    /// Ask the tutor and stream the reply into the transcript. Returns
    /// `false` when the question was rejected without a backend call.
    pub async fn send_tutor_message(&mut self, query: &str) -> bool {
        let Some(request) = self.begin_tutor_turn(query) else {
            return false;
        };
        let ticket = request.ticket();
        let chat = Arc::clone(&self.backends.chat);

        let mut stream = match request.open(chat.as_ref()).await {
            Ok(stream) => stream,
            Err(err) => {
                self.complete_turn(ticket, Err(err));
                return true;
            }
        };
        self.open_reply(ticket);

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    self.push_reply_chunk(ticket, &chunk);
                }
                Err(e) => {
                    self.complete_turn(ticket, Err(TutorError::Stream(detail(&e))));
                    return true;
                }
            }
        }
        self.complete_turn(ticket, Ok(()));
        true
    }

    // ─── internals ───────────────────────────────────────────────

    fn issue(&mut self) -> Ticket {
        self.next_ticket += 1;
        Ticket(self.next_ticket)
    }

    fn current_tutor(&mut self, ticket: Ticket) -> Option<&mut TutorSession> {
        if self.pending.turn != Some(ticket) {
            return None;
        }
        self.active.as_mut().map(|a| &mut a.tutor)
    }

    /// Lesson, chat, and their errors. Supersedes pending lesson and turn.
    fn clear_lesson(&mut self) {
        self.active = None;
        self.errors.lesson = None;
        self.errors.tutor = None;
        self.pending.lesson = None;
        self.pending.turn = None;
    }

    /// Everything downstream of the page.
    fn reset_from_page(&mut self) {
        self.sections.clear();
        self.selection.clear();
        self.errors.sections = None;
        self.pending.sections = None;
        self.clear_lesson();
    }

    /// Everything downstream of the query.
    fn reset_from_search(&mut self) {
        self.results = None;
        self.errors.search = None;
        self.pending.search = None;
        self.page = None;
        self.reset_from_page();
    }

    fn notify(&self, event: SessionEvent) {
        for observer in &self.observers {
            observer.report(&event);
        }
    }

    fn notify_failed(&self, stage: Stage, error: &str) {
        self.notify(SessionEvent::Failed {
            stage,
            error: error.to_string(),
        });
    }
}

fn take_if_current(slot: &mut Option<Ticket>, ticket: Ticket) -> bool {
    if *slot == Some(ticket) {
        *slot = None;
        true
    } else {
        false
    }
}
