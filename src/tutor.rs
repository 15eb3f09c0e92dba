//! The grounded tutor conversation.
//!
//! A [`TutorSession`] belongs to exactly one lesson: it is created from the
//! lesson's snippets and dropped with it. It keeps the grounding context and
//! the [`Transcript`], and drives one streamed turn at a time:
//!
//! ```text
//! begin(query) ──▶ user message appended, request built
//!      │
//! open_reply() ──▶ empty assistant placeholder appended
//!      │
//! push_chunk()* ─▶ placeholder replaced with the accumulated text
//!      │
//! complete() / fail(err) ──▶ placeholder final
//! ```
//!
//! Every user message therefore ends up followed by exactly one assistant
//! message, including when the stream could not be opened or broke off.

use crate::error::{detail, TutorError};
use crate::fetch::grounding_context;
use crate::lesson::char_prefix;
use crate::models::{ChatMessage, Role, Snippet};
use crate::traits::{ChatBackend, TextStream};

/// Prefix of every assistant entry that reports a failed turn.
pub const APOLOGY: &str = "Sorry, I encountered an error.";

/// The ordered chat history.
///
/// Append-only, except that the last entry may be replaced while it is an
/// in-progress assistant reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
    streaming: bool,
}

impl Transcript {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether the last entry is an assistant reply still being streamed.
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    fn push_placeholder(&mut self) {
        self.messages.push(ChatMessage::assistant(""));
        self.streaming = true;
    }

    /// Replace the content of the in-progress reply. Returns `false` (and
    /// changes nothing) when the last entry is not an in-progress reply.
    pub fn replace_last(&mut self, content: String) -> bool {
        if !self.streaming {
            return false;
        }
        match self.messages.last_mut() {
            Some(last) if last.role == Role::Assistant => {
                last.content = content;
                true
            }
            _ => false,
        }
    }

    fn finish(&mut self) {
        self.streaming = false;
    }
}

/// What the chat backend needs for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub system: String,
    /// Full transcript, ending with the new user message.
    pub history: Vec<ChatMessage>,
}

impl ChatRequest {
    /// Open the reply stream.
    pub async fn open(&self, backend: &dyn ChatBackend) -> Result<TextStream, TutorError> {
        backend
            .stream_reply(&self.system, &self.history)
            .await
            .map_err(|e| TutorError::Open(detail(&e)))
    }
}

#[derive(Debug, Clone)]
pub struct TutorSession {
    topic: String,
    tutor_name: String,
    context: String,
    context_chars: usize,
    transcript: Transcript,
    /// Text received so far for the in-progress reply.
    accumulated: String,
    in_flight: bool,
}

impl TutorSession {
    pub fn new(
        topic: impl Into<String>,
        snippets: &[Snippet],
        context_chars: usize,
        tutor_name: impl Into<String>,
    ) -> Self {
        Self {
            topic: topic.into(),
            tutor_name: tutor_name.into(),
            context: grounding_context(snippets),
            context_chars,
            transcript: Transcript::default(),
            accumulated: String::new(),
            in_flight: false,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The full grounding context (untruncated).
    pub fn context(&self) -> &str {
        &self.context
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Whether a turn has begun and not yet completed or failed.
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// The system instruction sent with every turn.
    pub fn system_instruction(&self) -> String {
        format!(
            r#"You are an expert tutor in science and statistics who teaches with principles from cognitive science. Your name is "{name}".
- Help the student understand rather than handing out answers.
- Use the Socratic method: ask probing questions that guide their thinking.
- Explain hard ideas with analogies and concrete examples.
- When asked for practice problems, give 2-3 of varying difficulty.
- Be encouraging, patient, and educational.
- The student is currently studying: "{topic}".
- Core content of their current lesson: "{context}""#,
            name = self.tutor_name,
            topic = self.topic,
            context = char_prefix(&self.context, self.context_chars),
        )
    }

    /// Start a turn: validates the query, appends the user message, and
    /// returns the request to send. Returns `None` (changing nothing) for
    /// blank input or while another turn is in flight.
    pub fn begin(&mut self, query: &str) -> Option<ChatRequest> {
        if query.trim().is_empty() {
            tracing::debug!("ignoring blank tutor query");
            return None;
        }
        if self.in_flight {
            tracing::debug!("ignoring tutor query while a reply is in flight");
            return None;
        }

        self.in_flight = true;
        self.accumulated.clear();
        self.transcript.push(ChatMessage::user(query));

        Some(ChatRequest {
            system: self.system_instruction(),
            history: self.transcript.messages().to_vec(),
        })
    }

    /// The stream is open: append the empty assistant placeholder.
    pub fn open_reply(&mut self) {
        if self.in_flight && !self.transcript.is_streaming() {
            self.transcript.push_placeholder();
        }
    }

    /// Apply one chunk in arrival order. Returns the accumulated reply.
    pub fn push_chunk(&mut self, chunk: &str) -> Option<&str> {
        if !self.transcript.is_streaming() {
            return None;
        }
        self.accumulated.push_str(chunk);
        self.transcript.replace_last(self.accumulated.clone());
        Some(&self.accumulated)
    }

    /// The stream ended normally; the reply is final.
    pub fn complete(&mut self) {
        self.transcript.finish();
        self.in_flight = false;
    }

    /// The turn failed. Leaves a terminal assistant entry carrying the
    /// apology and the error: a fresh entry if no placeholder exists yet,
    /// otherwise the placeholder keeps its partial text with the apology
    /// appended.
    pub fn fail(&mut self, err: &TutorError) {
        if !self.in_flight {
            return;
        }
        let apology = format!("{} {}", APOLOGY, err);
        if self.transcript.is_streaming() {
            let content = if self.accumulated.is_empty() {
                apology
            } else {
                format!("{}\n\n{}", self.accumulated, apology)
            };
            self.transcript.replace_last(content);
            self.transcript.finish();
        } else {
            self.transcript.push(ChatMessage::assistant(apology));
        }
        self.in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use futures::{stream, StreamExt};
    use std::sync::Mutex;

    /// Drive one whole turn, calling `on_update` after every change.
    async fn ask<F>(
        tutor: &mut TutorSession,
        backend: &dyn ChatBackend,
        query: &str,
        mut on_update: F,
    ) -> Result<bool, TutorError>
    where
        F: FnMut(&Transcript),
    {
        let Some(request) = tutor.begin(query) else {
            return Ok(false);
        };
        on_update(tutor.transcript());

        let mut stream = match request.open(backend).await {
            Ok(stream) => stream,
            Err(err) => {
                tutor.fail(&err);
                on_update(tutor.transcript());
                return Err(err);
            }
        };
        tutor.open_reply();
        on_update(tutor.transcript());

        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) => {
                    tutor.push_chunk(&chunk);
                    on_update(tutor.transcript());
                }
                Err(e) => {
                    let err = TutorError::Stream(detail(&e));
                    tutor.fail(&err);
                    on_update(tutor.transcript());
                    return Err(err);
                }
            }
        }

        tutor.complete();
        on_update(tutor.transcript());
        Ok(true)
    }

    enum Script {
        Chunks(Vec<&'static str>),
        FailOpen,
        FailAfter(Vec<&'static str>),
    }

    struct ScriptedChat {
        script: Script,
        requests: Mutex<Vec<(String, Vec<ChatMessage>)>>,
    }

    impl ScriptedChat {
        fn new(script: Script) -> Self {
            Self {
                script,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedChat {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn stream_reply(&self, system: &str, history: &[ChatMessage]) -> Result<TextStream> {
            self.requests
                .lock()
                .unwrap()
                .push((system.to_string(), history.to_vec()));
            match &self.script {
                Script::Chunks(chunks) => {
                    let items: Vec<Result<String>> =
                        chunks.iter().map(|c| Ok(c.to_string())).collect();
                    Ok(stream::iter(items).boxed())
                }
                Script::FailOpen => anyhow::bail!("503 Service Unavailable"),
                Script::FailAfter(chunks) => {
                    let mut items: Vec<Result<String>> =
                        chunks.iter().map(|c| Ok(c.to_string())).collect();
                    items.push(Err(anyhow::anyhow!("connection reset")));
                    Ok(stream::iter(items).boxed())
                }
            }
        }
    }

    fn session() -> TutorSession {
        TutorSession::new(
            "Variance",
            &[Snippet {
                title: "Definition".to_string(),
                content: "Variance is the expected squared deviation.".to_string(),
            }],
            2000,
            "Cogno",
        )
    }

    #[tokio::test]
    async fn chunks_grow_the_last_message_as_a_prefix() {
        let chunks = vec!["Var", "iance ", "measures ", "spread."];
        let backend = ScriptedChat::new(Script::Chunks(chunks.clone()));
        let mut tutor = session();

        let mut observed = Vec::new();
        let sent = ask(&mut tutor, &backend, "What is variance?", |t| {
            if let Some(last) = t.last() {
                if last.role == Role::Assistant {
                    observed.push(last.content.clone());
                }
            }
        })
        .await
        .unwrap();
        assert!(sent);

        // placeholder, then one observation per chunk, then completion
        let expected_prefixes: Vec<String> = (0..=chunks.len())
            .map(|n| chunks[..n].concat())
            .collect();
        assert_eq!(&observed[..=chunks.len()], &expected_prefixes[..]);
        assert_eq!(observed.last().unwrap(), "Variance measures spread.");

        let messages = tutor.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::user("What is variance?"));
        assert_eq!(messages[1].content, "Variance measures spread.");
        assert!(!tutor.in_flight());
        assert!(!tutor.transcript().is_streaming());
    }

    #[tokio::test]
    async fn blank_query_is_a_no_op() {
        let backend = ScriptedChat::new(Script::Chunks(vec!["hi"]));
        let mut tutor = session();

        for query in ["", "   ", "\n\t"] {
            let sent = ask(&mut tutor, &backend, query, |_| {}).await.unwrap();
            assert!(!sent);
        }
        assert!(tutor.transcript().is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn open_failure_leaves_apology_entry() {
        let backend = ScriptedChat::new(Script::FailOpen);
        let mut tutor = session();

        let err = ask(&mut tutor, &backend, "Explain", |_| {}).await.unwrap_err();
        assert!(matches!(err, TutorError::Open(_)));

        let messages = tutor.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert!(messages[1].content.starts_with(APOLOGY));
        assert!(messages[1].content.contains("503"));
        assert!(!tutor.in_flight());
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_text_and_one_reply() {
        let backend = ScriptedChat::new(Script::FailAfter(vec!["Partial ", "answer"]));
        let mut tutor = session();

        let err = ask(&mut tutor, &backend, "Explain", |_| {}).await.unwrap_err();
        assert!(matches!(err, TutorError::Stream(_)));

        let messages = tutor.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.starts_with("Partial answer"));
        assert!(messages[1].content.contains(APOLOGY));
        assert!(messages[1].content.contains("connection reset"));

        // The session accepts the next turn.
        let backend = ScriptedChat::new(Script::Chunks(vec!["ok"]));
        assert!(ask(&mut tutor, &backend, "Again", |_| {}).await.unwrap());
        assert_eq!(tutor.transcript().len(), 4);
    }

    #[tokio::test]
    async fn request_carries_full_history_and_grounding() {
        let backend = ScriptedChat::new(Script::Chunks(vec!["first"]));
        let mut tutor = session();
        ask(&mut tutor, &backend, "Q1", |_| {}).await.unwrap();
        ask(&mut tutor, &backend, "Q2", |_| {}).await.unwrap();

        let requests = backend.requests.lock().unwrap();
        let (system, history) = &requests[1];
        assert!(system.contains("\"Variance\""));
        assert!(system.contains("Variance is the expected squared deviation."));
        assert!(system.contains("\"Cogno\""));
        assert_eq!(
            history,
            &vec![
                ChatMessage::user("Q1"),
                ChatMessage::assistant("first"),
                ChatMessage::user("Q2"),
            ]
        );
    }

    #[test]
    fn second_begin_while_in_flight_is_rejected() {
        let mut tutor = session();
        assert!(tutor.begin("first").is_some());
        assert!(tutor.begin("second").is_none());
        assert_eq!(tutor.transcript().len(), 1);
    }

    #[test]
    fn replace_last_requires_in_progress_reply() {
        let mut tutor = session();
        tutor.begin("q").unwrap();
        // No placeholder yet: the last entry is the user's message.
        assert!(tutor.push_chunk("x").is_none());
        assert_eq!(tutor.transcript().messages()[0].content, "q");

        tutor.open_reply();
        assert_eq!(tutor.push_chunk("a"), Some("a"));
        assert_eq!(tutor.push_chunk("b"), Some("ab"));
        tutor.complete();
        assert!(tutor.push_chunk("c").is_none());
        assert_eq!(tutor.transcript().last().unwrap().content, "ab");
    }

    #[test]
    fn grounding_is_truncated_in_system_instruction() {
        let long = "y".repeat(5000);
        let tutor = TutorSession::new(
            "T",
            &[Snippet {
                title: "Long".to_string(),
                content: long,
            }],
            2000,
            "Cogno",
        );
        let system = tutor.system_instruction();
        // "Long\n" is part of the budget.
        assert!(system.contains(&"y".repeat(1995)));
        assert!(!system.contains(&"y".repeat(1996)));
        assert_eq!(tutor.context().chars().count(), 5005);
    }
}
