//! HTTP backends against local fake servers.
//!
//! Each test spins up an axum server on an ephemeral port that speaks just
//! enough of the MediaWiki, OpenAI, or Gemini wire format, then points the
//! real clients at it.

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use cogno::config::SourcesConfig;
use cogno::connector_mediawiki::MediaWikiSource;
use cogno::generation::{GeminiModel, OpenAiModel};
use cogno::lesson::lesson_schema;
use cogno::models::{ChatMessage, Source};
use cogno::session::{Session, SessionSettings};
use cogno::traits::{Backends, ChatBackend, ContentSource, StructuredGenerator};

const LESSON_JSON: &str = r#"{"title":"x","introduction":"Intro","coreConcepts":[{"concept":"Mean","explanation":"Average"}],"keyFormulas":[],"workedExample":{"problem":"P","solution":"S"},"activeRecallPrompts":["Q1"]}"#;

type Requests = Arc<Mutex<Vec<Value>>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn event_stream(events: &[Value]) -> Response {
    let body: String = events
        .iter()
        .map(|e| match e {
            Value::String(raw) => format!("data: {}\n\n", raw),
            other => format!("data: {}\n\n", other),
        })
        .collect();
    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}

// ─── MediaWiki ───────────────────────────────────────────────────

async fn api_php(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    assert_eq!(params.get("format").map(String::as_str), Some("json"));
    assert_eq!(params.get("formatversion").map(String::as_str), Some("2"));

    let action = params.get("action").map(String::as_str).unwrap_or_default();
    let page_id = params.get("pageid").map(String::as_str).unwrap_or_default();
    if page_id == "404" {
        return Json(json!({
            "error": {"code": "nosuchpageid", "info": "There is no page with ID 404."}
        }));
    }

    match (action, params.get("prop").map(String::as_str)) {
        ("query", _) => Json(json!({
            "batchcomplete": true,
            "query": {"search": [
                {
                    "ns": 0,
                    "title": "Variance",
                    "pageid": 32344,
                    "snippet": "In probability theory, <span class=\"searchmatch\">variance</span> is the expected value"
                },
                {"ns": 0, "title": "Analysis of variance", "pageid": 2373, "snippet": ""}
            ]}
        })),
        ("parse", Some("sections")) => Json(json!({
            "parse": {"title": "Variance", "pageid": 32344, "sections": [
                {"toclevel": 1, "level": "2", "line": "Definition", "number": "1", "index": "1"},
                {"toclevel": 2, "level": "3", "line": "<i>Discrete</i> random variable", "number": "1.1", "index": "2"},
                {"toclevel": 1, "level": "2", "line": "Transcluded", "number": "2", "index": "T-1"}
            ]}
        })),
        ("parse", Some("text")) => {
            let section = params.get("section").cloned().unwrap_or_default();
            Json(json!({
                "parse": {"title": "Variance", "pageid": 32344, "text": format!(
                    "<div class=\"mw-parser-output\"><h2 id=\"s{0}\">Section {0}<span class=\"mw-editsection\">[edit]</span></h2>\
                     <p>The variance of section {0}.<sup class=\"reference\">[3]</sup></p></div>",
                    section
                )}
            }))
        }
        _ => Json(json!({"error": {"code": "badvalue", "info": "Unrecognized action"}})),
    }
}

async fn broken() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn wiki_source() -> MediaWikiSource {
    let base = serve(
        Router::new()
            .route("/w/api.php", get(api_php))
            .route("/broken/api.php", get(broken)),
    )
    .await;
    let config = SourcesConfig {
        wikipedia_api: format!("{}/w/api.php", base),
        wikibooks_api: format!("{}/broken/api.php", base),
        timeout_secs: 5,
        ..SourcesConfig::default()
    };
    MediaWikiSource::new(&config).unwrap()
}

#[tokio::test]
async fn mediawiki_search_strips_highlight_markup() {
    let wiki = wiki_source().await;
    let results = wiki.search(Source::Wikipedia, "variance").await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].id, 32344);
    assert_eq!(results[0].title, "Variance");
    assert_eq!(
        results[0].snippet,
        "In probability theory, variance is the expected value"
    );
}

#[tokio::test]
async fn mediawiki_sections_skip_transcluded_entries() {
    let wiki = wiki_source().await;
    let sections = wiki.list_sections(Source::Wikipedia, 32344).await.unwrap();

    let indices: Vec<u32> = sections.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![1, 2]);
    assert_eq!(sections[1].title, "Discrete random variable");
    assert_eq!(sections[1].level, 2);
}

#[tokio::test]
async fn mediawiki_api_errors_and_http_failures_surface() {
    let wiki = wiki_source().await;

    let err = wiki.list_sections(Source::Wikipedia, 404).await.unwrap_err();
    assert!(format!("{:#}", err).contains("nosuchpageid"));

    let err = wiki.search(Source::Wikibooks, "variance").await.unwrap_err();
    assert!(format!("{:#}", err).contains("500"));
}

// ─── OpenAI ──────────────────────────────────────────────────────

async fn chat_completions(
    State(requests): State<Requests>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    requests.lock().unwrap().push(body.clone());
    if headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) != Some("Bearer test-key") {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": {"message": "Incorrect API key provided"}})),
        )
            .into_response();
    }
    if body["model"] == "busy-model" {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"message": "Rate limit reached", "type": "requests"}})),
        )
            .into_response();
    }

    if body["stream"] == true {
        return event_stream(&[
            json!({"choices": [{"index": 0, "delta": {"role": "assistant"}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "Square "}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "the deviations."}}]}),
            json!("[DONE]"),
        ]);
    }
    Json(json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": LESSON_JSON}}]
    }))
    .into_response()
}

async fn openai_server() -> (String, Requests) {
    let requests = Requests::default();
    let app = Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .with_state(requests.clone());
    (format!("{}/v1", serve(app).await), requests)
}

#[tokio::test]
async fn openai_generate_sends_json_schema_and_returns_content() {
    let (base, requests) = openai_server().await;
    let model = OpenAiModel::new(&base, "test-key", "gpt-test", 5).unwrap();

    let raw = model.generate("Make a lesson", &lesson_schema()).await.unwrap();
    assert_eq!(raw, LESSON_JSON);

    let sent = requests.lock().unwrap()[0].clone();
    assert_eq!(sent["model"], "gpt-test");
    assert_eq!(sent["messages"][0]["content"], "Make a lesson");
    assert_eq!(sent["response_format"]["type"], "json_schema");
    assert_eq!(sent["response_format"]["json_schema"]["name"], "lesson");
}

#[tokio::test]
async fn openai_stream_yields_only_text_deltas() {
    let (base, requests) = openai_server().await;
    let model = OpenAiModel::new(&base, "test-key", "gpt-test", 5).unwrap();
    let history = vec![
        ChatMessage::user("Why square?"),
        ChatMessage::assistant("Good question."),
        ChatMessage::user("And?"),
    ];

    let chunks: Vec<String> = model
        .stream_reply("Be Socratic.", &history)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    assert_eq!(chunks, vec!["Square ", "the deviations."]);

    let sent = requests.lock().unwrap()[0].clone();
    assert_eq!(sent["stream"], true);
    let roles: Vec<&str> = sent["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["role"].as_str().unwrap())
        .collect();
    assert_eq!(roles, vec!["system", "user", "assistant", "user"]);
    assert_eq!(sent["messages"][0]["content"], "Be Socratic.");
}

#[tokio::test]
async fn openai_error_body_message_is_reported() {
    let (base, _) = openai_server().await;

    let busy = OpenAiModel::new(&base, "test-key", "busy-model", 5).unwrap();
    let err = busy.generate("p", &lesson_schema()).await.unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("429"));
    assert!(message.contains("Rate limit reached"));

    let wrong_key = OpenAiModel::new(&base, "nope", "gpt-test", 5).unwrap();
    let err = match wrong_key.stream_reply("s", &[ChatMessage::user("hi")]).await {
        Ok(_) => panic!("expected the stream to fail to open"),
        Err(err) => err,
    };
    assert!(format!("{:#}", err).contains("Incorrect API key"));
}

// ─── Gemini ──────────────────────────────────────────────────────

async fn gemini_call(
    State(requests): State<Requests>,
    Path(call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    requests.lock().unwrap().push(json!({"call": call, "body": body}));
    if headers.get("x-goog-api-key").and_then(|v| v.to_str().ok()) != Some("test-key") {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": {"code": 403, "message": "API key not valid", "status": "PERMISSION_DENIED"}})),
        )
            .into_response();
    }

    if call.ends_with(":streamGenerateContent") {
        return event_stream(&[
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "Consider "}]}}]}),
            json!({"candidates": [{"content": {"role": "model", "parts": [{"text": "the mean."}]}, "finishReason": "STOP"}]}),
        ]);
    }
    Json(json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": LESSON_JSON}]}}]
    }))
    .into_response()
}

async fn gemini_server() -> (String, Requests) {
    let requests = Requests::default();
    let app = Router::new()
        .route("/v1beta/models/{call}", post(gemini_call))
        .with_state(requests.clone());
    (format!("{}/v1beta", serve(app).await), requests)
}

#[tokio::test]
async fn gemini_generate_uses_upper_case_schema() {
    let (base, requests) = gemini_server().await;
    let model = GeminiModel::new(&base, "test-key", "gemini-test", 5).unwrap();

    let raw = model.generate("Make a lesson", &lesson_schema()).await.unwrap();
    assert_eq!(raw, LESSON_JSON);

    let sent = requests.lock().unwrap()[0].clone();
    assert_eq!(sent["call"], "gemini-test:generateContent");
    let config = &sent["body"]["generationConfig"];
    assert_eq!(config["responseMimeType"], "application/json");
    assert_eq!(config["responseSchema"]["type"], "OBJECT");
}

#[tokio::test]
async fn gemini_stream_maps_roles_and_system_instruction() {
    let (base, requests) = gemini_server().await;
    let model = GeminiModel::new(&base, "test-key", "gemini-test", 5).unwrap();
    let history = vec![ChatMessage::user("Hi"), ChatMessage::assistant("Hello"), ChatMessage::user("Mean?")];

    let chunks: Vec<String> = model
        .stream_reply("Tutor persona", &history)
        .await
        .unwrap()
        .map(|c| c.unwrap())
        .collect()
        .await;
    assert_eq!(chunks.concat(), "Consider the mean.");

    let sent = requests.lock().unwrap()[0].clone();
    assert_eq!(sent["call"], "gemini-test:streamGenerateContent");
    assert_eq!(sent["body"]["systemInstruction"]["parts"][0]["text"], "Tutor persona");
    assert_eq!(sent["body"]["contents"][1]["role"], "model");
}

#[tokio::test]
async fn gemini_rejected_key_is_reported() {
    let (base, _) = gemini_server().await;
    let model = GeminiModel::new(&base, "wrong", "gemini-test", 5).unwrap();
    let err = model.generate("p", &lesson_schema()).await.unwrap_err();
    assert!(format!("{:#}", err).contains("API key not valid"));
}

// ─── whole session over HTTP ─────────────────────────────────────

#[tokio::test]
async fn session_runs_against_http_backends() {
    let wiki = Arc::new(wiki_source().await);
    let (base, requests) = openai_server().await;
    let model = Arc::new(OpenAiModel::new(&base, "test-key", "gpt-test", 5).unwrap());
    let mut session = Session::new(
        Backends::new(wiki, model.clone(), model),
        SessionSettings::default(),
    );

    assert!(session.search("variance").await);
    let first = session.results()[0].clone();
    assert!(session.select_page(&first).await);
    session.toggle_section(2);
    session.toggle_section(1);
    assert!(session.generate_lesson().await);
    assert!(session.lesson_error().is_none());

    let active = session.active_lesson().unwrap();
    assert_eq!(active.lesson.title, "Variance");
    assert_eq!(active.snippets.len(), 2);
    assert_eq!(active.snippets[0].title, "Definition");
    assert!(active.snippets[0].content.ends_with("The variance of section 1."));

    let prompt = requests.lock().unwrap()[0]["messages"][0]["content"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(prompt.contains("The variance of section 2."));
    assert!(!prompt.contains("[edit]"));

    assert!(session.send_tutor_message("Why square?").await);
    assert!(session.tutor_error().is_none());
    let reply = session.transcript().unwrap().last().unwrap();
    assert_eq!(reply.content, "Square the deviations.");
}
