//! Lesson synthesis.
//!
//! Turns a topic plus a set of snippets into a typed [`Lesson`] with a single
//! schema-constrained generation call. The response must parse directly into
//! the lesson shape; anything else is a [`GenerationError`] with no repair
//! and no retry. The model's own title is discarded in favor of the topic.
//!
//! Each snippet contributes at most `snippet_chars` characters to the
//! prompt. The budget is counted in characters, which is only a rough proxy
//! for the backend's token limit.

use serde_json::{json, Value};

use crate::error::{detail, GenerationError};
use crate::models::{Lesson, Snippet};
use crate::traits::StructuredGenerator;

/// Synthesize a lesson from `snippets`.
pub async fn synthesize(
    generator: &dyn StructuredGenerator,
    topic: &str,
    snippets: &[Snippet],
    snippet_chars: usize,
) -> Result<Lesson, GenerationError> {
    let prompt = build_prompt(topic, snippets, snippet_chars);
    let schema = lesson_schema();

    tracing::info!(
        model = generator.model_name(),
        topic,
        snippets = snippets.len(),
        "generating lesson"
    );

    let raw = generator
        .generate(&prompt, &schema)
        .await
        .map_err(|e| GenerationError::Request(detail(&e)))?;

    parse_lesson(&raw, topic)
}

/// Parse a raw model response and stamp the topic as its title.
pub fn parse_lesson(raw: &str, topic: &str) -> Result<Lesson, GenerationError> {
    let mut lesson: Lesson = serde_json::from_str(raw.trim()).map_err(|e| {
        tracing::warn!(error = %e, "model response does not match the lesson schema");
        GenerationError::Malformed(e.to_string())
    })?;
    lesson.title = topic.to_string();
    Ok(lesson)
}

/// Build the generation prompt.
pub fn build_prompt(topic: &str, snippets: &[Snippet], snippet_chars: usize) -> String {
    let content = snippets
        .iter()
        .map(|s| format!("### {}\n{}", s.title, char_prefix(&s.content, snippet_chars)))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are an expert educator and instructional designer who builds learning material on findings from cognitive science.
Turn the encyclopedia excerpts below into a structured lesson.

Topic: "{topic}"

Excerpts:
{content}

Produce a lesson in JSON with these fields:
1. introduction: a short, engaging overview that sets the context.
2. coreConcepts: 3 to 5 key concepts, each with the concept name and a concise explanation drawn only from the excerpts.
3. keyFormulas: the important formulas or mathematical relationships in the excerpts, each as LaTeX with a short description of what it represents. Use an empty array when there are none.
4. workedExample: a practical step-by-step problem and solution applying one of the concepts or formulas. If the excerpts are too thin for a concrete example, construct a plausible one for the topic.
5. activeRecallPrompts: 3 to 4 questions that make the learner retrieve the material from memory, apply it, and explain it in their own words.

Follow the JSON schema exactly and make sure formulas are valid LaTeX."#
    )
}

/// JSON Schema of the lesson object.
pub fn lesson_schema() -> Value {
    let text = json!({ "type": "string" });
    json!({
        "type": "object",
        "properties": {
            "title": text,
            "introduction": text,
            "coreConcepts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": { "concept": text, "explanation": text },
                    "required": ["concept", "explanation"]
                }
            },
            "keyFormulas": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": { "formula": text, "description": text },
                    "required": ["formula", "description"]
                }
            },
            "workedExample": {
                "type": "object",
                "properties": { "problem": text, "solution": text },
                "required": ["problem", "solution"]
            },
            "activeRecallPrompts": {
                "type": "array",
                "items": text
            }
        },
        "required": [
            "title",
            "introduction",
            "coreConcepts",
            "keyFormulas",
            "workedExample",
            "activeRecallPrompts"
        ]
    })
}

/// The first `max_chars` characters of `text`, on a char boundary.
pub(crate) fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const VALID: &str = r#"{
        "title": "Something the model made up",
        "introduction": "Variance measures spread.",
        "coreConcepts": [
            {"concept": "Variance", "explanation": "Mean squared deviation."},
            {"concept": "Standard deviation", "explanation": "Square root of variance."},
            {"concept": "Mean", "explanation": "The average."}
        ],
        "keyFormulas": [{"formula": "\\sigma^2 = E[(X-\\mu)^2]", "description": "Variance"}],
        "workedExample": {"problem": "Variance of 1,2,3?", "solution": "2/3"},
        "activeRecallPrompts": ["Define variance.", "Why square deviations?", "Relate SD and variance."]
    }"#;

    struct CannedGenerator {
        response: Result<String, String>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedGenerator {
        fn ok(body: &str) -> Self {
            Self {
                response: Ok(body.to_string()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StructuredGenerator for CannedGenerator {
        fn model_name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, prompt: &str, _schema: &Value) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.response.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn snippet(title: &str, content: &str) -> Snippet {
        Snippet {
            title: title.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn title_is_replaced_with_topic() {
        let generator = CannedGenerator::ok(VALID);
        let lesson = synthesize(&generator, "Variance", &[snippet("Definition", "...")], 1500)
            .await
            .unwrap();
        assert_eq!(lesson.title, "Variance");
        assert_eq!(lesson.core_concepts.len(), 3);
        assert_eq!(lesson.key_formulas[0].formula, "\\sigma^2 = E[(X-\\mu)^2]");
    }

    #[tokio::test]
    async fn malformed_json_is_a_generation_error() {
        let generator = CannedGenerator::ok("{\"introduction\": \"cut off");
        let err = synthesize(&generator, "Variance", &[snippet("A", "b")], 1500)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn schema_mismatch_is_a_generation_error() {
        // Valid JSON, but workedExample is missing.
        let generator = CannedGenerator::ok(
            r#"{"introduction": "x", "coreConcepts": [], "keyFormulas": [], "activeRecallPrompts": []}"#,
        );
        let err = synthesize(&generator, "T", &[snippet("A", "b")], 1500)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn backend_failure_is_a_request_error() {
        let generator = CannedGenerator {
            response: Err("quota exceeded".to_string()),
            prompts: Mutex::new(Vec::new()),
        };
        let err = synthesize(&generator, "T", &[snippet("A", "b")], 1500)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GenerationError::Request("quota exceeded".to_string())
        );
    }

    #[tokio::test]
    async fn prompt_keeps_snippet_order_and_truncates() {
        let generator = CannedGenerator::ok(VALID);
        let long = "x".repeat(3000);
        synthesize(
            &generator,
            "Topic",
            &[snippet("Alpha", &long), snippet("Beta", "short"), snippet("Gamma", "g")],
            1500,
        )
        .await
        .unwrap();

        let prompts = generator.prompts.lock().unwrap();
        let prompt = &prompts[0];
        let alpha = prompt.find("### Alpha").unwrap();
        let beta = prompt.find("### Beta").unwrap();
        let gamma = prompt.find("### Gamma").unwrap();
        assert!(alpha < beta && beta < gamma);
        assert!(prompt.contains(&"x".repeat(1500)));
        assert!(!prompt.contains(&"x".repeat(1501)));
        assert!(prompt.contains("Topic: \"Topic\""));
    }

    #[test]
    fn char_prefix_respects_char_boundaries() {
        assert_eq!(char_prefix("héllo", 2), "hé");
        assert_eq!(char_prefix("abc", 10), "abc");
        assert_eq!(char_prefix("", 3), "");
        assert_eq!(char_prefix("σ²μ", 1), "σ");
    }

    #[test]
    fn schema_requires_every_lesson_field() {
        let schema = lesson_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        for field in [
            "introduction",
            "coreConcepts",
            "keyFormulas",
            "workedExample",
            "activeRecallPrompts",
        ] {
            assert!(required.contains(&field), "missing {}", field);
        }
    }
}
