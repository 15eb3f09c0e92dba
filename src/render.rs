//! Lesson rendering for the terminal, text downloads, and JSON output.

use anyhow::Result;
use std::fmt::Write;

use crate::models::Lesson;

/// Render a lesson as plain text. `url` is the page the lesson was built
/// from, when known.
pub fn lesson_text(lesson: &Lesson, url: Option<&str>) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail.
    let _ = write_lesson(&mut out, lesson, url);
    out
}

fn write_lesson(out: &mut String, lesson: &Lesson, url: Option<&str>) -> std::fmt::Result {
    writeln!(out, "{}", lesson.title)?;
    writeln!(out, "{}", "=".repeat(lesson.title.chars().count().max(1)))?;
    if let Some(url) = url {
        writeln!(out, "Source: {}", url)?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "Learning strategy: this lesson uses interleaving (mixing concepts) and elaboration (deep processing) to enhance retention and understanding."
    )?;

    heading(out, "Introduction")?;
    writeln!(out, "{}", lesson.introduction)?;

    heading(out, "Core Concepts")?;
    for concept in &lesson.core_concepts {
        writeln!(out, "- {}: {}", concept.concept, concept.explanation)?;
    }

    if !lesson.key_formulas.is_empty() {
        heading(out, "Key Formulas")?;
        for formula in &lesson.key_formulas {
            writeln!(out, "{}:", formula.description)?;
            writeln!(out, "    $${}$$", formula.formula)?;
        }
    }

    heading(out, "Worked Example")?;
    writeln!(out, "Problem: {}", lesson.worked_example.problem)?;
    writeln!(out)?;
    writeln!(out, "Solution: {}", lesson.worked_example.solution)?;

    heading(out, "Active Recall Practice")?;
    for (i, prompt) in lesson.active_recall_prompts.iter().enumerate() {
        writeln!(out, "{}. {}", i + 1, prompt)?;
    }

    writeln!(out)?;
    writeln!(
        out,
        "Spaced repetition: review this material in 1 day, 3 days, then 7 days for optimal long-term retention."
    )
}

fn heading(out: &mut String, title: &str) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(out, "## {}", title)?;
    writeln!(out)
}

/// Pretty JSON with the schema's camelCase keys.
pub fn lesson_json(lesson: &Lesson) -> Result<String> {
    Ok(serde_json::to_string_pretty(lesson)?)
}

/// File name for a text download: the title with whitespace replaced by
/// underscores, or `lesson.txt` without a title.
pub fn download_file_name(title: &str) -> String {
    let stem: String = title
        .trim()
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .collect();
    if stem.is_empty() {
        "lesson.txt".to_string()
    } else {
        format!("{}.txt", stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CoreConcept, KeyFormula, WorkedExample};

    fn lesson() -> Lesson {
        Lesson {
            title: "Standard deviation".to_string(),
            introduction: "How spread out values are.".to_string(),
            core_concepts: vec![CoreConcept {
                concept: "Spread".to_string(),
                explanation: "Distance from the mean.".to_string(),
            }],
            key_formulas: vec![KeyFormula {
                formula: "\\sigma = \\sqrt{\\operatorname{Var}(X)}".to_string(),
                description: "Standard deviation".to_string(),
            }],
            worked_example: WorkedExample {
                problem: "SD of 2, 4?".to_string(),
                solution: "1".to_string(),
            },
            active_recall_prompts: vec!["Define SD.".to_string(), "Why the root?".to_string()],
        }
    }

    #[test]
    fn text_has_every_section_in_order() {
        let text = lesson_text(&lesson(), Some("https://en.wikipedia.org/wiki/Standard_deviation"));
        let order = [
            "Standard deviation\n==================",
            "Source: https://en.wikipedia.org/wiki/Standard_deviation",
            "## Introduction",
            "- Spread: Distance from the mean.",
            "## Key Formulas",
            "$$\\sigma = \\sqrt{\\operatorname{Var}(X)}$$",
            "Problem: SD of 2, 4?",
            "1. Define SD.\n2. Why the root?",
            "Spaced repetition:",
        ];
        let mut from = 0;
        for needle in order {
            let at = text[from..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing or out of order: {}", needle));
            from += at + needle.len();
        }
    }

    #[test]
    fn formulas_heading_is_omitted_when_empty() {
        let mut lesson = lesson();
        lesson.key_formulas.clear();
        assert!(!lesson_text(&lesson, None).contains("Key Formulas"));
    }

    #[test]
    fn json_uses_camel_case() {
        let json = lesson_json(&lesson()).unwrap();
        assert!(json.contains("\"coreConcepts\""));
        assert!(json.contains("\"activeRecallPrompts\""));
    }

    #[test]
    fn download_name_replaces_whitespace() {
        assert_eq!(download_file_name("Bayes' theorem"), "Bayes'_theorem.txt");
        assert_eq!(download_file_name("Mean \tand  mode"), "Mean__and__mode.txt");
        assert_eq!(download_file_name("   "), "lesson.txt");
        assert_eq!(download_file_name("Input/output"), "Inputoutput.txt");
    }
}
