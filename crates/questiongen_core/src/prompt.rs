//! crates/questiongen_core/src/prompt.rs
//!
//! Assembles the ordered message list sent to a generation provider.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::domain::{ChatMessage, ExistingQuestion, GenerationMode, PresetFields};

pub const PRIMER_SUFFIX: &str = " Write a question.";
pub const EXAMPLE_USER_NAME: &str = "example_user";
pub const EXAMPLE_ASSISTANT_NAME: &str = "example_assistant";

/// Builds prompts from a preset snapshot and the story of a request.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    existing_questions_limit: usize,
}

impl PromptBuilder {
    pub fn new(existing_questions_limit: usize) -> Self {
        Self {
            existing_questions_limit,
        }
    }

    /// Produces primer, instructions, example, the optional existing-questions
    /// constraint, and the final user message, in that order.
    ///
    /// `existing` is whatever the caller fetched for this request. An empty slice
    /// omits the constraint message entirely.
    pub fn build(
        &self,
        preset: &PresetFields,
        story: &str,
        mode: GenerationMode,
        existing: &[ExistingQuestion],
    ) -> Vec<ChatMessage> {
        let mut messages = vec![
            ChatMessage::system(format!(
                "{}{}",
                normalize_line_breaks(&preset.primer),
                PRIMER_SUFFIX
            )),
            ChatMessage::named_system(
                EXAMPLE_USER_NAME,
                normalize_line_breaks(&preset.instructions),
            ),
            ChatMessage::named_system(
                EXAMPLE_ASSISTANT_NAME,
                normalize_line_breaks(&preset.example),
            ),
        ];

        if let Some(constraint) = self.existing_questions_message(existing) {
            messages.push(constraint);
        }

        messages.push(ChatMessage::user(final_message(mode, story)));
        messages
    }

    fn existing_questions_message(&self, existing: &[ExistingQuestion]) -> Option<ChatMessage> {
        if existing.is_empty() || self.existing_questions_limit == 0 {
            return None;
        }

        let cleaned: Vec<ExistingQuestion> = existing
            .iter()
            .take(self.existing_questions_limit)
            .map(|q| ExistingQuestion {
                title: normalize_line_breaks(&q.title),
                question_text: normalize_line_breaks(&strip_html(&q.question_text)),
            })
            .collect();

        // The list is itself embedded as a JSON string literal.
        let literal = encode_json(&encode_json(&cleaned)?)?;
        Some(ChatMessage::system(format!(
            "The question that will be generated by you has to be different from all of the following questions in this JSON string: {}",
            literal
        )))
    }
}

fn final_message(mode: GenerationMode, story: &str) -> String {
    let story = normalize_line_breaks(story);
    let literal = encode_json(&story).unwrap_or_else(|| format!("\"{}\"", story));
    match mode {
        GenerationMode::Topic => format!(
            "Create a question about the following topic. Use your own training data to generate it: {}",
            literal
        ),
        GenerationMode::CourseContents => format!(
            "Create a question based on the following content, only use this content for the question: {}",
            literal
        ),
    }
}

//=========================================================================================
// Text helpers
//=========================================================================================

/// Replaces every line break (`\r\n`, `\r` or `\n`) with a single space.
pub fn normalize_line_breaks(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\r', '\n'], " ")
}

/// Serializes `value` to JSON with slashes escaped. Backslash, quote and control
/// characters are escaped by `serde_json`, so every provider sees the same text.
pub fn encode_json<T: Serialize + ?Sized>(value: &T) -> Option<String> {
    serde_json::to_string(value)
        .ok()
        .map(|json| json.replace('/', "\\/"))
}

fn tag_regex() -> &'static Regex {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    TAGS.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern is valid"))
}

fn whitespace_regex() -> &'static Regex {
    static WS: OnceLock<Regex> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

/// Removes HTML tags, decodes the common entities and collapses whitespace.
pub fn strip_html(html: &str) -> String {
    let without_tags = tag_regex().replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    whitespace_regex()
        .replace_all(&decoded, " ")
        .trim()
        .to_string()
}
