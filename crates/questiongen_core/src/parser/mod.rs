//! crates/questiongen_core/src/parser/mod.rs
//!
//! Turns raw model output into questions. Both response formats sit behind the
//! single `parse` entry point and share the `ParseFailure` error type.

pub mod flat_tag;
pub mod markup;

use crate::domain::{OutputFormat, ParsedQuestion};

/// Why a response could not be turned into questions. Every variant is
/// recoverable: the orchestrator simply asks the model again.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseFailure {
    #[error("The response is empty")]
    Empty,
    #[error("The response is not a well-formed document: {0}")]
    Malformed(String),
    #[error("The response contains no questions")]
    NoQuestions,
    #[error("The response does not describe a valid question: {0}")]
    Invalid(String),
}

/// Parses `raw` according to the format the preset asked for.
pub fn parse(raw: &str, format: OutputFormat) -> Result<Vec<ParsedQuestion>, ParseFailure> {
    if raw.trim().is_empty() {
        return Err(ParseFailure::Empty);
    }
    match format {
        OutputFormat::StructuredMarkup => markup::parse_document(raw),
        OutputFormat::FlatTag => flat_tag::parse_line(raw).map(|question| vec![question]),
    }
}
