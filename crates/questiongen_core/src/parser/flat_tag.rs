//! crates/questiongen_core/src/parser/flat_tag.rs
//!
//! The flat-tag response format: one line describing one multiple-choice
//! question, e.g. `::Title::Question text {=right ~wrong ~%50%half right#feedback}`.

use std::sync::OnceLock;

use regex::Regex;

use super::ParseFailure;
use crate::domain::{ParsedAnswer, ParsedQuestion, QuestionMetadata};

fn format_prefix_regex() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(r"^\s*\[(html|moodle|plain|markdown)\]\s*").expect("prefix pattern is valid")
    })
}

/// Picks the line holding the question: the first one that is neither blank, a
/// comment, a code fence, nor a category directive.
fn question_line(raw: &str) -> Option<&str> {
    raw.lines().map(str::trim).find(|line| {
        !line.is_empty()
            && !line.starts_with("//")
            && !line.starts_with("```")
            && !line.starts_with("$CATEGORY")
    })
}

/// Byte offset of the first occurrence of `pattern` that is not preceded by a
/// backslash escape.
fn find_unescaped(text: &str, pattern: &str) -> Option<usize> {
    let mut escaped = false;
    for (index, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if ch == '\\' {
            escaped = true;
            continue;
        }
        if text[index..].starts_with(pattern) {
            return Some(index);
        }
    }
    None
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some(next) => out.push(next),
                None => {}
            }
        } else {
            out.push(ch);
        }
    }
    out.trim().to_string()
}

/// Splits the answer block on unescaped `=` and `~` markers.
fn split_answers(block: &str) -> Result<Vec<(char, &str)>, ParseFailure> {
    let mut answers: Vec<(char, usize)> = Vec::new();
    let mut escaped = false;
    for (index, ch) in block.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | '~' => answers.push((ch, index)),
            _ => {}
        }
    }

    let leading = &block[..answers.first().map(|(_, i)| *i).unwrap_or(block.len())];
    if !leading.trim().is_empty() {
        return Err(ParseFailure::Invalid(format!(
            "unexpected text before the first answer: {}",
            leading.trim()
        )));
    }

    Ok(answers
        .iter()
        .enumerate()
        .map(|(n, (marker, start))| {
            let end = answers.get(n + 1).map(|(_, i)| *i).unwrap_or(block.len());
            (*marker, &block[start + 1..end])
        })
        .collect())
}

fn parse_answer(marker: char, raw: &str) -> Result<ParsedAnswer, ParseFailure> {
    let raw = raw.trim_start();
    let (weight, rest) = match raw.strip_prefix('%') {
        Some(after) => {
            let close = after
                .find('%')
                .ok_or_else(|| ParseFailure::Invalid("unterminated answer weight".to_string()))?;
            let weight = after[..close].trim().parse::<f64>().map_err(|_| {
                ParseFailure::Invalid(format!("invalid answer weight: {}", &after[..close]))
            })?;
            (Some(weight), &after[close + 1..])
        }
        None => (None, raw),
    };

    let (text, feedback) = match find_unescaped(rest, "#") {
        Some(hash) => (&rest[..hash], Some(unescape(&rest[hash + 1..]))),
        None => (rest, None),
    };
    let text = unescape(text);
    if text.is_empty() {
        return Err(ParseFailure::Invalid("an answer has no text".to_string()));
    }

    let fraction = match (marker, weight) {
        ('=', _) => 100.0,
        (_, Some(weight)) => weight,
        _ => 0.0,
    };

    Ok(ParsedAnswer {
        text,
        fraction,
        feedback: feedback.filter(|f| !f.is_empty()),
    })
}

/// Parses a flat-tag response into exactly one multiple-choice question.
pub fn parse_line(raw: &str) -> Result<ParsedQuestion, ParseFailure> {
    let line = question_line(raw).ok_or(ParseFailure::Empty)?;

    let (title, body) = match line.strip_prefix("::") {
        Some(after) => {
            let close = find_unescaped(after, "::")
                .ok_or_else(|| ParseFailure::Invalid("unterminated question title".to_string()))?;
            (Some(unescape(&after[..close])), &after[close + 2..])
        }
        None => (None, line),
    };
    let body = format_prefix_regex().replace(body, "");

    let open = find_unescaped(&body, "{")
        .ok_or_else(|| ParseFailure::Invalid("no answer block found".to_string()))?;
    let close = find_unescaped(&body[open..], "}")
        .map(|i| open + i)
        .ok_or_else(|| ParseFailure::Invalid("unterminated answer block".to_string()))?;

    let before = unescape(&body[..open]);
    let after = unescape(&body[close + 1..]);
    let text = match (before.is_empty(), after.is_empty()) {
        (true, true) => return Err(ParseFailure::Invalid("question has no text".to_string())),
        (_, true) => before,
        (true, false) => after,
        (false, false) => format!("{} _____ {}", before, after),
    };

    let answers = split_answers(&body[open + 1..close])?
        .into_iter()
        .map(|(marker, raw)| parse_answer(marker, raw))
        .collect::<Result<Vec<_>, _>>()?;

    if answers.len() < 2 {
        return Err(ParseFailure::Invalid(
            "a multiple-choice question needs at least two answers".to_string(),
        ));
    }
    let correct = answers.iter().filter(|a| a.is_correct()).count();
    if correct != 1 {
        return Err(ParseFailure::Invalid(format!(
            "expected exactly one correct answer, found {}",
            correct
        )));
    }

    Ok(ParsedQuestion {
        name: Some(title.filter(|t| !t.is_empty()).unwrap_or_else(|| text.clone())),
        question_type: "multichoice".to_string(),
        text: format!("<p>{}</p>", text),
        general_feedback: None,
        answers,
        tags: Vec::new(),
        metadata: QuestionMetadata::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_title_text_and_answers() {
        let question = parse_line(
            "::Bastille::In which year was the Bastille stormed? {=1789#Right ~1793 ~%25%1788#Close}",
        )
        .expect("line parses");

        assert_eq!(question.name.as_deref(), Some("Bastille"));
        assert_eq!(question.text, "<p>In which year was the Bastille stormed?</p>");
        assert_eq!(question.question_type, "multichoice");
        assert_eq!(question.answers.len(), 3);
        assert_eq!(question.correct_answer_count(), 1);
        assert_eq!(question.answers[0].feedback.as_deref(), Some("Right"));
        assert_eq!(question.answers[2].fraction, 25.0);
        assert_eq!(question.answers[2].text, "1788");
    }

    #[test]
    fn name_falls_back_to_the_question_text() {
        let question = parse_line("[html]Pick the odd one. {=Seven ~Two ~Four}").expect("parses");
        assert_eq!(question.name.as_deref(), Some("Pick the odd one."));
        assert_eq!(question.text, "<p>Pick the odd one.</p>");
    }

    #[test]
    fn skips_comments_fences_and_honours_escapes() {
        let raw = "```\n// generated\n::Maths::Is 1 \\= 1? {=Yes \\{really\\} ~No}\n```";
        let question = parse_line(raw).expect("parses");
        assert_eq!(question.text, "<p>Is 1 = 1?</p>");
        assert_eq!(question.answers[0].text, "Yes {really}");
    }

    #[test]
    fn rejects_lines_that_are_not_one_multiple_choice_question() {
        for line in [
            "Just some prose without answers.",
            "Unterminated {=a ~b",
            "::Only one:: Q? {=a}",
            "Two right answers? {=a =b ~c}",
            "No right answer? {~a ~b}",
            "True or false? {TRUE}",
            "{=a ~b}",
        ] {
            assert!(parse_line(line).is_err(), "accepted: {}", line);
        }
    }
}
