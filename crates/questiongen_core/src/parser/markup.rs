//! crates/questiongen_core/src/parser/markup.rs
//!
//! The structured-markup response format: a `<quiz>` document holding one or
//! more `<question>` elements.

use quick_xml::events::{BytesCData, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::warn;

use super::ParseFailure;
use crate::domain::{ParsedAnswer, ParsedQuestion, QuestionMetadata};

const CHOICE_TYPES: [&str; 4] = ["multichoice", "truefalse", "shortanswer", "numerical"];

//=========================================================================================
// Document extraction
//=========================================================================================

/// Cuts the markup document out of a model response.
///
/// Models like to wrap the document in code fences or put a sentence in front of
/// it. Everything before the prolog (or the `<quiz>` root when there is none) and
/// after the closing `</quiz>` is dropped.
pub fn extract_document(raw: &str) -> Option<&str> {
    let start = raw.find("<?xml").or_else(|| raw.find("<quiz"))?;
    let rest = &raw[start..];
    let end = rest
        .rfind("</quiz>")
        .map(|i| i + "</quiz>".len())
        .unwrap_or(rest.len());
    Some(rest[..end].trim())
}

//=========================================================================================
// Element tree
//=========================================================================================

#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ParseFailure> {
        let mut attributes = Vec::new();
        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| ParseFailure::Malformed(e.to_string()))?;
            let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
            let value = attribute
                .unescape_value()
                .map_err(|e| ParseFailure::Malformed(e.to_string()))?
                .into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            attributes,
            ..Default::default()
        })
    }

    fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Text of the `<text>` child, the common wrapper for every text field.
    fn text_child(&self) -> Option<String> {
        self.child("text").map(|t| t.text.trim().to_string())
    }
}

fn read_tree(document: &str) -> Result<Element, ParseFailure> {
    // Text and CDATA runs are joined untrimmed; `text_child` trims the result.
    let mut reader = Reader::from_str(document);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ParseFailure::Malformed(e.to_string()))?;
        match event {
            Event::Start(start) => {
                if root.is_some() {
                    return Err(ParseFailure::Malformed(
                        "content after the root element".to_string(),
                    ));
                }
                stack.push(Element::from_start(&start)?);
            }
            Event::Empty(start) => {
                let element = Element::from_start(&start)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None if root.is_none() => root = Some(element),
                    None => {
                        return Err(ParseFailure::Malformed(
                            "content after the root element".to_string(),
                        ))
                    }
                }
            }
            Event::End(_) => {
                let element = stack.pop().ok_or_else(|| {
                    ParseFailure::Malformed("unexpected closing tag".to_string())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(element),
                    None => root = Some(element),
                }
            }
            Event::Text(text) => {
                let value = text
                    .unescape()
                    .map_err(|e| ParseFailure::Malformed(e.to_string()))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&value);
                }
            }
            Event::CData(cdata) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(&String::from_utf8_lossy(&cdata.into_inner()));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ParseFailure::Malformed(format!(
            "document ends inside <{}>",
            stack.last().map(|e| e.name.as_str()).unwrap_or_default()
        )));
    }
    root.ok_or_else(|| ParseFailure::Malformed("no root element".to_string()))
}

//=========================================================================================
// Parsing
//=========================================================================================

/// Parses a markup response into the questions it contains.
pub fn parse_document(raw: &str) -> Result<Vec<ParsedQuestion>, ParseFailure> {
    let document = extract_document(raw)
        .ok_or_else(|| ParseFailure::Malformed("no <quiz> document found".to_string()))?;
    let root = read_tree(document)?;
    if root.name != "quiz" {
        return Err(ParseFailure::Malformed(format!(
            "expected <quiz> as root element, found <{}>",
            root.name
        )));
    }

    let mut questions = Vec::new();
    for (index, element) in root.children_named("question").enumerate() {
        let question_type = element.attribute("type").unwrap_or("multichoice");
        if question_type == "category" {
            continue;
        }
        questions.push(parse_question(index + 1, question_type, element)?);
    }

    if questions.is_empty() {
        return Err(ParseFailure::NoQuestions);
    }
    Ok(questions)
}

fn parse_question(
    position: usize,
    question_type: &str,
    element: &Element,
) -> Result<ParsedQuestion, ParseFailure> {
    let text = element
        .child("questiontext")
        .and_then(Element::text_child)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            ParseFailure::Invalid(format!("question {} has no question text", position))
        })?;

    let answers: Vec<ParsedAnswer> = element
        .children_named("answer")
        .map(|answer| ParsedAnswer {
            text: answer.text_child().unwrap_or_default(),
            fraction: answer
                .attribute("fraction")
                .and_then(|f| f.trim().parse::<f64>().ok())
                .unwrap_or(0.0),
            feedback: answer
                .child("feedback")
                .and_then(Element::text_child)
                .filter(|f| !f.is_empty()),
        })
        .collect();

    if CHOICE_TYPES.contains(&question_type) && answers.is_empty() {
        return Err(ParseFailure::Invalid(format!(
            "{} question {} has no answers",
            question_type, position
        )));
    }

    let tags = element
        .child("tags")
        .map(|tags| {
            tags.children_named("tag")
                .filter_map(Element::text_child)
                .filter(|t| !t.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(ParsedQuestion {
        name: element
            .child("name")
            .and_then(Element::text_child)
            .filter(|n| !n.is_empty()),
        question_type: question_type.to_string(),
        text,
        general_feedback: element
            .child("generalfeedback")
            .and_then(Element::text_child)
            .filter(|f| !f.is_empty()),
        answers,
        tags,
        metadata: QuestionMetadata::default(),
    })
}

//=========================================================================================
// Identifier rewriting
//=========================================================================================

#[derive(Debug, Default)]
struct QuestionState {
    category: bool,
    name_prefixed: bool,
    has_tags: bool,
}

fn ends_with(stack: &[String], path: &[&str]) -> bool {
    stack.len() >= path.len()
        && stack[stack.len() - path.len()..]
            .iter()
            .zip(path)
            .all(|(a, b)| a == b)
}

/// Prepends `prefix` to every question name and adds `tag` to every question.
///
/// A document that cannot be read, or that has a question without a name, is
/// returned unmodified with a warning.
pub fn add_identifiers(document: &str, prefix: Option<&str>, tag: Option<&str>) -> String {
    if prefix.is_none() && tag.is_none() {
        return document.to_string();
    }

    match read_tree(document) {
        Ok(root) => {
            let unnamed = root
                .children_named("question")
                .filter(|q| q.attribute("type") != Some("category"))
                .any(|q| q.child("name").and_then(|n| n.child("text")).is_none());
            if unnamed {
                warn!("Question document has a question without a name; identifiers not added.");
                return document.to_string();
            }
        }
        Err(e) => {
            warn!("Could not read question document to add identifiers: {}", e);
            return document.to_string();
        }
    }

    match rewrite(document, prefix, tag) {
        Ok(rewritten) => rewritten,
        Err(e) => {
            warn!("Could not add identifiers to question document: {}", e);
            document.to_string()
        }
    }
}

fn tag_events(writer: &mut Writer<Vec<u8>>, tag: &str) -> Result<(), String> {
    writer
        .write_event(Event::Start(BytesStart::new("tag")))
        .map_err(|e| e.to_string())?;
    writer
        .write_event(Event::Start(BytesStart::new("text")))
        .map_err(|e| e.to_string())?;
    writer
        .write_event(Event::Text(BytesText::new(tag)))
        .map_err(|e| e.to_string())?;
    writer
        .write_event(Event::End(BytesEnd::new("text")))
        .map_err(|e| e.to_string())?;
    writer
        .write_event(Event::End(BytesEnd::new("tag")))
        .map_err(|e| e.to_string())
}

fn tags_block(writer: &mut Writer<Vec<u8>>, tag: &str) -> Result<(), String> {
    writer
        .write_event(Event::Start(BytesStart::new("tags")))
        .map_err(|e| e.to_string())?;
    tag_events(writer, tag)?;
    writer
        .write_event(Event::End(BytesEnd::new("tags")))
        .map_err(|e| e.to_string())
}

fn rewrite(document: &str, prefix: Option<&str>, tag: Option<&str>) -> Result<String, String> {
    let mut reader = Reader::from_str(document);
    let mut writer = Writer::new(Vec::new());
    let mut stack: Vec<String> = Vec::new();
    let mut question: Option<QuestionState> = None;

    loop {
        let event = reader.read_event().map_err(|e| e.to_string())?;
        let active = question.as_ref().map(|q| !q.category).unwrap_or(false);

        match event {
            Event::Eof => break,
            Event::Start(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                if name == "question" {
                    let category = start
                        .try_get_attribute("type")
                        .map_err(|e| e.to_string())?
                        .map(|a| a.value.as_ref() == b"category")
                        .unwrap_or(false);
                    question = Some(QuestionState {
                        category,
                        ..Default::default()
                    });
                }
                if active && name == "tags" && ends_with(&stack, &["question"]) {
                    if let Some(q) = question.as_mut() {
                        q.has_tags = true;
                    }
                }
                stack.push(name);
                writer
                    .write_event(Event::Start(start))
                    .map_err(|e| e.to_string())?;
            }
            Event::Empty(start) => {
                let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
                let in_question = ends_with(&stack, &["question"]);
                match (active, name.as_str(), prefix, tag) {
                    (true, "tags", _, Some(tag)) if in_question => {
                        tags_block(&mut writer, tag)?;
                        if let Some(q) = question.as_mut() {
                            q.has_tags = true;
                        }
                    }
                    (true, "text", Some(prefix), _)
                        if ends_with(&stack, &["question", "name"]) =>
                    {
                        writer
                            .write_event(Event::Start(BytesStart::new("text")))
                            .map_err(|e| e.to_string())?;
                        writer
                            .write_event(Event::Text(BytesText::new(prefix)))
                            .map_err(|e| e.to_string())?;
                        writer
                            .write_event(Event::End(BytesEnd::new("text")))
                            .map_err(|e| e.to_string())?;
                        if let Some(q) = question.as_mut() {
                            q.name_prefixed = true;
                        }
                    }
                    _ => writer
                        .write_event(Event::Empty(start))
                        .map_err(|e| e.to_string())?,
                }
            }
            Event::Text(text) => {
                let in_name = ends_with(&stack, &["question", "name", "text"]);
                let pending = question.as_ref().map(|q| !q.name_prefixed).unwrap_or(false);
                match prefix {
                    Some(prefix) if active && in_name && pending => {
                        let value = text.unescape().map_err(|e| e.to_string())?;
                        let prefixed = format!("{}{}", prefix, value.trim_start());
                        writer
                            .write_event(Event::Text(BytesText::new(&prefixed)))
                            .map_err(|e| e.to_string())?;
                        if let Some(q) = question.as_mut() {
                            q.name_prefixed = true;
                        }
                    }
                    _ => writer
                        .write_event(Event::Text(text))
                        .map_err(|e| e.to_string())?,
                }
            }
            Event::CData(cdata) => {
                let in_name = ends_with(&stack, &["question", "name", "text"]);
                let pending = question.as_ref().map(|q| !q.name_prefixed).unwrap_or(false);
                match prefix {
                    Some(prefix) if active && in_name && pending => {
                        let value = String::from_utf8_lossy(&cdata.into_inner()).into_owned();
                        let prefixed = format!("{}{}", prefix, value.trim_start());
                        writer
                            .write_event(Event::CData(BytesCData::new(prefixed)))
                            .map_err(|e| e.to_string())?;
                        if let Some(q) = question.as_mut() {
                            q.name_prefixed = true;
                        }
                    }
                    _ => writer
                        .write_event(Event::CData(cdata))
                        .map_err(|e| e.to_string())?,
                }
            }
            Event::End(end) => {
                let name = String::from_utf8_lossy(end.name().as_ref()).into_owned();
                if active {
                    let pending_name =
                        question.as_ref().map(|q| !q.name_prefixed).unwrap_or(false);
                    let has_tags = question.as_ref().map(|q| q.has_tags).unwrap_or(true);
                    match (name.as_str(), prefix, tag) {
                        ("text", Some(prefix), _)
                            if pending_name && ends_with(&stack, &["question", "name", "text"]) =>
                        {
                            writer
                                .write_event(Event::Text(BytesText::new(prefix)))
                                .map_err(|e| e.to_string())?;
                            if let Some(q) = question.as_mut() {
                                q.name_prefixed = true;
                            }
                        }
                        ("tags", _, Some(tag)) if ends_with(&stack, &["question", "tags"]) => {
                            tag_events(&mut writer, tag)?;
                        }
                        ("question", _, Some(tag)) if !has_tags => {
                            tags_block(&mut writer, tag)?;
                        }
                        _ => {}
                    }
                }
                if name == "question" {
                    question = None;
                }
                stack.pop();
                writer
                    .write_event(Event::End(end))
                    .map_err(|e| e.to_string())?;
            }
            other => writer.write_event(other).map_err(|e| e.to_string())?,
        }
    }

    String::from_utf8(writer.into_inner()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<quiz>
  <question type="category">
    <category><text>$course$/top</text></category>
  </question>
  <question type="multichoice">
    <name><text>Storming of the Bastille</text></name>
    <questiontext format="html"><text><![CDATA[<p>In which year was the Bastille stormed?</p>]]></text></questiontext>
    <answer fraction="100"><text>1789</text><feedback><text>Correct</text></feedback></answer>
    <answer fraction="0"><text>1793</text></answer>
  </question>
</quiz>"#;

    #[test]
    fn parses_questions_and_skips_categories() {
        let questions = parse_document(DOCUMENT).expect("document parses");
        assert_eq!(questions.len(), 1);
        let question = &questions[0];
        assert_eq!(question.name.as_deref(), Some("Storming of the Bastille"));
        assert_eq!(question.question_type, "multichoice");
        assert_eq!(question.text, "<p>In which year was the Bastille stormed?</p>");
        assert_eq!(question.answers.len(), 2);
        assert_eq!(question.correct_answer_count(), 1);
        assert_eq!(question.answers[0].feedback.as_deref(), Some("Correct"));
    }

    #[test]
    fn tolerates_code_fences_and_chatter() {
        let raw = format!("Here is your question:\n```xml\n{}\n```\n", DOCUMENT);
        assert_eq!(parse_document(&raw).map(|q| q.len()), Ok(1));
    }

    #[test]
    fn malformed_documents_are_rejected() {
        let truncated = &DOCUMENT[..DOCUMENT.len() - 40];
        assert!(matches!(
            parse_document(truncated),
            Err(ParseFailure::Malformed(_))
        ));
        assert!(matches!(
            parse_document("no markup at all"),
            Err(ParseFailure::Malformed(_))
        ));
        assert_eq!(
            parse_document("<quiz></quiz>"),
            Err(ParseFailure::NoQuestions)
        );
        assert!(matches!(
            parse_document(
                "<quiz><question type=\"multichoice\"><name><text>x</text></name></question></quiz>"
            ),
            Err(ParseFailure::Invalid(_))
        ));
        assert!(matches!(
            parse_document(
                "<quiz><question type=\"multichoice\"><questiontext><text>Why?</text></questiontext></question></quiz>"
            ),
            Err(ParseFailure::Invalid(_))
        ));
    }

    #[test]
    fn adds_prefix_and_tag() {
        let rewritten = add_identifiers(DOCUMENT, Some("AI generated - "), Some("aigenerated"));
        let questions = parse_document(&rewritten).expect("rewritten document parses");
        assert_eq!(
            questions[0].name.as_deref(),
            Some("AI generated - Storming of the Bastille")
        );
        assert_eq!(questions[0].tags, vec!["aigenerated".to_string()]);
        assert!(rewritten.contains("<text>$course$/top</text>"));
    }

    #[test]
    fn appends_to_existing_tags() {
        let document = "<quiz><question type=\"essay\"><name><text><![CDATA[Essay]]></text></name>\
            <questiontext><text>Discuss.</text></questiontext>\
            <tags><tag><text>history</text></tag></tags></question></quiz>";
        let rewritten = add_identifiers(document, Some("AI: "), Some("aigenerated"));
        let questions = parse_document(&rewritten).expect("rewritten document parses");
        assert_eq!(questions[0].name.as_deref(), Some("AI: Essay"));
        assert_eq!(
            questions[0].tags,
            vec!["history".to_string(), "aigenerated".to_string()]
        );
    }

    #[test]
    fn mixed_text_and_cdata_keep_their_spacing() {
        let document = "<quiz><question type=\"essay\"><name><text>Bold</text></name>\
            <questiontext><text>Which is <![CDATA[<b>bold</b>]]> here?</text></questiontext>\
            </question></quiz>";
        let questions = parse_document(document).expect("document parses");
        assert_eq!(questions[0].text, "Which is <b>bold</b> here?");
    }

    #[test]
    fn prefix_keeps_its_space_before_indented_cdata_names() {
        let document = "<quiz><question type=\"essay\"><name><text>\n  <![CDATA[Title]]></text></name>\
            <questiontext><text>Discuss.</text></questiontext></question></quiz>";
        let rewritten = add_identifiers(document, Some("AI generated - "), None);
        let questions = parse_document(&rewritten).expect("rewritten document parses");
        assert_eq!(questions[0].name.as_deref(), Some("AI generated - Title"));
    }

    #[test]
    fn leaves_documents_without_names_untouched() {
        let document = "<quiz><question type=\"essay\"><questiontext><text>Discuss.</text></questiontext></question></quiz>";
        assert_eq!(
            add_identifiers(document, Some("AI: "), Some("aigenerated")),
            document
        );
        let broken = "<quiz><question>";
        assert_eq!(add_identifiers(broken, Some("AI: "), None), broken);
    }
}
