//! crates/questiongen_core/src/importer.rs
//!
//! Hands parsed model output to the question bank collaborators.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::domain::{CategoryId, NewQuestion, OutputFormat, UserId};
use crate::parser::{markup, parse};
use crate::ports::{MarkupImporter, PortResult, QuestionCreator};
use crate::settings::GenerationSettings;

/// Imports a raw response into a category.
///
/// `Ok(false)` means "not created": the response did not parse or the question
/// bank rejected it. Errors are reserved for collaborators that could not be
/// reached at all.
pub struct QuestionImporter {
    markup_importer: Arc<dyn MarkupImporter>,
    question_creator: Arc<dyn QuestionCreator>,
    settings: GenerationSettings,
}

impl QuestionImporter {
    pub fn new(
        markup_importer: Arc<dyn MarkupImporter>,
        question_creator: Arc<dyn QuestionCreator>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            markup_importer,
            question_creator,
            settings,
        }
    }

    pub async fn import(
        &self,
        category: CategoryId,
        raw: &str,
        format: OutputFormat,
        add_identifier: bool,
        created_by: UserId,
    ) -> PortResult<bool> {
        let questions = match parse(raw, format) {
            Ok(questions) => questions,
            Err(e) => {
                warn!("Model response could not be parsed as {}: {}", format.as_tag(), e);
                return Ok(false);
            }
        };

        match format {
            OutputFormat::StructuredMarkup => {
                // `parse` succeeded, so the document can be extracted.
                let document = markup::extract_document(raw).unwrap_or(raw);
                let document = if add_identifier {
                    markup::add_identifiers(
                        document,
                        self.settings.identifier_prefix.as_deref(),
                        self.settings.identifier_tag.as_deref(),
                    )
                } else {
                    document.to_string()
                };
                let imported = self
                    .markup_importer
                    .import_markup(category, &document, created_by)
                    .await?;
                if imported {
                    info!(
                        "Imported {} question(s) into category {}.",
                        questions.len(),
                        category
                    );
                }
                Ok(imported)
            }
            OutputFormat::FlatTag => {
                let Some(mut question) = questions.into_iter().next() else {
                    return Ok(false);
                };
                if add_identifier {
                    question.metadata.identifier_prefix = self.settings.identifier_prefix.clone();
                    question.metadata.identifier_tag = self.settings.identifier_tag.clone();
                }
                question.metadata.category = Some(category);
                question.metadata.created_by = Some(created_by);

                let now = Utc::now();
                let new_question = NewQuestion {
                    category,
                    name: question.display_name(),
                    question_text: question.text.clone(),
                    question_type: question.question_type.clone(),
                    tags: question
                        .metadata
                        .identifier_tag
                        .iter()
                        .cloned()
                        .chain(question.tags.iter().cloned())
                        .collect(),
                    answers: question.answers,
                    created_by,
                    modified_by: created_by,
                    created_at: now,
                    modified_at: now,
                };

                match self.question_creator.create_question(new_question).await? {
                    Some(created) => {
                        info!("Created question {} ({}).", created.id, created.name);
                        Ok(true)
                    }
                    None => {
                        warn!("Question bank rejected the generated question.");
                        Ok(false)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::CreatedQuestion;
    use crate::presets::MULTICHOICE_MARKUP_EXAMPLE;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        markup: Mutex<Vec<(CategoryId, String, UserId)>>,
        questions: Mutex<Vec<NewQuestion>>,
    }

    #[async_trait]
    impl MarkupImporter for Recorder {
        async fn import_markup(
            &self,
            category: CategoryId,
            markup: &str,
            created_by: UserId,
        ) -> PortResult<bool> {
            self.markup
                .lock()
                .unwrap()
                .push((category, markup.to_string(), created_by));
            Ok(true)
        }
    }

    #[async_trait]
    impl QuestionCreator for Recorder {
        async fn create_question(&self, question: NewQuestion) -> PortResult<Option<CreatedQuestion>> {
            let created = CreatedQuestion {
                id: 1,
                name: question.name.clone(),
            };
            self.questions.lock().unwrap().push(question);
            Ok(Some(created))
        }
    }

    fn importer(recorder: &Arc<Recorder>) -> QuestionImporter {
        QuestionImporter::new(recorder.clone(), recorder.clone(), GenerationSettings::default())
    }

    #[tokio::test]
    async fn markup_is_rewritten_before_import() {
        let recorder = Arc::new(Recorder::default());
        let imported = importer(&recorder)
            .import(7, MULTICHOICE_MARKUP_EXAMPLE, OutputFormat::StructuredMarkup, true, 2)
            .await
            .unwrap();

        assert!(imported);
        let calls = recorder.markup.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, 7);
        assert_eq!(calls[0].2, 2);
        assert!(calls[0].1.contains("AI generated - Question title"));
        assert!(calls[0].1.contains("<text>aigenerated</text>"));
    }

    #[tokio::test]
    async fn malformed_markup_never_reaches_the_importer() {
        let recorder = Arc::new(Recorder::default());
        for raw in ["", "<quiz><question>", "<quiz><question><name><text>x</text></name></question></quiz>"] {
            let imported = importer(&recorder)
                .import(7, raw, OutputFormat::StructuredMarkup, true, 2)
                .await
                .unwrap();
            assert!(!imported);
        }
        assert!(recorder.markup.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn flat_line_becomes_a_stamped_question() {
        let recorder = Arc::new(Recorder::default());
        let imported = importer(&recorder)
            .import(
                3,
                "::Capital::What is the capital of France? {=Paris ~Lyon ~Nice}",
                OutputFormat::FlatTag,
                true,
                42,
            )
            .await
            .unwrap();

        assert!(imported);
        let questions = recorder.questions.lock().unwrap();
        let question = &questions[0];
        assert_eq!(question.name, "AI generated - Capital");
        assert_eq!(question.category, 3);
        assert_eq!(question.created_by, 42);
        assert_eq!(question.modified_by, 42);
        assert_eq!(question.tags, vec!["aigenerated".to_string()]);
        assert_eq!(question.answers.iter().filter(|a| a.is_correct()).count(), 1);
    }

    #[tokio::test]
    async fn flat_line_without_identifier_keeps_its_name() {
        let recorder = Arc::new(Recorder::default());
        importer(&recorder)
            .import(3, "::Capital::Q? {=a ~b}", OutputFormat::FlatTag, false, 1)
            .await
            .unwrap();
        let questions = recorder.questions.lock().unwrap();
        assert_eq!(questions[0].name, "Capital");
        assert!(questions[0].tags.is_empty());
    }
}
