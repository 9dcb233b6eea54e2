//! crates/questiongen_core/src/orchestrator.rs
//!
//! The background batch: for every queued request, prompt the model, import the
//! answer, retry a bounded number of times, and report progress.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::domain::{AttemptOutcome, AttemptRecord, BatchPayload, GenerationMode, GenerationRequest};
use crate::extractor::{ContentExtractor, ExtractionError};
use crate::importer::QuestionImporter;
use crate::ports::{
    CaptioningService, ExtractionCache, GenerationProvider, GenerationRequestStore,
    MarkupImporter, PdfRasterizer, PortError, ProgressSink, QuestionBank, QuestionCreator,
};
use crate::prompt::PromptBuilder;
use crate::settings::GenerationSettings;

/// Shown to the user when the batch fails for a reason they cannot act on.
pub const GENERIC_ERROR_MESSAGE: &str =
    "An unexpected error occurred while generating questions. Please contact your administrator.";
pub const COURSE_CONTENTS_EMPTY_MESSAGE: &str =
    "The selected course contents did not contain any text to generate questions from.";

/// Failures that escape the per-request retry loop and end the batch.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("No generation requests were found for this task")]
    NoRequests,
    #[error("Content extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Port(#[from] PortError),
}

/// What a batch did. Returned to the host for logging and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Set when the batch stopped before handling every request.
    pub aborted: bool,
    pub attempts: Vec<AttemptRecord>,
}

/// Every collaborator the pipeline talks to.
#[derive(Clone)]
pub struct PipelinePorts {
    pub requests: Arc<dyn GenerationRequestStore>,
    pub question_bank: Arc<dyn QuestionBank>,
    pub provider: Arc<dyn GenerationProvider>,
    pub markup_importer: Arc<dyn MarkupImporter>,
    pub question_creator: Arc<dyn QuestionCreator>,
    pub extraction_cache: Arc<dyn ExtractionCache>,
    pub captioner: Arc<dyn CaptioningService>,
    pub rasterizer: Arc<dyn PdfRasterizer>,
}

pub struct GenerationOrchestrator {
    requests: Arc<dyn GenerationRequestStore>,
    question_bank: Arc<dyn QuestionBank>,
    provider: Arc<dyn GenerationProvider>,
    importer: QuestionImporter,
    extractor: ContentExtractor,
    prompt_builder: PromptBuilder,
    settings: GenerationSettings,
}

impl GenerationOrchestrator {
    pub fn new(ports: PipelinePorts, settings: GenerationSettings) -> Self {
        Self {
            importer: QuestionImporter::new(
                ports.markup_importer,
                ports.question_creator,
                settings.clone(),
            ),
            extractor: ContentExtractor::new(
                ports.extraction_cache,
                ports.captioner,
                ports.rasterizer,
            ),
            prompt_builder: PromptBuilder::new(settings.existing_questions_limit),
            requests: ports.requests,
            question_bank: ports.question_bank,
            provider: ports.provider,
            settings,
        }
    }

    /// Runs a whole batch. Never fails: anything unexpected is logged and turned
    /// into a generic progress error.
    pub async fn run(&self, payload: &BatchPayload, progress: &dyn ProgressSink) -> BatchReport {
        let mut report = BatchReport::default();
        if let Err(e) = self.execute(payload, progress, &mut report).await {
            error!("Question generation batch failed: {:?}", e);
            report.aborted = true;
            if let Err(progress_error) = progress.error(GENERIC_ERROR_MESSAGE).await {
                error!("Could not report the batch failure: {}", progress_error);
            }
        }
        info!(
            "Question generation batch finished: {} of {} succeeded, {} failed, aborted: {}.",
            report.succeeded, report.total, report.failed, report.aborted
        );
        report
    }

    async fn execute(
        &self,
        payload: &BatchPayload,
        progress: &dyn ProgressSink,
        report: &mut BatchReport,
    ) -> Result<(), BatchError> {
        let mut requests = self.requests.get_requests(&payload.request_ids).await?;
        if requests.is_empty() {
            return Err(BatchError::NoRequests);
        }
        requests.sort_by_key(|r| {
            payload
                .request_ids
                .iter()
                .position(|id| *id == r.id)
                .unwrap_or(usize::MAX)
        });

        let total = requests.len();
        report.total = total;
        progress
            .update(0, total as u32, "Starting question generation.")
            .await?;

        if !payload.course_items.is_empty() {
            let story = self
                .extractor
                .extract_all(payload.context_id, &payload.course_items)
                .await?;
            if story.trim().is_empty() {
                warn!("Selected course contents produced no text.");
                report.aborted = true;
                progress.error(COURSE_CONTENTS_EMPTY_MESSAGE).await?;
                return Ok(());
            }
            for request in requests.iter_mut() {
                self.requests.update_story(request.id, &story).await?;
                request.story = story.clone();
                request.mode = GenerationMode::CourseContents;
            }
        }

        for (index, request) in requests.iter().enumerate() {
            let position = index + 1;
            info!(
                "Generating question {} of {} (request {}).",
                position, total, request.id
            );

            let created = match self
                .generate(request, payload, progress, report)
                .await?
            {
                Some(created) => created,
                None => return Ok(()),
            };

            self.requests.mark_finished(request.id, created).await?;
            if created {
                report.succeeded += 1;
            } else {
                report.failed += 1;
                warn!(
                    "Request {} produced no question after {} attempt(s).",
                    request.id, self.settings.max_tries
                );
            }
            progress
                .update(
                    position as u32,
                    total as u32,
                    &format!("Generated {} of {} questions.", position, total),
                )
                .await?;
        }

        progress
            .update_full(
                100.0,
                &format!(
                    "Finished: {} of {} questions created.",
                    report.succeeded, total
                ),
            )
            .await?;
        if report.failed > 0 {
            progress
                .error(&format!(
                    "{} of {} questions could not be created.",
                    report.failed, total
                ))
                .await?;
        }
        Ok(())
    }

    /// The retry loop of one request.
    ///
    /// Returns `Some(created)` once the request is done, or `None` when the
    /// provider failed and the batch has to stop.
    async fn generate(
        &self,
        request: &GenerationRequest,
        payload: &BatchPayload,
        progress: &dyn ProgressSink,
        report: &mut BatchReport,
    ) -> Result<Option<bool>, BatchError> {
        for attempt_number in 1..=self.settings.max_tries {
            let existing = if payload.send_existing_questions_as_context {
                self.question_bank
                    .existing_questions(request.category, self.settings.existing_questions_limit)
                    .await?
            } else {
                Vec::new()
            };
            let messages = self.prompt_builder.build(
                &request.preset,
                &request.story,
                request.mode,
                &existing,
            );

            let response = match self.provider.send(payload.context_id, &messages).await {
                Ok(response) => response,
                Err(e) => {
                    if let Some(debug_info) = e.debug_info() {
                        debug!("Provider debug info for request {}: {}", request.id, debug_info);
                    }
                    error!(
                        "Provider failed on request {} (attempt {}): {}",
                        request.id, attempt_number, e
                    );
                    self.record(
                        request,
                        attempt_number,
                        AttemptOutcome::ProviderFailed {
                            message: e.user_message(),
                        },
                        report,
                    )
                    .await?;
                    self.requests.mark_finished(request.id, false).await?;
                    report.failed += 1;
                    report.aborted = true;
                    progress.error(&e.user_message()).await?;
                    return Ok(None);
                }
            };

            self.requests.save_response(request.id, &response).await?;
            let created = self
                .importer
                .import(
                    request.category,
                    &response,
                    request.preset.format,
                    request.add_identifier,
                    request.created_by,
                )
                .await?;

            let outcome = if created {
                AttemptOutcome::Imported
            } else {
                AttemptOutcome::NotImported
            };
            self.record(request, attempt_number, outcome, report).await?;
            if created {
                return Ok(Some(true));
            }
            debug!(
                "Attempt {} of {} for request {} did not create a question.",
                attempt_number, self.settings.max_tries, request.id
            );
        }
        Ok(Some(false))
    }

    async fn record(
        &self,
        request: &GenerationRequest,
        attempt_number: u32,
        outcome: AttemptOutcome,
        report: &mut BatchReport,
    ) -> Result<(), BatchError> {
        let record = AttemptRecord {
            request_id: request.id,
            attempt_number,
            outcome,
            recorded_at: Utc::now(),
        };
        self.requests.record_attempt(&record).await?;
        report.attempts.push(record);
        Ok(())
    }
}
