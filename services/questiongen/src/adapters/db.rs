//! services/questiongen/src/adapters/db.rs
//!
//! This module contains the database adapter. It implements the storage ports of
//! the `core` crate, the task runner's stores, and a local question bank, using
//! `sqlx` against PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use questiongen_core::{
    domain::{
        AttemptOutcome, AttemptRecord, CategoryId, CreatedQuestion, ExistingQuestion,
        ExtractedContentCacheEntry, GenerationMode, GenerationRequest, NewQuestion,
        OutputFormat, ParsedAnswer, Preset, PresetFields, UserId,
    },
    parse,
    ports::{
        ExtractionCache, GenerationRequestStore, MarkupImporter, PortError, PortResult,
        PresetStore, QuestionBank, QuestionCreator,
    },
    presets::default_presets,
};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::tasks::{RequestQueue, TaskProgress, TaskProgressStore};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter backing every storage port of the service.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Creates a new `PgStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Inserts the built-in presets unless they already exist.
    pub async fn seed_default_presets(&self) -> Result<(), sqlx::Error> {
        for preset in default_presets() {
            sqlx::query(
                "INSERT INTO presets (id, name, primer, instructions, example, format) \
                 VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (id) DO NOTHING",
            )
            .bind(preset.id)
            .bind(&preset.name)
            .bind(&preset.primer)
            .bind(&preset.instructions)
            .bind(&preset.example)
            .bind(preset.format.as_tag())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn parse_format(tag: &str) -> PortResult<OutputFormat> {
    OutputFormat::from_tag(tag)
        .ok_or_else(|| PortError::Unexpected(format!("Unknown output format '{}'", tag)))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct PresetRecord {
    id: Uuid,
    name: String,
    primer: String,
    instructions: String,
    example: String,
    format: String,
}
impl PresetRecord {
    fn into_domain(self) -> PortResult<Preset> {
        Ok(Preset {
            id: self.id,
            name: self.name,
            primer: self.primer,
            instructions: self.instructions,
            example: self.example,
            format: parse_format(&self.format)?,
        })
    }
}

#[derive(FromRow)]
struct RequestRecord {
    id: Uuid,
    category: i64,
    story: String,
    primer: String,
    instructions: String,
    example: String,
    format: String,
    mode: String,
    num_of_questions: i32,
    tries: i32,
    llm_response: Option<String>,
    success: Option<bool>,
    add_identifier: bool,
    created_by: i64,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
}
impl RequestRecord {
    fn into_domain(self) -> PortResult<GenerationRequest> {
        Ok(GenerationRequest {
            id: self.id,
            category: self.category,
            story: self.story,
            preset: PresetFields {
                primer: self.primer,
                instructions: self.instructions,
                example: self.example,
                format: parse_format(&self.format)?,
            },
            mode: GenerationMode::from_name(&self.mode).unwrap_or_default(),
            num_of_questions: self.num_of_questions.max(0) as u32,
            tries: self.tries.max(0) as u32,
            llm_response: self.llm_response,
            success: self.success,
            add_identifier: self.add_identifier,
            created_by: self.created_by,
            created_at: self.created_at,
            modified_at: self.modified_at,
        })
    }
}

#[derive(FromRow)]
struct CacheRecord {
    content_hash: String,
    extracted_content: String,
    created_at: DateTime<Utc>,
    modified_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}
impl CacheRecord {
    fn into_domain(self) -> ExtractedContentCacheEntry {
        ExtractedContentCacheEntry {
            content_hash: self.content_hash,
            extracted_content: self.extracted_content,
            created_at: self.created_at,
            modified_at: self.modified_at,
            last_accessed_at: self.last_accessed_at,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    task_id: Uuid,
    percent: f32,
    message: String,
    failed: bool,
    error_message: Option<String>,
    updated_at: DateTime<Utc>,
}
impl ProgressRecord {
    fn into_domain(self) -> TaskProgress {
        TaskProgress {
            task_id: self.task_id,
            percent: self.percent,
            message: self.message,
            failed: self.failed,
            error_message: self.error_message,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ExistingQuestionRecord {
    name: String,
    question_text: String,
}

const REQUEST_COLUMNS: &str = "id, category, story, primer, instructions, example, format, mode, \
    num_of_questions, tries, llm_response, success, add_identifier, created_by, created_at, modified_at";

//=========================================================================================
// Generation Requests
//=========================================================================================

#[async_trait]
impl GenerationRequestStore for PgStore {
    async fn get_request(&self, id: Uuid) -> PortResult<GenerationRequest> {
        let record = sqlx::query_as::<_, RequestRecord>(&format!(
            "SELECT {} FROM generation_requests WHERE id = $1",
            REQUEST_COLUMNS
        ))
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => {
                PortError::NotFound(format!("Generation request {} not found", id))
            }
            _ => unexpected(e),
        })?;
        record.into_domain()
    }

    async fn get_requests(&self, ids: &[Uuid]) -> PortResult<Vec<GenerationRequest>> {
        let records = sqlx::query_as::<_, RequestRecord>(&format!(
            "SELECT {} FROM generation_requests WHERE id = ANY($1) ORDER BY created_at, id",
            REQUEST_COLUMNS
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(RequestRecord::into_domain).collect()
    }

    async fn update_story(&self, id: Uuid, story: &str) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE generation_requests SET story = $2, mode = $3, modified_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(story)
        .bind(GenerationMode::CourseContents.as_str())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Generation request {} not found",
                id
            )));
        }
        Ok(())
    }

    async fn save_response(&self, id: Uuid, llm_response: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE generation_requests SET llm_response = $2, modified_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(llm_response)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn record_attempt(&self, attempt: &AttemptRecord) -> PortResult<()> {
        let message = match &attempt.outcome {
            AttemptOutcome::ProviderFailed { message } => Some(message.as_str()),
            _ => None,
        };

        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        sqlx::query(
            "INSERT INTO generation_attempts (request_id, attempt_number, outcome, message, recorded_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(attempt.request_id)
        .bind(attempt.attempt_number as i32)
        .bind(attempt.outcome.as_str())
        .bind(message)
        .bind(attempt.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        sqlx::query(
            "UPDATE generation_requests SET tries = tries + 1, modified_at = NOW() WHERE id = $1",
        )
        .bind(attempt.request_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)
    }

    async fn mark_finished(&self, id: Uuid, success: bool) -> PortResult<()> {
        sqlx::query(
            "UPDATE generation_requests SET success = $2, modified_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(success)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

#[async_trait]
impl RequestQueue for PgStore {
    async fn create_requests(&self, task_id: Uuid, requests: &[GenerationRequest]) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for request in requests {
            sqlx::query(
                "INSERT INTO generation_requests (id, task_id, category, story, primer, instructions, \
                 example, format, mode, num_of_questions, tries, add_identifier, created_by, created_at, modified_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
            )
            .bind(request.id)
            .bind(task_id)
            .bind(request.category)
            .bind(&request.story)
            .bind(&request.preset.primer)
            .bind(&request.preset.instructions)
            .bind(&request.preset.example)
            .bind(request.preset.format.as_tag())
            .bind(request.mode.as_str())
            .bind(request.num_of_questions as i32)
            .bind(request.tries as i32)
            .bind(request.add_identifier)
            .bind(request.created_by)
            .bind(request.created_at)
            .bind(request.modified_at)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)
    }
}

//=========================================================================================
// Extraction Cache
//=========================================================================================

#[async_trait]
impl ExtractionCache for PgStore {
    async fn get_entry(&self, content_hash: &str) -> PortResult<Option<ExtractedContentCacheEntry>> {
        let record = sqlx::query_as::<_, CacheRecord>(
            "SELECT content_hash, extracted_content, created_at, modified_at, last_accessed_at \
             FROM extracted_content_cache WHERE content_hash = $1",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(CacheRecord::into_domain))
    }

    async fn touch_entry(&self, content_hash: &str, accessed_at: DateTime<Utc>) -> PortResult<()> {
        sqlx::query(
            "UPDATE extracted_content_cache SET last_accessed_at = $2 WHERE content_hash = $1",
        )
        .bind(content_hash)
        .bind(accessed_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn upsert_entry(
        &self,
        content_hash: &str,
        extracted_content: &str,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO extracted_content_cache \
             (content_hash, extracted_content, created_at, modified_at, last_accessed_at) \
             VALUES ($1, $2, $3, $3, $3) \
             ON CONFLICT (content_hash) DO UPDATE SET extracted_content = EXCLUDED.extracted_content, \
             modified_at = EXCLUDED.modified_at, last_accessed_at = EXCLUDED.last_accessed_at",
        )
        .bind(content_hash)
        .bind(extracted_content)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// Presets
//=========================================================================================

#[async_trait]
impl PresetStore for PgStore {
    async fn get_preset(&self, id: Uuid) -> PortResult<Preset> {
        let record = sqlx::query_as::<_, PresetRecord>(
            "SELECT id, name, primer, instructions, example, format FROM presets WHERE id = $1",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Preset {} not found", id)),
            _ => unexpected(e),
        })?;
        record.into_domain()
    }

    async fn list_presets(&self) -> PortResult<Vec<Preset>> {
        let records = sqlx::query_as::<_, PresetRecord>(
            "SELECT id, name, primer, instructions, example, format FROM presets ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(PresetRecord::into_domain).collect()
    }
}

//=========================================================================================
// Task Progress
//=========================================================================================

#[async_trait]
impl TaskProgressStore for PgStore {
    async fn init_progress(&self, task_id: Uuid, message: &str) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO task_progress (task_id, percent, message) VALUES ($1, 0, $2) \
             ON CONFLICT (task_id) DO UPDATE SET percent = 0, message = EXCLUDED.message, \
             failed = FALSE, error_message = NULL, updated_at = NOW()",
        )
        .bind(task_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn set_progress(&self, task_id: Uuid, percent: f32, message: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE task_progress SET percent = $2, message = $3, updated_at = NOW() WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(percent)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn set_failed(&self, task_id: Uuid, message: &str) -> PortResult<()> {
        sqlx::query(
            "UPDATE task_progress SET failed = TRUE, error_message = $2, updated_at = NOW() \
             WHERE task_id = $1",
        )
        .bind(task_id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_progress(&self, task_id: Uuid) -> PortResult<TaskProgress> {
        let record = sqlx::query_as::<_, ProgressRecord>(
            "SELECT task_id, percent, message, failed, error_message, updated_at \
             FROM task_progress WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => PortError::NotFound(format!("Task {} not found", task_id)),
            _ => unexpected(e),
        })?;
        Ok(record.into_domain())
    }
}

//=========================================================================================
// Local Question Bank
//=========================================================================================

struct QuestionRow<'a> {
    category: CategoryId,
    name: &'a str,
    question_text: &'a str,
    question_type: &'a str,
    general_feedback: Option<&'a str>,
    created_by: Option<i64>,
    answers: &'a [ParsedAnswer],
    tags: &'a [String],
}

async fn insert_question(
    tx: &mut Transaction<'_, Postgres>,
    row: QuestionRow<'_>,
) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO questions (category, name, question_text, question_type, general_feedback, \
         created_by, modified_by) VALUES ($1, $2, $3, $4, $5, $6, $6) RETURNING id",
    )
    .bind(row.category)
    .bind(row.name)
    .bind(row.question_text)
    .bind(row.question_type)
    .bind(row.general_feedback)
    .bind(row.created_by)
    .fetch_one(&mut **tx)
    .await?;

    for (position, answer) in row.answers.iter().enumerate() {
        sqlx::query(
            "INSERT INTO question_answers (question_id, answer_text, fraction, feedback, sort_order) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(id)
        .bind(&answer.text)
        .bind(answer.fraction)
        .bind(answer.feedback.as_deref())
        .bind(position as i32)
        .execute(&mut **tx)
        .await?;
    }

    for tag in row.tags {
        sqlx::query(
            "INSERT INTO question_tags (question_id, tag) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(id)
        .bind(tag)
        .execute(&mut **tx)
        .await?;
    }

    Ok(id)
}

#[async_trait]
impl QuestionBank for PgStore {
    async fn existing_questions(
        &self,
        category: CategoryId,
        limit: usize,
    ) -> PortResult<Vec<ExistingQuestion>> {
        let records = sqlx::query_as::<_, ExistingQuestionRecord>(
            "SELECT name, question_text FROM questions WHERE category = $1 ORDER BY id LIMIT $2",
        )
        .bind(category)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records
            .into_iter()
            .map(|r| ExistingQuestion {
                title: r.name,
                question_text: r.question_text,
            })
            .collect())
    }
}

#[async_trait]
impl MarkupImporter for PgStore {
    async fn import_markup(
        &self,
        category: CategoryId,
        markup: &str,
        created_by: UserId,
    ) -> PortResult<bool> {
        let questions = match parse(markup, OutputFormat::StructuredMarkup) {
            Ok(questions) => questions,
            Err(e) => {
                warn!("Rejected question document for category {}: {}", category, e);
                return Ok(false);
            }
        };

        // All or nothing: a failed insert rolls back the whole document.
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        for question in &questions {
            let name = question.display_name();
            insert_question(
                &mut tx,
                QuestionRow {
                    category,
                    name: &name,
                    question_text: &question.text,
                    question_type: &question.question_type,
                    general_feedback: question.general_feedback.as_deref(),
                    created_by: Some(created_by),
                    answers: &question.answers,
                    tags: &question.tags,
                },
            )
            .await
            .map_err(unexpected)?;
        }
        tx.commit().await.map_err(unexpected)?;

        info!(
            "Imported {} question(s) into category {}.",
            questions.len(),
            category
        );
        Ok(true)
    }
}

#[async_trait]
impl QuestionCreator for PgStore {
    async fn create_question(&self, question: NewQuestion) -> PortResult<Option<CreatedQuestion>> {
        if question.name.trim().is_empty()
            || question.question_text.trim().is_empty()
            || question.answers.is_empty()
        {
            warn!("Refusing to create an incomplete question in category {}.", question.category);
            return Ok(None);
        }

        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let id = insert_question(
            &mut tx,
            QuestionRow {
                category: question.category,
                name: &question.name,
                question_text: &question.question_text,
                question_type: &question.question_type,
                general_feedback: None,
                created_by: Some(question.created_by),
                answers: &question.answers,
                tags: &question.tags,
            },
        )
        .await
        .map_err(unexpected)?;
        tx.commit().await.map_err(unexpected)?;

        Ok(Some(CreatedQuestion {
            id,
            name: question.name,
        }))
    }
}
