//! crates/questiongen_core/src/domain.rs
//!
//! Defines the pure, core data structures of the question generation pipeline.
//! These structs are independent of any database, transport or host framework.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Identifier of a question bank category in the host system.
pub type CategoryId = i64;
/// Identifier of the host context a batch runs in (used by the broker for quota accounting).
pub type ContextId = i64;
/// Identifier of a host user.
pub type UserId = i64;

//=========================================================================================
// Presets and Output Formats
//=========================================================================================

/// The response format a preset asks the model to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// A full `<quiz>` markup document holding one or more questions.
    StructuredMarkup,
    /// A single answer-tagged line describing one multiple-choice question.
    FlatTag,
}

impl OutputFormat {
    /// The tag stored alongside presets and requests.
    pub fn as_tag(&self) -> &'static str {
        match self {
            OutputFormat::StructuredMarkup => "moodlexml",
            OutputFormat::FlatTag => "gift",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "moodlexml" | "xml" => Some(OutputFormat::StructuredMarkup),
            "gift" => Some(OutputFormat::FlatTag),
            _ => None,
        }
    }
}

/// A reusable template used to seed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: Uuid,
    pub name: String,
    pub primer: String,
    pub instructions: String,
    pub example: String,
    pub format: OutputFormat,
}

impl Preset {
    /// The preset fields that get copied onto every generation request.
    pub fn fields(&self) -> PresetFields {
        PresetFields {
            primer: self.primer.clone(),
            instructions: self.instructions.clone(),
            example: self.example.clone(),
            format: self.format,
        }
    }
}

/// Snapshot of a preset as stored on a request. Users may edit the preset
/// before submitting, so requests never point back at the preset row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetFields {
    pub primer: String,
    pub instructions: String,
    pub example: String,
    pub format: OutputFormat,
}

/// How the story of a request was obtained, which changes the final prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// A topic was typed in; the model may use its own knowledge.
    #[default]
    Topic,
    /// The story was extracted from course materials; the model must stick to it.
    CourseContents,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Topic => "topic",
            GenerationMode::CourseContents => "course_contents",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value {
            "topic" => Some(GenerationMode::Topic),
            "course_contents" => Some(GenerationMode::CourseContents),
            _ => None,
        }
    }
}

//=========================================================================================
// Generation Requests
//=========================================================================================

/// One requested question. Created by the form collaborator, mutated only by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub id: Uuid,
    pub category: CategoryId,
    pub story: String,
    pub preset: PresetFields,
    pub mode: GenerationMode,
    pub num_of_questions: u32,
    pub tries: u32,
    pub llm_response: Option<String>,
    pub success: Option<bool>,
    pub add_identifier: bool,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Lifecycle of a request as observed from the outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Generating,
    Succeeded,
    Failed,
}

impl GenerationRequest {
    pub fn state(&self) -> RequestState {
        match self.success {
            Some(true) => RequestState::Succeeded,
            Some(false) => RequestState::Failed,
            None if self.tries == 0 => RequestState::Pending,
            None => RequestState::Generating,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.success.is_some()
    }
}

/// What happened during a single generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The response parsed and the import collaborator accepted it.
    Imported,
    /// The response could not be parsed or the import collaborator rejected it.
    NotImported,
    /// The provider reported an error; the batch was aborted.
    ProviderFailed { message: String },
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Imported => "imported",
            AttemptOutcome::NotImported => "not_imported",
            AttemptOutcome::ProviderFailed { .. } => "provider_failed",
        }
    }
}

/// Immutable record of one attempt. Persisted once the attempt has finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub request_id: Uuid,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub recorded_at: DateTime<Utc>,
}

/// Custom data handed to the background task by the queue collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub request_ids: Vec<Uuid>,
    pub context_id: ContextId,
    #[serde(default)]
    pub send_existing_questions_as_context: bool,
    #[serde(default)]
    pub course_items: Vec<ContentItem>,
}

//=========================================================================================
// Course Content
//=========================================================================================

/// A file attached to a course resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFile {
    pub file_name: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

impl StoredFile {
    /// SHA-256 of the file bytes as lowercase hex.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.content);
        format!("{:x}", hasher.finalize())
    }
}

/// A course activity selected as source material.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Page { id: i64, html: String },
    Label { id: i64, html: String },
    Resource { id: i64, file: StoredFile },
    Unsupported { id: i64, kind: String },
}

impl ContentItem {
    pub fn id(&self) -> i64 {
        match self {
            ContentItem::Page { id, .. }
            | ContentItem::Label { id, .. }
            | ContentItem::Resource { id, .. }
            | ContentItem::Unsupported { id, .. } => *id,
        }
    }
}

/// Cached text extracted from an image or PDF, keyed by the file's content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContentCacheEntry {
    pub content_hash: String,
    pub extracted_content: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// A page of a PDF rendered to an image.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    pub mime_type: String,
    pub content: Vec<u8>,
}

//=========================================================================================
// Prompts
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

/// One message of the prompt sent to a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            name: None,
            content: content.into(),
        }
    }

    pub fn named_system(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            name: Some(name.into()),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            name: None,
            content: content.into(),
        }
    }
}

/// Title and plain-text body of a question already in the destination category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExistingQuestion {
    pub title: String,
    pub question_text: String,
}

//=========================================================================================
// Parsed Questions
//=========================================================================================

/// One answer option. `fraction` is the grade percentage (100 = fully correct).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAnswer {
    pub text: String,
    pub fraction: f64,
    pub feedback: Option<String>,
}

impl ParsedAnswer {
    pub fn is_correct(&self) -> bool {
        self.fraction >= 100.0
    }
}

/// Bookkeeping stamped onto a question before it is handed to the question bank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetadata {
    pub category: Option<CategoryId>,
    pub created_by: Option<UserId>,
    pub identifier_prefix: Option<String>,
    pub identifier_tag: Option<String>,
}

/// Transient result of parsing model output. Never persisted by the core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    pub name: Option<String>,
    pub question_type: String,
    pub text: String,
    pub general_feedback: Option<String>,
    pub answers: Vec<ParsedAnswer>,
    pub tags: Vec<String>,
    pub metadata: QuestionMetadata,
}

impl ParsedQuestion {
    pub fn correct_answer_count(&self) -> usize {
        self.answers.iter().filter(|a| a.is_correct()).count()
    }

    /// The name shown in the question bank, with the identifying prefix applied.
    pub fn display_name(&self) -> String {
        let name = self.name.clone().unwrap_or_else(|| self.text.clone());
        match &self.metadata.identifier_prefix {
            Some(prefix) => format!("{}{}", prefix, name),
            None => name,
        }
    }
}

/// A fully populated flat question handed to the question-creation collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQuestion {
    pub category: CategoryId,
    pub name: String,
    pub question_text: String,
    pub question_type: String,
    pub answers: Vec<ParsedAnswer>,
    pub tags: Vec<String>,
    pub created_by: UserId,
    pub modified_by: UserId,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// The row the question-creation collaborator created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedQuestion {
    pub id: i64,
    pub name: String,
}
