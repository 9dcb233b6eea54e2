//! crates/questiongen_core/src/ports.rs
//!
//! Defines the service contracts (traits) the generation pipeline consumes.
//! These traits form the boundary of the hexagonal architecture: storage, the
//! question bank, the task runner and the AI providers all live behind them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AttemptRecord, CategoryId, ChatMessage, ContextId, CreatedQuestion,
    ExtractedContentCacheEntry, ExistingQuestion, GenerationRequest, NewQuestion, PageImage,
    Preset, UserId,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Errors reported by a generation provider.
///
/// `Provider` carries a message meant for end users and a debug detail that must
/// only ever reach the logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("The AI provider returned code {code}: {message}")]
    Provider {
        code: u16,
        message: String,
        debug_info: Option<String>,
    },
    #[error("The AI provider could not be reached: {0}")]
    Transport(String),
}

impl GenerationError {
    /// The text that may be shown to the user who started the batch.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Provider { message, .. } => message.clone(),
            GenerationError::Transport(reason) => reason.clone(),
        }
    }

    pub fn debug_info(&self) -> Option<&str> {
        match self {
            GenerationError::Provider { debug_info, .. } => debug_info.as_deref(),
            GenerationError::Transport(_) => None,
        }
    }
}

//=========================================================================================
// Storage Ports (Traits)
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationRequestStore: Send + Sync {
    async fn get_request(&self, id: Uuid) -> PortResult<GenerationRequest>;

    /// Returns the requests that exist among `ids`, in no particular order.
    async fn get_requests(&self, ids: &[Uuid]) -> PortResult<Vec<GenerationRequest>>;

    async fn update_story(&self, id: Uuid, story: &str) -> PortResult<()>;

    /// Stores the raw text of the latest model response.
    async fn save_response(&self, id: Uuid, llm_response: &str) -> PortResult<()>;

    /// Persists a finished attempt and bumps the request's retry counter.
    async fn record_attempt(&self, attempt: &AttemptRecord) -> PortResult<()>;

    /// Writes the terminal success flag of a request.
    async fn mark_finished(&self, id: Uuid, success: bool) -> PortResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExtractionCache: Send + Sync {
    async fn get_entry(&self, content_hash: &str) -> PortResult<Option<ExtractedContentCacheEntry>>;

    async fn touch_entry(&self, content_hash: &str, accessed_at: DateTime<Utc>) -> PortResult<()>;

    /// Inserts or replaces the cached text for `content_hash`. Last writer wins.
    async fn upsert_entry(
        &self,
        content_hash: &str,
        extracted_content: &str,
        at: DateTime<Utc>,
    ) -> PortResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PresetStore: Send + Sync {
    async fn get_preset(&self, id: Uuid) -> PortResult<Preset>;

    async fn list_presets(&self) -> PortResult<Vec<Preset>>;
}

//=========================================================================================
// Question Bank Ports
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Titles and plain-text bodies of at most `limit` questions in `category`.
    async fn existing_questions(
        &self,
        category: CategoryId,
        limit: usize,
    ) -> PortResult<Vec<ExistingQuestion>>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarkupImporter: Send + Sync {
    /// Imports a markup document into `category` on behalf of `created_by`.
    ///
    /// Returns `Ok(false)` when the document was rejected and an error when the
    /// importer itself is unusable.
    async fn import_markup(
        &self,
        category: CategoryId,
        markup: &str,
        created_by: UserId,
    ) -> PortResult<bool>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuestionCreator: Send + Sync {
    /// Returns `None` when the question fails validation.
    async fn create_question(&self, question: NewQuestion) -> PortResult<Option<CreatedQuestion>>;
}

//=========================================================================================
// Task Runner Ports
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn update(&self, current: u32, total: u32, message: &str) -> PortResult<()>;

    async fn update_full(&self, percent: f32, message: &str) -> PortResult<()>;

    /// Marks the task as failed with a message meant for the user.
    async fn error(&self, message: &str) -> PortResult<()>;
}

//=========================================================================================
// AI Provider Ports
//=========================================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Sends the prompt and returns the raw text produced by the model.
    async fn send(
        &self,
        context_id: ContextId,
        messages: &[ChatMessage],
    ) -> Result<String, GenerationError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CaptioningService: Send + Sync {
    /// Whether the service accepts files of this MIME type directly.
    fn accepts_mime_type(&self, mime_type: &str) -> bool;

    /// Runs an image-to-text request on a base64 data URL.
    async fn caption(
        &self,
        context_id: ContextId,
        instruction: &str,
        data_url: &str,
    ) -> PortResult<String>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PdfRasterizer: Send + Sync {
    /// Renders every page of the PDF to an image, in page order.
    async fn rasterize(&self, pdf: &[u8]) -> PortResult<Vec<PageImage>>;
}
