//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use questiongen_core::{
    domain::{
        AttemptRecord, CategoryId, ChatMessage, ContextId, CreatedQuestion,
        ExistingQuestion, ExtractedContentCacheEntry, GenerationMode, GenerationRequest,
        NewQuestion, PageImage, PresetFields, UserId,
    },
    ports::{
        CaptioningService, ExtractionCache, GenerationError, GenerationProvider,
        GenerationRequestStore, MarkupImporter, PdfRasterizer, PortError, PortResult,
        ProgressSink, QuestionBank, QuestionCreator,
    },
    presets::{MULTICHOICE_MARKUP_EXAMPLE, MULTICHOICE_MARKUP_INSTRUCTIONS},
    OutputFormat, PipelinePorts,
};

//=========================================================================================
// Storage
//=========================================================================================

#[derive(Default)]
pub struct InMemoryStore {
    pub requests: RwLock<HashMap<Uuid, GenerationRequest>>,
    pub attempts: RwLock<Vec<AttemptRecord>>,
    pub cache: RwLock<HashMap<String, ExtractedContentCacheEntry>>,
    pub existing: RwLock<HashMap<CategoryId, Vec<ExistingQuestion>>>,
}

impl InMemoryStore {
    pub async fn insert(&self, request: GenerationRequest) -> Uuid {
        let id = request.id;
        self.requests.write().await.insert(id, request);
        id
    }

    pub async fn request(&self, id: Uuid) -> GenerationRequest {
        self.requests.read().await.get(&id).cloned().expect("request exists")
    }
}

#[async_trait]
impl GenerationRequestStore for InMemoryStore {
    async fn get_request(&self, id: Uuid) -> PortResult<GenerationRequest> {
        self.requests
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("request {}", id)))
    }

    async fn get_requests(&self, ids: &[Uuid]) -> PortResult<Vec<GenerationRequest>> {
        let requests = self.requests.read().await;
        Ok(ids.iter().filter_map(|id| requests.get(id).cloned()).collect())
    }

    async fn update_story(&self, id: Uuid, story: &str) -> PortResult<()> {
        let mut requests = self.requests.write().await;
        let request = requests
            .get_mut(&id)
            .ok_or_else(|| PortError::NotFound(format!("request {}", id)))?;
        request.story = story.to_string();
        request.mode = GenerationMode::CourseContents;
        Ok(())
    }

    async fn save_response(&self, id: Uuid, llm_response: &str) -> PortResult<()> {
        if let Some(request) = self.requests.write().await.get_mut(&id) {
            request.llm_response = Some(llm_response.to_string());
        }
        Ok(())
    }

    async fn record_attempt(&self, attempt: &AttemptRecord) -> PortResult<()> {
        if let Some(request) = self.requests.write().await.get_mut(&attempt.request_id) {
            request.tries += 1;
        }
        self.attempts.write().await.push(attempt.clone());
        Ok(())
    }

    async fn mark_finished(&self, id: Uuid, success: bool) -> PortResult<()> {
        if let Some(request) = self.requests.write().await.get_mut(&id) {
            request.success = Some(success);
        }
        Ok(())
    }
}

#[async_trait]
impl ExtractionCache for InMemoryStore {
    async fn get_entry(&self, content_hash: &str) -> PortResult<Option<ExtractedContentCacheEntry>> {
        Ok(self.cache.read().await.get(content_hash).cloned())
    }

    async fn touch_entry(&self, content_hash: &str, accessed_at: DateTime<Utc>) -> PortResult<()> {
        if let Some(entry) = self.cache.write().await.get_mut(content_hash) {
            entry.last_accessed_at = accessed_at;
        }
        Ok(())
    }

    async fn upsert_entry(
        &self,
        content_hash: &str,
        extracted_content: &str,
        at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut cache = self.cache.write().await;
        let created_at = cache.get(content_hash).map(|e| e.created_at).unwrap_or(at);
        cache.insert(
            content_hash.to_string(),
            ExtractedContentCacheEntry {
                content_hash: content_hash.to_string(),
                extracted_content: extracted_content.to_string(),
                created_at,
                modified_at: at,
                last_accessed_at: at,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl QuestionBank for InMemoryStore {
    async fn existing_questions(
        &self,
        category: CategoryId,
        limit: usize,
    ) -> PortResult<Vec<ExistingQuestion>> {
        Ok(self
            .existing
            .read()
            .await
            .get(&category)
            .map(|qs| qs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

//=========================================================================================
// Question bank
//=========================================================================================

pub struct RecordingImporter {
    pub accept: bool,
    pub markup: RwLock<Vec<(CategoryId, String)>>,
    pub questions: RwLock<Vec<NewQuestion>>,
}

impl RecordingImporter {
    pub fn accepting() -> Self {
        Self {
            accept: true,
            markup: RwLock::new(Vec::new()),
            questions: RwLock::new(Vec::new()),
        }
    }

    pub fn rejecting() -> Self {
        Self {
            accept: false,
            ..Self::accepting()
        }
    }
}

#[async_trait]
impl MarkupImporter for RecordingImporter {
    async fn import_markup(
        &self,
        category: CategoryId,
        markup: &str,
        _created_by: UserId,
    ) -> PortResult<bool> {
        self.markup
            .write()
            .await
            .push((category, markup.to_string()));
        Ok(self.accept)
    }
}

#[async_trait]
impl QuestionCreator for RecordingImporter {
    async fn create_question(&self, question: NewQuestion) -> PortResult<Option<CreatedQuestion>> {
        let mut questions = self.questions.write().await;
        let created = CreatedQuestion {
            id: questions.len() as i64 + 1,
            name: question.name.clone(),
        };
        questions.push(question);
        Ok(self.accept.then_some(created))
    }
}

//=========================================================================================
// Providers
//=========================================================================================

/// Replays scripted responses, then repeats `fallback` forever.
pub struct ScriptedProvider {
    script: RwLock<VecDeque<Result<String, GenerationError>>>,
    fallback: Result<String, GenerationError>,
    pub calls: RwLock<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub fn always(response: Result<String, GenerationError>) -> Self {
        Self::scripted(Vec::new(), response)
    }

    pub fn scripted(
        script: Vec<Result<String, GenerationError>>,
        fallback: Result<String, GenerationError>,
    ) -> Self {
        Self {
            script: RwLock::new(script.into()),
            fallback,
            calls: RwLock::new(Vec::new()),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.calls.read().await.len()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn send(
        &self,
        _context_id: ContextId,
        messages: &[ChatMessage],
    ) -> Result<String, GenerationError> {
        self.calls.write().await.push(messages.to_vec());
        match self.script.write().await.pop_front() {
            Some(next) => next,
            None => self.fallback.clone(),
        }
    }
}

#[derive(Default)]
pub struct CountingCaptioner {
    pub calls: RwLock<Vec<String>>,
}

#[async_trait]
impl CaptioningService for CountingCaptioner {
    fn accepts_mime_type(&self, mime_type: &str) -> bool {
        mime_type.starts_with("image/")
    }

    async fn caption(
        &self,
        _context_id: ContextId,
        _instruction: &str,
        data_url: &str,
    ) -> PortResult<String> {
        let mut calls = self.calls.write().await;
        calls.push(data_url.to_string());
        Ok(format!("Caption {}. ", calls.len()))
    }
}

pub struct SinglePageRasterizer;

#[async_trait]
impl PdfRasterizer for SinglePageRasterizer {
    async fn rasterize(&self, pdf: &[u8]) -> PortResult<Vec<PageImage>> {
        Ok(vec![PageImage {
            mime_type: "image/png".to_string(),
            content: pdf.to_vec(),
        }])
    }
}

//=========================================================================================
// Progress
//=========================================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Update(u32, u32, String),
    Full(f32, String),
    Error(String),
}

#[derive(Default)]
pub struct RecordingProgress {
    pub events: RwLock<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub async fn errors(&self) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::Error(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn update(&self, current: u32, total: u32, message: &str) -> PortResult<()> {
        self.events
            .write()
            .await
            .push(ProgressEvent::Update(current, total, message.to_string()));
        Ok(())
    }

    async fn update_full(&self, percent: f32, message: &str) -> PortResult<()> {
        self.events
            .write()
            .await
            .push(ProgressEvent::Full(percent, message.to_string()));
        Ok(())
    }

    async fn error(&self, message: &str) -> PortResult<()> {
        self.events
            .write()
            .await
            .push(ProgressEvent::Error(message.to_string()));
        Ok(())
    }
}

//=========================================================================================
// Fixtures
//=========================================================================================

pub const PRIMER: &str = "You are a helpful assistant that writes quiz questions.";

pub fn markup_preset() -> PresetFields {
    PresetFields {
        primer: PRIMER.to_string(),
        instructions: MULTICHOICE_MARKUP_INSTRUCTIONS.to_string(),
        example: MULTICHOICE_MARKUP_EXAMPLE.to_string(),
        format: OutputFormat::StructuredMarkup,
    }
}

pub fn request(category: CategoryId, story: &str, preset: PresetFields) -> GenerationRequest {
    let now = Utc::now();
    GenerationRequest {
        id: Uuid::new_v4(),
        category,
        story: story.to_string(),
        preset,
        mode: GenerationMode::Topic,
        num_of_questions: 1,
        tries: 0,
        llm_response: None,
        success: None,
        add_identifier: true,
        created_by: 2,
        created_at: now,
        modified_at: now,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub importer: Arc<RecordingImporter>,
    pub provider: Arc<ScriptedProvider>,
    pub captioner: Arc<CountingCaptioner>,
}

impl Harness {
    pub fn new(importer: RecordingImporter, provider: ScriptedProvider) -> Self {
        Self {
            store: Arc::new(InMemoryStore::default()),
            importer: Arc::new(importer),
            provider: Arc::new(provider),
            captioner: Arc::new(CountingCaptioner::default()),
        }
    }

    pub fn ports(&self) -> PipelinePorts {
        PipelinePorts {
            requests: self.store.clone(),
            question_bank: self.store.clone(),
            provider: self.provider.clone(),
            markup_importer: self.importer.clone(),
            question_creator: self.importer.clone(),
            extraction_cache: self.store.clone(),
            captioner: self.captioner.clone(),
            rasterizer: Arc::new(SinglePageRasterizer),
        }
    }
}
