//! services/questiongen/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::tasks::{TaskProgress, WAITING_MESSAGE};
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::Utc;
use questiongen_core::{
    domain::{
        BatchPayload, CategoryId, ContentItem, ContextId, GenerationMode, GenerationRequest,
        Preset, StoredFile, UserId,
    },
    ports::PortError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Upper bound on the questions one submission may ask for.
pub const MAX_QUESTIONS_PER_BATCH: u32 = 10;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        create_generation_handler,
        get_generation_handler,
        list_presets_handler,
    ),
    components(
        schemas(
            CreateGenerationPayload,
            CourseItemPayload,
            CreateGenerationResponse,
            PresetResponse,
            TaskProgress
        )
    ),
    tags(
        (name = "Question Generation API", description = "Queue AI question generation and follow its progress.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

fn default_add_identifier() -> bool {
    true
}

fn default_num_of_questions() -> u32 {
    4
}

/// A course activity chosen as source material.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CourseItemPayload {
    pub id: i64,
    /// `page`, `label` or `resource`. Anything else is skipped during extraction.
    pub kind: String,
    /// Body of a page or label.
    pub html: Option<String>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    /// Base64 encoded file bytes of a resource.
    pub data: Option<String>,
}

impl CourseItemPayload {
    fn into_domain(self) -> Result<ContentItem, String> {
        let item = match self.kind.as_str() {
            "page" => ContentItem::Page {
                id: self.id,
                html: self.html.unwrap_or_default(),
            },
            "label" => ContentItem::Label {
                id: self.id,
                html: self.html.unwrap_or_default(),
            },
            "resource" => {
                let data = self
                    .data
                    .ok_or_else(|| format!("Course item {} has no file data", self.id))?;
                let content = BASE64
                    .decode(data.trim())
                    .map_err(|e| format!("Course item {} is not valid base64: {}", self.id, e))?;
                ContentItem::Resource {
                    id: self.id,
                    file: StoredFile {
                        file_name: self.file_name.unwrap_or_else(|| format!("resource-{}", self.id)),
                        mime_type: self
                            .mime_type
                            .unwrap_or_else(|| "application/octet-stream".to_string()),
                        content,
                    },
                }
            }
            _ => ContentItem::Unsupported {
                id: self.id,
                kind: self.kind,
            },
        };
        Ok(item)
    }
}

/// The form submission that queues one batch.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateGenerationPayload {
    pub category: CategoryId,
    pub context_id: ContextId,
    pub created_by: UserId,
    pub preset_id: Uuid,
    /// Free-text topic. May be empty when course items are given.
    #[serde(default)]
    pub topic: String,
    #[serde(default = "default_num_of_questions")]
    pub num_of_questions: u32,
    /// Edited preset fields. Missing fields fall back to the stored preset.
    pub primer: Option<String>,
    pub instructions: Option<String>,
    pub example: Option<String>,
    #[serde(default = "default_add_identifier")]
    pub add_identifier: bool,
    #[serde(default)]
    pub send_existing_questions_as_context: bool,
    #[serde(default)]
    pub course_items: Vec<CourseItemPayload>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateGenerationResponse {
    pub task_id: Uuid,
    pub request_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PresetResponse {
    pub id: Uuid,
    pub name: String,
    pub primer: String,
    pub instructions: String,
    pub example: String,
    /// `moodlexml` or `gift`.
    pub format: String,
}

impl From<Preset> for PresetResponse {
    fn from(preset: Preset) -> Self {
        Self {
            id: preset.id,
            name: preset.name,
            primer: preset.primer,
            instructions: preset.instructions,
            example: preset.example,
            format: preset.format.as_tag().to_string(),
        }
    }
}

fn internal_error(context: &str, e: PortError) -> (StatusCode, String) {
    error!("{}: {:?}", context, e);
    (StatusCode::INTERNAL_SERVER_ERROR, context.to_string())
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Queue a batch of question generation requests.
///
/// One request is stored per question. The batch runs in the background; poll
/// `GET /generations/{task_id}` for its progress.
#[utoipa::path(
    post,
    path = "/generations",
    request_body = CreateGenerationPayload,
    responses(
        (status = 202, description = "Batch queued", body = CreateGenerationResponse),
        (status = 400, description = "Invalid submission"),
        (status = 404, description = "Unknown preset"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_generation_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<CreateGenerationPayload>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if payload.num_of_questions == 0 || payload.num_of_questions > MAX_QUESTIONS_PER_BATCH {
        return Err((
            StatusCode::BAD_REQUEST,
            format!(
                "num_of_questions must be between 1 and {}",
                MAX_QUESTIONS_PER_BATCH
            ),
        ));
    }
    if payload.topic.trim().is_empty() && payload.course_items.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Either a topic or course items are required".to_string(),
        ));
    }

    let course_items = payload
        .course_items
        .into_iter()
        .map(CourseItemPayload::into_domain)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|message| (StatusCode::BAD_REQUEST, message))?;

    let preset = app_state
        .presets
        .get_preset(payload.preset_id)
        .await
        .map_err(|e| match e {
            PortError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            other => internal_error("Failed to load preset", other),
        })?;

    let mut fields = preset.fields();
    if let Some(primer) = payload.primer {
        fields.primer = primer;
    }
    if let Some(instructions) = payload.instructions {
        fields.instructions = instructions;
    }
    if let Some(example) = payload.example {
        fields.example = example;
    }

    let now = Utc::now();
    let requests: Vec<GenerationRequest> = (0..payload.num_of_questions)
        .map(|_| GenerationRequest {
            id: Uuid::new_v4(),
            category: payload.category,
            story: payload.topic.clone(),
            preset: fields.clone(),
            mode: GenerationMode::Topic,
            num_of_questions: payload.num_of_questions,
            tries: 0,
            llm_response: None,
            success: None,
            add_identifier: payload.add_identifier,
            created_by: payload.created_by,
            created_at: now,
            modified_at: now,
        })
        .collect();
    let request_ids: Vec<Uuid> = requests.iter().map(|r| r.id).collect();

    let task_id = Uuid::new_v4();
    app_state
        .requests
        .create_requests(task_id, &requests)
        .await
        .map_err(|e| internal_error("Failed to store generation requests", e))?;
    app_state
        .progress
        .init_progress(task_id, WAITING_MESSAGE)
        .await
        .map_err(|e| internal_error("Failed to create task progress", e))?;

    app_state.runner.launch(
        task_id,
        BatchPayload {
            request_ids: request_ids.clone(),
            context_id: payload.context_id,
            send_existing_questions_as_context: payload.send_existing_questions_as_context,
            course_items,
        },
    );
    info!("Queued task {} with {} request(s).", task_id, request_ids.len());

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateGenerationResponse {
            task_id,
            request_ids,
        }),
    ))
}

/// Get the progress of a queued batch.
#[utoipa::path(
    get,
    path = "/generations/{task_id}",
    responses(
        (status = 200, description = "Current progress", body = TaskProgress),
        (status = 404, description = "Unknown task"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("task_id" = Uuid, Path, description = "The task returned when the batch was queued.")
    )
)]
pub async fn get_generation_handler(
    State(app_state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
) -> Result<Json<TaskProgress>, (StatusCode, String)> {
    app_state
        .progress
        .get_progress(task_id)
        .await
        .map(Json)
        .map_err(|e| match e {
            PortError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            other => internal_error("Failed to load task progress", other),
        })
}

/// List the available presets.
#[utoipa::path(
    get,
    path = "/presets",
    responses(
        (status = 200, description = "All presets", body = [PresetResponse]),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_presets_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<PresetResponse>>, (StatusCode, String)> {
    let presets = app_state
        .presets
        .list_presets()
        .await
        .map_err(|e| internal_error("Failed to list presets", e))?;
    Ok(Json(presets.into_iter().map(PresetResponse::from).collect()))
}
