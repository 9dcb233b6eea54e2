//! services/questiongen/src/tasks.rs
//!
//! The task runner the generation batches live in: a place to queue requests,
//! a progress record per task, and the spawned background job itself.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use questiongen_core::{
    domain::{BatchPayload, GenerationRequest},
    ports::{PortResult, ProgressSink},
    GenerationOrchestrator,
};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

pub const WAITING_MESSAGE: &str = "Waiting for task start.";

/// Progress of a queued batch as seen by the user who started it.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TaskProgress {
    pub task_id: Uuid,
    pub percent: f32,
    pub message: String,
    pub failed: bool,
    /// User-facing error. Never carries provider debug output.
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait TaskProgressStore: Send + Sync {
    async fn init_progress(&self, task_id: Uuid, message: &str) -> PortResult<()>;

    async fn set_progress(&self, task_id: Uuid, percent: f32, message: &str) -> PortResult<()>;

    async fn set_failed(&self, task_id: Uuid, message: &str) -> PortResult<()>;

    async fn get_progress(&self, task_id: Uuid) -> PortResult<TaskProgress>;
}

#[async_trait]
pub trait RequestQueue: Send + Sync {
    /// Stores freshly created requests under `task_id`.
    async fn create_requests(&self, task_id: Uuid, requests: &[GenerationRequest]) -> PortResult<()>;
}

//=========================================================================================
// Progress reporting
//=========================================================================================

/// The `ProgressSink` handed to the orchestrator for one task.
pub struct ProgressReporter {
    task_id: Uuid,
    store: Arc<dyn TaskProgressStore>,
}

impl ProgressReporter {
    pub fn new(task_id: Uuid, store: Arc<dyn TaskProgressStore>) -> Self {
        Self { task_id, store }
    }
}

#[async_trait]
impl ProgressSink for ProgressReporter {
    async fn update(&self, current: u32, total: u32, message: &str) -> PortResult<()> {
        let percent = if total == 0 {
            0.0
        } else {
            (current.min(total) as f32 / total as f32) * 100.0
        };
        self.store.set_progress(self.task_id, percent, message).await
    }

    async fn update_full(&self, percent: f32, message: &str) -> PortResult<()> {
        self.store
            .set_progress(self.task_id, percent.clamp(0.0, 100.0), message)
            .await
    }

    async fn error(&self, message: &str) -> PortResult<()> {
        self.store.set_failed(self.task_id, message).await
    }
}

//=========================================================================================
// Background job
//=========================================================================================

/// Runs one batch on the tokio runtime. The job is never re-queued: whatever
/// happens ends up in the task's progress record.
pub fn spawn_batch(
    orchestrator: Arc<GenerationOrchestrator>,
    progress_store: Arc<dyn TaskProgressStore>,
    task_id: Uuid,
    payload: BatchPayload,
) -> JoinHandle<()> {
    let span = tracing::info_span!("generation_task", %task_id);
    tokio::spawn(
        async move {
            info!("Starting generation task for {} request(s).", payload.request_ids.len());
            let reporter = ProgressReporter::new(task_id, progress_store);
            let report = orchestrator.run(&payload, &reporter).await;
            info!(
                "Generation task done: {} succeeded, {} failed.",
                report.succeeded, report.failed
            );
        }
        .instrument(span),
    )
}

/// Starts queued batches. The web layer only sees this seam.
pub trait BatchRunner: Send + Sync {
    fn launch(&self, task_id: Uuid, payload: BatchPayload);
}

/// The production runner: one tokio task per batch.
pub struct TaskRunner {
    orchestrator: Arc<GenerationOrchestrator>,
    progress_store: Arc<dyn TaskProgressStore>,
}

impl TaskRunner {
    pub fn new(
        orchestrator: Arc<GenerationOrchestrator>,
        progress_store: Arc<dyn TaskProgressStore>,
    ) -> Self {
        Self {
            orchestrator,
            progress_store,
        }
    }
}

impl BatchRunner for TaskRunner {
    fn launch(&self, task_id: Uuid, payload: BatchPayload) {
        spawn_batch(
            self.orchestrator.clone(),
            self.progress_store.clone(),
            task_id,
            payload,
        );
    }
}
