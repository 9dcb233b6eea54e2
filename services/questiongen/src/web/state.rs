//! services/questiongen/src/web/state.rs
//!
//! Defines the application state shared by every HTTP handler.

use std::sync::Arc;

use questiongen_core::ports::PresetStore;

use crate::tasks::{BatchRunner, RequestQueue, TaskProgressStore};

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub presets: Arc<dyn PresetStore>,
    pub requests: Arc<dyn RequestQueue>,
    pub progress: Arc<dyn TaskProgressStore>,
    pub runner: Arc<dyn BatchRunner>,
}
