//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds the services every handler and
//! WebSocket connection shares.

use narra_core::{chat::ChatResponder, orchestrator::InterviewOrchestrator};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<InterviewOrchestrator>,
    pub chat: Arc<dyn ChatResponder>,
}
