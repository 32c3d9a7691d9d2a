//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application: the REST API and
//! the WebSocket endpoint participants join interviews through.

use crate::{handlers, state::AppState, ws::ws_handler};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/participants/{identity}/progress",
            get(handlers::get_progress),
        )
        .route("/transcripts", get(handlers::list_transcripts))
        .route("/process_chat", post(handlers::process_chat))
        .route("/ws", get(ws_handler))
        .with_state(app_state)
}
