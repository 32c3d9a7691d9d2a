//! Axum Handlers for the REST API
//!
//! Progress lookups for participants, the transcript log, and the single-shot text chat
//! fallback.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use narra_core::transcript::TranscriptRecord;
use std::sync::Arc;
use tracing::{error, instrument};

use crate::{
    models::{ChatPayload, ChatResponse, ErrorResponse, ProgressResponse},
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// Interview progress for a participant. Unknown identities have asked nothing yet.
#[instrument(skip(state))]
pub async fn get_progress(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let progress = state.orchestrator.progress_for(&identity).await;
    let remaining = state.orchestrator.bank().remaining(&progress.asked_questions);
    Ok(Json(ProgressResponse::new(identity, progress, remaining)))
}

/// Logged participant utterances, newest first.
pub async fn list_transcripts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<TranscriptRecord>>, ApiError> {
    let log = state
        .orchestrator
        .transcripts()
        .ok_or_else(|| ApiError::NotFound("Transcript logging is not configured".to_string()))?;
    Ok(Json(log.list().await?))
}

/// Answers one typed message.
pub async fn process_chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatPayload>,
) -> Result<Json<ChatResponse>, ApiError> {
    let message = payload
        .message
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("No message provided".to_string()))?;

    let response = state.chat.respond(&message).await?;
    Ok(Json(ChatResponse { response }))
}
