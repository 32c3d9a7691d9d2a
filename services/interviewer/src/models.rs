//! HTTP request and response bodies.

use narra_core::progress::ParticipantProgress;
use serde::{Deserialize, Serialize};

/// Interview progress for one participant.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProgressResponse {
    pub identity: String,
    pub asked_questions: Vec<String>,
    /// Questions not yet asked, in interview order.
    pub remaining_questions: Vec<String>,
}

impl ProgressResponse {
    pub fn new(
        identity: impl Into<String>,
        progress: ParticipantProgress,
        remaining_questions: Vec<String>,
    ) -> Self {
        Self {
            identity: identity.into(),
            asked_questions: progress.asked_questions.into_iter().collect(),
            remaining_questions,
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct ChatPayload {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
}
