//! Conversational Model Integration
//!
//! The conversational model is opaque: it hears the participant, speaks, and decides when
//! the conversation is over. This module defines the seam the coordinator drives it
//! through, plus the [`SessionControl`] handle the model integration reports back on.

use crate::{session::ModelOptions, transport::Participant};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

pub const RECORD_QUESTION_TOOL: &str = "record_question_asked";
pub const END_INTERVIEW_TOOL: &str = "end_interview";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("Failed to start model session: {0}")]
    Start(String),
    #[error("Model session closed")]
    Closed,
    #[error("Model error: {0}")]
    Other(String),
}

/// Factory for live model sessions.
#[async_trait]
pub trait ConversationalModel: Send + Sync {
    /// Attaches a new model session to `participant`.
    async fn start(
        &self,
        options: ModelOptions,
        participant: Arc<dyn Participant>,
        control: SessionControl,
    ) -> Result<Box<dyn ModelSession>, ModelError>;
}

/// A running model session.
#[async_trait]
pub trait ModelSession: Send + Sync {
    /// Asks the model to produce its next reply. Returns once the request is dispatched,
    /// not when playback finishes.
    async fn generate_reply(&mut self) -> Result<(), ModelError>;

    /// Resolves once the session can no longer hear or answer the participant, for
    /// example because its connection to the model dropped.
    async fn closed(&self);

    async fn close(&mut self);
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("'{0}' is not one of this session's remaining questions")]
pub struct UnknownQuestion(pub String);

struct ControlInner {
    identity: String,
    remaining: Vec<String>,
    presented: watch::Sender<BTreeSet<String>>,
    ended: watch::Sender<bool>,
}

/// Handle shared between the turn coordinator and the model integration.
///
/// The model integration reports each question it puts to the participant and signals
/// when it judges the conversation closed.
#[derive(Clone)]
pub struct SessionControl {
    inner: Arc<ControlInner>,
}

impl SessionControl {
    pub fn new(identity: impl Into<String>, remaining: Vec<String>) -> Self {
        let (presented, _) = watch::channel(BTreeSet::new());
        let (ended, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                identity: identity.into(),
                remaining,
                presented,
                ended,
            }),
        }
    }

    pub fn identity(&self) -> &str {
        &self.inner.identity
    }

    pub fn remaining(&self) -> &[String] {
        &self.inner.remaining
    }

    /// Records that `question` was put to the participant. Returns `Ok(false)` when it
    /// was already recorded.
    pub fn mark_presented(&self, question: &str) -> Result<bool, UnknownQuestion> {
        if !self.inner.remaining.iter().any(|q| q == question) {
            return Err(UnknownQuestion(question.to_string()));
        }
        Ok(self
            .inner
            .presented
            .send_if_modified(|set| set.insert(question.to_string())))
    }

    /// Marks every remaining question at once.
    pub fn mark_all_presented(&self) {
        let remaining = self.inner.remaining.clone();
        self.inner.presented.send_modify(|set| set.extend(remaining));
    }

    /// Presented questions, in interview order.
    pub fn presented(&self) -> Vec<String> {
        let presented = self.inner.presented.borrow();
        self.inner
            .remaining
            .iter()
            .filter(|q| presented.contains(q.as_str()))
            .cloned()
            .collect()
    }

    /// Requests the end of the session.
    pub fn end_session(&self) {
        self.inner.ended.send_replace(true);
    }

    /// Resolves once [`SessionControl::end_session`] has been called.
    pub async fn ended(&self) {
        let mut rx = self.inner.ended.subscribe();
        let _ = rx.wait_for(|ended| *ended).await;
    }
}

/// Arguments of the `record_question_asked` tool.
#[derive(Deserialize, JsonSchema, Debug)]
pub struct RecordQuestionArgs {
    /// The exact text of the interview question that was just asked.
    #[schemars(description = "The exact text of the interview question you just asked")]
    pub question: String,
}

/// A function tool offered to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: serde_json::Value,
}

/// The tools the model uses to report progress and close the interview.
pub fn interview_tools() -> Vec<ToolSpec> {
    let mut record_params = schemars::schema_for!(RecordQuestionArgs).to_value();
    if let Some(obj) = record_params.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }

    vec![
        ToolSpec {
            name: RECORD_QUESTION_TOOL,
            description: "Record that one of the interview questions was just asked to the user.",
            parameters: record_params,
        },
        ToolSpec {
            name: END_INTERVIEW_TOOL,
            description: "End the interview once the user indicates the conversation is over.",
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        },
    ]
}

/// Applies a tool call from the model to the session, returning the tool output.
pub fn handle_tool_call(
    control: &SessionControl,
    name: &str,
    arguments: &str,
) -> Result<String, String> {
    match name {
        RECORD_QUESTION_TOOL => {
            let args: RecordQuestionArgs = serde_json::from_str(arguments)
                .map_err(|e| format!("Invalid arguments for '{}': {}", name, e))?;
            match control.mark_presented(&args.question) {
                Ok(true) => {
                    info!(identity = %control.identity(), question = %args.question, "Question recorded as asked");
                    Ok("OK. Question recorded.".to_string())
                }
                Ok(false) => Ok("OK. Question was already recorded.".to_string()),
                Err(e) => {
                    warn!(identity = %control.identity(), error = %e, "Model reported an unknown question");
                    Err(e.to_string())
                }
            }
        }
        END_INTERVIEW_TOOL => {
            info!(identity = %control.identity(), "Model concluded the interview");
            control.end_session();
            Ok("OK. Interview will be concluded.".to_string())
        }
        _ => Err(format!("Unknown tool: '{}'", name)),
    }
}
