//! Room and participant abstractions.
//!
//! The orchestrator only consumes these traits; signaling and media handling belong to
//! whichever transport implements them.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// A piece of transcribed participant speech.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub is_final: bool,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to room: {0}")]
    Connect(String),
    #[error("Timed out after {0:?} waiting for a {1:?} track")]
    TrackTimeout(Duration, TrackKind),
    #[error("Participant disconnected")]
    Disconnected,
    #[error("Transport error: {0}")]
    Other(String),
}

/// A live room a single participant joins.
#[async_trait]
pub trait Room: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> Result<(), TransportError>;

    async fn wait_for_participant(&self) -> Result<Arc<dyn Participant>, TransportError>;
}

/// A remote participant in a room.
#[async_trait]
pub trait Participant: Send + Sync {
    fn identity(&self) -> &str;

    /// Whether the participant currently publishes a track of `kind`.
    fn has_track(&self, kind: TrackKind) -> bool;

    /// Resolves once a track of `kind` is published, or fails after `timeout`.
    async fn wait_for_track(&self, kind: TrackKind, timeout: Duration)
    -> Result<(), TransportError>;

    /// Next finalized transcription of participant speech.
    async fn wait_for_transcription(&self) -> Result<Transcription, TransportError>;

    /// Resolves when the participant leaves. Resolves immediately if already gone.
    async fn disconnected(&self);

    /// Raw PCM16 audio frames published by the participant.
    fn subscribe_audio(&self) -> broadcast::Receiver<Bytes>;

    /// Plays a base64 PCM16 chunk of agent speech to the participant.
    async fn publish_audio(&self, chunk: String) -> Result<(), TransportError>;

    /// Publishes a transcription segment into the room. Final segments are what
    /// `wait_for_transcription` yields.
    async fn publish_transcription(&self, segment: Transcription) -> Result<(), TransportError>;
}
