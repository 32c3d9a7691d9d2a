//! Defines the WebSocket message protocol between a participant's client and the server.

use narra_core::{orchestrator::JoinOutcome, transport::TrackKind};
use serde::{Deserialize, Serialize};

/// Messages sent from the client to the server. Binary frames carry microphone audio.
#[derive(Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Enters the room. This must come before anything else.
    Join { identity: String },
    PublishTrack { kind: TrackKind },
    UnpublishTrack { kind: TrackKind },
    Leave,
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the join and names the room.
    Joined { room: String },
    /// Transcribed participant speech.
    Transcription { text: String, is_final: bool },
    /// A chunk of agent speech (base64 encoded PCM16, 24 kHz mono).
    AudioChunk { data: String },
    /// The interview is over; the connection closes after this.
    SessionEnded { reason: String },
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// The final message for a finished job.
    pub fn session_ended(outcome: &JoinOutcome) -> Self {
        let reason = match outcome {
            JoinOutcome::AlreadyActive => "already_active",
            JoinOutcome::Completed => "completed",
            JoinOutcome::Interviewed { outcome, .. } => outcome.end_reason.as_str(),
            JoinOutcome::Failed(_) => "failed",
        };
        ServerMessage::SessionEnded {
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narra_core::coordinator::{EndReason, TurnOutcome, TurnState};
    use serde_json::json;

    #[test]
    fn test_client_message_deserialization() {
        let join: ClientMessage =
            serde_json::from_str(r#"{"type": "join", "identity": "alice"}"#).unwrap();
        assert_eq!(
            join,
            ClientMessage::Join {
                identity: "alice".to_string()
            }
        );

        let publish: ClientMessage =
            serde_json::from_str(r#"{"type": "publish_track", "kind": "audio"}"#).unwrap();
        assert_eq!(
            publish,
            ClientMessage::PublishTrack {
                kind: TrackKind::Audio
            }
        );

        let leave: ClientMessage = serde_json::from_str(r#"{"type": "leave"}"#).unwrap();
        assert_eq!(leave, ClientMessage::Leave);
    }

    #[test]
    fn test_client_message_rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "dance"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type": "join"}"#).is_err());
    }

    #[test]
    fn test_server_message_serialization() {
        let msg = ServerMessage::Transcription {
            text: "hello".to_string(),
            is_final: true,
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "transcription", "text": "hello", "is_final": true})
        );

        let msg = ServerMessage::AudioChunk {
            data: "AAAA".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"type": "audio_chunk", "data": "AAAA"})
        );
    }

    #[test]
    fn test_session_ended_reason() {
        let interviewed = JoinOutcome::Interviewed {
            outcome: TurnOutcome {
                history: vec![TurnState::Idle, TurnState::Ended],
                end_reason: EndReason::Disconnected,
                turns: 0,
                presented: vec![],
            },
            recorded: 0,
        };

        assert_eq!(
            serde_json::to_value(ServerMessage::session_ended(&interviewed)).unwrap(),
            json!({"type": "session_ended", "reason": "disconnected"})
        );
        assert_eq!(
            ServerMessage::session_ended(&JoinOutcome::Completed),
            ServerMessage::SessionEnded {
                reason: "completed".to_string()
            }
        );
        assert_eq!(
            ServerMessage::session_ended(&JoinOutcome::AlreadyActive),
            ServerMessage::SessionEnded {
                reason: "already_active".to_string()
            }
        );
    }
}
