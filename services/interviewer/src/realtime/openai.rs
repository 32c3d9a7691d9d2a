//! Runs interview sessions against the OpenAI Realtime API.
//!
//! One WebSocket per session. A pump task forwards participant audio up, plays agent
//! audio and transcriptions back into the room, and answers tool calls through the
//! session's `SessionControl`. Replies are requested by the turn coordinator, plus one
//! follow-up when the model reports a question through a tool before saying anything.

use super::protocol::{
    AudioTranscription, ClientEvent, ContentPart, ConversationItem, ServerEvent, SessionConfig,
    Tool, TurnDetection,
};
use crate::audio_utils;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use narra_core::{
    model::{
        ConversationalModel, END_INTERVIEW_TOOL, ModelError, ModelSession, SessionControl,
        handle_tool_call, interview_tools,
    },
    session::{ChatMessage, ChatRole, Modality, ModelOptions},
    transport::{Participant, Transcription},
};
use std::sync::Arc;
use tokio::{
    net::TcpStream,
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage},
};
use tracing::{Instrument, debug, error, info, warn};

const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";
const TRANSCRIPTION_MODEL: &str = "whisper-1";

type RealtimeSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type RealtimeSink = SplitSink<RealtimeSocket, WsMessage>;

/// A `ConversationalModel` backed by the OpenAI Realtime API.
pub struct OpenAiRealtimeModel {
    api_key: String,
    model: String,
    voice: String,
}

impl OpenAiRealtimeModel {
    pub fn new(api_key: String, model: String, voice: String) -> Self {
        Self {
            api_key,
            model,
            voice,
        }
    }

    async fn connect(&self) -> Result<RealtimeSocket> {
        let url = format!("{}?model={}", REALTIME_URL, self.model);
        let mut request = url.into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", format!("Bearer {}", self.api_key).parse()?);
        request
            .headers_mut()
            .insert("OpenAI-Beta", "realtime=v1".parse()?);

        let (ws_stream, _) = connect_async(request)
            .await
            .context("Failed to connect to OpenAI Realtime WebSocket")?;
        info!(model = %self.model, "Connected to OpenAI Realtime API.");
        Ok(ws_stream)
    }

    fn session_config(&self, options: ModelOptions) -> SessionConfig {
        SessionConfig {
            modalities: options
                .modalities
                .iter()
                .map(|m| match m {
                    Modality::Audio => "audio".to_string(),
                    Modality::Text => "text".to_string(),
                })
                .collect(),
            instructions: options.instructions,
            voice: self.voice.clone(),
            input_audio_format: "pcm16",
            output_audio_format: "pcm16",
            input_audio_transcription: AudioTranscription {
                model: TRANSCRIPTION_MODEL.to_string(),
            },
            turn_detection: TurnDetection::default(),
            tools: interview_tools()
                .into_iter()
                .map(|tool| Tool {
                    name: tool.name.to_string(),
                    description: tool.description.to_string(),
                    parameters: tool.parameters,
                })
                .collect(),
            tool_choice: "auto",
        }
    }
}

/// Seeds the conversation with one item per chat-context message.
fn context_item(message: &ChatMessage) -> ConversationItem {
    let text = message.content.clone();
    let (role, part) = match message.role {
        ChatRole::System => ("system", ContentPart::InputText { text }),
        ChatRole::User => ("user", ContentPart::InputText { text }),
        ChatRole::Assistant => ("assistant", ContentPart::Text { text }),
    };
    ConversationItem::Message {
        role,
        content: vec![part],
    }
}

async fn send_event(sink: &mut RealtimeSink, event: &ClientEvent) -> Result<()> {
    sink.send(WsMessage::Text(serde_json::to_string(event)?.into()))
        .await?;
    Ok(())
}

#[async_trait]
impl ConversationalModel for OpenAiRealtimeModel {
    async fn start(
        &self,
        options: ModelOptions,
        participant: Arc<dyn Participant>,
        control: SessionControl,
    ) -> Result<Box<dyn ModelSession>, ModelError> {
        let ws_stream = self
            .connect()
            .await
            .map_err(|e| ModelError::Start(format!("{:#}", e)))?;
        let (mut sink, stream) = ws_stream.split();

        let context = options.chat_context.messages.clone();
        let setup = async {
            send_event(
                &mut sink,
                &ClientEvent::SessionUpdate {
                    session: self.session_config(options),
                },
            )
            .await?;
            for message in &context {
                send_event(
                    &mut sink,
                    &ClientEvent::ConversationItemCreate {
                        item: context_item(message),
                    },
                )
                .await?;
            }
            anyhow::Ok(())
        };
        setup
            .await
            .map_err(|e| ModelError::Start(format!("{:#}", e)))?;

        let (commands_tx, commands_rx) = mpsc::channel(8);
        let pump = Pump {
            sink,
            stream,
            audio: participant.subscribe_audio(),
            commands: commands_rx,
            participant,
            control,
            follow_up: FollowUp::default(),
        };
        let (done_tx, done_rx) = watch::channel(false);
        let pump = tokio::spawn(
            async move {
                if let Err(e) = pump.run().await {
                    error!(error = ?e, "Realtime session failed.");
                }
                done_tx.send_replace(true);
                debug!("Realtime pump stopped.");
            }
            .in_current_span(),
        );

        Ok(Box::new(OpenAiRealtimeSession {
            commands: commands_tx,
            pump,
            done: done_rx,
        }))
    }
}

#[derive(Debug)]
enum Command {
    Respond,
}

pub struct OpenAiRealtimeSession {
    commands: mpsc::Sender<Command>,
    pump: JoinHandle<()>,
    /// Flips to `true` when the pump exits; the sender is dropped if it is aborted.
    done: watch::Receiver<bool>,
}

#[async_trait]
impl ModelSession for OpenAiRealtimeSession {
    async fn generate_reply(&mut self) -> Result<(), ModelError> {
        self.commands
            .send(Command::Respond)
            .await
            .map_err(|_| ModelError::Closed)
    }

    async fn closed(&self) {
        let mut done = self.done.clone();
        let _ = done.wait_for(|done| *done).await;
    }

    async fn close(&mut self) {
        self.pump.abort();
    }
}

impl Drop for OpenAiRealtimeSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

struct Pump {
    sink: RealtimeSink,
    stream: SplitStream<RealtimeSocket>,
    audio: broadcast::Receiver<bytes::Bytes>,
    commands: mpsc::Receiver<Command>,
    participant: Arc<dyn Participant>,
    control: SessionControl,
    follow_up: FollowUp,
}

/// Tracks whether a response ended on a tool call with nothing said, in which case the
/// model is asked to carry on once that response is done.
#[derive(Debug, Default)]
struct FollowUp {
    spoke: bool,
    pending: bool,
}

impl FollowUp {
    fn response_started(&mut self) {
        self.spoke = false;
    }

    fn agent_spoke(&mut self) {
        self.spoke = true;
    }

    fn tool_answered(&mut self, tool: &str) {
        if tool != END_INTERVIEW_TOOL && !self.spoke {
            self.pending = true;
        }
    }

    /// Whether another response should be requested now that the current one is done.
    fn response_finished(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

impl Pump {
    async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Respond) => {
                        send_event(&mut self.sink, &ClientEvent::ResponseCreate).await?;
                    }
                    None => return Ok(()),
                },
                frame = self.audio.recv() => match frame {
                    Ok(frame) => {
                        let audio = audio_utils::encode_pcm16(&frame);
                        send_event(&mut self.sink, &ClientEvent::InputAudioBufferAppend { audio }).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Realtime session fell behind participant audio.");
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                },
                message = self.stream.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => self.on_server_text(text.as_str()).await?,
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!(?frame, "OpenAI closed the realtime session.");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("Realtime socket error"),
                    None => return Ok(()),
                },
            }
        }
    }

    async fn on_server_text(&mut self, text: &str) -> Result<()> {
        let event = match serde_json::from_str::<ServerEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Skipping unrecognized realtime event.");
                return Ok(());
            }
        };

        match event {
            ServerEvent::ResponseCreated => self.follow_up.response_started(),
            ServerEvent::ResponseDone => {
                if self.follow_up.response_finished() {
                    debug!("Requesting a follow-up after a silent tool call.");
                    send_event(&mut self.sink, &ClientEvent::ResponseCreate).await?;
                }
            }
            ServerEvent::TranscriptionDelta { delta } => {
                self.publish_transcription(delta, false).await;
            }
            ServerEvent::TranscriptionCompleted { transcript } => {
                self.publish_transcription(transcript, true).await;
            }
            ServerEvent::AudioDelta { delta } => {
                self.follow_up.agent_spoke();
                if let Err(e) = self.participant.publish_audio(delta).await {
                    warn!(error = %e, "Could not play agent audio.");
                }
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                let output = match handle_tool_call(&self.control, &name, &arguments) {
                    Ok(output) => output,
                    Err(e) => format!("Error: {}", e),
                };
                send_event(
                    &mut self.sink,
                    &ClientEvent::ConversationItemCreate {
                        item: ConversationItem::FunctionCallOutput { call_id, output },
                    },
                )
                .await?;
                self.follow_up.tool_answered(&name);
            }
            ServerEvent::Error { error } => {
                warn!(message = %error.message, "OpenAI realtime error.");
            }
            ServerEvent::Other => {}
        }
        Ok(())
    }

    async fn publish_transcription(&self, text: String, is_final: bool) {
        let segment = Transcription { text, is_final };
        if let Err(e) = self.participant.publish_transcription(segment).await {
            warn!(error = %e, "Could not publish transcription.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narra_core::session::SessionBuilder;

    fn model() -> OpenAiRealtimeModel {
        OpenAiRealtimeModel::new(
            "sk-test".to_string(),
            "gpt-4o-realtime-preview-2024-10-01".to_string(),
            "alloy".to_string(),
        )
    }

    #[test]
    fn test_session_config_carries_instructions_and_tools() {
        let remaining = vec!["Where did you grow up?".to_string()];
        let options = SessionBuilder::new().options(&remaining);
        let instructions = options.instructions.clone();

        let config = model().session_config(options);

        assert_eq!(config.instructions, instructions);
        assert_eq!(config.voice, "alloy");
        assert_eq!(config.modalities, vec!["audio", "text"]);
        assert!(!config.turn_detection.create_response);
        let names: Vec<&str> = config.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["record_question_asked", "end_interview"]);
    }

    #[test]
    fn test_silent_tool_call_gets_one_follow_up() {
        let mut follow_up = FollowUp::default();
        follow_up.response_started();
        follow_up.tool_answered("record_question_asked");

        assert!(follow_up.response_finished());
        assert!(!follow_up.response_finished());
    }

    #[test]
    fn test_no_follow_up_after_speaking_or_ending() {
        let mut follow_up = FollowUp::default();
        follow_up.response_started();
        follow_up.agent_spoke();
        follow_up.tool_answered("record_question_asked");
        assert!(!follow_up.response_finished());

        follow_up.response_started();
        follow_up.tool_answered(END_INTERVIEW_TOOL);
        assert!(!follow_up.response_finished());
    }

    #[tokio::test]
    async fn test_closed_resolves_when_pump_stops() {
        let (commands, _commands_rx) = mpsc::channel(1);
        let (done_tx, done) = watch::channel(false);
        let pump = tokio::spawn(async move {
            done_tx.send_replace(true);
        });
        let session = OpenAiRealtimeSession {
            commands,
            pump,
            done,
        };

        tokio::time::timeout(std::time::Duration::from_secs(1), session.closed())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_closed_resolves_when_pump_is_aborted() {
        let (commands, _commands_rx) = mpsc::channel(1);
        let (done_tx, done) = watch::channel(false);
        let mut session = OpenAiRealtimeSession {
            commands,
            pump: tokio::spawn(async move {
                let _done_tx = done_tx;
                std::future::pending::<()>().await
            }),
            done,
        };

        session.close().await;

        tokio::time::timeout(std::time::Duration::from_secs(1), session.closed())
            .await
            .unwrap();
    }

    #[test]
    fn test_context_item_roles() {
        let item = context_item(&ChatMessage {
            role: ChatRole::Assistant,
            content: "I am Narra.".to_string(),
        });
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"][0]["type"], "text");

        let item = context_item(&ChatMessage {
            role: ChatRole::User,
            content: "Hi".to_string(),
        });
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["content"][0]["type"], "input_text");
    }
}
