//! Wire events of the OpenAI Realtime API, limited to what the interviewer sends and
//! reacts to.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug)]
#[serde(tag = "type")]
pub(crate) enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    #[serde(rename = "response.create")]
    ResponseCreate,
}

#[derive(Serialize, Debug)]
pub(crate) struct SessionConfig {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: &'static str,
    pub output_audio_format: &'static str,
    pub input_audio_transcription: AudioTranscription,
    pub turn_detection: TurnDetection,
    pub tools: Vec<Tool>,
    pub tool_choice: &'static str,
}

#[derive(Serialize, Debug)]
pub(crate) struct AudioTranscription {
    pub model: String,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename = "server_vad")]
pub(crate) struct TurnDetection {
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    /// Replies are requested explicitly, one per finished utterance.
    pub create_response: bool,
    pub interrupt_response: bool,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 200,
            silence_duration_ms: 700,
            create_response: false,
            interrupt_response: true,
        }
    }
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename = "function")]
pub(crate) struct Tool {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ConversationItem {
    Message {
        role: &'static str,
        content: Vec<ContentPart>,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentPart {
    InputText { text: String },
    Text { text: String },
}

#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type")]
pub(crate) enum ServerEvent {
    #[serde(rename = "response.created")]
    ResponseCreated,
    #[serde(rename = "response.done")]
    ResponseDone,
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta { delta: String },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        call_id: String,
        name: String,
        arguments: String,
    },
    #[serde(rename = "error")]
    Error { error: ErrorBody },
    #[serde(other)]
    Other,
}

#[derive(Deserialize, Debug, PartialEq)]
pub(crate) struct ErrorBody {
    pub message: String,
}
