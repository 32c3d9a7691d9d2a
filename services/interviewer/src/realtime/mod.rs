//! Voice sessions with a realtime conversational model.

pub mod openai;
mod protocol;

pub use openai::OpenAiRealtimeModel;
