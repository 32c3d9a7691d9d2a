//! Session Builder
//!
//! Turns a participant's remaining questions into the instructions and seeded chat
//! context handed to the conversational model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Greeting the agent opens every interview with.
pub const GREETING_PREAMBLE: &str = "Instructions: \
- Start by saying greetings: Hello! I'm Narra, your AI storytelling guide. \
I’m here to help you craft and preserve your most treasured memories. \
Let’s embark on this journey together. You can skip any question you’re uncomfortable with and pause anytime you wish. Ready to begin? ";

/// Turn-taking rules, including the tool calls that report progress back to the session.
pub const TURN_DIRECTIVES: &str = "- Ask one question at a time and avoid introducing additional questions within the same response. \
- Once the current question is answered, proceed to the next. \
- Allow users to skip any question they prefer not to answer or pause the conversation at any time. \
- Every time you ask one of the questions below, call the `record_question_asked` tool with its exact text. \
- When the user indicates the conversation is over, respond with a warm goodbye and call the `end_interview` tool. ";

/// Who the agent is, seeded into the model's memory before any participant audio.
pub const PERSONA: &str = "You are Narra, a friendly and approachable storytelling guide. \
Your purpose is to assist users in capturing and sharing the most meaningful aspects of their life stories.";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    Assistant,
    User,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Conversation history the model starts from.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatContext {
    pub messages: Vec<ChatMessage>,
}

impl ChatContext {
    pub fn append(&mut self, role: ChatRole, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
    }
}

/// Everything a conversational model needs to run one interview.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelOptions {
    pub instructions: String,
    pub modalities: BTreeSet<Modality>,
    pub chat_context: ChatContext,
}

/// Builds model sessions for the interview persona.
#[derive(Debug, Clone, Default)]
pub struct SessionBuilder;

impl SessionBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Composes instructions and the seeded chat context.
    ///
    /// Callers only invoke this with a non-empty `remaining`; a participant with nothing
    /// left to answer never gets a model session.
    pub fn build(&self, remaining: &[String]) -> (String, ChatContext) {
        let instructions = format!(
            "{}{}{}",
            GREETING_PREAMBLE,
            TURN_DIRECTIVES,
            remaining.join(" ")
        );

        let mut chat_ctx = ChatContext::default();
        chat_ctx.append(ChatRole::Assistant, PERSONA);

        (instructions, chat_ctx)
    }

    /// Same as [`SessionBuilder::build`], packaged for a model that speaks and writes.
    pub fn options(&self, remaining: &[String]) -> ModelOptions {
        let (instructions, chat_context) = self.build(remaining);
        ModelOptions {
            instructions,
            modalities: [Modality::Audio, Modality::Text].into(),
            chat_context,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::QuestionBank;

    #[test]
    fn test_instructions_end_with_remaining_questions() {
        let bank = QuestionBank::default();
        let remaining = bank.all().to_vec();

        let (instructions, _) = SessionBuilder::new().build(&remaining);

        assert!(instructions.starts_with(GREETING_PREAMBLE));
        assert!(instructions.ends_with(&remaining.join(" ")));
        assert!(instructions.contains("Ask one question at a time"));
    }

    #[test]
    fn test_instructions_keep_question_order() {
        let remaining = vec!["Second?".to_string(), "First?".to_string()];
        let (instructions, _) = SessionBuilder::new().build(&remaining);
        assert!(instructions.ends_with("Second? First?"));
    }

    #[test]
    fn test_chat_context_seeded_with_persona_only() {
        let (_, chat_ctx) = SessionBuilder::new().build(&["Where did you grow up?".to_string()]);

        assert_eq!(chat_ctx.messages.len(), 1);
        assert_eq!(chat_ctx.messages[0].role, ChatRole::Assistant);
        assert_eq!(chat_ctx.messages[0].content, PERSONA);
    }

    #[test]
    fn test_options_request_audio_and_text() {
        let options = SessionBuilder::new().options(&["What is your birthdate?".to_string()]);
        assert!(options.modalities.contains(&Modality::Audio));
        assert!(options.modalities.contains(&Modality::Text));
        assert_eq!(options.chat_context.messages.len(), 1);
    }

    #[test]
    fn test_modality_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Modality::Audio).unwrap(), "\"audio\"");
        assert_eq!(serde_json::to_string(&ChatRole::Assistant).unwrap(), "\"assistant\"");
    }
}
