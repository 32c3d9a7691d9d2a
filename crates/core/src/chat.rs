//! Text chat fallback.
//!
//! Answers a single typed message with a chat-completion model, for clients that cannot
//! open a voice session.

use anyhow::{Context, Result};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;

pub const CHAT_SYSTEM_PROMPT: &str = "You are an AI assistant.";

/// Produces a one-shot text reply to a user message.
#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn respond(&self, message: &str) -> Result<String>;
}

/// A `ChatResponder` for any OpenAI-compatible API.
pub struct OpenAIChatResponder {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAIChatResponder {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl ChatResponder for OpenAIChatResponder {
    async fn respond(&self, message: &str) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(CHAT_SYSTEM_PROMPT)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(message)
                    .build()?
                    .into(),
            ])
            .build()?;

        let response = self.client.chat().create(request).await?;

        let answer = response
            .choices
            .first()
            .context("No response choice from LLM")?
            .message
            .content
            .clone()
            .context("No content in LLM response")?;
        Ok(answer)
    }
}

/// A deterministic `ChatResponder` that echoes the message back.
pub struct EchoChatResponder;

#[async_trait]
impl ChatResponder for EchoChatResponder {
    async fn respond(&self, message: &str) -> Result<String> {
        Ok(format!("You said: {}", message))
    }
}
