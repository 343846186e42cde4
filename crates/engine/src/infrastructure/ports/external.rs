//! The text-completion port.

use async_trait::async_trait;

use super::error::LlmError;

/// One encounter generation: a system prompt, the compiled user turn and
/// sampling limits.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub system_prompt: String,
    pub messages: Vec<ChatMessage>,
    pub sampling: Sampling,
}

impl LlmRequest {
    /// A single-turn request, the shape every encounter prompt takes.
    pub fn single_turn(
        system_prompt: impl Into<String>,
        user: impl Into<String>,
        sampling: Sampling,
    ) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            messages: vec![ChatMessage::new(MessageRole::User, user)],
            sampling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sampling {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// Generated text.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub content: String,
    /// The model stopped at the token limit, so JSON may be cut short.
    pub truncated: bool,
}

impl LlmResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            truncated: false,
        }
    }
}

/// Text-completion black box. Any error means "no response".
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmPort: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}
