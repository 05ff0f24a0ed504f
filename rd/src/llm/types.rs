//! LLM request/response types
//!
//! The oracle only ever sends text and reads text back, so these types cover
//! plain-text conversations for both supported providers.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A completion request - everything needed for one LLM call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt
    pub system_prompt: String,

    /// Conversation (typically a single user message)
    pub messages: Vec<Message>,

    /// Max tokens for response (capped by config)
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// Single-turn request: one system prompt, one user message
    pub fn single(system_prompt: impl Into<String>, user: impl Into<String>, max_tokens: u32) -> Self {
        debug!(%max_tokens, "CompletionRequest::single: called");
        Self {
            system_prompt: system_prompt.into(),
            messages: vec![Message::user(user)],
            max_tokens,
        }
    }

    /// Concatenated text of all user messages
    pub fn user_text(&self) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        debug!("Message::user: called");
        Self {
            role: Role::User,
            content: text.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(text: impl Into<String>) -> Self {
        debug!("Message::assistant: called");
        Self {
            role: Role::Assistant,
            content: text.into(),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text content (if any)
    pub content: Option<String>,

    /// Why the model stopped
    pub stop_reason: StopReason,

    /// Token usage
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// Plain end-of-turn text response
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }
}

/// Why the model stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

impl StopReason {
    /// Parse from Anthropic API stop_reason string
    pub fn from_anthropic(s: &str) -> Self {
        debug!(%s, "StopReason::from_anthropic: called");
        match s {
            "max_tokens" => {
                debug!("StopReason::from_anthropic: MaxTokens");
                StopReason::MaxTokens
            }
            "stop_sequence" => {
                debug!("StopReason::from_anthropic: StopSequence");
                StopReason::StopSequence
            }
            _ => {
                debug!("StopReason::from_anthropic: EndTurn");
                StopReason::EndTurn
            }
        }
    }

    /// Parse from OpenAI finish_reason string
    pub fn from_openai(s: Option<&str>) -> Self {
        debug!(?s, "StopReason::from_openai: called");
        match s {
            Some("length") => StopReason::MaxTokens,
            _ => StopReason::EndTurn,
        }
    }
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Accumulate another call's usage
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}
