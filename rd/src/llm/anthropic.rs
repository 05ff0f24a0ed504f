//! Anthropic Claude API client implementation
//!
//! Implements the LlmClient trait for Anthropic's Messages API.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::http::post_json;
use super::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, StopReason, TokenUsage};
use crate::config::LlmConfig;

/// Anthropic Claude API client
pub struct AnthropicClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl AnthropicClient {
    /// Create a new client from configuration
    ///
    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        debug!(model = %config.model, "AnthropicClient::from_config: called");
        let api_key = config.get_api_key().map_err(|e| LlmError::Config(e.to_string()))?;

        let http = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(LlmError::Network)?;

        Ok(Self {
            model: config.model.clone(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    /// Build the request body for the Anthropic API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");
        serde_json::json!({
            "model": self.model,
            "max_tokens": request.max_tokens.min(self.max_tokens),
            "system": request.system_prompt,
            "messages": convert_messages(&request.messages),
        })
    }

    /// Parse the Anthropic API response
    fn parse_response(&self, api_response: AnthropicResponse) -> CompletionResponse {
        debug!(?api_response.stop_reason, "parse_response: called");
        let text: Vec<String> = api_response
            .content
            .into_iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text),
                AnthropicContentBlock::Other => None,
            })
            .collect();

        CompletionResponse {
            content: if text.is_empty() { None } else { Some(text.join("")) },
            stop_reason: StopReason::from_anthropic(api_response.stop_reason.as_deref().unwrap_or("end_turn")),
            usage: TokenUsage {
                input_tokens: api_response.usage.input_tokens,
                output_tokens: api_response.usage.output_tokens,
            },
        }
    }
}

fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    debug!(message_count = %messages.len(), "convert_messages: called");
    messages
        .iter()
        .map(|msg| {
            serde_json::json!({
                "role": msg.role,
                "content": msg.content,
            })
        })
        .collect()
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "complete: called");
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_request_body(&request);

        let response = post_json(&self.http, &url, &body, |rb| {
            rb.header("x-api-key", self.api_key.as_str())
                .header("anthropic-version", "2023-06-01")
                .header("content-type", "application/json")
        })
        .await?;

        let api_response: AnthropicResponse = response.json().await?;
        Ok(self.parse_response(api_response))
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum AnthropicContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}
