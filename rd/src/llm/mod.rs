//! LLM client module
//!
//! Text-in, text-out completion for the verification oracle.

use std::sync::Arc;

use tracing::debug;

mod anthropic;
pub mod client;
mod error;
mod http;
mod openai;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use error::LlmError;
pub use openai::OpenAIClient;
pub use types::{CompletionRequest, CompletionResponse, Message, Role, StopReason, TokenUsage};

use crate::config::LlmConfig;

/// Create an LLM client based on the provider specified in config
///
/// Supports "anthropic" and "openai" providers.
pub fn create_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, model = %config.model, "create_client: called");
    match config.provider.as_str() {
        "anthropic" => {
            debug!("create_client: creating Anthropic client");
            Ok(Arc::new(AnthropicClient::from_config(config)?))
        }
        "openai" => {
            debug!("create_client: creating OpenAI client");
            Ok(Arc::new(OpenAIClient::from_config(config)?))
        }
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(LlmError::Config(format!(
                "Unknown LLM provider: '{}'. Supported: anthropic, openai",
                other
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "mystery".to_string(),
            ..Default::default()
        };
        let err = create_client(&config).err().map(|e| e.to_string()).unwrap_or_default();
        assert!(err.contains("Unknown LLM provider"));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = LlmConfig {
            api_key_env: "RESOLVD_TEST_NO_SUCH_KEY".to_string(),
            ..Default::default()
        };
        assert!(matches!(create_client(&config), Err(LlmError::Config(_))));
    }
}
