pub mod gemini;
pub mod openai;

use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LLMConfig, LLMProvider};
use crate::domain::prompt::ChatMessage;
use async_trait::async_trait;
use gemini::GeminiClient;
use openai::OpenAIClient;
use reqwest::StatusCode;

#[async_trait]
pub trait LLMClient: Send + Sync {
    async fn chat(&self, config: &LLMConfig, messages: &[ChatMessage]) -> Result<String>;
}

pub struct RouterClient {
    openai: OpenAIClient,
    gemini: GeminiClient,
}

impl RouterClient {
    pub fn new() -> Self {
        Self {
            openai: OpenAIClient::new(),
            gemini: GeminiClient::new(),
        }
    }
}

impl Default for RouterClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for RouterClient {
    async fn chat(&self, config: &LLMConfig, messages: &[ChatMessage]) -> Result<String> {
        match config.provider {
            LLMProvider::Gemini => self.gemini.chat(config, messages).await,
            _ => self.openai.chat(config, messages).await,
        }
    }
}

/// Map a non-success HTTP status from a model API onto the error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> AppError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::InvalidApiKey(format!("API rejected credentials ({})", status))
        }
        _ => AppError::LLMError(format!("API error ({}): {}", status, body)),
    }
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    if base_url.ends_with('/') {
        format!("{}{}", base_url, path)
    } else {
        format!("{}/{}", base_url, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_classifies_auth() {
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            AppError::InvalidApiKey(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            AppError::LLMError(_)
        ));
    }

    #[test]
    fn test_endpoint_joins_slashes() {
        assert_eq!(
            endpoint("https://api.openai.com/v1/", "chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            endpoint("http://localhost:11434/v1", "embeddings"),
            "http://localhost:11434/v1/embeddings"
        );
    }
}
