use super::{endpoint, status_error, LLMClient};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LLMConfig, TEMPERATURE};
use crate::domain::prompt::ChatMessage;
use async_trait::async_trait;
use serde_json::json;

/// Client for any OpenAI-compatible chat-completions endpoint (OpenAI,
/// OpenRouter, Ollama's `/v1`, LM Studio).
pub struct OpenAIClient {
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for OpenAIClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for OpenAIClient {
    async fn chat(&self, config: &LLMConfig, messages: &[ChatMessage]) -> Result<String> {
        let url = endpoint(&config.base_url, "chat/completions");

        let messages: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let body = json!({
            "model": config.model,
            "messages": messages,
            "max_tokens": config.max_tokens,
            "temperature": TEMPERATURE,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(api_key) = &config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::LLMError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::LLMError(format!("Failed to parse JSON: {}", e)))?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::LLMError("Invalid response format".to_string()))
    }
}
