use super::{status_error, LLMClient};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::{LLMConfig, TEMPERATURE};
use crate::domain::prompt::{ChatMessage, Role};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f64,
    #[serde(rename = "maxOutputTokens", skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiCandidateContent,
}

#[derive(Deserialize)]
struct GeminiCandidateContent {
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Deserialize)]
struct GeminiCandidatePart {
    text: String,
}

pub struct GeminiClient {
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    fn normalize_model(model: &str) -> String {
        model.trim().trim_start_matches("models/").to_string()
    }

    fn api_key(config: &LLMConfig) -> Result<String> {
        config
            .api_key
            .clone()
            .ok_or_else(|| AppError::MissingApiKey("Gemini provider requires an API key".to_string()))
    }

    /// System turns become the system instruction; assistant turns use
    /// Gemini's `model` role.
    fn build_request(config: &LLMConfig, messages: &[ChatMessage]) -> GeminiRequest {
        let system_text = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let contents = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| GeminiContent {
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
                role: Some(
                    match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction: (!system_text.trim().is_empty()).then(|| GeminiContent {
                parts: vec![GeminiPart { text: system_text }],
                role: None,
            }),
            generation_config: GenerationConfig {
                temperature: TEMPERATURE as f64,
                max_output_tokens: config.max_tokens,
            },
        }
    }
}

impl Default for GeminiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LLMClient for GeminiClient {
    async fn chat(&self, config: &LLMConfig, messages: &[ChatMessage]) -> Result<String> {
        let api_key = Self::api_key(config)?;
        let model_id = Self::normalize_model(&config.model);
        let base_url = config.base_url.trim_end_matches('/');
        let url = format!("{}/{}:generateContent", base_url, model_id);

        let body = Self::build_request(config, messages);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::LLMError(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, &text));
        }

        let json: GeminiResponse = response
            .json()
            .await
            .map_err(|e| AppError::LLMError(format!("Failed to parse JSON: {}", e)))?;

        json.candidates
            .first()
            .and_then(|candidate| candidate.content.parts.first())
            .map(|part| part.text.clone())
            .ok_or_else(|| AppError::LLMError("Invalid response format".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm_config::LLMProvider;

    #[test]
    fn test_build_request_splits_system_turns() {
        let config = LLMConfig {
            provider: LLMProvider::Gemini,
            model: "models/gemini-1.5-flash".to_string(),
            ..LLMConfig::default()
        };
        let messages = vec![
            ChatMessage::system("policy"),
            ChatMessage::user("How many orders?"),
            ChatMessage::assistant("```sql\nSELECT COUNT(*) FROM orders\n```"),
            ChatMessage::user("How many customers?"),
        ];

        let request = GeminiClient::build_request(&config, &messages);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "policy");
        assert_eq!(json["contents"].as_array().unwrap().len(), 3);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["temperature"], 0.0);
        assert_eq!(
            GeminiClient::normalize_model(&config.model),
            "gemini-1.5-flash"
        );
    }
}
