use serde::{Deserialize, Serialize};

/// Sampling temperature for every model call. Identical prompts must yield
/// near-identical completions, so this is not configurable.
pub const TEMPERATURE: f32 = 0.0;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LLMProvider {
    OpenAI,
    OpenRouter,
    Gemini,
    Ollama,
    /// Any OpenAI-compatible server running locally (LM Studio, llama.cpp).
    Local,
}

impl LLMProvider {
    pub fn requires_api_key(&self) -> bool {
        matches!(
            self,
            LLMProvider::OpenAI | LLMProvider::OpenRouter | LLMProvider::Gemini
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LLMConfig {
    pub provider: LLMProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub timeout_secs: u64,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: LLMProvider::OpenAI,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key: None,
            max_tokens: Some(1024),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Local,
    OpenAI,
    Ollama,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAI,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: None,
            timeout_secs: 30,
        }
    }
}
