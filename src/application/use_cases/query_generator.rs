use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::domain::prompt::StructuredPrompt;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::response::clean_completion;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// One model call per prompt, bounded by the configured timeout. No retries.
pub struct QueryGenerator {
    llm_client: Arc<dyn LLMClient>,
    config: LLMConfig,
}

impl QueryGenerator {
    pub fn new(llm_client: Arc<dyn LLMClient>, config: LLMConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn config(&self) -> &LLMConfig {
        &self.config
    }

    pub async fn generate(&self, prompt: &StructuredPrompt) -> Result<String> {
        let raw = timeout(
            Duration::from_secs(self.config.timeout_secs),
            self.llm_client.chat(&self.config, prompt.messages()),
        )
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "Model call timed out after {}s",
                self.config.timeout_secs
            ))
        })??;

        let cleaned = clean_completion(&raw);
        debug!(chars = cleaned.len(), "Model completion received");
        Ok(cleaned)
    }
}
