use super::example_selector::ExampleSelector;
use super::few_shot_prompt_builder::FewShotPromptBuilder;
use super::query_generator::QueryGenerator;
use crate::domain::error::Result;
use crate::domain::example::{EmbedFields, Example};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct SynthesisSettings {
    pub k: usize,
    pub threshold: f32,
    pub embed_fields: EmbedFields,
}

/// Second model pass: turns the question, SQL and execution result into the
/// user-facing answer. Only near-exact example matches are shown to it.
pub struct AnswerSynthesizer {
    generator: Arc<QueryGenerator>,
    builder: Arc<FewShotPromptBuilder>,
    selector: Arc<ExampleSelector>,
    settings: SynthesisSettings,
}

impl AnswerSynthesizer {
    pub fn new(
        generator: Arc<QueryGenerator>,
        builder: Arc<FewShotPromptBuilder>,
        selector: Arc<ExampleSelector>,
        settings: SynthesisSettings,
    ) -> Self {
        Self {
            generator,
            builder,
            selector,
            settings,
        }
    }

    pub async fn synthesize(&self, question: &str, sql: &str, result: &str) -> Result<String> {
        let examples = self.reference_examples(question, sql, result).await?;
        debug!(examples = examples.len(), "Synthesizing answer");
        let prompt = self.builder.synthesis_prompt(question, sql, result, &examples);
        self.generator.generate(&prompt).await
    }

    async fn reference_examples(&self, question: &str, sql: &str, result: &str) -> Result<Vec<Example>> {
        if self.settings.k == 0 {
            return Ok(Vec::new());
        }
        let lookup = Example::new(question, sql, result).embedding_text(self.settings.embed_fields);
        let scored = self
            .selector
            .select(&lookup, self.settings.k, self.settings.threshold)
            .await?;
        Ok(scored.into_iter().map(|s| s.example).collect())
    }
}
