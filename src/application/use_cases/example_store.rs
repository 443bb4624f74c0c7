use super::embedding_service::TextEmbedder;
use crate::domain::error::{AppError, Result};
use crate::domain::example::{EmbedFields, Example};
use tracing::info;

#[derive(Debug, Clone)]
pub struct StoredExample {
    pub example: Example,
    pub embedding: Vec<f32>,
}

/// Immutable, embedded example bank. Built once at startup and shared
/// read-only between requests.
#[derive(Debug, Clone, Default)]
pub struct ExampleStore {
    entries: Vec<StoredExample>,
    dimension: usize,
}

impl ExampleStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Embed every example. All vectors must share one dimension.
    pub async fn build(
        examples: Vec<Example>,
        embedder: &dyn TextEmbedder,
        fields: EmbedFields,
    ) -> Result<Self> {
        let texts: Vec<String> = examples.iter().map(|e| e.embedding_text(fields)).collect();
        let embeddings = embedder.embed_batch(&texts).await?;

        let dimension = embeddings.first().map(Vec::len).unwrap_or(0);
        if let Some(pos) = embeddings.iter().position(|e| e.len() != dimension) {
            return Err(AppError::Config(format!(
                "Example {} embedded to {} dimensions, expected {}",
                pos,
                embeddings[pos].len(),
                dimension
            )));
        }

        let entries: Vec<StoredExample> = examples
            .into_iter()
            .zip(embeddings)
            .map(|(example, embedding)| StoredExample { example, embedding })
            .collect();

        info!(
            count = entries.len(),
            dimension,
            fields = ?fields,
            "Example store ready"
        );
        Ok(Self { entries, dimension })
    }

    pub fn entries(&self) -> &[StoredExample] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
