use super::embedding_service::{cosine_similarity, TextEmbedder};
use super::example_store::ExampleStore;
use crate::domain::error::Result;
use crate::domain::example::ScoredExample;
use std::sync::Arc;
use tracing::debug;

/// Picks few-shot examples for a question: rank every stored example by
/// cosine similarity, keep the top `k`, then drop those under `threshold`.
pub struct ExampleSelector {
    store: Arc<ExampleStore>,
    embedder: Arc<dyn TextEmbedder>,
}

impl ExampleSelector {
    pub fn new(store: Arc<ExampleStore>, embedder: Arc<dyn TextEmbedder>) -> Self {
        Self { store, embedder }
    }

    pub async fn select(&self, question: &str, k: usize, threshold: f32) -> Result<Vec<ScoredExample>> {
        if self.store.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embedder.embed(question).await?;
        Ok(rank(&query_embedding, &self.store, k, threshold))
    }
}

/// Top-k first, threshold second. A weak example may take a top-k slot and
/// then be filtered out, so fewer than `k` (possibly zero) can come back.
/// Equal scores keep store order.
pub fn rank(query_embedding: &[f32], store: &ExampleStore, k: usize, threshold: f32) -> Vec<ScoredExample> {
    let mut scored: Vec<(usize, f32)> = store
        .entries()
        .iter()
        .enumerate()
        .map(|(idx, entry)| (idx, cosine_similarity(query_embedding, &entry.embedding)))
        .collect();

    // sort_by is stable, so ties stay in insertion order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(k);

    let candidates = scored.len();
    let best = scored.first().map(|(_, score)| *score);
    let kept: Vec<ScoredExample> = scored
        .into_iter()
        .filter(|(_, score)| *score >= threshold)
        .map(|(idx, score)| ScoredExample {
            example: store.entries()[idx].example.clone(),
            score,
        })
        .collect();

    debug!(
        candidates,
        kept = kept.len(),
        best_score = ?best,
        threshold,
        "Selected few-shot examples"
    );
    kept
}
