use std::sync::Arc;

use tracing::info;

use crate::application::use_cases::answer_synthesizer::{AnswerSynthesizer, SynthesisSettings};
use crate::application::use_cases::embedding_service::{EmbeddingService, TextEmbedder};
use crate::application::use_cases::example_selector::ExampleSelector;
use crate::application::use_cases::example_store::ExampleStore;
use crate::application::use_cases::few_shot_prompt_builder::{FewShotPromptBuilder, PromptTemplates};
use crate::application::use_cases::query_generator::QueryGenerator;
use crate::application::use_cases::sql_assistant::RetrievalSettings;
use crate::application::{DbSession, SqlAssistant};
use crate::domain::error::Result;
use crate::infrastructure::config::{AppConfig, ConfigLoader};
use crate::infrastructure::llm_clients::{LLMClient, RouterClient};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::storage::{load_examples, load_template};
use crate::interfaces::http::start_server;

/// Load configuration, build the pipeline and serve HTTP until shutdown.
/// Any configuration problem stops startup.
pub async fn run() -> Result<()> {
    let config = ConfigLoader::new().load()?;
    init_logging(&config.logging)?;

    let embedder: Arc<dyn TextEmbedder> = Arc::new(EmbeddingService::new(config.embedding.clone()));
    let llm_client: Arc<dyn LLMClient> = Arc::new(RouterClient::new());
    let assistant = bootstrap(&config, llm_client, embedder).await?;

    start_server(assistant, &config.server.host, config.server.port)?.await?;
    info!("Server stopped");
    Ok(())
}

/// Wire every component from configuration. Templates and the example bank
/// are read here, so a broken data file fails before the server binds.
pub async fn bootstrap(
    config: &AppConfig,
    llm_client: Arc<dyn LLMClient>,
    embedder: Arc<dyn TextEmbedder>,
) -> Result<Arc<SqlAssistant>> {
    let data = &config.data;
    let templates = PromptTemplates::new(
        load_template(&data.generation_policy_path)?,
        load_template(&data.synthesis_policy_path)?,
        load_template(&data.example_template_path)?,
    )?;
    let examples = load_examples(&data.examples_path)?;

    let retrieval = &config.retrieval;
    let store = ExampleStore::build(examples, embedder.as_ref(), retrieval.embed_fields).await?;
    let selector = Arc::new(ExampleSelector::new(Arc::new(store), embedder));
    let builder = Arc::new(FewShotPromptBuilder::new(templates, retrieval.row_limit));
    let generator = Arc::new(QueryGenerator::new(llm_client, config.llm.clone()));
    let synthesizer = AnswerSynthesizer::new(
        generator.clone(),
        builder.clone(),
        selector.clone(),
        SynthesisSettings {
            k: retrieval.synthesis_k,
            threshold: retrieval.synthesis_threshold,
            embed_fields: retrieval.embed_fields,
        },
    );
    let session = Arc::new(DbSession::new(config.database.clone()));

    info!(
        provider = ?config.llm.provider,
        model = %config.llm.model,
        k = retrieval.k,
        threshold = retrieval.threshold,
        replace_policy = ?config.database.replace_policy,
        "Assistant ready"
    );
    Ok(Arc::new(SqlAssistant::new(
        selector,
        builder,
        generator,
        synthesizer,
        session,
        RetrievalSettings {
            k: retrieval.k,
            threshold: retrieval.threshold,
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::use_cases::example_store::test_support::TopicEmbedder;
    use crate::application::use_cases::query_generator::test_support::FakeLLM;
    use crate::domain::error::AppError;
    use std::fs;
    use std::path::Path;

    fn write_data(dir: &Path, examples: &str) -> AppConfig {
        fs::write(dir.join("generation.txt"), "Write {dialect} SQL, at most {top_k} rows.").unwrap();
        fs::write(dir.join("synthesis.txt"), "Answer briefly.").unwrap();
        fs::write(dir.join("example.txt"), "{question}\n{sql_query}\n{sql_result}").unwrap();
        fs::write(dir.join("examples.json"), examples).unwrap();

        let mut config = AppConfig::default();
        config.data.generation_policy_path = dir.join("generation.txt");
        config.data.synthesis_policy_path = dir.join("synthesis.txt");
        config.data.example_template_path = dir.join("example.txt");
        config.data.examples_path = dir.join("examples.json");
        config
    }

    #[tokio::test]
    async fn test_bootstrap_from_data_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_data(
            dir.path(),
            r#"[{"question": "How many customers?", "sql_query": "SELECT COUNT(*) FROM customers", "sql_result": "42"}]"#,
        );
        let assistant = bootstrap(
            &config,
            Arc::new(FakeLLM::new(|_| Ok("Hello".to_string()))),
            Arc::new(TopicEmbedder::new(&["customers"])),
        )
        .await
        .unwrap();
        assert!(!assistant.session().is_active().await);
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_malformed_examples() {
        let dir = tempfile::tempdir().unwrap();
        let config = write_data(dir.path(), r#"[{"question": "How many customers?"}]"#);
        let result = bootstrap(
            &config,
            Arc::new(FakeLLM::new(|_| Ok("Hello".to_string()))),
            Arc::new(TopicEmbedder::new(&["customers"])),
        )
        .await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_data(dir.path(), "[]");
        config.data.synthesis_policy_path = dir.path().join("absent.txt");
        let result = bootstrap(
            &config,
            Arc::new(FakeLLM::new(|_| Ok("Hello".to_string()))),
            Arc::new(TopicEmbedder::new(&["customers"])),
        )
        .await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
