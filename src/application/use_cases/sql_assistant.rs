//! Question-to-answer pipeline
//!
//! question -> examples -> prompt -> completion -> SQL -> execution -> answer

use super::answer_synthesizer::AnswerSynthesizer;
use super::db_session::DbSession;
use super::example_selector::ExampleSelector;
use super::few_shot_prompt_builder::FewShotPromptBuilder;
use super::query_executor;
use super::query_generator::QueryGenerator;
use super::sql_extractor::extract_query;
use crate::domain::error::{AppError, Result};
use crate::domain::prompt::{ChatMessage, StructuredPrompt};
use crate::domain::query_context::QueryContext;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetrievalSettings {
    pub k: usize,
    pub threshold: f32,
}

pub struct SqlAssistant {
    selector: Arc<ExampleSelector>,
    builder: Arc<FewShotPromptBuilder>,
    generator: Arc<QueryGenerator>,
    synthesizer: AnswerSynthesizer,
    session: Arc<DbSession>,
    retrieval: RetrievalSettings,
}

impl SqlAssistant {
    pub fn new(
        selector: Arc<ExampleSelector>,
        builder: Arc<FewShotPromptBuilder>,
        generator: Arc<QueryGenerator>,
        synthesizer: AnswerSynthesizer,
        session: Arc<DbSession>,
        retrieval: RetrievalSettings,
    ) -> Self {
        Self {
            selector,
            builder,
            generator,
            synthesizer,
            session,
            retrieval,
        }
    }

    pub fn session(&self) -> &Arc<DbSession> {
        &self.session
    }

    /// Answer one question against the active connection. Execution failures
    /// end up in the answer; only connection, model and timeout problems are
    /// returned as errors.
    pub async fn ask(&self, question: &str) -> Result<QueryContext> {
        let started = Instant::now();
        let active = self.session.current().await?;

        let mut context = QueryContext::new(question);

        let selected = self
            .selector
            .select(question, self.retrieval.k, self.retrieval.threshold)
            .await?;
        context.selected_examples = selected.into_iter().map(|s| s.example).collect();

        let prompt = self
            .builder
            .generation_prompt(question, &context.selected_examples, active.dialect(), &active.table_info);
        let completion = self.generator.generate(&prompt).await?;
        context.generated_sql = extract_query(&completion);
        if context.generated_sql.is_empty() {
            warn!(request_id = %context.id, "No SQL extracted from completion");
        } else {
            info!(request_id = %context.id, sql = %context.generated_sql, "Extracted SQL");
        }

        let execution = query_executor::execute(&context.generated_sql, active.runner().as_ref()).await;
        let answer = self
            .synthesizer
            .synthesize(question, &context.generated_sql, &execution.result_text())
            .await?;

        context.execution = Some(execution);
        context.answer = Some(answer);
        info!(
            request_id = %context.id,
            examples = context.selected_examples.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Question answered"
        );
        Ok(context)
    }

    /// Send the model one greeting. A missing key and a rejected key are reported
    /// separately.
    pub async fn verify_llm(&self) -> Result<()> {
        let config = self.generator.config();
        if config.provider.requires_api_key()
            && config.api_key.as_deref().map_or(true, |k| k.trim().is_empty())
        {
            return Err(AppError::MissingApiKey(format!(
                "No API key configured for provider {:?}",
                config.provider
            )));
        }

        let mut greeting = StructuredPrompt::new();
        greeting.push(ChatMessage::user("Say Hello"));
        match self.generator.generate(&greeting).await {
            Ok(_) => Ok(()),
            Err(AppError::Timeout(msg)) => Err(AppError::Timeout(msg)),
            Err(AppError::MissingApiKey(msg)) => Err(AppError::MissingApiKey(msg)),
            Err(e) => Err(AppError::InvalidApiKey(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::answer_synthesizer::SynthesisSettings;
    use super::super::example_store::test_support::TopicEmbedder;
    use super::super::example_store::ExampleStore;
    use super::super::few_shot_prompt_builder::PromptTemplates;
    use super::super::query_generator::test_support::FakeLLM;
    use super::*;
    use crate::domain::db_connection::{ConnectionRequest, DbKind};
    use crate::domain::error::ConnectionErrorKind;
    use crate::domain::example::{EmbedFields, Example};
    use crate::domain::llm_config::{LLMConfig, LLMProvider};
    use crate::domain::prompt::Role;
    use crate::domain::query_context::{ExecutionFailureKind, ExecutionOutcome, NO_QUERY_RESULT};
    use crate::infrastructure::config::DatabaseConfig;

    const VOCAB: &[&str] = &["customers", "orders", "products", "rows", "table"];

    /// Replies to generation prompts (system turn mentions the dialect) with
    /// `generation`, and to synthesis prompts by echoing the SQL result line.
    fn scripted(generation: &'static str) -> FakeLLM {
        FakeLLM::new(move |messages| {
            if messages[0].content.contains("SQLite") {
                return Ok(generation.to_string());
            }
            let user = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            let result = user
                .lines()
                .find_map(|l| l.strip_prefix("SQL Result: "))
                .unwrap_or_default()
                .to_string();
            if result == NO_QUERY_RESULT {
                Ok("I could not answer that question from the database.".to_string())
            } else if let Some(err) = result.strip_prefix("Error: ") {
                Ok(format!("The query failed: {}", err))
            } else {
                Ok(format!("The answer is {}.", result))
            }
        })
    }

    async fn assistant(llm: Arc<FakeLLM>, examples: Vec<Example>, config: LLMConfig) -> SqlAssistant {
        let embedder = Arc::new(TopicEmbedder::new(VOCAB));
        let store = ExampleStore::build(examples, embedder.as_ref(), EmbedFields::All)
            .await
            .unwrap();
        let selector = Arc::new(ExampleSelector::new(Arc::new(store), embedder));
        let templates = PromptTemplates::new(
            "You are a {dialect} expert. Reply with one ```sql block or '{invalid}'.\nTables:\n{table_info}",
            "Answer in one sentence.",
            "```sql\n{sql_query}\n```\nResult: {sql_result}\nQuestion was: {question}",
        )
        .unwrap();
        let builder = Arc::new(FewShotPromptBuilder::new(templates, 5));
        let generator = Arc::new(QueryGenerator::new(llm, config));
        let synthesizer = AnswerSynthesizer::new(
            generator.clone(),
            builder.clone(),
            selector.clone(),
            SynthesisSettings {
                k: 1,
                threshold: 0.8,
                embed_fields: EmbedFields::Question,
            },
        );
        let session = Arc::new(DbSession::new(DatabaseConfig::default()));
        SqlAssistant::new(
            selector,
            builder,
            generator,
            synthesizer,
            session,
            RetrievalSettings { k: 3, threshold: 0.4 },
        )
    }

    async fn connect(assistant: &SqlAssistant, seed: &[&str]) {
        assistant
            .session()
            .open(&ConnectionRequest {
                dbms: Some(DbKind::Sqlite),
                file_path: Some(":memory:".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        let runner = assistant.session().current().await.unwrap().runner();
        for sql in seed {
            runner.run(sql).await.unwrap();
        }
    }

    fn customers_example() -> Example {
        Example::new(
            "How many rows are in the customers table?",
            "SELECT COUNT(*) FROM customers",
            "42",
        )
    }

    #[tokio::test]
    async fn test_identical_example_drives_generation_and_answer() {
        let llm = Arc::new(scripted("```sql\nSELECT COUNT(*) AS n FROM customers\n```"));
        let assistant = assistant(llm.clone(), vec![customers_example()], LLMConfig::default()).await;
        let mut seed = vec!["CREATE TABLE customers (id INTEGER PRIMARY KEY)".to_string()];
        seed.extend((1..=42).map(|i| format!("INSERT INTO customers (id) VALUES ({})", i)));
        let seed: Vec<&str> = seed.iter().map(String::as_str).collect();
        connect(&assistant, &seed).await;

        let context = assistant
            .ask("How many rows are in the customers table?")
            .await
            .unwrap();

        assert_eq!(context.selected_examples, vec![customers_example()]);
        assert_eq!(context.generated_sql, "SELECT COUNT(*) AS n FROM customers");
        assert_eq!(
            context.execution,
            Some(ExecutionOutcome::Success {
                text: r#"{"columns":["n"],"rows":[[42]]}"#.to_string()
            })
        );
        assert!(context.answer.unwrap().contains("42"));

        let prompts = llm.prompts.lock().unwrap();
        let generation = &prompts[0];
        assert_eq!(generation[1].role, Role::User);
        assert_eq!(generation[1].content, "How many rows are in the customers table?");
        assert_eq!(generation[2].role, Role::Assistant);
    }

    #[tokio::test]
    async fn test_generation_prompt_lists_connected_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shop.db");
        std::fs::File::create(&path).unwrap();
        let request = ConnectionRequest {
            dbms: Some(DbKind::Sqlite),
            file_path: Some(path.display().to_string()),
            ..Default::default()
        };

        let llm = Arc::new(scripted("```sql\nSELECT COUNT(*) AS n FROM customers\n```"));
        let assistant = assistant(llm.clone(), vec![], LLMConfig::default()).await;
        assistant.session().open(&request).await.unwrap();
        assistant
            .session()
            .current()
            .await
            .unwrap()
            .runner()
            .run("CREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        assistant.session().open(&request).await.unwrap();

        let context = assistant.ask("How many customers are there?").await.unwrap();
        assert_eq!(
            context.execution,
            Some(ExecutionOutcome::Success {
                text: r#"{"columns":["n"],"rows":[[0]]}"#.to_string()
            })
        );

        let prompts = llm.prompts.lock().unwrap();
        let system = &prompts[0][0].content;
        assert!(system.contains("Tables:\nCREATE TABLE customers (id INTEGER PRIMARY KEY, name TEXT)"));
    }

    #[tokio::test]
    async fn test_completion_without_fence_never_hits_database() {
        let llm = Arc::new(scripted("I am not sure what you mean."));
        let assistant = assistant(llm, vec![customers_example()], LLMConfig::default()).await;
        connect(&assistant, &[]).await;

        let context = assistant.ask("What is the weather like?").await.unwrap();
        assert!(context.generated_sql.is_empty());
        assert_eq!(context.execution, Some(ExecutionOutcome::NoQuery));
        assert!(context.answer.unwrap().contains("could not answer"));
    }

    #[tokio::test]
    async fn test_decline_literal_counts_as_no_query() {
        let llm = Arc::new(scripted("```sql\nInvalid question. No SQL query generated\n```"));
        let assistant = assistant(llm, vec![], LLMConfig::default()).await;
        connect(&assistant, &[]).await;

        let context = assistant.ask("Drop everything please").await.unwrap();
        assert_eq!(context.execution, Some(ExecutionOutcome::NoQuery));
    }

    #[tokio::test]
    async fn test_missing_table_is_explained_not_raised() {
        let llm = Arc::new(scripted("```sql\nSELECT * FROM orders\n```"));
        let assistant = assistant(llm, vec![customers_example()], LLMConfig::default()).await;
        connect(&assistant, &[]).await;

        let context = assistant.ask("List all orders").await.unwrap();
        match context.execution {
            Some(ExecutionOutcome::Failed { kind, ref message }) => {
                assert_eq!(kind, ExecutionFailureKind::MissingObject);
                assert!(message.contains("no such table"));
            }
            ref other => panic!("unexpected outcome {:?}", other),
        }
        let answer = context.answer.unwrap();
        assert!(answer.starts_with("The query failed"));
        assert_eq!(answer.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_ask_requires_connection() {
        let llm = Arc::new(scripted("```sql\nSELECT 1\n```"));
        let assistant = assistant(llm.clone(), vec![], LLMConfig::default()).await;
        assert!(matches!(
            assistant.ask("How many customers?").await,
            Err(AppError::NotConnected)
        ));
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_setup_failures_are_classified_separately() {
        let llm = Arc::new(scripted(""));
        let assistant = assistant(llm, vec![], LLMConfig::default()).await;
        let dir = tempfile::tempdir().unwrap();

        let malformed = ConnectionRequest {
            dbms: Some(DbKind::PostgreSql),
            user: Some("analyst".to_string()),
            ..Default::default()
        };
        let missing_db = ConnectionRequest {
            dbms: Some(DbKind::Sqlite),
            file_path: Some(dir.path().join("absent.db").display().to_string()),
            ..Default::default()
        };
        let wrong_password = sqlx::Error::Database(Box::new(AuthFailure));

        let malformed = assistant.session().open(&malformed).await.unwrap_err();
        let missing_db = assistant.session().open(&missing_db).await.unwrap_err();
        let auth = crate::infrastructure::db::classify_connect_error(DbKind::PostgreSql, &wrong_password);

        assert_eq!(malformed.connection_kind(), Some(ConnectionErrorKind::MalformedTarget));
        assert_eq!(missing_db.connection_kind(), Some(ConnectionErrorKind::UnknownDatabase));
        assert_eq!(auth, ConnectionErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_verify_llm_distinguishes_missing_and_invalid_keys() {
        let llm = Arc::new(scripted("Hello"));
        let keyless = LLMConfig {
            provider: LLMProvider::OpenAI,
            api_key: None,
            ..LLMConfig::default()
        };
        let assistant_missing = assistant(llm, vec![], keyless).await;
        assert!(matches!(
            assistant_missing.verify_llm().await,
            Err(AppError::MissingApiKey(_))
        ));

        let rejecting = Arc::new(FakeLLM::new(|_| {
            Err(AppError::LLMError("API error (400): bad key".to_string()))
        }));
        let keyed = LLMConfig {
            api_key: Some("sk-wrong".to_string()),
            ..LLMConfig::default()
        };
        let assistant_invalid = assistant(rejecting, vec![], keyed.clone()).await;
        assert!(matches!(
            assistant_invalid.verify_llm().await,
            Err(AppError::InvalidApiKey(_))
        ));

        let accepting = Arc::new(FakeLLM::new(|_| Ok("Hello!".to_string())));
        let assistant_ok = assistant(accepting, vec![], keyed).await;
        assert!(assistant_ok.verify_llm().await.is_ok());
    }

    /// PostgreSQL's invalid_password error as the driver would surface it.
    #[derive(Debug)]
    struct AuthFailure;

    impl std::fmt::Display for AuthFailure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("password authentication failed for user \"analyst\"")
        }
    }

    impl std::error::Error for AuthFailure {}

    impl sqlx::error::DatabaseError for AuthFailure {
        fn message(&self) -> &str {
            "password authentication failed for user \"analyst\""
        }

        fn code(&self) -> Option<std::borrow::Cow<'_, str>> {
            Some("28P01".into())
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }
}
