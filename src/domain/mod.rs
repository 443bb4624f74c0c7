pub mod db_connection;
pub mod error;
pub mod example;
pub mod llm_config;
pub mod prompt;
pub mod query_context;
