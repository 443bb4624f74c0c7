pub mod answer_synthesizer;
pub mod db_session;
pub mod embedding_service;
pub mod example_selector;
pub mod example_store;
pub mod few_shot_prompt_builder;
pub mod query_executor;
pub mod query_generator;
pub mod sql_assistant;
pub mod sql_extractor;
