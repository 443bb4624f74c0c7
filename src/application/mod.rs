pub mod use_cases;

pub use use_cases::db_session::DbSession;
pub use use_cases::sql_assistant::SqlAssistant;
