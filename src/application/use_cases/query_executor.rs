use crate::domain::query_context::ExecutionOutcome;
use crate::infrastructure::db::SqlRunner;
use tracing::info;

/// Run extracted SQL. An empty statement never reaches the database, and a
/// rejected statement comes back as a `Failed` outcome instead of an error.
pub async fn execute(sql: &str, runner: &dyn SqlRunner) -> ExecutionOutcome {
    let sql = sql.trim();
    if sql.is_empty() {
        info!("No SQL to execute");
        return ExecutionOutcome::NoQuery;
    }

    let outcome = match runner.run(sql).await {
        Ok(text) => ExecutionOutcome::Success { text },
        Err(failure) => ExecutionOutcome::Failed {
            kind: failure.kind,
            message: failure.message,
        },
    };
    info!(outcome = outcome.label(), "Executed generated SQL");
    outcome
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::infrastructure::db::{DbFailure, SqlRunner};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every statement and answers from a fixed reply.
    pub struct ScriptedRunner {
        pub reply: std::result::Result<String, DbFailure>,
        pub seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub fn answering(reply: std::result::Result<String, DbFailure>) -> Self {
            Self {
                reply,
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SqlRunner for ScriptedRunner {
        async fn run(&self, sql: &str) -> std::result::Result<String, DbFailure> {
            self.seen.lock().unwrap().push(sql.to_string());
            self.reply.clone()
        }

        async fn table_info(&self) -> std::result::Result<String, DbFailure> {
            Ok(String::new())
        }
    }
}
