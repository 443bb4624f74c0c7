//! sqlx adapter for user databases
//!
//! One `AnyPool` per session, covering MySQL, PostgreSQL and SQLite. Driver
//! errors are classified from vendor codes here so nothing upstream has to
//! read driver messages.

use crate::domain::db_connection::{ConnectionDescriptor, DbKind};
use crate::domain::error::{AppError, ConnectionErrorKind, Result};
use crate::domain::query_context::ExecutionFailureKind;
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::error::{DatabaseError, ErrorKind};
use sqlx::mysql::MySqlDatabaseError;
use sqlx::{AnyPool, Column, Row};
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info, warn};

static INSTALL_DRIVERS: Once = Once::new();

const SQLITE_TABLES: &str = "SELECT sql FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' AND sql IS NOT NULL ORDER BY name";

// search_path carries the requested schema, so current_schema() honors it
const POSTGRES_COLUMNS: &str = "SELECT table_name::text, column_name::text, data_type::text \
     FROM information_schema.columns WHERE table_schema = current_schema() \
     ORDER BY table_name, ordinal_position";

const MYSQL_COLUMNS: &str = "SELECT CAST(table_name AS CHAR), CAST(column_name AS CHAR), \
     CAST(column_type AS CHAR) FROM information_schema.columns \
     WHERE table_schema = DATABASE() ORDER BY table_name, ordinal_position";

const READ_KEYWORDS: [&str; 8] = [
    "SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "PRAGMA", "VALUES",
];

/// A statement the database refused, already classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFailure {
    pub kind: ExecutionFailureKind,
    pub message: String,
}

impl DbFailure {
    pub fn new(kind: ExecutionFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Runs one SQL statement and renders its outcome as text.
#[async_trait]
pub trait SqlRunner: Send + Sync {
    async fn run(&self, sql: &str) -> std::result::Result<String, DbFailure>;

    /// `CREATE TABLE` text for every table the connection can see.
    async fn table_info(&self) -> std::result::Result<String, DbFailure>;
}

#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

pub struct SqlxRunner {
    pool: AnyPool,
    kind: DbKind,
    query_timeout: Duration,
}

impl SqlxRunner {
    /// Connect and run a `SELECT 1` health check. Failures are classified
    /// into connection error kinds.
    pub async fn connect(descriptor: &ConnectionDescriptor, settings: PoolSettings) -> Result<Self> {
        INSTALL_DRIVERS.call_once(sqlx::any::install_default_drivers);

        // every in-memory SQLite connection is its own database
        let max_connections = if descriptor.is_in_memory() {
            1
        } else {
            settings.max_connections
        };
        let mut options = AnyPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(settings.connect_timeout);
        if descriptor.is_in_memory() {
            options = options.idle_timeout(None).max_lifetime(None);
        }

        let kind = descriptor.kind;
        let pool = tokio::time::timeout(settings.connect_timeout, options.connect(descriptor.url()))
            .await
            .map_err(|_| {
                AppError::connection(
                    ConnectionErrorKind::HostAccess,
                    format!(
                        "Connection to {} timed out after {}s",
                        descriptor.display(),
                        settings.connect_timeout.as_secs()
                    ),
                )
            })?
            .map_err(|e| connect_error(kind, &e))?;

        if let Err(e) = sqlx::query("SELECT 1").fetch_one(&pool).await {
            pool.close().await;
            return Err(connect_error(kind, &e));
        }

        info!(target = %descriptor.display(), "Database pool ready");
        Ok(Self {
            pool,
            kind,
            query_timeout: settings.query_timeout,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn timeout_failure(&self) -> DbFailure {
        DbFailure::new(
            ExecutionFailureKind::Timeout,
            format!(
                "Query timed out after {} seconds",
                self.query_timeout.as_secs()
            ),
        )
    }

    async fn describe_tables(&self) -> std::result::Result<String, sqlx::Error> {
        let query = match self.kind {
            DbKind::Sqlite => {
                let rows = sqlx::query(SQLITE_TABLES).fetch_all(&self.pool).await?;
                let mut statements = Vec::with_capacity(rows.len());
                for row in &rows {
                    statements.push(row.try_get::<String, _>(0)?.trim().to_string());
                }
                return Ok(statements.join("\n\n"));
            }
            DbKind::PostgreSql => POSTGRES_COLUMNS,
            DbKind::MySql => MYSQL_COLUMNS,
        };

        let rows = sqlx::query(query).fetch_all(&self.pool).await?;
        let mut columns = Vec::with_capacity(rows.len());
        for row in &rows {
            columns.push((
                row.try_get::<String, _>(0)?,
                row.try_get::<String, _>(1)?,
                row.try_get::<String, _>(2)?,
            ));
        }
        Ok(render_table_info(&columns))
    }

    async fn fetch_rows(&self, sql: &str) -> std::result::Result<String, sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        Ok(render_rows(&rows))
    }

    async fn execute_statement(&self, sql: &str) -> std::result::Result<String, sqlx::Error> {
        let result = sqlx::query(sql).execute(&self.pool).await?;
        Ok(format!(
            "Query executed successfully. {} row(s) affected.",
            result.rows_affected()
        ))
    }
}

#[async_trait]
impl SqlRunner for SqlxRunner {
    async fn run(&self, sql: &str) -> std::result::Result<String, DbFailure> {
        let outcome = if is_read_statement(sql) {
            tokio::time::timeout(self.query_timeout, self.fetch_rows(sql)).await
        } else {
            tokio::time::timeout(self.query_timeout, self.execute_statement(sql)).await
        };

        match outcome {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                let failure = execution_failure(self.kind, &e);
                warn!(kind = failure.kind.as_str(), "Statement rejected by database");
                Err(failure)
            }
            Err(_) => Err(self.timeout_failure()),
        }
    }

    async fn table_info(&self) -> std::result::Result<String, DbFailure> {
        match tokio::time::timeout(self.query_timeout, self.describe_tables()).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(execution_failure(self.kind, &e)),
            Err(_) => Err(self.timeout_failure()),
        }
    }
}

/// Group `(table, column, type)` rows, already ordered by table, into one
/// `CREATE TABLE` block per table.
pub fn render_table_info(columns: &[(String, String, String)]) -> String {
    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<&str> = None;
    let mut lines: Vec<String> = Vec::new();

    for (table, column, data_type) in columns {
        if current != Some(table.as_str()) {
            if let Some(name) = current {
                blocks.push(format!("CREATE TABLE {} (\n{}\n)", name, lines.join(",\n")));
                lines.clear();
            }
            current = Some(table);
        }
        lines.push(format!("\t{} {}", column, data_type));
    }
    if let Some(name) = current {
        blocks.push(format!("CREATE TABLE {} (\n{}\n)", name, lines.join(",\n")));
    }
    blocks.join("\n\n")
}

/// Whether the statement produces rows, judged by its first keyword after
/// leading comments and parentheses.
pub fn is_read_statement(sql: &str) -> bool {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map(|(_, tail)| tail).unwrap_or("").trim_start();
        } else if let Some(after) = rest.strip_prefix('(') {
            rest = after.trim_start();
        } else {
            break;
        }
    }
    let keyword: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    READ_KEYWORDS.contains(&keyword.as_str())
}

/// Compact JSON: `{"columns":[...],"rows":[[...],...]}`.
pub fn render_rows(rows: &[AnyRow]) -> String {
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();
    let values: Vec<Value> = rows
        .iter()
        .map(|row| Value::Array((0..row.len()).map(|i| extract_column_value(row, i)).collect()))
        .collect();
    json!({ "columns": columns, "rows": values }).to_string()
}

fn extract_column_value(row: &AnyRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
        return v.map(|n| Value::Number(n.into())).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::Bool).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::String).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(index) {
        return v
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null);
    }
    debug!(index, "Unsupported column type rendered as null");
    Value::Null
}

/// Vendor error code as text: MySQL's error number, SQLSTATE for
/// PostgreSQL, the result code for SQLite.
fn vendor_code(kind: DbKind, err: &dyn DatabaseError) -> Option<String> {
    if kind == DbKind::MySql {
        if let Some(mysql) = err.try_downcast_ref::<MySqlDatabaseError>() {
            return Some(mysql.number().to_string());
        }
    }
    err.code().map(|c| c.into_owned())
}

fn connect_error(kind: DbKind, err: &sqlx::Error) -> AppError {
    let classified = classify_connect_error(kind, err);
    warn!(dbms = %kind, kind = classified.as_str(), "Connection setup failed");
    AppError::connection(classified, err.to_string())
}

pub fn classify_connect_error(kind: DbKind, err: &sqlx::Error) -> ConnectionErrorKind {
    match err {
        sqlx::Error::Configuration(_) => ConnectionErrorKind::MalformedTarget,
        sqlx::Error::Database(db) => vendor_code(kind, db.as_ref())
            .and_then(|code| classify_connect_code(kind, &code))
            .unwrap_or(ConnectionErrorKind::HostAccess),
        _ => ConnectionErrorKind::HostAccess,
    }
}

pub fn classify_connect_code(kind: DbKind, code: &str) -> Option<ConnectionErrorKind> {
    use ConnectionErrorKind::*;
    match kind {
        DbKind::MySql => match code {
            "1045" => Some(Authentication),
            "1049" | "1044" => Some(UnknownDatabase),
            "1130" | "2003" | "2005" => Some(HostAccess),
            _ => None,
        },
        DbKind::PostgreSql => match code {
            "28P01" | "28000" => Some(Authentication),
            "3D000" | "3F000" => Some(UnknownDatabase),
            _ => None,
        },
        DbKind::Sqlite => match code.parse::<i32>().ok()? & 0xff {
            23 => Some(Authentication),
            14 => Some(UnknownDatabase),
            _ => None,
        },
    }
}

pub fn execution_failure(kind: DbKind, err: &sqlx::Error) -> DbFailure {
    let message = match err {
        sqlx::Error::Database(db) => db.message().to_string(),
        other => other.to_string(),
    };
    DbFailure::new(classify_execution_error(kind, err), message)
}

pub fn classify_execution_error(kind: DbKind, err: &sqlx::Error) -> ExecutionFailureKind {
    let db = match err {
        sqlx::Error::Database(db) => db,
        _ => return ExecutionFailureKind::Other,
    };
    match db.kind() {
        ErrorKind::UniqueViolation
        | ErrorKind::ForeignKeyViolation
        | ErrorKind::NotNullViolation
        | ErrorKind::CheckViolation => return ExecutionFailureKind::Constraint,
        _ => {}
    }
    let code = vendor_code(kind, db.as_ref()).unwrap_or_default();
    classify_execution_code(kind, &code, db.message())
}

pub fn classify_execution_code(kind: DbKind, code: &str, message: &str) -> ExecutionFailureKind {
    use ExecutionFailureKind::*;
    match kind {
        DbKind::PostgreSql => match code {
            "42601" => Syntax,
            "42501" => Permission,
            "42P01" | "42703" | "42883" | "3F000" => MissingObject,
            "57014" => Timeout,
            c if c.starts_with("23") => Constraint,
            _ => Other,
        },
        DbKind::MySql => match code {
            "1064" | "1149" => Syntax,
            "1142" | "1143" | "1044" | "1227" => Permission,
            "1062" | "1048" | "1216" | "1217" | "1451" | "1452" | "3819" => Constraint,
            "1146" | "1054" | "1305" => MissingObject,
            "3024" => Timeout,
            _ => Other,
        },
        DbKind::Sqlite => {
            let primary = code.parse::<i32>().map(|c| c & 0xff).unwrap_or(1);
            let lower = message.to_lowercase();
            match primary {
                19 => Constraint,
                3 | 8 | 23 => Permission,
                _ if lower.contains("syntax error") || lower.contains("incomplete input") => Syntax,
                _ if lower.starts_with("no such ") => MissingObject,
                _ if lower.contains("constraint failed") => Constraint,
                _ => Other,
            }
        }
    }
}
