use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::LoggingConfig;
use crate::infrastructure::storage::ensure_dir;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const LOG_FILE_PREFIX: &str = "askdb.log";

/// Stdout logging always; a daily-rotated file as well when `dir` is set.
/// `RUST_LOG` overrides the configured level.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let level = parse_log_level(&config.level)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let file_appender = match &config.dir {
        Some(dir) => {
            ensure_dir(dir)?;
            Some(tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX))
        }
        None => None,
    };

    let stdout = fmt::layer().with_target(true);
    let registry = Registry::default().with(filter).with(stdout);
    let initialized = match file_appender {
        Some(appender) => registry
            .with(fmt::layer().with_writer(appender).with_ansi(false).with_target(true))
            .try_init(),
        None => registry.try_init(),
    };
    initialized.map_err(|e| AppError::Internal(format!("Failed to install logger: {}", e)))?;

    info!(%level, file = ?config.dir, "Logging initialized");
    Ok(())
}

pub fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(AppError::Config(format!(
            "Invalid log level: {}. Use trace, debug, info, warn, or error",
            level
        ))),
    }
}
