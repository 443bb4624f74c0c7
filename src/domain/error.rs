use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a connection setup attempt failed. Each kind maps to a distinct
/// corrective message for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionErrorKind {
    MalformedTarget,
    Authentication,
    HostAccess,
    UnknownDatabase,
}

impl ConnectionErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionErrorKind::MalformedTarget => "malformed_target",
            ConnectionErrorKind::Authentication => "authentication",
            ConnectionErrorKind::HostAccess => "host_access",
            ConnectionErrorKind::UnknownDatabase => "unknown_database",
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ConnectionErrorKind::MalformedTarget => {
                "The connection details are incomplete or malformed. Please check the database type, host, port and database name."
            }
            ConnectionErrorKind::Authentication => {
                "Authentication failed. Please ensure that username and password are correct."
            }
            ConnectionErrorKind::HostAccess => {
                "Unable to reach the database server with the specified host and port. Please check that both are valid and that the current user may connect from this host."
            }
            ConnectionErrorKind::UnknownDatabase => {
                "Database not found. Please ensure that the database name is correct or check privileges of current user."
            }
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub enum AppError {
    Config(String),
    Connection(ConnectionErrorKind, String),
    NotConnected,
    MissingApiKey(String),
    InvalidApiKey(String),
    LLMError(String),
    Timeout(String),
    ValidationError(String),
    ParseError(String),
    IoError(String),
    Internal(String),
}

impl AppError {
    pub fn connection(kind: ConnectionErrorKind, detail: impl Into<String>) -> Self {
        AppError::Connection(kind, detail.into())
    }

    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            AppError::Connection(kind, _) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Connection(kind, msg) => {
                write!(f, "Connection error ({}): {}", kind.as_str(), msg)
            }
            AppError::NotConnected => write!(f, "No active database connection"),
            AppError::MissingApiKey(msg) => write!(f, "API key not found: {}", msg),
            AppError::InvalidApiKey(msg) => write!(f, "Invalid API key: {}", msg),
            AppError::LLMError(msg) => write!(f, "LLM error: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timed out: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
