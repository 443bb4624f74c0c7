//! Application configuration
//!
//! Sources are merged in order, later ones winning:
//! 1. `AppConfig::default()`
//! 2. a TOML file (`--config` path, `ASKDB_CONFIG`, or `./askdb.toml`)
//! 3. environment variables prefixed `ASKDB_`, `__` separating nested keys
//!    (e.g. `ASKDB_RETRIEVAL__THRESHOLD=0.5`)
//!
//! A `.env` file is read into the environment before any of this.

use crate::domain::error::{AppError, Result};
use crate::domain::example::EmbedFields;
use crate::domain::llm_config::{EmbeddingConfig, EmbeddingProvider, LLMConfig, LLMProvider};
use crate::infrastructure::security::keyring::resolve_secret;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const ENV_PREFIX: &str = "ASKDB_";
pub const DEFAULT_CONFIG_FILE: &str = "askdb.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Examples kept for SQL generation.
    pub k: usize,
    /// Minimum cosine similarity, applied after top-k.
    pub threshold: f32,
    /// Examples shown to the answer synthesizer; 0 disables them.
    pub synthesis_k: usize,
    /// Near-exact-match bar for synthesis examples.
    pub synthesis_threshold: f32,
    pub embed_fields: EmbedFields,
    /// Row cap the generation policy asks for (`{top_k}`).
    pub row_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: 3,
            threshold: 0.4,
            synthesis_k: 1,
            synthesis_threshold: 0.8,
            embed_fields: EmbedFields::All,
            row_limit: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub examples_path: PathBuf,
    pub generation_policy_path: PathBuf,
    pub synthesis_policy_path: PathBuf,
    pub example_template_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        let data_dir = PathBuf::from("data");
        Self {
            examples_path: data_dir.join("examples.json"),
            generation_policy_path: data_dir.join("generation_policy.txt"),
            synthesis_policy_path: data_dir.join("synthesis_policy.txt"),
            example_template_path: data_dir.join("example_template.txt"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReplacePolicy {
    /// Close the active connection and install the new one.
    #[default]
    Replace,
    /// Refuse to open while a connection is active.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
    pub max_connections: u32,
    pub sqlite_dir: PathBuf,
    pub replace_policy: ReplacePolicy,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            max_connections: 5,
            sqlite_dir: PathBuf::from("sqlite_dbs"),
            replace_policy: ReplacePolicy::Replace,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for a daily-rotated log file; stdout only when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LLMConfig,
    pub embedding: EmbeddingConfig,
    pub retrieval: RetrievalConfig,
    pub data: DataConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: Some(ENV_PREFIX.to_string()),
        }
    }

    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    pub fn load(&self) -> Result<AppConfig> {
        let _ = dotenvy::dotenv();

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = self.resolve_config_path() {
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = figment.merge(Toml::file(&path));
        }

        if let Some(prefix) = &self.env_prefix {
            figment = figment.merge(Env::prefixed(prefix).split("__"));
        }

        let mut config: AppConfig = figment.extract()?;
        resolve_credentials(&mut config)?;
        validate(&config)?;
        Ok(config)
    }

    fn resolve_config_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            return Some(path.clone());
        }
        if self.env_prefix.is_some() {
            if let Ok(path) = std::env::var(format!("{}CONFIG", ENV_PREFIX)) {
                return Some(PathBuf::from(path));
            }
        }
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_credentials(config: &mut AppConfig) -> Result<()> {
    config.llm.api_key = match config.llm.api_key.as_deref() {
        Some(reference) => Some(resolve_secret(reference)?),
        None if config.llm.provider == LLMProvider::OpenAI => std::env::var("OPENAI_API_KEY").ok(),
        None => None,
    };

    config.embedding.api_key = match config.embedding.api_key.as_deref() {
        Some(reference) => Some(resolve_secret(reference)?),
        None if config.embedding.provider == EmbeddingProvider::OpenAI => {
            config.llm.api_key.clone().or_else(|| std::env::var("OPENAI_API_KEY").ok())
        }
        None => None,
    };
    Ok(())
}

pub fn validate(config: &AppConfig) -> Result<()> {
    let retrieval = &config.retrieval;
    if retrieval.k == 0 {
        return Err(AppError::Config("retrieval.k must be at least 1".to_string()));
    }
    for (name, value) in [
        ("retrieval.threshold", retrieval.threshold),
        ("retrieval.synthesis_threshold", retrieval.synthesis_threshold),
    ] {
        if !(-1.0..=1.0).contains(&value) {
            return Err(AppError::Config(format!(
                "{} must be within [-1, 1], got {}",
                name, value
            )));
        }
    }

    if config.llm.model.trim().is_empty() {
        return Err(AppError::Config("llm.model must not be empty".to_string()));
    }
    if config.embedding.model.trim().is_empty() {
        return Err(AppError::Config("embedding.model must not be empty".to_string()));
    }
    if config.llm.provider.requires_api_key() && config.llm.api_key.is_none() {
        return Err(AppError::Config(format!(
            "llm provider {:?} requires an API key (llm.api_key or OPENAI_API_KEY)",
            config.llm.provider
        )));
    }
    if config.embedding.provider == EmbeddingProvider::OpenAI && config.embedding.api_key.is_none() {
        return Err(AppError::Config(
            "OpenAI embeddings require an API key (embedding.api_key or OPENAI_API_KEY)".to_string(),
        ));
    }

    for (name, value) in [
        ("llm.timeout_secs", config.llm.timeout_secs),
        ("embedding.timeout_secs", config.embedding.timeout_secs),
        ("database.connect_timeout_secs", config.database.connect_timeout_secs),
        ("database.query_timeout_secs", config.database.query_timeout_secs),
    ] {
        if value == 0 {
            return Err(AppError::Config(format!("{} must be positive", name)));
        }
    }
    if config.database.max_connections == 0 {
        return Err(AppError::Config(
            "database.max_connections must be positive".to_string(),
        ));
    }

    Ok(())
}
