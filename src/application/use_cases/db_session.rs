//! Process-wide database session
//!
//! At most one connection is active. Handlers share the session by
//! reference; the lock serializes setup and teardown against queries.

use crate::domain::db_connection::{ConnectionDescriptor, ConnectionRequest};
use crate::domain::error::{AppError, Result};
use crate::infrastructure::config::{DatabaseConfig, ReplacePolicy};
use crate::infrastructure::db::{PoolSettings, SqlRunner, SqlxRunner};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Everything one question needs from the active connection, taken under a
/// single read of the session lock.
#[derive(Clone)]
pub struct ActiveSession {
    pub descriptor: ConnectionDescriptor,
    /// Schema text captured when the connection was opened.
    pub table_info: String,
    runner: Arc<SqlxRunner>,
}

impl ActiveSession {
    pub fn runner(&self) -> Arc<dyn SqlRunner> {
        self.runner.clone()
    }

    pub fn dialect(&self) -> &'static str {
        self.descriptor.kind.dialect()
    }
}

pub struct DbSession {
    active: RwLock<Option<ActiveSession>>,
    config: DatabaseConfig,
}

impl DbSession {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            active: RwLock::new(None),
            config,
        }
    }

    fn settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.config.max_connections,
            connect_timeout: Duration::from_secs(self.config.connect_timeout_secs),
            query_timeout: Duration::from_secs(self.config.query_timeout_secs),
        }
    }

    fn rejection(&self, current: &ActiveSession) -> AppError {
        AppError::ValidationError(format!(
            "A connection to {} is already active; close it first",
            current.descriptor.display()
        ))
    }

    /// Connect to the requested database. The previous connection, if any,
    /// stays in place until the new one has passed its health check. The
    /// lock is only held to swap the connection, never while connecting.
    pub async fn open(&self, request: &ConnectionRequest) -> Result<ConnectionDescriptor> {
        let descriptor = request.describe(&self.config.sqlite_dir)?;

        if self.config.replace_policy == ReplacePolicy::Reject {
            if let Some(current) = self.active.read().await.as_ref() {
                return Err(self.rejection(current));
            }
        }

        let runner = SqlxRunner::connect(&descriptor, self.settings()).await?;
        let table_info = match runner.table_info().await {
            Ok(text) => text,
            Err(failure) => {
                warn!(
                    target = %descriptor.display(),
                    error = %failure.message,
                    "Could not read schema; prompts will omit table info"
                );
                String::new()
            }
        };
        let opened = ActiveSession {
            descriptor: descriptor.clone(),
            table_info,
            runner: Arc::new(runner),
        };

        let mut active = self.active.write().await;
        if self.config.replace_policy == ReplacePolicy::Reject {
            if let Some(current) = active.as_ref() {
                let err = self.rejection(current);
                drop(active);
                opened.runner.close().await;
                return Err(err);
            }
        }
        let previous = active.replace(opened);
        drop(active);

        if let Some(previous) = previous {
            info!(
                from = %previous.descriptor.display(),
                to = %descriptor.display(),
                "Replacing active database connection"
            );
            previous.runner.close().await;
        } else {
            info!(target = %descriptor.display(), "Database connection opened");
        }
        Ok(descriptor)
    }

    pub async fn close(&self) -> Result<()> {
        let current = self.active.write().await.take().ok_or(AppError::NotConnected)?;
        current.runner.close().await;
        info!(target = %current.descriptor.display(), "Database connection closed");
        Ok(())
    }

    pub async fn is_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Snapshot of the active connection.
    pub async fn current(&self) -> Result<ActiveSession> {
        self.active.read().await.clone().ok_or(AppError::NotConnected)
    }
}
