use crate::domain::error::{AppError, Result};
use keyring::Entry;

const KEYCHAIN_USER: &str = "askdb";

pub struct KeyringManager {
    service: String,
}

impl KeyringManager {
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    pub fn get_secret(&self, key: &str) -> Result<String> {
        let entry = Entry::new(&self.service, key)
            .map_err(|e| AppError::Config(format!("Failed to create keychain entry: {}", e)))?;

        entry
            .get_password()
            .map_err(|e| AppError::Config(format!("Failed to read secret '{}': {}", key, e)))
    }
}

/// Resolve a secret reference.
///
/// - `env:NAME` reads the environment variable `NAME`
/// - `keychain:NAME` reads `NAME` from the OS keychain
/// - `plain:value` and anything else is taken literally
pub fn resolve_secret(reference: &str) -> Result<String> {
    if let Some(name) = reference.strip_prefix("env:") {
        std::env::var(name).map_err(|_| {
            AppError::Config(format!("Environment variable '{}' is not set", name))
        })
    } else if let Some(name) = reference.strip_prefix("keychain:") {
        KeyringManager::new(name).get_secret(KEYCHAIN_USER)
    } else if let Some(value) = reference.strip_prefix("plain:") {
        Ok(value.to_string())
    } else {
        Ok(reference.to_string())
    }
}
