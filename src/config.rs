//! Runtime configuration: checkpoint backend selection, default resilience
//! policy, and diagnostics bus sizing, resolved from the environment via
//! `dotenvy`.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CheckpointBackend {
    InMemory,
    #[cfg(feature = "sqlite")]
    Sqlite,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub checkpoint_backend: CheckpointBackend,
    pub sqlite_db_name: Option<String>,
    pub default_max_attempts: u32,
    pub default_step_timeout: Option<Duration>,
    pub diagnostics_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            checkpoint_backend: CheckpointBackend::InMemory,
            sqlite_db_name: Self::resolve_sqlite_db_name(None),
            default_max_attempts: 1,
            default_step_timeout: None,
            diagnostics_capacity: Self::DEFAULT_DIAGNOSTICS_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    pub const DEFAULT_DIAGNOSTICS_CAPACITY: usize = 1024;

    /// Reads `dotenv`-backed environment variables and applies them over
    /// the compiled-in defaults. Unset variables leave the default untouched.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        if let Ok(name) = std::env::var("FLOWLOOM_SQLITE_DB_NAME") {
            config.sqlite_db_name = Some(name);
        }
        #[cfg(feature = "sqlite")]
        if std::env::var("FLOWLOOM_CHECKPOINT_BACKEND").as_deref() == Ok("sqlite") {
            config.checkpoint_backend = CheckpointBackend::Sqlite;
        }
        if let Ok(attempts) = std::env::var("FLOWLOOM_DEFAULT_MAX_ATTEMPTS") {
            if let Ok(parsed) = attempts.parse() {
                config.default_max_attempts = parsed;
            }
        }
        if let Ok(capacity) = std::env::var("FLOWLOOM_DIAGNOSTICS_CAPACITY") {
            if let Ok(parsed) = capacity.parse() {
                config.diagnostics_capacity = parsed;
            }
        }
        config
    }

    fn resolve_sqlite_db_name(provided: Option<String>) -> Option<String> {
        if provided.is_some() {
            return provided;
        }
        dotenvy::dotenv().ok();
        Some(std::env::var("FLOWLOOM_SQLITE_DB_NAME").unwrap_or_else(|_| "flowloom.db".to_string()))
    }

    #[must_use]
    pub fn with_default_step_timeout(mut self, timeout: Duration) -> Self {
        self.default_step_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_in_memory_checkpointing() {
        let config = RuntimeConfig::default();
        assert_eq!(config.checkpoint_backend, CheckpointBackend::InMemory);
        assert_eq!(config.diagnostics_capacity, RuntimeConfig::DEFAULT_DIAGNOSTICS_CAPACITY);
    }

    #[test]
    fn builder_overrides_apply() {
        let config = RuntimeConfig::default()
            .with_diagnostics_capacity(16)
            .with_default_step_timeout(Duration::from_secs(5));
        assert_eq!(config.diagnostics_capacity, 16);
        assert_eq!(config.default_step_timeout, Some(Duration::from_secs(5)));
    }
}
