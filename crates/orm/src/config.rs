//! ORM configuration
//!
//! Connection settings and relation-builder behaviour, loadable from the
//! environment the same way the rest of the framework reads its settings.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::backends::DatabaseBackendType;
use crate::error::ModelError;

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            expected: expected.into(),
        }
    }
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}

/// Connection pool settings
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    /// Seconds to wait for a free connection
    pub acquire_timeout: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: 30,
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a private in-memory SQLite database.
    ///
    /// Every SQLite connection to `:memory:` opens a fresh database, so the
    /// pool is pinned to exactly one connection that is never recycled.
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout: 30,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout)
    }

    /// Backend selected by the URL scheme
    pub fn backend_type(&self) -> Result<DatabaseBackendType, ConfigError> {
        let scheme = self
            .url
            .split(':')
            .next()
            .unwrap_or_default()
            .to_string();
        scheme.parse().map_err(|_| {
            ConfigError::invalid_value("database_url", &self.url, "postgres://... or sqlite:...")
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend_type()?;

        if self.backend_type()? == DatabaseBackendType::PostgreSQL {
            url::Url::parse(&self.url).map_err(|e| {
                ConfigError::invalid_value("database_url", &self.url, format!("a valid URL ({})", e))
            })?;
        }

        if self.max_connections == 0 {
            return Err(ConfigError::invalid_value(
                "max_connections",
                "0",
                "at least one connection",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::invalid_value(
                "min_connections",
                self.min_connections.to_string(),
                format!("no more than max_connections ({})", self.max_connections),
            ));
        }

        Ok(())
    }
}

/// Relation builder behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct OrmConfig {
    pub database: DatabaseConfig,
    /// Default chunk size for `batches`
    pub batch_size: usize,
    /// Reject, instead of ignoring with a warning, a custom order on `batches`
    pub error_on_ignored_order: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            batch_size: 1000,
            error_on_ignored_order: false,
        }
    }
}

impl OrmConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        match lookup("DATABASE_URL") {
            Some(url) => config.database.url = url,
            None => {
                return Err(ConfigError::MissingRequired {
                    field: "database_url".to_string(),
                    hint: "Set DATABASE_URL, e.g. postgres://localhost/folio or sqlite::memory:"
                        .to_string(),
                })
            }
        }

        if let Some(value) = lookup("DATABASE_MAX_CONNECTIONS") {
            config.database.max_connections = parse_field("max_connections", &value)?;
        }

        if let Some(value) = lookup("DATABASE_MIN_CONNECTIONS") {
            config.database.min_connections = parse_field("min_connections", &value)?;
        }

        if let Some(value) = lookup("DATABASE_ACQUIRE_TIMEOUT") {
            config.database.acquire_timeout = parse_field("acquire_timeout", &value)?;
        }

        if let Some(value) = lookup("ORM_BATCH_SIZE") {
            config.batch_size = parse_field("batch_size", &value)?;
        }

        if let Some(value) = lookup("ORM_ERROR_ON_IGNORED_ORDER") {
            config.error_on_ignored_order = parse_field("error_on_ignored_order", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        if self.batch_size == 0 {
            return Err(ConfigError::invalid_value("batch_size", "0", "a positive integer"));
        }
        Ok(())
    }
}

fn parse_field<T: std::str::FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::invalid_value(field, value, std::any::type_name::<T>().to_string())
    })
}
