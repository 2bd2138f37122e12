//! Database Integration - pool construction
//!
//! Opens the sqlx-backed pool matching a [`DatabaseConfig`] and hands it out as
//! a shared [`DatabasePool`] trait object.

use std::sync::Arc;

use tracing::info;

use crate::backends::{DatabaseBackendType, DatabasePool, PostgresPool, SqlitePool};
use crate::config::DatabaseConfig;
use crate::error::ModelResult;

/// Open a connection pool, choosing the backend from the URL scheme
pub async fn connect(config: &DatabaseConfig) -> ModelResult<Arc<dyn DatabasePool>> {
    config.validate()?;

    let backend = config.backend_type()?;
    let pool: Arc<dyn DatabasePool> = match backend {
        DatabaseBackendType::PostgreSQL => Arc::new(PostgresPool::connect(config).await?),
        DatabaseBackendType::SQLite => Arc::new(SqlitePool::connect(config).await?),
    };

    info!(
        backend = %backend,
        max_connections = config.max_connections,
        "Database pool ready"
    );
    Ok(pool)
}

/// Open a pool for a bare URL with default pool sizing
pub async fn connect_url(database_url: &str) -> ModelResult<Arc<dyn DatabasePool>> {
    let config = DatabaseConfig {
        url: database_url.to_string(),
        ..DatabaseConfig::default()
    };
    connect(&config).await
}
