//! SQLite Backend Implementation
//!
//! SQLite implementation of the backend traits on top of sqlx. Used for local
//! development and the test suite (an in-memory database on a single pinned
//! connection).

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Pool, Row as SqlxRow, Sqlite, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use super::core::*;
use super::DatabaseBackendType;
use crate::config::DatabaseConfig;
use crate::error::{OrmError, OrmResult};

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite connection pool implementation
#[derive(Debug, Clone)]
pub struct SqlitePool {
    pool: Pool<Sqlite>,
    statistics: Arc<QueryStatistics>,
}

impl SqlitePool {
    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| OrmError::Connection(format!("Invalid SQLite URL: {}", e)))?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create SQLite pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    /// Private in-memory database, one connection
    pub async fn in_memory() -> OrmResult<Self> {
        Self::connect(&DatabaseConfig::in_memory()).await
    }

    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            statistics: Arc::new(QueryStatistics::new()),
        }
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseExecutor for SqlitePool {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn in_transaction(&self) -> bool {
        false
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let started = Instant::now();
        self.statistics.record_statement();
        let result = bind_all(sqlx::query(sql), params)?
            .execute(&self.pool)
            .await
            .map_err(|e| OrmError::Database(format!("Statement execution failed: {}", e)))?;
        debug!(sql, binds = params.len(), elapsed_us = started.elapsed().as_micros() as u64, "executed");
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let started = Instant::now();
        self.statistics.record_statement();
        let rows = bind_all(sqlx::query(sql), params)?
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OrmError::Database(format!("Query fetch failed: {}", e)))?;
        debug!(sql, binds = params.len(), rows = rows.len(), elapsed_us = started.elapsed().as_micros() as u64, "fetched");
        Ok(rows.into_iter().map(|row| Box::new(SqliteRowAdapter::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabasePool for SqlitePool {
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        self.statistics.record_begin();
        debug!("Transaction started");
        Ok(Box::new(SqliteTransaction {
            tx: Mutex::new(Some(tx)),
            statistics: Arc::clone(&self.statistics),
        }))
    }

    async fn execute_script(&self, script: &str) -> OrmResult<()> {
        sqlx::Executor::execute(&self.pool, script)
            .await
            .map_err(|e| OrmError::Database(format!("Script execution failed: {}", e)))?;
        Ok(())
    }

    async fn close(&self) -> OrmResult<()> {
        self.pool.close().await;
        Ok(())
    }

    fn statistics(&self) -> Arc<QueryStatistics> {
        Arc::clone(&self.statistics)
    }

    fn backend_type(&self) -> DatabaseBackendType {
        DatabaseBackendType::SQLite
    }
}

/// SQLite transaction implementation
pub struct SqliteTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Sqlite>>>,
    statistics: Arc<QueryStatistics>,
}

#[async_trait]
impl DatabaseExecutor for SqliteTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn in_transaction(&self) -> bool {
        true
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let mut guard = self.tx.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        self.statistics.record_statement();
        let result = bind_all(sqlx::query(sql), params)?
            .execute(&mut **tx)
            .await
            .map_err(|e| OrmError::Database(format!("Statement execution failed: {}", e)))?;
        debug!(sql, binds = params.len(), "executed in transaction");
        Ok(result.rows_affected())
    }

    async fn fetch_all(&self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<Box<dyn DatabaseRow>>> {
        let mut guard = self.tx.lock().await;
        let tx = guard
            .as_mut()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        self.statistics.record_statement();
        let rows = bind_all(sqlx::query(sql), params)?
            .fetch_all(&mut **tx)
            .await
            .map_err(|e| OrmError::Database(format!("Query fetch failed: {}", e)))?;
        debug!(sql, binds = params.len(), rows = rows.len(), "fetched in transaction");
        Ok(rows.into_iter().map(|row| Box::new(SqliteRowAdapter::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabaseTransaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        tx.commit()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction commit failed: {}", e)))?;
        self.statistics.record_commit();
        debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> OrmResult<()> {
        let tx = self
            .tx
            .lock()
            .await
            .take()
            .ok_or_else(|| OrmError::Transaction("Transaction already completed".to_string()))?;
        tx.rollback()
            .await
            .map_err(|e| OrmError::Transaction(format!("Transaction rollback failed: {}", e)))?;
        self.statistics.record_rollback();
        debug!("Transaction rolled back");
        Ok(())
    }
}

/// SQLite row implementation
pub struct SqliteRowAdapter {
    row: SqliteRow,
}

impl SqliteRowAdapter {
    pub fn new(row: SqliteRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for SqliteRowAdapter {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        sqlite_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| OrmError::Database(format!("Column '{}' not found", name)))?;
        sqlite_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn bind_all<'q>(mut query: SqliteQuery<'q>, params: &[DatabaseValue]) -> OrmResult<SqliteQuery<'q>> {
    for param in params {
        query = bind_database_value(query, param)?;
    }
    Ok(query)
}

fn bind_database_value<'q>(query: SqliteQuery<'q>, value: &DatabaseValue) -> OrmResult<SqliteQuery<'q>> {
    match value {
        DatabaseValue::Null => Ok(query.bind(Option::<String>::None)),
        DatabaseValue::Bool(b) => Ok(query.bind(*b)),
        DatabaseValue::Int32(i) => Ok(query.bind(*i)),
        DatabaseValue::Int64(i) => Ok(query.bind(*i)),
        DatabaseValue::Float64(f) => Ok(query.bind(*f)),
        DatabaseValue::String(s) => Ok(query.bind(s.clone())),
        DatabaseValue::Bytes(b) => Ok(query.bind(b.clone())),
        DatabaseValue::DateTime(dt) => Ok(query.bind(*dt)),
        DatabaseValue::Date(d) => Ok(query.bind(*d)),
        DatabaseValue::Json(j) => Ok(query.bind(sqlx::types::Json(j.clone()))),
        DatabaseValue::Array(_) => Err(OrmError::InvalidQuery(
            "Array values cannot be bound as a single parameter".to_string(),
        )),
    }
}

/// Convert a SQLite column value to DatabaseValue.
///
/// SQLite values carry a storage class rather than a declared type, so
/// expression columns (aggregates, aliases) fall back to probing integer,
/// real, text and blob in that order.
fn sqlite_value_to_database_value(row: &SqliteRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| OrmError::Database(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let declared = row.columns()[index].type_info().name().to_uppercase();
    match declared.as_str() {
        "BOOLEAN" => {
            if let Ok(value) = row.try_get::<bool, _>(index) {
                return Ok(DatabaseValue::Bool(value));
            }
        }
        "DATETIME" => {
            if let Ok(value) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
                return Ok(DatabaseValue::DateTime(value));
            }
        }
        "DATE" => {
            if let Ok(value) = row.try_get::<chrono::NaiveDate, _>(index) {
                return Ok(DatabaseValue::Date(value));
            }
        }
        _ => {}
    }

    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(DatabaseValue::Int64(value));
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return Ok(DatabaseValue::Float64(value));
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(DatabaseValue::String(value));
    }
    row.try_get::<Vec<u8>, _>(index)
        .map(DatabaseValue::Bytes)
        .map_err(|e| OrmError::Serialization(format!("Failed to decode column {}: {}", index, e)))
}
