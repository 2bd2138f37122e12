//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL implementation of the database backend
//! traits using sqlx as the underlying database driver.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, Pool, Postgres, Row as SqlxRow, TypeInfo, ValueRef};
use tokio::sync::Mutex;
use tracing::debug;

use super::core::*;
use super::DatabaseBackendType;
use crate::config::DatabaseConfig;
use crate::error::{OrmError, OrmResult};

type PgQuery<'q> = sqlx::query::Query<'q, Postgres, PgArguments>;

/// PostgreSQL connection pool implementation
#[derive(Debug, Clone)]
pub struct PostgresPool {
    pool: Pool<Postgres>,
    statistics: Arc<QueryStatistics>,
}

impl PostgresPool {
    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> OrmResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await
            .map_err(|e| OrmError::Connection(format!("Failed to create PostgreSQL pool: {}", e)))?;

        Ok(Self::new(pool))
    }

    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            statistics: Arc::new(QueryStatistics::new()),
        }
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabaseExecutor for PostgresPool {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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
        Ok(rows.into_iter().map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn begin_transaction(&self) -> OrmResult<Box<dyn DatabaseTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OrmError::Transaction(format!("Failed to begin transaction: {}", e)))?;
        self.statistics.record_begin();
        debug!("Transaction started");
        Ok(Box::new(PostgresTransaction {
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
        DatabaseBackendType::PostgreSQL
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Mutex<Option<sqlx::Transaction<'static, Postgres>>>,
    statistics: Arc<QueryStatistics>,
}

#[async_trait]
impl DatabaseExecutor for PostgresTransaction {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
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
        Ok(rows.into_iter().map(|row| Box::new(PostgresRow::new(row)) as Box<dyn DatabaseRow>).collect())
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
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

/// PostgreSQL row implementation
pub struct PostgresRow {
    row: PgRow,
}

impl PostgresRow {
    pub fn new(row: PgRow) -> Self {
        Self { row }
    }
}

impl DatabaseRow for PostgresRow {
    fn get_by_index(&self, index: usize) -> OrmResult<DatabaseValue> {
        postgres_value_to_database_value(&self.row, index)
    }

    fn get_by_name(&self, name: &str) -> OrmResult<DatabaseValue> {
        let index = self
            .row
            .columns()
            .iter()
            .position(|col| col.name() == name)
            .ok_or_else(|| OrmError::Database(format!("Column '{}' not found", name)))?;
        postgres_value_to_database_value(&self.row, index)
    }

    fn column_count(&self) -> usize {
        self.row.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.row.columns().iter().map(|col| col.name().to_string()).collect()
    }
}

fn bind_all<'q>(mut query: PgQuery<'q>, params: &[DatabaseValue]) -> OrmResult<PgQuery<'q>> {
    for param in params {
        query = bind_database_value(query, param)?;
    }
    Ok(query)
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'q>(query: PgQuery<'q>, value: &DatabaseValue) -> OrmResult<PgQuery<'q>> {
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

/// Convert a PostgreSQL column value to DatabaseValue
fn postgres_value_to_database_value(row: &PgRow, index: usize) -> OrmResult<DatabaseValue> {
    let raw = row
        .try_get_raw(index)
        .map_err(|e| OrmError::Database(format!("Failed to read column {}: {}", index, e)))?;
    if raw.is_null() {
        return Ok(DatabaseValue::Null);
    }

    let type_name = row.columns()[index].type_info().name().to_string();
    let decode_err = |e: sqlx::Error| {
        OrmError::Serialization(format!("Failed to decode {} column {}: {}", type_name, index, e))
    };

    let value = match type_name.as_str() {
        "BOOL" => DatabaseValue::Bool(row.try_get(index).map_err(decode_err)?),
        "INT2" => DatabaseValue::Int32(row.try_get::<i16, _>(index).map_err(decode_err)? as i32),
        "INT4" => DatabaseValue::Int32(row.try_get(index).map_err(decode_err)?),
        "INT8" => DatabaseValue::Int64(row.try_get(index).map_err(decode_err)?),
        "FLOAT4" => DatabaseValue::Float64(row.try_get::<f32, _>(index).map_err(decode_err)? as f64),
        "FLOAT8" => DatabaseValue::Float64(row.try_get(index).map_err(decode_err)?),
        "BYTEA" => DatabaseValue::Bytes(row.try_get(index).map_err(decode_err)?),
        "TIMESTAMPTZ" => DatabaseValue::DateTime(row.try_get(index).map_err(decode_err)?),
        "TIMESTAMP" => {
            let naive: chrono::NaiveDateTime = row.try_get(index).map_err(decode_err)?;
            DatabaseValue::DateTime(naive.and_utc())
        }
        "DATE" => DatabaseValue::Date(row.try_get(index).map_err(decode_err)?),
        "JSON" | "JSONB" => DatabaseValue::Json(row.try_get::<JsonValue, _>(index).map_err(decode_err)?),
        _ => DatabaseValue::String(row.try_get(index).map_err(decode_err)?),
    };
    Ok(value)
}
