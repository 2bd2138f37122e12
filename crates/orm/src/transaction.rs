//! Transaction Management
//!
//! `transaction` runs a closure against an open transaction and commits when
//! it returns `Ok`, rolling back otherwise. Row locks taken inside are held
//! until that commit or rollback.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::backends::{DatabasePool, DatabaseTransaction, SqlDialect};
use crate::error::ModelResult;

/// Future returned by transaction closures, borrowing the open transaction
pub type TransactionFuture<'t, T> = Pin<Box<dyn Future<Output = ModelResult<T>> + 't>>;

/// Transaction isolation levels supported by PostgreSQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    /// Default PostgreSQL isolation level
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Convert to SQL string for SET TRANSACTION ISOLATION LEVEL command
    pub fn as_sql(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Transaction configuration options
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// `None` keeps the server default
    pub isolation_level: Option<IsolationLevel>,
    pub read_only: bool,
}

impl TransactionConfig {
    /// Statements that configure a freshly begun transaction. SQLite has no
    /// per-transaction settings; its transactions are always serializable.
    fn setup_statements(&self, dialect: SqlDialect) -> Vec<String> {
        if dialect != SqlDialect::PostgreSQL {
            return Vec::new();
        }
        let mut statements = Vec::new();
        if let Some(level) = self.isolation_level {
            statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
        }
        if self.read_only {
            statements.push("SET TRANSACTION READ ONLY".to_string());
        }
        statements
    }
}

/// Run `f` in a transaction with the server's default settings
pub async fn transaction<P, T, F>(pool: &P, f: F) -> ModelResult<T>
where
    P: DatabasePool + ?Sized,
    F: for<'t> FnOnce(&'t dyn DatabaseTransaction) -> TransactionFuture<'t, T>,
{
    transaction_with(pool, TransactionConfig::default(), f).await
}

/// Run `f` in a transaction configured by `config`
pub async fn transaction_with<P, T, F>(pool: &P, config: TransactionConfig, f: F) -> ModelResult<T>
where
    P: DatabasePool + ?Sized,
    F: for<'t> FnOnce(&'t dyn DatabaseTransaction) -> TransactionFuture<'t, T>,
{
    let tx = pool.begin_transaction().await?;
    debug!(?config, "Transaction started");

    for statement in config.setup_statements(tx.dialect()) {
        if let Err(e) = tx.execute(&statement, &[]).await {
            rollback_quietly(tx).await;
            return Err(e);
        }
    }

    let outcome = f(&*tx).await;
    finish(tx, outcome).await
}

/// Commit on `Ok`, roll back on `Err`. A rollback failure is logged; the
/// original error is returned.
pub(crate) async fn finish<T>(tx: Box<dyn DatabaseTransaction>, outcome: ModelResult<T>) -> ModelResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            debug!("Transaction committed");
            Ok(value)
        }
        Err(e) => {
            debug!(error = %e, "Rolling back transaction");
            rollback_quietly(tx).await;
            Err(e)
        }
    }
}

async fn rollback_quietly(tx: Box<dyn DatabaseTransaction>) {
    if let Err(rollback) = tx.rollback().await {
        warn!(error = %rollback, "Transaction rollback failed");
    }
}
