//! Pessimistic locking of single records

use tracing::debug;

use crate::backends::{DatabaseExecutor, DatabasePool, DatabaseTransaction};
use crate::error::{ModelError, ModelResult};
use crate::model::core_trait::Model;
use crate::model::crud_operations::replace_record;
use crate::query::{LockMode, Relation};
use crate::transaction::{finish, TransactionFuture};

#[allow(async_fn_in_trait)]
pub trait Locking: Model {
    /// Reload this record under `SELECT ... FOR UPDATE` within an open
    /// transaction
    async fn lock_in<E>(&mut self, tx: &E) -> ModelResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if !tx.in_transaction() {
            return Err(ModelError::Transaction(
                "Locking a record requires an open transaction".to_string(),
            ));
        }
        let id = self.id().ok_or(ModelError::MissingPrimaryKey)?;
        let locked = Relation::<Self>::unscoped()
            .lock(LockMode::ForUpdate)
            .find_or_fail(tx, id)
            .await?;
        replace_record(self.as_record_mut(), locked.into_record());
        Ok(())
    }

    /// Open a transaction, reload this record under lock and run `f`.
    /// Commits when `f` returns `Ok`, rolls back otherwise.
    async fn with_lock<P, T, F>(&mut self, pool: &P, f: F) -> ModelResult<T>
    where
        P: DatabasePool + ?Sized,
        F: for<'t> FnOnce(&'t dyn DatabaseTransaction, &'t mut Self) -> TransactionFuture<'t, T>,
    {
        let tx = pool.begin_transaction().await?;
        debug!(entity = Self::ENTITY, id = ?self.id(), "Acquiring row lock");
        let outcome = match self.lock_in(&*tx).await {
            Ok(()) => f(&*tx, self).await,
            Err(e) => Err(e),
        };
        finish(tx, outcome).await
    }
}

impl<T: Model> Locking for T {}
