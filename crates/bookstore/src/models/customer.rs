//! Customer model
//!
//! Customers are versioned: every save checks and increments `lock_version`
//! in the same UPDATE, so a write based on a stale read fails with
//! `StaleWrite` instead of overwriting a newer one.

use folio_orm::{Associations, DatabaseExecutor, Model, ModelResult, Record};

use super::{Order, Review};

#[derive(Debug, Clone)]
pub struct Customer {
    record: Record,
}

bookstore_model!(Customer, "Customer");

impl Customer {
    pub fn name(&self) -> ModelResult<String> {
        self.attribute("name")
    }

    pub fn email(&self) -> ModelResult<Option<String>> {
        self.attribute("email")
    }

    pub fn orders_count(&self) -> ModelResult<i64> {
        self.attribute("orders_count")
    }

    pub fn visits(&self) -> ModelResult<Option<i64>> {
        self.attribute("visits")
    }

    pub fn lock_version(&self) -> ModelResult<i64> {
        self.attribute("lock_version")
    }

    pub async fn orders<E>(&self, db: &E) -> ModelResult<Vec<Order>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "orders").await
    }

    pub async fn reviews<E>(&self, db: &E) -> ModelResult<Vec<Review>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "reviews").await
    }
}
