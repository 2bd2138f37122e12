//! Order model and its status enum

use chrono::{DateTime, Utc};

use folio_orm::{
    AttributeEnum, Associations, CrudOperations, DatabaseExecutor, Model, ModelResult,
    QueryMethods, Record, Relation,
};

use super::{Book, Customer};

/// Fulfilment state stored in `orders.status`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Shipped,
    BeingPacked,
    Complete,
    Cancelled,
}

impl AttributeEnum for OrderStatus {
    const COLUMN: &'static str = "status";

    fn variants() -> &'static [Self] {
        &[
            OrderStatus::Shipped,
            OrderStatus::BeingPacked,
            OrderStatus::Complete,
            OrderStatus::Cancelled,
        ]
    }

    fn name(&self) -> &'static str {
        match self {
            OrderStatus::Shipped => "shipped",
            OrderStatus::BeingPacked => "being_packed",
            OrderStatus::Complete => "complete",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    fn value(&self) -> i64 {
        match self {
            OrderStatus::Shipped => 0,
            OrderStatus::BeingPacked => 1,
            OrderStatus::Complete => 2,
            OrderStatus::Cancelled => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    record: Record,
}

bookstore_model!(Order, "Order");

impl Order {
    pub fn status(&self) -> ModelResult<OrderStatus> {
        self.enum_value()
    }

    pub fn total(&self) -> ModelResult<f64> {
        self.attribute("total")
    }

    pub fn is_shipped(&self) -> ModelResult<bool> {
        self.is(OrderStatus::Shipped)
    }

    pub fn is_being_packed(&self) -> ModelResult<bool> {
        self.is(OrderStatus::BeingPacked)
    }

    pub fn is_complete(&self) -> ModelResult<bool> {
        self.is(OrderStatus::Complete)
    }

    pub fn is_cancelled(&self) -> ModelResult<bool> {
        self.is(OrderStatus::Cancelled)
    }

    /// Set the status to shipped and persist it
    pub async fn ship<E>(&mut self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.transition_to(db, OrderStatus::Shipped).await
    }

    pub async fn pack<E>(&mut self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.transition_to(db, OrderStatus::BeingPacked).await
    }

    pub async fn complete<E>(&mut self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.transition_to(db, OrderStatus::Complete).await
    }

    pub async fn cancel<E>(&mut self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.transition_to(db, OrderStatus::Cancelled).await
    }

    pub async fn customer<E>(&self, db: &E) -> ModelResult<Option<Customer>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.belongs_to(db, "customer").await
    }

    pub async fn books<E>(&self, db: &E) -> ModelResult<Vec<Book>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "books").await
    }

    pub fn with_status(status: OrderStatus) -> Relation<Order> {
        Order::query().with_enum(status)
    }

    pub fn created_before(time: DateTime<Utc>) -> Relation<Order> {
        Order::query().created_before(time)
    }
}

/// Named scopes, chainable on any order relation
pub trait OrderScopes: Sized {
    fn created_before(self, time: DateTime<Utc>) -> Self;

    fn shipped(self) -> Self;

    /// Every order not yet shipped or closed
    fn open(self) -> Self;
}

impl OrderScopes for Relation<Order> {
    fn created_before(self, time: DateTime<Utc>) -> Self {
        self.where_lt("created_at", time)
    }

    fn shipped(self) -> Self {
        self.with_enum(OrderStatus::Shipped)
    }

    fn open(self) -> Self {
        self.with_enum(OrderStatus::BeingPacked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_orm::SqlDialect;

    #[test]
    fn test_status_mapping_round_trips() {
        for status in OrderStatus::variants() {
            assert_eq!(OrderStatus::from_value(status.value()), Some(*status));
            assert_eq!(OrderStatus::from_name(status.name()), Some(*status));
        }
        assert_eq!(OrderStatus::from_value(9), None);
    }

    #[test]
    fn test_status_shortcut_binds_stored_integer() {
        let statement = Order::with_status(OrderStatus::Complete)
            .to_statement(SqlDialect::SQLite)
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"orders\".* FROM \"orders\" WHERE \"orders\".\"status\" = ?"
        );
        assert_eq!(statement.params, vec![folio_orm::DatabaseValue::Int64(2)]);
    }
}
