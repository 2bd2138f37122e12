//! Bookstore entities
//!
//! Each model is a typed view over a [`folio_orm::Record`] registered in
//! [`crate::schema::REGISTRY`]. Relation-level named scopes live in extension
//! traits next to their model.

/// Implement [`folio_orm::Model`] for a record newtype
macro_rules! bookstore_model {
    ($model:ident, $entity:literal) => {
        impl folio_orm::Model for $model {
            const ENTITY: &'static str = $entity;

            fn registry() -> &'static folio_orm::SchemaRegistry {
                &crate::schema::REGISTRY
            }

            fn from_record(record: folio_orm::Record) -> Self {
                Self { record }
            }

            fn as_record(&self) -> &folio_orm::Record {
                &self.record
            }

            fn as_record_mut(&mut self) -> &mut folio_orm::Record {
                &mut self.record
            }

            fn into_record(self) -> folio_orm::Record {
                self.record
            }
        }
    };
}

pub mod author;
pub mod book;
pub mod customer;
pub mod order;
pub mod review;
pub mod supplier;

pub use author::Author;
pub use book::{Book, BookScopes};
pub use customer::Customer;
pub use order::{Order, OrderScopes, OrderStatus};
pub use review::{Review, ReviewState};
pub use supplier::Supplier;
