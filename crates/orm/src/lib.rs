//! # folio-orm
//!
//! A composable relation builder over PostgreSQL and SQLite: immutable query
//! descriptors with scoping, merging, eager loading and locking, a
//! schema-driven record layer with optimistic lock versioning, and the
//! backend traits both storage engines implement.

pub mod backends;
pub mod config;
pub mod database;
pub mod error;
pub mod model;
pub mod query;
pub mod schema;
pub mod transaction;

#[cfg(test)]
mod test_support;

// Re-export core traits and types
pub use backends::{
    DatabaseBackendType, DatabaseExecutor, DatabasePool, DatabaseRow, DatabaseTransaction,
    DatabaseValue, QueryStatistics, SqlDialect,
};
pub use config::{ConfigError, DatabaseConfig, OrmConfig};
pub use database::*;
pub use error::*;
pub use model::*;
pub use query::*;
pub use schema::{
    Association, AssociationKind, AttributeEnum, ColumnDef, ColumnKind, EntitySchema, EnumDef,
    SchemaRegistry, ScopeFn,
};
pub use transaction::*;
