//! Relation Builder - immutable, lazily evaluated query descriptors
//!
//! Builder methods live in topic modules (`where_clause`, `ordering`, `select`,
//! `joins`, `scoping`); `sql_generation` renders a relation, `execution`,
//! `with` and `batches` run it.

pub mod batches;
pub mod builder;
pub mod execution;
pub mod joins;
pub mod ordering;
pub mod scoping;
pub mod select;
pub mod sql_generation;
pub mod types;
pub mod where_clause;
pub mod with;

pub use batches::{BatchOptions, Batches};
pub use builder::Relation;
pub use sql_generation::Statement;
pub use types::{
    ClauseKind, ColumnRef, JoinKind, LockMode, Operator, OrderDirection, OrderTerm, Predicate,
    SelectTerm,
};
