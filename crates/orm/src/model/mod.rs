//! Model System - typed entities over schema-driven records
//!
//! - `core_trait`: the `Model` trait tying a Rust type to a registry entity
//! - `record`: attribute storage, dirty tracking and loaded associations
//! - `crud_operations`: create, save (with optimistic locking), reload, destroy
//! - `query_methods`: relation starting points
//! - `associations`: preloaded and lazy association access
//! - `locking`: pessimistic row locks

pub mod associations;
pub mod core_trait;
pub mod crud_operations;
pub mod locking;
pub mod query_methods;
pub mod record;

pub use associations::Associations;
pub use core_trait::Model;
pub use crud_operations::CrudOperations;
pub use locking::Locking;
pub use query_methods::{unscoped, QueryMethods};
pub use record::Record;
