//! Schema Registry - declarative entity metadata
//!
//! Entities, their columns, associations, enum attributes, default scopes and
//! optimistic locking columns are registered once at startup and consulted by
//! the relation builder when SQL is generated.

pub mod association;
pub mod enums;
pub mod metadata;

pub use association::{Association, AssociationKind};
pub use enums::{AttributeEnum, EnumDef};
pub use metadata::{ColumnDef, ColumnKind, EntitySchema, SchemaRegistry, ScopeFn};
