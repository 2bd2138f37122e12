//! Core Model Trait - Base definition for database entities
//!
//! A model is a typed view over a [`Record`]. The entity's table, columns,
//! associations and scopes live in the schema registry; the model type only
//! names its entity and wraps the record.

use std::fmt::Debug;

use crate::backends::DatabaseValue;
use crate::error::ModelResult;
use crate::model::record::Record;
use crate::schema::{AttributeEnum, EntitySchema, SchemaRegistry};

/// Core trait for database models
pub trait Model: Debug + Clone + Send + Sync + Sized + 'static {
    /// Entity name in the registry
    const ENTITY: &'static str;

    /// Registry holding this entity and everything it associates with
    fn registry() -> &'static SchemaRegistry;

    fn from_record(record: Record) -> Self;

    fn as_record(&self) -> &Record;

    fn as_record_mut(&mut self) -> &mut Record;

    fn into_record(self) -> Record;

    fn schema() -> ModelResult<&'static EntitySchema> {
        Self::registry().entity(Self::ENTITY)
    }

    /// A new, unsaved instance
    fn build() -> ModelResult<Self> {
        Ok(Self::from_record(Record::new(Self::schema()?)))
    }

    fn id(&self) -> Option<i64> {
        self.as_record().id()
    }

    fn is_persisted(&self) -> bool {
        self.as_record().is_persisted()
    }

    fn is_readonly(&self) -> bool {
        self.as_record().is_readonly()
    }

    /// Attribute decoded into a Rust type
    fn attribute<T>(&self, name: &str) -> ModelResult<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        self.as_record().get_as(name)
    }

    fn set_attribute<V: Into<DatabaseValue>>(&mut self, name: &str, value: V) -> ModelResult<()> {
        self.as_record_mut().set(name, value)
    }

    fn enum_value<E: AttributeEnum>(&self) -> ModelResult<E> {
        self.as_record().enum_value()
    }

    /// True when the enum attribute equals `variant`
    fn is<E: AttributeEnum>(&self, variant: E) -> ModelResult<bool> {
        self.as_record().is(variant)
    }

    /// Assign an enum attribute in memory
    fn set_enum<E: AttributeEnum>(&mut self, variant: E) -> ModelResult<()> {
        self.as_record_mut().set(E::COLUMN, variant.value())
    }
}
