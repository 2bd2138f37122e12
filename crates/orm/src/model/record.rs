//! Record - the attribute store behind every model instance
//!
//! A record keeps attribute values keyed by column name, the set of columns a
//! projection actually loaded, persistence flags and any associations loaded
//! alongside it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Duration, DurationRound, Utc};
use serde_json::Value as JsonValue;

use crate::backends::{DatabaseRow, DatabaseValue};
use crate::error::{ModelError, ModelResult};
use crate::schema::{AttributeEnum, EntitySchema};

/// Column carrying the owner key of many-to-many and through preload rows
pub(crate) const OWNER_KEY_COLUMN: &str = "__owner_key";

static NULL: DatabaseValue = DatabaseValue::Null;

#[derive(Debug, Clone)]
pub struct Record {
    schema: &'static EntitySchema,
    attributes: BTreeMap<String, DatabaseValue>,
    /// `Some` only when a custom projection loaded a subset of columns
    loaded: Option<BTreeSet<String>>,
    changed: BTreeSet<String>,
    persisted: bool,
    readonly: bool,
    strict_loading: bool,
    associations: BTreeMap<String, Vec<Record>>,
}

impl Record {
    /// A new, unsaved record
    pub fn new(schema: &'static EntitySchema) -> Self {
        Self {
            schema,
            attributes: BTreeMap::new(),
            loaded: None,
            changed: BTreeSet::new(),
            persisted: false,
            readonly: false,
            strict_loading: false,
            associations: BTreeMap::new(),
        }
    }

    /// Hydrate from a result row. With `partial`, only the row's columns count
    /// as loaded.
    pub fn from_row(schema: &'static EntitySchema, row: &dyn DatabaseRow, partial: bool) -> ModelResult<Self> {
        let mut values = BTreeMap::new();
        for (index, name) in row.column_names().into_iter().enumerate() {
            if name == OWNER_KEY_COLUMN {
                continue;
            }
            values.insert(name, row.get_by_index(index)?);
        }
        Ok(Self::from_values(schema, values, partial))
    }

    pub(crate) fn from_values(
        schema: &'static EntitySchema,
        values: BTreeMap<String, DatabaseValue>,
        partial: bool,
    ) -> Self {
        let mut record = Self::new(schema);
        for (name, value) in values {
            let value = match schema.column_def(&name) {
                Some(column) => column.kind.coerce(value),
                None => value,
            };
            record.attributes.insert(name, value);
        }
        if partial {
            record.loaded = Some(record.attributes.keys().cloned().collect());
        }
        record.persisted = true;
        record
    }

    pub fn schema(&self) -> &'static EntitySchema {
        self.schema
    }

    /// Attribute value by name or alias. Columns outside a custom projection
    /// fail with `AttributeNotLoaded`; the primary key is always readable.
    pub fn get(&self, attribute: &str) -> ModelResult<&DatabaseValue> {
        let column = self.resolve(attribute)?;
        if let Some(loaded) = &self.loaded {
            if column != self.schema.primary_key() && !loaded.contains(column) {
                return Err(ModelError::AttributeNotLoaded {
                    entity: self.schema.name().to_string(),
                    attribute: column.to_string(),
                });
            }
        }
        Ok(self.attributes.get(column).unwrap_or(&NULL))
    }

    /// Attribute decoded into a Rust type
    pub fn get_as<T>(&self, attribute: &str) -> ModelResult<T>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        self.get(attribute)?.decode()
    }

    /// Assign an attribute and mark it changed. Timestamps are kept at
    /// microsecond precision, the finest both backends store.
    pub fn set<V: Into<DatabaseValue>>(&mut self, attribute: &str, value: V) -> ModelResult<()> {
        let column = self.resolve(attribute)?.to_string();
        let mut value = value.into();
        if let Some(definition) = self.schema.column_def(&column) {
            value = definition.kind.coerce(value);
        }
        if let DatabaseValue::DateTime(at) = value {
            value = DatabaseValue::DateTime(at.duration_trunc(Duration::microseconds(1)).unwrap_or(at));
        }
        if let Some(loaded) = &mut self.loaded {
            loaded.insert(column.clone());
        }
        self.changed.insert(column.clone());
        self.attributes.insert(column, value);
        Ok(())
    }

    fn resolve<'a>(&self, attribute: &'a str) -> ModelResult<&'a str> {
        self.schema.resolve_column(attribute)
    }

    pub fn id(&self) -> Option<i64> {
        self.attributes
            .get(self.schema.primary_key())
            .and_then(DatabaseValue::as_i64)
    }

    /// Enum attribute mapped back to its variant
    pub fn enum_value<E: AttributeEnum>(&self) -> ModelResult<E> {
        let value = self.get(E::COLUMN)?;
        value
            .as_i64()
            .and_then(E::from_value)
            .ok_or_else(|| {
                ModelError::Serialization(format!(
                    "{} holds no valid {} value: {:?}",
                    self.schema.name(),
                    E::COLUMN,
                    value
                ))
            })
    }

    /// True when the enum attribute currently equals `variant`
    pub fn is<E: AttributeEnum>(&self, variant: E) -> ModelResult<bool> {
        Ok(self.enum_value::<E>()? == variant)
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    pub fn is_strict_loading(&self) -> bool {
        self.strict_loading
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn changed_attributes(&self) -> impl Iterator<Item = &str> {
        self.changed.iter().map(String::as_str)
    }

    /// Every attribute held in memory
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &DatabaseValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn raw(&self, column: &str) -> &DatabaseValue {
        self.attributes.get(column).unwrap_or(&NULL)
    }

    pub(crate) fn write_raw(&mut self, column: &str, value: DatabaseValue) {
        self.attributes.insert(column.to_string(), value);
    }

    /// Whether `column` was loaded (always true outside a custom projection)
    pub(crate) fn is_loaded(&self, column: &str) -> bool {
        match &self.loaded {
            Some(loaded) => loaded.contains(column),
            None => true,
        }
    }

    /// Replace attributes with a freshly returned row and clear changes
    pub(crate) fn absorb(&mut self, fresh: Record) {
        self.attributes = fresh.attributes;
        self.loaded = fresh.loaded;
        self.changed.clear();
        self.persisted = true;
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
        self.changed.clear();
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.persisted = false;
    }

    pub fn set_readonly(&mut self, readonly: bool) {
        self.readonly = readonly;
        for records in self.associations.values_mut() {
            for record in records {
                record.set_readonly(readonly);
            }
        }
    }

    pub fn set_strict_loading(&mut self, strict: bool) {
        self.strict_loading = strict;
        for records in self.associations.values_mut() {
            for record in records {
                record.set_strict_loading(strict);
            }
        }
    }

    /// Associated records loaded with this record, if that association was
    pub fn loaded_association(&self, name: &str) -> Option<&[Record]> {
        self.associations.get(name).map(Vec::as_slice)
    }

    pub(crate) fn association_records_mut(&mut self, name: &str) -> std::slice::IterMut<'_, Record> {
        match self.associations.get_mut(name) {
            Some(records) => records.iter_mut(),
            None => [].iter_mut(),
        }
    }

    pub(crate) fn set_association(&mut self, name: &str, records: Vec<Record>) {
        self.associations.insert(name.to_string(), records);
    }

    /// Refresh `updated_at` (and `created_at` on insert)
    pub(crate) fn touch(&mut self, creating: bool) {
        if !self.schema.uses_timestamps() {
            return;
        }
        let now = Utc::now();
        let now = now.duration_trunc(Duration::microseconds(1)).unwrap_or(now);
        if creating && self.raw("created_at").is_null() {
            self.attributes
                .insert("created_at".to_string(), DatabaseValue::DateTime(now));
        }
        self.attributes
            .insert("updated_at".to_string(), DatabaseValue::DateTime(now));
        self.changed.insert("updated_at".to_string());
    }

    /// Attributes as JSON, associations nested under their names
    pub fn to_json(&self) -> JsonValue {
        let mut object = serde_json::Map::new();
        for (name, value) in &self.attributes {
            if let Some(loaded) = &self.loaded {
                if !loaded.contains(name) && name != self.schema.primary_key() {
                    continue;
                }
            }
            let json = match (self.schema.enum_for(name), value.as_i64()) {
                (Some(definition), Some(raw)) => definition
                    .name_of(raw)
                    .map(|n| JsonValue::String(n.to_string()))
                    .unwrap_or_else(|| value.to_json()),
                _ => value.to_json(),
            };
            object.insert(name.clone(), json);
        }
        for (name, records) in &self.associations {
            object.insert(
                name.clone(),
                JsonValue::Array(records.iter().map(Record::to_json).collect()),
            );
        }
        JsonValue::Object(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnKind;
    use once_cell::sync::Lazy;

    static WIDGETS: Lazy<EntitySchema> = Lazy::new(|| {
        EntitySchema::new("Widget", "widgets")
            .column("label", ColumnKind::Text)
            .column("weight", ColumnKind::Float)
            .column_alias("name", "label")
    });

    fn partial_widget() -> Record {
        let mut values = BTreeMap::new();
        values.insert("id".to_string(), DatabaseValue::Int64(7));
        values.insert("label".to_string(), DatabaseValue::String("gear".into()));
        Record::from_values(&WIDGETS, values, true)
    }

    #[test]
    fn test_unloaded_attribute_is_an_error() {
        let widget = partial_widget();
        assert_eq!(widget.get("label").unwrap(), &DatabaseValue::String("gear".into()));
        assert_eq!(widget.id(), Some(7));
        let err = widget.get("weight").unwrap_err();
        assert!(matches!(err, ModelError::AttributeNotLoaded { .. }));
    }

    #[test]
    fn test_alias_reads_canonical_column() {
        let widget = partial_widget();
        assert_eq!(widget.get_as::<String>("name").unwrap(), "gear");
    }

    #[test]
    fn test_set_coerces_and_tracks_changes() {
        let mut widget = Record::new(&WIDGETS);
        widget.set("weight", 3).unwrap();
        assert_eq!(widget.get("weight").unwrap(), &DatabaseValue::Float64(3.0));
        assert_eq!(widget.changed_attributes().collect::<Vec<_>>(), vec!["weight"]);
        assert!(widget.set("colour", "red").is_err());
    }
}
