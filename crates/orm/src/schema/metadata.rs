//! Entity metadata - tables, columns, associations and scoping rules
//!
//! An [`EntitySchema`] is the single source of identifiers for SQL generation:
//! every table and column name the relation builder emits comes from here, so
//! caller-provided strings are validated before they reach a statement.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;

use super::association::{Association, AssociationKind};
use super::enums::EnumDef;
use crate::backends::DatabaseValue;
use crate::error::{ModelError, ModelResult};
use crate::query::types::Predicate;

/// Storage type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    BigInt,
    Float,
    Text,
    Boolean,
    Timestamp,
    Date,
    Json,
}

impl ColumnKind {
    /// Normalize a decoded value to the column's Rust-side representation.
    ///
    /// SQLite hands back booleans as integers and timestamps as text when the
    /// declared type is lost (aliased columns, expressions).
    pub fn coerce(&self, value: DatabaseValue) -> DatabaseValue {
        match (self, value) {
            (_, DatabaseValue::Null) => DatabaseValue::Null,
            (ColumnKind::Integer | ColumnKind::BigInt, DatabaseValue::Int32(i)) => {
                DatabaseValue::Int64(i as i64)
            }
            (ColumnKind::Float, DatabaseValue::Int32(i)) => DatabaseValue::Float64(i as f64),
            (ColumnKind::Float, DatabaseValue::Int64(i)) => DatabaseValue::Float64(i as f64),
            (ColumnKind::Boolean, DatabaseValue::Int32(i)) => DatabaseValue::Bool(i != 0),
            (ColumnKind::Boolean, DatabaseValue::Int64(i)) => DatabaseValue::Bool(i != 0),
            (ColumnKind::Boolean, DatabaseValue::String(s)) => {
                DatabaseValue::Bool(matches!(s.as_str(), "t" | "true" | "TRUE" | "1"))
            }
            (ColumnKind::Timestamp, DatabaseValue::String(s)) => parse_timestamp(&s)
                .map(DatabaseValue::DateTime)
                .unwrap_or(DatabaseValue::String(s)),
            (ColumnKind::Date, DatabaseValue::String(s)) => NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(DatabaseValue::Date)
                .unwrap_or(DatabaseValue::String(s)),
            (ColumnKind::Json, DatabaseValue::String(s)) => serde_json::from_str(&s)
                .map(DatabaseValue::Json)
                .unwrap_or(DatabaseValue::String(s)),
            (_, value) => value,
        }
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnKind,
}

/// Builds the default-scope predicate when a relation is created
pub type ScopeFn = fn() -> Predicate;

/// Everything the relation builder knows about one entity
#[derive(Debug, Clone)]
pub struct EntitySchema {
    name: String,
    table: String,
    primary_key: String,
    columns: Vec<ColumnDef>,
    required: Vec<String>,
    associations: Vec<Association>,
    enums: Vec<EnumDef>,
    default_scope: Option<ScopeFn>,
    locking_column: Option<String>,
    aliases: BTreeMap<String, String>,
    timestamps: bool,
}

impl EntitySchema {
    /// New entity with an `id` primary key and `created_at`/`updated_at`
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: "id".to_string(),
            columns: Vec::new(),
            required: Vec::new(),
            associations: Vec::new(),
            enums: Vec::new(),
            default_scope: None,
            locking_column: None,
            aliases: BTreeMap::new(),
            timestamps: true,
        }
        .column("id", ColumnKind::BigInt)
        .column("created_at", ColumnKind::Timestamp)
        .column("updated_at", ColumnKind::Timestamp)
    }

    pub fn column(mut self, name: &str, kind: ColumnKind) -> Self {
        self.columns.retain(|c| c.name != name);
        self.columns.push(ColumnDef {
            name: name.to_string(),
            kind,
        });
        self
    }

    /// Columns that must be present and non-null before any write
    pub fn required(mut self, columns: &[&str]) -> Self {
        self.required.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn with_association(mut self, association: Association) -> Self {
        self.associations.push(association);
        self
    }

    pub fn enumeration(mut self, definition: EnumDef) -> Self {
        self.enums.push(definition);
        self
    }

    pub fn default_scope(mut self, scope: ScopeFn) -> Self {
        self.default_scope = Some(scope);
        self
    }

    /// Enable optimistic locking on `column`
    pub fn locking_column(mut self, column: &str) -> Self {
        self.locking_column = Some(column.to_string());
        self
    }

    /// Accept `alias` as a deprecated spelling of `column`
    pub fn column_alias(mut self, alias: &str, column: &str) -> Self {
        self.aliases.insert(alias.to_string(), column.to_string());
        self
    }

    pub fn without_timestamps(mut self) -> Self {
        self.timestamps = false;
        self.columns
            .retain(|c| c.name != "created_at" && c.name != "updated_at");
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_def(name).is_some()
    }

    /// Resolve a caller-supplied attribute name to a declared column.
    /// Deprecated aliases resolve with a warning; anything else unknown is an
    /// `InvalidQuery`.
    pub fn resolve_column<'a>(&'a self, name: &'a str) -> ModelResult<&'a str> {
        if self.has_column(name) {
            return Ok(name);
        }
        if let Some(target) = self.aliases.get(name) {
            warn!(
                entity = %self.name,
                alias = name,
                column = %target,
                "Deprecated column alias used"
            );
            return Ok(target.as_str());
        }
        Err(ModelError::InvalidQuery(format!(
            "Unknown attribute '{}' for {}",
            name, self.name
        )))
    }

    pub fn required_columns(&self) -> &[String] {
        &self.required
    }

    pub fn associations(&self) -> &[Association] {
        &self.associations
    }

    pub fn association(&self, name: &str) -> ModelResult<&Association> {
        self.associations
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| {
                ModelError::InvalidQuery(format!(
                    "Association named '{}' was not found on {}",
                    name, self.name
                ))
            })
    }

    pub fn enum_for(&self, column: &str) -> Option<&EnumDef> {
        self.enums.iter().find(|e| e.column == column)
    }

    /// Default-scope predicate, evaluated now
    pub fn default_scope_predicate(&self) -> Option<Predicate> {
        self.default_scope.map(|scope| scope())
    }

    pub fn locking_column_name(&self) -> Option<&str> {
        self.locking_column.as_deref()
    }

    pub fn uses_timestamps(&self) -> bool {
        self.timestamps
    }
}

/// All entities of an application, keyed by entity name
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    entities: HashMap<String, EntitySchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, schema: EntitySchema) -> Self {
        self.entities.insert(schema.name.clone(), schema);
        self
    }

    pub fn entity(&self, name: &str) -> ModelResult<&EntitySchema> {
        self.entities
            .get(name)
            .ok_or_else(|| ModelError::InvalidQuery(format!("Unknown entity '{}'", name)))
    }

    pub fn entity_for_table(&self, table: &str) -> Option<&EntitySchema> {
        self.entities.values().find(|e| e.table == table)
    }

    pub fn entities(&self) -> impl Iterator<Item = &EntitySchema> {
        self.entities.values()
    }

    /// Check that every association, enum and locking column points at
    /// something that exists
    pub fn validate(&self) -> ModelResult<()> {
        for entity in self.entities.values() {
            for association in &entity.associations {
                let target = self.entity(&association.target).map_err(|_| {
                    ModelError::Configuration(format!(
                        "{}.{} targets unknown entity '{}'",
                        entity.name, association.name, association.target
                    ))
                })?;
                let fk_owner = match &association.kind {
                    AssociationKind::BelongsTo => Some(entity),
                    AssociationKind::HasMany => Some(target),
                    AssociationKind::ManyToMany { .. } => None,
                    AssociationKind::HasManyThrough { through, source } => {
                        let via = entity.association(through).map_err(|_| {
                            ModelError::Configuration(format!(
                                "{}.{} goes through unknown association '{}'",
                                entity.name, association.name, through
                            ))
                        })?;
                        self.entity(&via.target)?.association(source).map_err(|_| {
                            ModelError::Configuration(format!(
                                "{}.{} uses unknown source association '{}'",
                                entity.name, association.name, source
                            ))
                        })?;
                        None
                    }
                };
                if let Some(owner) = fk_owner {
                    if !owner.has_column(&association.foreign_key) {
                        return Err(ModelError::Configuration(format!(
                            "{}.{} foreign key '{}' is not a column of {}",
                            entity.name, association.name, association.foreign_key, owner.name
                        )));
                    }
                }
            }
            for definition in &entity.enums {
                if !entity.has_column(&definition.column) {
                    return Err(ModelError::Configuration(format!(
                        "{} enum column '{}' is not declared",
                        entity.name, definition.column
                    )));
                }
            }
            if let Some(column) = &entity.locking_column {
                if !entity.has_column(column) {
                    return Err(ModelError::Configuration(format!(
                        "{} locking column '{}' is not declared",
                        entity.name, column
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new()
            .register(
                EntitySchema::new("Author", "authors")
                    .column("name", ColumnKind::Text)
                    .with_association(Association::has_many("books", "Book", "author_id")),
            )
            .register(
                EntitySchema::new("Book", "books")
                    .column("title", ColumnKind::Text)
                    .column("author_id", ColumnKind::BigInt)
                    .column("version", ColumnKind::Integer)
                    .locking_column("version")
                    .column_alias("lock_book_column", "version")
                    .with_association(Association::belongs_to("author", "Author", "author_id")),
            )
    }

    #[test]
    fn test_registry_validates() {
        assert!(registry().validate().is_ok());

        let broken = registry().register(
            EntitySchema::new("Shelf", "shelves")
                .with_association(Association::has_many("books", "Book", "shelf_id")),
        );
        assert!(matches!(broken.validate(), Err(ModelError::Configuration(_))));
    }

    #[test]
    fn test_declared_associations_are_looked_up_by_name() {
        let registry = registry();
        let books = registry.entity("Book").unwrap();
        let author = books.association("author").unwrap();
        assert_eq!(author.name, "author");
        assert_eq!(author.target, "Author");
        assert!(matches!(
            books.association("publisher"),
            Err(ModelError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_resolve_column_and_alias() {
        let registry = registry();
        let books = registry.entity("Book").unwrap();
        assert_eq!(books.resolve_column("title").unwrap(), "title");
        assert_eq!(books.resolve_column("lock_book_column").unwrap(), "version");
        assert!(matches!(
            books.resolve_column("subtitle"),
            Err(ModelError::InvalidQuery(_))
        ));
        assert!(books.has_column("created_at"));
        assert_eq!(registry.entity_for_table("authors").unwrap().name(), "Author");
    }

    #[test]
    fn test_coerce_sqlite_representations() {
        assert_eq!(
            ColumnKind::Boolean.coerce(DatabaseValue::Int64(1)),
            DatabaseValue::Bool(true)
        );
        assert_eq!(
            ColumnKind::Float.coerce(DatabaseValue::Int64(3)),
            DatabaseValue::Float64(3.0)
        );
        match ColumnKind::Timestamp.coerce(DatabaseValue::String(
            "2024-03-01T10:00:00.5+00:00".to_string(),
        )) {
            DatabaseValue::DateTime(dt) => assert_eq!(dt.timestamp(), 1709287200),
            other => panic!("unexpected {:?}", other),
        }
    }
}
