//! CRUD Operations - Create, Read, Update, Delete operations for models
//!
//! Writes validate required attributes, manage timestamps and, for entities
//! with a locking column, check-and-increment the lock version in the same
//! conditional UPDATE that writes the row.

use tracing::debug;

use crate::backends::{DatabaseExecutor, DatabaseValue};
use crate::error::{ModelError, ModelResult, ValidationErrors};
use crate::model::core_trait::Model;
use crate::model::record::Record;
use crate::query::sql_generation::SqlWriter;
use crate::query::Relation;
use crate::schema::{AttributeEnum, EntitySchema};

/// Trait providing CRUD operations for models
#[allow(async_fn_in_trait)]
pub trait CrudOperations: Model {
    /// Find by primary key through the default scope
    async fn find<E>(db: &E, id: i64) -> ModelResult<Option<Self>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        Relation::<Self>::new().find(db, id).await
    }

    async fn find_or_fail<E>(db: &E, id: i64) -> ModelResult<Self>
    where
        E: DatabaseExecutor + ?Sized,
    {
        Relation::<Self>::new().find_or_fail(db, id).await
    }

    /// First row whose attribute equals `value`; the attribute is checked
    /// against the schema first
    async fn find_by<V, E>(db: &E, attribute: &str, value: V) -> ModelResult<Option<Self>>
    where
        V: Into<DatabaseValue>,
        E: DatabaseExecutor + ?Sized,
    {
        Relation::<Self>::new().find_by(db, attribute, value).await
    }

    async fn find_by_or_fail<V, E>(db: &E, attribute: &str, value: V) -> ModelResult<Self>
    where
        V: Into<DatabaseValue>,
        E: DatabaseExecutor + ?Sized,
    {
        Relation::<Self>::new().find_by_or_fail(db, attribute, value).await
    }

    /// Build from attribute pairs and insert
    async fn create<E>(db: &E, attributes: &[(&str, DatabaseValue)]) -> ModelResult<Self>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let mut model = Self::build()?;
        for (name, value) in attributes {
            model.set_attribute(name, value.clone())?;
        }
        model.save(db).await?;
        Ok(model)
    }

    /// Insert or update. Readonly records and failed validations never reach
    /// storage.
    async fn save<E>(&mut self, db: &E) -> ModelResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let schema = Self::schema()?;
        let record = self.as_record_mut();
        if record.is_readonly() {
            return Err(ModelError::ReadOnlyRecord(schema.name().to_string()));
        }
        validate_required(schema, record)?;
        if record.is_persisted() {
            update_record(db, schema, record).await
        } else {
            insert_record(db, schema, record).await
        }
    }

    /// Assign several attributes and save
    async fn update_attributes<E>(&mut self, db: &E, attributes: &[(&str, DatabaseValue)]) -> ModelResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        for (name, value) in attributes {
            self.set_attribute(name, value.clone())?;
        }
        self.save(db).await
    }

    /// Re-read every column from storage, bypassing the default scope
    async fn reload<E>(&mut self, db: &E) -> ModelResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let id = self.id().ok_or(ModelError::MissingPrimaryKey)?;
        let fresh = Relation::<Self>::unscoped().find_or_fail(db, id).await?;
        replace_record(self.as_record_mut(), fresh.into_record());
        Ok(())
    }

    /// Delete the row. With a locking column, a stale version fails.
    async fn destroy<E>(&mut self, db: &E) -> ModelResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let schema = Self::schema()?;
        let record = self.as_record_mut();
        if record.is_readonly() {
            return Err(ModelError::ReadOnlyRecord(schema.name().to_string()));
        }
        let id = record.id().ok_or(ModelError::MissingPrimaryKey)?;

        let mut w = SqlWriter::new(db.dialect());
        w.push(&format!(
            "DELETE FROM {} WHERE {} = ",
            w.quote(schema.table()),
            w.quote(schema.primary_key())
        ));
        w.bind(DatabaseValue::Int64(id));
        let expected = lock_condition(&mut w, schema, record)?;
        let statement = w.finish();
        debug!(entity = schema.name(), id, sql = %statement.sql, "Destroying record");

        let affected = db.execute(&statement.sql, &statement.params).await?;
        if affected == 0 {
            return Err(missing_row(schema, id, expected));
        }
        record.mark_destroyed();
        Ok(())
    }

    /// First row matching every pair, created from the pairs when none does
    async fn find_or_create_by<E>(db: &E, attributes: &[(&str, DatabaseValue)]) -> ModelResult<Self>
    where
        E: DatabaseExecutor + ?Sized,
    {
        match Relation::<Self>::new().where_all(attributes).take(db).await? {
            Some(found) => Ok(found),
            None => Self::create(db, attributes).await,
        }
    }

    /// First row matching every pair, or an unsaved instance holding them
    async fn find_or_initialize_by<E>(db: &E, attributes: &[(&str, DatabaseValue)]) -> ModelResult<Self>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if let Some(found) = Relation::<Self>::new().where_all(attributes).take(db).await? {
            return Ok(found);
        }
        let mut model = Self::build()?;
        for (name, value) in attributes {
            model.set_attribute(name, value.clone())?;
        }
        Ok(model)
    }

    /// Set an enum attribute and persist it. `Ok(false)` when validation
    /// rejects the record; storage failures are errors.
    async fn transition_to<V, E>(&mut self, db: &E, value: V) -> ModelResult<bool>
    where
        V: AttributeEnum,
        E: DatabaseExecutor + ?Sized,
    {
        self.set_enum(value)?;
        match self.save(db).await {
            Ok(()) => Ok(true),
            Err(ModelError::Validation(errors)) => {
                debug!(entity = Self::ENTITY, ?errors, "Enum transition rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

impl<T: Model> CrudOperations for T {}

pub(crate) fn replace_record(current: &mut Record, fresh: Record) {
    let readonly = current.is_readonly();
    let strict = current.is_strict_loading();
    *current = fresh;
    current.set_readonly(readonly);
    current.set_strict_loading(strict);
}

fn validate_required(schema: &EntitySchema, record: &Record) -> ModelResult<()> {
    let mut errors = ValidationErrors::new();
    for column in schema.required_columns() {
        if !record.is_loaded(column) {
            continue;
        }
        match record.raw(column) {
            DatabaseValue::Null => errors.add(column, "can't be blank"),
            DatabaseValue::String(s) if s.trim().is_empty() => errors.add(column, "can't be blank"),
            _ => {}
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ModelError::Validation(errors))
    }
}

async fn insert_record<E>(db: &E, schema: &'static EntitySchema, record: &mut Record) -> ModelResult<()>
where
    E: DatabaseExecutor + ?Sized,
{
    record.touch(true);
    if let Some(lock) = schema.locking_column_name() {
        if record.raw(lock).is_null() {
            record.write_raw(lock, DatabaseValue::Int64(0));
        }
    }

    let columns: Vec<(String, DatabaseValue)> = schema
        .columns()
        .iter()
        .filter(|c| !(c.name == schema.primary_key() && record.raw(&c.name).is_null()))
        .filter(|c| record.attributes().any(|(name, _)| name == c.name))
        .map(|c| (c.name.clone(), record.raw(&c.name).clone()))
        .collect();

    let mut w = SqlWriter::new(db.dialect());
    w.push(&format!("INSERT INTO {}", w.quote(schema.table())));
    if columns.is_empty() {
        w.push(" DEFAULT VALUES");
    } else {
        let names: Vec<String> = columns.iter().map(|(name, _)| w.quote(name)).collect();
        w.push(&format!(" ({}) VALUES (", names.join(", ")));
        for (i, (_, value)) in columns.into_iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.bind(value);
        }
        w.push(")");
    }
    w.push(" RETURNING *");
    let statement = w.finish();
    debug!(entity = schema.name(), sql = %statement.sql, "Inserting record");

    let row = db
        .fetch_optional(&statement.sql, &statement.params)
        .await?
        .ok_or_else(|| ModelError::Database(format!("INSERT into {} returned no row", schema.table())))?;
    let fresh = Record::from_row(schema, row.as_ref(), false)?;
    record.absorb(fresh);
    Ok(())
}

/// Single conditional UPDATE. With a locking column the version is compared
/// and incremented by the statement itself; zero affected rows means another
/// writer committed first.
async fn update_record<E>(db: &E, schema: &'static EntitySchema, record: &mut Record) -> ModelResult<()>
where
    E: DatabaseExecutor + ?Sized,
{
    if !record.has_changes() {
        return Ok(());
    }
    let id = record.id().ok_or(ModelError::MissingPrimaryKey)?;
    record.touch(false);

    let lock = schema.locking_column_name();
    let changed: Vec<String> = record
        .changed_attributes()
        .filter(|c| *c != schema.primary_key() && Some(*c) != lock)
        .map(str::to_string)
        .collect();

    let mut w = SqlWriter::new(db.dialect());
    w.push(&format!("UPDATE {} SET ", w.quote(schema.table())));
    let mut assignments = 0;
    for column in &changed {
        if assignments > 0 {
            w.push(", ");
        }
        w.push(&format!("{} = ", w.quote(column)));
        w.bind(record.raw(column).clone());
        assignments += 1;
    }
    if let Some(lock) = lock {
        if assignments > 0 {
            w.push(", ");
        }
        let quoted = w.quote(lock);
        w.push(&format!("{} = {} + 1", quoted, quoted));
        assignments += 1;
    }
    if assignments == 0 {
        return Ok(());
    }
    w.push(&format!(" WHERE {} = ", w.quote(schema.primary_key())));
    w.bind(DatabaseValue::Int64(id));
    let expected = lock_condition(&mut w, schema, record)?;
    let statement = w.finish();
    debug!(entity = schema.name(), id, sql = %statement.sql, "Updating record");

    let affected = db.execute(&statement.sql, &statement.params).await?;
    if affected == 0 {
        return Err(missing_row(schema, id, expected));
    }
    if let (Some(lock), Some(expected)) = (lock, expected) {
        record.write_raw(lock, DatabaseValue::Int64(expected + 1));
    }
    record.mark_persisted();
    Ok(())
}

/// Append `AND lock = expected` for versioned entities; returns the version.
/// A record whose projection skipped the lock column has no token to compare.
fn lock_condition(w: &mut SqlWriter, schema: &EntitySchema, record: &Record) -> ModelResult<Option<i64>> {
    let Some(lock) = schema.locking_column_name() else {
        return Ok(None);
    };
    if !record.is_loaded(lock) {
        return Err(ModelError::AttributeNotLoaded {
            entity: schema.name().to_string(),
            attribute: lock.to_string(),
        });
    }
    let expected = record.raw(lock).as_i64().unwrap_or(0);
    w.push(&format!(" AND {} = ", w.quote(lock)));
    w.bind(DatabaseValue::Int64(expected));
    Ok(Some(expected))
}

fn missing_row(schema: &EntitySchema, id: i64, expected: Option<i64>) -> ModelError {
    match expected {
        Some(expected) => ModelError::StaleWrite {
            table: schema.table().to_string(),
            id,
            expected,
        },
        None => ModelError::NotFound(format!("Couldn't find {} with 'id'={}", schema.name(), id)),
    }
}
