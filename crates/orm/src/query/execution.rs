//! Relation execution for Model types
//!
//! Terminal operations run against any [`DatabaseExecutor`], a pool or an open
//! transaction. Every one of them reports deferred input errors first, then
//! returns its neutral value without a statement when the relation is `none`.

use tracing::debug;

use super::builder::Relation;
use super::sql_generation::Statement;
use super::types::*;
use super::with::{hydrate_joined, preload_level};
use crate::backends::{DatabaseExecutor, DatabaseRow, DatabaseValue};
use crate::error::{ModelError, ModelResult};
use crate::model::record::Record;
use crate::model::Model;

impl<M: Model> Relation<M> {
    /// Materialize the relation
    pub async fn load<E>(&self, db: &E) -> ModelResult<Vec<M>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        Ok(self
            .load_records(db)
            .await?
            .into_iter()
            .map(M::from_record)
            .collect())
    }

    /// Alias of [`Relation::load`]
    pub async fn to_vec<E>(&self, db: &E) -> ModelResult<Vec<M>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.load(db).await
    }

    pub(crate) async fn load_records<E>(&self, db: &E) -> ModelResult<Vec<Record>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none {
            return Ok(Vec::new());
        }
        self.check_lock(db)?;

        let plan = self.plan()?;
        if !plan.nodes.is_empty() {
            debug!(
                entity = M::ENTITY,
                strategy = if plan.is_eager() { "eager_load" } else { "preload" },
                associations = plan.nodes.len(),
                "Loading associations"
            );
        }
        let statement = self.records_statement(db.dialect(), &plan)?;
        let rows = self.fetch(db, &statement).await?;

        let mut records = if plan.is_eager() {
            let parents = hydrate_joined(&plan, &rows)?;
            self.window(parents)
        } else {
            let partial = !self.selects.is_empty();
            rows.iter()
                .map(|row| Record::from_row(plan.root, row.as_ref(), partial))
                .collect::<ModelResult<Vec<_>>>()?
        };

        preload_level(db, &plan, M::registry(), None, records.iter_mut().collect()).await?;

        let readonly = self.readonly.unwrap_or(false);
        let strict = self.strict_loading.unwrap_or(false);
        for record in records.iter_mut() {
            if readonly {
                record.set_readonly(true);
            }
            if strict {
                record.set_strict_loading(true);
            }
        }
        Ok(records)
    }

    /// Eager-join statements carry no LIMIT/OFFSET; the window applies to
    /// distinct parents here.
    fn window(&self, parents: Vec<Record>) -> Vec<Record> {
        let skip = self.offset_value.unwrap_or(0) as usize;
        let take = self.limit_count.map(|l| l as usize).unwrap_or(usize::MAX);
        parents.into_iter().skip(skip).take(take).collect()
    }

    fn check_lock<E>(&self, db: &E) -> ModelResult<()>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if self.lock.is_some() && !db.in_transaction() {
            return Err(ModelError::Transaction(
                "Row locks require an open transaction".to_string(),
            ));
        }
        Ok(())
    }

    async fn fetch<E>(&self, db: &E, statement: &Statement) -> ModelResult<Vec<Box<dyn DatabaseRow>>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        debug!(entity = M::ENTITY, sql = %statement.sql, params = statement.params.len(), "Executing relation");
        db.fetch_all(&statement.sql, &statement.params).await
    }

    /// Number of matching rows
    pub async fn count<E>(&self, db: &E) -> ModelResult<i64>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none {
            return Ok(0);
        }
        let plan = self.plan()?;
        let statement = self.count_statement(db.dialect(), &plan)?;
        let total = self.fetch_scalar(db, &statement).await?.as_i64().unwrap_or(0);
        if plan.is_eager() {
            let skip = self.offset_value.unwrap_or(0) as i64;
            let remaining = (total - skip).max(0);
            return Ok(match self.limit_count {
                Some(limit) => remaining.min(limit as i64),
                None => remaining,
            });
        }
        Ok(total)
    }

    /// Whether any row matches
    pub async fn exists<E>(&self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none || self.limit_count == Some(0) {
            return Ok(false);
        }
        let plan = self.plan()?;
        let statement = self.exists_statement(db.dialect(), &plan)?;
        Ok(!self.fetch(db, &statement).await?.is_empty())
    }

    /// Values of the given columns, one vector per row
    pub async fn pluck<E>(&self, db: &E, columns: &[&str]) -> ModelResult<Vec<Vec<DatabaseValue>>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none {
            return Ok(Vec::new());
        }
        let plan = self.plan()?;
        let refs: Vec<ColumnRef> = columns.iter().map(|c| ColumnRef::parse(c)).collect();
        let scope = plan.scope();
        let mut kinds = Vec::with_capacity(refs.len());
        for column in &refs {
            let (_, schema, name) = scope.resolve(column)?;
            kinds.push(schema.column_def(&name).map(|d| d.kind));
        }
        let statement = self.columns_statement(db.dialect(), &plan, &refs)?;
        let rows = self.fetch(db, &statement).await?;
        rows.iter()
            .map(|row| {
                kinds
                    .iter()
                    .enumerate()
                    .map(|(i, kind)| {
                        let value = row.get_by_index(i)?;
                        Ok(match kind {
                            Some(kind) => kind.coerce(value),
                            None => value,
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Values of one column decoded into `T`
    pub async fn pluck_column<T, E>(&self, db: &E, column: &str) -> ModelResult<Vec<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
        E: DatabaseExecutor + ?Sized,
    {
        self.pluck(db, &[column])
            .await?
            .into_iter()
            .map(|mut row| row.remove(0).decode())
            .collect()
    }

    /// First value of one column, if any row matches
    pub async fn pick<T, E>(&self, db: &E, column: &str) -> ModelResult<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
        E: DatabaseExecutor + ?Sized,
    {
        let mut values = self.clone().limit(1).pluck_column::<T, E>(db, column).await?;
        Ok(if values.is_empty() { None } else { Some(values.remove(0)) })
    }

    /// Primary keys of matching rows
    pub async fn ids<E>(&self, db: &E) -> ModelResult<Vec<i64>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let primary_key = self.schema()?.primary_key();
        self.pluck_column::<i64, E>(db, primary_key).await
    }

    /// First row by primary key, unless an ordering is present
    pub async fn first<E>(&self, db: &E) -> ModelResult<Option<M>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let relation = if self.orders.is_empty() {
            let primary_key = self.schema()?.primary_key();
            self.clone().order(primary_key, OrderDirection::Asc)
        } else {
            self.clone()
        };
        relation.take(db).await
    }

    pub async fn first_or_fail<E>(&self, db: &E) -> ModelResult<M>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.first(db).await?.ok_or_else(|| self.not_found("first"))
    }

    /// Last row: the ordering reversed (primary key DESC without one)
    pub async fn last<E>(&self, db: &E) -> ModelResult<Option<M>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.clone().reverse_order().take(db).await
    }

    pub async fn last_or_fail<E>(&self, db: &E) -> ModelResult<M>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.last(db).await?.ok_or_else(|| self.not_found("last"))
    }

    /// Any one matching row, no implied ordering
    pub async fn take<E>(&self, db: &E) -> ModelResult<Option<M>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let mut found = self.clone().limit(1).load(db).await?;
        Ok(if found.is_empty() { None } else { Some(found.remove(0)) })
    }

    pub async fn take_or_fail<E>(&self, db: &E) -> ModelResult<M>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.take(db).await?.ok_or_else(|| self.not_found("take"))
    }

    /// Row with the given primary key within this relation
    pub async fn find<E>(&self, db: &E, id: i64) -> ModelResult<Option<M>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        let primary_key = self.schema()?.primary_key();
        self.clone().where_eq(primary_key, id).take(db).await
    }

    pub async fn find_or_fail<E>(&self, db: &E, id: i64) -> ModelResult<M>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.find(db, id).await?.ok_or_else(|| {
            ModelError::NotFound(format!("Couldn't find {} with 'id'={}", M::ENTITY, id))
        })
    }

    /// First row whose attribute equals `value`
    pub async fn find_by<V, E>(&self, db: &E, attribute: &str, value: V) -> ModelResult<Option<M>>
    where
        V: Into<DatabaseValue>,
        E: DatabaseExecutor + ?Sized,
    {
        self.schema()?.resolve_column(attribute)?;
        self.clone().where_eq(attribute, value).take(db).await
    }

    pub async fn find_by_or_fail<V, E>(&self, db: &E, attribute: &str, value: V) -> ModelResult<M>
    where
        V: Into<DatabaseValue>,
        E: DatabaseExecutor + ?Sized,
    {
        let value = value.into();
        let description = format!("{:?}", value);
        self.find_by(db, attribute, value).await?.ok_or_else(|| {
            ModelError::NotFound(format!(
                "Couldn't find {} with {}={}",
                M::ENTITY,
                attribute,
                description
            ))
        })
    }

    fn not_found(&self, operation: &str) -> ModelError {
        ModelError::NotFound(format!("Couldn't find {} ({})", M::ENTITY, operation))
    }

    /// SUM of a column; 0 when nothing matches
    pub async fn sum<E>(&self, db: &E, column: &str) -> ModelResult<f64>
    where
        E: DatabaseExecutor + ?Sized,
    {
        Ok(self.aggregate(db, "SUM", column, true).await?.as_f64().unwrap_or(0.0))
    }

    /// AVG of a column; `None` when nothing matches
    pub async fn average<E>(&self, db: &E, column: &str) -> ModelResult<Option<f64>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        Ok(self.aggregate(db, "AVG", column, true).await?.as_f64())
    }

    pub async fn minimum<T, E>(&self, db: &E, column: &str) -> ModelResult<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
        E: DatabaseExecutor + ?Sized,
    {
        let value = self.aggregate(db, "MIN", column, false).await?;
        if value.is_null() {
            return Ok(None);
        }
        value.decode().map(Some)
    }

    pub async fn maximum<T, E>(&self, db: &E, column: &str) -> ModelResult<Option<T>>
    where
        T: for<'de> serde::Deserialize<'de>,
        E: DatabaseExecutor + ?Sized,
    {
        let value = self.aggregate(db, "MAX", column, false).await?;
        if value.is_null() {
            return Ok(None);
        }
        value.decode().map(Some)
    }

    async fn aggregate<E>(&self, db: &E, function: &'static str, column: &str, cast: bool) -> ModelResult<DatabaseValue>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none {
            return Ok(DatabaseValue::Null);
        }
        let plan = self.plan()?;
        let column = ColumnRef::parse(column);
        let (_, schema, name) = plan.scope().resolve(&column)?;
        let kind = schema.column_def(&name).map(|d| d.kind);
        let statement = self.aggregate_statement(db.dialect(), &plan, function, &column, cast)?;
        let value = self.fetch_scalar(db, &statement).await?;
        Ok(match (kind, cast) {
            (Some(kind), false) => kind.coerce(value),
            _ => value,
        })
    }

    /// Row count per group key, in query order
    pub async fn count_by_group<E>(&self, db: &E) -> ModelResult<Vec<(DatabaseValue, i64)>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none {
            return Ok(Vec::new());
        }
        let plan = self.plan()?;
        let statement = self.group_count_statement(db.dialect(), &plan)?;
        let width = self.groups.len();
        let rows = self.fetch(db, &statement).await?;
        rows.iter()
            .map(|row| {
                let key = if width == 1 {
                    row.get_by_index(0)?
                } else {
                    DatabaseValue::Array((0..width).map(|i| row.get_by_index(i)).collect::<Result<_, _>>()?)
                };
                let count = row.get_by_index(width)?.as_i64().unwrap_or(0);
                Ok((key, count))
            })
            .collect()
    }

    async fn fetch_scalar<E>(&self, db: &E, statement: &Statement) -> ModelResult<DatabaseValue>
    where
        E: DatabaseExecutor + ?Sized,
    {
        debug!(entity = M::ENTITY, sql = %statement.sql, "Executing scalar query");
        match db.fetch_optional(&statement.sql, &statement.params).await? {
            Some(row) => row.get_by_index(0),
            None => Ok(DatabaseValue::Null),
        }
    }

    /// Single UPDATE over every matching row; no callbacks, no locking
    pub async fn update_all<E>(&self, db: &E, assignments: &[(&str, DatabaseValue)]) -> ModelResult<u64>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none {
            return Ok(0);
        }
        let plan = self.plan()?;
        let statement = self.update_statement(db.dialect(), &plan, assignments)?;
        debug!(entity = M::ENTITY, sql = %statement.sql, "Updating relation");
        db.execute(&statement.sql, &statement.params).await
    }

    /// Single DELETE over every matching row
    pub async fn delete_all<E>(&self, db: &E) -> ModelResult<u64>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.check()?;
        if self.none {
            return Ok(0);
        }
        let plan = self.plan()?;
        let statement = self.delete_statement(db.dialect(), &plan)?;
        debug!(entity = M::ENTITY, sql = %statement.sql, "Deleting relation");
        db.execute(&statement.sql, &statement.params).await
    }

    /// Materialize as JSON objects, associations nested
    pub async fn to_json<E>(&self, db: &E) -> ModelResult<Vec<serde_json::Value>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        Ok(self.load_records(db).await?.iter().map(Record::to_json).collect())
    }
}
