//! Relation WHERE clause operations

use std::ops::RangeBounds;

use super::builder::Relation;
use super::types::*;
use crate::backends::DatabaseValue;
use crate::model::Model;
use crate::schema::AttributeEnum;

impl<M: Model> Relation<M> {
    /// Add a condition, AND-combined with the existing ones
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.wheres.push(predicate);
        self
    }

    /// Add a negated condition: `NOT (...)`.
    ///
    /// SQL three-valued logic applies: a row whose column is NULL matches
    /// neither the condition nor its negation.
    pub fn exclude(mut self, predicate: Predicate) -> Self {
        self.wheres.push(predicate.negate());
        self
    }

    /// Add WHERE condition with equality
    pub fn where_eq<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.filter(Predicate::eq(column, value))
    }

    /// Add WHERE condition with not equal
    pub fn where_ne<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.filter(Predicate::ne(column, value))
    }

    /// Add WHERE condition with greater than
    pub fn where_gt<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.filter(Predicate::gt(column, value))
    }

    /// Add WHERE condition with greater than or equal
    pub fn where_gte<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.filter(Predicate::gte(column, value))
    }

    /// Add WHERE condition with less than
    pub fn where_lt<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.filter(Predicate::lt(column, value))
    }

    /// Add WHERE condition with less than or equal
    pub fn where_lte<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.filter(Predicate::lte(column, value))
    }

    /// Add WHERE condition with LIKE
    pub fn where_like(self, column: &str, pattern: &str) -> Self {
        self.filter(Predicate::like(column, pattern))
    }

    /// Add WHERE condition with IN
    pub fn where_in<V, I>(self, column: &str, values: I) -> Self
    where
        V: Into<DatabaseValue>,
        I: IntoIterator<Item = V>,
    {
        self.filter(Predicate::is_in(column, values))
    }

    /// Add WHERE condition with IS NULL
    pub fn where_null(self, column: &str) -> Self {
        self.filter(Predicate::is_null(column))
    }

    /// Add WHERE condition with IS NOT NULL
    pub fn where_not_null(self, column: &str) -> Self {
        self.filter(Predicate::not_null(column))
    }

    /// Add WHERE condition with BETWEEN
    pub fn where_between<V: Into<DatabaseValue>>(self, column: &str, low: V, high: V) -> Self {
        self.filter(Predicate::between(column, low, high))
    }

    /// Add a range condition; either end may be open
    pub fn where_range<V, R>(self, column: &str, range: R) -> Self
    where
        V: Into<DatabaseValue> + Clone,
        R: RangeBounds<V>,
    {
        self.filter(Predicate::range(column, range))
    }

    /// Equality map: every pair must hold
    pub fn where_all<V: Into<DatabaseValue> + Clone>(self, pairs: &[(&str, V)]) -> Self {
        self.filter(Predicate::all_eq(pairs))
    }

    /// Parameterized raw fragment, `?` per bind
    pub fn where_raw<I, V>(self, sql: &str, binds: I) -> Self
    where
        V: Into<DatabaseValue>,
        I: IntoIterator<Item = V>,
    {
        self.filter(Predicate::raw(sql, binds))
    }

    /// `NOT (column = value)`
    pub fn where_not<V: Into<DatabaseValue>>(self, column: &str, value: V) -> Self {
        self.exclude(Predicate::eq(column, value))
    }

    /// Replace every existing condition on the predicate's attributes
    pub fn rewhere(mut self, predicate: Predicate) -> Self {
        if let Ok(schema) = self.schema() {
            let replaced = predicate.attribute_keys(schema.table());
            self.wheres
                .retain(|existing| existing.attribute_keys(schema.table()).is_disjoint(&replaced));
        }
        self.wheres.push(predicate);
        self
    }

    /// `(self conditions) OR (other conditions)`.
    ///
    /// Both relations must agree on every non-filter clause that changes the
    /// row set; otherwise the result fails with `InvalidQuery` when executed.
    pub fn or(mut self, other: Relation<M>) -> Self {
        let mut incompatible = Vec::new();
        if self.joins != other.joins {
            incompatible.push("joins");
        }
        if self.limit_count != other.limit_count {
            incompatible.push("limit");
        }
        if self.offset_value != other.offset_value {
            incompatible.push("offset");
        }
        if self.groups != other.groups {
            incompatible.push("group");
        }
        if self.havings != other.havings {
            incompatible.push("having");
        }
        if self.distinct.unwrap_or(false) != other.distinct.unwrap_or(false) {
            incompatible.push("distinct");
        }
        if self.lock != other.lock {
            incompatible.push("lock");
        }
        if !incompatible.is_empty() {
            self.record_error(format!(
                "Relation passed to or must be structurally compatible. Incompatible values: {}",
                incompatible.join(", ")
            ));
            return self;
        }

        self.errors.extend(other.errors);
        if other.none {
            return self;
        }
        if self.none {
            self.none = false;
            self.wheres = other.wheres;
            return self;
        }

        let left = std::mem::take(&mut self.wheres);
        self.wheres
            .push(Predicate::All(left).or(Predicate::All(other.wheres)));
        self
    }

    /// Rows whose enum attribute equals `value`
    pub fn with_enum<E: AttributeEnum>(self, value: E) -> Self {
        self.where_eq(E::COLUMN, value.value())
    }

    /// Rows whose enum attribute is set and differs from `value`
    pub fn without_enum<E: AttributeEnum>(self, value: E) -> Self {
        self.exclude(Predicate::eq(E::COLUMN, value.value()))
    }

    /// Rows with no associated record: `LEFT OUTER JOIN ... WHERE target.id IS NULL`
    pub fn where_missing(self, association: &str) -> Self {
        self.association_presence(association, JoinKind::LeftOuter)
    }

    /// Rows with at least one associated record
    pub fn where_associated(self, association: &str) -> Self {
        self.association_presence(association, JoinKind::Inner)
    }

    fn association_presence(mut self, association: &str, kind: JoinKind) -> Self {
        let target = self.schema().and_then(|schema| {
            let assoc = schema.association(association)?;
            M::registry().entity(&assoc.target)
        });
        match target {
            Ok(target) => {
                let key = ColumnRef {
                    table: Some(target.table().to_string()),
                    column: target.primary_key().to_string(),
                };
                self.joins.push(JoinSpec {
                    path: association.to_string(),
                    kind,
                });
                let predicate = match kind {
                    JoinKind::LeftOuter => Predicate::IsNull(key),
                    JoinKind::Inner => Predicate::NotNull(key),
                };
                self.filter(predicate)
            }
            Err(e) => {
                self.record_error(e.to_string());
                self
            }
        }
    }
}
