//! Relation - the immutable query descriptor
//!
//! A `Relation<M>` accumulates clauses and only talks to storage when a
//! terminal operation runs. Every builder method consumes the relation and
//! returns a new one; since relations are `Clone`, a base relation can be kept
//! and extended in several directions.

use std::fmt;
use std::marker::PhantomData;

use super::types::*;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::schema::EntitySchema;

/// Relation builder for one entity type
pub struct Relation<M> {
    pub(crate) wheres: Vec<Predicate>,
    pub(crate) havings: Vec<Predicate>,
    pub(crate) orders: Vec<OrderTerm>,
    pub(crate) groups: Vec<ColumnRef>,
    pub(crate) selects: Vec<SelectTerm>,
    pub(crate) joins: Vec<JoinSpec>,
    pub(crate) includes: Vec<String>,
    pub(crate) preloads: Vec<String>,
    pub(crate) eager_loads: Vec<String>,
    pub(crate) references: Vec<String>,
    pub(crate) limit_count: Option<u64>,
    pub(crate) offset_value: Option<u64>,
    pub(crate) distinct: Option<bool>,
    pub(crate) lock: Option<LockMode>,
    pub(crate) readonly: Option<bool>,
    pub(crate) strict_loading: Option<bool>,
    pub(crate) none: bool,
    /// Input errors, reported by the next terminal operation
    pub(crate) errors: Vec<String>,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Relation<M> {
    fn clone(&self) -> Self {
        Self {
            wheres: self.wheres.clone(),
            havings: self.havings.clone(),
            orders: self.orders.clone(),
            groups: self.groups.clone(),
            selects: self.selects.clone(),
            joins: self.joins.clone(),
            includes: self.includes.clone(),
            preloads: self.preloads.clone(),
            eager_loads: self.eager_loads.clone(),
            references: self.references.clone(),
            limit_count: self.limit_count,
            offset_value: self.offset_value,
            distinct: self.distinct,
            lock: self.lock,
            readonly: self.readonly,
            strict_loading: self.strict_loading,
            none: self.none,
            errors: self.errors.clone(),
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Relation<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("entity", &std::any::type_name::<M>())
            .field("wheres", &self.wheres)
            .field("orders", &self.orders)
            .field("joins", &self.joins)
            .field("includes", &self.includes)
            .field("limit", &self.limit_count)
            .field("offset", &self.offset_value)
            .field("none", &self.none)
            .finish_non_exhaustive()
    }
}

impl<M: Model> Default for Relation<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> Relation<M> {
    /// Relation over every visible row: the entity's default scope applied
    pub fn new() -> Self {
        let mut relation = Self::unscoped();
        match M::schema() {
            Ok(schema) => {
                if let Some(scope) = schema.default_scope_predicate() {
                    relation.wheres.push(scope);
                }
            }
            Err(e) => relation.errors.push(e.to_string()),
        }
        relation
    }

    /// Relation without the default scope
    pub fn unscoped() -> Self {
        Self {
            wheres: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            groups: Vec::new(),
            selects: Vec::new(),
            joins: Vec::new(),
            includes: Vec::new(),
            preloads: Vec::new(),
            eager_loads: Vec::new(),
            references: Vec::new(),
            limit_count: None,
            offset_value: None,
            distinct: None,
            lock: None,
            readonly: None,
            strict_loading: None,
            none: false,
            errors: Vec::new(),
            _model: PhantomData,
        }
    }

    /// Relation that materializes to nothing without touching storage
    pub fn none(mut self) -> Self {
        self.none = true;
        self
    }

    pub fn limit(mut self, count: u64) -> Self {
        self.limit_count = Some(count);
        self
    }

    pub fn offset(mut self, count: u64) -> Self {
        self.offset_value = Some(count);
        self
    }

    /// Mark loaded records as immutable
    pub fn readonly(mut self) -> Self {
        self.readonly = Some(true);
        self
    }

    /// Mark loaded records so lazy association loads fail
    pub fn strict_loading(mut self) -> Self {
        self.strict_loading = Some(true);
        self
    }

    /// Read rows under a row lock; only valid inside a transaction
    pub fn lock(mut self, mode: LockMode) -> Self {
        self.lock = Some(mode);
        self
    }

    pub fn is_none(&self) -> bool {
        self.none
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly.unwrap_or(false)
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct.unwrap_or(false)
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit_count
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset_value
    }

    pub fn where_clauses(&self) -> &[Predicate] {
        &self.wheres
    }

    pub fn order_terms(&self) -> &[OrderTerm] {
        &self.orders
    }

    pub(crate) fn schema(&self) -> ModelResult<&'static EntitySchema> {
        M::schema()
    }

    pub(crate) fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Fail with the first deferred input error, if any
    pub(crate) fn check(&self) -> ModelResult<()> {
        if let Some(first) = self.errors.first() {
            return Err(ModelError::InvalidQuery(first.clone()));
        }
        if !self.havings.is_empty() && self.groups.is_empty() {
            return Err(ModelError::invalid_query(
                "having requires a group clause",
            ));
        }
        Ok(())
    }
}
