//! Relation SELECT operations

use super::builder::Relation;
use super::types::*;
use crate::model::Model;

impl<M: Model> Relation<M> {
    /// Restrict loaded columns; accumulates across calls.
    ///
    /// Reading an attribute outside the selection fails with
    /// `AttributeNotLoaded`, except the primary key.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.selects
            .extend(columns.iter().map(|c| SelectTerm::Column(ColumnRef::parse(c))));
        self
    }

    /// Replace the selection
    pub fn reselect(mut self, columns: &[&str]) -> Self {
        self.selects.clear();
        self.select(columns)
    }

    /// Add custom SELECT expression
    pub fn select_raw(mut self, expression: &str) -> Self {
        self.selects.push(SelectTerm::Raw(expression.to_string()));
        self
    }

    /// Toggle SELECT DISTINCT
    pub fn distinct(mut self, flag: bool) -> Self {
        self.distinct = Some(flag);
        self
    }
}
