//! Relation ORDER BY, GROUP BY, HAVING operations

use super::builder::Relation;
use super::types::*;
use crate::backends::DatabaseValue;
use crate::model::Model;

impl<M: Model> Relation<M> {
    /// Append an ORDER BY term
    pub fn order(mut self, column: &str, direction: OrderDirection) -> Self {
        self.orders.push(OrderTerm::Column {
            column: ColumnRef::parse(column),
            direction,
        });
        self
    }

    /// Add ORDER BY clause (ascending)
    pub fn order_by(self, column: &str) -> Self {
        self.order(column, OrderDirection::Asc)
    }

    /// Add ORDER BY clause (descending)
    pub fn order_by_desc(self, column: &str) -> Self {
        self.order(column, OrderDirection::Desc)
    }

    /// Append an ORDER BY expression verbatim
    pub fn order_raw(mut self, expression: &str) -> Self {
        self.orders.push(OrderTerm::Raw(expression.to_string()));
        self
    }

    /// Replace the whole ordering
    pub fn reorder(mut self, column: &str, direction: OrderDirection) -> Self {
        self.orders.clear();
        self.order(column, direction)
    }

    /// Flip every ordering term; with no ordering, order by primary key DESC
    pub fn reverse_order(mut self) -> Self {
        if self.orders.is_empty() {
            let primary_key = self
                .schema()
                .map(|s| s.primary_key().to_string())
                .unwrap_or_else(|_| "id".to_string());
            return self.order(&primary_key, OrderDirection::Desc);
        }
        self.orders = self.orders.iter().map(OrderTerm::reversed).collect();
        self
    }

    /// Add GROUP BY clause
    pub fn group_by(mut self, column: &str) -> Self {
        self.groups.push(ColumnRef::parse(column));
        self
    }

    /// Replace the grouping
    pub fn regroup(mut self, columns: &[&str]) -> Self {
        self.groups = columns.iter().map(|c| ColumnRef::parse(c)).collect();
        self
    }

    /// Add HAVING condition; requires a grouping by execution time
    pub fn having(mut self, predicate: Predicate) -> Self {
        self.havings.push(predicate);
        self
    }

    /// Add HAVING fragment, `?` per bind
    pub fn having_raw<I, V>(self, sql: &str, binds: I) -> Self
    where
        V: Into<DatabaseValue>,
        I: IntoIterator<Item = V>,
    {
        self.having(Predicate::raw(sql, binds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Title;

    #[test]
    fn test_reverse_order_flips_each_term() {
        let sql = Relation::<Title>::unscoped()
            .order_by("year")
            .order_by_desc("name")
            .reverse_order()
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"titles\".* FROM \"titles\" ORDER BY \"titles\".\"year\" DESC, \"titles\".\"name\" ASC"
        );
    }

    #[test]
    fn test_reverse_order_without_ordering_uses_primary_key() {
        let relation = Relation::<Title>::unscoped().reverse_order();
        assert_eq!(
            relation.to_sql().unwrap(),
            "SELECT \"titles\".* FROM \"titles\" ORDER BY \"titles\".\"id\" DESC"
        );
    }

    #[test]
    fn test_reorder_replaces_and_regroup_replaces() {
        let sql = Relation::<Title>::unscoped()
            .order_by("year")
            .reorder("price", OrderDirection::Desc)
            .group_by("year")
            .regroup(&["writer_id"])
            .select(&["writer_id"])
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"titles\".\"writer_id\" FROM \"titles\" GROUP BY \"titles\".\"writer_id\" \
             ORDER BY \"titles\".\"price\" DESC"
        );
    }
}
