//! Relation merging and clause removal

use super::builder::Relation;
use super::joins::push_unique;
use super::types::*;
use crate::model::Model;

impl<M: Model> Relation<M> {
    /// Combine two relations. Conditions of `other` replace conditions of
    /// `self` on the same attributes; list clauses append; scalar clauses
    /// (limit, offset, distinct, lock, readonly, strict loading) take
    /// `other`'s value when set.
    pub fn merge(mut self, other: Relation<M>) -> Self {
        let table = self
            .schema()
            .map(|s| s.table().to_string())
            .unwrap_or_default();
        let incoming: std::collections::BTreeSet<String> = other
            .wheres
            .iter()
            .flat_map(|p| p.attribute_keys(&table))
            .collect();
        self.wheres
            .retain(|existing| existing.attribute_keys(&table).is_disjoint(&incoming));
        self.wheres.extend(other.wheres);

        for predicate in other.havings {
            if !self.havings.contains(&predicate) {
                self.havings.push(predicate);
            }
        }
        self.orders.extend(other.orders);
        for column in other.groups {
            if !self.groups.contains(&column) {
                self.groups.push(column);
            }
        }
        for term in other.selects {
            if !self.selects.contains(&term) {
                self.selects.push(term);
            }
        }
        for spec in other.joins {
            if !self.joins.contains(&spec) {
                self.joins.push(spec);
            }
        }
        for path in &other.includes {
            push_unique(&mut self.includes, path);
        }
        for path in &other.preloads {
            push_unique(&mut self.preloads, path);
        }
        for path in &other.eager_loads {
            push_unique(&mut self.eager_loads, path);
        }
        for name in &other.references {
            push_unique(&mut self.references, name);
        }

        self.limit_count = other.limit_count.or(self.limit_count);
        self.offset_value = other.offset_value.or(self.offset_value);
        self.distinct = other.distinct.or(self.distinct);
        self.lock = other.lock.or(self.lock);
        self.readonly = other.readonly.or(self.readonly);
        self.strict_loading = other.strict_loading.or(self.strict_loading);
        self.none |= other.none;
        self.errors.extend(other.errors);
        self
    }

    /// Remove every clause of the given kinds
    pub fn unscope(mut self, kinds: &[ClauseKind]) -> Self {
        for kind in kinds {
            self.clear(*kind);
        }
        self
    }

    /// Remove the conditions that mention `column`
    pub fn unscope_where(mut self, column: &str) -> Self {
        let table = self
            .schema()
            .map(|s| s.table().to_string())
            .unwrap_or_default();
        let key = ColumnRef::parse(column).key(&table);
        self.wheres
            .retain(|predicate| !predicate.attribute_keys(&table).contains(&key));
        self
    }

    /// Keep only the clauses of the given kinds
    pub fn only(mut self, kinds: &[ClauseKind]) -> Self {
        for kind in ClauseKind::ALL {
            if !kinds.contains(&kind) {
                self.clear(kind);
            }
        }
        self
    }

    fn clear(&mut self, kind: ClauseKind) {
        match kind {
            ClauseKind::Where => self.wheres.clear(),
            ClauseKind::Order => self.orders.clear(),
            ClauseKind::Group => self.groups.clear(),
            ClauseKind::Having => self.havings.clear(),
            ClauseKind::Limit => self.limit_count = None,
            ClauseKind::Offset => self.offset_value = None,
            ClauseKind::Select => self.selects.clear(),
            ClauseKind::Joins => self.joins.clear(),
            ClauseKind::Includes => {
                self.includes.clear();
                self.preloads.clear();
                self.eager_loads.clear();
                self.references.clear();
            }
            ClauseKind::Lock => self.lock = None,
            ClauseKind::Readonly => self.readonly = None,
            ClauseKind::Distinct => self.distinct = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabaseValue, SqlDialect};
    use crate::test_support::Title;

    #[test]
    fn test_merge_overrides_conditions_on_same_attribute() {
        let drafts = Relation::<Title>::unscoped()
            .where_eq("visibility", "draft")
            .where_gt("price", 5.0);
        let published = Relation::<Title>::unscoped().where_eq("visibility", "published");

        let merged = drafts.merge(published);
        let statement = merged.to_statement(SqlDialect::PostgreSQL).unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"titles\".* FROM \"titles\" WHERE \"titles\".\"price\" > $1 AND \"titles\".\"visibility\" = $2"
        );
        assert_eq!(
            statement.params,
            vec![DatabaseValue::Float64(5.0), DatabaseValue::Int64(1)]
        );
    }

    #[test]
    fn test_merge_scalars_prefer_argument() {
        let merged = Relation::<Title>::new()
            .limit(10)
            .order_by("name")
            .merge(Relation::<Title>::new().limit(3).readonly());
        assert_eq!(merged.limit_value(), Some(3));
        assert!(merged.is_readonly());
        assert_eq!(merged.order_terms().len(), 1);

        let kept = Relation::<Title>::new().offset(4).merge(Relation::<Title>::new());
        assert_eq!(kept.offset_value(), Some(4));
    }

    #[test]
    fn test_unscope_removes_default_scope() {
        let sql = Relation::<Title>::new()
            .order_by("name")
            .unscope(&[ClauseKind::Where])
            .to_sql()
            .unwrap();
        assert_eq!(sql, "SELECT \"titles\".* FROM \"titles\" ORDER BY \"titles\".\"name\" ASC");
    }

    #[test]
    fn test_unscope_where_targets_one_column() {
        let relation = Relation::<Title>::new()
            .where_eq("name", "Emma")
            .unscope_where("year");
        assert_eq!(relation.where_clauses().len(), 1);
        assert_eq!(relation.where_clauses()[0], Predicate::eq("name", "Emma"));
    }

    #[test]
    fn test_only_keeps_listed_clauses() {
        let relation = Relation::<Title>::new()
            .where_eq("name", "Emma")
            .order_by("year")
            .limit(2)
            .only(&[ClauseKind::Where, ClauseKind::Limit]);
        assert_eq!(relation.where_clauses().len(), 2);
        assert!(relation.order_terms().is_empty());
        assert_eq!(relation.limit_value(), Some(2));
    }
}
