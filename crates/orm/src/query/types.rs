//! Query Builder Types - predicates, ordering terms and clause categories

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Bound, RangeBounds};

use crate::backends::DatabaseValue;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::Equal => write!(f, "="),
            Operator::NotEqual => write!(f, "<>"),
            Operator::GreaterThan => write!(f, ">"),
            Operator::GreaterThanOrEqual => write!(f, ">="),
            Operator::LessThan => write!(f, "<"),
            Operator::LessThanOrEqual => write!(f, "<="),
            Operator::Like => write!(f, "LIKE"),
            Operator::NotLike => write!(f, "NOT LIKE"),
        }
    }
}

/// A column reference, optionally qualified with a table name (`books.price`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnRef {
    pub table: Option<String>,
    pub column: String,
}

impl ColumnRef {
    /// Parse `column` or `table.column`
    pub fn parse(reference: &str) -> Self {
        match reference.trim().split_once('.') {
            Some((table, column)) => Self {
                table: Some(table.to_string()),
                column: column.to_string(),
            },
            None => Self {
                table: None,
                column: reference.trim().to_string(),
            },
        }
    }

    /// Attribute key relative to the relation's own table.
    ///
    /// `price` and `books.price` are the same attribute on a books relation.
    pub fn key(&self, own_table: &str) -> String {
        match &self.table {
            Some(table) if table != own_table => format!("{}.{}", table, self.column),
            _ => self.column.clone(),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(reference: &str) -> Self {
        ColumnRef::parse(reference)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.column),
            None => write!(f, "{}", self.column),
        }
    }
}

/// A filter condition. Predicates are plain data; they are validated against
/// the schema registry and rendered to SQL only when a relation is executed.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        operator: Operator,
        value: DatabaseValue,
    },
    In {
        column: ColumnRef,
        values: Vec<DatabaseValue>,
    },
    Range {
        column: ColumnRef,
        start: Bound<DatabaseValue>,
        end: Bound<DatabaseValue>,
    },
    IsNull(ColumnRef),
    NotNull(ColumnRef),
    /// Parameterized fragment using `?` placeholders
    Raw {
        sql: String,
        binds: Vec<DatabaseValue>,
    },
    Not(Box<Predicate>),
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
}

impl Predicate {
    fn compare(column: &str, operator: Operator, value: DatabaseValue) -> Self {
        Predicate::Compare {
            column: ColumnRef::parse(column),
            operator,
            value,
        }
    }

    /// `column = value`; a null value becomes `IS NULL`
    pub fn eq<V: Into<DatabaseValue>>(column: &str, value: V) -> Self {
        match value.into() {
            DatabaseValue::Null => Predicate::IsNull(ColumnRef::parse(column)),
            value => Self::compare(column, Operator::Equal, value),
        }
    }

    /// `column <> value`; a null value becomes `IS NOT NULL`
    pub fn ne<V: Into<DatabaseValue>>(column: &str, value: V) -> Self {
        match value.into() {
            DatabaseValue::Null => Predicate::NotNull(ColumnRef::parse(column)),
            value => Self::compare(column, Operator::NotEqual, value),
        }
    }

    pub fn gt<V: Into<DatabaseValue>>(column: &str, value: V) -> Self {
        Self::compare(column, Operator::GreaterThan, value.into())
    }

    pub fn gte<V: Into<DatabaseValue>>(column: &str, value: V) -> Self {
        Self::compare(column, Operator::GreaterThanOrEqual, value.into())
    }

    pub fn lt<V: Into<DatabaseValue>>(column: &str, value: V) -> Self {
        Self::compare(column, Operator::LessThan, value.into())
    }

    pub fn lte<V: Into<DatabaseValue>>(column: &str, value: V) -> Self {
        Self::compare(column, Operator::LessThanOrEqual, value.into())
    }

    pub fn like(column: &str, pattern: &str) -> Self {
        Self::compare(column, Operator::Like, pattern.into())
    }

    pub fn not_like(column: &str, pattern: &str) -> Self {
        Self::compare(column, Operator::NotLike, pattern.into())
    }

    /// `column IN (...)`; an empty list matches nothing
    pub fn is_in<V, I>(column: &str, values: I) -> Self
    where
        V: Into<DatabaseValue>,
        I: IntoIterator<Item = V>,
    {
        Predicate::In {
            column: ColumnRef::parse(column),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Inclusive `BETWEEN low AND high`
    pub fn between<V: Into<DatabaseValue>>(column: &str, low: V, high: V) -> Self {
        Predicate::Range {
            column: ColumnRef::parse(column),
            start: Bound::Included(low.into()),
            end: Bound::Included(high.into()),
        }
    }

    /// Any Rust range: `2000..=2010`, `..1970`, `500.0..`
    pub fn range<V, R>(column: &str, range: R) -> Self
    where
        V: Into<DatabaseValue> + Clone,
        R: RangeBounds<V>,
    {
        let convert = |bound: Bound<&V>| match bound {
            Bound::Included(v) => Bound::Included(v.clone().into()),
            Bound::Excluded(v) => Bound::Excluded(v.clone().into()),
            Bound::Unbounded => Bound::Unbounded,
        };
        Predicate::Range {
            column: ColumnRef::parse(column),
            start: convert(range.start_bound()),
            end: convert(range.end_bound()),
        }
    }

    pub fn is_null(column: &str) -> Self {
        Predicate::IsNull(ColumnRef::parse(column))
    }

    pub fn not_null(column: &str) -> Self {
        Predicate::NotNull(ColumnRef::parse(column))
    }

    /// Raw SQL fragment with `?` placeholders, one bind per placeholder
    pub fn raw<I, V>(sql: &str, binds: I) -> Self
    where
        V: Into<DatabaseValue>,
        I: IntoIterator<Item = V>,
    {
        Predicate::Raw {
            sql: sql.to_string(),
            binds: binds.into_iter().map(Into::into).collect(),
        }
    }

    /// Equality map: every pair must hold
    pub fn all_eq<V: Into<DatabaseValue> + Clone>(pairs: &[(&str, V)]) -> Self {
        Predicate::All(
            pairs
                .iter()
                .map(|(column, value)| Predicate::eq(column, value.clone()))
                .collect(),
        )
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::All(mut parts) => {
                parts.push(other);
                Predicate::All(parts)
            }
            first => Predicate::All(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Any(mut parts) => {
                parts.push(other);
                Predicate::Any(parts)
            }
            first => Predicate::Any(vec![first, other]),
        }
    }

    /// Every column this predicate constrains, keyed relative to `own_table`.
    /// Raw fragments constrain no known attribute.
    pub fn attribute_keys(&self, own_table: &str) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        self.collect_keys(own_table, &mut keys);
        keys
    }

    fn collect_keys(&self, own_table: &str, keys: &mut BTreeSet<String>) {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Range { column, .. }
            | Predicate::IsNull(column)
            | Predicate::NotNull(column) => {
                keys.insert(column.key(own_table));
            }
            Predicate::Raw { .. } => {}
            Predicate::Not(inner) => inner.collect_keys(own_table, keys),
            Predicate::All(parts) | Predicate::Any(parts) => {
                for part in parts {
                    part.collect_keys(own_table, keys);
                }
            }
        }
    }

    /// Column references, for validation and table-reference detection
    pub fn columns(&self) -> Vec<&ColumnRef> {
        match self {
            Predicate::Compare { column, .. }
            | Predicate::In { column, .. }
            | Predicate::Range { column, .. }
            | Predicate::IsNull(column)
            | Predicate::NotNull(column) => vec![column],
            Predicate::Raw { .. } => Vec::new(),
            Predicate::Not(inner) => inner.columns(),
            Predicate::All(parts) | Predicate::Any(parts) => {
                parts.iter().flat_map(|p| p.columns()).collect()
            }
        }
    }
}

/// Order by direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

impl OrderDirection {
    pub fn reversed(self) -> Self {
        match self {
            OrderDirection::Asc => OrderDirection::Desc,
            OrderDirection::Desc => OrderDirection::Asc,
        }
    }
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderDirection::Asc => write!(f, "ASC"),
            OrderDirection::Desc => write!(f, "DESC"),
        }
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq)]
pub enum OrderTerm {
    Column {
        column: ColumnRef,
        direction: OrderDirection,
    },
    Raw(String),
}

impl OrderTerm {
    pub fn reversed(&self) -> Self {
        match self {
            OrderTerm::Column { column, direction } => OrderTerm::Column {
                column: column.clone(),
                direction: direction.reversed(),
            },
            OrderTerm::Raw(sql) => {
                let trimmed = sql.trim_end();
                let upper = trimmed.to_uppercase();
                if upper.ends_with(" DESC") {
                    OrderTerm::Raw(format!("{} ASC", &trimmed[..trimmed.len() - 5]))
                } else if upper.ends_with(" ASC") {
                    OrderTerm::Raw(format!("{} DESC", &trimmed[..trimmed.len() - 4]))
                } else {
                    OrderTerm::Raw(format!("{} DESC", trimmed))
                }
            }
        }
    }
}

/// One projected column or expression
#[derive(Debug, Clone, PartialEq)]
pub enum SelectTerm {
    Column(ColumnRef),
    Raw(String),
}

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Inner => write!(f, "INNER JOIN"),
            JoinKind::LeftOuter => write!(f, "LEFT OUTER JOIN"),
        }
    }
}

/// Association path to join, in dot notation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub path: String,
    pub kind: JoinKind,
}

/// Row lock requested with `lock`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    ForUpdate,
    ForShare,
}

impl LockMode {
    pub fn as_sql(&self) -> &'static str {
        match self {
            LockMode::ForUpdate => "FOR UPDATE",
            LockMode::ForShare => "FOR SHARE",
        }
    }
}

/// Clause categories addressed by `unscope` and `only`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClauseKind {
    Where,
    Order,
    Group,
    Having,
    Limit,
    Offset,
    Select,
    Joins,
    Includes,
    Lock,
    Readonly,
    Distinct,
}

impl ClauseKind {
    pub const ALL: [ClauseKind; 12] = [
        ClauseKind::Where,
        ClauseKind::Order,
        ClauseKind::Group,
        ClauseKind::Having,
        ClauseKind::Limit,
        ClauseKind::Offset,
        ClauseKind::Select,
        ClauseKind::Joins,
        ClauseKind::Includes,
        ClauseKind::Lock,
        ClauseKind::Readonly,
        ClauseKind::Distinct,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eq_with_null_becomes_is_null() {
        assert_eq!(
            Predicate::eq("isbn", DatabaseValue::Null),
            Predicate::IsNull(ColumnRef::parse("isbn"))
        );
        assert_eq!(
            Predicate::ne("isbn", Option::<String>::None),
            Predicate::NotNull(ColumnRef::parse("isbn"))
        );
    }

    #[test]
    fn test_attribute_keys_normalize_own_table() {
        let predicate = Predicate::eq("books.price", 10.0)
            .and(Predicate::gt("year_published", 2000))
            .and(Predicate::eq("authors.name", "Ann"))
            .and(Predicate::raw("price > ?", [1]));
        let keys: Vec<String> = predicate.attribute_keys("books").into_iter().collect();
        assert_eq!(keys, vec!["authors.name", "price", "year_published"]);
    }

    #[test]
    fn test_range_bounds_are_preserved() {
        match Predicate::range("year_published", ..1970) {
            Predicate::Range { start, end, .. } => {
                assert_eq!(start, Bound::Unbounded);
                assert_eq!(end, Bound::Excluded(DatabaseValue::Int32(1970)));
            }
            other => panic!("unexpected predicate {:?}", other),
        }
    }

    #[test]
    fn test_raw_order_reversal() {
        assert_eq!(
            OrderTerm::Raw("price DESC".into()).reversed(),
            OrderTerm::Raw("price ASC".into())
        );
        assert_eq!(
            OrderTerm::Raw("LENGTH(title)".into()).reversed(),
            OrderTerm::Raw("LENGTH(title) DESC".into())
        );
    }
}
