//! Relation SQL generation
//!
//! Rendering resolves every column against the schema registry, binds every
//! value as a parameter (`$n` or `?` by dialect) and fails with `InvalidQuery`
//! on unknown identifiers, so malformed relations never reach storage.

use std::collections::BTreeSet;
use std::ops::Bound;

use super::builder::Relation;
use super::joins::{JoinClause, JoinPlan};
use super::types::*;
use crate::backends::{DatabaseValue, SqlDialect};
use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::schema::{Association, EntitySchema, SchemaRegistry};

/// A rendered statement and its bind parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<DatabaseValue>,
}

/// Accumulates SQL text and parameters for one statement
pub(crate) struct SqlWriter {
    dialect: SqlDialect,
    sql: String,
    params: Vec<DatabaseValue>,
}

impl SqlWriter {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    pub fn quote(&self, identifier: &str) -> String {
        self.dialect.quote_identifier(identifier)
    }

    /// `"alias"."column"`
    pub fn qualified(&self, alias: &str, column: &str) -> String {
        format!("{}.{}", self.quote(alias), self.quote(column))
    }

    /// Bind a value. NULL is written inline so untyped parameters never need
    /// a type from context.
    pub fn bind(&mut self, value: DatabaseValue) {
        if value.is_null() {
            self.sql.push_str("NULL");
            return;
        }
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
    }

    /// Copy a raw fragment, replacing each `?` outside string literals with a
    /// bound parameter
    pub fn push_raw(&mut self, fragment: &str, binds: &[DatabaseValue]) -> ModelResult<()> {
        let placeholders = count_placeholders(fragment);
        if placeholders != binds.len() {
            return Err(ModelError::InvalidQuery(format!(
                "Wrong number of bind variables ({} for {}) in: {}",
                binds.len(),
                placeholders,
                fragment
            )));
        }
        let mut remaining = binds.iter();
        let mut in_literal = false;
        for ch in fragment.chars() {
            match ch {
                '\'' => {
                    in_literal = !in_literal;
                    self.sql.push(ch);
                }
                '?' if !in_literal => {
                    if let Some(value) = remaining.next() {
                        self.bind(value.clone());
                    }
                }
                _ => self.sql.push(ch),
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Statement {
        Statement {
            sql: self.sql,
            params: self.params,
        }
    }
}

fn count_placeholders(fragment: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for ch in fragment.chars() {
        match ch {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

/// Tables visible to column references of one statement; the first entry
/// answers unqualified names
#[derive(Debug, Clone)]
pub(crate) struct QueryScope {
    tables: Vec<(String, &'static EntitySchema)>,
}

impl QueryScope {
    pub fn single(alias: &str, schema: &'static EntitySchema) -> Self {
        Self {
            tables: vec![(alias.to_string(), schema)],
        }
    }

    pub fn from_plan(joins: &JoinPlan) -> Self {
        Self {
            tables: joins.tables(),
        }
    }

    /// Resolve to `(alias, entity, column)`
    pub fn resolve(&self, column: &ColumnRef) -> ModelResult<(&str, &'static EntitySchema, String)> {
        let (alias, schema) = match &column.table {
            None => {
                let (alias, schema) = &self.tables[0];
                (alias.as_str(), *schema)
            }
            Some(table) => {
                let found = self
                    .tables
                    .iter()
                    .find(|(alias, _)| alias == table)
                    .ok_or_else(|| {
                        ModelError::InvalidQuery(format!(
                            "Table '{}' is not part of this query; join or include its association first",
                            table
                        ))
                    })?;
                (found.0.as_str(), found.1)
            }
        };
        let resolved = schema.resolve_column(&column.column)?.to_string();
        Ok((alias, schema, resolved))
    }
}

/// Translate enum names to their stored integer
fn enum_value(schema: &EntitySchema, column: &str, value: DatabaseValue) -> ModelResult<DatabaseValue> {
    match (schema.enum_for(column), value) {
        (Some(definition), DatabaseValue::String(name)) => definition
            .value_of(&name)
            .map(DatabaseValue::Int64)
            .ok_or_else(|| {
                ModelError::InvalidQuery(format!(
                    "'{}' is not a valid {} for {}",
                    name,
                    column,
                    schema.name()
                ))
            }),
        (_, value) => Ok(value),
    }
}

pub(crate) fn write_predicate(w: &mut SqlWriter, scope: &QueryScope, predicate: &Predicate) -> ModelResult<()> {
    match predicate {
        Predicate::Compare {
            column,
            operator,
            value,
        } => {
            let (alias, schema, column) = scope.resolve(column)?;
            let value = enum_value(schema, &column, value.clone())?;
            w.push(&w.qualified(alias, &column));
            w.push(&format!(" {} ", operator));
            w.bind(value);
        }
        Predicate::In { column, values } => {
            if values.is_empty() {
                w.push("1=0");
                return Ok(());
            }
            let (alias, schema, column) = scope.resolve(column)?;
            w.push(&w.qualified(alias, &column));
            w.push(" IN (");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.bind(enum_value(schema, &column, value.clone())?);
            }
            w.push(")");
        }
        Predicate::Range { column, start, end } => {
            let (alias, _, column) = scope.resolve(column)?;
            let target = w.qualified(alias, &column);
            match (start, end) {
                (Bound::Unbounded, Bound::Unbounded) => w.push("1=1"),
                (Bound::Included(low), Bound::Included(high)) => {
                    w.push(&target);
                    w.push(" BETWEEN ");
                    w.bind(low.clone());
                    w.push(" AND ");
                    w.bind(high.clone());
                }
                (start, end) => {
                    let mut parts = Vec::new();
                    match start {
                        Bound::Included(v) => parts.push((">=", v)),
                        Bound::Excluded(v) => parts.push((">", v)),
                        Bound::Unbounded => {}
                    }
                    match end {
                        Bound::Included(v) => parts.push(("<=", v)),
                        Bound::Excluded(v) => parts.push(("<", v)),
                        Bound::Unbounded => {}
                    }
                    let wrap = parts.len() > 1;
                    if wrap {
                        w.push("(");
                    }
                    for (i, (operator, value)) in parts.into_iter().enumerate() {
                        if i > 0 {
                            w.push(" AND ");
                        }
                        w.push(&format!("{} {} ", target, operator));
                        w.bind(value.clone());
                    }
                    if wrap {
                        w.push(")");
                    }
                }
            }
        }
        Predicate::IsNull(column) => {
            let (alias, _, column) = scope.resolve(column)?;
            w.push(&format!("{} IS NULL", w.qualified(alias, &column)));
        }
        Predicate::NotNull(column) => {
            let (alias, _, column) = scope.resolve(column)?;
            w.push(&format!("{} IS NOT NULL", w.qualified(alias, &column)));
        }
        Predicate::Raw { sql, binds } => {
            w.push("(");
            w.push_raw(sql, binds)?;
            w.push(")");
        }
        Predicate::Not(inner) => {
            w.push("NOT (");
            write_predicate(w, scope, inner)?;
            w.push(")");
        }
        Predicate::All(parts) => write_group(w, scope, parts, " AND ", "1=1")?,
        Predicate::Any(parts) => write_group(w, scope, parts, " OR ", "1=0")?,
    }
    Ok(())
}

fn write_group(
    w: &mut SqlWriter,
    scope: &QueryScope,
    parts: &[Predicate],
    separator: &str,
    empty: &str,
) -> ModelResult<()> {
    match parts {
        [] => w.push(empty),
        [only] => write_predicate(w, scope, only)?,
        _ => {
            w.push("(");
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    w.push(separator);
                }
                write_predicate(w, scope, part)?;
            }
            w.push(")");
        }
    }
    Ok(())
}

/// One eager-loaded association in an include tree
#[derive(Debug, Clone)]
pub(crate) struct IncludeNode {
    pub path: String,
    pub name: String,
    /// `None` for children of the root
    pub parent: Option<usize>,
    pub association: &'static Association,
    pub owner: &'static EntitySchema,
    pub entity: &'static EntitySchema,
    /// Loaded by the main statement through a LEFT OUTER JOIN
    pub eager: bool,
    pub alias: Option<String>,
}

/// Everything resolved against the registry for one execution
#[derive(Debug, Clone)]
pub(crate) struct QueryPlan {
    pub root: &'static EntitySchema,
    pub joins: JoinPlan,
    pub nodes: Vec<IncludeNode>,
}

impl QueryPlan {
    /// True when at least one association is loaded through the main statement
    pub fn is_eager(&self) -> bool {
        self.nodes.iter().any(|n| n.eager)
    }

    pub fn scope(&self) -> QueryScope {
        QueryScope::from_plan(&self.joins)
    }

    /// Column alias for eager-join hydration: `t0_c3` is root column 3
    pub fn column_alias(node: Option<usize>, column_index: usize) -> String {
        match node {
            None => format!("t0_c{}", column_index),
            Some(n) => format!("t{}_c{}", n + 1, column_index),
        }
    }
}

/// Which projection a SELECT renders
pub(crate) enum Projection<'a> {
    Records,
    Count,
    Exists,
    Columns(&'a [ColumnRef]),
    Aggregate {
        function: &'static str,
        column: &'a ColumnRef,
        cast: bool,
    },
    GroupCount,
}

impl<M: Model> Relation<M> {
    /// Resolve joins and the include tree against the registry
    pub(crate) fn plan(&self) -> ModelResult<QueryPlan> {
        let registry = M::registry();
        let root = self.schema()?;
        let mut joins = JoinPlan::new(registry, root);
        for spec in &self.joins {
            joins.add_path(&spec.path, spec.kind)?;
        }

        let mut nodes: Vec<IncludeNode> = Vec::new();
        for path in self
            .eager_loads
            .iter()
            .chain(self.includes.iter())
            .chain(self.preloads.iter())
        {
            ensure_node(&mut nodes, registry, root, path)?;
        }

        let join_includes = self.includes_need_join(&nodes);
        let mut eager_paths: Vec<&String> = self.eager_loads.iter().collect();
        if join_includes {
            eager_paths.extend(self.includes.iter());
        }
        for path in eager_paths {
            let mut index = nodes.iter().position(|n| &n.path == path);
            while let Some(i) = index {
                nodes[i].eager = true;
                index = nodes[i].parent;
            }
        }

        for node in nodes.iter_mut().filter(|n| n.eager) {
            let planned = joins.add_path(&node.path, JoinKind::LeftOuter)?;
            node.alias = Some(planned.alias.clone());
        }

        Ok(QueryPlan { root, joins, nodes })
    }

    /// `includes` switches to a join when a typed condition, grouping or
    /// ordering names an included table, or `references` names it
    fn includes_need_join(&self, nodes: &[IncludeNode]) -> bool {
        if self.includes.is_empty() {
            return false;
        }
        let included: Vec<&IncludeNode> = nodes
            .iter()
            .filter(|n| self.includes.iter().any(|p| p == &n.path || p.starts_with(&format!("{}.", n.path))))
            .collect();

        let mut tables: BTreeSet<&str> = BTreeSet::new();
        for predicate in self.wheres.iter().chain(self.havings.iter()) {
            for column in predicate.columns() {
                if let Some(table) = &column.table {
                    tables.insert(table.as_str());
                }
            }
        }
        for term in &self.orders {
            if let OrderTerm::Column {
                column: ColumnRef { table: Some(table), .. },
                ..
            } = term
            {
                tables.insert(table.as_str());
            }
        }
        for column in &self.groups {
            if let Some(table) = &column.table {
                tables.insert(table.as_str());
            }
        }

        included.iter().any(|node| {
            node.entity.table() != node.owner.table() && tables.contains(node.entity.table())
                || self.references.iter().any(|r| {
                    r == node.entity.table() || r == &node.name || r == &node.path
                })
        })
    }

    /// A plain column projection always carries the primary key. Distinct,
    /// grouped and raw projections are rendered as written.
    fn selects_need_identity(&self, root: &EntitySchema) -> bool {
        if self.distinct.unwrap_or(false) || !self.groups.is_empty() {
            return false;
        }
        self.selects.iter().all(|term| match term {
            SelectTerm::Column(column) => {
                column.column != root.primary_key()
                    && column.table.as_deref().map_or(true, |t| t == root.table())
            }
            SelectTerm::Raw(_) => false,
        })
    }

    /// Whether every loaded record will hold its primary key
    pub(crate) fn projection_carries_identity(&self, root: &EntitySchema) -> bool {
        if !self.groups.is_empty() {
            return false;
        }
        self.selects.is_empty()
            || self.selects_need_identity(root)
            || self.selects.iter().any(|term| match term {
                SelectTerm::Column(column) => {
                    column.column == root.primary_key()
                        && column.table.as_deref().map_or(true, |t| t == root.table())
                }
                SelectTerm::Raw(_) => false,
            })
    }

    /// Render the records statement without executing it (PostgreSQL syntax)
    pub fn to_sql(&self) -> ModelResult<String> {
        Ok(self.to_statement(SqlDialect::PostgreSQL)?.sql)
    }

    /// Render the records statement and its parameters for a dialect
    pub fn to_statement(&self, dialect: SqlDialect) -> ModelResult<Statement> {
        self.check()?;
        let plan = self.plan()?;
        self.records_statement(dialect, &plan)
    }

    pub(crate) fn records_statement(&self, dialect: SqlDialect, plan: &QueryPlan) -> ModelResult<Statement> {
        let mut w = SqlWriter::new(dialect);
        self.write_select(&mut w, plan, Projection::Records)?;
        self.write_order(&mut w, plan)?;
        if !plan.is_eager() {
            self.write_limit_offset(&mut w);
        }
        self.write_lock(&mut w);
        Ok(w.finish())
    }

    pub(crate) fn count_statement(&self, dialect: SqlDialect, plan: &QueryPlan) -> ModelResult<Statement> {
        let mut w = SqlWriter::new(dialect);
        let windowed = self.limit_count.is_some() || self.offset_value.is_some();
        if !plan.is_eager() && (windowed || !self.groups.is_empty()) {
            w.push("SELECT COUNT(*) FROM (");
            let projection = if self.groups.is_empty() {
                Projection::Records
            } else {
                Projection::Exists
            };
            self.write_select(&mut w, plan, projection)?;
            self.write_limit_offset(&mut w);
            w.push(") AS ");
            w.push(&w.quote("subquery"));
        } else {
            self.write_select(&mut w, plan, Projection::Count)?;
        }
        Ok(w.finish())
    }

    pub(crate) fn exists_statement(&self, dialect: SqlDialect, plan: &QueryPlan) -> ModelResult<Statement> {
        let mut w = SqlWriter::new(dialect);
        self.write_select(&mut w, plan, Projection::Exists)?;
        w.push(" LIMIT 1");
        if let Some(offset) = self.offset_value {
            w.push(&format!(" OFFSET {}", offset));
        }
        Ok(w.finish())
    }

    pub(crate) fn columns_statement(
        &self,
        dialect: SqlDialect,
        plan: &QueryPlan,
        columns: &[ColumnRef],
    ) -> ModelResult<Statement> {
        let mut w = SqlWriter::new(dialect);
        self.write_select(&mut w, plan, Projection::Columns(columns))?;
        self.write_order(&mut w, plan)?;
        self.write_limit_offset(&mut w);
        self.write_lock(&mut w);
        Ok(w.finish())
    }

    pub(crate) fn aggregate_statement(
        &self,
        dialect: SqlDialect,
        plan: &QueryPlan,
        function: &'static str,
        column: &ColumnRef,
        cast: bool,
    ) -> ModelResult<Statement> {
        let mut w = SqlWriter::new(dialect);
        self.write_select(
            &mut w,
            plan,
            Projection::Aggregate {
                function,
                column,
                cast,
            },
        )?;
        Ok(w.finish())
    }

    pub(crate) fn group_count_statement(&self, dialect: SqlDialect, plan: &QueryPlan) -> ModelResult<Statement> {
        if self.groups.is_empty() {
            return Err(ModelError::invalid_query(
                "count_by_group requires a group clause",
            ));
        }
        let mut w = SqlWriter::new(dialect);
        self.write_select(&mut w, plan, Projection::GroupCount)?;
        self.write_order(&mut w, plan)?;
        self.write_limit_offset(&mut w);
        Ok(w.finish())
    }

    /// `UPDATE` every row of the relation. Relations that join, window or
    /// group select their keys through a subquery.
    pub(crate) fn update_statement(
        &self,
        dialect: SqlDialect,
        plan: &QueryPlan,
        assignments: &[(&str, DatabaseValue)],
    ) -> ModelResult<Statement> {
        if assignments.is_empty() {
            return Err(ModelError::invalid_query("update_all needs at least one assignment"));
        }
        let root = plan.root;
        let mut w = SqlWriter::new(dialect);
        w.push("UPDATE ");
        w.push(&w.quote(root.table()));
        w.push(" SET ");
        for (i, (column, value)) in assignments.iter().enumerate() {
            let column = root.resolve_column(column)?;
            if i > 0 {
                w.push(", ");
            }
            w.push(&format!("{} = ", w.quote(column)));
            w.bind(enum_value(root, column, value.clone())?);
        }
        self.write_mutation_filter(&mut w, plan)?;
        Ok(w.finish())
    }

    pub(crate) fn delete_statement(&self, dialect: SqlDialect, plan: &QueryPlan) -> ModelResult<Statement> {
        let mut w = SqlWriter::new(dialect);
        w.push("DELETE FROM ");
        w.push(&w.quote(plan.root.table()));
        self.write_mutation_filter(&mut w, plan)?;
        Ok(w.finish())
    }

    fn write_mutation_filter(&self, w: &mut SqlWriter, plan: &QueryPlan) -> ModelResult<()> {
        let root = plan.root;
        let needs_subquery = !plan.joins.clauses.is_empty()
            || self.limit_count.is_some()
            || self.offset_value.is_some()
            || !self.groups.is_empty();
        if needs_subquery {
            let key = ColumnRef::parse(root.primary_key());
            w.push(" WHERE ");
            w.push(&w.qualified(root.table(), root.primary_key()));
            w.push(" IN (");
            self.write_select(w, plan, Projection::Columns(std::slice::from_ref(&key)))?;
            self.write_order(w, plan)?;
            self.write_limit_offset(w);
            w.push(")");
        } else {
            self.write_where(w, &plan.scope())?;
        }
        Ok(())
    }

    fn write_select(&self, w: &mut SqlWriter, plan: &QueryPlan, projection: Projection<'_>) -> ModelResult<()> {
        let scope = plan.scope();
        let root = plan.root;
        let root_alias = root.table();

        w.push("SELECT ");
        let distinct = self.distinct.unwrap_or(false);
        match projection {
            Projection::Records => {
                if plan.is_eager() {
                    let columns = eager_columns(w, plan);
                    w.push(&columns);
                } else {
                    if distinct {
                        w.push("DISTINCT ");
                    }
                    if self.selects.is_empty() {
                        w.push(&format!("{}.*", w.quote(root_alias)));
                    } else {
                        for (i, term) in self.selects.iter().enumerate() {
                            if i > 0 {
                                w.push(", ");
                            }
                            match term {
                                SelectTerm::Column(column) => {
                                    let (alias, _, column) = scope.resolve(column)?;
                                    w.push(&w.qualified(alias, &column));
                                }
                                SelectTerm::Raw(expression) => w.push(expression),
                            }
                        }
                        if self.selects_need_identity(root) {
                            w.push(&format!(", {}", w.qualified(root_alias, root.primary_key())));
                        }
                    }
                }
            }
            Projection::Count => {
                if plan.is_eager() || (distinct && self.selects.is_empty()) {
                    w.push(&format!(
                        "COUNT(DISTINCT {})",
                        w.qualified(root_alias, root.primary_key())
                    ));
                } else if distinct {
                    let mut rendered = Vec::new();
                    for term in &self.selects {
                        match term {
                            SelectTerm::Column(column) => {
                                let (alias, _, column) = scope.resolve(column)?;
                                rendered.push(w.qualified(alias, &column));
                            }
                            SelectTerm::Raw(expression) => rendered.push(expression.clone()),
                        }
                    }
                    w.push(&format!("COUNT(DISTINCT {})", rendered.join(", ")));
                } else {
                    w.push("COUNT(*)");
                }
            }
            Projection::Exists => w.push(&format!("1 AS {}", w.quote("one"))),
            Projection::Columns(columns) => {
                if distinct {
                    w.push("DISTINCT ");
                }
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    let (alias, _, column) = scope.resolve(column)?;
                    w.push(&w.qualified(alias, &column));
                }
            }
            Projection::Aggregate {
                function,
                column,
                cast,
            } => {
                let (alias, _, column) = scope.resolve(column)?;
                let expression = format!("{}({})", function, w.qualified(alias, &column));
                if cast {
                    w.push(&format!("CAST({} AS DOUBLE PRECISION)", expression));
                } else {
                    w.push(&expression);
                }
            }
            Projection::GroupCount => {
                for column in &self.groups {
                    let (alias, _, column) = scope.resolve(column)?;
                    w.push(&w.qualified(alias, &column));
                    w.push(", ");
                }
                w.push(&format!("COUNT(*) AS {}", w.quote("count")));
            }
        }

        w.push(" FROM ");
        w.push(&w.quote(root_alias));
        for clause in &plan.joins.clauses {
            write_join(w, clause)?;
        }

        self.write_where(w, &scope)?;

        if !self.groups.is_empty() {
            w.push(" GROUP BY ");
            for (i, column) in self.groups.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                let (alias, _, column) = scope.resolve(column)?;
                w.push(&w.qualified(alias, &column));
            }
        }

        if !self.havings.is_empty() {
            w.push(" HAVING ");
            for (i, predicate) in self.havings.iter().enumerate() {
                if i > 0 {
                    w.push(" AND ");
                }
                write_predicate(w, &scope, predicate)?;
            }
        }
        Ok(())
    }

    fn write_where(&self, w: &mut SqlWriter, scope: &QueryScope) -> ModelResult<()> {
        if self.wheres.is_empty() && !self.none {
            return Ok(());
        }
        w.push(" WHERE ");
        let mut first = true;
        for predicate in &self.wheres {
            if !first {
                w.push(" AND ");
            }
            first = false;
            write_predicate(w, scope, predicate)?;
        }
        if self.none {
            if !first {
                w.push(" AND ");
            }
            w.push("1=0");
        }
        Ok(())
    }

    fn write_order(&self, w: &mut SqlWriter, plan: &QueryPlan) -> ModelResult<()> {
        let scope = plan.scope();
        let mut terms = Vec::new();
        for term in &self.orders {
            match term {
                OrderTerm::Column { column, direction } => {
                    let (alias, _, column) = scope.resolve(column)?;
                    terms.push(format!("{} {}", w.qualified(alias, &column), direction));
                }
                OrderTerm::Raw(expression) => terms.push(expression.clone()),
            }
        }
        for node in plan.nodes.iter().filter(|n| n.eager) {
            if let Some(alias) = &node.alias {
                for (column, direction) in &node.association.order {
                    terms.push(format!("{} {}", w.qualified(alias, column), direction));
                }
            }
        }
        if !terms.is_empty() {
            w.push(" ORDER BY ");
            w.push(&terms.join(", "));
        }
        Ok(())
    }

    fn write_limit_offset(&self, w: &mut SqlWriter) {
        match (self.limit_count, self.offset_value) {
            (Some(limit), offset) => {
                w.push(&format!(" LIMIT {}", limit));
                if let Some(offset) = offset {
                    w.push(&format!(" OFFSET {}", offset));
                }
            }
            (None, Some(offset)) => {
                if w.dialect() == SqlDialect::SQLite {
                    w.push(" LIMIT -1");
                }
                w.push(&format!(" OFFSET {}", offset));
            }
            (None, None) => {}
        }
    }

    fn write_lock(&self, w: &mut SqlWriter) {
        if let Some(mode) = self.lock {
            if w.dialect().supports_row_locks() {
                w.push(" ");
                w.push(mode.as_sql());
            }
        }
    }
}

fn write_join(w: &mut SqlWriter, clause: &JoinClause) -> ModelResult<()> {
    w.push(&format!(" {} {}", clause.kind, w.quote(&clause.table)));
    if clause.alias != clause.table {
        w.push(&format!(" {}", w.quote(&clause.alias)));
    }
    w.push(" ON ");
    w.push(&w.qualified(&clause.on.left_alias, &clause.on.left_column));
    w.push(" = ");
    w.push(&w.qualified(&clause.on.right_alias, &clause.on.right_column));
    if let Some((predicate, schema)) = &clause.scope {
        w.push(" AND ");
        write_predicate(w, &QueryScope::single(&clause.alias, schema), predicate)?;
    }
    Ok(())
}

/// Aliased column list for the root and every eager node
fn eager_columns(w: &SqlWriter, plan: &QueryPlan) -> String {
    let mut columns = Vec::new();
    for (i, column) in plan.root.columns().iter().enumerate() {
        columns.push(format!(
            "{} AS {}",
            w.qualified(plan.root.table(), &column.name),
            QueryPlan::column_alias(None, i)
        ));
    }
    for (n, node) in plan.nodes.iter().enumerate().filter(|(_, n)| n.eager) {
        if let Some(alias) = &node.alias {
            for (i, column) in node.entity.columns().iter().enumerate() {
                columns.push(format!(
                    "{} AS {}",
                    w.qualified(alias, &column.name),
                    QueryPlan::column_alias(Some(n), i)
                ));
            }
        }
    }
    columns.join(", ")
}

/// Add the node for `path` and every missing ancestor; returns its index
fn ensure_node(
    nodes: &mut Vec<IncludeNode>,
    registry: &'static SchemaRegistry,
    root: &'static EntitySchema,
    path: &str,
) -> ModelResult<usize> {

    let mut parent: Option<usize> = None;
    let mut prefix = String::new();
    for segment in path.split('.') {
        if segment.is_empty() {
            return Err(ModelError::invalid_query(format!(
                "Malformed association path '{}'",
                path
            )));
        }
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(segment);

        if let Some(existing) = nodes.iter().position(|n| n.path == prefix) {
            parent = Some(existing);
            continue;
        }
        let owner = match parent {
            Some(i) => nodes[i].entity,
            None => root,
        };
        let association = owner.association(segment)?;
        let entity = registry.entity(&association.target)?;
        nodes.push(IncludeNode {
            path: prefix.clone(),
            name: segment.to_string(),
            parent,
            association,
            owner,
            entity,
            eager: false,
            alias: None,
        });
        parent = Some(nodes.len() - 1);
    }
    parent.ok_or_else(|| ModelError::invalid_query("Empty association path"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Title, Writer};

    #[test]
    fn test_raw_placeholders_per_dialect() {
        let mut w = SqlWriter::new(SqlDialect::PostgreSQL);
        w.push_raw("price > ? AND title <> '?' AND year < ?", &[DatabaseValue::Float64(500.0), DatabaseValue::Int64(2000)])
            .unwrap();
        let statement = w.finish();
        assert_eq!(statement.sql, "price > $1 AND title <> '?' AND year < $2");
        assert_eq!(statement.params.len(), 2);
    }

    #[test]
    fn test_raw_bind_count_mismatch() {
        let mut w = SqlWriter::new(SqlDialect::SQLite);
        let err = w.push_raw("price > ? AND year < ?", &[DatabaseValue::Int64(1)]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidQuery(_)));
    }

    #[test]
    fn test_null_is_inlined() {
        let mut w = SqlWriter::new(SqlDialect::PostgreSQL);
        w.push("x = ");
        w.bind(DatabaseValue::Null);
        w.push(" AND y = ");
        w.bind(DatabaseValue::Int64(3));
        let statement = w.finish();
        assert_eq!(statement.sql, "x = NULL AND y = $1");
        assert_eq!(statement.params, vec![DatabaseValue::Int64(3)]);
    }

    #[test]
    fn test_column_projection_keeps_primary_key() {
        let sql = Relation::<Title>::unscoped().select(&["name"]).to_sql().unwrap();
        assert_eq!(sql, "SELECT \"titles\".\"name\", \"titles\".\"id\" FROM \"titles\"");

        let distinct = Relation::<Title>::unscoped()
            .select(&["name"])
            .distinct(true)
            .to_sql()
            .unwrap();
        assert_eq!(distinct, "SELECT DISTINCT \"titles\".\"name\" FROM \"titles\"");
    }

    #[test]
    fn test_default_scope_and_clauses_render_in_order() {
        let statement = Relation::<Title>::new()
            .where_gt("price", 10.0)
            .order_by_desc("year")
            .limit(5)
            .offset(10)
            .to_statement(SqlDialect::PostgreSQL)
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"titles\".* FROM \"titles\" WHERE \"titles\".\"year\" >= $1 AND \"titles\".\"price\" > $2 \
             ORDER BY \"titles\".\"year\" DESC LIMIT 5 OFFSET 10"
        );
        assert_eq!(
            statement.params,
            vec![DatabaseValue::Int32(1970), DatabaseValue::Float64(10.0)]
        );
    }

    #[test]
    fn test_sqlite_placeholders_and_bare_offset() {
        let statement = Relation::<Title>::unscoped()
            .where_eq("name", "Dune")
            .offset(3)
            .to_statement(SqlDialect::SQLite)
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT \"titles\".* FROM \"titles\" WHERE \"titles\".\"name\" = ? LIMIT -1 OFFSET 3"
        );
    }

    #[test]
    fn test_exclude_and_or_grouping() {
        let sql = Relation::<Title>::unscoped()
            .where_eq("writer_id", 1)
            .or(Relation::<Title>::unscoped().where_eq("writer_id", 2))
            .exclude(Predicate::lt("price", 5.0))
            .to_sql()
            .unwrap();
        assert_eq!(
            sql,
            "SELECT \"titles\".* FROM \"titles\" WHERE (\"titles\".\"writer_id\" = $1 OR \"titles\".\"writer_id\" = $2) \
             AND NOT (\"titles\".\"price\" < $3)"
        );
    }

    #[test]
    fn test_or_with_different_limits_is_rejected() {
        let err = Relation::<Title>::new()
            .limit(1)
            .or(Relation::<Title>::new())
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidQuery(message) if message.contains("limit")));
    }

    #[test]
    fn test_none_renders_false_condition() {
        let sql = Relation::<Title>::unscoped().none().to_sql().unwrap();
        assert_eq!(sql, "SELECT \"titles\".* FROM \"titles\" WHERE 1=0");
    }

    #[test]
    fn test_empty_in_list_matches_nothing() {
        let ids: Vec<i64> = Vec::new();
        let sql = Relation::<Title>::unscoped().where_in("id", ids).to_sql().unwrap();
        assert!(sql.ends_with("WHERE 1=0"));
    }

    #[test]
    fn test_enum_names_translate_to_stored_values() {
        let statement = Relation::<Title>::unscoped()
            .where_eq("visibility", "published")
            .to_statement(SqlDialect::PostgreSQL)
            .unwrap();
        assert_eq!(statement.params, vec![DatabaseValue::Int64(1)]);

        let err = Relation::<Title>::unscoped()
            .where_eq("visibility", "archived")
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidQuery(_)));
    }

    #[test]
    fn test_unknown_identifiers_are_rejected() {
        let unknown_column = Relation::<Title>::new().where_eq("isbn", "123").to_sql();
        assert!(matches!(unknown_column, Err(ModelError::InvalidQuery(_))));

        let unknown_table = Relation::<Title>::new().where_eq("notes.body", "x").to_sql();
        assert!(matches!(unknown_table, Err(ModelError::InvalidQuery(message)) if message.contains("notes")));

        let unknown_association = Relation::<Title>::new().joins("publisher").to_sql();
        assert!(unknown_association.is_err());
    }

    #[test]
    fn test_having_without_group_is_rejected() {
        let err = Relation::<Title>::new()
            .having_raw("COUNT(*) > ?", [1])
            .to_sql()
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidQuery(_)));
    }

    #[test]
    fn test_join_carries_target_default_scope() {
        let statement = Relation::<Writer>::new()
            .joins("titles")
            .where_gt("titles.price", 20.0)
            .distinct(true)
            .to_statement(SqlDialect::PostgreSQL)
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT DISTINCT \"writers\".* FROM \"writers\" \
             INNER JOIN \"titles\" ON \"titles\".\"writer_id\" = \"writers\".\"id\" AND \"titles\".\"year\" >= $1 \
             WHERE \"titles\".\"price\" > $2"
        );
    }

    #[test]
    fn test_self_join_gets_fresh_alias() {
        let sql = Relation::<Title>::unscoped()
            .joins("shelves.titles")
            .to_sql()
            .unwrap();
        assert!(sql.contains("INNER JOIN \"shelves_titles\" ON \"shelves_titles\".\"title_id\" = \"titles\".\"id\""));
        assert!(sql.contains("INNER JOIN \"shelves\" ON \"shelves\".\"id\" = \"shelves_titles\".\"shelf_id\""));
        assert!(sql.contains("INNER JOIN \"titles\" \"titles_2\" ON \"titles_2\".\"id\" = \"shelves_titles_2\".\"title_id\""));
    }

    #[test]
    fn test_through_association_joins_both_legs() {
        let sql = Relation::<Writer>::new().left_outer_joins("notes").to_sql().unwrap();
        assert!(sql.contains("LEFT OUTER JOIN \"titles\" ON \"titles\".\"writer_id\" = \"writers\".\"id\""));
        assert!(sql.contains("LEFT OUTER JOIN \"notes\" ON \"notes\".\"title_id\" = \"titles\".\"id\""));
    }

    #[test]
    fn test_includes_strategy_selection() {
        let plain = Relation::<Writer>::new().includes("titles").plan().unwrap();
        assert!(!plain.is_eager());

        let filtered = Relation::<Writer>::new()
            .includes("titles")
            .where_gt("titles.price", 10.0)
            .plan()
            .unwrap();
        assert!(filtered.is_eager());

        let referenced = Relation::<Writer>::new()
            .includes("titles")
            .where_raw("titles.name LIKE ?", ["%Dune%"])
            .references("titles")
            .plan()
            .unwrap();
        assert!(referenced.is_eager());

        let preloaded = Relation::<Writer>::new()
            .preload("titles")
            .where_gt("titles.price", 10.0)
            .plan();
        assert!(preloaded.is_ok_and(|plan| !plan.is_eager()));
    }

    #[test]
    fn test_eager_load_uses_aliased_columns_without_limit() {
        let sql = Relation::<Writer>::new()
            .eager_load("titles")
            .limit(2)
            .to_sql()
            .unwrap();
        assert!(sql.starts_with("SELECT \"writers\".\"id\" AS t0_c0"));
        assert!(sql.contains("\"titles\".\"id\" AS t1_c0"));
        assert!(sql.contains("LEFT OUTER JOIN \"titles\""));
        assert!(sql.ends_with("ORDER BY \"titles\".\"year\" DESC"));
        assert!(!sql.contains("LIMIT"));
    }

    #[test]
    fn test_lock_clause_per_dialect() {
        let relation = Relation::<Title>::unscoped().where_eq("id", 1).lock(LockMode::ForUpdate);
        let postgres = relation.to_statement(SqlDialect::PostgreSQL).unwrap();
        assert!(postgres.sql.ends_with(" FOR UPDATE"));
        let sqlite = relation.to_statement(SqlDialect::SQLite).unwrap();
        assert!(!sqlite.sql.contains("FOR UPDATE"));
    }

    #[test]
    fn test_count_wraps_windowed_relation() {
        let relation = Relation::<Title>::unscoped().limit(3);
        let plan = relation.plan().unwrap();
        let statement = relation.count_statement(SqlDialect::PostgreSQL, &plan).unwrap();
        assert!(statement.sql.starts_with("SELECT COUNT(*) FROM (SELECT"));
        assert!(statement.sql.contains("LIMIT 3"));
    }

    #[test]
    fn test_update_with_join_filters_by_primary_key() {
        let relation = Relation::<Title>::unscoped()
            .joins("writer")
            .where_eq("writers.name", "Le Guin");
        let plan = relation.plan().unwrap();
        let statement = relation
            .update_statement(SqlDialect::PostgreSQL, &plan, &[("price", DatabaseValue::Float64(9.5))])
            .unwrap();
        assert!(statement.sql.starts_with("UPDATE \"titles\" SET \"price\" = $1 WHERE \"titles\".\"id\" IN (SELECT"));
        assert_eq!(statement.params.len(), 2);
    }
}
