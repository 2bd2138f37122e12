//! Relation JOIN operations and join planning
//!
//! Joins are declared as association paths (`"books.reviews"`) and planned
//! against the schema registry when SQL is generated. The plan gives every
//! joined table a unique alias (the table name unless it is already taken) and
//! carries the target entity's default scope into the ON clause.

use std::collections::{HashMap, HashSet};

use super::builder::Relation;
use super::types::*;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;
use crate::schema::{Association, AssociationKind, EntitySchema, SchemaRegistry};

impl<M: Model> Relation<M> {
    /// INNER JOIN along an association path
    pub fn joins(mut self, path: &str) -> Self {
        let spec = JoinSpec {
            path: path.to_string(),
            kind: JoinKind::Inner,
        };
        if !self.joins.contains(&spec) {
            self.joins.push(spec);
        }
        self
    }

    /// LEFT OUTER JOIN along an association path
    pub fn left_outer_joins(mut self, path: &str) -> Self {
        let spec = JoinSpec {
            path: path.to_string(),
            kind: JoinKind::LeftOuter,
        };
        if !self.joins.contains(&spec) {
            self.joins.push(spec);
        }
        self
    }

    /// Eager load an association path. The strategy is chosen at execution:
    /// a single LEFT OUTER JOIN statement when a condition or ordering refers
    /// to the association's table (or `references` names it), otherwise one
    /// IN-list query per association.
    pub fn includes(mut self, path: &str) -> Self {
        push_unique(&mut self.includes, path);
        self
    }

    /// Eager load with one IN-list query per association
    pub fn preload(mut self, path: &str) -> Self {
        push_unique(&mut self.preloads, path);
        self
    }

    /// Eager load within the main statement through LEFT OUTER JOINs
    pub fn eager_load(mut self, path: &str) -> Self {
        push_unique(&mut self.eager_loads, path);
        self
    }

    /// Declare that raw fragments refer to an included table or association
    pub fn references(mut self, table_or_association: &str) -> Self {
        push_unique(&mut self.references, table_or_association);
        self
    }
}

pub(crate) fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}

/// Equality between two qualified columns
#[derive(Debug, Clone)]
pub(crate) struct JoinCondition {
    pub left_alias: String,
    pub left_column: String,
    pub right_alias: String,
    pub right_column: String,
}

/// One planned JOIN clause
#[derive(Debug, Clone)]
pub(crate) struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub on: JoinCondition,
    /// Target default scope, rendered against `alias`
    pub scope: Option<(Predicate, &'static EntitySchema)>,
}

#[derive(Debug, Clone)]
pub(crate) struct PlannedPath {
    pub alias: String,
    pub entity: &'static EntitySchema,
    clause_indices: Vec<usize>,
}

/// Joins of one statement, in SQL order
#[derive(Debug, Clone)]
pub(crate) struct JoinPlan {
    registry: &'static SchemaRegistry,
    root: &'static EntitySchema,
    pub clauses: Vec<JoinClause>,
    paths: HashMap<String, PlannedPath>,
    used_aliases: HashSet<String>,
}

impl JoinPlan {
    pub fn new(registry: &'static SchemaRegistry, root: &'static EntitySchema) -> Self {
        let mut used_aliases = HashSet::new();
        used_aliases.insert(root.table().to_string());
        Self {
            registry,
            root,
            clauses: Vec::new(),
            paths: HashMap::new(),
            used_aliases,
        }
    }

    /// Every alias in scope with its entity, root first
    pub fn tables(&self) -> Vec<(String, &'static EntitySchema)> {
        let mut tables = vec![(self.root.table().to_string(), self.root)];
        let mut planned: Vec<&PlannedPath> = self.paths.values().collect();
        planned.sort_by_key(|p| p.clause_indices.first().copied().unwrap_or(usize::MAX));
        tables.extend(planned.into_iter().map(|p| (p.alias.clone(), p.entity)));
        tables
    }

    fn allocate_alias(&mut self, table: &str) -> String {
        if self.used_aliases.insert(table.to_string()) {
            return table.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", table, n);
            if self.used_aliases.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }

    /// Plan every segment of a dotted association path. Segments already
    /// planned are reused; an INNER request upgrades an existing OUTER join.
    pub fn add_path(&mut self, path: &str, kind: JoinKind) -> ModelResult<&PlannedPath> {
        let mut owner = self.root;
        let mut owner_alias = self.root.table().to_string();
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

            if let Some(existing) = self.paths.get(&prefix) {
                let (alias, entity, indices) = (
                    existing.alias.clone(),
                    existing.entity,
                    existing.clause_indices.clone(),
                );
                if kind == JoinKind::Inner {
                    for index in indices {
                        self.clauses[index].kind = JoinKind::Inner;
                    }
                }
                owner = entity;
                owner_alias = alias;
                continue;
            }

            let association = owner.association(segment)?.clone();
            let start = self.clauses.len();
            let (alias, entity) = self.push_association(owner, &owner_alias, &association, kind)?;
            self.paths.insert(
                prefix.clone(),
                PlannedPath {
                    alias: alias.clone(),
                    entity,
                    clause_indices: (start..self.clauses.len()).collect(),
                },
            );
            owner = entity;
            owner_alias = alias;
        }

        Ok(&self.paths[&prefix])
    }

    fn push_association(
        &mut self,
        owner: &'static EntitySchema,
        owner_alias: &str,
        association: &Association,
        kind: JoinKind,
    ) -> ModelResult<(String, &'static EntitySchema)> {
        let target = self.registry.entity(&association.target)?;
        match &association.kind {
            AssociationKind::BelongsTo => {
                let alias = self.allocate_alias(target.table());
                self.push_clause(kind, target, &alias, target.primary_key(), owner_alias, &association.foreign_key);
                Ok((alias, target))
            }
            AssociationKind::HasMany => {
                let alias = self.allocate_alias(target.table());
                self.push_clause(kind, target, &alias, &association.foreign_key, owner_alias, owner.primary_key());
                Ok((alias, target))
            }
            AssociationKind::ManyToMany {
                join_table,
                association_foreign_key,
            } => {
                let link_alias = self.allocate_alias(join_table);
                self.clauses.push(JoinClause {
                    kind,
                    table: join_table.clone(),
                    alias: link_alias.clone(),
                    on: JoinCondition {
                        left_alias: link_alias.clone(),
                        left_column: association.foreign_key.clone(),
                        right_alias: owner_alias.to_string(),
                        right_column: owner.primary_key().to_string(),
                    },
                    scope: None,
                });
                let alias = self.allocate_alias(target.table());
                self.push_clause(kind, target, &alias, target.primary_key(), &link_alias, association_foreign_key);
                Ok((alias, target))
            }
            AssociationKind::HasManyThrough { through, source } => {
                let via = owner.association(through)?.clone();
                let (via_alias, via_entity) = self.push_association(owner, owner_alias, &via, kind)?;
                let source = via_entity.association(source)?.clone();
                if matches!(source.kind, AssociationKind::HasManyThrough { .. }) {
                    return Err(ModelError::invalid_query(format!(
                        "Nested through association '{}' is not supported",
                        association.name
                    )));
                }
                self.push_association(via_entity, &via_alias, &source, kind)
            }
        }
    }

    fn push_clause(
        &mut self,
        kind: JoinKind,
        target: &'static EntitySchema,
        alias: &str,
        target_column: &str,
        other_alias: &str,
        other_column: &str,
    ) {
        let scope = target.default_scope_predicate().map(|p| (p, target));
        self.clauses.push(JoinClause {
            kind,
            table: target.table().to_string(),
            alias: alias.to_string(),
            on: JoinCondition {
                left_alias: alias.to_string(),
                left_column: target_column.to_string(),
                right_alias: other_alias.to_string(),
                right_column: other_column.to_string(),
            },
            scope,
        });
    }
}
