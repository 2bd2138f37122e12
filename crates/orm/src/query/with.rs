//! Eager loading of association graphs
//!
//! Two strategies fill a relation's include tree:
//!
//! - eager join: every eager node's columns ride along in the main statement
//!   under `t{node}_c{column}` aliases, and rows are folded back into parents
//!   with their children (parents de-duplicated, first-seen order kept);
//! - preload: one `IN (...)` query per association, issued level by level
//!   once the parents are known and skipped when no parent has a key.
//!
//! Both apply the target's default scope to every association they load.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use super::sql_generation::{write_predicate, IncludeNode, QueryPlan, QueryScope, SqlWriter, Statement};
use super::types::Predicate;
use crate::backends::{DatabaseExecutor, DatabaseRow, DatabaseValue, SqlDialect};
use crate::error::{ModelError, ModelResult};
use crate::model::record::{Record, OWNER_KEY_COLUMN};
use crate::schema::{Association, AssociationKind, EntitySchema, SchemaRegistry};

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Fold eager-join rows into distinct parents with their loaded children
pub(crate) fn hydrate_joined(plan: &QueryPlan, rows: &[Box<dyn DatabaseRow>]) -> ModelResult<Vec<Record>> {
    let eager: Vec<usize> = (0..plan.nodes.len()).filter(|&i| plan.nodes[i].eager).collect();

    let mut offsets = HashMap::new();
    let mut offset = plan.root.columns().len();
    for &n in &eager {
        offsets.insert(n, offset);
        offset += plan.nodes[n].entity.columns().len();
    }

    let mut roots: Vec<Record> = Vec::new();
    let mut root_positions: HashMap<i64, usize> = HashMap::new();
    let mut node_records: HashMap<usize, HashMap<i64, Record>> = HashMap::new();
    let mut links: HashMap<usize, Vec<(i64, i64)>> = HashMap::new();

    for row in rows {
        let root = slice_record(plan.root, row.as_ref(), 0)?;
        let Some(root_id) = root.id() else { continue };
        if !root_positions.contains_key(&root_id) {
            root_positions.insert(root_id, roots.len());
            roots.push(root);
        }

        let mut row_ids: HashMap<usize, i64> = HashMap::new();
        for &n in &eager {
            let node = &plan.nodes[n];
            let record = slice_record(node.entity, row.as_ref(), offsets[&n])?;
            let Some(child_id) = record.id() else { continue };
            let parent_id = match node.parent {
                None => root_id,
                Some(p) => match row_ids.get(&p) {
                    Some(id) => *id,
                    None => continue,
                },
            };
            row_ids.insert(n, child_id);
            node_records.entry(n).or_default().entry(child_id).or_insert(record);
            let node_links = links.entry(n).or_default();
            if !node_links.contains(&(parent_id, child_id)) {
                node_links.push((parent_id, child_id));
            }
        }
    }

    // Deeper nodes always come after their parents, so children are complete
    // before they are copied into a parent.
    for &n in eager.iter().rev() {
        let children: Vec<usize> = eager
            .iter()
            .copied()
            .filter(|&c| plan.nodes[c].parent == Some(n))
            .collect();
        if children.is_empty() {
            continue;
        }
        let mut records = node_records.remove(&n).unwrap_or_default();
        for (id, record) in records.iter_mut() {
            for &c in &children {
                attach_joined(record, *id, &plan.nodes[c], links.get(&c), node_records.get(&c));
            }
        }
        node_records.insert(n, records);
    }

    let top: Vec<usize> = eager
        .iter()
        .copied()
        .filter(|&n| plan.nodes[n].parent.is_none())
        .collect();
    for root in roots.iter_mut() {
        let Some(id) = root.id() else { continue };
        for &n in &top {
            attach_joined(root, id, &plan.nodes[n], links.get(&n), node_records.get(&n));
        }
    }
    Ok(roots)
}

fn attach_joined(
    parent: &mut Record,
    parent_id: i64,
    node: &IncludeNode,
    links: Option<&Vec<(i64, i64)>>,
    records: Option<&HashMap<i64, Record>>,
) {
    let children = match (links, records) {
        (Some(links), Some(records)) => links
            .iter()
            .filter(|(p, _)| *p == parent_id)
            .filter_map(|(_, c)| records.get(c).cloned())
            .collect(),
        _ => Vec::new(),
    };
    parent.set_association(&node.name, children);
}

fn slice_record(schema: &'static EntitySchema, row: &dyn DatabaseRow, offset: usize) -> ModelResult<Record> {
    let mut values = BTreeMap::new();
    for (i, column) in schema.columns().iter().enumerate() {
        values.insert(column.name.clone(), row.get_by_index(offset + i)?);
    }
    Ok(Record::from_values(schema, values, false))
}

/// Load every non-eager node below `parent` for `records`, then descend.
/// Eager nodes are already attached; only their subtrees are visited.
pub(crate) fn preload_level<'a, E>(
    db: &'a E,
    plan: &'a QueryPlan,
    registry: &'static SchemaRegistry,
    parent: Option<usize>,
    mut records: Vec<&'a mut Record>,
) -> BoxFuture<'a, ModelResult<()>>
where
    E: DatabaseExecutor + ?Sized,
{
    Box::pin(async move {
        if records.is_empty() {
            return Ok(());
        }
        let level: Vec<usize> = (0..plan.nodes.len())
            .filter(|&i| plan.nodes[i].parent == parent)
            .collect();

        for n in level {
            let node = &plan.nodes[n];
            if !node.eager {
                preload_node(db, node, registry, &mut records).await?;
            }
            let has_children = plan.nodes.iter().any(|c| c.parent == Some(n));
            if !has_children {
                continue;
            }
            let children: Vec<&mut Record> = records
                .iter_mut()
                .flat_map(|r| r.association_records_mut(&node.name))
                .collect();
            preload_level(db, plan, registry, Some(n), children).await?;
        }
        Ok(())
    })
}

/// How a preload query finds children and ties them to parents
struct PreloadQuery {
    statement: Statement,
    /// Which child value keys the link back to the parent
    link: ChildKey,
}

enum ChildKey {
    PrimaryKey,
    Column(String),
    OwnerKey,
}

async fn preload_node<E>(
    db: &E,
    node: &IncludeNode,
    registry: &'static SchemaRegistry,
    parents: &mut [&mut Record],
) -> ModelResult<()>
where
    E: DatabaseExecutor + ?Sized,
{
    let parent_key = parent_key_column(node)?;
    let mut keys: Vec<i64> = Vec::new();
    let mut seen = HashSet::new();
    for parent in parents.iter() {
        if let Some(key) = parent.raw(&parent_key).as_i64() {
            if seen.insert(key) {
                keys.push(key);
            }
        }
    }
    if keys.is_empty() {
        for parent in parents.iter_mut() {
            parent.set_association(&node.name, Vec::new());
        }
        return Ok(());
    }

    let query = preload_query(db.dialect(), node, registry, &keys)?;
    debug!(
        association = %node.path,
        sql = %query.statement.sql,
        keys = keys.len(),
        "Preloading association"
    );
    let rows = db
        .fetch_all(&query.statement.sql, &query.statement.params)
        .await?;

    let mut children: HashMap<i64, Vec<Record>> = HashMap::new();
    for row in &rows {
        let owner = match &query.link {
            ChildKey::OwnerKey => row.get_by_name(OWNER_KEY_COLUMN)?.as_i64(),
            _ => None,
        };
        let record = Record::from_row(node.entity, row.as_ref(), false)?;
        let key = match &query.link {
            ChildKey::PrimaryKey => record.id(),
            ChildKey::Column(column) => record.raw(column).as_i64(),
            ChildKey::OwnerKey => owner,
        };
        if let Some(key) = key {
            children.entry(key).or_default().push(record);
        }
    }

    for parent in parents.iter_mut() {
        let loaded = parent
            .raw(&parent_key)
            .as_i64()
            .and_then(|key| children.get(&key).cloned())
            .unwrap_or_default();
        parent.set_association(&node.name, loaded);
    }
    Ok(())
}

/// Parent column whose value keys the children
fn parent_key_column(node: &IncludeNode) -> ModelResult<String> {
    let association = node.association;
    Ok(match &association.kind {
        AssociationKind::BelongsTo => association.foreign_key.clone(),
        AssociationKind::HasMany | AssociationKind::ManyToMany { .. } => node.owner.primary_key().to_string(),
        AssociationKind::HasManyThrough { through, .. } => {
            let via = node.owner.association(through)?;
            match via.kind {
                AssociationKind::BelongsTo => via.foreign_key.clone(),
                _ => node.owner.primary_key().to_string(),
            }
        }
    })
}

fn preload_query(
    dialect: SqlDialect,
    node: &IncludeNode,
    registry: &'static SchemaRegistry,
    keys: &[i64],
) -> ModelResult<PreloadQuery> {
    let target = node.entity;
    let association = node.association;
    let mut w = SqlWriter::new(dialect);
    let target_alias = target.table().to_string();

    let (link, key_alias, key_column, extra_scope) = match &association.kind {
        AssociationKind::BelongsTo => {
            w.push(&format!("SELECT {}.* FROM {}", w.quote(&target_alias), w.quote(&target_alias)));
            (ChildKey::PrimaryKey, target_alias.clone(), target.primary_key().to_string(), None)
        }
        AssociationKind::HasMany => {
            w.push(&format!("SELECT {}.* FROM {}", w.quote(&target_alias), w.quote(&target_alias)));
            (
                ChildKey::Column(association.foreign_key.clone()),
                target_alias.clone(),
                association.foreign_key.clone(),
                None,
            )
        }
        AssociationKind::ManyToMany {
            join_table,
            association_foreign_key,
        } => {
            w.push(&format!(
                "SELECT {}.*, {} AS {} FROM {} INNER JOIN {} ON {} = {}",
                w.quote(&target_alias),
                w.qualified(join_table, &association.foreign_key),
                w.quote(OWNER_KEY_COLUMN),
                w.quote(&target_alias),
                w.quote(join_table),
                w.qualified(join_table, association_foreign_key),
                w.qualified(&target_alias, target.primary_key()),
            ));
            (
                ChildKey::OwnerKey,
                join_table.clone(),
                association.foreign_key.clone(),
                None,
            )
        }
        AssociationKind::HasManyThrough { through, source } => {
            let via = node.owner.association(through)?;
            let via_entity = registry.entity(&via.target)?;
            let source = via_entity.association(source)?;
            let via_alias = if via_entity.table() == target_alias {
                format!("{}_through", via_entity.table())
            } else {
                via_entity.table().to_string()
            };
            let (owner_expr, key_column) = match via.kind {
                AssociationKind::HasMany => (via.foreign_key.clone(), via.foreign_key.clone()),
                AssociationKind::BelongsTo => (
                    via_entity.primary_key().to_string(),
                    via_entity.primary_key().to_string(),
                ),
                _ => return Err(unsupported_through(association)),
            };
            let on = match source.kind {
                AssociationKind::BelongsTo => format!(
                    "{} = {}",
                    w.qualified(&via_alias, &source.foreign_key),
                    w.qualified(&target_alias, target.primary_key())
                ),
                AssociationKind::HasMany => format!(
                    "{} = {}",
                    w.qualified(&target_alias, &source.foreign_key),
                    w.qualified(&via_alias, via_entity.primary_key())
                ),
                _ => return Err(unsupported_through(association)),
            };
            let via_table = if via_alias == via_entity.table() {
                w.quote(&via_alias)
            } else {
                format!("{} {}", w.quote(via_entity.table()), w.quote(&via_alias))
            };
            w.push(&format!(
                "SELECT {}.*, {} AS {} FROM {} INNER JOIN {} ON {}",
                w.quote(&target_alias),
                w.qualified(&via_alias, &owner_expr),
                w.quote(OWNER_KEY_COLUMN),
                w.quote(&target_alias),
                via_table,
                on,
            ));
            let via_scope = via_entity
                .default_scope_predicate()
                .map(|p| (p, QueryScope::single(&via_alias, via_entity)));
            (ChildKey::OwnerKey, via_alias, key_column, via_scope)
        }
    };

    w.push(&format!(" WHERE {} IN (", w.qualified(&key_alias, &key_column)));
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            w.push(", ");
        }
        w.bind(DatabaseValue::Int64(*key));
    }
    w.push(")");

    if let Some(scope) = target.default_scope_predicate() {
        w.push(" AND ");
        write_predicate(&mut w, &QueryScope::single(&target_alias, target), &scope)?;
    }
    if let Some((predicate, scope)) = extra_scope {
        w.push(" AND ");
        write_predicate(&mut w, &scope, &predicate)?;
    }

    if !association.order.is_empty() {
        let terms: Vec<String> = association
            .order
            .iter()
            .map(|(column, direction)| format!("{} {}", w.qualified(&target_alias, column), direction))
            .collect();
        w.push(" ORDER BY ");
        w.push(&terms.join(", "));
    }

    Ok(PreloadQuery {
        statement: w.finish(),
        link,
    })
}

fn unsupported_through(association: &Association) -> ModelError {
    ModelError::InvalidQuery(format!(
        "Through association '{}' must pass through a belongs-to or has-many association",
        association.name
    ))
}

/// Predicate selecting the targets of `association` for one owner; used for
/// lazy loading
pub(crate) fn association_predicate(
    registry: &'static SchemaRegistry,
    owner: &Record,
    association: &Association,
) -> ModelResult<Option<Predicate>> {
    let owner_schema = owner.schema();
    let target = registry.entity(&association.target)?;
    let q = |identifier: &str| SqlDialect::PostgreSQL.quote_identifier(identifier);
    let owner_id = owner.id().map(DatabaseValue::Int64);

    Ok(match &association.kind {
        AssociationKind::BelongsTo => {
            let key = owner.raw(&association.foreign_key);
            if key.is_null() {
                return Ok(None);
            }
            Some(Predicate::eq(target.primary_key(), key.clone()))
        }
        AssociationKind::HasMany => owner_id.map(|id| Predicate::eq(&association.foreign_key, id)),
        AssociationKind::ManyToMany {
            join_table,
            association_foreign_key,
        } => owner_id.map(|id| {
            Predicate::raw(
                &format!(
                    "{}.{} IN (SELECT {} FROM {} WHERE {} = ?)",
                    q(target.table()),
                    q(target.primary_key()),
                    q(association_foreign_key),
                    q(join_table),
                    q(&association.foreign_key)
                ),
                [id],
            )
        }),
        AssociationKind::HasManyThrough { through, source } => {
            let via = owner_schema.association(through)?;
            let via_entity = registry.entity(&via.target)?;
            let source = via_entity.association(source)?;
            let (via_filter, bind) = match via.kind {
                AssociationKind::HasMany => (q(&via.foreign_key), owner_id),
                AssociationKind::BelongsTo => {
                    let key = owner.raw(&via.foreign_key);
                    (q(via_entity.primary_key()), key.as_i64().map(DatabaseValue::Int64))
                }
                _ => return Err(unsupported_through(association)),
            };
            let Some(bind) = bind else { return Ok(None) };
            let (target_column, via_column) = match source.kind {
                AssociationKind::BelongsTo => (target.primary_key().to_string(), source.foreign_key.clone()),
                AssociationKind::HasMany => (source.foreign_key.clone(), via_entity.primary_key().to_string()),
                _ => return Err(unsupported_through(association)),
            };
            let mut sql = format!(
                "{}.{} IN (SELECT {} FROM {} WHERE {} = ?",
                q(target.table()),
                q(&target_column),
                q(&via_column),
                q(via_entity.table()),
                via_filter
            );
            let mut binds = vec![bind];
            if let Some(scope) = via_entity.default_scope_predicate() {
                let mut w = SqlWriter::new(SqlDialect::SQLite);
                write_predicate(&mut w, &QueryScope::single(via_entity.table(), via_entity), &scope)?;
                let rendered = w.finish();
                sql.push_str(" AND ");
                sql.push_str(&rendered.sql);
                binds.extend(rendered.params);
            }
            sql.push(')');
            Some(Predicate::raw(&sql, binds))
        }
    })
}
