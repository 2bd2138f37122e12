//! Association descriptors
//!
//! Relationships are declared as data on the owning entity's schema. The join
//! planner, the preloader and the lazy loaders all read these descriptors; none
//! of them reflect over model types.

use crate::query::types::OrderDirection;

/// Shape of an association
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssociationKind {
    /// Owner holds `foreign_key` pointing at the target's primary key
    BelongsTo,
    /// Target holds `foreign_key` pointing at the owner's primary key
    HasMany,
    /// Rows link through `join_table`: `foreign_key` points at the owner,
    /// `association_foreign_key` at the target
    ManyToMany {
        join_table: String,
        association_foreign_key: String,
    },
    /// Follows the owner's `through` association, then `source` on its target
    HasManyThrough { through: String, source: String },
}

/// A named relationship from one entity to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Association {
    pub name: String,
    pub kind: AssociationKind,
    /// Target entity name
    pub target: String,
    /// Unused for through associations
    pub foreign_key: String,
    /// Ordering applied whenever the association is loaded
    pub order: Vec<(String, OrderDirection)>,
}

impl Association {
    pub fn belongs_to(name: &str, target: &str, foreign_key: &str) -> Self {
        Self::build(name, AssociationKind::BelongsTo, target, foreign_key)
    }

    pub fn has_many(name: &str, target: &str, foreign_key: &str) -> Self {
        Self::build(name, AssociationKind::HasMany, target, foreign_key)
    }

    pub fn many_to_many(
        name: &str,
        target: &str,
        join_table: &str,
        foreign_key: &str,
        association_foreign_key: &str,
    ) -> Self {
        Self::build(
            name,
            AssociationKind::ManyToMany {
                join_table: join_table.to_string(),
                association_foreign_key: association_foreign_key.to_string(),
            },
            target,
            foreign_key,
        )
    }

    pub fn has_many_through(name: &str, target: &str, through: &str, source: &str) -> Self {
        Self::build(
            name,
            AssociationKind::HasManyThrough {
                through: through.to_string(),
                source: source.to_string(),
            },
            target,
            "",
        )
    }

    fn build(name: &str, kind: AssociationKind, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            target: target.to_string(),
            foreign_key: foreign_key.to_string(),
            order: Vec::new(),
        }
    }

    /// Add an ordering term applied when the association is loaded
    pub fn ordered_by(mut self, column: &str, direction: OrderDirection) -> Self {
        self.order.push((column.to_string(), direction));
        self
    }

    /// Returns true if the association yields at most one record
    pub fn is_singular(&self) -> bool {
        matches!(self.kind, AssociationKind::BelongsTo)
    }
}
