//! Query Methods - relation starting points for models
//!
//! `Book::query()` is the default-scoped relation every chain starts from;
//! `Book::unscoped_query()` and [`unscoped`] start without the default scope.

use crate::model::core_trait::Model;
use crate::query::{Predicate, Relation};

/// Trait providing relation constructors for models
pub trait QueryMethods: Model {
    /// Every visible row, default scope applied
    fn query() -> Relation<Self> {
        Relation::new()
    }

    /// Every row, default scope removed
    fn unscoped_query() -> Relation<Self> {
        Relation::unscoped()
    }

    /// A relation that never touches storage
    fn none() -> Relation<Self> {
        Relation::new().none()
    }

    fn filter(predicate: Predicate) -> Relation<Self> {
        Self::query().filter(predicate)
    }
}

impl<T: Model> QueryMethods for T {}

/// Build a relation inside a block whose base carries no default scope
///
/// ```ignore
/// let recent = unscoped::<Book, _>(|books| books.where_gt("year_published", 1900));
/// ```
pub fn unscoped<M, F>(block: F) -> Relation<M>
where
    M: Model,
    F: FnOnce(Relation<M>) -> Relation<M>,
{
    block(Relation::unscoped())
}
