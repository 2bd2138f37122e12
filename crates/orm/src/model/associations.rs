//! Association access on loaded models
//!
//! Associations loaded with `includes`, `preload` or `eager_load` are served
//! from memory. Anything else is loaded on first access, unless the record is
//! in strict-loading mode.

use tracing::debug;

use crate::backends::DatabaseExecutor;
use crate::error::{ModelError, ModelResult};
use crate::model::core_trait::Model;
use crate::query::with::association_predicate;
use crate::query::Relation;

#[allow(async_fn_in_trait)]
pub trait Associations: Model {
    /// Records of an association already loaded with this model
    fn loaded<T: Model>(&self, name: &str) -> Option<Vec<T>> {
        self.as_record()
            .loaded_association(name)
            .map(|records| records.iter().cloned().map(T::from_record).collect())
    }

    /// Records of an association, loading them when they were not preloaded
    async fn association<T, E>(&self, db: &E, name: &str) -> ModelResult<Vec<T>>
    where
        T: Model,
        E: DatabaseExecutor + ?Sized,
    {
        if let Some(records) = self.loaded(name) {
            return Ok(records);
        }

        let schema = Self::schema()?;
        let association = schema.association(name)?;
        if association.target != T::ENTITY {
            return Err(ModelError::InvalidQuery(format!(
                "Association '{}' on {} targets {}, not {}",
                name,
                Self::ENTITY,
                association.target,
                T::ENTITY
            )));
        }
        let record = self.as_record();
        if record.is_strict_loading() {
            return Err(ModelError::LazyLoadViolation {
                entity: Self::ENTITY.to_string(),
                association: name.to_string(),
            });
        }

        let Some(predicate) = association_predicate(Self::registry(), record, association)? else {
            return Ok(Vec::new());
        };
        debug!(entity = Self::ENTITY, association = name, "Lazy loading association");
        let mut relation = Relation::<T>::new().filter(predicate);
        for (column, direction) in &association.order {
            relation = relation.order(column, *direction);
        }
        if record.is_readonly() {
            relation = relation.readonly();
        }
        relation.load(db).await
    }

    /// The single record of a belongs-to association
    async fn belongs_to<T, E>(&self, db: &E, name: &str) -> ModelResult<Option<T>>
    where
        T: Model,
        E: DatabaseExecutor + ?Sized,
    {
        Ok(self.association::<T, E>(db, name).await?.into_iter().next())
    }
}

impl<T: Model> Associations for T {}
