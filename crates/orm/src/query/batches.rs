//! Batched iteration over large relations
//!
//! Rows are windowed by primary key (`WHERE id > last_seen ORDER BY id LIMIT
//! n`), so every batch is a bounded, independent statement and the scan never
//! holds more than one batch in memory.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::builder::Relation;
use super::types::*;
use crate::backends::DatabaseExecutor;
use crate::config::OrmConfig;
use crate::error::{ModelError, ModelResult};
use crate::model::Model;

/// Windowing options for [`Relation::batches`]
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// First primary key to include
    pub start: Option<i64>,
    /// Last primary key to include
    pub finish: Option<i64>,
    pub order: OrderDirection,
    /// Reject a relation that carries its own ordering instead of ignoring it
    pub error_on_ignored_order: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            start: None,
            finish: None,
            order: OrderDirection::Asc,
            error_on_ignored_order: false,
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &OrmConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            error_on_ignored_order: config.error_on_ignored_order,
            ..Self::default()
        }
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn start(mut self, id: i64) -> Self {
        self.start = Some(id);
        self
    }

    pub fn finish(mut self, id: i64) -> Self {
        self.finish = Some(id);
        self
    }

    pub fn descending(mut self) -> Self {
        self.order = OrderDirection::Desc;
        self
    }

    pub fn error_on_ignored_order(mut self, flag: bool) -> Self {
        self.error_on_ignored_order = flag;
        self
    }
}

/// Restartable batch cursor
#[derive(Debug, Clone)]
pub struct Batches<M> {
    base: Relation<M>,
    options: BatchOptions,
    primary_key: String,
    limit: Option<u64>,
    cursor: Option<i64>,
    delivered: u64,
    exhausted: bool,
    buffer: VecDeque<M>,
}

impl<M: Model> Relation<M> {
    /// Iterate the relation in primary-key windows. A custom ordering is
    /// replaced by the key ordering (with a warning), or rejected when
    /// `error_on_ignored_order` is set. A limit caps the total row count.
    pub fn batches(&self, options: BatchOptions) -> ModelResult<Batches<M>> {
        self.check()?;
        if options.batch_size == 0 {
            return Err(ModelError::invalid_query("Batch size must be greater than zero"));
        }
        if !self.orders.is_empty() {
            if options.error_on_ignored_order {
                return Err(ModelError::invalid_query(
                    "Scoped order is ignored, batches use primary key order",
                ));
            }
            warn!(
                entity = M::ENTITY,
                "Scoped order is ignored, it's forced to be batch order"
            );
        }

        let schema = self.schema()?;
        if !self.projection_carries_identity(schema) {
            return Err(ModelError::invalid_query(
                "Batches need the primary key in the projection",
            ));
        }
        let primary_key = schema.primary_key().to_string();
        let mut base = self.clone().unscope(&[ClauseKind::Order, ClauseKind::Limit, ClauseKind::Offset]);
        base = match options.order {
            OrderDirection::Asc => {
                if let Some(start) = options.start {
                    base = base.where_gte(&primary_key, start);
                }
                if let Some(finish) = options.finish {
                    base = base.where_lte(&primary_key, finish);
                }
                base.order(&primary_key, OrderDirection::Asc)
            }
            OrderDirection::Desc => {
                if let Some(start) = options.start {
                    base = base.where_lte(&primary_key, start);
                }
                if let Some(finish) = options.finish {
                    base = base.where_gte(&primary_key, finish);
                }
                base.order(&primary_key, OrderDirection::Desc)
            }
        };

        Ok(Batches {
            base,
            options,
            primary_key,
            limit: self.limit_count,
            cursor: None,
            delivered: 0,
            exhausted: false,
            buffer: VecDeque::new(),
        })
    }
}

impl<M: Model> Batches<M> {
    /// Next chunk of at most `batch_size` records; `None` once exhausted
    pub async fn next_batch<E>(&mut self, db: &E) -> ModelResult<Option<Vec<M>>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if !self.buffer.is_empty() {
            return Ok(Some(self.buffer.drain(..).collect()));
        }
        if self.exhausted {
            return Ok(None);
        }

        let mut size = self.options.batch_size as u64;
        if let Some(limit) = self.limit {
            size = size.min(limit.saturating_sub(self.delivered));
        }
        if size == 0 {
            self.exhausted = true;
            return Ok(None);
        }

        let mut window = self.base.clone();
        if let Some(cursor) = self.cursor {
            window = match self.options.order {
                OrderDirection::Asc => window.where_gt(&self.primary_key, cursor),
                OrderDirection::Desc => window.where_lt(&self.primary_key, cursor),
            };
        }
        let batch = window.limit(size).load(db).await?;
        debug!(
            entity = M::ENTITY,
            after = ?self.cursor,
            rows = batch.len(),
            "Loaded batch"
        );

        if (batch.len() as u64) < size {
            self.exhausted = true;
        }
        if batch.is_empty() {
            return Ok(None);
        }
        let last = batch.last().and_then(|record| record.id()).ok_or_else(|| {
            ModelError::invalid_query("Batch record was loaded without its primary key")
        })?;
        self.cursor = Some(last);
        self.delivered += batch.len() as u64;
        Ok(Some(batch))
    }

    /// Next single record, fetching a new batch when the current one is spent
    pub async fn next_record<E>(&mut self, db: &E) -> ModelResult<Option<M>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        if self.buffer.is_empty() {
            match self.next_batch(db).await? {
                Some(batch) => self.buffer.extend(batch),
                None => return Ok(None),
            }
        }
        Ok(self.buffer.pop_front())
    }

    /// Start over from the first window
    pub fn reset(&mut self) {
        self.cursor = None;
        self.delivered = 0;
        self.exhausted = false;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Title;

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = Relation::<Title>::new().batches(BatchOptions::default().batch_size(0));
        assert!(matches!(result, Err(ModelError::InvalidQuery(_))));
    }

    #[test]
    fn test_custom_order_rejected_when_configured() {
        let relation = Relation::<Title>::new().order_by("name");
        let strict = BatchOptions::default().error_on_ignored_order(true);
        assert!(relation.batches(strict).is_err());
        assert!(relation.batches(BatchOptions::default()).is_ok());
    }

    #[test]
    fn test_window_replaces_order_and_bounds_keys() {
        let batches = Relation::<Title>::unscoped()
            .order_by("name")
            .offset(7)
            .batches(BatchOptions::default().start(10).finish(20))
            .unwrap();
        assert_eq!(
            batches.base.to_sql().unwrap(),
            "SELECT \"titles\".* FROM \"titles\" WHERE \"titles\".\"id\" >= $1 AND \"titles\".\"id\" <= $2 \
             ORDER BY \"titles\".\"id\" ASC"
        );
    }

    #[test]
    fn test_projection_without_primary_key_is_rejected() {
        let options = || BatchOptions::default().batch_size(2);
        let distinct = Relation::<Title>::new().select(&["name"]).distinct(true);
        assert!(matches!(distinct.batches(options()), Err(ModelError::InvalidQuery(_))));

        let raw = Relation::<Title>::new().select_raw("upper(name) AS loud");
        assert!(matches!(raw.batches(options()), Err(ModelError::InvalidQuery(_))));

        let grouped = Relation::<Title>::new().group_by("year");
        assert!(matches!(grouped.batches(options()), Err(ModelError::InvalidQuery(_))));

        assert!(Relation::<Title>::new().select(&["name"]).batches(options()).is_ok());
        assert!(Relation::<Title>::new()
            .select(&["id", "name"])
            .distinct(true)
            .batches(options())
            .is_ok());
    }

    #[test]
    fn test_options_from_config() {
        let config = OrmConfig {
            batch_size: 250,
            error_on_ignored_order: true,
            ..OrmConfig::default()
        };
        let options = BatchOptions::from_config(&config);
        assert_eq!(options.batch_size, 250);
        assert!(options.error_on_ignored_order);
        assert_eq!(options.order, OrderDirection::Asc);
    }
}
