//! Review model

use folio_orm::{
    AttributeEnum, Associations, CrudOperations, DatabaseExecutor, Model, ModelResult, Record,
};

use super::{Book, Customer};

/// Moderation state stored in `reviews.state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewState {
    NotReviewed,
    Published,
    Hidden,
}

impl AttributeEnum for ReviewState {
    const COLUMN: &'static str = "state";

    fn variants() -> &'static [Self] {
        &[ReviewState::NotReviewed, ReviewState::Published, ReviewState::Hidden]
    }

    fn name(&self) -> &'static str {
        match self {
            ReviewState::NotReviewed => "not_reviewed",
            ReviewState::Published => "published",
            ReviewState::Hidden => "hidden",
        }
    }

    fn value(&self) -> i64 {
        match self {
            ReviewState::NotReviewed => 0,
            ReviewState::Published => 1,
            ReviewState::Hidden => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Review {
    record: Record,
}

bookstore_model!(Review, "Review");

impl Review {
    pub fn rating(&self) -> ModelResult<i64> {
        self.attribute("rating")
    }

    pub fn content(&self) -> ModelResult<String> {
        self.attribute("content")
    }

    pub fn state(&self) -> ModelResult<ReviewState> {
        self.enum_value()
    }

    pub fn is_not_reviewed(&self) -> ModelResult<bool> {
        self.is(ReviewState::NotReviewed)
    }

    pub fn is_published(&self) -> ModelResult<bool> {
        self.is(ReviewState::Published)
    }

    pub fn is_hidden(&self) -> ModelResult<bool> {
        self.is(ReviewState::Hidden)
    }

    /// Move back to the moderation queue and persist it
    pub async fn mark_not_reviewed<E>(&mut self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.transition_to(db, ReviewState::NotReviewed).await
    }

    pub async fn publish<E>(&mut self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.transition_to(db, ReviewState::Published).await
    }

    pub async fn hide<E>(&mut self, db: &E) -> ModelResult<bool>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.transition_to(db, ReviewState::Hidden).await
    }

    pub async fn book<E>(&self, db: &E) -> ModelResult<Option<Book>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.belongs_to(db, "book").await
    }

    pub async fn customer<E>(&self, db: &E) -> ModelResult<Option<Customer>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.belongs_to(db, "customer").await
    }
}
