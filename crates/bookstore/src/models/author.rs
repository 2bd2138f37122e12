//! Author model

use folio_orm::{Associations, DatabaseExecutor, Model, ModelResult, Record};

use super::Book;

#[derive(Debug, Clone)]
pub struct Author {
    record: Record,
}

bookstore_model!(Author, "Author");

impl Author {
    pub fn name(&self) -> ModelResult<String> {
        self.attribute("name")
    }

    /// Visible books, newest first
    pub async fn books<E>(&self, db: &E) -> ModelResult<Vec<Book>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "books").await
    }
}
