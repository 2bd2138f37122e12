//! Supplier model

use folio_orm::{Associations, DatabaseExecutor, Model, ModelResult, Record};

use super::{Author, Book};

#[derive(Debug, Clone)]
pub struct Supplier {
    record: Record,
}

bookstore_model!(Supplier, "Supplier");

impl Supplier {
    pub fn name(&self) -> ModelResult<String> {
        self.attribute("name")
    }

    pub async fn books<E>(&self, db: &E) -> ModelResult<Vec<Book>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "books").await
    }

    /// Authors of the books this supplier carries
    pub async fn authors<E>(&self, db: &E) -> ModelResult<Vec<Author>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "authors").await
    }
}
