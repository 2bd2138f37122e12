//! Book model and its named scopes

use chrono::{Datelike, Utc};

use folio_orm::{
    Associations, DatabaseExecutor, Model, ModelResult, Predicate, QueryMethods, Record, Relation,
};

use super::{Author, Order, Review, Supplier};
use crate::schema::BOOK_VISIBILITY_YEARS;

/// Price above which an out-of-print book counts as expensive
pub const EXPENSIVE_PRICE: f64 = 500.0;

#[derive(Debug, Clone)]
pub struct Book {
    record: Record,
}

bookstore_model!(Book, "Book");

impl Book {
    pub fn title(&self) -> ModelResult<String> {
        self.attribute("title")
    }

    pub fn year_published(&self) -> ModelResult<i32> {
        self.attribute("year_published")
    }

    pub fn is_out_of_print(&self) -> ModelResult<bool> {
        self.attribute("out_of_print")
    }

    pub fn price(&self) -> ModelResult<f64> {
        self.attribute("price")
    }

    pub fn isbn(&self) -> ModelResult<Option<String>> {
        self.attribute("isbn")
    }

    pub fn author_id(&self) -> ModelResult<Option<i64>> {
        self.attribute("author_id")
    }

    pub async fn author<E>(&self, db: &E) -> ModelResult<Option<Author>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.belongs_to(db, "author").await
    }

    pub async fn supplier<E>(&self, db: &E) -> ModelResult<Option<Supplier>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.belongs_to(db, "supplier").await
    }

    pub async fn reviews<E>(&self, db: &E) -> ModelResult<Vec<Review>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "reviews").await
    }

    pub async fn orders<E>(&self, db: &E) -> ModelResult<Vec<Order>>
    where
        E: DatabaseExecutor + ?Sized,
    {
        self.association(db, "orders").await
    }

    pub fn in_print() -> Relation<Book> {
        Book::query().in_print()
    }

    pub fn out_of_print() -> Relation<Book> {
        Book::query().out_of_print()
    }

    pub fn old() -> Relation<Book> {
        Book::unscoped_query().old()
    }

    pub fn out_of_print_and_expensive() -> Relation<Book> {
        Book::query().out_of_print_and_expensive()
    }

    pub fn costs_more_than(amount: f64) -> Relation<Book> {
        Book::query().costs_more_than(amount)
    }
}

/// Named scopes, chainable on any book relation
pub trait BookScopes: Sized {
    fn in_print(self) -> Self;

    fn out_of_print(self) -> Self;

    /// Published before the default scope's visibility window. Only rows
    /// outside the default scope match, so chain it on an unscoped relation.
    fn old(self) -> Self;

    fn out_of_print_and_expensive(self) -> Self;

    fn costs_more_than(self, amount: f64) -> Self;
}

impl BookScopes for Relation<Book> {
    fn in_print(self) -> Self {
        self.where_eq("out_of_print", false)
    }

    fn out_of_print(self) -> Self {
        self.where_eq("out_of_print", true)
    }

    fn old(self) -> Self {
        self.filter(Predicate::lt(
            "year_published",
            Utc::now().year() - BOOK_VISIBILITY_YEARS,
        ))
    }

    fn out_of_print_and_expensive(self) -> Self {
        self.out_of_print().where_gt("price", EXPENSIVE_PRICE)
    }

    fn costs_more_than(self, amount: f64) -> Self {
        self.where_raw("price > ?", [amount])
    }
}
