//! Shared fixtures for bookstore integration tests

#![allow(dead_code)]

use chrono::{Datelike, Utc};

use folio_bookstore::{bootstrap, Author, Book, Customer, Supplier};
use folio_orm::backends::SqlitePool;
use folio_orm::{CrudOperations, DatabasePool, DatabaseValue, Model};

/// In-memory database with the bookstore tables
pub async fn setup() -> SqlitePool {
    let pool = SqlitePool::in_memory().await.expect("in-memory SQLite pool");
    bootstrap(&pool).await.expect("bookstore tables");
    pool
}

/// Statements issued on `pool` so far
pub fn statements(pool: &SqlitePool) -> u64 {
    pool.statistics().statements()
}

pub fn years_ago(years: i32) -> i32 {
    Utc::now().year() - years
}

pub struct Catalog {
    pub alice: Author,
    pub boris: Author,
    pub supplier: Supplier,
    /// Recent, in print, cheap (Alice)
    pub recent_cheap: Book,
    /// Out of print, expensive (Alice)
    pub rare_folio: Book,
    /// Out of print, cheap (Boris)
    pub worn_paperback: Book,
    /// Outside the default scope, out of print, expensive (Boris)
    pub ancient_codex: Book,
    /// In print, expensive (Alice)
    pub collector_edition: Book,
}

pub async fn seed_catalog(pool: &SqlitePool) -> Catalog {
    let alice = Author::create(pool, &[("name", "Alice Archer".into())])
        .await
        .expect("author");
    let boris = Author::create(pool, &[("name", "Boris Blake".into())])
        .await
        .expect("author");
    let supplier = Supplier::create(pool, &[("name", "Paper Trail".into())])
        .await
        .expect("supplier");

    let recent_cheap = book(pool, "Recent Cheap", 1, false, 20.0, &alice, &supplier).await;
    let rare_folio = book(pool, "Rare Folio", 10, true, 800.0, &alice, &supplier).await;
    let worn_paperback = book(pool, "Worn Paperback", 5, true, 15.0, &boris, &supplier).await;
    let ancient_codex = book(pool, "Ancient Codex", 80, true, 900.0, &boris, &supplier).await;
    let collector_edition = book(pool, "Collector Edition", 2, false, 650.0, &alice, &supplier).await;

    Catalog {
        alice,
        boris,
        supplier,
        recent_cheap,
        rare_folio,
        worn_paperback,
        ancient_codex,
        collector_edition,
    }
}

pub async fn book(
    pool: &SqlitePool,
    title: &str,
    age: i32,
    out_of_print: bool,
    price: f64,
    author: &Author,
    supplier: &Supplier,
) -> Book {
    Book::create(
        pool,
        &[
            ("title", title.into()),
            ("year_published", years_ago(age).into()),
            ("out_of_print", out_of_print.into()),
            ("price", price.into()),
            ("author_id", id_of(author)),
            ("supplier_id", id_of(supplier)),
        ],
    )
    .await
    .expect("book")
}

pub async fn customer(pool: &SqlitePool, name: &str, visits: Option<i64>) -> Customer {
    let visits = visits.map(DatabaseValue::Int64).unwrap_or(DatabaseValue::Null);
    Customer::create(pool, &[("name", name.into()), ("visits", visits)])
        .await
        .expect("customer")
}

pub fn id_of<M: Model>(model: &M) -> DatabaseValue {
    DatabaseValue::Int64(model.id().expect("persisted model"))
}

pub fn titles(books: &[Book]) -> Vec<String> {
    books.iter().map(|b| b.title().expect("title")).collect()
}
