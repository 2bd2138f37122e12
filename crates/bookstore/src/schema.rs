//! Bookstore schema registration and DDL bootstrap
//!
//! The registry is the only place table, column and association names are
//! declared. The DDL constants create matching tables for tests and the demo
//! binary; they are not a migration system.

use chrono::{Datelike, Utc};
use once_cell::sync::Lazy;
use tracing::debug;

use folio_orm::{
    Association, ColumnKind, DatabaseExecutor, DatabaseValue, EntitySchema, EnumDef, Model,
    ModelError, ModelResult, OrderDirection, Predicate, SchemaRegistry,
};

use crate::models::{Book, Order, OrderStatus, ReviewState};

/// Books older than this many years are hidden by the default scope
pub const BOOK_VISIBILITY_YEARS: i32 = 50;

/// Join table between books and orders
pub const BOOKS_ORDERS: &str = "books_orders";

fn recent_books() -> Predicate {
    Predicate::gte("year_published", Utc::now().year() - BOOK_VISIBILITY_YEARS)
}

pub static REGISTRY: Lazy<SchemaRegistry> = Lazy::new(|| {
    SchemaRegistry::new()
        .register(
            EntitySchema::new("Author", "authors")
                .column("name", ColumnKind::Text)
                .required(&["name"])
                .with_association(
                    Association::has_many("books", "Book", "author_id")
                        .ordered_by("year_published", OrderDirection::Desc),
                ),
        )
        .register(
            EntitySchema::new("Supplier", "suppliers")
                .column("name", ColumnKind::Text)
                .required(&["name"])
                .with_association(Association::has_many("books", "Book", "supplier_id"))
                .with_association(Association::has_many_through("authors", "Author", "books", "author")),
        )
        .register(
            EntitySchema::new("Book", "books")
                .column("title", ColumnKind::Text)
                .column("year_published", ColumnKind::Integer)
                .column("out_of_print", ColumnKind::Boolean)
                .column("price", ColumnKind::Float)
                .column("isbn", ColumnKind::Text)
                .column("author_id", ColumnKind::BigInt)
                .column("supplier_id", ColumnKind::BigInt)
                .required(&["title", "year_published"])
                .default_scope(recent_books)
                .with_association(Association::belongs_to("author", "Author", "author_id"))
                .with_association(Association::belongs_to("supplier", "Supplier", "supplier_id"))
                .with_association(Association::has_many("reviews", "Review", "book_id"))
                .with_association(Association::many_to_many(
                    "orders",
                    "Order",
                    BOOKS_ORDERS,
                    "book_id",
                    "order_id",
                )),
        )
        .register(
            EntitySchema::new("Customer", "customers")
                .column("name", ColumnKind::Text)
                .column("email", ColumnKind::Text)
                .column("orders_count", ColumnKind::Integer)
                .column("visits", ColumnKind::Integer)
                .column("lock_version", ColumnKind::Integer)
                .required(&["name"])
                .locking_column("lock_version")
                .column_alias("lock_customer_column", "lock_version")
                .with_association(Association::has_many("orders", "Order", "customer_id"))
                .with_association(Association::has_many("reviews", "Review", "customer_id")),
        )
        .register(
            EntitySchema::new("Order", "orders")
                .column("status", ColumnKind::Integer)
                .column("total", ColumnKind::Float)
                .column("customer_id", ColumnKind::BigInt)
                .enumeration(EnumDef::of::<OrderStatus>())
                .with_association(Association::belongs_to("customer", "Customer", "customer_id"))
                .with_association(Association::many_to_many(
                    "books",
                    "Book",
                    BOOKS_ORDERS,
                    "order_id",
                    "book_id",
                )),
        )
        .register(
            EntitySchema::new("Review", "reviews")
                .column("rating", ColumnKind::Integer)
                .column("content", ColumnKind::Text)
                .column("state", ColumnKind::Integer)
                .column("customer_id", ColumnKind::BigInt)
                .column("book_id", ColumnKind::BigInt)
                .required(&["rating", "content"])
                .enumeration(EnumDef::of::<ReviewState>())
                .with_association(Association::belongs_to("customer", "Customer", "customer_id"))
                .with_association(Association::belongs_to("book", "Book", "book_id")),
        )
});

/// Tables for SQLite, in dependency order
pub const SQLITE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS authors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE IF NOT EXISTS suppliers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE IF NOT EXISTS books (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    year_published INTEGER NOT NULL,
    out_of_print BOOLEAN NOT NULL DEFAULT 0,
    price REAL NOT NULL DEFAULT 0,
    isbn TEXT,
    author_id INTEGER REFERENCES authors (id),
    supplier_id INTEGER REFERENCES suppliers (id),
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE IF NOT EXISTS customers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    email TEXT,
    orders_count INTEGER NOT NULL DEFAULT 0,
    visits INTEGER,
    lock_version INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status INTEGER NOT NULL DEFAULT 1,
    total REAL NOT NULL DEFAULT 0,
    customer_id INTEGER REFERENCES customers (id),
    created_at DATETIME,
    updated_at DATETIME
);
CREATE TABLE IF NOT EXISTS books_orders (
    book_id INTEGER NOT NULL REFERENCES books (id),
    order_id INTEGER NOT NULL REFERENCES orders (id),
    PRIMARY KEY (book_id, order_id)
);
CREATE TABLE IF NOT EXISTS reviews (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rating INTEGER NOT NULL,
    content TEXT NOT NULL,
    state INTEGER NOT NULL DEFAULT 0,
    customer_id INTEGER REFERENCES customers (id),
    book_id INTEGER REFERENCES books (id),
    created_at DATETIME,
    updated_at DATETIME
);
"#;

/// Tables for PostgreSQL, in dependency order
pub const POSTGRES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS authors (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS suppliers (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    created_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS books (
    id BIGSERIAL PRIMARY KEY,
    title TEXT NOT NULL,
    year_published INTEGER NOT NULL,
    out_of_print BOOLEAN NOT NULL DEFAULT FALSE,
    price DOUBLE PRECISION NOT NULL DEFAULT 0,
    isbn TEXT,
    author_id BIGINT REFERENCES authors (id),
    supplier_id BIGINT REFERENCES suppliers (id),
    created_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS customers (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL,
    email TEXT,
    orders_count INTEGER NOT NULL DEFAULT 0,
    visits INTEGER,
    lock_version INTEGER NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS orders (
    id BIGSERIAL PRIMARY KEY,
    status INTEGER NOT NULL DEFAULT 1,
    total DOUBLE PRECISION NOT NULL DEFAULT 0,
    customer_id BIGINT REFERENCES customers (id),
    created_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ
);
CREATE TABLE IF NOT EXISTS books_orders (
    book_id BIGINT NOT NULL REFERENCES books (id),
    order_id BIGINT NOT NULL REFERENCES orders (id),
    PRIMARY KEY (book_id, order_id)
);
CREATE TABLE IF NOT EXISTS reviews (
    id BIGSERIAL PRIMARY KEY,
    rating INTEGER NOT NULL,
    content TEXT NOT NULL,
    state INTEGER NOT NULL DEFAULT 0,
    customer_id BIGINT REFERENCES customers (id),
    book_id BIGINT REFERENCES books (id),
    created_at TIMESTAMPTZ,
    updated_at TIMESTAMPTZ
);
"#;

/// Record that `order` contains `book`
pub async fn link<E>(db: &E, book: &Book, order: &Order) -> ModelResult<()>
where
    E: DatabaseExecutor + ?Sized,
{
    let (book_id, order_id) = link_keys(book, order)?;
    let dialect = db.dialect();
    let sql = format!(
        "INSERT INTO {} ({}, {}) VALUES ({}, {})",
        dialect.quote_identifier(BOOKS_ORDERS),
        dialect.quote_identifier("book_id"),
        dialect.quote_identifier("order_id"),
        dialect.placeholder(1),
        dialect.placeholder(2)
    );
    debug!(book_id, order_id, "Linking book to order");
    db.execute(&sql, &[DatabaseValue::Int64(book_id), DatabaseValue::Int64(order_id)])
        .await?;
    Ok(())
}

/// Remove `book` from `order`; returns whether a link existed
pub async fn unlink<E>(db: &E, book: &Book, order: &Order) -> ModelResult<bool>
where
    E: DatabaseExecutor + ?Sized,
{
    let (book_id, order_id) = link_keys(book, order)?;
    let dialect = db.dialect();
    let sql = format!(
        "DELETE FROM {} WHERE {} = {} AND {} = {}",
        dialect.quote_identifier(BOOKS_ORDERS),
        dialect.quote_identifier("book_id"),
        dialect.placeholder(1),
        dialect.quote_identifier("order_id"),
        dialect.placeholder(2)
    );
    debug!(book_id, order_id, "Unlinking book from order");
    let removed = db
        .execute(&sql, &[DatabaseValue::Int64(book_id), DatabaseValue::Int64(order_id)])
        .await?;
    Ok(removed > 0)
}

fn link_keys(book: &Book, order: &Order) -> ModelResult<(i64, i64)> {
    match (book.id(), order.id()) {
        (Some(book_id), Some(order_id)) => Ok((book_id, order_id)),
        _ => Err(ModelError::MissingPrimaryKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_is_consistent() {
        REGISTRY.validate().unwrap();
        assert_eq!(REGISTRY.entities().count(), 6);
    }

    #[test]
    fn test_lock_column_alias_resolves_to_canonical() {
        let customers = REGISTRY.entity("Customer").unwrap();
        assert_eq!(customers.locking_column_name(), Some("lock_version"));
        assert_eq!(
            customers.resolve_column("lock_customer_column").unwrap(),
            "lock_version"
        );
    }

    #[test]
    fn test_book_default_scope_tracks_current_year() {
        let expected = Utc::now().year() - BOOK_VISIBILITY_YEARS;
        assert_eq!(recent_books(), Predicate::gte("year_published", expected));
    }
}
