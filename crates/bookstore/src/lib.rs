//! # folio-bookstore
//!
//! The bookstore domain on top of `folio-orm`: authors, suppliers, books,
//! customers, orders and reviews, their schema registration and named scopes.

pub mod models;
pub mod schema;

pub use models::*;
pub use schema::{link, unlink, POSTGRES_DDL, REGISTRY, SQLITE_DDL};

use folio_orm::{DatabaseBackendType, DatabasePool, ModelResult};

/// Create the bookstore tables on `pool` if they are missing
pub async fn bootstrap<P>(pool: &P) -> ModelResult<()>
where
    P: DatabasePool + ?Sized,
{
    let ddl = match pool.backend_type() {
        DatabaseBackendType::PostgreSQL => POSTGRES_DDL,
        DatabaseBackendType::SQLite => SQLITE_DDL,
    };
    pool.execute_script(ddl).await
}
