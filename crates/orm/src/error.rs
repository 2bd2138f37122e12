//! Error types for the ORM system
//!
//! Every failure the relation builder, the record layer or the storage backends
//! can report is a variant of [`ModelError`]. None of them are swallowed: strict
//! lookups (`*_or_fail`) surface `NotFound`, lenient ones return `Option`.

use std::collections::BTreeMap;
use std::fmt;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Database driver or statement failure
    #[error("Database error: {0}")]
    Database(String),

    /// Connection or pool failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Transaction lifecycle failure, or a lock requested outside a transaction
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// No row matched a strict single-result lookup
    #[error("{0}")]
    NotFound(String),

    /// Required attributes were missing; the write never reached storage
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// A concurrent writer committed first; reload and retry
    #[error("Stale write on {table}#{id}: lock version {expected} is no longer current")]
    StaleWrite {
        table: String,
        id: i64,
        expected: i64,
    },

    /// Write attempted on a record loaded through a readonly relation
    #[error("{0} record is marked as readonly")]
    ReadOnlyRecord(String),

    /// Attribute access outside the selected column set
    #[error("Missing attribute '{attribute}' on {entity}: it was not selected")]
    AttributeNotLoaded { entity: String, attribute: String },

    /// Lazy association load on a strict-loading record
    #[error("{entity} is marked for strict loading; association '{association}' must be eager loaded")]
    LazyLoadViolation { entity: String, association: String },

    /// Malformed or ambiguous query input, rejected before reaching storage
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Value conversion failure between storage and Rust types
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Primary key is missing on a record that needs one
    #[error("Primary key is missing or invalid")]
    MissingPrimaryKey,
}

impl ModelError {
    /// Shorthand used by the relation builder for deferred input errors
    pub fn invalid_query(message: impl Into<String>) -> Self {
        ModelError::InvalidQuery(message.into())
    }

    /// Returns true for `NotFound`
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModelError::NotFound(_))
    }

    /// Returns true for `StaleWrite`
    pub fn is_stale_write(&self) -> bool {
        matches!(self, ModelError::StaleWrite { .. })
    }
}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => ModelError::NotFound("unknown".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                ModelError::Connection(err.to_string())
            }
            other => ModelError::Database(other.to_string()),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

/// Per-attribute validation messages collected before a write
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a message against an attribute
    pub fn add(&mut self, attribute: &str, message: impl Into<String>) {
        self.errors
            .entry(attribute.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Messages recorded for one attribute
    pub fn on(&self, attribute: &str) -> &[String] {
        self.errors
            .get(attribute)
            .map(|messages| messages.as_slice())
            .unwrap_or(&[])
    }

    /// Attributes that failed validation
    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(|k| k.as_str())
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (attribute, messages) in &self.errors {
            for message in messages {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{} {}", attribute, message)?;
                first = false;
            }
        }
        Ok(())
    }
}
