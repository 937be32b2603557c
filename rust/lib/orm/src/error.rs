use thiserror::Error;
use treeorm_sql::SQLError;

/// Errors raised by the persistence engine.
///
/// Driver failures pass through untouched in [`OrmError::Driver`]; every
/// other variant carries a message naming the table or field involved.
#[derive(Error, Debug)]
pub enum OrmError {
    /// Malformed field metadata, missing/duplicate keys, unsupported type.
    /// Raised only while registering an entity.
    #[error("schema error: {0}")]
    Schema(String),

    /// The record type was never registered.
    #[error("entity not registered: {0}")]
    NotRegistered(String),

    /// No statements are bound; attach a connection first.
    #[error("not bound to a connection: {0}")]
    NotBound(String),

    /// Optimistic token mismatch. Re-read the aggregate and retry.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value cannot be coerced into the declared field type.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// An insert, update or remove touched an unexpected number of rows.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// The primary key value has a type the engine cannot key rows by.
    #[error("unsupported key: {0}")]
    UnsupportedKey(String),

    /// A record handed to a table accessor is not that table's row type.
    #[error("row and schema mismatch: {0}")]
    Mismatch(String),

    /// A `before_save` hook refused the record.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Driver(#[from] SQLError),
}

impl OrmError {
    /// True when the error is the driver's "no row" condition, e.g. a `get`
    /// for a key that is not stored.
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrmError::Driver(SQLError::NoRows))
    }
}
