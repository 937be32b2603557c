//! Persistence of nested aggregates over a SQL store.
//!
//! A root record and its child collections are described once (see
//! [`Record`]), registered under a table name, and then read, saved and
//! deleted as one unit. Saving compares the in-memory tree with the stored
//! rows: new rows are inserted, changed rows updated, and stored rows that
//! disappeared from memory removed, all in a single transaction guarded by an
//! optional optimistic token.

pub mod convert;
pub mod delete;
pub mod describe;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod manager;
pub mod model;
pub mod put;
pub mod query;
pub mod registry;
pub mod schema;
pub mod statements;
mod txn;

#[cfg(test)]
mod fixtures;

pub use convert::{NativeType, Scalar};
pub use describe::{Association, Column, Record, RecordDescriptor, TableDef};
pub use error::OrmError;
pub use manager::Manager;
pub use model::{Cardinality, DataType, Entity, Field, Key, Table};
pub use put::PutSummary;
pub use query::{Criterion, Op, Query};
pub use registry::Registry;
pub use schema::{ColumnSchema, IndexSchema, TableSchema};
