use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::error::SQLError;

/// Text layout used for timestamps on the wire.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A dynamically-typed SQL parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short kind name, used in conversion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Timestamp(_) => "timestamp",
        }
    }
}

/// A row returned from a SQL query: column name to value, in select order.
#[derive(Debug, Clone)]
pub struct Row {
    pub columns: Vec<(String, Value)>,
}

impl Row {
    /// Get a column value by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Get a column value by position.
    pub fn value(&self, idx: usize) -> Option<&Value> {
        self.columns.get(idx).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get a text column value by name.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Value::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Get an integer column value by name.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(Value::Integer(i)) => Some(*i),
            _ => None,
        }
    }
}

/// Outcome of an INSERT/UPDATE/DELETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Row id generated by the most recent successful INSERT on the connection.
    pub last_insert_id: i64,
}

/// Handle to a statement compiled by [`SQLStore::prepare`].
///
/// Handles are cheap to clone; the store keeps the compiled form cached and
/// reuses it whenever the handle is executed.
#[derive(Debug, Clone)]
pub struct Statement {
    id: u64,
    sql: Arc<str>,
}

impl Statement {
    pub fn new(id: u64, sql: &str) -> Self {
        Self {
            id,
            sql: Arc::from(sql),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Positional-parameter statement execution, shared by stores and transactions.
pub trait Executor {
    /// Execute a query and return rows.
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError>;

    /// Execute a statement (INSERT/UPDATE/DELETE).
    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult, SQLError>;

    /// Execute a query expected to produce at least one row and return the first.
    /// Returns `SQLError::NoRows` when the result set is empty.
    fn query_row(&self, sql: &str, params: &[Value]) -> Result<Row, SQLError> {
        self.query(sql, params)?
            .into_iter()
            .next()
            .ok_or(SQLError::NoRows)
    }

    fn query_stmt(&self, stmt: &Statement, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        self.query(stmt.sql(), params)
    }

    fn exec_stmt(&self, stmt: &Statement, params: &[Value]) -> Result<ExecResult, SQLError> {
        self.exec(stmt.sql(), params)
    }
}

/// An open transaction. Dropping it without `commit` rolls it back.
pub trait Transaction: Executor {
    fn commit(self: Box<Self>) -> Result<(), SQLError>;

    fn rollback(self: Box<Self>) -> Result<(), SQLError>;
}

/// SQLStore provides a transactional SQL execution interface backed by an
/// embedded database.
pub trait SQLStore: Executor + Send + Sync {
    /// Compile `sql` and return a reusable handle. Fails if the statement does
    /// not compile against the current schema.
    fn prepare(&self, sql: &str) -> Result<Statement, SQLError>;

    /// Release a handle returned by `prepare`.
    fn release(&self, stmt: &Statement);

    /// Begin a transaction. The transaction has exclusive use of the
    /// connection until it is committed, rolled back or dropped.
    fn begin(&self) -> Result<Box<dyn Transaction + '_>, SQLError>;
}
