use tracing::warn;
use treeorm_sql::{ExecResult, Executor, Row, SQLError, SQLStore, Transaction, Value};

/// Where a multi-statement operation runs: straight on the store, or inside
/// a transaction that owns the connection until it finishes.
pub(crate) enum Scope<'a> {
    Direct(&'a dyn SQLStore),
    Tx(Box<dyn Transaction + 'a>),
}

impl<'a> Scope<'a> {
    pub(crate) fn open(store: &'a dyn SQLStore, transactional: bool) -> Result<Self, SQLError> {
        if transactional {
            Ok(Scope::Tx(store.begin()?))
        } else {
            Ok(Scope::Direct(store))
        }
    }

    pub(crate) fn commit(self) -> Result<(), SQLError> {
        match self {
            Scope::Direct(_) => Ok(()),
            Scope::Tx(tx) => tx.commit(),
        }
    }

    /// Roll back, logging instead of failing: the caller is already
    /// returning the error that caused the rollback.
    pub(crate) fn abort(self) {
        if let Scope::Tx(tx) = self {
            if let Err(e) = tx.rollback() {
                warn!("rollback failed: {}", e);
            }
        }
    }

    /// Commit on success, roll back on error.
    pub(crate) fn finish<T, E: From<SQLError>>(self, result: Result<T, E>) -> Result<T, E> {
        match result {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(e) => {
                self.abort();
                Err(e)
            }
        }
    }
}

impl Executor for Scope<'_> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        match self {
            Scope::Direct(store) => store.query(sql, params),
            Scope::Tx(tx) => tx.query(sql, params),
        }
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult, SQLError> {
        match self {
            Scope::Direct(store) => store.exec(sql, params),
            Scope::Tx(tx) => tx.exec(sql, params),
        }
    }
}
