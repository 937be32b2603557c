use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::types::ValueRef;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::SQLError;
use crate::traits::{
    ExecResult, Executor, Row, SQLStore, Statement, TIME_FORMAT, Transaction, Value,
};

const DEFAULT_STATEMENT_CACHE: usize = 128;

/// SqliteStore is a SQLStore implementation backed by rusqlite (bundled SQLite).
///
/// A [`Statement`] handle is a key into the connection's prepared statement
/// cache. The cache grows so that every live handle stays compiled; released
/// handles age out of it.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    next_id: AtomicU64,
    live: AtomicUsize,
    cache_capacity: AtomicUsize,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self, SQLError> {
        let config = StoreConfig {
            sqlite_path: Some(path.to_path_buf()),
            ..Default::default()
        };
        Self::open_with_config(&config)
    }

    /// Open the database described by `config` and apply its pragmas.
    pub fn open_with_config(config: &StoreConfig) -> Result<Self, SQLError> {
        let path = config.resolve_sqlite_path();
        let conn = Connection::open(&path).map_err(|e| SQLError::Connection(e.to_string()))?;

        conn.execute_batch(&format!("PRAGMA journal_mode={};", config.journal_mode))
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        let fk = if config.foreign_keys { "ON" } else { "OFF" };
        conn.execute_batch(&format!("PRAGMA foreign_keys={fk};"))
            .map_err(|e| SQLError::Connection(e.to_string()))?;
        conn.set_prepared_statement_cache_capacity(config.statement_cache);

        debug!("SqliteStore: opened {:?} (journal_mode={})", path, config.journal_mode);
        Ok(Self::from_connection(conn, config.statement_cache))
    }

    /// Create an in-memory SQLite database (useful for tests).
    pub fn open_in_memory() -> Result<Self, SQLError> {
        let conn = Connection::open_in_memory().map_err(|e| SQLError::Connection(e.to_string()))?;
        conn.set_prepared_statement_cache_capacity(DEFAULT_STATEMENT_CACHE);
        Ok(Self::from_connection(conn, DEFAULT_STATEMENT_CACHE))
    }

    fn from_connection(conn: Connection, cache_capacity: usize) -> Self {
        Self {
            conn: Mutex::new(conn),
            next_id: AtomicU64::new(1),
            live: AtomicUsize::new(0),
            cache_capacity: AtomicUsize::new(cache_capacity),
        }
    }

    /// Number of prepared handles not yet released.
    pub fn prepared_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Current capacity of the prepared statement cache.
    pub fn statement_cache_capacity(&self) -> usize {
        self.cache_capacity.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, SQLError> {
        self.conn.lock().map_err(|e| SQLError::Connection(e.to_string()))
    }
}

/// Convert our Value enum to rusqlite's ToSql.
fn bind_params(params: &[Value]) -> Vec<Box<dyn rusqlite::types::ToSql + '_>> {
    params
        .iter()
        .map(|v| -> Box<dyn rusqlite::types::ToSql + '_> {
            match v {
                Value::Null => Box::new(rusqlite::types::Null),
                Value::Bool(b) => Box::new(*b),
                Value::Integer(i) => Box::new(*i),
                Value::Real(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.as_str()),
                Value::Blob(b) => Box::new(b.as_slice()),
                Value::Timestamp(t) => Box::new(t.format(TIME_FORMAT).to_string()),
            }
        })
        .collect()
}

fn run_query(conn: &Connection, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
    let bound = bind_params(params);
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| SQLError::Query(e.to_string()))?;

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();

    let rows = stmt
        .query_map(param_refs.as_slice(), |row| {
            let mut columns = Vec::with_capacity(column_names.len());
            for (i, name) in column_names.iter().enumerate() {
                columns.push((name.clone(), row_value_at(row, i)?));
            }
            Ok(Row { columns })
        })
        .map_err(|e| SQLError::Query(e.to_string()))?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row.map_err(|e| SQLError::Query(e.to_string()))?);
    }
    Ok(result)
}

fn run_exec(conn: &Connection, sql: &str, params: &[Value]) -> Result<ExecResult, SQLError> {
    let bound = bind_params(params);
    let param_refs: Vec<&dyn rusqlite::types::ToSql> = bound.iter().map(|b| b.as_ref()).collect();

    let mut stmt = conn
        .prepare_cached(sql)
        .map_err(|e| SQLError::Execution(e.to_string()))?;
    let affected = stmt
        .execute(param_refs.as_slice())
        .map_err(|e| SQLError::Execution(e.to_string()))?;

    Ok(ExecResult {
        rows_affected: affected as u64,
        last_insert_id: conn.last_insert_rowid(),
    })
}

/// Extract a Value from a rusqlite row at a given column index.
fn row_value_at(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Value> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => match std::str::from_utf8(t) {
            Ok(s) => Value::Text(s.to_string()),
            // Invalid UTF-8 is handed over untouched for the caller to reject.
            Err(_) => Value::Blob(t.to_vec()),
        },
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    })
}

impl Executor for SqliteStore {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        let conn = self.lock()?;
        run_query(&conn, sql, params)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult, SQLError> {
        let conn = self.lock()?;
        run_exec(&conn, sql, params)
    }
}

impl SQLStore for SqliteStore {
    fn prepare(&self, sql: &str) -> Result<Statement, SQLError> {
        let conn = self.lock()?;
        // Compiling through the cache validates the statement and keeps it warm.
        conn.prepare_cached(sql)
            .map_err(|e| SQLError::Query(format!("{e}: {sql}")))?;

        let stmt = Statement::new(self.next_id.fetch_add(1, Ordering::SeqCst), sql);
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        if live > self.cache_capacity.load(Ordering::SeqCst) {
            let capacity = live * 2;
            conn.set_prepared_statement_cache_capacity(capacity);
            self.cache_capacity.store(capacity, Ordering::SeqCst);
            debug!("SqliteStore: statement cache grown to {}", capacity);
        }
        debug!("SqliteStore: prepared #{}: {}", stmt.id(), sql);
        Ok(stmt)
    }

    fn release(&self, stmt: &Statement) {
        let released = self
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if released.is_err() {
            warn!("SqliteStore: release of #{} with no live statements", stmt.id());
        }
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>, SQLError> {
        let conn = self.lock()?;
        conn.execute_batch("BEGIN")
            .map_err(|e| SQLError::Transaction(e.to_string()))?;
        Ok(Box::new(SqliteTransaction { conn, done: false }))
    }
}

/// A transaction holding the store's connection lock until it finishes.
pub struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    done: bool,
}

impl SqliteTransaction<'_> {
    /// A failed COMMIT can leave the transaction open; `done` stays unset so
    /// that drop rolls it back.
    fn finish(&mut self, sql: &str) -> Result<(), SQLError> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| SQLError::Transaction(e.to_string()))?;
        self.done = true;
        Ok(())
    }
}

impl Executor for SqliteTransaction<'_> {
    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SQLError> {
        run_query(&self.conn, sql, params)
    }

    fn exec(&self, sql: &str, params: &[Value]) -> Result<ExecResult, SQLError> {
        run_exec(&self.conn, sql, params)
    }
}

impl Transaction for SqliteTransaction<'_> {
    fn commit(mut self: Box<Self>) -> Result<(), SQLError> {
        self.finish("COMMIT")
    }

    fn rollback(mut self: Box<Self>) -> Result<(), SQLError> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.done && !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!("SqliteTransaction: rollback on drop failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .exec(
                "CREATE TABLE item (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT, price REAL, seen DATETIME)",
                &[],
            )
            .unwrap();
        store
    }

    #[test]
    fn exec_reports_generated_id_and_affected_rows() {
        let store = store();
        let res = store
            .exec(
                "INSERT INTO item (name, price) VALUES (?, ?)",
                &[Value::Text("a".into()), Value::Real(1.5)],
            )
            .unwrap();
        assert_eq!(res.rows_affected, 1);
        assert_eq!(res.last_insert_id, 1);

        let res = store
            .exec("UPDATE item SET price = ? WHERE id = ?", &[Value::Real(2.0), Value::Integer(42)])
            .unwrap();
        assert_eq!(res.rows_affected, 0);
    }

    #[test]
    fn query_row_on_empty_result_is_no_rows() {
        let store = store();
        let err = store
            .query_row("SELECT id FROM item WHERE id = ?", &[Value::Integer(1)])
            .unwrap_err();
        assert!(matches!(err, SQLError::NoRows));
    }

    #[test]
    fn timestamps_are_stored_as_text() {
        let store = store();
        let ts = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 9)
            .unwrap();
        store
            .exec(
                "INSERT INTO item (name, seen) VALUES (?, ?)",
                &[Value::Null, Value::Timestamp(ts)],
            )
            .unwrap();
        let row = store.query_row("SELECT name, seen FROM item", &[]).unwrap();
        assert_eq!(row.value(0), Some(&Value::Null));
        assert_eq!(row.get_str("seen"), Some("2024-02-29 13:05:09"));
    }

    #[test]
    fn prepare_validates_and_release_balances() {
        let store = store();
        let stmt = store.prepare("SELECT name FROM item WHERE id = ?").unwrap();
        assert_eq!(store.prepared_count(), 1);
        assert!(store.prepare("SELECT nope FROM missing").is_err());
        assert_eq!(store.prepared_count(), 1);

        store.exec("INSERT INTO item (name) VALUES ('x')", &[]).unwrap();
        let rows = store.query_stmt(&stmt, &[Value::Integer(1)]).unwrap();
        assert_eq!(rows[0].get_str("name"), Some("x"));

        store.release(&stmt);
        assert_eq!(store.prepared_count(), 0);
    }

    #[test]
    fn dropped_transaction_rolls_back() {
        let store = store();
        {
            let tx = store.begin().unwrap();
            tx.exec("INSERT INTO item (name) VALUES ('gone')", &[]).unwrap();
        }
        assert!(store.query("SELECT id FROM item", &[]).unwrap().is_empty());

        let tx = store.begin().unwrap();
        tx.exec("INSERT INTO item (name) VALUES ('kept')", &[]).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.query("SELECT id FROM item", &[]).unwrap().len(), 1);
    }

    #[test]
    fn explicit_rollback_discards_writes() {
        let store = store();
        let tx = store.begin().unwrap();
        tx.exec("INSERT INTO item (name) VALUES ('x')", &[]).unwrap();
        tx.rollback().unwrap();
        assert!(store.query("SELECT id FROM item", &[]).unwrap().is_empty());
    }

    #[test]
    fn open_on_disk_applies_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        let store = SqliteStore::open_with_config(&config).unwrap();
        let row = store.query_row("PRAGMA foreign_keys", &[]).unwrap();
        assert_eq!(row.value(0), Some(&Value::Integer(1)));
        assert!(dir.path().join("data.sqlite").exists());
    }

    #[test]
    fn failed_commit_is_rolled_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.exec("PRAGMA foreign_keys = ON", &[]).unwrap();
        store
            .exec("CREATE TABLE parent (id INTEGER PRIMARY KEY)", &[])
            .unwrap();
        store
            .exec(
                "CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER \
                 REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED)",
                &[],
            )
            .unwrap();

        let tx = store.begin().unwrap();
        tx.exec("INSERT INTO child (id, parent_id) VALUES (1, 99)", &[])
            .unwrap();
        assert!(matches!(tx.commit(), Err(SQLError::Transaction(_))));

        let tx = store.begin().unwrap();
        assert!(tx.query("SELECT id FROM child", &[]).unwrap().is_empty());
        tx.rollback().unwrap();
    }

    #[test]
    fn invalid_utf8_text_comes_back_as_blob() {
        let store = store();
        let row = store
            .query_row("SELECT CAST(x'ff61' AS TEXT) AS t", &[])
            .unwrap();
        assert_eq!(row.value(0), Some(&Value::Blob(vec![0xff, 0x61])));
    }

    #[test]
    fn statement_cache_grows_with_live_handles() {
        let store = store();
        let handles: Vec<_> = (0..DEFAULT_STATEMENT_CACHE + 1)
            .map(|i| store.prepare(&format!("SELECT {i} FROM item")).unwrap())
            .collect();
        assert_eq!(store.prepared_count(), handles.len());
        assert!(store.statement_cache_capacity() >= handles.len());
        for stmt in &handles {
            store.release(stmt);
        }
        assert_eq!(store.prepared_count(), 0);
    }
}
