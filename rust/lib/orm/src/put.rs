use std::any::Any;
use std::cmp::Ordering;

use tracing::{debug, warn};
use treeorm_sql::{Executor, SQLStore, Value};

use crate::convert::to_i64;
use crate::error::OrmError;
use crate::model::{Entity, Key, Table};
use crate::statements::{insert_columns, update_columns};
use crate::txn::Scope;

/// Row counts of one `put`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PutSummary {
    pub inserted: usize,
    pub updated: usize,
    /// Stored rows whose columns already matched.
    pub skipped: usize,
    /// Stored rows no longer present in memory.
    pub removed: usize,
    /// Rows carrying a generated key the store did not know; they are
    /// inserted again under a new key.
    pub missed: usize,
}

impl PutSummary {
    pub fn changed(&self) -> bool {
        self.inserted + self.updated + self.removed > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowStatus {
    Read,
    Updated,
    Skipped,
    Deleted,
}

#[derive(Debug)]
struct RowEntry {
    table_no: usize,
    key: Key,
    status: RowStatus,
}

impl RowEntry {
    fn cmp_key(&self, table_no: usize, key: &Key) -> Ordering {
        self.table_no.cmp(&table_no).then_with(|| self.key.cmp(key))
    }
}

/// Keys of every stored row of one aggregate, sorted by `(table_no, key)`.
#[derive(Debug, Default)]
struct Snapshot {
    rows: Vec<RowEntry>,
    /// Stored token, when the root row exists.
    token: Option<i64>,
}

impl Snapshot {
    fn load(entity: &Entity, exec: &dyn Executor, key: &Key) -> Result<Snapshot, OrmError> {
        let root = entity.root();
        let params = [key.to_value()];
        let Some(info) = exec
            .query_stmt(&root.statements()?.info, &params)?
            .into_iter()
            .next()
        else {
            return Ok(Snapshot::default());
        };

        let mut rows = vec![RowEntry {
            table_no: root.table_no(),
            key: Key::from_value(info.value(0).unwrap_or(&Value::Null))?,
            status: RowStatus::Read,
        }];
        let token = to_i64(info.value(1).unwrap_or(&Value::Null))?;

        for (table, _) in entity.child_paths() {
            for row in exec.query_stmt(&table.statements()?.info, &params)? {
                rows.push(RowEntry {
                    table_no: table.table_no(),
                    key: Key::from_value(row.value(0).unwrap_or(&Value::Null))?,
                    status: RowStatus::Read,
                });
            }
        }
        rows.sort_by(|a, b| a.cmp_key(b.table_no, &b.key));
        Ok(Snapshot {
            rows,
            token: Some(token),
        })
    }

    fn find_mut(&mut self, table_no: usize, key: &Key) -> Option<&mut RowEntry> {
        match self.rows.binary_search_by(|e| e.cmp_key(table_no, key)) {
            Ok(idx) => Some(&mut self.rows[idx]),
            Err(_) => None,
        }
    }
}

/// Save the aggregate held by `record`.
///
/// Rows found in the stored snapshot are updated, new rows inserted and
/// stored rows missing from memory removed. Generated keys, foreign keys and
/// the bumped token are written back into `record`.
pub(crate) fn put(
    entity: &Entity,
    store: &dyn SQLStore,
    record: &mut dyn Any,
) -> Result<PutSummary, OrmError> {
    let key = entity.root().key_of(record)?;
    let transactional = entity.has_children() || entity.token().is_some();
    let scope = Scope::open(store, transactional)?;
    let result = save(entity, &scope, record, &key);
    let summary = scope.finish(result)?;
    debug!(
        "put {} {}: {} inserted, {} updated, {} skipped, {} removed, {} missed",
        entity.name(),
        key,
        summary.inserted,
        summary.updated,
        summary.skipped,
        summary.removed,
        summary.missed
    );
    Ok(summary)
}

fn save(
    entity: &Entity,
    exec: &dyn Executor,
    record: &mut dyn Any,
    key: &Key,
) -> Result<PutSummary, OrmError> {
    let mut snapshot = if key.is_new() {
        Snapshot::default()
    } else {
        Snapshot::load(entity, exec, key)?
    };

    if let (Some(token), Some(stored)) = (entity.token(), snapshot.token) {
        let held = to_i64(&token.value_of(record)?)?;
        if held != stored {
            return Err(OrmError::Conflict(format!(
                "{} {}: token {} is stale, stored token is {}",
                entity.name(),
                key,
                held,
                stored
            )));
        }
    }

    let mut summary = PutSummary::default();
    let root = entity.root();
    store_row(root, exec, record, &mut snapshot, &mut summary)?;
    store_children(root, exec, record, &mut snapshot, &mut summary)?;
    reconcile(entity, exec, &mut snapshot, &mut summary)?;

    if let (Some(token), Some(stored)) = (entity.token(), snapshot.token) {
        if summary.changed() {
            bump_token(entity, exec, record, stored)?;
            token.assign(record, &Value::Integer(stored + 1))?;
        }
    }
    Ok(summary)
}

fn values(table: &Table, row: &dyn Any, columns: &[usize]) -> Result<Vec<Value>, OrmError> {
    columns
        .iter()
        .map(|&i| table.fields()[i].value_of(row))
        .collect()
}

fn store_row(
    table: &Table,
    exec: &dyn Executor,
    row: &mut dyn Any,
    snapshot: &mut Snapshot,
    summary: &mut PutSummary,
) -> Result<(), OrmError> {
    let stmts = table.statements()?;
    let key = table.key_of(row)?;

    if let Some(entry) = snapshot.find_mut(table.table_no(), &key) {
        let Some(update) = &stmts.update else {
            entry.status = RowStatus::Skipped;
            summary.skipped += 1;
            return Ok(());
        };
        let changed = values(table, row, &update_columns(table))?;
        let mut params = Vec::with_capacity(changed.len() * 2 + 1);
        params.extend(changed.iter().cloned());
        params.push(key.to_value());
        params.extend(changed);

        let result = exec.exec_stmt(update, &params)?;
        match result.rows_affected {
            0 => {
                entry.status = RowStatus::Skipped;
                summary.skipped += 1;
            }
            1 => {
                entry.status = RowStatus::Updated;
                summary.updated += 1;
            }
            n => {
                return Err(OrmError::Consistency(format!(
                    "{} {}: update touched {} rows",
                    table.name(),
                    key,
                    n
                )));
            }
        }
        return Ok(());
    }

    if table.is_serial_key() && !key.is_new() {
        warn!("{} {}: row is not stored, inserting it under a new key", table.name(), key);
        summary.missed += 1;
    }
    let params = values(table, row, &insert_columns(table))?;
    let result = exec.exec_stmt(&stmts.insert, &params)?;
    if result.rows_affected != 1 {
        return Err(OrmError::Consistency(format!(
            "{}: insert touched {} rows",
            table.name(),
            result.rows_affected
        )));
    }
    if table.is_serial_key() {
        table
            .primary_key()
            .assign(row, &Value::Integer(result.last_insert_id))?;
    }
    summary.inserted += 1;
    Ok(())
}

fn store_children(
    table: &Table,
    exec: &dyn Executor,
    row: &mut dyn Any,
    snapshot: &mut Snapshot,
    summary: &mut PutSummary,
) -> Result<(), OrmError> {
    let parent_key = table.primary_key().value_of(row)?;
    for child in table.children() {
        let (Some(assoc), Some(fk)) = (child.association(), child.parent_key()) else {
            continue;
        };
        for child_row in assoc.rows_mut(row)? {
            fk.assign(child_row, &parent_key)?;
            store_row(child, exec, child_row, snapshot, summary)?;
            store_children(child, exec, child_row, snapshot, summary)?;
        }
        assoc.rekey(row, child.primary_key().access.as_ref())?;
    }
    Ok(())
}

/// Remove stored rows that were not visited, deepest tables first.
fn reconcile(
    entity: &Entity,
    exec: &dyn Executor,
    snapshot: &mut Snapshot,
    summary: &mut PutSummary,
) -> Result<(), OrmError> {
    let tables = entity.tables();
    for entry in snapshot.rows.iter_mut().rev() {
        if entry.status != RowStatus::Read {
            continue;
        }
        let Some(table) = tables.get(entry.table_no) else {
            continue;
        };
        let result = exec.exec_stmt(&table.statements()?.remove, &[entry.key.to_value()])?;
        match result.rows_affected {
            0 => warn!("{} {}: row vanished before removal", table.name(), entry.key),
            1 => summary.removed += 1,
            n => {
                return Err(OrmError::Consistency(format!(
                    "{} {}: remove touched {} rows",
                    table.name(),
                    entry.key,
                    n
                )));
            }
        }
        entry.status = RowStatus::Deleted;
    }
    Ok(())
}

fn bump_token(
    entity: &Entity,
    exec: &dyn Executor,
    record: &dyn Any,
    stored: i64,
) -> Result<(), OrmError> {
    let root = entity.root();
    let stmts = root.statements()?;
    let Some(bump) = &stmts.bump else {
        return Ok(());
    };
    let key = root.primary_key().value_of(record)?;
    let result = exec.exec_stmt(bump, &[key, Value::Integer(stored)])?;
    if result.rows_affected == 0 {
        return Err(OrmError::Conflict(format!(
            "{}: token {} changed during save",
            entity.name(),
            stored
        )));
    }
    Ok(())
}
