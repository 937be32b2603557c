use std::any::Any;
use std::collections::HashMap;

use tracing::warn;
use treeorm_sql::{Executor, Row, SQLError, Value};

use crate::error::OrmError;
use crate::model::{Entity, Key, Table};

/// Copy the columns of `row` into `target`, positionally.
pub(crate) fn scan(table: &Table, target: &mut dyn Any, row: &Row) -> Result<(), OrmError> {
    for (i, field) in table.fields().iter().enumerate() {
        let value = row.value(i).ok_or_else(|| {
            OrmError::Mismatch(format!(
                "{}: result has {} columns, expected {}",
                table.name(),
                row.len(),
                table.fields().len()
            ))
        })?;
        field.assign(target, value)?;
    }
    Ok(())
}

/// Load the aggregate stored under `key` into `record`.
pub(crate) fn get(
    entity: &Entity,
    exec: &dyn Executor,
    record: &mut dyn Any,
    key: &Key,
) -> Result<(), OrmError> {
    let root = entity.root();
    let stmts = root.statements()?;
    let row = exec
        .query_stmt(&stmts.select, &[key.to_value()])?
        .into_iter()
        .next()
        .ok_or(SQLError::NoRows)?;
    scan(root, record, &row)?;
    load_children(entity, exec, record)
}

/// Populate every child container of an already scanned root row.
pub(crate) fn load_children(
    entity: &Entity,
    exec: &dyn Executor,
    record: &mut dyn Any,
) -> Result<(), OrmError> {
    if !entity.has_children() {
        return Ok(());
    }
    let root_key = entity.root().key_of(record)?.to_value();
    fill(exec, entity.root(), &mut [record], &root_key)
}

/// Load the rows of every child table of `table` for all of `parents` at
/// once. Each child table is read with a single query filtered on the root
/// key, and its rows are routed to parents by foreign key.
fn fill(
    exec: &dyn Executor,
    table: &Table,
    parents: &mut [&mut dyn Any],
    root_key: &Value,
) -> Result<(), OrmError> {
    let mut index = HashMap::with_capacity(parents.len());
    for (i, parent) in parents.iter().enumerate() {
        index.insert(table.key_of(&**parent)?, i);
    }

    for child in table.children() {
        let (Some(assoc), Some(parent_key)) = (child.association(), child.parent_key()) else {
            continue;
        };
        for parent in parents.iter_mut() {
            assoc.clear(&mut **parent)?;
        }
        if parents.is_empty() {
            continue;
        }

        let stmts = child.statements()?;
        let rows = exec.query_stmt(&stmts.select, std::slice::from_ref(root_key))?;
        for row in &rows {
            let mut loaded = assoc.new_row();
            scan(child, &mut *loaded, row)?;
            let fk = Key::from_value(&parent_key.value_of(&*loaded)?)?;
            match index.get(&fk) {
                Some(&i) => {
                    let pk = child.primary_key().value_of(&*loaded)?;
                    assoc.attach(&mut *parents[i], loaded, &pk)?;
                }
                None => warn!("{}: row with unknown parent {} skipped", child.name(), fk),
            }
        }

        let mut rows = Vec::new();
        for parent in parents.iter_mut() {
            rows.extend(assoc.rows_mut(&mut **parent)?);
        }
        fill(exec, child, &mut rows, root_key)?;
    }
    Ok(())
}
