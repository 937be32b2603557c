use tracing::debug;
use treeorm_sql::{Executor, SQLStore};

use crate::error::OrmError;
use crate::model::{Entity, Key};
use crate::txn::Scope;

/// Delete the aggregate stored under `key`, children first. Returns the
/// number of root rows removed (0 when nothing was stored).
pub(crate) fn delete(entity: &Entity, store: &dyn SQLStore, key: &Key) -> Result<u64, OrmError> {
    let scope = Scope::open(store, entity.has_children())?;
    let result = delete_tree(entity, &scope, key);
    let removed = scope.finish(result)?;
    debug!("deleted {} {}: {} root row(s)", entity.name(), key, removed);
    Ok(removed)
}

fn delete_tree(entity: &Entity, exec: &dyn Executor, key: &Key) -> Result<u64, OrmError> {
    let params = [key.to_value()];
    for (table, _) in entity.child_paths().into_iter().rev() {
        let stmts = table.statements()?;
        if let Some(stmt) = &stmts.delete {
            let result = exec.exec_stmt(stmt, &params)?;
            debug!("{}: removed {} row(s)", table.name(), result.rows_affected);
        }
    }
    let stmts = entity.root().statements()?;
    Ok(exec.exec_stmt(&stmts.remove, &params)?.rows_affected)
}
