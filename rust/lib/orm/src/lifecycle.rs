use std::sync::Arc;

use tracing::{debug, warn};
use treeorm_sql::{SQLStore, Statement};

use crate::error::OrmError;
use crate::model::{Entity, Table};
use crate::statements;

/// Prepared statements of one table, valid for the store they were bound to.
#[derive(Debug, Clone)]
pub struct TableStatements {
    pub info: Statement,
    pub select: Statement,
    pub insert: Statement,
    pub update: Option<Statement>,
    pub remove: Statement,
    /// Subtree delete by root key; the root's own delete is `remove`.
    pub delete: Option<Statement>,
    pub bump: Option<Statement>,
}

impl TableStatements {
    fn all(&self) -> impl Iterator<Item = &Statement> {
        [&self.info, &self.select, &self.insert, &self.remove]
            .into_iter()
            .chain(self.update.iter())
            .chain(self.delete.iter())
            .chain(self.bump.iter())
    }

    fn release(&self, store: &dyn SQLStore) {
        for stmt in self.all() {
            store.release(stmt);
        }
    }
}

/// Prepares statements one by one and releases all of them unless the
/// staging is committed.
struct Staging<'a> {
    store: &'a dyn SQLStore,
    prepared: Vec<Statement>,
}

impl Staging<'_> {
    fn prepare(&mut self, sql: &str) -> Result<Statement, OrmError> {
        let stmt = self.store.prepare(sql)?;
        self.prepared.push(stmt.clone());
        Ok(stmt)
    }

    fn commit(mut self) {
        self.prepared.clear();
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        for stmt in &self.prepared {
            self.store.release(stmt);
        }
    }
}

fn compile(
    staging: &mut Staging<'_>,
    table: &Table,
    path: Option<&[&Table]>,
) -> Result<TableStatements, OrmError> {
    let set = match path {
        None => TableStatements {
            info: staging.prepare(&statements::root_info(table))?,
            select: staging.prepare(&statements::root_select(table))?,
            insert: staging.prepare(&statements::insert(table))?,
            update: statements::update(table)
                .map(|sql| staging.prepare(&sql))
                .transpose()?,
            remove: staging.prepare(&statements::remove(table))?,
            delete: None,
            bump: statements::token_bump(table)
                .map(|sql| staging.prepare(&sql))
                .transpose()?,
        },
        Some(path) => TableStatements {
            info: staging.prepare(&statements::child_info(table, path))?,
            select: staging.prepare(&statements::child_select(table, path))?,
            insert: staging.prepare(&statements::insert(table))?,
            update: statements::update(table)
                .map(|sql| staging.prepare(&sql))
                .transpose()?,
            remove: staging.prepare(&statements::remove(table))?,
            delete: Some(staging.prepare(&statements::delete_subtree(table, path))?),
            bump: None,
        },
    };
    Ok(set)
}

/// Statements of every table of one entity, prepared but not yet installed.
///
/// Dropping a `Binding` releases everything it prepared.
pub struct Binding<'a> {
    entity: &'a Entity,
    staging: Staging<'a>,
    sets: Vec<(&'a Table, TableStatements)>,
}

impl Binding<'_> {
    /// Swap the prepared sets into their tables. Sets that were installed
    /// before are released against `previous`, the store they came from.
    pub fn install(self, previous: Option<&dyn SQLStore>) {
        let Binding {
            entity,
            staging,
            sets,
        } = self;
        staging.commit();

        let mut replaced = Vec::new();
        for (table, set) in sets {
            // The slot only ever holds a whole set, so a poisoned lock still
            // guards a consistent value.
            let mut slot = table
                .desc
                .statements
                .write()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(old) = slot.replace(Arc::new(set)) {
                replaced.push(old);
            }
        }
        match previous {
            Some(store) => replaced.iter().for_each(|old| old.release(store)),
            None if !replaced.is_empty() => {
                warn!("{}: replaced statements of an unknown store", entity.name())
            }
            None => {}
        }
        debug!("bound statements for entity {}", entity.name());
    }
}

/// Prepare the statements of every table of `entity` against `store`
/// without touching the current binding.
///
/// When any statement fails to prepare, the statements prepared so far are
/// released and the error is returned.
pub fn prepare<'a>(
    entity: &'a Entity,
    store: &'a dyn SQLStore,
) -> Result<Binding<'a>, OrmError> {
    let mut staging = Staging {
        store,
        prepared: Vec::new(),
    };

    let mut sets = Vec::new();
    sets.push((entity.root(), compile(&mut staging, entity.root(), None)?));
    for (table, path) in entity.child_paths() {
        let set = compile(&mut staging, table, Some(path.as_slice()))?;
        sets.push((table, set));
    }
    Ok(Binding {
        entity,
        staging,
        sets,
    })
}

/// Prepare and install the statements of `entity`, replacing a binding made
/// against the same `store`.
///
/// Either every table gets a new set or none does: on failure the previous
/// binding stays in place.
pub fn bind(entity: &Entity, store: &dyn SQLStore) -> Result<(), OrmError> {
    prepare(entity, store)?.install(Some(store));
    Ok(())
}

/// Release the statements of every table of `entity`.
pub fn unbind(entity: &Entity, store: &dyn SQLStore) {
    for table in entity.tables() {
        match table.desc.statements.write() {
            Ok(mut slot) => {
                if let Some(old) = slot.take() {
                    old.release(store);
                }
            }
            Err(e) => warn!("cannot unbind {}: lock poisoned: {}", table.name(), e),
        }
    }
}
