use std::sync::Arc;

use tracing::debug;
use treeorm_sql::{Executor, SQLStore, SqliteStore, StoreConfig};

use crate::delete;
use crate::describe::{Record, new_record};
use crate::error::OrmError;
use crate::fetch;
use crate::lifecycle::{self, bind, unbind};
use crate::model::{Entity, Key};
use crate::put::{self, PutSummary};
use crate::query::Query;
use crate::registry::Registry;
use crate::schema::entity_schema;
use crate::txn::Scope;

/// Entry point for applications: owns the registry and the attached store.
///
/// Register every record type first, then [`attach`](Manager::attach) a
/// store. Attaching prepares the statements of every registered entity;
/// reads and writes before that fail with [`OrmError::NotBound`].
#[derive(Default)]
pub struct Manager {
    registry: Registry,
    store: Option<Arc<dyn SQLStore>>,
}

impl Manager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the SQLite database described by `config` and attach it.
    pub fn open(config: &StoreConfig) -> Result<Self, OrmError> {
        let store = SqliteStore::open_with_config(config)?;
        let mut manager = Self::new();
        manager.attach(Arc::new(store))?;
        Ok(manager)
    }

    pub fn register<T: Record>(&mut self, table_name: &str) -> Result<&Entity, OrmError> {
        self.registry.register::<T>(table_name)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn entity<T: Record>(&self) -> Result<&Entity, OrmError> {
        self.registry.entity::<T>()
    }

    /// Bind every registered entity to `store`, replacing any previous store.
    ///
    /// Every entity is prepared against `store` before anything is swapped
    /// in. On failure the previous store and its bindings stay in place.
    pub fn attach(&mut self, store: Arc<dyn SQLStore>) -> Result<(), OrmError> {
        let staged = self
            .registry
            .entities()
            .iter()
            .map(|entity| lifecycle::prepare(entity, store.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        for binding in staged {
            binding.install(self.store.as_deref());
        }
        debug!("attached store, {} entities bound", self.registry.len());
        self.store = Some(store);
        Ok(())
    }

    /// Release every prepared statement and drop the store.
    pub fn detach(&mut self) {
        if let Some(store) = self.store.take() {
            for entity in self.registry.entities() {
                unbind(entity, store.as_ref());
            }
        }
    }

    pub fn store(&self) -> Result<&dyn SQLStore, OrmError> {
        self.store
            .as_deref()
            .ok_or_else(|| OrmError::NotBound("no store attached".to_string()))
    }

    /// A fresh record with its init hook applied.
    pub fn new_record<T: Record>(&self) -> T {
        new_record::<T>()
    }

    /// Create the tables and indexes of `T` if missing, then bind it.
    pub fn create_tables<T: Record>(&self) -> Result<(), OrmError> {
        let entity = self.registry.entity::<T>()?;
        let store = self.store()?;
        let scope = Scope::open(store, true)?;
        let result = entity_schema(entity).iter().try_for_each(|schema| {
            schema
                .create_table_sql()
                .iter()
                .try_for_each(|sql| scope.exec(sql, &[]).map(|_| ()))
        });
        scope.finish(result.map_err(OrmError::from))?;
        bind(entity, store)
    }

    /// Load the aggregate stored under `key` into `record`.
    pub fn get<T: Record>(&self, record: &mut T, key: impl Into<Key>) -> Result<(), OrmError> {
        let entity = self.registry.entity::<T>()?;
        let scope = Scope::open(self.store()?, entity.has_children())?;
        let result = fetch::get(entity, &scope, record, &key.into());
        scope.finish(result)
    }

    /// Like [`get`](Manager::get), returning a new record.
    pub fn load<T: Record>(&self, key: impl Into<Key>) -> Result<T, OrmError> {
        let mut record = new_record::<T>();
        self.get(&mut record, key)?;
        Ok(record)
    }

    /// Save `record` and its children. Runs [`Record::before_save`] first.
    pub fn put<T: Record>(&self, record: &mut T) -> Result<PutSummary, OrmError> {
        let entity = self.registry.entity::<T>()?;
        let store = self.store()?;
        record.before_save()?;
        put::put(entity, store, record)
    }

    /// Delete the aggregate stored under `key`. Returns the number of root
    /// rows removed.
    pub fn delete<T: Record>(&self, key: impl Into<Key>) -> Result<u64, OrmError> {
        let entity = self.registry.entity::<T>()?;
        delete::delete(entity, self.store()?, &key.into())
    }

    pub fn query<T: Record>(&self) -> Result<Query<'_>, OrmError> {
        let entity = self.registry.entity::<T>()?;
        Ok(Query::new(entity, self.store()?))
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.detach();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Order};
    use std::path::PathBuf;

    #[test]
    fn operations_before_attach_are_not_bound() {
        let mut manager = Manager::new();
        manager.register::<Order>("orders").unwrap();
        let mut order = Order::default();
        assert!(matches!(manager.put(&mut order), Err(OrmError::NotBound(_))));
        assert!(matches!(manager.delete::<Order>(1), Err(OrmError::NotBound(_))));
        assert!(manager.query::<Order>().is_err());
    }

    #[test]
    fn unregistered_types_are_rejected() {
        let manager = Manager::new();
        assert!(matches!(
            manager.load::<Order>(1),
            Err(OrmError::NotRegistered(_))
        ));
    }

    #[test]
    fn create_tables_then_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            data_dir: Some(PathBuf::from(dir.path())),
            ..Default::default()
        };
        let mut manager = Manager::open(&config).unwrap();
        manager.register::<Order>("orders").unwrap();
        manager.create_tables::<Order>().unwrap();

        let mut order = fixtures::sample_order("ada");
        manager.put(&mut order).unwrap();
        let loaded: Order = manager.load(order.id).unwrap();
        assert_eq!(loaded, order);
        assert!(manager.load::<Order>(order.id + 1).unwrap_err().is_not_found());
    }

    #[test]
    fn before_save_failure_aborts_put() {
        let mut manager = Manager::new();
        manager.register::<Order>("orders").unwrap();
        let store = SqliteStore::open_in_memory().unwrap();
        fixtures::create_order_tables(&store);
        manager.attach(Arc::new(store)).unwrap();

        let mut order = fixtures::sample_order("");
        let err = manager.put(&mut order).unwrap_err();
        assert!(matches!(err, OrmError::Rejected(_)), "{err}");
        assert!(manager.query::<Order>().unwrap().ids().unwrap().is_empty());
    }

    #[test]
    fn attach_rebinds_and_detach_releases() {
        let mut manager = Manager::new();
        manager.register::<Order>("orders").unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        fixtures::create_order_tables(&store);
        manager.attach(store.clone()).unwrap();
        let bound = store.prepared_count();
        assert!(bound > 0);

        manager.attach(store.clone()).unwrap();
        assert_eq!(store.prepared_count(), bound);
        manager.detach();
        assert_eq!(store.prepared_count(), 0);
    }

    #[test]
    fn failed_attach_keeps_the_previous_store() {
        let mut manager = Manager::new();
        manager.register::<Order>("orders").unwrap();
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        fixtures::create_order_tables(&store);
        manager.attach(store.clone()).unwrap();
        let mut order = fixtures::sample_order("ada");
        manager.put(&mut order).unwrap();
        let bound = store.prepared_count();

        let empty = Arc::new(SqliteStore::open_in_memory().unwrap());
        assert!(manager.attach(empty.clone()).is_err());
        assert_eq!(empty.prepared_count(), 0);
        assert_eq!(store.prepared_count(), bound);

        let loaded: Order = manager.load(order.id).unwrap();
        assert_eq!(loaded, order);
    }

    #[test]
    fn attach_to_another_store_releases_against_the_old_one() {
        let mut manager = Manager::new();
        manager.register::<Order>("orders").unwrap();
        let first = Arc::new(SqliteStore::open_in_memory().unwrap());
        let second = Arc::new(SqliteStore::open_in_memory().unwrap());
        fixtures::create_order_tables(&first);
        fixtures::create_order_tables(&second);

        manager.attach(first.clone()).unwrap();
        let bound = first.prepared_count();
        manager.attach(second.clone()).unwrap();
        assert_eq!(first.prepared_count(), 0);
        assert_eq!(second.prepared_count(), bound);

        let mut order = fixtures::sample_order("bob");
        manager.put(&mut order).unwrap();
        assert_eq!(second.query("SELECT id FROM orders", &[]).unwrap().len(), 1);
        assert!(first.query("SELECT id FROM orders", &[]).unwrap().is_empty());
    }
}
