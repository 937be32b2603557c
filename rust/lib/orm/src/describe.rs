//! Declarative record descriptions.
//!
//! A persisted type implements [`Record`] and lists its columns and nested
//! associations on a [`TableDef`]. Each entry carries typed accessors, so the
//! engine reads and writes record fields without runtime reflection:
//!
//! ```ignore
//! impl Record for Order {
//!     fn describe(t: &mut TableDef<Self>) {
//!         t.field("id", "id,pk", |o| &o.id, |o| &mut o.id);
//!         t.field("total", "total", |o| &o.total, |o| &mut o.total);
//!         t.many("items", "line_item", |o| &o.items, |o| &mut o.items);
//!     }
//! }
//! ```

use std::any::{Any, TypeId, type_name};
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

use treeorm_sql::Value;

use crate::convert::{NativeType, Scalar};
use crate::error::OrmError;
use crate::model::Cardinality;

/// Trait implemented by every type stored by the engine, root or child.
pub trait Record: Any + Default + Send {
    /// Declare columns (in column order) and child associations.
    fn describe(table: &mut TableDef<Self>);

    /// Called before the record is saved. An error aborts the save before
    /// any statement runs.
    fn before_save(&mut self) -> Result<(), OrmError> {
        Ok(())
    }

    /// Called on every instance the engine creates.
    fn on_init(&mut self) {}
}

/// Typed read/write access to one column of a row.
pub trait Column: Send + Sync {
    fn read(&self, row: &dyn Any) -> Result<Value, OrmError>;

    /// Coerce `value` into the field's native type and store it.
    fn write(&self, row: &mut dyn Any, value: &Value) -> Result<(), OrmError>;
}

/// Typed access to the child container held by a parent row.
pub trait Association: Send + Sync {
    fn cardinality(&self) -> Cardinality;

    /// Child rows currently held by `parent`.
    fn rows<'a>(&self, parent: &'a dyn Any) -> Result<Vec<&'a dyn Any>, OrmError>;

    fn rows_mut<'a>(&self, parent: &'a mut dyn Any) -> Result<Vec<&'a mut dyn Any>, OrmError>;

    /// Empty the container.
    fn clear(&self, parent: &mut dyn Any) -> Result<(), OrmError>;

    /// A fresh, initialised child row.
    fn new_row(&self) -> Box<dyn Any>;

    /// Add a loaded child row to the container; `key` is the child's primary key.
    fn attach(&self, parent: &mut dyn Any, row: Box<dyn Any>, key: &Value) -> Result<(), OrmError>;

    /// Re-index the container after child keys changed. Only keyed
    /// containers depend on the key.
    fn rekey(&self, _parent: &mut dyn Any, _key: &dyn Column) -> Result<(), OrmError> {
        Ok(())
    }
}

fn downcast<T: Any>(row: &dyn Any) -> Result<&T, OrmError> {
    row.downcast_ref::<T>()
        .ok_or_else(|| OrmError::Mismatch(format!("expected {}", type_name::<T>())))
}

fn downcast_mut<T: Any>(row: &mut dyn Any) -> Result<&mut T, OrmError> {
    row.downcast_mut::<T>()
        .ok_or_else(|| OrmError::Mismatch(format!("expected {}", type_name::<T>())))
}

fn unbox<T: Any>(row: Box<dyn Any>) -> Result<T, OrmError> {
    row.downcast::<T>()
        .map(|b| *b)
        .map_err(|_| OrmError::Mismatch(format!("expected {}", type_name::<T>())))
}

pub(crate) fn new_record<T: Record>() -> T {
    let mut record = T::default();
    record.on_init();
    record
}

struct FieldAccess<R, V> {
    get: fn(&R) -> &V,
    get_mut: fn(&mut R) -> &mut V,
}

impl<R: Record, V: Scalar> Column for FieldAccess<R, V> {
    fn read(&self, row: &dyn Any) -> Result<Value, OrmError> {
        Ok((self.get)(downcast::<R>(row)?).to_value())
    }

    fn write(&self, row: &mut dyn Any, value: &Value) -> Result<(), OrmError> {
        *(self.get_mut)(downcast_mut::<R>(row)?) = V::from_value(value)?;
        Ok(())
    }
}

struct SingleAccess<P, C> {
    get: fn(&P) -> &Option<C>,
    get_mut: fn(&mut P) -> &mut Option<C>,
}

impl<P: Record, C: Record> Association for SingleAccess<P, C> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::Single
    }

    fn rows<'a>(&self, parent: &'a dyn Any) -> Result<Vec<&'a dyn Any>, OrmError> {
        let slot = (self.get)(downcast::<P>(parent)?);
        Ok(slot.iter().map(|c| c as &dyn Any).collect())
    }

    fn rows_mut<'a>(&self, parent: &'a mut dyn Any) -> Result<Vec<&'a mut dyn Any>, OrmError> {
        let slot = (self.get_mut)(downcast_mut::<P>(parent)?);
        Ok(slot.iter_mut().map(|c| c as &mut dyn Any).collect())
    }

    fn clear(&self, parent: &mut dyn Any) -> Result<(), OrmError> {
        *(self.get_mut)(downcast_mut::<P>(parent)?) = None;
        Ok(())
    }

    fn new_row(&self) -> Box<dyn Any> {
        Box::new(new_record::<C>())
    }

    fn attach(
        &self,
        parent: &mut dyn Any,
        row: Box<dyn Any>,
        _key: &Value,
    ) -> Result<(), OrmError> {
        let child = unbox::<C>(row)?;
        *(self.get_mut)(downcast_mut::<P>(parent)?) = Some(child);
        Ok(())
    }
}

struct ManyAccess<P, C> {
    get: fn(&P) -> &Vec<C>,
    get_mut: fn(&mut P) -> &mut Vec<C>,
}

impl<P: Record, C: Record> Association for ManyAccess<P, C> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::Ordered
    }

    fn rows<'a>(&self, parent: &'a dyn Any) -> Result<Vec<&'a dyn Any>, OrmError> {
        let items = (self.get)(downcast::<P>(parent)?);
        Ok(items.iter().map(|c| c as &dyn Any).collect())
    }

    fn rows_mut<'a>(&self, parent: &'a mut dyn Any) -> Result<Vec<&'a mut dyn Any>, OrmError> {
        let items = (self.get_mut)(downcast_mut::<P>(parent)?);
        Ok(items.iter_mut().map(|c| c as &mut dyn Any).collect())
    }

    fn clear(&self, parent: &mut dyn Any) -> Result<(), OrmError> {
        (self.get_mut)(downcast_mut::<P>(parent)?).clear();
        Ok(())
    }

    fn new_row(&self) -> Box<dyn Any> {
        Box::new(new_record::<C>())
    }

    fn attach(
        &self,
        parent: &mut dyn Any,
        row: Box<dyn Any>,
        _key: &Value,
    ) -> Result<(), OrmError> {
        let child = unbox::<C>(row)?;
        (self.get_mut)(downcast_mut::<P>(parent)?).push(child);
        Ok(())
    }
}

struct KeyedAccess<P, K, C> {
    get: fn(&P) -> &BTreeMap<K, C>,
    get_mut: fn(&mut P) -> &mut BTreeMap<K, C>,
}

impl<P: Record, K: Scalar + Ord, C: Record> Association for KeyedAccess<P, K, C> {
    fn cardinality(&self) -> Cardinality {
        Cardinality::Keyed
    }

    fn rows<'a>(&self, parent: &'a dyn Any) -> Result<Vec<&'a dyn Any>, OrmError> {
        let map = (self.get)(downcast::<P>(parent)?);
        Ok(map.values().map(|c| c as &dyn Any).collect())
    }

    fn rows_mut<'a>(&self, parent: &'a mut dyn Any) -> Result<Vec<&'a mut dyn Any>, OrmError> {
        let map = (self.get_mut)(downcast_mut::<P>(parent)?);
        Ok(map.values_mut().map(|c| c as &mut dyn Any).collect())
    }

    fn clear(&self, parent: &mut dyn Any) -> Result<(), OrmError> {
        (self.get_mut)(downcast_mut::<P>(parent)?).clear();
        Ok(())
    }

    fn new_row(&self) -> Box<dyn Any> {
        Box::new(new_record::<C>())
    }

    fn attach(&self, parent: &mut dyn Any, row: Box<dyn Any>, key: &Value) -> Result<(), OrmError> {
        let child = unbox::<C>(row)?;
        let key = K::from_value(key)?;
        (self.get_mut)(downcast_mut::<P>(parent)?).insert(key, child);
        Ok(())
    }

    fn rekey(&self, parent: &mut dyn Any, key: &dyn Column) -> Result<(), OrmError> {
        let map = (self.get_mut)(downcast_mut::<P>(parent)?);
        let mut rekeyed = BTreeMap::new();
        for (_, child) in std::mem::take(map) {
            let k = K::from_value(&key.read(&child)?)?;
            rekeyed.insert(k, child);
        }
        *map = rekeyed;
        Ok(())
    }
}

/// One described scalar field.
pub struct FieldDescriptor {
    /// In-memory field identifier.
    pub name: &'static str,
    /// `column[,modifier]*`, e.g. `"order_id,fk,index"`.
    pub tag: &'static str,
    pub native: NativeType,
    pub nullable: bool,
    pub(crate) access: Arc<dyn Column>,
}

/// One described nested association.
pub struct ChildDescriptor {
    pub name: &'static str,
    pub table_name: &'static str,
    pub cardinality: Cardinality,
    pub(crate) describe: fn() -> RecordDescriptor,
    pub(crate) access: Arc<dyn Association>,
}

/// Ordered description of a record type: what the registry consumes.
pub struct RecordDescriptor {
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub fields: Vec<FieldDescriptor>,
    pub children: Vec<ChildDescriptor>,
}

impl RecordDescriptor {
    pub fn of<T: Record>() -> Self {
        let mut def = TableDef::<T> {
            desc: RecordDescriptor {
                type_id: TypeId::of::<T>(),
                type_name: type_name::<T>(),
                fields: Vec::new(),
                children: Vec::new(),
            },
            _row: PhantomData,
        };
        T::describe(&mut def);
        def.desc
    }
}

/// Builder handed to [`Record::describe`].
pub struct TableDef<T> {
    desc: RecordDescriptor,
    _row: PhantomData<fn() -> T>,
}

impl<T: Record> TableDef<T> {
    /// Map a scalar field. `tag` is the column name followed by optional
    /// modifiers: `pk`, `fk`, `index`, `null`, `token`, `required`, `:N`.
    pub fn field<V: Scalar>(
        &mut self,
        name: &'static str,
        tag: &'static str,
        get: fn(&T) -> &V,
        get_mut: fn(&mut T) -> &mut V,
    ) -> &mut Self {
        self.desc.fields.push(FieldDescriptor {
            name,
            tag,
            native: V::NATIVE,
            nullable: V::NULLABLE,
            access: Arc::new(FieldAccess { get, get_mut }),
        });
        self
    }

    /// Map an optional single child record stored in `table`.
    pub fn one<C: Record>(
        &mut self,
        name: &'static str,
        table: &'static str,
        get: fn(&T) -> &Option<C>,
        get_mut: fn(&mut T) -> &mut Option<C>,
    ) -> &mut Self {
        self.child::<C>(name, table, Cardinality::Single, Arc::new(SingleAccess { get, get_mut }))
    }

    /// Map an ordered collection of child records stored in `table`.
    pub fn many<C: Record>(
        &mut self,
        name: &'static str,
        table: &'static str,
        get: fn(&T) -> &Vec<C>,
        get_mut: fn(&mut T) -> &mut Vec<C>,
    ) -> &mut Self {
        self.child::<C>(name, table, Cardinality::Ordered, Arc::new(ManyAccess { get, get_mut }))
    }

    /// Map child records kept in a map keyed by the child's primary key.
    pub fn keyed<K: Scalar + Ord, C: Record>(
        &mut self,
        name: &'static str,
        table: &'static str,
        get: fn(&T) -> &BTreeMap<K, C>,
        get_mut: fn(&mut T) -> &mut BTreeMap<K, C>,
    ) -> &mut Self {
        self.child::<C>(name, table, Cardinality::Keyed, Arc::new(KeyedAccess { get, get_mut }))
    }

    fn child<C: Record>(
        &mut self,
        name: &'static str,
        table_name: &'static str,
        cardinality: Cardinality,
        access: Arc<dyn Association>,
    ) -> &mut Self {
        self.desc.children.push(ChildDescriptor {
            name,
            table_name,
            cardinality,
            describe: RecordDescriptor::of::<C>,
            access,
        });
        self
    }
}
