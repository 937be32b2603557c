use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, RwLock};

use treeorm_sql::Value;

use crate::convert::NativeType;
use crate::describe::{Association, Column};
use crate::error::OrmError;
use crate::lifecycle::TableStatements;

/// Storage-level column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Int32,
    Int64,
    Float,
    DateTime,
    String,
    Blob,
}

/// How a child table hangs off its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    /// At most one child row.
    Single,
    /// Ordered child rows.
    Ordered,
    /// Child rows indexed by their own primary key.
    Keyed,
}

/// Normalised primary-key value. Zero and the empty string mean "not yet
/// stored".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    Int(i64),
    Text(String),
}

impl Key {
    pub fn from_value(value: &Value) -> Result<Key, OrmError> {
        match value {
            Value::Integer(i) => Ok(Key::Int(*i)),
            Value::Text(s) => Ok(Key::Text(s.clone())),
            other => Err(OrmError::UnsupportedKey(format!(
                "cannot key rows by {} value",
                other.kind()
            ))),
        }
    }

    pub fn is_new(&self) -> bool {
        match self {
            Key::Int(i) => *i == 0,
            Key::Text(s) => s.is_empty(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(i) => Value::Integer(*i),
            Key::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(i) => write!(f, "{}", i),
            Key::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::Int(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::Int(value as i64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Text(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Text(value)
    }
}

/// One persisted scalar field of a table.
pub struct Field {
    pub(crate) name: String,
    pub(crate) column: String,
    pub(crate) data_type: DataType,
    pub(crate) native: NativeType,
    pub(crate) nullable: bool,
    pub(crate) precision: u16,
    pub(crate) is_index: bool,
    pub(crate) is_required: bool,
    pub(crate) access: Arc<dyn Column>,
}

impl Field {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn native(&self) -> NativeType {
        self.native
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    /// Declared length of text columns, 0 when unbounded.
    pub fn precision(&self) -> u16 {
        self.precision
    }

    pub fn is_index(&self) -> bool {
        self.is_index
    }

    pub fn is_required(&self) -> bool {
        self.is_required
    }

    pub fn value_of(&self, row: &dyn Any) -> Result<Value, OrmError> {
        self.access.read(row)
    }

    pub fn assign(&self, row: &mut dyn Any, value: &Value) -> Result<(), OrmError> {
        self.access.write(row, value).map_err(|e| match e {
            OrmError::Conversion(msg) => {
                OrmError::Conversion(format!("column {}: {}", self.column, msg))
            }
            other => other,
        })
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("data_type", &self.data_type)
            .field("nullable", &self.nullable)
            .field("precision", &self.precision)
            .finish()
    }
}

/// Everything known about one table regardless of its position in the tree.
pub struct TableDescriptor {
    pub(crate) name: String,
    pub(crate) fields: Vec<Field>,
    pub(crate) primary_key: usize,
    pub(crate) serial_key: bool,
    pub(crate) table_no: usize,
    pub(crate) row_type: TypeId,
    pub(crate) row_type_name: &'static str,
    pub(crate) statements: RwLock<Option<Arc<TableStatements>>>,
}

pub enum TableKind {
    Root {
        token: Option<usize>,
    },
    Child {
        parent_key: usize,
        cardinality: Cardinality,
        association: Arc<dyn Association>,
    },
}

/// A table node in an entity tree.
pub struct Table {
    pub(crate) desc: TableDescriptor,
    pub(crate) kind: TableKind,
    pub(crate) children: Vec<Table>,
}

impl Table {
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    /// Pre-order position within the entity; the root is 0.
    pub fn table_no(&self) -> usize {
        self.desc.table_no
    }

    pub fn fields(&self) -> &[Field] {
        &self.desc.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.desc.fields.iter().find(|f| f.name == name || f.column == name)
    }

    pub fn primary_key(&self) -> &Field {
        &self.desc.fields[self.desc.primary_key]
    }

    pub(crate) fn primary_key_index(&self) -> usize {
        self.desc.primary_key
    }

    /// True when the database generates the primary key.
    pub fn is_serial_key(&self) -> bool {
        self.desc.serial_key
    }

    pub fn parent_key(&self) -> Option<&Field> {
        match &self.kind {
            TableKind::Child { parent_key, .. } => Some(&self.desc.fields[*parent_key]),
            TableKind::Root { .. } => None,
        }
    }

    pub fn token(&self) -> Option<&Field> {
        match &self.kind {
            TableKind::Root { token: Some(idx) } => Some(&self.desc.fields[*idx]),
            _ => None,
        }
    }

    pub fn cardinality(&self) -> Option<Cardinality> {
        match &self.kind {
            TableKind::Child { cardinality, .. } => Some(*cardinality),
            TableKind::Root { .. } => None,
        }
    }

    pub fn children(&self) -> &[Table] {
        &self.children
    }

    pub fn row_type(&self) -> TypeId {
        self.desc.row_type
    }

    pub fn row_type_name(&self) -> &'static str {
        self.desc.row_type_name
    }

    pub(crate) fn association(&self) -> Option<&Arc<dyn Association>> {
        match &self.kind {
            TableKind::Child { association, .. } => Some(association),
            TableKind::Root { .. } => None,
        }
    }

    /// Rows of this child table held by `parent`.
    pub fn child_rows<'a>(&self, parent: &'a dyn Any) -> Result<Vec<&'a dyn Any>, OrmError> {
        match self.association() {
            Some(assoc) => assoc.rows(parent),
            None => Err(OrmError::Mismatch(format!(
                "{} is a root table",
                self.name()
            ))),
        }
    }

    /// The row of this child table held by `parent` under `key`.
    pub fn find_row<'a>(
        &self,
        parent: &'a dyn Any,
        key: &Key,
    ) -> Result<Option<&'a dyn Any>, OrmError> {
        for row in self.child_rows(parent)? {
            if self.key_of(row)? == *key {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    pub fn key_of(&self, row: &dyn Any) -> Result<Key, OrmError> {
        Key::from_value(&self.primary_key().value_of(row)?)
            .map_err(|e| OrmError::UnsupportedKey(format!("{}: {}", self.name(), e)))
    }

    pub(crate) fn statements(&self) -> Result<Arc<TableStatements>, OrmError> {
        let guard = self
            .desc
            .statements
            .read()
            .map_err(|e| OrmError::NotBound(format!("{}: lock poisoned: {}", self.name(), e)))?;
        guard
            .clone()
            .ok_or_else(|| OrmError::NotBound(self.name().to_string()))
    }

    /// This table and every descendant, pre-order.
    pub fn flatten(&self) -> Vec<&Table> {
        let mut out = vec![self];
        for child in &self.children {
            out.extend(child.flatten());
        }
        out
    }

    pub(crate) fn select_list(&self, alias: Option<&str>) -> String {
        let prefix = alias.map(|a| format!("{}.", a)).unwrap_or_default();
        self.fields()
            .iter()
            .map(|f| format!("{}{}", prefix, quote(&f.column)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.desc.name)
            .field("table_no", &self.desc.table_no)
            .field("fields", &self.desc.fields)
            .field("children", &self.children)
            .finish()
    }
}

/// A registered aggregate: root table plus its nested children.
pub struct Entity {
    pub(crate) root: Table,
    pub(crate) select_fields: String,
}

impl Entity {
    pub fn root(&self) -> &Table {
        &self.root
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn token(&self) -> Option<&Field> {
        self.root.token()
    }

    pub fn has_children(&self) -> bool {
        !self.root.children.is_empty()
    }

    /// All tables, root first, in pre-order.
    pub fn tables(&self) -> Vec<&Table> {
        self.root.flatten()
    }

    /// Each child table with its ancestor chain, nearest parent first. The
    /// root is not part of the chain.
    pub(crate) fn child_paths(&self) -> Vec<(&Table, Vec<&Table>)> {
        fn walk<'a>(
            table: &'a Table,
            chain: &mut Vec<&'a Table>,
            out: &mut Vec<(&'a Table, Vec<&'a Table>)>,
        ) {
            for child in &table.children {
                out.push((child, chain.iter().rev().copied().collect()));
                chain.push(child);
                walk(child, chain, out);
                chain.pop();
            }
        }
        let mut out = Vec::new();
        walk(&self.root, &mut Vec::new(), &mut out);
        out
    }

    /// `SELECT <all root columns> FROM <root>`, the prefix for ad-hoc queries.
    pub fn select_fields(&self) -> &str {
        &self.select_fields
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity").field("root", &self.root).finish()
    }
}

/// Double-quote an identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_and_empty_keys_are_new() {
        assert!(Key::from(0_i64).is_new());
        assert!(Key::from("").is_new());
        assert!(!Key::from(7_i64).is_new());
        assert!(!Key::from("a").is_new());
    }

    #[test]
    fn keys_from_values() {
        assert_eq!(Key::from_value(&Value::Integer(3)).unwrap(), Key::Int(3));
        assert_eq!(Key::from_value(&Value::Text("x".into())).unwrap(), Key::Text("x".into()));
        assert!(matches!(
            Key::from_value(&Value::Real(1.0)),
            Err(OrmError::UnsupportedKey(_))
        ));
        assert!(Key::from_value(&Value::Null).is_err());
    }

    #[test]
    fn keys_order_numerically() {
        let mut keys = vec![Key::Int(10), Key::Int(2), Key::Int(-1)];
        keys.sort();
        assert_eq!(keys, vec![Key::Int(-1), Key::Int(2), Key::Int(10)]);
        assert_eq!(Key::Int(5).to_value(), Value::Integer(5));
    }

    #[test]
    fn child_rows_are_found_by_key() {
        use crate::fixtures::{Catalog, Entry, Order};
        use crate::registry::Registry;

        let mut registry = Registry::new();
        registry.register::<Catalog>("catalog").unwrap();
        let root = registry.entity::<Catalog>().unwrap().root();
        let entries = &root.children()[0];

        let mut catalog = Catalog::default();
        for code in ["a", "b"] {
            catalog.entries.insert(
                code.into(),
                Entry {
                    code: code.into(),
                    label: code.to_uppercase(),
                    ..Default::default()
                },
            );
        }
        assert_eq!(entries.child_rows(&catalog).unwrap().len(), 2);

        let found = entries.find_row(&catalog, &Key::from("b")).unwrap().unwrap();
        let label = entries.field("label").unwrap().value_of(found).unwrap();
        assert_eq!(label, Value::Text("B".into()));
        assert!(entries.find_row(&catalog, &Key::from("z")).unwrap().is_none());

        assert!(root.child_rows(&catalog).is_err());
        assert!(matches!(
            entries.child_rows(&Order::default()),
            Err(OrmError::Mismatch(_))
        ));
    }

    #[test]
    fn quote_escapes_embedded_quotes() {
        assert_eq!(quote("order"), "\"order\"");
        assert_eq!(quote("a\"b"), "\"a\"\"b\"");
    }
}
