use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::describe::{Association, FieldDescriptor, Record, RecordDescriptor};
use crate::error::OrmError;
use crate::model::{Cardinality, DataType, Entity, Field, Table, TableDescriptor, TableKind, quote};

/// Set of registered entities.
///
/// Registration is atomic: a failing `register` leaves the registry exactly
/// as it was.
#[derive(Default)]
pub struct Registry {
    entities: Vec<Entity>,
    by_type: HashMap<TypeId, usize>,
    table_names: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `T` as the root of an entity stored in `table_name`.
    pub fn register<T: Record>(&mut self, table_name: &str) -> Result<&Entity, OrmError> {
        let desc = RecordDescriptor::of::<T>();
        if self.by_type.contains_key(&desc.type_id) {
            return Err(OrmError::Schema(format!(
                "{} is already registered",
                desc.type_name
            )));
        }

        let mut builder = TreeBuilder {
            next_no: 0,
            names: HashSet::new(),
            taken: &self.table_names,
            stack: Vec::new(),
        };
        let root = builder.build(desc, table_name, None)?;
        let names = builder.names;

        let select_fields = format!(
            "SELECT {} FROM {}",
            root.select_list(None),
            quote(root.name())
        );
        let entity = Entity {
            root,
            select_fields,
        };
        debug!(
            "registered entity {} with {} table(s)",
            entity.name(),
            entity.tables().len()
        );

        let idx = self.entities.len();
        self.by_type.insert(TypeId::of::<T>(), idx);
        self.table_names.extend(names);
        self.entities.push(entity);
        Ok(&self.entities[idx])
    }

    pub fn entity<T: Record>(&self) -> Result<&Entity, OrmError> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|&idx| &self.entities[idx])
            .ok_or_else(|| OrmError::NotRegistered(std::any::type_name::<T>().to_string()))
    }

    /// Look up an entity by its root table name.
    pub fn entity_by_name(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

struct TreeBuilder<'a> {
    next_no: usize,
    names: HashSet<String>,
    taken: &'a HashSet<String>,
    stack: Vec<TypeId>,
}

struct ParsedField {
    field: Field,
    pk: bool,
    fk: bool,
    token: bool,
}

impl TreeBuilder<'_> {
    fn build(
        &mut self,
        desc: RecordDescriptor,
        name: &str,
        child: Option<(Cardinality, Arc<dyn Association>)>,
    ) -> Result<Table, OrmError> {
        if name.trim().is_empty() {
            return Err(OrmError::Schema(format!(
                "{}: empty table name",
                desc.type_name
            )));
        }
        if self.stack.contains(&desc.type_id) {
            return Err(OrmError::Schema(format!(
                "{}: record type nests itself",
                desc.type_name
            )));
        }
        if self.taken.contains(name) || !self.names.insert(name.to_string()) {
            return Err(OrmError::Schema(format!("table {} is already in use", name)));
        }

        let is_root = child.is_none();
        let mut fields = Vec::with_capacity(desc.fields.len());
        let mut primary_key = None;
        let mut parent_key = None;
        let mut token = None;

        for fd in &desc.fields {
            let parsed = parse_field(name, fd)?;
            let idx = fields.len();
            if parsed.pk {
                if primary_key.is_some() {
                    return Err(OrmError::Schema(format!("{}: duplicate primary key", name)));
                }
                check_key(name, &parsed.field)?;
                primary_key = Some(idx);
            }
            if parsed.fk {
                if is_root {
                    return Err(OrmError::Schema(format!(
                        "{}: foreign key {} on a root table",
                        name, parsed.field.column
                    )));
                }
                if parent_key.is_some() {
                    return Err(OrmError::Schema(format!("{}: duplicate foreign key", name)));
                }
                parent_key = Some(idx);
            }
            if parsed.token {
                if !is_root {
                    return Err(OrmError::Schema(format!(
                        "{}: token {} on a child table",
                        name, parsed.field.column
                    )));
                }
                if token.is_some() {
                    return Err(OrmError::Schema(format!("{}: duplicate token", name)));
                }
                if !matches!(parsed.field.data_type, DataType::Int32 | DataType::Int64) {
                    return Err(OrmError::Schema(format!(
                        "{}: token {} must be an integer",
                        name, parsed.field.column
                    )));
                }
                token = Some(idx);
            }
            fields.push(parsed.field);
        }

        if fields.is_empty() {
            return Err(OrmError::Schema(format!("{}: no fields", name)));
        }
        let primary_key =
            primary_key.ok_or_else(|| OrmError::Schema(format!("{}: no primary key", name)))?;
        let serial_key = matches!(fields[primary_key].data_type, DataType::Int32 | DataType::Int64)
            && parent_key != Some(primary_key);

        let kind = match child {
            None => TableKind::Root { token },
            Some((cardinality, association)) => TableKind::Child {
                parent_key: parent_key
                    .ok_or_else(|| OrmError::Schema(format!("{}: no foreign key", name)))?,
                cardinality,
                association,
            },
        };

        let table_no = self.next_no;
        self.next_no += 1;

        self.stack.push(desc.type_id);
        let mut children = Vec::with_capacity(desc.children.len());
        for cd in desc.children {
            let child_desc = (cd.describe)();
            children.push(self.build(
                child_desc,
                cd.table_name,
                Some((cd.cardinality, cd.access)),
            )?);
        }
        self.stack.pop();

        Ok(Table {
            desc: TableDescriptor {
                name: name.to_string(),
                fields,
                primary_key,
                serial_key,
                table_no,
                row_type: desc.type_id,
                row_type_name: desc.type_name,
                statements: RwLock::new(None),
            },
            kind,
            children,
        })
    }
}

fn parse_field(table: &str, fd: &FieldDescriptor) -> Result<ParsedField, OrmError> {
    let mut props = fd.tag.split(',');
    let column = props.next().unwrap_or("").trim();
    if column.is_empty() {
        return Err(OrmError::Schema(format!(
            "{}.{}: missing column name",
            table, fd.name
        )));
    }
    let data_type = fd.native.data_type().ok_or_else(|| {
        OrmError::Schema(format!(
            "{}.{}: short integer fields are not supported",
            table, fd.name
        ))
    })?;

    let mut parsed = ParsedField {
        field: Field {
            name: fd.name.to_string(),
            column: column.to_string(),
            data_type,
            native: fd.native,
            nullable: fd.nullable,
            precision: 0,
            is_index: false,
            is_required: false,
            access: fd.access.clone(),
        },
        pk: false,
        fk: false,
        token: false,
    };

    for prop in props {
        let prop = prop.trim().to_ascii_lowercase();
        match prop.as_str() {
            "" => {}
            "pk" => parsed.pk = true,
            "fk" => parsed.fk = true,
            "token" => parsed.token = true,
            "index" => parsed.field.is_index = true,
            "null" => parsed.field.nullable = true,
            "required" => parsed.field.is_required = true,
            other => match other.strip_prefix(':').map(str::parse::<u16>) {
                Some(Ok(n)) => parsed.field.precision = n,
                _ => {
                    return Err(OrmError::Schema(format!(
                        "{}.{}: unsupported modifier {:?}",
                        table, fd.name, other
                    )));
                }
            },
        }
    }
    Ok(parsed)
}

fn check_key(table: &str, field: &Field) -> Result<(), OrmError> {
    if !matches!(
        field.data_type,
        DataType::Int32 | DataType::Int64 | DataType::String
    ) {
        return Err(OrmError::Schema(format!(
            "{}.{} cannot be a primary key",
            table, field.column
        )));
    }
    if field.nullable {
        return Err(OrmError::Schema(format!(
            "{}.{}: primary key cannot be nullable",
            table, field.column
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::TableDef;
    use crate::fixtures::{Catalog, Order};

    #[test]
    fn tables_are_numbered_in_pre_order() {
        let mut registry = Registry::new();
        let entity = registry.register::<Order>("orders").unwrap();
        let names: Vec<_> = entity
            .tables()
            .iter()
            .map(|t| (t.table_no(), t.name().to_string()))
            .collect();
        assert_eq!(
            names,
            vec![
                (0, "orders".to_string()),
                (1, "line_item".to_string()),
                (2, "item_note".to_string()),
                (3, "shipping".to_string()),
            ]
        );
        assert_eq!(entity.token().map(|f| f.column()), Some("token"));
        assert!(entity.root().is_serial_key());
    }

    #[test]
    fn key_classification() {
        let mut registry = Registry::new();
        registry.register::<Order>("orders").unwrap();
        registry.register::<Catalog>("catalog").unwrap();

        let order = registry.entity::<Order>().unwrap();
        let shipping = &order.root().children()[1];
        assert_eq!(shipping.name(), "shipping");
        assert!(!shipping.is_serial_key(), "pk doubling as fk is assigned by the parent");
        assert_eq!(shipping.cardinality(), Some(Cardinality::Single));

        let catalog = registry.entity_by_name("catalog").unwrap();
        assert!(!catalog.root().is_serial_key());
        assert_eq!(catalog.root().children()[0].cardinality(), Some(Cardinality::Keyed));
        assert_eq!(
            order.select_fields(),
            "SELECT \"id\", \"customer\", \"total\", \"token\", \"placed_at\" FROM \"orders\""
        );
    }

    #[test]
    fn modifiers_are_parsed() {
        let mut registry = Registry::new();
        let entity = registry.register::<Order>("orders").unwrap();
        let customer = entity.root().field("customer").unwrap();
        assert_eq!(customer.precision(), 64);
        assert!(customer.is_index());
        assert!(customer.is_required());
        assert!(entity.root().field("placed_at").unwrap().is_nullable());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = Registry::new();
        registry.register::<Order>("orders").unwrap();
        let err = registry.register::<Order>("orders2").unwrap_err();
        assert!(matches!(err, OrmError::Schema(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn table_names_are_unique_across_entities() {
        let mut registry = Registry::new();
        registry.register::<Order>("orders").unwrap();
        let err = registry.register::<Catalog>("line_item").unwrap_err();
        assert!(err.to_string().contains("already in use"));
        assert!(registry.entity::<Catalog>().is_err());
        assert!(registry.entity_by_name("line_item").is_none());
    }

    #[test]
    fn unregistered_lookup_fails() {
        let registry = Registry::new();
        assert!(matches!(
            registry.entity::<Order>(),
            Err(OrmError::NotRegistered(_))
        ));
    }

    #[derive(Default)]
    struct TwoKeys {
        a: i64,
        b: i64,
    }

    impl Record for TwoKeys {
        fn describe(t: &mut TableDef<Self>) {
            t.field("a", "a,pk", |r| &r.a, |r| &mut r.a);
            t.field("b", "b,pk", |r| &r.b, |r| &mut r.b);
        }
    }

    #[derive(Default)]
    struct NoKey {
        a: i64,
    }

    impl Record for NoKey {
        fn describe(t: &mut TableDef<Self>) {
            t.field("a", "a,index", |r| &r.a, |r| &mut r.a);
        }
    }

    #[derive(Default)]
    struct Empty;

    impl Record for Empty {
        fn describe(_t: &mut TableDef<Self>) {}
    }

    #[derive(Default)]
    struct FloatKey {
        a: f64,
    }

    impl Record for FloatKey {
        fn describe(t: &mut TableDef<Self>) {
            t.field("a", "a,pk", |r| &r.a, |r| &mut r.a);
        }
    }

    #[derive(Default)]
    struct Short {
        id: i64,
        n: i16,
    }

    impl Record for Short {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
            t.field("n", "n", |r| &r.n, |r| &mut r.n);
        }
    }

    #[derive(Default)]
    struct BadModifier {
        id: i64,
    }

    impl Record for BadModifier {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk,unique", |r| &r.id, |r| &mut r.id);
        }
    }

    #[derive(Default)]
    struct RootFk {
        id: i64,
        parent: i64,
    }

    impl Record for RootFk {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
            t.field("parent", "parent,fk", |r| &r.parent, |r| &mut r.parent);
        }
    }

    #[derive(Default)]
    struct Orphan {
        id: i64,
    }

    impl Record for Orphan {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
        }
    }

    #[derive(Default)]
    struct HasOrphan {
        id: i64,
        kids: Vec<Orphan>,
    }

    impl Record for HasOrphan {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
            t.many("kids", "orphan", |r| &r.kids, |r| &mut r.kids);
        }
    }

    #[derive(Default)]
    struct ChildToken {
        id: i64,
        parent: i64,
        token: i64,
    }

    impl Record for ChildToken {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
            t.field("parent", "parent,fk", |r| &r.parent, |r| &mut r.parent);
            t.field("token", "token,token", |r| &r.token, |r| &mut r.token);
        }
    }

    #[derive(Default)]
    struct HasChildToken {
        id: i64,
        kids: Vec<ChildToken>,
    }

    impl Record for HasChildToken {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
            t.many("kids", "child_token", |r| &r.kids, |r| &mut r.kids);
        }
    }

    #[derive(Default)]
    struct Tree {
        id: i64,
        parent: i64,
        branches: Vec<Tree>,
    }

    impl Record for Tree {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
            t.field("parent", "parent,fk", |r| &r.parent, |r| &mut r.parent);
            t.many("branches", "branch", |r| &r.branches, |r| &mut r.branches);
        }
    }

    #[derive(Default)]
    struct Forest {
        id: i64,
        trees: Vec<Tree>,
    }

    impl Record for Forest {
        fn describe(t: &mut TableDef<Self>) {
            t.field("id", "id,pk", |r| &r.id, |r| &mut r.id);
            t.many("trees", "tree", |r| &r.trees, |r| &mut r.trees);
        }
    }

    fn schema_error<T: Record>(table: &str) -> String {
        let mut registry = Registry::new();
        match registry.register::<T>(table) {
            Err(OrmError::Schema(msg)) => {
                assert!(registry.is_empty());
                msg
            }
            Err(other) => panic!("expected schema error, got {other}"),
            Ok(_) => panic!("registration of {table} should fail"),
        }
    }

    #[test]
    fn invalid_descriptions_are_rejected() {
        assert!(schema_error::<TwoKeys>("two_keys").contains("duplicate primary key"));
        assert!(schema_error::<NoKey>("no_key").contains("no primary key"));
        assert!(schema_error::<Empty>("empty").contains("no fields"));
        assert!(schema_error::<FloatKey>("float_key").contains("cannot be a primary key"));
        assert!(schema_error::<Short>("short").contains("short integer"));
        assert!(schema_error::<BadModifier>("bad").contains("unsupported modifier"));
        assert!(schema_error::<RootFk>("root_fk").contains("foreign key"));
        assert!(schema_error::<HasOrphan>("has_orphan").contains("no foreign key"));
        assert!(schema_error::<HasChildToken>("has_token").contains("token"));
        assert!(schema_error::<Forest>("forest").contains("nests itself"));
    }
}
