//! Filtered reads over the root table of an entity.

use std::any::{TypeId, type_name};

use treeorm_sql::{Executor, SQLStore, Value};

use crate::describe::{Record, new_record};
use crate::error::OrmError;
use crate::fetch::{load_children, scan};
use crate::model::{Entity, Key, quote};
use crate::txn::Scope;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Equal,
    Less,
    Greater,
    Like,
}

/// One comparison of a root column against a value. A `None` value tests
/// for NULL and is only valid with [`Op::Equal`].
#[derive(Debug, Clone)]
pub struct Criterion {
    field: String,
    op: Op,
    exclude: bool,
    value: Option<Value>,
}

impl Criterion {
    /// `field` is either the in-memory field name or the column name.
    pub fn new(field: &str, op: Op, value: impl Into<Option<Value>>) -> Self {
        Self {
            field: field.to_string(),
            op,
            exclude: false,
            value: value.into(),
        }
    }

    /// Negate the comparison.
    pub fn exclude(mut self) -> Self {
        self.exclude = true;
        self
    }

    fn operator(&self) -> &'static str {
        match (self.op, self.exclude) {
            (Op::Equal, false) => "=",
            (Op::Equal, true) => "<>",
            (Op::Less, false) => "<",
            (Op::Less, true) => ">=",
            (Op::Greater, false) => ">",
            (Op::Greater, true) => "<=",
            (Op::Like, false) => "LIKE",
            (Op::Like, true) => "NOT LIKE",
        }
    }
}

/// Query builder bound to one entity and store. The where clause is an OR of
/// AND-groups.
pub struct Query<'a> {
    entity: &'a Entity,
    store: &'a dyn SQLStore,
    groups: Vec<Vec<Criterion>>,
    order: Vec<(String, bool)>,
    limit: Option<u32>,
    offset: Option<u32>,
    header_only: bool,
}

impl<'a> Query<'a> {
    pub(crate) fn new(entity: &'a Entity, store: &'a dyn SQLStore) -> Self {
        Self {
            entity,
            store,
            groups: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            header_only: false,
        }
    }

    /// Start the where clause over with a single criterion.
    pub fn where_(mut self, criterion: Criterion) -> Self {
        self.groups = vec![vec![criterion]];
        self
    }

    /// Add a criterion to the current AND-group.
    pub fn and(mut self, criterion: Criterion) -> Self {
        match self.groups.last_mut() {
            Some(group) => group.push(criterion),
            None => self.groups.push(vec![criterion]),
        }
        self
    }

    /// Start a new AND-group.
    pub fn or(mut self, criterion: Criterion) -> Self {
        self.groups.push(vec![criterion]);
        self
    }

    pub fn order_by(mut self, field: &str, ascending: bool) -> Self {
        self.order.push((field.to_string(), ascending));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Load root rows only; child containers stay empty.
    pub fn header_only(mut self) -> Self {
        self.header_only = true;
        self
    }

    fn column(&self, field: &str) -> Result<String, OrmError> {
        self.entity
            .root()
            .field(field)
            .map(|f| quote(f.column()))
            .ok_or_else(|| {
                OrmError::InvalidQuery(format!(
                    "field {:?} not found in {}",
                    field,
                    self.entity.name()
                ))
            })
    }

    fn where_clause(&self) -> Result<(String, Vec<Value>), OrmError> {
        let mut sql = String::new();
        let mut params = Vec::new();
        for (i, group) in self.groups.iter().enumerate() {
            if i > 0 {
                sql.push_str(" OR ");
            }
            if group.len() > 1 {
                sql.push('(');
            }
            for (j, c) in group.iter().enumerate() {
                if j > 0 {
                    sql.push_str(" AND ");
                }
                let column = self.column(&c.field)?;
                match &c.value {
                    None if c.op != Op::Equal => {
                        return Err(OrmError::InvalidQuery(format!(
                            "{}: only equality can compare to NULL",
                            c.field
                        )));
                    }
                    None if c.exclude => sql.push_str(&format!("({} IS NOT NULL)", column)),
                    None => sql.push_str(&format!("({} IS NULL)", column)),
                    Some(value) => {
                        sql.push_str(&format!("({} {} ?)", column, c.operator()));
                        params.push(value.clone());
                    }
                }
            }
            if group.len() > 1 {
                sql.push(')');
            }
        }
        Ok((sql, params))
    }

    /// Render the statement that follows `select`.
    fn render(&self, select: &str) -> Result<(String, Vec<Value>), OrmError> {
        let mut sql = select.to_string();
        let mut params = Vec::new();
        if !self.groups.is_empty() {
            let (clause, values) = self.where_clause()?;
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
            params = values;
        }
        if !self.order.is_empty() {
            let mut terms = Vec::with_capacity(self.order.len());
            for (field, ascending) in &self.order {
                let dir = if *ascending { "ASC" } else { "DESC" };
                terms.push(format!("{} {}", self.column(field)?, dir));
            }
            sql.push_str(" ORDER BY ");
            sql.push_str(&terms.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
            }
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {}", limit)),
            (None, Some(offset)) if offset > 0 => {
                sql.push_str(&format!(" LIMIT -1 OFFSET {}", offset))
            }
            _ => {}
        }
        Ok((sql, params))
    }

    /// Keys of the matching root rows.
    pub fn ids(&self) -> Result<Vec<Key>, OrmError> {
        let root = self.entity.root();
        let select = format!(
            "SELECT {} FROM {}",
            quote(root.primary_key().column()),
            quote(root.name())
        );
        let (sql, params) = self.render(&select)?;
        self.store
            .query(&sql, &params)?
            .iter()
            .map(|row| Key::from_value(row.value(0).unwrap_or(&Value::Null)))
            .collect()
    }

    /// Load every matching aggregate.
    pub fn fetch<T: Record>(&self) -> Result<Vec<T>, OrmError> {
        let root = self.entity.root();
        if root.row_type() != TypeId::of::<T>() {
            return Err(OrmError::Mismatch(format!(
                "{} is stored as {}, not {}",
                self.entity.name(),
                root.row_type_name(),
                type_name::<T>()
            )));
        }
        let (sql, params) = self.render(self.entity.select_fields())?;

        let with_children = !self.header_only && self.entity.has_children();
        let scope = Scope::open(self.store, with_children)?;
        let result = self.load::<T>(&scope, &sql, &params, with_children);
        scope.finish(result)
    }

    fn load<T: Record>(
        &self,
        exec: &dyn Executor,
        sql: &str,
        params: &[Value],
        with_children: bool,
    ) -> Result<Vec<T>, OrmError> {
        let rows = exec.query(sql, params)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = new_record::<T>();
            scan(self.entity.root(), &mut record, row)?;
            if with_children {
                load_children(self.entity, exec, &mut record)?;
            }
            out.push(record);
        }
        Ok(out)
    }
}
