//! Relational schema derived from registered tables, and its SQLite DDL.

use crate::model::{DataType, Entity, Table, quote};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Text length, 0 when unbounded.
    pub precision: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub column: String,
    pub unique: bool,
}

/// Expected shape of one table, as a schema upgrade tool would diff it
/// against the live catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub primary_key: String,
    /// The database generates key values.
    pub serial: bool,
    pub columns: Vec<ColumnSchema>,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn of(table: &Table) -> Self {
        let columns = table
            .fields()
            .iter()
            .map(|f| ColumnSchema {
                name: f.column().to_string(),
                data_type: f.data_type(),
                nullable: f.is_nullable(),
                precision: f.precision(),
            })
            .collect();

        let pk = table.primary_key().column();
        let fk = table.parent_key().map(|f| f.column());
        let mut indexes: Vec<IndexSchema> = Vec::new();
        for field in table.fields() {
            let column = field.column();
            let wanted = field.is_index() || Some(column) == fk;
            if !wanted || column == pk || indexes.iter().any(|ix| ix.column == column) {
                continue;
            }
            indexes.push(IndexSchema {
                name: format!("ix_{}_{}", table.name(), column),
                column: column.to_string(),
                unique: false,
            });
        }

        Self {
            name: table.name().to_string(),
            primary_key: pk.to_string(),
            serial: table.is_serial_key(),
            columns,
            indexes,
        }
    }

    fn column_definition(&self, col: &ColumnSchema) -> String {
        let name = quote(&col.name);
        if col.name == self.primary_key {
            return if self.serial {
                format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", name)
            } else {
                format!("{} {} NOT NULL PRIMARY KEY", name, column_type(col))
            };
        }
        let null = if col.nullable { "NULL" } else { "NOT NULL" };
        format!("{} {} {}", name, column_type(col), null)
    }

    /// `CREATE TABLE` followed by one `CREATE INDEX` per index.
    pub fn create_table_sql(&self) -> Vec<String> {
        let columns: Vec<_> = self
            .columns
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        let mut sql = vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote(&self.name),
            columns.join(", ")
        )];
        for ix in &self.indexes {
            let unique = if ix.unique { "UNIQUE " } else { "" };
            sql.push(format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                unique,
                quote(&ix.name),
                quote(&self.name),
                quote(&ix.column)
            ));
        }
        sql
    }
}

fn column_type(col: &ColumnSchema) -> String {
    match col.data_type {
        DataType::Bool => "BOOLEAN".to_string(),
        DataType::Int32 | DataType::Int64 => "INTEGER".to_string(),
        DataType::Float => "REAL".to_string(),
        DataType::DateTime => "DATETIME".to_string(),
        DataType::String if col.precision > 0 => format!("VARCHAR({})", col.precision),
        DataType::String => "TEXT".to_string(),
        DataType::Blob => "BLOB".to_string(),
    }
}

/// Schemas of every table of `entity`, root first.
pub fn entity_schema(entity: &Entity) -> Vec<TableSchema> {
    entity.tables().into_iter().map(TableSchema::of).collect()
}
