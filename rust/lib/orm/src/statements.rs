//! SQL text for every operation on a table.
//!
//! A child table is always addressed through its ancestor chain (nearest
//! parent first, root excluded) so reads and subtree deletes can filter on
//! the root key without loading intermediate rows. Child tables are aliased
//! `t<table_no>`.

use crate::model::{Table, quote};

fn alias(table: &Table) -> String {
    format!("t{}", table.table_no())
}

fn parent_column(table: &Table) -> String {
    table
        .parent_key()
        .map(|f| quote(f.column()))
        .unwrap_or_default()
}

/// `FROM "child" tN INNER JOIN ... WHERE t<top>."fk" = ?`, where the top
/// table is the child of the root.
fn child_from(table: &Table, path: &[&Table]) -> String {
    let mut sql = format!(" FROM {} {}", quote(table.name()), alias(table));
    let mut below = table;
    for parent in path {
        sql.push_str(&format!(
            " INNER JOIN {} {} ON {}.{} = {}.{}",
            quote(parent.name()),
            alias(parent),
            alias(parent),
            quote(parent.primary_key().column()),
            alias(below),
            parent_column(below),
        ));
        below = parent;
    }
    sql.push_str(&format!(" WHERE {}.{} = ?", alias(below), parent_column(below)));
    sql
}

/// Select every column of the root row with the given key.
pub fn root_select(table: &Table) -> String {
    format!(
        "SELECT {} FROM {} WHERE {} = ?",
        table.select_list(None),
        quote(table.name()),
        quote(table.primary_key().column())
    )
}

/// Select every row of a child table belonging to one aggregate, ordered by
/// the child key.
pub fn child_select(table: &Table, path: &[&Table]) -> String {
    format!(
        "SELECT {}{} ORDER BY {}.{}",
        table.select_list(Some(&alias(table))),
        child_from(table, path),
        alias(table),
        quote(table.primary_key().column())
    )
}

/// Root key plus token, or a constant `0` when the entity has no token.
pub fn root_info(table: &Table) -> String {
    let token = table
        .token()
        .map(|f| quote(f.column()))
        .unwrap_or_else(|| "0".to_string());
    format!(
        "SELECT {}, {} FROM {} WHERE {} = ?",
        quote(table.primary_key().column()),
        token,
        quote(table.name()),
        quote(table.primary_key().column())
    )
}

/// Keys of every stored child row of one aggregate.
pub fn child_info(table: &Table, path: &[&Table]) -> String {
    format!(
        "SELECT {}.{}{}",
        alias(table),
        quote(table.primary_key().column()),
        child_from(table, path)
    )
}

/// Field indices bound by the insert statement: the key first unless it is
/// generated, then the remaining columns in declaration order.
pub fn insert_columns(table: &Table) -> Vec<usize> {
    let pk = table.primary_key_index();
    let mut cols = Vec::with_capacity(table.fields().len());
    if !table.is_serial_key() {
        cols.push(pk);
    }
    cols.extend((0..table.fields().len()).filter(|&i| i != pk));
    cols
}

/// Field indices written by the update statement.
pub fn update_columns(table: &Table) -> Vec<usize> {
    let pk = table.primary_key_index();
    (0..table.fields().len()).filter(|&i| i != pk).collect()
}

pub fn insert(table: &Table) -> String {
    let cols = insert_columns(table);
    let names: Vec<_> = cols
        .iter()
        .map(|&i| quote(table.fields()[i].column()))
        .collect();
    let marks = vec!["?"; cols.len()];
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table.name()),
        names.join(", "),
        marks.join(", ")
    )
}

/// Update of the non-key columns. The trailing guard makes an unchanged row
/// report zero affected rows. Parameters: new values, key, new values again.
/// `None` when the key is the only column.
pub fn update(table: &Table) -> Option<String> {
    let cols = update_columns(table);
    if cols.is_empty() {
        return None;
    }
    let names: Vec<_> = cols
        .iter()
        .map(|&i| quote(table.fields()[i].column()))
        .collect();
    let set: Vec<_> = names.iter().map(|c| format!("{} = ?", c)).collect();
    let guard: Vec<_> = names.iter().map(|c| format!("{} IS NOT ?", c)).collect();
    Some(format!(
        "UPDATE {} SET {} WHERE {} = ? AND ({})",
        quote(table.name()),
        set.join(", "),
        quote(table.primary_key().column()),
        guard.join(" OR ")
    ))
}

pub fn remove(table: &Table) -> String {
    format!(
        "DELETE FROM {} WHERE {} = ?",
        quote(table.name()),
        quote(table.primary_key().column())
    )
}

/// Delete every row of a child table belonging to one aggregate, given the
/// root key.
pub fn delete_subtree(table: &Table, path: &[&Table]) -> String {
    let mut filter = "= ?".to_string();
    for parent in path.iter().rev() {
        filter = format!(
            "IN (SELECT {} FROM {} WHERE {} {})",
            quote(parent.primary_key().column()),
            quote(parent.name()),
            parent_column(parent),
            filter
        );
    }
    format!(
        "DELETE FROM {} WHERE {} {}",
        quote(table.name()),
        parent_column(table),
        filter
    )
}

/// Compare-and-swap increment of the root token.
pub fn token_bump(table: &Table) -> Option<String> {
    table.token().map(|token| {
        let col = quote(token.column());
        format!(
            "UPDATE {} SET {} = {} + 1 WHERE {} = ? AND {} = ?",
            quote(table.name()),
            col,
            col,
            quote(table.primary_key().column()),
            col
        )
    })
}
