//! Record types shared by unit tests.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use treeorm_sql::{Executor, SqliteStore};

use crate::describe::{Record, TableDef};
use crate::error::OrmError;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub customer: String,
    pub total: f64,
    pub token: i64,
    pub placed_at: Option<NaiveDateTime>,
    pub items: Vec<LineItem>,
    pub shipping: Option<Shipping>,
}

impl Record for Order {
    fn describe(t: &mut TableDef<Self>) {
        t.field("id", "id,pk", |r| &r.id, |r| &mut r.id)
            .field("customer", "customer,:64,index,required", |r| &r.customer, |r| &mut r.customer)
            .field("total", "total", |r| &r.total, |r| &mut r.total)
            .field("token", "token,token", |r| &r.token, |r| &mut r.token)
            .field("placed_at", "placed_at", |r| &r.placed_at, |r| &mut r.placed_at);
        t.many("items", "line_item", |r| &r.items, |r| &mut r.items);
        t.one("shipping", "shipping", |r| &r.shipping, |r| &mut r.shipping);
    }

    fn before_save(&mut self) -> Result<(), OrmError> {
        if self.customer.is_empty() {
            return Err(OrmError::Rejected("order without customer".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct LineItem {
    pub id: i64,
    pub order_id: i64,
    pub sku: String,
    pub qty: i32,
    pub notes: Vec<ItemNote>,
}

impl Record for LineItem {
    fn describe(t: &mut TableDef<Self>) {
        t.field("id", "id,pk", |r| &r.id, |r| &mut r.id)
            .field("order_id", "order_id,fk", |r| &r.order_id, |r| &mut r.order_id)
            .field("sku", "sku", |r| &r.sku, |r| &mut r.sku)
            .field("qty", "qty", |r| &r.qty, |r| &mut r.qty);
        t.many("notes", "item_note", |r| &r.notes, |r| &mut r.notes);
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ItemNote {
    pub id: i64,
    pub item_id: i64,
    pub body: String,
}

impl Record for ItemNote {
    fn describe(t: &mut TableDef<Self>) {
        t.field("id", "id,pk", |r| &r.id, |r| &mut r.id)
            .field("item_id", "item_id,fk", |r| &r.item_id, |r| &mut r.item_id)
            .field("body", "body", |r| &r.body, |r| &mut r.body);
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Shipping {
    pub order_id: i64,
    pub address: String,
}

impl Record for Shipping {
    fn describe(t: &mut TableDef<Self>) {
        t.field("order_id", "order_id,pk,fk", |r| &r.order_id, |r| &mut r.order_id)
            .field("address", "address", |r| &r.address, |r| &mut r.address);
    }
}

/// String-keyed aggregate with a keyed child map.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Catalog {
    pub code: String,
    pub title: String,
    pub entries: BTreeMap<String, Entry>,
    pub mark: Option<Mark>,
}

impl Record for Catalog {
    fn describe(t: &mut TableDef<Self>) {
        t.field("code", "code,pk", |r| &r.code, |r| &mut r.code)
            .field("title", "title", |r| &r.title, |r| &mut r.title);
        t.keyed("entries", "catalog_entry", |r| &r.entries, |r| &mut r.entries);
        t.one("mark", "catalog_mark", |r| &r.mark, |r| &mut r.mark);
    }
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Entry {
    pub code: String,
    pub catalog_code: String,
    pub label: String,
}

impl Record for Entry {
    fn describe(t: &mut TableDef<Self>) {
        t.field("code", "code,pk", |r| &r.code, |r| &mut r.code)
            .field("catalog_code", "catalog_code,fk", |r| &r.catalog_code, |r| &mut r.catalog_code)
            .field("label", "label", |r| &r.label, |r| &mut r.label);
    }
}

/// A child whose only column is its key, which is also the parent key.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Mark {
    pub catalog_code: String,
}

impl Record for Mark {
    fn describe(t: &mut TableDef<Self>) {
        t.field("catalog_code", "catalog_code,pk,fk", |r| &r.catalog_code, |r| &mut r.catalog_code);
    }
}

pub fn create_order_tables(store: &SqliteStore) {
    let ddl = [
        "CREATE TABLE orders (id INTEGER PRIMARY KEY AUTOINCREMENT, customer VARCHAR(64) NOT NULL, \
         total REAL NOT NULL, token INTEGER NOT NULL, placed_at DATETIME NULL)",
        "CREATE TABLE line_item (id INTEGER PRIMARY KEY AUTOINCREMENT, order_id INTEGER NOT NULL, \
         sku TEXT NOT NULL, qty INTEGER NOT NULL)",
        "CREATE TABLE item_note (id INTEGER PRIMARY KEY AUTOINCREMENT, item_id INTEGER NOT NULL, \
         body TEXT NOT NULL)",
        "CREATE TABLE shipping (order_id INTEGER NOT NULL PRIMARY KEY, address TEXT NOT NULL)",
    ];
    for sql in ddl {
        store.exec(sql, &[]).unwrap();
    }
}

pub fn create_catalog_tables(store: &SqliteStore) {
    let ddl = [
        "CREATE TABLE catalog (code TEXT NOT NULL PRIMARY KEY, title TEXT NOT NULL)",
        "CREATE TABLE catalog_entry (code TEXT NOT NULL PRIMARY KEY, catalog_code TEXT NOT NULL, \
         label TEXT NOT NULL)",
        "CREATE TABLE catalog_mark (catalog_code TEXT NOT NULL PRIMARY KEY)",
    ];
    for sql in ddl {
        store.exec(sql, &[]).unwrap();
    }
}

/// An unsaved order with two lines (the first carrying a note) and shipping.
pub fn sample_order(customer: &str) -> Order {
    Order {
        customer: customer.to_string(),
        total: 9.5,
        items: vec![
            LineItem {
                sku: "pen".into(),
                qty: 2,
                notes: vec![ItemNote {
                    body: "gift".into(),
                    ..Default::default()
                }],
                ..Default::default()
            },
            LineItem {
                sku: "ink".into(),
                qty: 1,
                ..Default::default()
            },
        ],
        shipping: Some(Shipping {
            address: "Main St".into(),
            ..Default::default()
        }),
        ..Default::default()
    }
}
