//! Shared models and schema for the SQLite integration tests.

#![allow(dead_code)]

use chrono::NaiveDate;
use crudkit::mixins::{AuditFields, SoftDeleteFields};
use crudkit::session::SqliteSession;
use crudkit::{FieldMap, Model, Value};

#[derive(Debug, Clone, PartialEq, Model)]
#[orm(table = "widgets")]
#[orm(has_many(name = "tags", table = "tags", foreign_key = "widget_id"))]
pub struct Widget {
    #[orm(id)]
    pub id: Option<i64>,
    pub name: String,
    pub color: Option<String>,
    pub qty: i64,
    pub due_date: Option<NaiveDate>,
    #[orm(flatten)]
    pub audit: AuditFields,
    #[orm(flatten)]
    pub deletion: SoftDeleteFields,
    #[orm(related = "tags")]
    pub tags: Vec<Tag>,
}

impl Widget {
    pub fn new(name: &str, qty: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            color: None,
            qty,
            due_date: None,
            audit: AuditFields::default(),
            deletion: SoftDeleteFields::default(),
            tags: Vec::new(),
        }
    }

    pub fn due(mut self, date: NaiveDate) -> Self {
        self.due_date = Some(date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Model)]
#[orm(table = "tags")]
#[orm(belongs_to(name = "widget", table = "widgets", foreign_key = "widget_id"))]
pub struct Tag {
    #[orm(id)]
    pub id: Option<i64>,
    pub widget_id: i64,
    pub label: String,
    #[orm(related = "widget")]
    pub widget: Option<Widget>,
}

pub const SCHEMA: &str = "
    CREATE TABLE widgets (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        color TEXT,
        qty INTEGER NOT NULL DEFAULT 0 CHECK (qty >= 0),
        due_date TEXT,
        created_at TEXT,
        updated_at TEXT,
        created_by TEXT,
        updated_by TEXT,
        is_deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at TEXT,
        deleted_by TEXT
    );
    CREATE TABLE tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        widget_id INTEGER NOT NULL REFERENCES widgets(id),
        label TEXT NOT NULL
    );
";

pub fn session() -> SqliteSession {
    let session = SqliteSession::open_in_memory().unwrap();
    session.execute_batch(SCHEMA).unwrap();
    session
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn fields<const N: usize>(pairs: [(&str, Value); N]) -> FieldMap {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Row count straight from the connection, bypassing every filter.
pub fn count(session: &SqliteSession, table: &str) -> i64 {
    session
        .connection()
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
        .unwrap()
}
