//! Get-or-create against in-memory SQLite.

mod common;

use common::{Widget, count, fields, session};
use crudkit::blocking;
use crudkit::crud::GetOrCreateOptions;
use crudkit::reduce::ReduceMode;
use crudkit::session::SqliteSession;
use crudkit::{BlockingSession, CrudError, CrudResult, Dialect, FieldMap, Session, Sql, Value};

#[test]
fn second_call_finds_the_created_row() {
    let mut s = session();
    let lookup = fields([("name", Value::from("bolt"))]);
    let options = GetOrCreateOptions::new().default_value("qty", 3);

    let first = blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &options).unwrap();
    assert!(!first.exists);
    assert_eq!(first.record.qty, 3);
    assert!(first.record.audit.created_at.is_some());

    let second = blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &options).unwrap();
    assert!(second.exists);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(count(&s, "widgets"), 1);
}

#[test]
fn lookup_values_win_over_defaults() {
    let mut s = session();
    let lookup = fields([("name", Value::from("nut"))]);
    let options = GetOrCreateOptions::new()
        .default_value("name", "washer")
        .default_value("color", "red");

    let got = blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &options).unwrap();
    assert_eq!(got.record.name, "nut");
    assert_eq!(got.record.color.as_deref(), Some("red"));
}

#[test]
fn unknown_lookup_field_is_rejected() {
    let mut s = session();
    let lookup = fields([("weight", Value::from(3))]);
    let err = blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &GetOrCreateOptions::new()).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(count(&s, "widgets"), 0);
}

#[test]
fn conflict_outside_the_lookup_reports_not_found() {
    let mut s = session();
    let existing = fields([("name", Value::from("bolt")), ("color", Value::from("red"))]);
    blocking::get_one_or_create::<Widget, _>(&mut s, &existing, &GetOrCreateOptions::new()).unwrap();

    // Same unique name, different color: the lookup misses but the insert is skipped.
    let lookup = fields([("name", Value::from("bolt")), ("color", Value::from("blue"))]);
    let err = blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &GetOrCreateOptions::new()).unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert_eq!(count(&s, "widgets"), 1);
}

#[test]
fn strict_mode_rejects_ambiguous_lookup() {
    let mut s = session();
    for name in ["a", "b"] {
        let lookup = fields([("name", Value::from(name)), ("color", Value::from("red"))]);
        blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &GetOrCreateOptions::new()).unwrap();
    }
    let lookup = fields([("color", Value::from("red"))]);

    let err = blocking::get_one_or_create::<Widget, _>(
        &mut s,
        &lookup,
        &GetOrCreateOptions::new().mode(ReduceMode::Strict),
    )
    .unwrap_err();
    assert!(matches!(err, CrudError::MultipleFound { count: 2, .. }));

    let first = blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &GetOrCreateOptions::new()).unwrap();
    assert!(first.exists);
    assert_eq!(first.record.name, "a");
}

#[tokio::test]
async fn async_flavor_is_idempotent() {
    let mut s = session();
    let lookup = fields([("name", Value::from("gear"))]);
    let options = GetOrCreateOptions::new();

    let first = crudkit::crud::get_one_or_create::<Widget, _>(&mut s, &lookup, &options).await.unwrap();
    let second = crudkit::crud::get_one_or_create::<Widget, _>(&mut s, &lookup, &options).await.unwrap();
    assert!(!first.exists);
    assert!(second.exists);
    assert_eq!(first.record.id, second.record.id);
    assert_eq!(count(&s, "widgets"), 1);
}

/// Commits a competing row on the same store just before the first INSERT,
/// as a concurrent writer would between the lookup and the insert.
struct Contended {
    inner: SqliteSession,
    rival: Option<&'static str>,
}

impl Contended {
    fn new(rival: &'static str) -> Self {
        Self {
            inner: session(),
            rival: Some(rival),
        }
    }

    fn race(&mut self, sql: &Sql) {
        if !sql.to_sql().starts_with("INSERT") {
            return;
        }
        if let Some(name) = self.rival.take() {
            self.inner
                .connection()
                .execute("INSERT INTO widgets (name, qty) VALUES (?1, 7)", [name])
                .unwrap();
        }
    }

    fn rival_id(&self) -> i64 {
        self.inner
            .connection()
            .query_row("SELECT id FROM widgets WHERE qty = 7", [], |r| r.get(0))
            .unwrap()
    }
}

impl BlockingSession for Contended {
    fn dialect(&self) -> Dialect {
        BlockingSession::dialect(&self.inner)
    }

    fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        self.race(sql);
        BlockingSession::fetch_all(&mut self.inner, sql)
    }

    fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        self.race(sql);
        BlockingSession::execute(&mut self.inner, sql)
    }

    fn commit(&mut self) -> CrudResult<()> {
        BlockingSession::commit(&mut self.inner)
    }

    fn rollback(&mut self) -> CrudResult<()> {
        BlockingSession::rollback(&mut self.inner)
    }
}

impl Session for Contended {
    fn dialect(&self) -> Dialect {
        Session::dialect(&self.inner)
    }

    async fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        self.race(sql);
        Session::fetch_all(&mut self.inner, sql).await
    }

    async fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        self.race(sql);
        Session::execute(&mut self.inner, sql).await
    }

    async fn commit(&mut self) -> CrudResult<()> {
        Session::commit(&mut self.inner).await
    }

    async fn rollback(&mut self) -> CrudResult<()> {
        Session::rollback(&mut self.inner).await
    }
}

#[test]
fn losing_the_insert_race_returns_the_winner() {
    let mut s = Contended::new("bolt");
    let lookup = fields([("name", Value::from("bolt"))]);
    let options = GetOrCreateOptions::new().default_value("qty", 3);

    let got = blocking::get_one_or_create::<Widget, _>(&mut s, &lookup, &options).unwrap();
    assert!(got.exists);
    assert_eq!(got.record.id, Some(s.rival_id()));
    assert_eq!(got.record.qty, 7);
    assert_eq!(count(&s.inner, "widgets"), 1);
}

#[tokio::test]
async fn async_losing_the_insert_race_returns_the_winner() {
    let mut s = Contended::new("gear");
    let lookup = fields([("name", Value::from("gear"))]);

    let got = crudkit::crud::get_one_or_create::<Widget, _>(&mut s, &lookup, &GetOrCreateOptions::new())
        .await
        .unwrap();
    assert!(got.exists);
    assert_eq!(got.record.id, Some(s.rival_id()));
    assert_eq!(count(&s.inner, "widgets"), 1);
}
