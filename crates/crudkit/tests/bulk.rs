//! Bulk upsert and degraded batch insert against in-memory SQLite.

mod common;

use common::{Widget, count, fields, session};
use crudkit::bulk::BulkWriter;
use crudkit::outcome::InsertReport;
use crudkit::{CrudError, Dialect, FieldMap, Value, blocking};

fn payload(entries: &[(&str, i64)]) -> Vec<FieldMap> {
    entries
        .iter()
        .map(|(name, qty)| fields([("name", Value::from(*name)), ("qty", Value::from(*qty))]))
        .collect()
}

#[test]
fn upsert_is_idempotent() {
    let mut s = session();
    let writer = BulkWriter::new(Dialect::Sqlite);
    let entries = payload(&[("a", 1), ("b", 2)]);

    let first: Vec<Widget> = writer.upsert_blocking(&mut s, &entries, &["name"]).unwrap();
    let second: Vec<Widget> = writer.upsert_blocking(&mut s, &entries, &["name"]).unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_eq!(count(&s, "widgets"), 2);

    let ids = |rows: &[Widget]| rows.iter().map(|w| w.id).collect::<Vec<_>>();
    assert_eq!(ids(&first), ids(&second));
}

#[test]
fn upsert_updates_values_but_keeps_creation_stamp() {
    let mut s = session();
    let writer = BulkWriter::new(Dialect::Sqlite);
    let before: Vec<Widget> = writer.upsert_blocking(&mut s, &payload(&[("a", 1)]), &["name"]).unwrap();
    let after: Vec<Widget> = writer.upsert_blocking(&mut s, &payload(&[("a", 9)]), &["name"]).unwrap();

    assert_eq!(after[0].qty, 9);
    assert_eq!(after[0].id, before[0].id);
    assert_eq!(after[0].audit.created_at, before[0].audit.created_at);
    assert!(after[0].audit.updated_at >= before[0].audit.updated_at);
}

#[test]
fn failed_upsert_applies_nothing() {
    let mut s = session();
    let writer = BulkWriter::new(Dialect::Sqlite);
    // The negative quantity violates the CHECK constraint.
    let err = writer
        .upsert_blocking::<Widget, _>(&mut s, &payload(&[("a", 1), ("b", -1)]), &["name"])
        .unwrap_err();
    match err {
        CrudError::BulkOperation(failure) => {
            assert_eq!(failure.total, 2);
            assert_eq!(failure.failed, 2);
            assert!(!failure.errors.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(count(&s, "widgets"), 0);
}

#[test]
fn upsert_rejects_bad_payloads() {
    let mut s = session();
    let writer = BulkWriter::new(Dialect::Sqlite);
    let missing_key = payload(&[("a", 1)]);
    assert!(writer.upsert_blocking::<Widget, _>(&mut s, &missing_key, &["color"]).unwrap_err().is_validation());
    assert!(writer.upsert_blocking::<Widget, _>(&mut s, &[], &["name"]).unwrap_err().is_validation());
}

#[test]
fn writer_refuses_a_session_of_another_dialect() {
    let mut s = session();
    let err = BulkWriter::new(Dialect::Postgres)
        .upsert_blocking::<Widget, _>(&mut s, &payload(&[("a", 1)]), &["name"])
        .unwrap_err();
    assert!(matches!(err, CrudError::Config(_)));
}

#[test]
fn batch_insert_degrades_to_row_by_row() {
    let mut s = session();
    let records = vec![
        Widget::new("a", 1),
        Widget::new("b", -5),
        Widget::new("c", 3),
        Widget::new("d", 4),
    ];

    let outcome = blocking::insert_data_rows(&mut s, &records).unwrap();
    assert!(outcome.is_success());
    let report = outcome.into_payload();
    assert!(report.is_degraded());
    assert_eq!(report.succeeded().len(), 3);
    assert_eq!(report.failed().len(), 1);
    assert_eq!(report.failed()[0].name, "b");
    assert_eq!(count(&s, "widgets"), 3);

    match report.into_error() {
        Some(CrudError::BulkOperation(failure)) => {
            assert_eq!(failure.total, 4);
            assert_eq!(failure.failed, 1);
        }
        other => panic!("unexpected conversion: {other:?}"),
    }
}

#[test]
fn clean_batch_is_one_statement() {
    let mut s = session();
    let outcome = blocking::insert_data_rows(&mut s, &[Widget::new("a", 1), Widget::new("b", 2)]).unwrap();
    match outcome.into_payload() {
        InsertReport::Batch(rows) => {
            assert_eq!(rows.len(), 2);
            assert!(rows.iter().all(|w| w.id.is_some()));
        }
        other => panic!("expected a batch, got {other:?}"),
    }
}

#[test]
fn all_rows_failing_is_an_unsuccessful_outcome() {
    let mut s = session();
    let outcome = blocking::insert_data_rows(&mut s, &[Widget::new("a", -1), Widget::new("b", -2)]).unwrap();
    assert!(!outcome.is_success());
    assert_eq!(outcome.payload.failed().len(), 2);
}

#[tokio::test]
async fn async_upsert_and_insert() {
    let mut s = session();
    let writer = BulkWriter::new(Dialect::Sqlite);
    let rows: Vec<Widget> = writer.upsert(&mut s, &payload(&[("a", 1), ("b", 2)]), &["name"]).await.unwrap();
    assert_eq!(rows.len(), 2);

    let outcome = writer
        .insert_rows(&mut s, &[Widget::new("a", 5), Widget::new("c", 6)])
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.payload.succeeded().len(), 1);
    assert_eq!(outcome.payload.failed()[0].name, "a");
    assert_eq!(count(&s, "widgets"), 3);
}
