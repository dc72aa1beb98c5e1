//! Soft delete and restore, blocking flavor, on in-memory SQLite.

mod common;

use common::{Tag, Widget, count, session};
use crudkit::{Filters, ListOptions, LoadOptions, blocking};

#[test]
fn soft_deleted_rows_leave_listings() {
    let mut s = session();
    blocking::insert_data_rows(&mut s, &[Widget::new("a", 1), Widget::new("b", 2)]).unwrap();

    let deleted = blocking::soft_delete_row::<Widget, _>(&mut s, 1, Some("ana")).unwrap();
    let record = deleted.into_payload().unwrap();
    assert!(record.deletion.is_deleted);
    assert_eq!(record.deletion.deleted_by.as_deref(), Some("ana"));
    assert!(record.deletion.deleted_at.is_some());
    assert_eq!(count(&s, "widgets"), 2);

    let live = blocking::get_rows::<Widget, _>(&mut s, &Filters::new(), &ListOptions::new()).unwrap();
    assert_eq!(live.payload.len(), 1);
    assert_eq!(live.payload[0].name, "b");

    let all = blocking::get_rows::<Widget, _>(&mut s, &Filters::new(), &ListOptions::new().include_deleted(true)).unwrap();
    assert_eq!(all.payload.len(), 2);

    // Lookup by key still sees the row.
    let by_key = blocking::get_row::<Widget, _>(&mut s, 1, &LoadOptions::new()).unwrap();
    assert!(by_key.is_success());
}

#[test]
fn restore_brings_the_row_back() {
    let mut s = session();
    blocking::insert_data_rows(&mut s, &[Widget::new("a", 1)]).unwrap();
    blocking::soft_delete_row::<Widget, _>(&mut s, 1, None).unwrap();

    let restored = blocking::restore_row::<Widget, _>(&mut s, 1).unwrap().into_payload().unwrap();
    assert!(!restored.deletion.is_deleted);
    assert_eq!(restored.deletion.deleted_at, None);

    let live = blocking::get_rows::<Widget, _>(&mut s, &Filters::new(), &ListOptions::new()).unwrap();
    assert_eq!(live.payload.len(), 1);
}

#[test]
fn explicit_is_deleted_filter_wins() {
    let mut s = session();
    blocking::insert_data_rows(&mut s, &[Widget::new("a", 1), Widget::new("b", 2)]).unwrap();
    blocking::soft_delete_row::<Widget, _>(&mut s, 2, None).unwrap();

    let trash = blocking::get_rows::<Widget, _>(&mut s, &Filters::new().with("is_deleted", true), &ListOptions::new()).unwrap();
    assert_eq!(trash.payload.len(), 1);
    assert_eq!(trash.payload[0].name, "b");
}

#[test]
fn models_without_the_flag_reject_soft_delete() {
    let mut s = session();
    let err = blocking::soft_delete_row::<Tag, _>(&mut s, 1, None).unwrap_err();
    assert!(err.is_validation());
    assert!(blocking::restore_row::<Tag, _>(&mut s, 1).unwrap_err().is_validation());
}
