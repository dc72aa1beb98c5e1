use super::*;
use crate::dialect::Dialect;
use crate::eager::LoadStrategy;
use crate::model::Relation;
use crate::query::CompareOp;
use chrono::NaiveDate;

fn schema() -> Schema {
    Schema::new("tasks")
        .fields(["id", "title", "status", "due_date", "priority", "is_deleted"])
        .relation(Relation::belongs_to("project", "projects", "project_id"))
}

#[test]
fn range_bounds_are_inclusive_and_coerced() {
    let filters = Filters::new()
        .lte("due_date", "2024-03-01")
        .gte("priority", "2");
    let q = resolve(&schema(), &filters, &ListOptions::default()).unwrap();

    assert!(q.predicates.contains(&Predicate::Compare {
        field: "due_date".into(),
        op: CompareOp::Lte,
        value: Value::Date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()),
    }));
    assert!(q.predicates.contains(&Predicate::Compare {
        field: "priority".into(),
        op: CompareOp::Gte,
        value: Value::Int(2),
    }));
}

#[test]
fn digits_on_non_date_fields_stay_text_for_equality() {
    let filters = Filters::new().with("status", "200");
    let q = resolve(&schema(), &filters, &ListOptions::default()).unwrap();
    assert!(q.predicates.contains(&Predicate::eq("status", "200")));
}

#[test]
fn sort_keys_are_extracted() {
    let filters = Filters::new().with("status", "open").with("sort_field", "priority").with("sort_desc", "true");
    let q = resolve(&schema(), &filters, &ListOptions::default()).unwrap();

    assert_eq!(q.order_by.len(), 1);
    assert_eq!(q.order_by[0].field, "priority");
    assert!(q.order_by[0].descending);
    assert!(q.predicates.iter().all(|p| p.field() != "sort_field"));
}

#[test]
fn offset_skips_whole_pages() {
    let opts = ListOptions::new().page(3, 25);
    let q = resolve(&schema(), &Filters::new(), &opts).unwrap();
    assert_eq!(q.offset, Some(50));
    assert_eq!(q.limit, Some(25));
}

#[test]
fn text_search_only_when_value_present() {
    let opts = ListOptions::new().text_field("title");

    let q = resolve(&schema(), &Filters::new(), &opts).unwrap();
    assert!(q.predicates.iter().all(|p| !matches!(p, Predicate::TextMatch { .. })));

    let q = resolve(&schema(), &Filters::new().with("title", "groceries"), &opts).unwrap();
    assert!(q.predicates.contains(&Predicate::text_match("title", "groceries")));
    assert!(!q.predicates.contains(&Predicate::eq("title", "groceries")));
}

#[test]
fn soft_deleted_rows_hidden_by_default() {
    let q = resolve(&schema(), &Filters::new(), &ListOptions::default()).unwrap();
    assert!(q.predicates.contains(&Predicate::eq("is_deleted", false)));

    let q = resolve(&schema(), &Filters::new(), &ListOptions::new().include_deleted(true)).unwrap();
    assert!(q.predicates.is_empty());

    let q = resolve(&schema(), &Filters::new().with("is_deleted", true), &ListOptions::default()).unwrap();
    assert_eq!(q.predicates, vec![Predicate::eq("is_deleted", true)]);
}

#[test]
fn unknown_fields_are_reported_together() {
    let filters = Filters::new()
        .with("colour", "red")
        .lte("size", 3)
        .with("sort_field", "weight");
    match resolve(&schema(), &filters, &ListOptions::default()).unwrap_err() {
        CrudError::Validation { errors, .. } => {
            let keys: Vec<_> = errors.keys().map(String::as_str).collect();
            assert_eq!(keys, ["colour", "size", "weight"]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn eager_directives_are_validated() {
    let opts = ListOptions::new().load(LoadOptions::new().lazy("project"));
    let q = resolve(&schema(), &Filters::new(), &opts).unwrap();
    assert_eq!(q.eager.len(), 1);
    assert_eq!(q.eager[0].strategy, LoadStrategy::Lazy);

    let opts = ListOptions::new().load(LoadOptions::new().immediate("owner"));
    assert!(resolve(&schema(), &Filters::new(), &opts).unwrap_err().is_validation());
}

#[test]
fn renders_for_sqlite() {
    let filters = Filters::new().with("status", "open").lte("due_date", "2024-03-01");
    let q = resolve(&schema(), &filters, &ListOptions::new().page(2, 10)).unwrap();
    let sql = q.render(Dialect::Sqlite).unwrap();
    assert_eq!(
        sql.to_sql_with(Dialect::Sqlite),
        "SELECT * FROM tasks WHERE due_date <= ?1 AND status = ?2 AND is_deleted = ?3 LIMIT 10 OFFSET 10"
    );
}

#[test]
fn lookup_rejects_suffixes_and_empty() {
    let s = schema();
    assert!(resolve_lookup(&s, &FieldMap::new()).is_err());

    let lookup = FieldMap::from([("due_date__lte".to_string(), Value::from("2024-01-01"))]);
    assert!(resolve_lookup(&s, &lookup).unwrap_err().is_validation());

    let lookup = FieldMap::from([("title".to_string(), Value::from("a"))]);
    assert_eq!(resolve_lookup(&s, &lookup).unwrap().predicates, vec![Predicate::eq("title", "a")]);
}
