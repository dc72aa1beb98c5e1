//! Postgres round trips. Skipped unless `DATABASE_URL` is set.

#![cfg(feature = "postgres")]

use crudkit::crud::GetOrCreateOptions;
use crudkit::mixins::AuditFields;
use crudkit::session::PgSession;
use crudkit::session::postgres::PgConnection;
use crudkit::{BulkWriter, CrudConfig, Dialect, FieldMap, Filters, ListOptions, LoadOptions, Model, Value, crud};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Model)]
#[orm(table = "crudkit_it_parts")]
struct Part {
    #[orm(id)]
    id: Option<i64>,
    sku: String,
    qty: i64,
    #[orm(flatten)]
    audit: AuditFields,
}

async fn connect() -> Option<PgSession> {
    let config = CrudConfig::from_env().ok()?;
    config.database_url.as_ref()?;
    PgSession::from_config(&config).await.ok()
}

async fn parts_table(s: &PgSession) {
    s.connection()
        .client()
        .batch_execute(
            "DROP TABLE IF EXISTS crudkit_it_parts;
             CREATE TABLE crudkit_it_parts (
                 id BIGSERIAL PRIMARY KEY,
                 sku TEXT NOT NULL UNIQUE,
                 qty BIGINT NOT NULL CHECK (qty >= 0),
                 created_at TIMESTAMPTZ,
                 updated_at TIMESTAMPTZ,
                 created_by TEXT,
                 updated_by TEXT
             )",
        )
        .await
        .unwrap();
}

#[derive(Debug, Clone, PartialEq, Model)]
#[orm(table = "crudkit_it_gadgets")]
struct Gadget {
    #[orm(id)]
    id: Uuid,
    label: String,
    #[orm(flatten)]
    audit: AuditFields,
}

async fn gadget_table(s: &PgSession) {
    s.connection()
        .client()
        .batch_execute(
            "DROP TABLE IF EXISTS crudkit_it_gadgets;
             CREATE TABLE crudkit_it_gadgets (
                 id UUID PRIMARY KEY,
                 label TEXT NOT NULL,
                 created_at TIMESTAMPTZ,
                 updated_at TIMESTAMPTZ,
                 created_by TEXT,
                 updated_by TEXT
             )",
        )
        .await
        .unwrap();
}

fn sku(value: &str) -> FieldMap {
    FieldMap::from([("sku".to_string(), Value::from(value))])
}

#[tokio::test]
async fn postgres_get_or_create_and_upsert() {
    let Some(mut s) = connect().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    parts_table(&s).await;

    let options = GetOrCreateOptions::new().default_value("qty", 2);
    let first = crud::get_one_or_create::<Part, _>(&mut s, &sku("p-1"), &options).await.unwrap();
    let second = crud::get_one_or_create::<Part, _>(&mut s, &sku("p-1"), &options).await.unwrap();
    assert!(!first.exists);
    assert!(second.exists);
    assert_eq!(first.record.id, second.record.id);

    let mut entry = sku("p-1");
    entry.insert("qty".into(), Value::from(9));
    let rows: Vec<Part> = BulkWriter::new(Dialect::Postgres)
        .upsert(&mut s, &[entry], &["sku"])
        .await
        .unwrap();
    assert_eq!(rows[0].qty, 9);
    assert_eq!(rows[0].audit.created_at, first.record.audit.created_at);

    let listed = crud::get_rows::<Part, _>(&mut s, &Filters::new().lte("qty", "9"), &ListOptions::new())
        .await
        .unwrap();
    assert_eq!(listed.payload.len(), 1);
}

#[tokio::test]
async fn postgres_text_parameters_bind_to_typed_columns() {
    let Some(mut s) = connect().await else {
        eprintln!("DATABASE_URL not set; skipping");
        return;
    };
    gadget_table(&s).await;

    let gadget = Gadget {
        id: Uuid::new_v4(),
        label: "dial".to_string(),
        audit: AuditFields::default(),
    };
    assert!(crud::write_row(&mut s, &gadget).await.unwrap().is_success());

    let found = crud::get_row::<Gadget, _>(&mut s, gadget.id.to_string(), &LoadOptions::new())
        .await
        .unwrap()
        .into_payload();
    assert_eq!(found.map(|g| g.id), Some(gadget.id));

    let filters = Filters::new()
        .gte("updated_at", "2000-01-01")
        .lte("created_at", "2999-12-31");
    let listed = crud::get_rows::<Gadget, _>(&mut s, &filters, &ListOptions::new())
        .await
        .unwrap();
    assert_eq!(listed.payload.len(), 1);
}
