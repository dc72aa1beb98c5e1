//! Statement planning shared by the async and blocking helpers.
//!
//! Everything here is pure: it turns records and options into structured
//! statements, so the two flavors differ only in how they drive a session.

use crate::error::{CrudError, CrudResult};
use crate::filter::ListOptions;
use crate::mixins;
use crate::model::{FieldMap, Model, Schema, column_fields};
use crate::query::{DeleteStatement, InsertStatement, OnConflict, Predicate, SelectQuery, UpdateStatement};
use crate::value::Value;
use chrono::{DateTime, Utc};

/// Columns an upsert never overwrites on an existing row.
pub(crate) const CREATION_FIELDS: [&str; 2] = ["created_at", "created_by"];

pub(crate) fn decode<M: Model>(rows: Vec<FieldMap>) -> CrudResult<Vec<M>> {
    rows.into_iter().map(M::from_fields).collect()
}

/// Restrict to schema columns, drop a null primary key and stamp audit fields.
pub(crate) fn prepare_insert(schema: &Schema, fields: FieldMap, now: DateTime<Utc>) -> FieldMap {
    let mut fields = column_fields(schema, fields);
    if fields.get(schema.primary_key).is_some_and(Value::is_null) {
        fields.remove(schema.primary_key);
    }
    if schema.is_audited() {
        mixins::stamp_created(&mut fields, now);
    }
    if schema.supports_soft_delete() {
        fields
            .entry("is_deleted".to_string())
            .or_insert(Value::Bool(false));
    }
    fields
}

pub(crate) fn insertable<M: Model>(record: &M, now: DateTime<Utc>) -> FieldMap {
    prepare_insert(M::schema(), record.to_fields(), now)
}

pub(crate) fn by_key<M: Model>(id: &Value) -> SelectQuery {
    SelectQuery::for_model::<M>().filter(Predicate::eq(M::schema().primary_key, id.clone()))
}

/// Keys that identify an inserted row when the store cannot return it.
fn identity_keys(schema: &Schema, row: &FieldMap) -> Vec<String> {
    match row.get(schema.primary_key) {
        Some(v) if !v.is_null() => vec![schema.primary_key.to_string()],
        _ => row
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, _)| k.clone())
            .collect(),
    }
}

/// Follow-up selects that re-read inserted rows on stores without RETURNING.
pub(crate) fn refetch_queries(schema: &Schema, stmt: &InsertStatement, rows: &[FieldMap]) -> Vec<SelectQuery> {
    rows.iter()
        .map(|row| {
            let keys = match &stmt.on_conflict {
                Some(OnConflict::Update { keys, .. }) => keys.clone(),
                _ => identity_keys(schema, row),
            };
            keys.iter()
                .fold(SelectQuery::new(schema.table), |q, k| {
                    q.filter(Predicate::eq(k.as_str(), row.get(k).cloned().unwrap_or(Value::Null)))
                })
                .order_by(schema.primary_key, true)
                .limit(1)
        })
        .collect()
}

/// UPDATE of one row by primary key, validated against the schema.
pub(crate) fn update_statement<M: Model>(
    id: &Value,
    changes: &FieldMap,
    now: DateTime<Utc>,
) -> CrudResult<UpdateStatement> {
    let schema = M::schema();
    if changes.is_empty() {
        return Err(CrudError::validation("no changes given"));
    }
    schema.check_fields(changes.keys().map(String::as_str))?;
    if let Some(v) = changes.get(schema.primary_key) {
        if v != id {
            return Err(CrudError::invalid_field(
                schema.primary_key,
                Some(v.to_string()),
                "primary key cannot be changed",
            ));
        }
    }

    let mut changes = changes.clone();
    changes.remove(schema.primary_key);
    if schema.is_audited() {
        mixins::stamp_updated(&mut changes, now);
    }
    Ok(changes
        .into_iter()
        .fold(UpdateStatement::new(schema.table), |stmt, (k, v)| stmt.set(k, v))
        .filter(Predicate::eq(schema.primary_key, id.clone()))
        .returning(true))
}

pub(crate) fn delete_statement<M: Model>(id: &Value) -> DeleteStatement {
    DeleteStatement::new(M::schema().table)
        .filter(Predicate::eq(M::schema().primary_key, id.clone()))
        .returning(true)
}

/// Apply listing options to a caller-built query.
pub(crate) fn with_list_options<M: Model>(mut query: SelectQuery, options: &ListOptions) -> CrudResult<SelectQuery> {
    let schema = M::schema();
    if query.table != schema.table {
        return Err(CrudError::invalid_field(
            "table",
            Some(query.table.clone()),
            format!("query does not target {}", schema.table),
        ));
    }
    if schema.supports_soft_delete()
        && !options.include_deleted
        && !query.predicates.iter().any(|p| p.field() == "is_deleted")
    {
        query = query.filter(Predicate::eq("is_deleted", false));
    }
    for load in &options.load.eager {
        query = query.eager(load.clone());
    }
    query.check_against(schema)?;
    query.paginate(options.page, options.page_size)
}

pub(crate) fn require_soft_delete(schema: &Schema) -> CrudResult<()> {
    if schema.supports_soft_delete() {
        Ok(())
    } else {
        Err(CrudError::validation(format!(
            "{} does not support soft delete",
            schema.table
        )))
    }
}

/// Lookup fields and values as error text.
pub(crate) fn describe_lookup(lookup: &FieldMap) -> (String, String) {
    let keys = lookup.keys().cloned().collect::<Vec<_>>().join(",");
    let values = lookup
        .values()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    (keys, values)
}

/// Creation row of get-or-create: defaults overlaid with the lookup.
pub(crate) fn creation_fields(lookup: &FieldMap, defaults: &FieldMap) -> FieldMap {
    let mut fields = defaults.clone();
    fields.extend(lookup.iter().map(|(k, v)| (k.clone(), v.clone())));
    fields
}

pub(crate) fn log_write_failure(operation: &'static str, table: &str, error: &CrudError) {
    tracing::error!(
        target: "crudkit",
        operation,
        table,
        error = %error,
        "write failed, rolling back"
    );
}

pub(crate) fn log_rollback_failure(operation: &'static str, error: &CrudError) {
    tracing::error!(target: "crudkit", operation, error = %error, "rollback failed");
}
