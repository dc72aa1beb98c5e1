//! Async CRUD helpers.
//!
//! Every helper takes the caller's [`Session`] and a model type. Reads return
//! [`Outcome`] values whose flag says whether anything was found. Single-row
//! writes never raise store failures: they roll back, log at ERROR and return
//! a failed outcome. Validation problems in the caller's input always raise.
//!
//! The blocking mirror lives in [`crate::blocking`].
//!
//! # Example
//! ```ignore
//! use crudkit::prelude::*;
//!
//! let filters = Filters::new().with("status", "open").gte("due_date", "2024-01-01");
//! let page = crud::get_rows::<Ticket, _>(&mut session, &filters, &ListOptions::new().page(2, 25)).await?;
//! if page.is_success() {
//!     for ticket in page.into_payload() { /* ... */ }
//! }
//! ```

use crate::bulk::BulkWriter;
use crate::eager;
use crate::error::{CrudError, CrudResult};
use crate::filter::{self, Filters, ListOptions, LoadOptions};
use crate::mixins;
use crate::model::{FieldMap, Model, Schema};
use crate::outcome::{GetOrCreate, InsertReport, Outcome};
use crate::plan;
use crate::query::{InsertStatement, OnConflict, Predicate, SelectQuery};
use crate::reduce::{ReduceMode, Reduced, bound_lookup, ensure_ordering};
use crate::session::Session;
use crate::value::Value;
use chrono::Utc;

/// Options of [`get_one_or_create`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GetOrCreateOptions {
    /// Extra fields for a newly created row. Lookup values win on overlap.
    pub defaults: FieldMap,
    /// Relation loaded on the returned record.
    pub eager_relation: Option<String>,
    pub mode: ReduceMode,
}

impl GetOrCreateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defaults(mut self, defaults: FieldMap) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn default_value(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    pub fn eager_relation(mut self, relation: impl Into<String>) -> Self {
        self.eager_relation = Some(relation.into());
        self
    }

    pub fn mode(mut self, mode: ReduceMode) -> Self {
        self.mode = mode;
        self
    }
}

// ==================== Session plumbing ====================

pub(crate) async fn rollback_quietly<S: Session>(session: &mut S, operation: &'static str) {
    if let Err(e) = session.rollback().await {
        plan::log_rollback_failure(operation, &e);
    }
}

/// Run an INSERT and return the written rows.
///
/// Stores without RETURNING re-read the rows with follow-up selects.
pub(crate) async fn run_insert<S: Session>(
    session: &mut S,
    schema: &Schema,
    stmt: &InsertStatement,
    rows: &[FieldMap],
) -> CrudResult<Vec<FieldMap>> {
    let dialect = session.dialect();
    let sql = stmt.render(dialect)?;
    if dialect.supports_returning() && stmt.returning {
        return session.fetch_all(&sql).await;
    }
    let affected = session.execute(&sql).await?;
    if !stmt.returning || (affected == 0 && stmt.on_conflict == Some(OnConflict::DoNothing)) {
        return Ok(Vec::new());
    }
    let mut written = Vec::with_capacity(rows.len());
    for query in plan::refetch_queries(schema, stmt, rows) {
        written.extend(session.fetch_all(&query.render(dialect)?).await?.into_iter().take(1));
    }
    Ok(written)
}

async fn fetch<S: Session>(session: &mut S, query: &SelectQuery) -> CrudResult<Vec<FieldMap>> {
    let sql = query.render(session.dialect())?;
    session.fetch_all(&sql).await
}

/// Turn a failed single-row write into a failed outcome.
async fn write_failed<S: Session, T>(
    session: &mut S,
    operation: &'static str,
    table: &str,
    error: CrudError,
) -> CrudResult<Outcome<Option<T>>> {
    if error.is_validation() {
        return Err(error);
    }
    plan::log_write_failure(operation, table, &error);
    rollback_quietly(session, operation).await;
    Ok(Outcome::failed())
}

// ==================== Reads ====================

/// Run a single-row lookup through the reducer and load its eager relations.
pub async fn get_result_from_query<M: Model, S: Session>(
    session: &mut S,
    query: SelectQuery,
    mode: ReduceMode,
) -> CrudResult<Option<M>> {
    let schema = M::schema();
    query.check_against(schema)?;
    let query = bound_lookup(ensure_ordering(query, schema.primary_key), mode);
    let rows = fetch(session, &query).await?;
    let Some(row) = mode.apply(Reduced::from_rows(rows), schema.table, &query)? else {
        return Ok(None);
    };
    let mut record = M::from_fields(row)?;
    eager::load_immediate(session, std::slice::from_mut(&mut record), &query.eager).await?;
    Ok(Some(record))
}

/// Fetch one row by primary key. More than one match raises `MultipleFound`.
pub async fn get_row<M: Model, S: Session>(
    session: &mut S,
    id: impl Into<Value>,
    load: &LoadOptions,
) -> CrudResult<Outcome<Option<M>>> {
    let query = load
        .eager
        .iter()
        .fold(plan::by_key::<M>(&id.into()), |q, l| q.eager(l.clone()));
    let record = get_result_from_query(session, query, ReduceMode::Strict).await?;
    Ok(Outcome::from_option(record))
}

async fn fetch_list<M: Model, S: Session>(session: &mut S, query: SelectQuery) -> CrudResult<Outcome<Vec<M>>> {
    let rows = fetch(session, &query).await?;
    let mut records = plan::decode::<M>(rows)?;
    eager::load_immediate(session, &mut records, &query.eager).await?;
    tracing::debug!(
        target: "crudkit",
        table = query.table.as_str(),
        rows = records.len(),
        offset = query.offset,
        "listed rows"
    );
    Ok(Outcome::from_rows(records))
}

/// Filtered, sorted and paginated listing.
pub async fn get_rows<M: Model, S: Session>(
    session: &mut S,
    filters: &Filters,
    options: &ListOptions,
) -> CrudResult<Outcome<Vec<M>>> {
    let query = filter::resolve(M::schema(), filters, options)?;
    fetch_list(session, query).await
}

/// Listing over a caller-built query; pagination and soft-delete filtering
/// still apply.
pub async fn get_rows_with_query<M: Model, S: Session>(
    session: &mut S,
    query: SelectQuery,
    options: &ListOptions,
) -> CrudResult<Outcome<Vec<M>>> {
    let query = plan::with_list_options::<M>(query, options)?;
    fetch_list(session, query).await
}

/// Rows whose primary key is in `ids`. An empty list issues no query.
pub async fn get_rows_within_id_list<M, S, I>(session: &mut S, ids: I) -> CrudResult<Outcome<Vec<M>>>
where
    M: Model,
    S: Session,
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
    if ids.is_empty() {
        return Ok(Outcome::new(false, Vec::new()));
    }
    let query = SelectQuery::for_model::<M>().filter(Predicate::in_list(M::schema().primary_key, ids));
    fetch_list(session, query).await
}

// ==================== Writes ====================

/// Insert one record and commit.
pub async fn write_row<M: Model, S: Session>(session: &mut S, record: &M) -> CrudResult<Outcome<Option<M>>> {
    let schema = M::schema();
    let row = plan::insertable(record, Utc::now());
    let stmt = InsertStatement::from_rows(schema.table, std::slice::from_ref(&row))?.returning(true);

    let result = async {
        let written = run_insert(session, schema, &stmt, std::slice::from_ref(&row)).await?;
        session.commit().await?;
        plan::decode::<M>(written)
    }
    .await;

    match result {
        Ok(written) => Ok(Outcome::from_option(written.into_iter().next())),
        Err(e) => write_failed(session, "write_row", schema.table, e).await,
    }
}

/// Batched insert with row-by-row fallback, see [`BulkWriter::insert_rows`].
pub async fn insert_data_rows<M: Model + Clone, S: Session>(
    session: &mut S,
    records: &[M],
) -> CrudResult<Outcome<InsertReport<M>>> {
    BulkWriter::new(session.dialect()).insert_rows(session, records).await
}

/// Native bulk upsert, see [`BulkWriter::upsert`].
pub async fn bulk_upsert_mappings<M: Model, S: Session>(
    session: &mut S,
    payload: &[FieldMap],
    key_fields: &[&str],
) -> CrudResult<Outcome<Vec<M>>> {
    let rows = BulkWriter::new(session.dialect())
        .upsert::<M, S>(session, payload, key_fields)
        .await?;
    Ok(Outcome::from_rows(rows))
}

async fn apply_update<M: Model, S: Session>(
    session: &mut S,
    operation: &'static str,
    id: Value,
    changes: &FieldMap,
) -> CrudResult<Outcome<Option<M>>> {
    let schema = M::schema();
    let stmt = plan::update_statement::<M>(&id, changes, Utc::now())?;

    let result = async {
        let dialect = session.dialect();
        let sql = stmt.render(dialect)?;
        let rows = if dialect.supports_returning() {
            session.fetch_all(&sql).await?
        } else if session.execute(&sql).await? > 0 {
            fetch(session, &plan::by_key::<M>(&id)).await?
        } else {
            Vec::new()
        };
        session.commit().await?;
        plan::decode::<M>(rows)
    }
    .await;

    match result {
        Ok(rows) => Ok(Outcome::from_option(rows.into_iter().next())),
        Err(e) => write_failed(session, operation, schema.table, e).await,
    }
}

/// Update one row by primary key. Unknown fields are rejected and
/// `updated_at` is stamped on audited models.
pub async fn update_row<M: Model, S: Session>(
    session: &mut S,
    id: impl Into<Value>,
    changes: &FieldMap,
) -> CrudResult<Outcome<Option<M>>> {
    apply_update(session, "update_row", id.into(), changes).await
}

/// Delete one row by primary key and return it.
pub async fn delete_row<M: Model, S: Session>(session: &mut S, id: impl Into<Value>) -> CrudResult<Outcome<Option<M>>> {
    let schema = M::schema();
    let id = id.into();
    let stmt = plan::delete_statement::<M>(&id);

    let result = async {
        let dialect = session.dialect();
        let rows = if dialect.supports_returning() {
            session.fetch_all(&stmt.render(dialect)?).await?
        } else {
            let rows = fetch(session, &plan::by_key::<M>(&id)).await?;
            session.execute(&stmt.render(dialect)?).await?;
            rows
        };
        session.commit().await?;
        plan::decode::<M>(rows)
    }
    .await;

    match result {
        Ok(rows) => Ok(Outcome::from_option(rows.into_iter().next())),
        Err(e) => write_failed(session, "delete_row", schema.table, e).await,
    }
}

/// Flag a row as deleted.
pub async fn soft_delete_row<M: Model, S: Session>(
    session: &mut S,
    id: impl Into<Value>,
    user: Option<&str>,
) -> CrudResult<Outcome<Option<M>>> {
    plan::require_soft_delete(M::schema())?;
    let changes = mixins::soft_delete_changes(user, Utc::now());
    apply_update(session, "soft_delete_row", id.into(), &changes).await
}

/// Clear the deleted flag of a row.
pub async fn restore_row<M: Model, S: Session>(session: &mut S, id: impl Into<Value>) -> CrudResult<Outcome<Option<M>>> {
    plan::require_soft_delete(M::schema())?;
    apply_update(session, "restore_row", id.into(), &mixins::restore_changes()).await
}

// ==================== Get or create ====================

/// Fetch the row matching `lookup` exactly, creating it when absent.
///
/// The insert uses the store's "insert or do nothing". When a concurrent
/// writer wins the race the lookup is re-run and the winner's row is
/// returned with `exists: true`. This only closes the race when a unique
/// constraint covers the lookup fields.
pub async fn get_one_or_create<M: Model, S: Session>(
    session: &mut S,
    lookup: &FieldMap,
    options: &GetOrCreateOptions,
) -> CrudResult<GetOrCreate<M>> {
    let schema = M::schema();
    let query = filter::resolve_lookup(schema, lookup)?;
    schema.check_fields(options.defaults.keys().map(String::as_str))?;
    if let Some(relation) = &options.eager_relation {
        schema.require_relation(relation)?;
    }

    if let Some(record) = get_result_from_query::<M, S>(session, query.clone(), options.mode).await? {
        return found(session, record, true, options).await;
    }

    let row = plan::prepare_insert(schema, plan::creation_fields(lookup, &options.defaults), Utc::now());
    let stmt = InsertStatement::from_rows(schema.table, std::slice::from_ref(&row))?
        .on_conflict(OnConflict::DoNothing)
        .returning(true);

    let result = async {
        let written = run_insert(session, schema, &stmt, std::slice::from_ref(&row)).await?;
        session.commit().await?;
        Ok::<_, CrudError>(written)
    }
    .await;

    let written = match result {
        Ok(written) => written,
        Err(e) => {
            plan::log_write_failure("get_one_or_create", schema.table, &e);
            rollback_quietly(session, "get_one_or_create").await;
            return Err(e);
        }
    };

    match written.into_iter().next() {
        Some(row) => {
            tracing::debug!(target: "crudkit", table = schema.table, "created row for lookup");
            found(session, M::from_fields(row)?, false, options).await
        }
        None => {
            tracing::info!(target: "crudkit", table = schema.table, "lost insert race, re-reading");
            match get_result_from_query::<M, S>(session, query, options.mode).await? {
                Some(record) => found(session, record, true, options).await,
                None => {
                    let (keys, values) = plan::describe_lookup(lookup);
                    Err(CrudError::not_found(schema.table, keys, values))
                }
            }
        }
    }
}

async fn found<M: Model, S: Session>(
    session: &mut S,
    mut record: M,
    exists: bool,
    options: &GetOrCreateOptions,
) -> CrudResult<GetOrCreate<M>> {
    if let Some(relation) = &options.eager_relation {
        eager::load_related(session, std::slice::from_mut(&mut record), relation).await?;
    }
    Ok(GetOrCreate { record, exists })
}
