//! Blocking CRUD helpers.
//!
//! Same operations and semantics as [`crate::crud`], driven through a
//! [`BlockingSession`]. Statement planning is shared, so both flavors issue
//! identical SQL.
//!
//! ```ignore
//! use crudkit::blocking::{self, BlockingSession};
//!
//! let outcome = blocking::transaction(&mut session, |tx| {
//!     let invoice = blocking::write_row(tx, &draft)?;
//!     blocking::update_row::<Order, _>(tx, order_id, &changes)?;
//!     Ok::<_, CrudError>(invoice)
//! })?;
//! ```

use crate::bulk::BulkWriter;
use crate::crud::GetOrCreateOptions;
use crate::eager;
use crate::error::{BoxError, CrudError, CrudResult};
use crate::filter::{self, Filters, ListOptions, LoadOptions};
use crate::mixins;
use crate::model::{FieldMap, Model, Schema};
use crate::outcome::{GetOrCreate, InsertReport, Outcome};
use crate::plan;
use crate::query::{InsertStatement, OnConflict, Predicate, SelectQuery};
use crate::reduce::{ReduceMode, Reduced, bound_lookup, ensure_ordering};
use crate::value::Value;
use chrono::Utc;

pub use crate::eager::load_related_blocking as load_related;
pub use crate::session::BlockingSession;
pub use crate::transaction::BlockingTransaction;

/// Run `f` as one unit of work: commit on `Ok`, roll back on `Err`.
///
/// Errors from `f` come back wrapped in [`CrudError::Transaction`].
pub fn transaction<S, T, E, F>(session: &mut S, f: F) -> CrudResult<T>
where
    S: BlockingSession,
    E: Into<BoxError>,
    F: FnOnce(&mut BlockingTransaction<'_, S>) -> Result<T, E>,
{
    crate::transaction::run_blocking(session, "transaction", f)
}

// ==================== Session plumbing ====================

pub(crate) fn rollback_quietly<S: BlockingSession>(session: &mut S, operation: &'static str) {
    if let Err(e) = session.rollback() {
        plan::log_rollback_failure(operation, &e);
    }
}

pub(crate) fn run_insert<S: BlockingSession>(
    session: &mut S,
    schema: &Schema,
    stmt: &InsertStatement,
    rows: &[FieldMap],
) -> CrudResult<Vec<FieldMap>> {
    let dialect = session.dialect();
    let sql = stmt.render(dialect)?;
    if dialect.supports_returning() && stmt.returning {
        return session.fetch_all(&sql);
    }
    let affected = session.execute(&sql)?;
    if !stmt.returning || (affected == 0 && stmt.on_conflict == Some(OnConflict::DoNothing)) {
        return Ok(Vec::new());
    }
    let mut written = Vec::with_capacity(rows.len());
    for query in plan::refetch_queries(schema, stmt, rows) {
        written.extend(session.fetch_all(&query.render(dialect)?)?.into_iter().take(1));
    }
    Ok(written)
}

fn fetch<S: BlockingSession>(session: &mut S, query: &SelectQuery) -> CrudResult<Vec<FieldMap>> {
    let sql = query.render(session.dialect())?;
    session.fetch_all(&sql)
}

fn write_failed<S: BlockingSession, T>(
    session: &mut S,
    operation: &'static str,
    table: &str,
    error: CrudError,
) -> CrudResult<Outcome<Option<T>>> {
    if error.is_validation() {
        return Err(error);
    }
    plan::log_write_failure(operation, table, &error);
    rollback_quietly(session, operation);
    Ok(Outcome::failed())
}

// ==================== Reads ====================

pub fn get_result_from_query<M: Model, S: BlockingSession>(
    session: &mut S,
    query: SelectQuery,
    mode: ReduceMode,
) -> CrudResult<Option<M>> {
    let schema = M::schema();
    query.check_against(schema)?;
    let query = bound_lookup(ensure_ordering(query, schema.primary_key), mode);
    let rows = fetch(session, &query)?;
    let Some(row) = mode.apply(Reduced::from_rows(rows), schema.table, &query)? else {
        return Ok(None);
    };
    let mut record = M::from_fields(row)?;
    eager::load_immediate_blocking(session, std::slice::from_mut(&mut record), &query.eager)?;
    Ok(Some(record))
}

pub fn get_row<M: Model, S: BlockingSession>(
    session: &mut S,
    id: impl Into<Value>,
    load: &LoadOptions,
) -> CrudResult<Outcome<Option<M>>> {
    let query = load
        .eager
        .iter()
        .fold(plan::by_key::<M>(&id.into()), |q, l| q.eager(l.clone()));
    let record = get_result_from_query(session, query, ReduceMode::Strict)?;
    Ok(Outcome::from_option(record))
}

fn fetch_list<M: Model, S: BlockingSession>(session: &mut S, query: SelectQuery) -> CrudResult<Outcome<Vec<M>>> {
    let rows = fetch(session, &query)?;
    let mut records = plan::decode::<M>(rows)?;
    eager::load_immediate_blocking(session, &mut records, &query.eager)?;
    tracing::debug!(
        target: "crudkit",
        table = query.table.as_str(),
        rows = records.len(),
        offset = query.offset,
        "listed rows"
    );
    Ok(Outcome::from_rows(records))
}

pub fn get_rows<M: Model, S: BlockingSession>(
    session: &mut S,
    filters: &Filters,
    options: &ListOptions,
) -> CrudResult<Outcome<Vec<M>>> {
    let query = filter::resolve(M::schema(), filters, options)?;
    fetch_list(session, query)
}

pub fn get_rows_with_query<M: Model, S: BlockingSession>(
    session: &mut S,
    query: SelectQuery,
    options: &ListOptions,
) -> CrudResult<Outcome<Vec<M>>> {
    let query = plan::with_list_options::<M>(query, options)?;
    fetch_list(session, query)
}

pub fn get_rows_within_id_list<M, S, I>(session: &mut S, ids: I) -> CrudResult<Outcome<Vec<M>>>
where
    M: Model,
    S: BlockingSession,
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
    if ids.is_empty() {
        return Ok(Outcome::new(false, Vec::new()));
    }
    let query = SelectQuery::for_model::<M>().filter(Predicate::in_list(M::schema().primary_key, ids));
    fetch_list(session, query)
}

// ==================== Writes ====================

pub fn write_row<M: Model, S: BlockingSession>(session: &mut S, record: &M) -> CrudResult<Outcome<Option<M>>> {
    let schema = M::schema();
    let row = plan::insertable(record, Utc::now());
    let stmt = InsertStatement::from_rows(schema.table, std::slice::from_ref(&row))?.returning(true);

    let result = run_insert(session, schema, &stmt, std::slice::from_ref(&row))
        .and_then(|written| session.commit().map(|()| written))
        .and_then(plan::decode::<M>);

    match result {
        Ok(written) => Ok(Outcome::from_option(written.into_iter().next())),
        Err(e) => write_failed(session, "write_row", schema.table, e),
    }
}

pub fn insert_data_rows<M: Model + Clone, S: BlockingSession>(
    session: &mut S,
    records: &[M],
) -> CrudResult<Outcome<InsertReport<M>>> {
    BulkWriter::new(session.dialect()).insert_rows_blocking(session, records)
}

pub fn bulk_upsert_mappings<M: Model, S: BlockingSession>(
    session: &mut S,
    payload: &[FieldMap],
    key_fields: &[&str],
) -> CrudResult<Outcome<Vec<M>>> {
    let rows = BulkWriter::new(session.dialect()).upsert_blocking::<M, S>(session, payload, key_fields)?;
    Ok(Outcome::from_rows(rows))
}

fn apply_update<M: Model, S: BlockingSession>(
    session: &mut S,
    operation: &'static str,
    id: Value,
    changes: &FieldMap,
) -> CrudResult<Outcome<Option<M>>> {
    let schema = M::schema();
    let stmt = plan::update_statement::<M>(&id, changes, Utc::now())?;

    let mut run = || -> CrudResult<Vec<M>> {
        let dialect = session.dialect();
        let sql = stmt.render(dialect)?;
        let rows = if dialect.supports_returning() {
            session.fetch_all(&sql)?
        } else if session.execute(&sql)? > 0 {
            fetch(session, &plan::by_key::<M>(&id))?
        } else {
            Vec::new()
        };
        session.commit()?;
        plan::decode::<M>(rows)
    };

    match run() {
        Ok(rows) => Ok(Outcome::from_option(rows.into_iter().next())),
        Err(e) => write_failed(session, operation, schema.table, e),
    }
}

pub fn update_row<M: Model, S: BlockingSession>(
    session: &mut S,
    id: impl Into<Value>,
    changes: &FieldMap,
) -> CrudResult<Outcome<Option<M>>> {
    apply_update(session, "update_row", id.into(), changes)
}

pub fn delete_row<M: Model, S: BlockingSession>(session: &mut S, id: impl Into<Value>) -> CrudResult<Outcome<Option<M>>> {
    let schema = M::schema();
    let id = id.into();
    let stmt = plan::delete_statement::<M>(&id);

    let mut run = || -> CrudResult<Vec<M>> {
        let dialect = session.dialect();
        let rows = if dialect.supports_returning() {
            session.fetch_all(&stmt.render(dialect)?)?
        } else {
            let rows = fetch(session, &plan::by_key::<M>(&id))?;
            session.execute(&stmt.render(dialect)?)?;
            rows
        };
        session.commit()?;
        plan::decode::<M>(rows)
    };

    match run() {
        Ok(rows) => Ok(Outcome::from_option(rows.into_iter().next())),
        Err(e) => write_failed(session, "delete_row", schema.table, e),
    }
}

pub fn soft_delete_row<M: Model, S: BlockingSession>(
    session: &mut S,
    id: impl Into<Value>,
    user: Option<&str>,
) -> CrudResult<Outcome<Option<M>>> {
    plan::require_soft_delete(M::schema())?;
    let changes = mixins::soft_delete_changes(user, Utc::now());
    apply_update(session, "soft_delete_row", id.into(), &changes)
}

pub fn restore_row<M: Model, S: BlockingSession>(session: &mut S, id: impl Into<Value>) -> CrudResult<Outcome<Option<M>>> {
    plan::require_soft_delete(M::schema())?;
    apply_update(session, "restore_row", id.into(), &mixins::restore_changes())
}

// ==================== Get or create ====================

/// Blocking [`crate::crud::get_one_or_create`].
pub fn get_one_or_create<M: Model, S: BlockingSession>(
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

    if let Some(record) = get_result_from_query::<M, S>(session, query.clone(), options.mode)? {
        return found(session, record, true, options);
    }

    let row = plan::prepare_insert(schema, plan::creation_fields(lookup, &options.defaults), Utc::now());
    let stmt = InsertStatement::from_rows(schema.table, std::slice::from_ref(&row))?
        .on_conflict(OnConflict::DoNothing)
        .returning(true);

    let written = match run_insert(session, schema, &stmt, std::slice::from_ref(&row))
        .and_then(|written| session.commit().map(|()| written))
    {
        Ok(written) => written,
        Err(e) => {
            plan::log_write_failure("get_one_or_create", schema.table, &e);
            rollback_quietly(session, "get_one_or_create");
            return Err(e);
        }
    };

    match written.into_iter().next() {
        Some(row) => {
            tracing::debug!(target: "crudkit", table = schema.table, "created row for lookup");
            found(session, M::from_fields(row)?, false, options)
        }
        None => {
            tracing::info!(target: "crudkit", table = schema.table, "lost insert race, re-reading");
            match get_result_from_query::<M, S>(session, query, options.mode)? {
                Some(record) => found(session, record, true, options),
                None => {
                    let (keys, values) = plan::describe_lookup(lookup);
                    Err(CrudError::not_found(schema.table, keys, values))
                }
            }
        }
    }
}

fn found<M: Model, S: BlockingSession>(
    session: &mut S,
    mut record: M,
    exists: bool,
    options: &GetOrCreateOptions,
) -> CrudResult<GetOrCreate<M>> {
    if let Some(relation) = &options.eager_relation {
        eager::load_related_blocking(session, std::slice::from_mut(&mut record), relation)?;
    }
    Ok(GetOrCreate { record, exists })
}
