//! Bulk writes.
//!
//! [`BulkWriter`] offers two batch operations:
//!
//! - [`upsert`](BulkWriter::upsert): one native upsert statement for a list of
//!   field maps. It is all-or-nothing; any store failure rolls back and raises
//!   [`CrudError::BulkOperation`].
//! - [`insert_rows`](BulkWriter::insert_rows): one batched INSERT. If it fails,
//!   the batch is rolled back and every record is retried on its own, and the
//!   result partitions the records into written and failed ones.
//!
//! # Example
//! ```ignore
//! use crudkit::bulk::BulkWriter;
//!
//! let writer = BulkWriter::new(Dialect::Postgres);
//! let stock: Vec<Stock> = writer.upsert(&mut session, &payload, &["sku"]).await?;
//! ```

use crate::blocking;
use crate::config::CrudConfig;
use crate::crud;
use crate::dialect::Dialect;
use crate::error::{BulkFailure, CrudError, CrudResult};
use crate::model::{FieldMap, Model};
use crate::outcome::{InsertReport, Outcome};
use crate::plan;
use crate::query::{InsertStatement, OnConflict};
use crate::session::{BlockingSession, Session};
use chrono::Utc;

/// Batch writer bound to one dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkWriter {
    dialect: Dialect,
}

impl BulkWriter {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    pub fn from_config(config: &CrudConfig) -> Self {
        Self::new(config.dialect)
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn check_session(&self, session: Dialect) -> CrudResult<()> {
        if session == self.dialect {
            Ok(())
        } else {
            Err(CrudError::Config(format!(
                "bulk writer configured for {} but the session speaks {}",
                self.dialect, session
            )))
        }
    }

    /// Validate an upsert payload and build its statement.
    fn plan_upsert<M: Model>(&self, payload: &[FieldMap], key_fields: &[&str]) -> CrudResult<(InsertStatement, Vec<FieldMap>)> {
        let schema = M::schema();
        let Some(first) = payload.first() else {
            return Err(CrudError::validation("upsert payload is empty"));
        };
        if key_fields.is_empty() {
            return Err(CrudError::validation("upsert needs at least one key field"));
        }
        for key in key_fields {
            schema.require_field(key)?;
            if !first.contains_key(*key) {
                return Err(CrudError::invalid_field(
                    *key,
                    None,
                    "key field missing from the payload",
                ));
            }
        }
        schema.check_fields(first.keys().map(String::as_str))?;
        for (i, row) in payload.iter().enumerate().skip(1) {
            if !row.keys().eq(first.keys()) {
                return Err(CrudError::invalid_field(
                    "payload",
                    Some(format!("entry {i}")),
                    "all entries must carry the same fields",
                ));
            }
        }

        let now = Utc::now();
        let rows: Vec<FieldMap> = payload
            .iter()
            .map(|row| {
                let mut row = row.clone();
                if schema.is_audited() {
                    crate::mixins::stamp_created(&mut row, now);
                }
                row
            })
            .collect();
        let keep = plan::CREATION_FIELDS
            .iter()
            .filter(|f| !key_fields.contains(*f))
            .map(|f| f.to_string())
            .collect();
        let stmt = InsertStatement::from_rows(schema.table, &rows)?
            .on_conflict(OnConflict::Update {
                keys: key_fields.iter().map(|k| k.to_string()).collect(),
                keep,
            })
            .returning(true);
        // Render once so identifier problems surface before anything is written.
        stmt.render(self.dialect)?;
        Ok((stmt, rows))
    }

    fn upsert_failure(total: usize, error: &CrudError) -> CrudError {
        CrudError::BulkOperation(BulkFailure::new(total, total, vec![error.to_string()]))
    }

    /// Insert or update every payload entry in one statement.
    pub async fn upsert<M: Model, S: Session>(
        &self,
        session: &mut S,
        payload: &[FieldMap],
        key_fields: &[&str],
    ) -> CrudResult<Vec<M>> {
        self.check_session(session.dialect())?;
        let (stmt, rows) = self.plan_upsert::<M>(payload, key_fields)?;

        let result = async {
            let written = crud::run_insert(session, M::schema(), &stmt, &rows).await?;
            session.commit().await?;
            Ok::<_, CrudError>(written)
        }
        .await;

        match result {
            Ok(written) => {
                tracing::info!(
                    target: "crudkit",
                    table = M::schema().table,
                    rows = written.len(),
                    "bulk upsert committed"
                );
                plan::decode(written)
            }
            Err(e) => {
                plan::log_write_failure("bulk_upsert", M::schema().table, &e);
                crud::rollback_quietly(session, "bulk_upsert").await;
                Err(Self::upsert_failure(payload.len(), &e))
            }
        }
    }

    /// Blocking [`upsert`](Self::upsert).
    pub fn upsert_blocking<M: Model, S: BlockingSession>(
        &self,
        session: &mut S,
        payload: &[FieldMap],
        key_fields: &[&str],
    ) -> CrudResult<Vec<M>> {
        self.check_session(session.dialect())?;
        let (stmt, rows) = self.plan_upsert::<M>(payload, key_fields)?;

        let result = blocking::run_insert(session, M::schema(), &stmt, &rows)
            .and_then(|written| session.commit().map(|()| written));

        match result {
            Ok(written) => {
                tracing::info!(
                    target: "crudkit",
                    table = M::schema().table,
                    rows = written.len(),
                    "bulk upsert committed"
                );
                plan::decode(written)
            }
            Err(e) => {
                plan::log_write_failure("bulk_upsert", M::schema().table, &e);
                blocking::rollback_quietly(session, "bulk_upsert");
                Err(Self::upsert_failure(payload.len(), &e))
            }
        }
    }

    /// One batched INSERT, degrading to row-by-row inserts if it fails.
    ///
    /// The outcome is successful iff at least one record was written.
    pub async fn insert_rows<M: Model + Clone, S: Session>(
        &self,
        session: &mut S,
        records: &[M],
    ) -> CrudResult<Outcome<InsertReport<M>>> {
        self.check_session(session.dialect())?;
        if records.is_empty() {
            return Ok(Outcome::new(false, InsertReport::Batch(Vec::new())));
        }
        let schema = M::schema();
        let now = Utc::now();
        let rows: Vec<FieldMap> = records.iter().map(|r| plan::insertable(r, now)).collect();

        if let Some(stmt) = batch_statement(schema.table, &rows) {
            let result = async {
                let written = crud::run_insert(session, schema, &stmt, &rows).await?;
                session.commit().await?;
                Ok::<_, CrudError>(written)
            }
            .await;
            match result {
                Ok(written) => return Ok(Outcome::ok(InsertReport::Batch(plan::decode(written)?))),
                Err(e) if e.is_validation() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        target: "crudkit",
                        table = schema.table,
                        rows = records.len(),
                        error = %e,
                        "batched insert failed, retrying row by row"
                    );
                    crud::rollback_quietly(session, "insert_rows").await;
                }
            }
        }

        let mut partition = Partition::default();
        for (idx, (record, row)) in records.iter().zip(&rows).enumerate() {
            let stmt = InsertStatement::from_rows(schema.table, std::slice::from_ref(row))?.returning(true);
            let result = async {
                let written = crud::run_insert(session, schema, &stmt, std::slice::from_ref(row)).await?;
                session.commit().await?;
                Ok::<_, CrudError>(written)
            }
            .await;
            if let Err(e) = &result {
                crud::rollback_quietly(session, "insert_rows").await;
                tracing::error!(target: "crudkit", table = schema.table, row = idx, error = %e, "row insert failed");
            }
            partition.record(idx, record, result)?;
        }
        Ok(partition.finish(schema.table))
    }

    /// Blocking [`insert_rows`](Self::insert_rows).
    pub fn insert_rows_blocking<M: Model + Clone, S: BlockingSession>(
        &self,
        session: &mut S,
        records: &[M],
    ) -> CrudResult<Outcome<InsertReport<M>>> {
        self.check_session(session.dialect())?;
        if records.is_empty() {
            return Ok(Outcome::new(false, InsertReport::Batch(Vec::new())));
        }
        let schema = M::schema();
        let now = Utc::now();
        let rows: Vec<FieldMap> = records.iter().map(|r| plan::insertable(r, now)).collect();

        if let Some(stmt) = batch_statement(schema.table, &rows) {
            let result = blocking::run_insert(session, schema, &stmt, &rows)
                .and_then(|written| session.commit().map(|()| written));
            match result {
                Ok(written) => return Ok(Outcome::ok(InsertReport::Batch(plan::decode(written)?))),
                Err(e) if e.is_validation() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        target: "crudkit",
                        table = schema.table,
                        rows = records.len(),
                        error = %e,
                        "batched insert failed, retrying row by row"
                    );
                    blocking::rollback_quietly(session, "insert_rows");
                }
            }
        }

        let mut partition = Partition::default();
        for (idx, (record, row)) in records.iter().zip(&rows).enumerate() {
            let stmt = InsertStatement::from_rows(schema.table, std::slice::from_ref(row))?.returning(true);
            let result = blocking::run_insert(session, schema, &stmt, std::slice::from_ref(row))
                .and_then(|written| session.commit().map(|()| written));
            if let Err(e) = &result {
                blocking::rollback_quietly(session, "insert_rows");
                tracing::error!(target: "crudkit", table = schema.table, row = idx, error = %e, "row insert failed");
            }
            partition.record(idx, record, result)?;
        }
        Ok(partition.finish(schema.table))
    }
}

/// The batched statement, or `None` when the records carry different
/// field sets and must go one by one.
fn batch_statement(table: &str, rows: &[FieldMap]) -> Option<InsertStatement> {
    match InsertStatement::from_rows(table, rows) {
        Ok(stmt) => Some(stmt.returning(true)),
        Err(e) => {
            tracing::debug!(target: "crudkit", table, error = %e, "records differ in fields, skipping batch");
            None
        }
    }
}

struct Partition<M> {
    succeeded: Vec<M>,
    failed: Vec<M>,
    errors: Vec<String>,
}

impl<M> Default for Partition<M> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<M: Model + Clone> Partition<M> {
    fn record(&mut self, idx: usize, record: &M, result: CrudResult<Vec<FieldMap>>) -> CrudResult<()> {
        match result {
            Ok(written) => match plan::decode::<M>(written)?.into_iter().next() {
                Some(saved) => self.succeeded.push(saved),
                None => {
                    self.failed.push(record.clone());
                    self.errors.push(format!("row {idx}: insert returned no row"));
                }
            },
            Err(e) => {
                self.failed.push(record.clone());
                self.errors.push(format!("row {idx}: {e}"));
            }
        }
        Ok(())
    }

    fn finish(self, table: &str) -> Outcome<InsertReport<M>> {
        tracing::info!(
            target: "crudkit",
            table,
            succeeded = self.succeeded.len(),
            failed = self.failed.len(),
            "row-by-row insert finished"
        );
        Outcome::new(
            !self.succeeded.is_empty(),
            InsertReport::Partitioned {
                succeeded: self.succeeded,
                failed: self.failed,
                errors: self.errors,
            },
        )
    }
}
