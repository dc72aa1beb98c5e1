//! Result shapes returned by the CRUD helpers.

use crate::error::{BulkFailure, CrudError};

/// Success flag plus payload.
///
/// The flag is set explicitly by each helper; it is never derived from the
/// payload being empty or not.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub success: bool,
    pub payload: T,
}

impl<T> Outcome<T> {
    pub fn new(success: bool, payload: T) -> Self {
        Self { success, payload }
    }

    pub fn ok(payload: T) -> Self {
        Self::new(true, payload)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn into_parts(self) -> (bool, T) {
        (self.success, self.payload)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome::new(self.success, f(self.payload))
    }
}

impl<T> Outcome<Option<T>> {
    /// The failed single-row outcome.
    pub fn failed() -> Self {
        Self::new(false, None)
    }

    /// Success iff a record is present.
    pub fn from_option(record: Option<T>) -> Self {
        Self::new(record.is_some(), record)
    }
}

impl<T> Outcome<Vec<T>> {
    /// Success iff the list is non-empty.
    pub fn from_rows(rows: Vec<T>) -> Self {
        Self::new(!rows.is_empty(), rows)
    }
}

/// What a plain bulk insert wrote.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertReport<M> {
    /// The single batched insert succeeded.
    Batch(Vec<M>),
    /// The batch failed and rows were retried one by one.
    Partitioned {
        succeeded: Vec<M>,
        failed: Vec<M>,
        errors: Vec<String>,
    },
}

impl<M> InsertReport<M> {
    pub fn succeeded(&self) -> &[M] {
        match self {
            InsertReport::Batch(rows) => rows,
            InsertReport::Partitioned { succeeded, .. } => succeeded,
        }
    }

    pub fn failed(&self) -> &[M] {
        match self {
            InsertReport::Batch(_) => &[],
            InsertReport::Partitioned { failed, .. } => failed,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, InsertReport::Partitioned { .. })
    }

    /// `BulkOperation` error for a partition with failures.
    pub fn into_error(self) -> Option<CrudError> {
        match self {
            InsertReport::Partitioned {
                succeeded,
                failed,
                errors,
            } if !failed.is_empty() => Some(CrudError::BulkOperation(BulkFailure::new(
                succeeded.len() + failed.len(),
                failed.len(),
                errors,
            ))),
            _ => None,
        }
    }
}

/// Result of `get_one_or_create`.
#[derive(Debug, Clone, PartialEq)]
pub struct GetOrCreate<M> {
    pub record: M,
    /// The record was already present.
    pub exists: bool,
}
