//! Transaction scopes.
//!
//! A scope commits on normal exit. If its body fails, the unit of work is
//! rolled back and the failure is raised as [`CrudError::Transaction`] with
//! the original error as its source.
//!
//! Inside a scope the CRUD helpers run against the scope itself: their
//! commits are deferred to the end of the scope, and a rollback they issue
//! (for instance after a failed `write_row`) poisons the scope so it ends in
//! failure instead of committing a partial unit of work.
//!
//! # Example
//!
//! ```ignore
//! use crudkit::prelude::*;
//!
//! let order = crudkit::transaction!(&mut session, tx, {
//!     let order = crud::write_row(&mut tx, &order).await?.into_payload();
//!     crud::update_row::<Stock, _>(&mut tx, item_id, &changes).await?;
//!     Ok(order)
//! })?;
//! ```

use crate::dialect::Dialect;
use crate::error::{BoxError, CrudError, CrudResult};
use crate::model::FieldMap;
use crate::plan::log_rollback_failure;
use crate::session::{BlockingSession, Session};
use crate::sql::Sql;

const NESTED: &str = "nested transactions are not supported";
const POISONED: &str = "the unit of work was rolled back inside the scope";

/// Runs the given block inside a transaction scope over a [`Session`].
///
/// - Commits on `Ok(_)`.
/// - Rolls back on `Err(_)` and returns `CrudError::Transaction`.
///
/// The block evaluates to `Result<T, BoxError>`, so `?` accepts any error
/// type. The macro itself evaluates to `CrudResult<T>`.
#[macro_export]
macro_rules! transaction {
    ($session:expr, $tx:ident, $body:block) => {
        $crate::transaction!($session, "transaction", $tx, $body)
    };
    ($session:expr, $operation:literal, $tx:ident, $body:block) => {{
        match $crate::transaction::Transaction::begin($session, $operation) {
            Err(error) => Err(error),
            Ok(mut $tx) => {
                let __crudkit_tx_result: ::core::result::Result<_, $crate::error::BoxError> =
                    async { $body }.await;
                $tx.finish(__crudkit_tx_result).await
            }
        }
    }};
}

/// An open async transaction scope.
pub struct Transaction<'a, S: Session> {
    session: &'a mut S,
    operation: &'static str,
    poisoned: bool,
}

impl<'a, S: Session> Transaction<'a, S> {
    /// Open a scope. Fails if `session` is already a scope.
    pub fn begin(session: &'a mut S, operation: &'static str) -> CrudResult<Self> {
        if session.in_scope() {
            return Err(CrudError::transaction(operation, NESTED));
        }
        tracing::debug!(target: "crudkit", operation, "transaction scope opened");
        Ok(Self {
            session,
            operation,
            poisoned: false,
        })
    }

    /// A helper rolled back inside the scope.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Close the scope with the body's result.
    pub async fn finish<T, E: Into<BoxError>>(mut self, result: Result<T, E>) -> CrudResult<T> {
        let operation = self.operation;
        match result {
            Ok(value) if !self.poisoned => match self.session.commit().await {
                Ok(()) => {
                    tracing::debug!(target: "crudkit", operation, "transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rb) = self.session.rollback().await {
                        log_rollback_failure(operation, &rb);
                    }
                    Err(CrudError::transaction(operation, e))
                }
            },
            Ok(_) => {
                if let Err(rb) = self.session.rollback().await {
                    log_rollback_failure(operation, &rb);
                }
                Err(CrudError::transaction(operation, POISONED))
            }
            Err(e) => {
                let cause: BoxError = e.into();
                tracing::warn!(
                    target: "crudkit",
                    operation,
                    error = %cause,
                    "transaction scope failed, rolling back"
                );
                if let Err(rb) = self.session.rollback().await {
                    log_rollback_failure(operation, &rb);
                }
                Err(CrudError::transaction(operation, cause))
            }
        }
    }
}

impl<S: Session> Session for Transaction<'_, S> {
    fn dialect(&self) -> Dialect {
        self.session.dialect()
    }

    async fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        self.session.fetch_all(sql).await
    }

    async fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        self.session.execute(sql).await
    }

    async fn commit(&mut self) -> CrudResult<()> {
        tracing::debug!(target: "crudkit", operation = self.operation, "commit deferred to scope end");
        Ok(())
    }

    async fn rollback(&mut self) -> CrudResult<()> {
        self.poisoned = true;
        self.session.rollback().await
    }

    fn in_scope(&self) -> bool {
        true
    }
}

/// An open blocking transaction scope.
pub struct BlockingTransaction<'a, S: BlockingSession> {
    session: &'a mut S,
    operation: &'static str,
    poisoned: bool,
}

impl<'a, S: BlockingSession> BlockingTransaction<'a, S> {
    /// Open a scope. Fails if `session` is already a scope.
    pub fn begin(session: &'a mut S, operation: &'static str) -> CrudResult<Self> {
        if session.in_scope() {
            return Err(CrudError::transaction(operation, NESTED));
        }
        tracing::debug!(target: "crudkit", operation, "transaction scope opened");
        Ok(Self {
            session,
            operation,
            poisoned: false,
        })
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Close the scope with the body's result.
    pub fn finish<T, E: Into<BoxError>>(mut self, result: Result<T, E>) -> CrudResult<T> {
        let operation = self.operation;
        match result {
            Ok(value) if !self.poisoned => match self.session.commit() {
                Ok(()) => {
                    tracing::debug!(target: "crudkit", operation, "transaction committed");
                    Ok(value)
                }
                Err(e) => {
                    if let Err(rb) = self.session.rollback() {
                        log_rollback_failure(operation, &rb);
                    }
                    Err(CrudError::transaction(operation, e))
                }
            },
            Ok(_) => {
                if let Err(rb) = self.session.rollback() {
                    log_rollback_failure(operation, &rb);
                }
                Err(CrudError::transaction(operation, POISONED))
            }
            Err(e) => {
                let cause: BoxError = e.into();
                tracing::warn!(
                    target: "crudkit",
                    operation,
                    error = %cause,
                    "transaction scope failed, rolling back"
                );
                if let Err(rb) = self.session.rollback() {
                    log_rollback_failure(operation, &rb);
                }
                Err(CrudError::transaction(operation, cause))
            }
        }
    }
}

impl<S: BlockingSession> BlockingSession for BlockingTransaction<'_, S> {
    fn dialect(&self) -> Dialect {
        self.session.dialect()
    }

    fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        self.session.fetch_all(sql)
    }

    fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        self.session.execute(sql)
    }

    fn commit(&mut self) -> CrudResult<()> {
        tracing::debug!(target: "crudkit", operation = self.operation, "commit deferred to scope end");
        Ok(())
    }

    fn rollback(&mut self) -> CrudResult<()> {
        self.poisoned = true;
        self.session.rollback()
    }

    fn in_scope(&self) -> bool {
        true
    }
}

/// Run `f` inside a blocking transaction scope.
pub fn run_blocking<S, T, E, F>(session: &mut S, operation: &'static str, f: F) -> CrudResult<T>
where
    S: BlockingSession,
    E: Into<BoxError>,
    F: FnOnce(&mut BlockingTransaction<'_, S>) -> Result<T, E>,
{
    let mut tx = BlockingTransaction::begin(session, operation)?;
    let result = f(&mut tx);
    tx.finish(result)
}
