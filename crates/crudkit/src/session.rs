//! Units of work.
//!
//! A session is the caller-owned handle every helper runs through. It renders
//! and issues statements, and commits or rolls back everything issued since the
//! last commit/rollback. Drivers open a store transaction lazily on the first
//! statement, so helpers never issue `BEGIN` themselves.
//!
//! Two flavors exist with identical semantics:
//!
//! - [`Session`]: async, used by [`crate::crud`].
//! - [`BlockingSession`]: blocking, used by [`crate::blocking`].

use crate::dialect::Dialect;
use crate::error::CrudResult;
use crate::model::FieldMap;
use crate::sql::Sql;
use std::future::Future;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PgSession;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSession;

/// Async unit of work.
pub trait Session: Send {
    fn dialect(&self) -> Dialect;

    /// Run a statement and return its rows.
    fn fetch_all(&mut self, sql: &Sql) -> impl Future<Output = CrudResult<Vec<FieldMap>>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(&mut self, sql: &Sql) -> impl Future<Output = CrudResult<u64>> + Send;

    /// Commit everything issued since the last commit/rollback.
    fn commit(&mut self) -> impl Future<Output = CrudResult<()>> + Send;

    /// Discard everything issued since the last commit/rollback.
    fn rollback(&mut self) -> impl Future<Output = CrudResult<()>> + Send;

    /// `true` inside a transaction scope, where commits are deferred.
    fn in_scope(&self) -> bool {
        false
    }
}

/// Blocking unit of work.
pub trait BlockingSession {
    fn dialect(&self) -> Dialect;

    fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>>;

    fn execute(&mut self, sql: &Sql) -> CrudResult<u64>;

    fn commit(&mut self) -> CrudResult<()>;

    fn rollback(&mut self) -> CrudResult<()>;

    fn in_scope(&self) -> bool {
        false
    }
}

impl<S: Session> Session for &mut S {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn fetch_all(&mut self, sql: &Sql) -> impl Future<Output = CrudResult<Vec<FieldMap>>> + Send {
        (**self).fetch_all(sql)
    }

    fn execute(&mut self, sql: &Sql) -> impl Future<Output = CrudResult<u64>> + Send {
        (**self).execute(sql)
    }

    fn commit(&mut self) -> impl Future<Output = CrudResult<()>> + Send {
        (**self).commit()
    }

    fn rollback(&mut self) -> impl Future<Output = CrudResult<()>> + Send {
        (**self).rollback()
    }

    fn in_scope(&self) -> bool {
        (**self).in_scope()
    }
}

impl<S: BlockingSession> BlockingSession for &mut S {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        (**self).fetch_all(sql)
    }

    fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        (**self).execute(sql)
    }

    fn commit(&mut self) -> CrudResult<()> {
        (**self).commit()
    }

    fn rollback(&mut self) -> CrudResult<()> {
        (**self).rollback()
    }

    fn in_scope(&self) -> bool {
        (**self).in_scope()
    }
}
