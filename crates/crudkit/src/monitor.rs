//! Statement logging.
//!
//! [`Instrumented`] wraps any session and emits one `tracing` event per
//! statement with target `crudkit.sql`. Statements slower than the configured
//! threshold are reported at WARN.

use crate::config::CrudConfig;
use crate::dialect::Dialect;
use crate::error::CrudResult;
use crate::model::FieldMap;
use crate::session::{BlockingSession, Session};
use crate::sql::Sql;
use std::time::{Duration, Instant};
use tracing::Level;

/// A session wrapper that logs every statement.
#[derive(Debug, Clone)]
pub struct Instrumented<S> {
    inner: S,
    /// Tracing event level to emit at.
    pub level: Level,
    /// Truncate long SQL strings (in chars). `None` means no truncation.
    pub max_sql_length: Option<usize>,
    pub slow_query_threshold: Option<Duration>,
}

impl<S> Instrumented<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            level: Level::DEBUG,
            max_sql_length: Some(200),
            slow_query_threshold: None,
        }
    }

    /// Take the slow statement threshold from `config`.
    pub fn with_config(inner: S, config: &CrudConfig) -> Self {
        Self {
            slow_query_threshold: config.slow_query_threshold,
            ..Self::new(inner)
        }
    }

    /// Override the tracing event level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn truncate_sql(&self, sql: &str) -> String {
        match self.max_sql_length {
            Some(max) if sql.chars().count() > max => {
                format!("{}...", sql.chars().take(max).collect::<String>())
            }
            _ => sql.to_string(),
        }
    }

    fn record<T>(
        &self,
        kind: &'static str,
        dialect: Dialect,
        sql: &Sql,
        started: Instant,
        result: &CrudResult<T>,
        count: impl FnOnce(&T) -> u64,
    ) {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let elapsed = started.elapsed();
        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        let text = self.truncate_sql(&sql.to_sql_with(dialect));
        let param_count = sql.params().len();

        match result {
            Ok(value) => emit_at_level!(
                self.level,
                target: "crudkit.sql",
                kind,
                param_count,
                rows = count(value),
                duration_ms,
                sql = %text,
            ),
            Err(e) => emit_at_level!(
                self.level,
                target: "crudkit.sql",
                kind,
                param_count,
                duration_ms,
                error = %e,
                sql = %text,
            ),
        }

        if let Some(threshold) = self.slow_query_threshold {
            if elapsed > threshold {
                tracing::warn!(
                    target: "crudkit.sql",
                    kind,
                    duration_ms,
                    threshold_ms = threshold.as_millis() as u64,
                    sql = %text,
                    "slow statement"
                );
            }
        }
    }
}

impl<S: Session> Session for Instrumented<S> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    async fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        let started = Instant::now();
        let result = self.inner.fetch_all(sql).await;
        self.record("fetch", self.inner.dialect(), sql, started, &result, |rows| {
            rows.len() as u64
        });
        result
    }

    async fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        let started = Instant::now();
        let result = self.inner.execute(sql).await;
        self.record("execute", self.inner.dialect(), sql, started, &result, |n| *n);
        result
    }

    async fn commit(&mut self) -> CrudResult<()> {
        tracing::debug!(target: "crudkit.sql", "commit");
        self.inner.commit().await
    }

    async fn rollback(&mut self) -> CrudResult<()> {
        tracing::debug!(target: "crudkit.sql", "rollback");
        self.inner.rollback().await
    }

    fn in_scope(&self) -> bool {
        self.inner.in_scope()
    }
}

impl<S: BlockingSession> BlockingSession for Instrumented<S> {
    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        let started = Instant::now();
        let result = self.inner.fetch_all(sql);
        self.record("fetch", self.inner.dialect(), sql, started, &result, |rows| {
            rows.len() as u64
        });
        result
    }

    fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        let started = Instant::now();
        let result = self.inner.execute(sql);
        self.record("execute", self.inner.dialect(), sql, started, &result, |n| *n);
        result
    }

    fn commit(&mut self) -> CrudResult<()> {
        tracing::debug!(target: "crudkit.sql", "commit");
        self.inner.commit()
    }

    fn rollback(&mut self) -> CrudResult<()> {
        tracing::debug!(target: "crudkit.sql", "rollback");
        self.inner.rollback()
    }

    fn in_scope(&self) -> bool {
        self.inner.in_scope()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundary() {
        let m = Instrumented::new(()).max_sql_length(3);
        assert_eq!(m.truncate_sql("héllo"), "hél...");
        assert_eq!(m.truncate_sql("abc"), "abc");
        assert_eq!(m.no_truncate().truncate_sql("héllo"), "héllo");
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn passes_statements_through() {
        use crate::session::SqliteSession;
        use crate::sql::sql;

        let inner = SqliteSession::open_in_memory().unwrap();
        let mut s = Instrumented::new(inner).slow_query_threshold(Duration::ZERO);
        let rows = BlockingSession::fetch_all(&mut s, &sql("SELECT 1 AS one")).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(BlockingSession::dialect(&s), Dialect::Sqlite);
    }
}
