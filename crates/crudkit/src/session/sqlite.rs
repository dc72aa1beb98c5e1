//! SQLite session over `rusqlite`.
//!
//! Implements both [`BlockingSession`] and [`Session`]; the async flavor runs
//! each statement to completion before returning.

use crate::config::CrudConfig;
use crate::dialect::Dialect;
use crate::error::{CrudError, CrudResult};
use crate::model::FieldMap;
use crate::session::{BlockingSession, Session};
use crate::sql::Sql;
use crate::value::Value;
use rusqlite::Connection;
use std::path::Path;
use std::time::Instant;

/// A SQLite unit of work.
pub struct SqliteSession {
    conn: Connection,
    in_tx: bool,
}

impl SqliteSession {
    /// Open a database file.
    pub fn open(path: impl AsRef<Path>) -> CrudResult<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| CrudError::connection(&path.display().to_string(), e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> CrudResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| CrudError::connection(":memory:", e.to_string()))?;
        Self::from_connection(conn)
    }

    /// Open `config.database_url`; the configured dialect must be SQLite.
    pub fn from_config(config: &CrudConfig) -> CrudResult<Self> {
        if config.dialect != Dialect::Sqlite {
            return Err(CrudError::Config(format!(
                "SqliteSession cannot serve dialect {}",
                config.dialect
            )));
        }
        match config.require_database_url()? {
            ":memory:" => Self::open_in_memory(),
            url => Self::open(url.strip_prefix("sqlite://").unwrap_or(url)),
        }
    }

    /// Wrap an open connection; foreign keys are switched on.
    pub fn from_connection(conn: Connection) -> CrudResult<Self> {
        let started_at = Instant::now();
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(CrudError::from_sqlite)?;
        tracing::debug!(
            target: "crudkit",
            duration_ms = started_at.elapsed().as_millis() as u64,
            "sqlite session ready"
        );
        Ok(Self { conn, in_tx: false })
    }

    /// Run schema DDL outside the unit of work.
    pub fn execute_batch(&self, sql: &str) -> CrudResult<()> {
        self.conn
            .execute_batch(sql)
            .map_err(|e| CrudError::from_sqlite(e).with_sql(sql))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn begin(&mut self) -> CrudResult<()> {
        if !self.in_tx {
            self.conn
                .execute_batch("BEGIN")
                .map_err(CrudError::from_sqlite)?;
            self.in_tx = true;
        }
        Ok(())
    }

    fn finish(&mut self, statement: &str) -> CrudResult<()> {
        if !self.in_tx {
            return Ok(());
        }
        self.in_tx = false;
        self.conn
            .execute_batch(statement)
            .map_err(CrudError::from_sqlite)
    }

    fn run_query(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        sql.validate()?;
        self.begin()?;
        let text = sql.to_sql_with(Dialect::Sqlite);
        let map_err = |e: rusqlite::Error| CrudError::from_sqlite(e).with_sql(&text);

        let mut stmt = self.conn.prepare(&text).map_err(map_err)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(sql.params()))
            .map_err(map_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(map_err)? {
            let mut fields = FieldMap::new();
            for (idx, name) in names.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| CrudError::decode(name.as_str(), e.to_string()))?;
                fields.insert(name.clone(), Value::from(value));
            }
            out.push(fields);
        }
        Ok(out)
    }

    fn run_execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        sql.validate()?;
        self.begin()?;
        let text = sql.to_sql_with(Dialect::Sqlite);
        let changed = self
            .conn
            .execute(&text, rusqlite::params_from_iter(sql.params()))
            .map_err(|e| CrudError::from_sqlite(e).with_sql(&text))?;
        Ok(changed as u64)
    }
}

impl BlockingSession for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        self.run_query(sql)
    }

    fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        self.run_execute(sql)
    }

    fn commit(&mut self) -> CrudResult<()> {
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> CrudResult<()> {
        self.finish("ROLLBACK")
    }
}

impl Session for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        self.run_query(sql)
    }

    async fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        self.run_execute(sql)
    }

    async fn commit(&mut self) -> CrudResult<()> {
        self.finish("COMMIT")
    }

    async fn rollback(&mut self) -> CrudResult<()> {
        self.finish("ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::sql;

    fn session() -> SqliteSession {
        let s = SqliteSession::open_in_memory().unwrap();
        s.execute_batch("CREATE TABLE kv (k TEXT PRIMARY KEY, v INTEGER NOT NULL)")
            .unwrap();
        s
    }

    fn insert(s: &mut SqliteSession, k: &str, v: i64) -> CrudResult<u64> {
        let mut q = sql("INSERT INTO kv (k, v) VALUES (");
        q.push_bind(k).push(", ").push_bind(v).push(")");
        BlockingSession::execute(s, &q)
    }

    fn count(s: &mut SqliteSession) -> usize {
        BlockingSession::fetch_all(s, &sql("SELECT * FROM kv")).unwrap().len()
    }

    #[test]
    fn rollback_discards_since_last_commit() {
        let mut s = session();
        insert(&mut s, "a", 1).unwrap();
        BlockingSession::commit(&mut s).unwrap();
        insert(&mut s, "b", 2).unwrap();
        BlockingSession::rollback(&mut s).unwrap();
        assert_eq!(count(&mut s), 1);
    }

    #[test]
    fn constraint_errors_are_classified() {
        let mut s = session();
        insert(&mut s, "a", 1).unwrap();
        let err = insert(&mut s, "a", 2).unwrap_err();
        assert!(err.is_unique_violation(), "{err}");
    }

    #[test]
    fn rows_come_back_as_field_maps() {
        let mut s = session();
        insert(&mut s, "a", 1).unwrap();
        let rows = BlockingSession::fetch_all(&mut s, &sql("SELECT k, v FROM kv")).unwrap();
        assert_eq!(rows[0]["k"], Value::Text("a".into()));
        assert_eq!(rows[0]["v"], Value::Int(1));
    }

    #[test]
    fn syntax_errors_carry_the_statement() {
        let mut s = session();
        let err = BlockingSession::fetch_all(&mut s, &sql("SELEC nope")).unwrap_err();
        match err {
            CrudError::Query { sql, .. } => assert_eq!(sql.as_deref(), Some("SELEC nope")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
