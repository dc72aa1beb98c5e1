//! Postgres session over `tokio-postgres`.

use crate::config::CrudConfig;
use crate::dialect::Dialect;
use crate::error::{CrudError, CrudResult};
use crate::model::FieldMap;
use crate::session::Session;
use crate::sql::Sql;
use crate::value::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::{NoTls, Row};
use uuid::Uuid;

/// Anything that hands out a `tokio_postgres::Client`.
pub trait PgConnection: Send + Sync {
    fn client(&self) -> &tokio_postgres::Client;
}

impl PgConnection for tokio_postgres::Client {
    fn client(&self) -> &tokio_postgres::Client {
        self
    }
}

#[cfg(feature = "pool")]
impl PgConnection for deadpool_postgres::Client {
    fn client(&self) -> &tokio_postgres::Client {
        self
    }
}

/// A Postgres unit of work.
///
/// Statements run inside a transaction that is opened on the first statement
/// after a commit or rollback.
pub struct PgSession<C: PgConnection = tokio_postgres::Client> {
    conn: C,
    in_tx: bool,
}

impl PgSession<tokio_postgres::Client> {
    /// Connect with `NoTls` and drive the connection on the tokio runtime.
    pub async fn connect(database_url: &str) -> CrudResult<Self> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls)
            .await
            .map_err(|e| CrudError::connection(database_url, e.to_string()))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(target: "crudkit", error = %e, "postgres connection error");
            }
        });
        Ok(Self::new(client))
    }

    /// Connect to `config.database_url`; the configured dialect must be Postgres.
    pub async fn from_config(config: &CrudConfig) -> CrudResult<Self> {
        if config.dialect != Dialect::Postgres {
            return Err(CrudError::Config(format!(
                "PgSession cannot serve dialect {}",
                config.dialect
            )));
        }
        Self::connect(config.require_database_url()?).await
    }
}

impl<C: PgConnection> PgSession<C> {
    pub fn new(conn: C) -> Self {
        Self { conn, in_tx: false }
    }

    pub fn connection(&self) -> &C {
        &self.conn
    }

    pub fn into_inner(self) -> C {
        self.conn
    }

    async fn begin(&mut self) -> CrudResult<()> {
        if !self.in_tx {
            self.conn
                .client()
                .batch_execute("BEGIN")
                .await
                .map_err(CrudError::from_pg)?;
            self.in_tx = true;
        }
        Ok(())
    }

    async fn finish(&mut self, statement: &str) -> CrudResult<()> {
        if !self.in_tx {
            return Ok(());
        }
        self.in_tx = false;
        self.conn
            .client()
            .batch_execute(statement)
            .await
            .map_err(CrudError::from_pg)
    }
}

fn params(sql: &Sql) -> Vec<&(dyn ToSql + Sync)> {
    sql.params().iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl<C: PgConnection> Session for PgSession<C> {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn fetch_all(&mut self, sql: &Sql) -> CrudResult<Vec<FieldMap>> {
        sql.validate()?;
        self.begin().await?;
        let text = sql.to_sql_with(Dialect::Postgres);
        let rows = self
            .conn
            .client()
            .query(&text, &params(sql))
            .await
            .map_err(|e| CrudError::from_pg(e).with_sql(&text))?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&mut self, sql: &Sql) -> CrudResult<u64> {
        sql.validate()?;
        self.begin().await?;
        let text = sql.to_sql_with(Dialect::Postgres);
        self.conn
            .client()
            .execute(&text, &params(sql))
            .await
            .map_err(|e| CrudError::from_pg(e).with_sql(&text))
    }

    async fn commit(&mut self) -> CrudResult<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> CrudResult<()> {
        self.finish("ROLLBACK").await
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize, name: &str) -> CrudResult<Option<T>> {
    row.try_get(idx)
        .map_err(|e| CrudError::decode(name, e.to_string()))
}

/// Decode a row by column type.
pub(crate) fn decode_row(row: &Row) -> CrudResult<FieldMap> {
    let mut out = FieldMap::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let name = col.name();
        let ty = col.type_();
        let value = if *ty == Type::BOOL {
            get::<bool>(row, idx, name)?.map(Value::Bool)
        } else if *ty == Type::INT2 {
            get::<i16>(row, idx, name)?.map(Value::from)
        } else if *ty == Type::INT4 {
            get::<i32>(row, idx, name)?.map(Value::from)
        } else if *ty == Type::INT8 {
            get::<i64>(row, idx, name)?.map(Value::Int)
        } else if *ty == Type::FLOAT4 {
            get::<f32>(row, idx, name)?.map(Value::from)
        } else if *ty == Type::FLOAT8 {
            get::<f64>(row, idx, name)?.map(Value::Float)
        } else if *ty == Type::DATE {
            get::<NaiveDate>(row, idx, name)?.map(Value::Date)
        } else if *ty == Type::TIMESTAMP {
            get::<NaiveDateTime>(row, idx, name)?.map(Value::from)
        } else if *ty == Type::TIMESTAMPTZ {
            get::<DateTime<Utc>>(row, idx, name)?.map(Value::Timestamp)
        } else if *ty == Type::UUID {
            get::<Uuid>(row, idx, name)?.map(Value::Uuid)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            get::<serde_json::Value>(row, idx, name)?.map(Value::Json)
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            get::<String>(row, idx, name)?.map(Value::Text)
        } else {
            return Err(CrudError::decode(
                name,
                format!("unsupported column type {}", ty.name()),
            ));
        };
        out.insert(name.to_string(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}
