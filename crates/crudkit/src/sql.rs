//! Parameter-safe SQL builder.
//!
//! `Sql` stores raw SQL pieces and bound [`Value`]s separately and renders the
//! placeholders for a given [`Dialect`] at the end, so the same statement can
//! be issued through any session driver.
//!
//! # Example
//!
//! ```ignore
//! use crudkit::sql::sql;
//!
//! let mut q = sql("SELECT id, name FROM widgets WHERE 1=1");
//! if let Some(color) = color {
//!     q.push(" AND color = ").push_bind(color);
//! }
//! let rows = session.fetch_all(&q).await?;
//! ```

use crate::dialect::Dialect;
use crate::error::{CrudError, CrudResult};
use crate::ident;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
enum SqlPart {
    Raw(String),
    Param,
}

/// A SQL statement under construction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sql {
    parts: Vec<SqlPart>,
    params: Vec<Value>,
}

/// Start building a SQL statement.
pub fn sql(initial_sql: impl Into<String>) -> Sql {
    Sql::new(initial_sql)
}

impl Sql {
    /// Create a new builder with an initial SQL fragment.
    pub fn new(initial_sql: impl Into<String>) -> Self {
        Self {
            parts: vec![SqlPart::Raw(initial_sql.into())],
            params: Vec::new(),
        }
    }

    /// Create an empty builder.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Append raw SQL (no parameters).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }
        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a placeholder and bind its value.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(value.into());
        self
    }

    /// Append a comma-separated list of placeholders.
    ///
    /// An empty list renders `NULL`, so `IN (NULL)` stays valid SQL.
    pub fn push_bind_list<T: Into<Value>>(
        &mut self,
        values: impl IntoIterator<Item = T>,
    ) -> &mut Self {
        let mut iter = values.into_iter();
        let Some(first) = iter.next() else {
            return self.push("NULL");
        };
        self.push_bind(first);
        for v in iter {
            self.push(", ");
            self.push_bind(v);
        }
        self
    }

    /// Append another fragment, consuming it.
    pub fn push_sql(&mut self, mut other: Sql) -> &mut Self {
        for part in other.parts.drain(..) {
            match part {
                SqlPart::Raw(s) => {
                    self.push(&s);
                }
                SqlPart::Param => self.parts.push(SqlPart::Param),
            }
        }
        self.params.append(&mut other.params);
        self
    }

    /// Append a validated identifier (table or column).
    pub fn push_ident(&mut self, name: &str) -> CrudResult<&mut Self> {
        ident::validate(name)?;
        Ok(self.push(name))
    }

    /// Append `a, b, c` for a list of validated identifiers.
    pub fn push_ident_list<'a>(
        &mut self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> CrudResult<&mut Self> {
        for (i, name) in names.into_iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.push_ident(name)?;
        }
        Ok(self)
    }

    /// Render for `dialect`.
    pub fn to_sql_with(&self, dialect: Dialect) -> String {
        let mut out = String::new();
        let mut idx: usize = 0;
        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param => {
                    idx += 1;
                    out.push_str(&dialect.placeholder(idx));
                }
            }
        }
        out
    }

    /// Render with Postgres `$n` placeholders.
    pub fn to_sql(&self) -> String {
        self.to_sql_with(Dialect::Postgres)
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, SqlPart::Raw(s) if s.trim().is_empty()))
    }

    /// Check that every placeholder has a bound value.
    pub fn validate(&self) -> CrudResult<()> {
        let placeholders = self
            .parts
            .iter()
            .filter(|p| matches!(p, SqlPart::Param))
            .count();
        if placeholders != self.params.len() {
            return Err(CrudError::validation(format!(
                "Sql: {} placeholders but {} params",
                placeholders,
                self.params.len()
            )));
        }
        Ok(())
    }
}
