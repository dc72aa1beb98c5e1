//! Structured statements.
//!
//! The filter resolver and the CRUD helpers build these values and render
//! them to [`Sql`] for the session's dialect at the last moment, so the
//! planning code is shared by the async and blocking flavors.

use crate::dialect::Dialect;
use crate::eager::EagerLoad;
use crate::error::{CrudError, CrudResult};
use crate::model::{FieldMap, Model, Schema};
use crate::sql::Sql;
use crate::value::Value;

/// Largest LIMIT/OFFSET Postgres and SQLite accept (signed 64-bit).
const MAX_ROWS: u64 = i64::MAX as u64;

/// Comparison operator of a [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Lte,
    Gte,
}

impl CompareOp {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Eq => " = ",
            CompareOp::Lte => " <= ",
            CompareOp::Gte => " >= ",
        }
    }
}

/// One WHERE condition. Predicates are joined with AND.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        field: String,
        op: CompareOp,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    TextMatch {
        field: String,
        query: String,
    },
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op: CompareOp::Lte,
            value: value.into(),
        }
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            field: field.into(),
            op: CompareOp::Gte,
            value: value.into(),
        }
    }

    pub fn in_list<T: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = T>,
    ) -> Self {
        Predicate::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn text_match(field: impl Into<String>, query: impl Into<String>) -> Self {
        Predicate::TextMatch {
            field: field.into(),
            query: query.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Predicate::Compare { field, .. }
            | Predicate::In { field, .. }
            | Predicate::TextMatch { field, .. } => field,
        }
    }

    fn append_to(&self, sql: &mut Sql, dialect: Dialect) -> CrudResult<()> {
        match self {
            Predicate::Compare {
                field,
                op: CompareOp::Eq,
                value: Value::Null,
            } => {
                sql.push_ident(field)?.push(" IS NULL");
            }
            Predicate::Compare { field, op, value } => {
                sql.push_ident(field)?
                    .push(op.as_sql())
                    .push_bind(value.clone());
            }
            Predicate::In { field, values } => {
                sql.push_ident(field)?.push(" IN (");
                sql.push_bind_list(values.iter().cloned()).push(")");
            }
            Predicate::TextMatch { field, query } => match dialect {
                Dialect::Postgres => {
                    sql.push("to_tsvector(");
                    sql.push_ident(field)?
                        .push(") @@ plainto_tsquery(")
                        .push_bind(query.as_str())
                        .push(")");
                }
                Dialect::Mysql => {
                    sql.push("MATCH (");
                    sql.push_ident(field)?
                        .push(") AGAINST (")
                        .push_bind(query.as_str())
                        .push(")");
                }
                Dialect::Sqlite => {
                    sql.push_ident(field)?
                        .push(" LIKE '%' || ")
                        .push_bind(query.as_str())
                        .push(" || '%'");
                }
            },
        }
        Ok(())
    }
}

fn push_where(sql: &mut Sql, predicates: &[Predicate], dialect: Dialect) -> CrudResult<()> {
    for (i, p) in predicates.iter().enumerate() {
        sql.push(if i == 0 { " WHERE " } else { " AND " });
        p.append_to(sql, dialect)?;
    }
    Ok(())
}

fn push_returning(sql: &mut Sql, returning: bool, dialect: Dialect) {
    if returning && dialect.supports_returning() {
        sql.push(" RETURNING *");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A SELECT over one table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectQuery {
    pub table: String,
    pub predicates: Vec<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub eager: Vec<EagerLoad>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn for_model<M: Model>() -> Self {
        Self::new(M::schema().table)
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// `OFFSET (page - 1) * page_size LIMIT page_size`.
    pub fn paginate(self, page: u64, page_size: u64) -> CrudResult<Self> {
        if page < 1 {
            return Err(CrudError::invalid_field(
                "page",
                Some(page.to_string()),
                "page must be >= 1",
            ));
        }
        if page_size < 1 {
            return Err(CrudError::invalid_field(
                "page_size",
                Some(page_size.to_string()),
                "page_size must be >= 1",
            ));
        }
        if page_size > MAX_ROWS {
            return Err(CrudError::invalid_field(
                "page_size",
                Some(page_size.to_string()),
                "page_size is out of range",
            ));
        }
        let offset = (page - 1)
            .checked_mul(page_size)
            .filter(|offset| *offset <= MAX_ROWS)
            .ok_or_else(|| {
                CrudError::invalid_field("page", Some(page.to_string()), "page is out of range")
            })?;
        Ok(self.offset(offset).limit(page_size))
    }

    pub fn eager(mut self, load: EagerLoad) -> Self {
        self.eager.push(load);
        self
    }

    pub fn has_ordering(&self) -> bool {
        !self.order_by.is_empty()
    }

    /// Check every referenced field and relation against `schema`.
    pub fn check_against(&self, schema: &Schema) -> CrudResult<()> {
        schema.check_fields(
            self.predicates
                .iter()
                .map(Predicate::field)
                .chain(self.order_by.iter().map(|o| o.field.as_str())),
        )?;
        for load in &self.eager {
            schema.require_relation(&load.relation)?;
        }
        Ok(())
    }

    pub fn render(&self, dialect: Dialect) -> CrudResult<Sql> {
        let mut sql = Sql::new("SELECT * FROM ");
        sql.push_ident(&self.table)?;
        push_where(&mut sql, &self.predicates, dialect)?;

        for (i, o) in self.order_by.iter().enumerate() {
            sql.push(if i == 0 { " ORDER BY " } else { ", " });
            sql.push_ident(&o.field)?;
            if o.descending {
                sql.push(" DESC");
            }
        }

        if dialect != Dialect::Mysql {
            for (name, bound) in [("limit", self.limit), ("offset", self.offset)] {
                if let Some(n) = bound.filter(|n| *n > MAX_ROWS) {
                    return Err(CrudError::invalid_field(name, Some(n.to_string()), "exceeds the store's row range"));
                }
            }
        }

        let limit = match (self.limit, self.offset, dialect) {
            (Some(l), _, _) => Some(l.to_string()),
            (None, Some(_), Dialect::Sqlite) => Some("-1".to_string()),
            (None, Some(_), Dialect::Mysql) => Some(u64::MAX.to_string()),
            _ => None,
        };
        if let Some(limit) = limit {
            sql.push(" LIMIT ").push(&limit);
        }
        if let Some(offset) = self.offset {
            sql.push(" OFFSET ").push(&offset.to_string());
        }
        Ok(sql)
    }
}

/// Conflict handling of an INSERT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnConflict {
    /// Skip conflicting rows (`ON CONFLICT DO NOTHING` / `INSERT IGNORE`).
    DoNothing,
    /// Overwrite the conflicting row's columns, except `keys` and `keep`.
    Update { keys: Vec<String>, keep: Vec<String> },
}

/// A multi-row INSERT.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub on_conflict: Option<OnConflict>,
    pub returning: bool,
}

impl InsertStatement {
    /// Build from field maps that all carry the same key set.
    pub fn from_rows(table: impl Into<String>, rows: &[FieldMap]) -> CrudResult<Self> {
        let Some(first) = rows.first() else {
            return Err(CrudError::validation("insert payload is empty"));
        };
        let columns: Vec<String> = first.keys().cloned().collect();
        for (i, row) in rows.iter().enumerate().skip(1) {
            if !row.keys().eq(first.keys()) {
                return Err(CrudError::invalid_field(
                    "payload",
                    Some(format!("row {i}")),
                    "all rows must carry the same fields",
                ));
            }
        }
        Ok(Self {
            table: table.into(),
            rows: rows.iter().map(|r| r.values().cloned().collect()).collect(),
            columns,
            on_conflict: None,
            returning: false,
        })
    }

    pub fn on_conflict(mut self, on_conflict: OnConflict) -> Self {
        self.on_conflict = Some(on_conflict);
        self
    }

    pub fn returning(mut self, returning: bool) -> Self {
        self.returning = returning;
        self
    }

    pub fn render(&self, dialect: Dialect) -> CrudResult<Sql> {
        let ignore = dialect == Dialect::Mysql && self.on_conflict == Some(OnConflict::DoNothing);
        let mut sql = Sql::new(if ignore { "INSERT IGNORE INTO " } else { "INSERT INTO " });
        sql.push_ident(&self.table)?;

        if self.columns.is_empty() {
            if self.rows.len() != 1 {
                return Err(CrudError::validation(
                    "rows without columns can only be inserted one at a time",
                ));
            }
            sql.push(if dialect == Dialect::Mysql { " () VALUES ()" } else { " DEFAULT VALUES" });
        } else {
            sql.push(" (");
            sql.push_ident_list(self.columns.iter().map(String::as_str))?;
            sql.push(") VALUES ");
            for (i, row) in self.rows.iter().enumerate() {
                if i > 0 {
                    sql.push(", ");
                }
                sql.push("(");
                sql.push_bind_list(row.iter().cloned());
                sql.push(")");
            }
        }

        match (&self.on_conflict, dialect) {
            (None, _) | (Some(OnConflict::DoNothing), Dialect::Mysql) => {}
            (Some(OnConflict::DoNothing), _) => {
                sql.push(" ON CONFLICT DO NOTHING");
            }
            (Some(OnConflict::Update { keys, keep }), Dialect::Mysql) => {
                let updates = self.update_columns(keys, keep);
                sql.push(" ON DUPLICATE KEY UPDATE ");
                if updates.is_empty() {
                    let key = keys.first().ok_or_else(|| {
                        CrudError::validation("upsert needs at least one key field")
                    })?;
                    sql.push_ident(key)?.push(" = ").push(key);
                }
                for (i, col) in updates.iter().enumerate() {
                    if i > 0 {
                        sql.push(", ");
                    }
                    sql.push_ident(col)?.push(" = VALUES(").push(col).push(")");
                }
            }
            (Some(OnConflict::Update { keys, keep }), _) => {
                if keys.is_empty() {
                    return Err(CrudError::validation("upsert needs at least one key field"));
                }
                sql.push(" ON CONFLICT (");
                sql.push_ident_list(keys.iter().map(String::as_str))?;
                sql.push(")");
                let updates = self.update_columns(keys, keep);
                if updates.is_empty() {
                    sql.push(" DO NOTHING");
                } else {
                    sql.push(" DO UPDATE SET ");
                    for (i, col) in updates.iter().enumerate() {
                        if i > 0 {
                            sql.push(", ");
                        }
                        sql.push_ident(col)?.push(" = excluded.").push(col);
                    }
                }
            }
        }

        push_returning(&mut sql, self.returning, dialect);
        Ok(sql)
    }

    fn update_columns<'a>(&'a self, keys: &[String], keep: &[String]) -> Vec<&'a str> {
        self.columns
            .iter()
            .filter(|c| !keys.contains(c) && !keep.contains(c))
            .map(String::as_str)
            .collect()
    }
}

/// An UPDATE with a mandatory WHERE.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, Value)>,
    pub predicates: Vec<Predicate>,
    pub returning: bool,
}

impl UpdateStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            predicates: Vec::new(),
            returning: false,
        }
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((field.into(), value.into()));
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn returning(mut self, returning: bool) -> Self {
        self.returning = returning;
        self
    }

    pub fn render(&self, dialect: Dialect) -> CrudResult<Sql> {
        if self.assignments.is_empty() {
            return Err(CrudError::validation("UPDATE requires at least one SET"));
        }
        if self.predicates.is_empty() {
            return Err(CrudError::validation("UPDATE requires a WHERE condition"));
        }
        let mut sql = Sql::new("UPDATE ");
        sql.push_ident(&self.table)?.push(" SET ");
        for (i, (field, value)) in self.assignments.iter().enumerate() {
            if i > 0 {
                sql.push(", ");
            }
            sql.push_ident(field)?.push(" = ").push_bind(value.clone());
        }
        push_where(&mut sql, &self.predicates, dialect)?;
        push_returning(&mut sql, self.returning, dialect);
        Ok(sql)
    }
}

/// A DELETE with a mandatory WHERE.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub predicates: Vec<Predicate>,
    pub returning: bool,
}

impl DeleteStatement {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            predicates: Vec::new(),
            returning: false,
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn returning(mut self, returning: bool) -> Self {
        self.returning = returning;
        self
    }

    pub fn render(&self, dialect: Dialect) -> CrudResult<Sql> {
        if self.predicates.is_empty() {
            return Err(CrudError::validation("DELETE requires a WHERE condition"));
        }
        let mut sql = Sql::new("DELETE FROM ");
        sql.push_ident(&self.table)?;
        push_where(&mut sql, &self.predicates, dialect)?;
        push_returning(&mut sql, self.returning, dialect);
        Ok(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn select_renders_predicates_order_and_page() {
        let q = SelectQuery::new("widgets")
            .filter(Predicate::eq("color", "red"))
            .filter(Predicate::lte("created_at", "2024-01-01"))
            .filter(Predicate::eq("owner", Value::Null))
            .order_by("name", true)
            .paginate(3, 10)
            .unwrap();
        let sql = q.render(Dialect::Postgres).unwrap();
        assert_eq!(
            sql.to_sql(),
            "SELECT * FROM widgets WHERE color = $1 AND created_at <= $2 AND owner IS NULL \
             ORDER BY name DESC LIMIT 10 OFFSET 20"
        );
        assert_eq!(sql.params().len(), 2);
    }

    #[test]
    fn text_match_per_dialect() {
        let q = SelectQuery::new("posts").filter(Predicate::text_match("body", "rust"));
        assert_eq!(
            q.render(Dialect::Postgres).unwrap().to_sql(),
            "SELECT * FROM posts WHERE to_tsvector(body) @@ plainto_tsquery($1)"
        );
        assert_eq!(
            q.render(Dialect::Mysql).unwrap().to_sql_with(Dialect::Mysql),
            "SELECT * FROM posts WHERE MATCH (body) AGAINST (?)"
        );
        assert_eq!(
            q.render(Dialect::Sqlite).unwrap().to_sql_with(Dialect::Sqlite),
            "SELECT * FROM posts WHERE body LIKE '%' || ?1 || '%'"
        );
    }

    #[test]
    fn offset_without_limit_stays_valid_on_sqlite() {
        let q = SelectQuery::new("widgets").offset(5);
        assert_eq!(
            q.render(Dialect::Sqlite).unwrap().to_sql(),
            "SELECT * FROM widgets LIMIT -1 OFFSET 5"
        );
    }

    #[test]
    fn paginate_rejects_page_zero() {
        assert!(SelectQuery::new("widgets").paginate(0, 10).is_err());
        assert!(SelectQuery::new("widgets").paginate(1, 0).is_err());
    }

    #[test]
    fn paginate_rejects_out_of_range_pages() {
        let err = SelectQuery::new("widgets").paginate(u64::MAX, 2).unwrap_err();
        assert!(err.is_validation());
        assert!(SelectQuery::new("widgets").paginate(1, u64::MAX).unwrap_err().is_validation());

        let last = SelectQuery::new("widgets").paginate(i64::MAX as u64, 1).unwrap();
        assert_eq!(last.offset, Some(i64::MAX as u64 - 1));
    }

    #[test]
    fn oversized_limit_is_rejected_at_render() {
        let q = SelectQuery::new("widgets").limit(u64::MAX);
        assert!(q.render(Dialect::Sqlite).unwrap_err().is_validation());
        assert!(q.render(Dialect::Postgres).is_err());
        assert!(q.render(Dialect::Mysql).is_ok());
    }

    #[test]
    fn upsert_clause_per_dialect() {
        let rows = vec![
            row(&[("sku", "a".into()), ("qty", 1.into())]),
            row(&[("sku", "b".into()), ("qty", 2.into())]),
        ];
        let stmt = InsertStatement::from_rows("stock", &rows)
            .unwrap()
            .on_conflict(OnConflict::Update {
                keys: vec!["sku".into()],
                keep: vec![],
            })
            .returning(true);

        assert_eq!(
            stmt.render(Dialect::Postgres).unwrap().to_sql(),
            "INSERT INTO stock (qty, sku) VALUES ($1, $2), ($3, $4) \
             ON CONFLICT (sku) DO UPDATE SET qty = excluded.qty RETURNING *"
        );
        assert_eq!(
            stmt.render(Dialect::Mysql).unwrap().to_sql_with(Dialect::Mysql),
            "INSERT INTO stock (qty, sku) VALUES (?, ?), (?, ?) \
             ON DUPLICATE KEY UPDATE qty = VALUES(qty)"
        );
    }

    #[test]
    fn upsert_with_only_keys_does_nothing() {
        let rows = vec![row(&[("sku", "a".into())])];
        let stmt = InsertStatement::from_rows("stock", &rows)
            .unwrap()
            .on_conflict(OnConflict::Update {
                keys: vec!["sku".into()],
                keep: vec![],
            });
        assert_eq!(
            stmt.render(Dialect::Sqlite).unwrap().to_sql(),
            "INSERT INTO stock (sku) VALUES ($1) ON CONFLICT (sku) DO NOTHING"
        );
    }

    #[test]
    fn upsert_keeps_creation_stamp() {
        let rows = vec![row(&[
            ("sku", "a".into()),
            ("qty", 1.into()),
            ("created_at", "2024-01-01".into()),
        ])];
        let stmt = InsertStatement::from_rows("stock", &rows)
            .unwrap()
            .on_conflict(OnConflict::Update {
                keys: vec!["sku".into()],
                keep: vec!["created_at".into()],
            });
        assert!(stmt
            .render(Dialect::Postgres)
            .unwrap()
            .to_sql()
            .ends_with("ON CONFLICT (sku) DO UPDATE SET qty = excluded.qty"));
    }

    #[test]
    fn insert_or_ignore() {
        let rows = vec![row(&[("name", "x".into())])];
        let stmt = InsertStatement::from_rows("tags", &rows)
            .unwrap()
            .on_conflict(OnConflict::DoNothing);
        assert_eq!(
            stmt.render(Dialect::Mysql).unwrap().to_sql_with(Dialect::Mysql),
            "INSERT IGNORE INTO tags (name) VALUES (?)"
        );
        assert!(stmt
            .render(Dialect::Postgres)
            .unwrap()
            .to_sql()
            .ends_with("ON CONFLICT DO NOTHING"));
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let rows = vec![
            row(&[("a", 1.into())]),
            row(&[("a", 1.into()), ("b", 2.into())]),
        ];
        assert!(InsertStatement::from_rows("t", &rows).unwrap_err().is_validation());
    }

    #[test]
    fn update_and_delete_require_where() {
        assert!(UpdateStatement::new("t").set("a", 1).render(Dialect::Postgres).is_err());
        assert!(DeleteStatement::new("t").render(Dialect::Postgres).is_err());

        let sql = UpdateStatement::new("t")
            .set("a", 1)
            .filter(Predicate::eq("id", 7))
            .returning(true)
            .render(Dialect::Sqlite)
            .unwrap();
        assert_eq!(sql.to_sql_with(Dialect::Sqlite), "UPDATE t SET a = ?1 WHERE id = ?2 RETURNING *");
    }
}
