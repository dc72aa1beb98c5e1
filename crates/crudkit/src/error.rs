//! Error types for crudkit

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Result type alias for crudkit operations
pub type CrudResult<T> = Result<T, CrudError>;

/// Boxed cause carried by [`CrudError::Transaction`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Maximum SQL length kept in error messages.
const MAX_SQL_IN_ERROR: usize = 200;

/// Error taxonomy for CRUD operations.
#[derive(Debug, Error)]
pub enum CrudError {
    /// A lookup by key yielded zero rows.
    #[error("{table} with {key}={value} not found")]
    NotFound {
        table: String,
        key: String,
        value: String,
    },

    /// A strict single-row lookup yielded more than one row.
    #[error("Expected 1 {table}, found {count}{}", fmt_filters(.filters))]
    MultipleFound {
        table: String,
        count: usize,
        filters: Option<String>,
    },

    /// Caller-supplied values failed a precondition.
    #[error("{}", fmt_validation(.message, .field, .value, .errors))]
    Validation {
        message: String,
        field: Option<String>,
        value: Option<String>,
        errors: BTreeMap<String, String>,
    },

    /// A batch operation failed, fully or partially.
    #[error("{0}")]
    BulkOperation(BulkFailure),

    /// An error raised inside a transaction scope (after rollback).
    #[error("Transaction failed during {operation}: {source}")]
    Transaction {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    /// Could not reach the store. The URL never carries credentials.
    #[error("Failed to connect to database at {url}: {message}")]
    Connection { url: String, message: String },

    /// A statement failed to execute.
    #[error("Query execution failed: {message}{}", fmt_sql(.sql))]
    Query { sql: Option<String>, message: String },

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check / not-null constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

fn fmt_filters(filters: &Option<String>) -> String {
    match filters {
        Some(f) => format!(" (filters: {f})"),
        None => String::new(),
    }
}

fn fmt_sql(sql: &Option<String>) -> String {
    match sql {
        Some(s) => format!("\nQuery: {s}"),
        None => String::new(),
    }
}

fn fmt_validation(
    message: &str,
    field: &Option<String>,
    value: &Option<String>,
    errors: &BTreeMap<String, String>,
) -> String {
    let mut out = match field {
        Some(field) => format!("Validation failed for field '{field}': {message}"),
        None => format!("Validation failed: {message}"),
    };
    if let Some(value) = value {
        out.push_str(&format!(" (value: {value})"));
    }
    for (field, error) in errors {
        out.push_str(&format!("\n  - {field}: {error}"));
    }
    out
}

/// Details of a failed batch operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkFailure {
    /// Records in the batch.
    pub total: usize,
    /// Records that were not written.
    pub failed: usize,
    /// One description per failure.
    pub errors: Vec<String>,
}

impl BulkFailure {
    pub fn new(total: usize, failed: usize, errors: Vec<String>) -> Self {
        Self {
            total,
            failed,
            errors,
        }
    }

    /// Share of records written, in percent.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.total - self.failed) as f64 / self.total as f64 * 100.0
    }

    /// Multi-line summary listing every error.
    pub fn error_summary(&self) -> String {
        let mut lines = vec![self.to_string(), "\nError details:".to_string()];
        for (i, error) in self.errors.iter().enumerate() {
            lines.push(format!("  {}. {}", i + 1, error));
        }
        lines.join("\n")
    }
}

impl fmt::Display for BulkFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bulk operation failed: {}/{} records failed ({:.1}% success rate)",
            self.failed,
            self.total,
            self.success_rate()
        )
    }
}

impl CrudError {
    /// Create a not found error for a keyed lookup.
    pub fn not_found(table: impl Into<String>, key: impl Into<String>, value: impl fmt::Display) -> Self {
        Self::NotFound {
            table: table.into(),
            key: key.into(),
            value: value.to_string(),
        }
    }

    /// Create a multiple-records error.
    pub fn multiple_found(table: impl Into<String>, count: usize, filters: Option<String>) -> Self {
        Self::MultipleFound {
            table: table.into(),
            count,
            filters,
        }
    }

    /// Create a validation error without a field.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
            value: None,
            errors: BTreeMap::new(),
        }
    }

    /// Create a validation error for one field and its offending value.
    pub fn invalid_field(
        field: impl Into<String>,
        value: Option<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
            value,
            errors: BTreeMap::new(),
        }
    }

    /// Create a validation error carrying a per-field message map.
    pub fn invalid_fields(message: impl Into<String>, errors: BTreeMap<String, String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
            value: None,
            errors,
        }
    }

    /// Wrap an error raised inside a transaction scope.
    pub fn transaction(operation: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Transaction {
            operation,
            source: source.into(),
        }
    }

    /// Create a connection error; credentials are stripped from `url`.
    pub fn connection(url: &str, message: impl Into<String>) -> Self {
        Self::Connection {
            url: sanitize_url(url),
            message: message.into(),
        }
    }

    /// Create a query error, keeping a truncated copy of the statement.
    pub fn query(sql: Option<&str>, message: impl Into<String>) -> Self {
        Self::Query {
            sql: sql.map(truncate_sql),
            message: message.into(),
        }
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Attach the failing statement to a `Query` error that lacks one.
    pub(crate) fn with_sql(self, sql: &str) -> Self {
        match self {
            Self::Query { sql: None, message } => Self::query(Some(sql), message),
            other => other,
        }
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation(_))
    }

    /// Check if the store rejected the write because of a constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            Self::UniqueViolation(_) | Self::ForeignKeyViolation(_) | Self::CheckViolation(_)
        )
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this error was raised by a transaction scope
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Transaction { .. })
    }

    /// Parse a tokio_postgres error into a more specific CrudError
    #[cfg(feature = "postgres")]
    pub fn from_pg(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{constraint}: {message}")),
                "23503" => return Self::ForeignKeyViolation(format!("{constraint}: {message}")),
                "23502" | "23514" => {
                    return Self::CheckViolation(format!("{constraint}: {message}"));
                }
                _ => {}
            }
        }
        if err.is_closed() {
            return Self::Connection {
                url: "<session>".to_string(),
                message: err.to_string(),
            };
        }
        Self::query(None, err.to_string())
    }

    /// Parse a rusqlite error into a more specific CrudError
    #[cfg(feature = "sqlite")]
    pub fn from_sqlite(err: rusqlite::Error) -> Self {
        use rusqlite::ffi;

        if let rusqlite::Error::SqliteFailure(code, message) = &err {
            let message = message.clone().unwrap_or_else(|| code.to_string());
            match code.extended_code {
                ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                    return Self::UniqueViolation(message);
                }
                ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return Self::ForeignKeyViolation(message),
                ffi::SQLITE_CONSTRAINT_CHECK | ffi::SQLITE_CONSTRAINT_NOTNULL => {
                    return Self::CheckViolation(message);
                }
                _ => {}
            }
            if code.code == rusqlite::ErrorCode::CannotOpen {
                return Self::Connection {
                    url: "<sqlite>".to_string(),
                    message,
                };
            }
        }
        Self::query(None, err.to_string())
    }
}

const MASK: &str = "***";

/// Mask the password of a connection string.
///
/// Both URL (`postgres://alice:secret@db/app`) and key/value
/// (`host=db user=alice password=secret`) forms are understood; a
/// `password` query parameter is masked as well.
pub fn sanitize_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) if !parsed.cannot_be_a_base() => mask_url(parsed, raw),
        _ => mask_key_values(raw),
    }
}

fn mask_url(mut parsed: url::Url, raw: &str) -> String {
    let mut masked = parsed.password().is_some() && parsed.set_password(Some(MASK)).is_ok();
    if parsed.query_pairs().any(|(k, _)| k == "password") {
        let pairs: Vec<(String, String)> = parsed
            .query_pairs()
            .map(|(k, v)| {
                let v = if k == "password" { MASK.to_string() } else { v.into_owned() };
                (k.into_owned(), v)
            })
            .collect();
        parsed.query_pairs_mut().clear().extend_pairs(pairs);
        masked = true;
    }
    if masked { parsed.to_string() } else { raw.to_string() }
}

/// libpq `key=value` form; values may be single-quoted with `\` escapes.
fn mask_key_values(raw: &str) -> String {
    let unparsed = || {
        if raw.contains("password") {
            "<connection string>".to_string()
        } else {
            raw.to_string()
        }
    };

    let mut pairs = Vec::new();
    let mut rest = raw.trim_start();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            return unparsed();
        };
        let key = rest[..eq].trim();
        if key.is_empty() || key.contains(char::is_whitespace) {
            return unparsed();
        }
        let after = rest[eq + 1..].trim_start();
        let (value, remaining) = match after.strip_prefix('\'') {
            Some(quoted) => {
                let mut escaped = false;
                let close = quoted.char_indices().find_map(|(i, c)| match c {
                    _ if escaped => {
                        escaped = false;
                        None
                    }
                    '\\' => {
                        escaped = true;
                        None
                    }
                    '\'' => Some(i),
                    _ => None,
                });
                let Some(close) = close else {
                    return unparsed();
                };
                (&after[..close + 2], &quoted[close + 1..])
            }
            None => {
                let end = after.find(char::is_whitespace).unwrap_or(after.len());
                (&after[..end], &after[end..])
            }
        };
        let value = if key == "password" { MASK } else { value };
        pairs.push(format!("{key}={value}"));
        rest = remaining.trim_start();
    }
    pairs.join(" ")
}

/// Truncate long SQL on a char boundary.
pub(crate) fn truncate_sql(sql: &str) -> String {
    if sql.len() <= MAX_SQL_IN_ERROR {
        return sql.to_string();
    }
    let mut end = MAX_SQL_IN_ERROR;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &sql[..end])
}
