//! Runtime configuration.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `SQL_DIALECT` | `postgres` (default), `sqlite` or `mysql` |
//! | `DATABASE_URL` | connection string for the session driver |
//! | `CRUDKIT_SLOW_QUERY_MS` | statements slower than this are logged at WARN |
//!
//! `.env` files are honored through `dotenvy`.

use crate::dialect::Dialect;
use crate::error::{CrudError, CrudResult};
use std::time::Duration;

pub const ENV_DIALECT: &str = "SQL_DIALECT";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_SLOW_QUERY_MS: &str = "CRUDKIT_SLOW_QUERY_MS";

/// Configuration shared by the bulk writer, the drivers and the monitor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrudConfig {
    /// Dialect used to render statements.
    pub dialect: Dialect,
    /// Store connection string.
    pub database_url: Option<String>,
    /// Slow statement threshold for [`Instrumented`](crate::monitor::Instrumented).
    pub slow_query_threshold: Option<Duration>,
}

impl CrudConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Set slow statement threshold.
    pub fn slow_query_threshold(mut self, threshold: Duration) -> Self {
        self.slow_query_threshold = Some(threshold);
        self
    }

    /// Load `.env` (if present) and read the process environment.
    pub fn from_env() -> CrudResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CrudResult<Self> {
        let dialect = match lookup(ENV_DIALECT) {
            Some(raw) if !raw.trim().is_empty() => raw.parse()?,
            _ => {
                tracing::debug!(
                    target: "crudkit",
                    "{ENV_DIALECT} not set, defaulting to {}",
                    Dialect::default()
                );
                Dialect::default()
            }
        };

        let slow_query_threshold = match lookup(ENV_SLOW_QUERY_MS) {
            Some(raw) => {
                let ms: u64 = raw.trim().parse().map_err(|_| {
                    CrudError::Config(format!("{ENV_SLOW_QUERY_MS} must be an integer, got '{raw}'"))
                })?;
                Some(Duration::from_millis(ms))
            }
            None => None,
        };

        Ok(Self {
            dialect,
            database_url: lookup(ENV_DATABASE_URL).filter(|u| !u.trim().is_empty()),
            slow_query_threshold,
        })
    }

    /// The connection string, or a `Config` error naming the variable.
    pub fn require_database_url(&self) -> CrudResult<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| CrudError::Config(format!("{ENV_DATABASE_URL} is not set")))
    }
}
