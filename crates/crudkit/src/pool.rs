//! Pooled Postgres sessions.
//!
//! ```ignore
//! let pool = crudkit::pool::create_pool(&CrudConfig::from_env()?)?;
//! let mut session = crudkit::pool::checkout(&pool).await?;
//! crud::get_rows::<Ticket, _>(&mut session, &filters, &ListOptions::new()).await?;
//! ```

use crate::config::CrudConfig;
use crate::dialect::Dialect;
use crate::error::{CrudError, CrudResult, sanitize_url};
use crate::session::PgSession;
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolBuilder, RecyclingMethod};
use tokio_postgres::NoTls;

/// Default upper bound of open connections.
pub const DEFAULT_MAX_SIZE: usize = 16;

/// A session over a pooled connection; dropping it returns the connection.
pub type PooledSession = PgSession<deadpool_postgres::Client>;

/// Pool for `config.database_url` with `NoTls` and [`DEFAULT_MAX_SIZE`].
pub fn create_pool(config: &CrudConfig) -> CrudResult<Pool> {
    create_pool_with_size(config, DEFAULT_MAX_SIZE)
}

pub fn create_pool_with_size(config: &CrudConfig, max_size: usize) -> CrudResult<Pool> {
    create_pool_with_builder(config, default_manager_config(), |builder| builder.max_size(max_size))
}

/// Pool with an injected manager config and pool builder tuning.
pub fn create_pool_with_builder(
    config: &CrudConfig,
    manager_config: ManagerConfig,
    configure_pool: impl FnOnce(PoolBuilder) -> PoolBuilder,
) -> CrudResult<Pool> {
    if config.dialect != Dialect::Postgres {
        return Err(CrudError::Config(format!(
            "connection pools serve postgres only, configured dialect is {}",
            config.dialect
        )));
    }
    let url = config.require_database_url()?;
    let pg_config: tokio_postgres::Config = url
        .parse()
        .map_err(|e: tokio_postgres::Error| CrudError::connection(url, e.to_string()))?;

    let manager = Manager::from_config(pg_config, NoTls, manager_config);
    let pool = configure_pool(Pool::builder(manager))
        .build()
        .map_err(|e| CrudError::Config(format!("pool setup failed: {e}")))?;
    tracing::info!(
        target: "crudkit",
        url = %sanitize_url(url),
        max_size = pool.status().max_size,
        "created connection pool"
    );
    Ok(pool)
}

/// Take a connection from `pool` and wrap it in a session.
pub async fn checkout(pool: &Pool) -> CrudResult<PooledSession> {
    let client = pool
        .get()
        .await
        .map_err(|e| CrudError::connection("pool", e.to_string()))?;
    Ok(PgSession::new(client))
}

fn default_manager_config() -> ManagerConfig {
    ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    }
}
