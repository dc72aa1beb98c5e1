//! # crudkit
//!
//! CRUD helpers over SQL sessions, in async and blocking flavors.
//!
//! ## Features
//!
//! - **Get or create**: exact lookup, race-tolerant "insert or do nothing"
//! - **Filtered listing**: `field__lte` / `field__gte` bounds, sorting, text
//!   search and pagination from a flat filter map
//! - **Reduction**: explicit zero / one / many handling for single-row lookups
//! - **Bulk writes**: native upsert, batched insert with row-by-row fallback
//! - **Transactions**: scopes that commit on success and wrap failures
//! - **Soft delete and audit stamps** through embeddable field groups
//!
//! ## Example
//!
//! ```ignore
//! use crudkit::prelude::*;
//!
//! #[derive(Debug, Clone, Model)]
//! #[orm(table = "tickets")]
//! struct Ticket {
//!     #[orm(id)]
//!     id: Option<i64>,
//!     title: String,
//!     #[orm(flatten)]
//!     audit: AuditFields,
//! }
//!
//! let mut session = PgSession::from_config(&CrudConfig::from_env()?).await?;
//! let lookup = FieldMap::from([("title".to_string(), Value::from("triage"))]);
//! let got = crud::get_one_or_create::<Ticket, _>(&mut session, &lookup, &GetOrCreateOptions::new()).await?;
//!
//! crudkit::transaction!(&mut session, tx, {
//!     crud::update_row::<Ticket, _>(&mut tx, got.record.id, &changes).await?;
//!     Ok(())
//! })?;
//! ```

pub mod blocking;
pub mod bulk;
pub mod config;
pub mod crud;
pub mod dialect;
pub mod eager;
pub mod error;
pub mod filter;
pub mod ident;
pub mod mixins;
pub mod model;
pub mod monitor;
pub mod outcome;
pub mod prelude;
pub mod query;
pub mod reduce;
pub mod session;
pub mod sql;
pub mod transaction;
pub mod value;

mod plan;

#[cfg(feature = "pool")]
pub mod pool;

pub use bulk::BulkWriter;
pub use config::CrudConfig;
pub use dialect::Dialect;
pub use error::{BoxError, BulkFailure, CrudError, CrudResult};
pub use filter::{Filters, ListOptions, LoadOptions};
pub use model::{FieldMap, Model, Schema};
pub use outcome::{GetOrCreate, InsertReport, Outcome};
pub use session::{BlockingSession, Session};
pub use sql::{Sql, sql};
pub use value::Value;

#[cfg(feature = "derive")]
pub use crudkit_derive::Model;
