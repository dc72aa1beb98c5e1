//! Convenient imports for typical `crudkit` usage.
//!
//! ```ignore
//! use crudkit::prelude::*;
//! ```
//!
//! Only the async [`Session`] is exported here; blocking code imports
//! [`crate::blocking`] instead so the two session traits never collide.

pub use crate::bulk::BulkWriter;
pub use crate::config::CrudConfig;
pub use crate::crud::{self, GetOrCreateOptions};
pub use crate::dialect::Dialect;
pub use crate::error::{CrudError, CrudResult};
pub use crate::filter::{Filters, ListOptions, LoadOptions};
pub use crate::mixins::{AuditFields, SoftDeleteFields};
pub use crate::model::{FieldMap, Model};
pub use crate::outcome::{GetOrCreate, InsertReport, Outcome};
pub use crate::query::{Predicate, SelectQuery};
pub use crate::reduce::ReduceMode;
pub use crate::session::Session;
pub use crate::value::Value;

#[cfg(feature = "postgres")]
pub use crate::session::PgSession;
#[cfg(feature = "sqlite")]
pub use crate::session::SqliteSession;

#[cfg(feature = "derive")]
pub use crudkit_derive::Model;
