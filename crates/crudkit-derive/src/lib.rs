//! Derive macro for crudkit
//!
//! Provides `#[derive(Model)]`.

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

mod model;

/// Derive `crudkit::Model` for a struct with named fields.
///
/// # Example
///
/// ```ignore
/// use crudkit::prelude::*;
///
/// #[derive(Debug, Clone, Model)]
/// #[orm(table = "widgets")]
/// #[orm(has_many(name = "tags", table = "tags", foreign_key = "widget_id"))]
/// struct Widget {
///     #[orm(id)]
///     id: Option<i64>,
///     #[orm(column = "display_name")]
///     name: String,
///     #[orm(flatten)]
///     audit: AuditFields,
///     #[orm(related = "tags")]
///     tags: Vec<Tag>,
/// }
/// ```
///
/// # Attributes
///
/// Struct level:
/// - `#[orm(table = "name")]` - Table name (required)
/// - `#[orm(has_many(name = "..", table = "..", foreign_key = ".."))]` - Child rows
///   whose `foreign_key` points at this table's primary key
/// - `#[orm(belongs_to(name = "..", table = "..", foreign_key = ".."))]` - Parent row
///   referenced by this table's `foreign_key`
/// - Both relation forms accept `references = ".."` (default `id`)
///
/// Field level:
/// - `#[orm(id)]` - Primary key (defaults to a field named `id`)
/// - `#[orm(column = "name")]` - Map field to a different column name
/// - `#[orm(flatten)]` - Embed a `FieldGroup` such as `AuditFields`
/// - `#[orm(related = "name")]` - Slot filled by eager loading of a relation
/// - `#[orm(skip)]` - Not stored; filled with `Default::default()` on load
#[proc_macro_derive(Model, attributes(orm))]
pub fn derive_model(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    model::expand(input)
        .unwrap_or_else(|e| e.to_compile_error())
        .into()
}
