//! Filter resolution for the row-listing helpers.
//!
//! A [`Filters`] map is turned into a [`SelectQuery`]:
//!
//! - `field__lte` / `field__gte` become inclusive range bounds. Date-like text
//!   on a field whose name contains `date` is parsed as a date or timestamp,
//!   and all-digit text is parsed as an integer.
//! - `sort_field` / `sort_desc` become the ORDER BY.
//! - The configured text field, when present in the filters, becomes a
//!   dialect-native text search.
//! - Every other key is an equality match.
//! - Soft-deleted rows are hidden unless asked for.
//!
//! Pagination is applied last.

use crate::eager::EagerLoad;
use crate::error::{CrudError, CrudResult};
use crate::model::{FieldMap, Schema};
use crate::query::{Predicate, SelectQuery};
use crate::value::{Value, parse_date, parse_timestamp};
use std::collections::BTreeMap;

pub const SORT_FIELD: &str = "sort_field";
pub const SORT_DESC: &str = "sort_desc";
pub const LTE_SUFFIX: &str = "__lte";
pub const GTE_SUFFIX: &str = "__gte";

pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Filter keys and their values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filters(BTreeMap<String, Value>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chainable insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// `field__lte` bound.
    pub fn lte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(format!("{field}{LTE_SUFFIX}"), value)
    }

    /// `field__gte` bound.
    pub fn gte(self, field: &str, value: impl Into<Value>) -> Self {
        self.with(format!("{field}{GTE_SUFFIX}"), value)
    }

    pub fn sort_by(self, field: &str, descending: bool) -> Self {
        self.with(SORT_FIELD, field).with(SORT_DESC, descending)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, Value> {
        self.0
    }
}

impl From<FieldMap> for Filters {
    fn from(map: FieldMap) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Relations to load with the main rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadOptions {
    pub eager: Vec<EagerLoad>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load `relation` with one batched query before returning.
    pub fn immediate(mut self, relation: impl Into<String>) -> Self {
        self.eager.push(EagerLoad::immediate(relation));
        self
    }

    /// Defer `relation` until the caller asks for it.
    pub fn lazy(mut self, relation: impl Into<String>) -> Self {
        self.eager.push(EagerLoad::lazy(relation));
        self
    }
}

/// Page, text search and loading options of a listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ListOptions {
    pub page: u64,
    pub page_size: u64,
    pub text_field: Option<String>,
    pub load: LoadOptions,
    pub include_deleted: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
            text_field: None,
            load: LoadOptions::default(),
            include_deleted: false,
        }
    }
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, page: u64, page_size: u64) -> Self {
        self.page = page;
        self.page_size = page_size;
        self
    }

    pub fn text_field(mut self, field: impl Into<String>) -> Self {
        self.text_field = Some(field.into());
        self
    }

    pub fn load(mut self, load: LoadOptions) -> Self {
        self.load = load;
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }
}

/// Coerce the value of a range bound.
pub fn coerce_bound(field: &str, value: Value) -> Value {
    let Value::Text(text) = value else {
        return value;
    };
    if field.contains("date") {
        if let Some(d) = parse_date(&text) {
            return Value::Date(d);
        }
        if let Some(t) = parse_timestamp(&text) {
            return Value::Timestamp(t);
        }
    }
    if !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(i) = text.parse() {
            return Value::Int(i);
        }
    }
    Value::Text(text)
}

/// Resolve `filters` into a paginated query over `schema`.
pub fn resolve(schema: &Schema, filters: &Filters, options: &ListOptions) -> CrudResult<SelectQuery> {
    let mut remaining = filters.clone().into_inner();
    let sort_field = remaining.remove(SORT_FIELD);
    let sort_desc = remaining.remove(SORT_DESC).is_some_and(|v| v.is_truthy());

    let mut query = SelectQuery::new(schema.table);
    let mut errors = BTreeMap::new();
    let mut check = |field: &str| {
        if !schema.has_field(field) {
            errors.insert(field.to_string(), format!("unknown field on {}", schema.table));
        }
    };

    let mut predicates = Vec::new();

    if let Some(text_field) = &options.text_field {
        check(text_field);
        match remaining.remove(text_field.as_str()) {
            None | Some(Value::Null) => {}
            Some(Value::Text(q)) if q.trim().is_empty() => {}
            Some(v) => {
                let q = v.to_text().unwrap_or_else(|| v.to_string());
                predicates.push(Predicate::text_match(text_field.as_str(), q));
            }
        }
    }

    for (key, value) in remaining {
        if let Some(field) = key.strip_suffix(LTE_SUFFIX) {
            check(field);
            predicates.push(Predicate::lte(field, coerce_bound(field, value)));
        } else if let Some(field) = key.strip_suffix(GTE_SUFFIX) {
            check(field);
            predicates.push(Predicate::gte(field, coerce_bound(field, value)));
        } else {
            check(&key);
            predicates.push(Predicate::eq(key, value));
        }
    }

    let order = match sort_field {
        None | Some(Value::Null) => None,
        Some(Value::Text(field)) => {
            check(&field);
            Some(field)
        }
        Some(other) => {
            return Err(CrudError::invalid_field(
                SORT_FIELD,
                Some(other.to_string()),
                "sort_field must name a field",
            ));
        }
    };

    if !errors.is_empty() {
        return Err(CrudError::invalid_fields(
            format!("{} unknown filter field(s)", errors.len()),
            errors,
        ));
    }

    if schema.supports_soft_delete()
        && !options.include_deleted
        && !predicates.iter().any(|p| p.field() == "is_deleted")
    {
        predicates.push(Predicate::eq("is_deleted", false));
    }

    query.predicates = predicates;
    if let Some(field) = order {
        query = query.order_by(field, sort_desc);
    }
    for load in &options.load.eager {
        schema.require_relation(&load.relation)?;
        query = query.eager(load.clone());
    }
    query.paginate(options.page, options.page_size)
}

/// Equality-only query over `lookup`, as used by get-or-create.
pub fn resolve_lookup(schema: &Schema, lookup: &FieldMap) -> CrudResult<SelectQuery> {
    if lookup.is_empty() {
        return Err(CrudError::validation("lookup must name at least one field"));
    }
    schema.check_fields(lookup.keys().map(String::as_str))?;
    Ok(lookup
        .iter()
        .fold(SelectQuery::new(schema.table), |q, (k, v)| {
            q.filter(Predicate::eq(k.as_str(), v.clone()))
        }))
}

#[cfg(test)]
mod tests;
