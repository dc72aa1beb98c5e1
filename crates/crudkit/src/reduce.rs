//! Result reduction: zero, one or many rows.

use crate::error::{CrudError, CrudResult};
use crate::query::SelectQuery;

/// Shape of a lookup result.
#[derive(Debug, Clone, PartialEq)]
pub enum Reduced<T> {
    None,
    Exactly(T),
    /// First row and the number of rows fetched. A lookup bounded by
    /// [`bound_lookup`] fetches at most two, so the count is a lower bound.
    Many(T, usize),
}

impl<T> Reduced<T> {
    pub fn from_rows(rows: Vec<T>) -> Self {
        let count = rows.len();
        let mut iter = rows.into_iter();
        match (iter.next(), count) {
            (None, _) => Reduced::None,
            (Some(first), 1) => Reduced::Exactly(first),
            (Some(first), n) => Reduced::Many(first, n),
        }
    }

    pub fn count(&self) -> usize {
        match self {
            Reduced::None => 0,
            Reduced::Exactly(_) => 1,
            Reduced::Many(_, n) => *n,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Reduced<U> {
        match self {
            Reduced::None => Reduced::None,
            Reduced::Exactly(t) => Reduced::Exactly(f(t)),
            Reduced::Many(t, n) => Reduced::Many(f(t), n),
        }
    }
}

/// What to do when a lookup matches more than one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReduceMode {
    /// Return the first row and log a warning.
    #[default]
    FirstOfMany,
    /// Raise `MultipleFound`.
    Strict,
}

impl ReduceMode {
    /// Collapse `reduced` to at most one row.
    pub fn apply<T>(self, reduced: Reduced<T>, table: &str, query: &SelectQuery) -> CrudResult<Option<T>> {
        match reduced {
            Reduced::None => Ok(None),
            Reduced::Exactly(t) => Ok(Some(t)),
            Reduced::Many(first, count) => match self {
                ReduceMode::FirstOfMany => {
                    tracing::warn!(
                        target: "crudkit",
                        table,
                        count,
                        filters = %describe_filters(query),
                        "multiple rows matched a single-row lookup, using the first"
                    );
                    Ok(Some(first))
                }
                ReduceMode::Strict => Err(CrudError::multiple_found(
                    table,
                    count,
                    Some(describe_filters(query)),
                )),
            },
        }
    }
}

/// Give a single-row lookup a deterministic order.
pub fn ensure_ordering(query: SelectQuery, primary_key: &str) -> SelectQuery {
    if query.has_ordering() {
        query
    } else {
        query.order_by(primary_key, false)
    }
}

/// Stop a first-of-many lookup after two rows, which is enough to tell one
/// match from many. Strict lookups keep the exact count for their error.
pub fn bound_lookup(query: SelectQuery, mode: ReduceMode) -> SelectQuery {
    match (mode, query.limit) {
        (ReduceMode::FirstOfMany, None) => query.limit(2),
        _ => query,
    }
}

pub(crate) fn describe_filters(query: &SelectQuery) -> String {
    query
        .predicates
        .iter()
        .map(|p| format!("{p:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}
