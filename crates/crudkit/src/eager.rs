//! Eager loading (batch preloading for relations).
//!
//! Each relation costs exactly one extra query: the keys of all loaded
//! records are collected, the related rows are fetched with a single `IN`
//! query, grouped by key and handed to [`Model::attach`].
//!
//! Relations requested with [`LoadStrategy::Lazy`] are validated but not
//! fetched; call [`load_related`] / [`load_related_blocking`] when they are
//! needed.

use crate::error::CrudResult;
use crate::model::{FieldMap, Model, Relation, RelationKind};
use crate::query::{Predicate, SelectQuery};
use crate::session::{BlockingSession, Session};
use crate::value::Value;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// One batched follow-up query before the helper returns.
    Immediate,
    /// Nothing is fetched until the caller asks for it.
    Lazy,
}

/// A relation to load alongside the main rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EagerLoad {
    pub relation: String,
    pub strategy: LoadStrategy,
}

impl EagerLoad {
    pub fn immediate(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            strategy: LoadStrategy::Immediate,
        }
    }

    pub fn lazy(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            strategy: LoadStrategy::Lazy,
        }
    }
}

/// Key column on the loaded records and matching column on the related table.
fn key_columns<M: Model>(relation: &Relation) -> (&'static str, &'static str) {
    match relation.kind {
        RelationKind::BelongsTo => (relation.foreign_key, relation.references),
        RelationKind::HasMany => (M::schema().primary_key, relation.foreign_key),
    }
}

/// The batched query for `relation`, or `None` when no record has a key.
fn related_query<M: Model>(records: &[M], relation: &Relation) -> Option<SelectQuery> {
    let (parent_key, target_column) = key_columns::<M>(relation);
    let mut seen = HashSet::new();
    let keys: Vec<Value> = records
        .iter()
        .filter_map(|r| r.to_fields().remove(parent_key))
        .filter(|v| !v.is_null())
        .filter(|v| seen.insert(v.join_key()))
        .collect();
    if keys.is_empty() {
        return None;
    }
    Some(SelectQuery::new(relation.table).filter(Predicate::in_list(target_column, keys)))
}

fn attach_rows<M: Model>(records: &mut [M], relation: &Relation, rows: Vec<FieldMap>) -> CrudResult<()> {
    let (parent_key, target_column) = key_columns::<M>(relation);
    let mut grouped: HashMap<String, Vec<FieldMap>> = HashMap::new();
    for row in rows {
        let Some(key) = row.get(target_column).filter(|v| !v.is_null()) else {
            continue;
        };
        grouped.entry(key.join_key()).or_default().push(row);
    }

    for record in records.iter_mut() {
        let rows = record
            .to_fields()
            .get(parent_key)
            .and_then(|k| grouped.get(&k.join_key()))
            .cloned()
            .unwrap_or_default();
        record.attach(relation.name, rows)?;
    }
    Ok(())
}

/// Load `relation` for every record with one query.
pub async fn load_related<M: Model, S: Session>(
    session: &mut S,
    records: &mut [M],
    relation: &str,
) -> CrudResult<()> {
    let relation = M::schema().require_relation(relation)?;
    let rows = match related_query(records, relation) {
        Some(query) => session.fetch_all(&query.render(session.dialect())?).await?,
        None => Vec::new(),
    };
    tracing::debug!(
        target: "crudkit",
        relation = relation.name,
        records = records.len(),
        rows = rows.len(),
        "eager load"
    );
    attach_rows(records, relation, rows)
}

/// Blocking [`load_related`].
pub fn load_related_blocking<M: Model, S: BlockingSession>(
    session: &mut S,
    records: &mut [M],
    relation: &str,
) -> CrudResult<()> {
    let relation = M::schema().require_relation(relation)?;
    let rows = match related_query(records, relation) {
        Some(query) => session.fetch_all(&query.render(session.dialect())?)?,
        None => Vec::new(),
    };
    tracing::debug!(
        target: "crudkit",
        relation = relation.name,
        records = records.len(),
        rows = rows.len(),
        "eager load"
    );
    attach_rows(records, relation, rows)
}

pub(crate) async fn load_immediate<M: Model, S: Session>(
    session: &mut S,
    records: &mut [M],
    loads: &[EagerLoad],
) -> CrudResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    for load in loads.iter().filter(|l| l.strategy == LoadStrategy::Immediate) {
        load_related(session, records, &load.relation).await?;
    }
    Ok(())
}

pub(crate) fn load_immediate_blocking<M: Model, S: BlockingSession>(
    session: &mut S,
    records: &mut [M],
    loads: &[EagerLoad],
) -> CrudResult<()> {
    if records.is_empty() {
        return Ok(());
    }
    for load in loads.iter().filter(|l| l.strategy == LoadStrategy::Immediate) {
        load_related_blocking(session, records, &load.relation)?;
    }
    Ok(())
}
