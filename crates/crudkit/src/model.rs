//! Record types and their descriptors.
//!
//! A record type implements [`Model`], usually through `#[derive(Model)]`:
//!
//! ```ignore
//! #[derive(Debug, Clone, crudkit::Model)]
//! #[orm(table = "widgets", has_many(name = "tags", table = "tags", foreign_key = "widget_id"))]
//! struct Widget {
//!     #[orm(id)]
//!     id: Option<i64>,
//!     name: String,
//!     #[orm(flatten)]
//!     audit: AuditFields,
//!     #[orm(related = "tags")]
//!     tags: Vec<Tag>,
//! }
//! ```

use crate::error::{CrudError, CrudResult};
use crate::value::{FromValue, Value, convert_field};
use std::collections::BTreeMap;

/// A record's named field values.
pub type FieldMap = BTreeMap<String, Value>;

/// Direction of a relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// This table holds `foreign_key`, pointing at `table.references`.
    BelongsTo,
    /// `table.foreign_key` points back at this table's primary key.
    HasMany,
}

/// A named relation to another table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub name: &'static str,
    pub kind: RelationKind,
    pub table: &'static str,
    pub foreign_key: &'static str,
    pub references: &'static str,
}

impl Relation {
    pub fn belongs_to(name: &'static str, table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::BelongsTo,
            table,
            foreign_key,
            references: "id",
        }
    }

    pub fn has_many(name: &'static str, table: &'static str, foreign_key: &'static str) -> Self {
        Self {
            name,
            kind: RelationKind::HasMany,
            table,
            foreign_key,
            references: "id",
        }
    }

    /// Column the foreign key points at (default `id`).
    pub fn references(mut self, column: &'static str) -> Self {
        self.references = column;
        self
    }
}

/// Table descriptor for a record type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub table: &'static str,
    pub fields: Vec<&'static str>,
    pub primary_key: &'static str,
    pub relations: Vec<Relation>,
}

impl Schema {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            fields: Vec::new(),
            primary_key: "id",
            relations: Vec::new(),
        }
    }

    pub fn fields(mut self, fields: impl IntoIterator<Item = &'static str>) -> Self {
        self.fields.extend(fields);
        self
    }

    pub fn primary_key(mut self, field: &'static str) -> Self {
        self.primary_key = field;
        self
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| *f == name)
    }

    pub fn find_relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// `Validation` error unless `name` is a field of this schema.
    pub fn require_field(&self, name: &str) -> CrudResult<()> {
        if self.has_field(name) {
            Ok(())
        } else {
            Err(CrudError::invalid_field(
                name,
                None,
                format!("unknown field on {}", self.table),
            ))
        }
    }

    pub fn require_relation(&self, name: &str) -> CrudResult<&Relation> {
        self.find_relation(name).ok_or_else(|| {
            CrudError::invalid_field(name, None, format!("unknown relation on {}", self.table))
        })
    }

    /// Check a set of field names, reporting every unknown one.
    pub fn check_fields<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> CrudResult<()> {
        let errors: BTreeMap<String, String> = names
            .into_iter()
            .filter(|n| !self.has_field(n))
            .map(|n| (n.to_string(), format!("unknown field on {}", self.table)))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CrudError::invalid_fields(
                format!("{} unknown field(s)", errors.len()),
                errors,
            ))
        }
    }

    /// Carries `created_at` and `updated_at`.
    pub fn is_audited(&self) -> bool {
        self.has_field("created_at") && self.has_field("updated_at")
    }

    /// Carries `is_deleted`.
    pub fn supports_soft_delete(&self) -> bool {
        self.has_field("is_deleted")
    }
}

/// A record type stored in one table.
pub trait Model: Sized + Send + Sync + 'static {
    fn schema() -> &'static Schema;

    fn to_fields(&self) -> FieldMap;

    fn from_fields(fields: FieldMap) -> CrudResult<Self>;

    /// Store eagerly loaded rows of `relation` on this record.
    fn attach(&mut self, relation: &str, rows: Vec<FieldMap>) -> CrudResult<()> {
        let _ = rows;
        Err(CrudError::invalid_field(
            relation,
            None,
            format!("{} has no relation slot", Self::schema().table),
        ))
    }

    fn primary_key_value(&self) -> Value {
        self.to_fields()
            .remove(Self::schema().primary_key)
            .unwrap_or(Value::Null)
    }
}

/// A reusable group of fields embedded with `#[orm(flatten)]`.
pub trait FieldGroup: Sized {
    const FIELDS: &'static [&'static str];

    fn write_fields(&self, out: &mut FieldMap);

    fn read_fields(fields: &mut FieldMap) -> CrudResult<Self>;
}

/// Value types that can hold eagerly loaded rows.
pub trait Related: Sized {
    fn from_related_rows(rows: Vec<FieldMap>) -> CrudResult<Self>;
}

impl<T: Model> Related for Vec<T> {
    fn from_related_rows(rows: Vec<FieldMap>) -> CrudResult<Self> {
        rows.into_iter().map(T::from_fields).collect()
    }
}

impl<T: Model> Related for Option<T> {
    fn from_related_rows(rows: Vec<FieldMap>) -> CrudResult<Self> {
        rows.into_iter().next().map(T::from_fields).transpose()
    }
}

/// Remove `name` from `fields` and convert it. A missing field reads as `Null`.
pub fn take_field<T: FromValue>(fields: &mut FieldMap, name: &str) -> CrudResult<T> {
    let value = fields.remove(name).unwrap_or(Value::Null);
    convert_field(name, value)
}

/// Return a copy of `record` with `changes` applied.
///
/// Every changed name must be a field of the schema; the primary key cannot
/// be changed.
pub fn apply_changes<M: Model>(record: &M, changes: &FieldMap) -> CrudResult<M> {
    let schema = M::schema();
    schema.check_fields(changes.keys().map(String::as_str))?;
    if let Some(v) = changes.get(schema.primary_key) {
        let current = record.primary_key_value();
        if *v != current {
            return Err(CrudError::invalid_field(
                schema.primary_key,
                Some(v.to_string()),
                "primary key cannot be changed",
            ));
        }
    }
    let mut fields = record.to_fields();
    fields.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
    M::from_fields(fields)
}

/// Keep only the schema's own columns.
pub(crate) fn column_fields(schema: &Schema, mut fields: FieldMap) -> FieldMap {
    fields.retain(|k, _| schema.has_field(k));
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: Option<i64>,
        title: String,
    }

    impl Model for Note {
        fn schema() -> &'static Schema {
            static SCHEMA: OnceLock<Schema> = OnceLock::new();
            SCHEMA.get_or_init(|| Schema::new("notes").fields(["id", "title"]))
        }

        fn to_fields(&self) -> FieldMap {
            let mut out = FieldMap::new();
            out.insert("id".into(), self.id.into());
            out.insert("title".into(), self.title.clone().into());
            out
        }

        fn from_fields(mut fields: FieldMap) -> CrudResult<Self> {
            Ok(Self {
                id: take_field(&mut fields, "id")?,
                title: take_field(&mut fields, "title")?,
            })
        }
    }

    #[test]
    fn apply_changes_updates_known_fields() {
        let note = Note {
            id: Some(1),
            title: "draft".into(),
        };
        let changes = FieldMap::from([("title".to_string(), Value::from("final"))]);
        let updated = apply_changes(&note, &changes).unwrap();
        assert_eq!(updated.title, "final");
        assert_eq!(updated.id, Some(1));
    }

    #[test]
    fn apply_changes_rejects_unknown_fields() {
        let note = Note {
            id: Some(1),
            title: "draft".into(),
        };
        let changes = FieldMap::from([
            ("colour".to_string(), Value::from("red")),
            ("size".to_string(), Value::from(3)),
        ]);
        match apply_changes(&note, &changes).unwrap_err() {
            CrudError::Validation { errors, .. } => {
                assert_eq!(errors.len(), 2);
                assert!(errors.contains_key("colour"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn apply_changes_refuses_primary_key_change() {
        let note = Note {
            id: Some(1),
            title: "draft".into(),
        };
        let changes = FieldMap::from([("id".to_string(), Value::from(2))]);
        assert!(apply_changes(&note, &changes).unwrap_err().is_validation());
    }

    #[test]
    fn missing_required_field_fails_to_decode() {
        let err = Note::from_fields(FieldMap::new()).unwrap_err();
        assert!(matches!(err, CrudError::Decode { ref column, .. } if column == "title"));
    }

    #[test]
    fn schema_flags() {
        let schema = Schema::new("widgets").fields(["id", "created_at", "updated_at"]);
        assert!(schema.is_audited());
        assert!(!schema.supports_soft_delete());
    }
}
