//! Reusable field groups: audit stamps and soft delete.
//!
//! Embed them in a derived model with `#[orm(flatten)]`:
//!
//! ```ignore
//! #[derive(crudkit::Model)]
//! #[orm(table = "invoices")]
//! struct Invoice {
//!     #[orm(id)]
//!     id: Option<i64>,
//!     total: i64,
//!     #[orm(flatten)]
//!     audit: AuditFields,
//!     #[orm(flatten)]
//!     deletion: SoftDeleteFields,
//! }
//! ```

use crate::error::CrudResult;
use crate::model::{FieldGroup, FieldMap, take_field};
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `created_at` / `updated_at` timestamps and the acting users.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AuditFields {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_by: Option<String>,
}

impl AuditFields {
    /// Stamp a modification; the first call also stamps creation.
    pub fn touch(&mut self, user: Option<&str>) {
        let now = Utc::now();
        if self.created_at.is_none() {
            self.created_at = Some(now);
            self.created_by = user.map(str::to_string);
        }
        self.updated_at = Some(now);
        if let Some(user) = user {
            self.updated_by = Some(user.to_string());
        }
    }
}

impl FieldGroup for AuditFields {
    const FIELDS: &'static [&'static str] = &["created_at", "updated_at", "created_by", "updated_by"];

    fn write_fields(&self, out: &mut FieldMap) {
        out.insert("created_at".into(), self.created_at.into());
        out.insert("updated_at".into(), self.updated_at.into());
        out.insert("created_by".into(), self.created_by.clone().into());
        out.insert("updated_by".into(), self.updated_by.clone().into());
    }

    fn read_fields(fields: &mut FieldMap) -> CrudResult<Self> {
        Ok(Self {
            created_at: take_field(fields, "created_at")?,
            updated_at: take_field(fields, "updated_at")?,
            created_by: take_field(fields, "created_by")?,
            updated_by: take_field(fields, "updated_by")?,
        })
    }
}

/// `is_deleted` flag with who and when.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SoftDeleteFields {
    pub is_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<String>,
}

impl SoftDeleteFields {
    pub fn soft_delete(&mut self, user: Option<&str>) {
        self.is_deleted = true;
        self.deleted_at = Some(Utc::now());
        self.deleted_by = user.map(str::to_string);
    }

    pub fn restore(&mut self) {
        self.is_deleted = false;
        self.deleted_at = None;
        self.deleted_by = None;
    }
}

impl FieldGroup for SoftDeleteFields {
    const FIELDS: &'static [&'static str] = &["is_deleted", "deleted_at", "deleted_by"];

    fn write_fields(&self, out: &mut FieldMap) {
        out.insert("is_deleted".into(), self.is_deleted.into());
        out.insert("deleted_at".into(), self.deleted_at.into());
        out.insert("deleted_by".into(), self.deleted_by.clone().into());
    }

    fn read_fields(fields: &mut FieldMap) -> CrudResult<Self> {
        Ok(Self {
            is_deleted: take_field::<Option<bool>>(fields, "is_deleted")?.unwrap_or(false),
            deleted_at: take_field(fields, "deleted_at")?,
            deleted_by: take_field(fields, "deleted_by")?,
        })
    }
}

fn stamp_if_absent(fields: &mut FieldMap, name: &str, now: DateTime<Utc>) {
    let entry = fields.entry(name.to_string()).or_insert(Value::Null);
    if entry.is_null() {
        *entry = Value::Timestamp(now);
    }
}

/// Fill `created_at` and `updated_at` when absent or null.
pub fn stamp_created(fields: &mut FieldMap, now: DateTime<Utc>) {
    stamp_if_absent(fields, "created_at", now);
    stamp_if_absent(fields, "updated_at", now);
}

/// Fill `updated_at` when absent or null.
pub fn stamp_updated(fields: &mut FieldMap, now: DateTime<Utc>) {
    stamp_if_absent(fields, "updated_at", now);
}

/// Field changes that soft-delete a row.
pub fn soft_delete_changes(user: Option<&str>, now: DateTime<Utc>) -> FieldMap {
    FieldMap::from([
        ("is_deleted".to_string(), Value::Bool(true)),
        ("deleted_at".to_string(), Value::Timestamp(now)),
        ("deleted_by".to_string(), Value::from(user)),
    ])
}

/// Field changes that restore a soft-deleted row.
pub fn restore_changes() -> FieldMap {
    FieldMap::from([
        ("is_deleted".to_string(), Value::Bool(false)),
        ("deleted_at".to_string(), Value::Null),
        ("deleted_by".to_string(), Value::Null),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_keeps_creation_stamp() {
        let mut audit = AuditFields::default();
        audit.touch(Some("ana"));
        let created = audit.created_at;
        audit.touch(Some("ben"));
        assert_eq!(audit.created_at, created);
        assert_eq!(audit.created_by.as_deref(), Some("ana"));
        assert_eq!(audit.updated_by.as_deref(), Some("ben"));
        assert!(audit.updated_at >= created);
    }

    #[test]
    fn soft_delete_and_restore() {
        let mut flags = SoftDeleteFields::default();
        flags.soft_delete(Some("ana"));
        assert!(flags.is_deleted);
        assert!(flags.deleted_at.is_some());
        flags.restore();
        assert_eq!(flags, SoftDeleteFields::default());
    }

    #[test]
    fn stamping_respects_explicit_values() {
        let earlier = Utc::now() - chrono::Duration::days(1);
        let now = Utc::now();
        let mut fields = FieldMap::from([("created_at".to_string(), Value::Timestamp(earlier))]);
        stamp_created(&mut fields, now);
        assert_eq!(fields["created_at"], Value::Timestamp(earlier));
        assert_eq!(fields["updated_at"], Value::Timestamp(now));
    }

    #[test]
    fn field_groups_round_trip_through_sqlite_encoding() {
        let mut fields = FieldMap::from([
            ("is_deleted".to_string(), Value::Int(1)),
            ("deleted_at".to_string(), Value::Text("2024-05-01T00:00:00.000000Z".into())),
            ("deleted_by".to_string(), Value::Null),
        ]);
        let flags = SoftDeleteFields::read_fields(&mut fields).unwrap();
        assert!(flags.is_deleted);
        assert!(flags.deleted_at.is_some());
        assert!(fields.is_empty());
    }
}
