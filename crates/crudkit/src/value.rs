//! Dynamically typed field values.
//!
//! Filters, field maps and bound statement parameters all carry [`Value`]s so
//! that the same record can travel through the Postgres and SQLite drivers.
//! [`FromValue`] converts back into Rust field types and accepts the textual
//! encodings SQLite hands back for dates, timestamps, uuids and json.

use crate::error::{CrudError, CrudResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Truthiness used for flag-like filter keys such as `sort_desc`.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on" | "desc"
            ),
            _ => true,
        }
    }

    /// Stable textual key, used to group rows by a key value.
    pub(crate) fn key_repr(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => format!("b:{b}"),
            Value::Int(i) => format!("i:{i}"),
            Value::Float(f) => format!("f:{f}"),
            Value::Text(s) => format!("t:{s}"),
            Value::Date(d) => format!("d:{d}"),
            Value::Timestamp(t) => format!("ts:{}", t.timestamp_micros()),
            Value::Uuid(u) => format!("u:{u}"),
            Value::Json(j) => format!("j:{j}"),
        }
    }

    /// Key used to match values read from different columns.
    ///
    /// SQLite hands uuids, dates and timestamps back as TEXT and booleans as
    /// integers, so those encodings collapse onto the typed form.
    pub(crate) fn join_key(&self) -> String {
        match self {
            Value::Bool(b) => format!("i:{}", i64::from(*b)),
            Value::Text(s) => {
                if let Ok(u) = Uuid::parse_str(s.trim()) {
                    format!("u:{u}")
                } else if let Some(d) = parse_date(s) {
                    format!("d:{d}")
                } else if let Some(t) = parse_timestamp(s) {
                    format!("ts:{}", t.timestamp_micros())
                } else {
                    self.key_repr()
                }
            }
            other => other.key_repr(),
        }
    }

    /// Canonical text used when a store keeps the value as TEXT.
    pub(crate) fn to_text(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Timestamp(t) => Some(t.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Value::Uuid(u) => Some(u.to_string()),
            Value::Json(j) => Some(j.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => write!(f, "'{s}'"),
            other => write!(f, "'{}'", other.to_text().unwrap_or_default()),
        }
    }
}

// ==================== Rust -> Value ====================

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Int(i64::from(v))
                }
            }
        )*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::Timestamp(v.and_utc())
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Json(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

// ==================== Value -> Rust ====================

/// Conversion from a [`Value`] into a Rust field type.
pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, String>;
}

fn mismatch(expected: &str, value: &Value) -> String {
    format!("expected {expected}, got {} {}", value.kind(), value)
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, String> {
        Ok(value)
    }
}

impl FromValue for i64 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Int(i) => Ok(i),
            Value::Text(ref s) => s.trim().parse().map_err(|_| mismatch("integer", &value)),
            other => Err(mismatch("integer", &other)),
        }
    }
}

macro_rules! impl_from_value_narrow_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, String> {
                    let wide = i64::from_value(value)?;
                    <$ty>::try_from(wide).map_err(|e| format!("{e}: {wide}"))
                }
            }
        )*
    };
}

impl_from_value_narrow_int!(i8, i16, i32, u8, u16, u32, u64);

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self, String> {
        f64::from_value(value).map(|f| f as f32)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            other => Err(mismatch("bool", &other)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Text(s) => Ok(s),
            other => other.to_text().ok_or_else(|| mismatch("text", &other)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Date(d) => Ok(d),
            Value::Timestamp(t) => Ok(t.date_naive()),
            Value::Text(ref s) => parse_date(s).ok_or_else(|| mismatch("date", &value)),
            other => Err(mismatch("date", &other)),
        }
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Timestamp(t) => Ok(t),
            Value::Date(d) => Ok(d.and_time(chrono::NaiveTime::MIN).and_utc()),
            Value::Text(ref s) => parse_timestamp(s).ok_or_else(|| mismatch("timestamp", &value)),
            other => Err(mismatch("timestamp", &other)),
        }
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Uuid(u) => Ok(u),
            Value::Text(ref s) => Uuid::parse_str(s).map_err(|_| mismatch("uuid", &value)),
            other => Err(mismatch("uuid", &other)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Json(j) => Ok(j),
            Value::Text(s) => serde_json::from_str(&s).map_err(|e| e.to_string()),
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(b)),
            Value::Int(i) => Ok(serde_json::Value::from(i)),
            Value::Float(f) => Ok(serde_json::Value::from(f)),
            other => Err(mismatch("json", &other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// Parse `YYYY-MM-DD`.
pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Parse RFC 3339 or a naive `YYYY-MM-DD[ T]HH:MM:SS[.f]` (taken as UTC).
pub(crate) fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|t| t.and_utc())
}

/// Convert a value taken out of a field map, naming the field on failure.
pub fn convert_field<T: FromValue>(field: &str, value: Value) -> CrudResult<T> {
    T::from_value(value).map_err(|message| CrudError::decode(field, message))
}

// ==================== Driver bindings ====================

#[cfg(feature = "postgres")]
mod pg {
    use super::Value;
    use bytes::BytesMut;
    use chrono::NaiveTime;
    use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
    use uuid::Uuid;

    type BoxError = Box<dyn std::error::Error + Sync + Send>;

    impl ToSql for Value {
        fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
            match self {
                Value::Null => Ok(IsNull::Yes),
                Value::Bool(v) => v.to_sql(ty, out),
                Value::Int(v) => {
                    if *ty == Type::INT2 {
                        i16::try_from(*v)?.to_sql(ty, out)
                    } else if *ty == Type::INT4 {
                        i32::try_from(*v)?.to_sql(ty, out)
                    } else if *ty == Type::FLOAT4 {
                        (*v as f32).to_sql(ty, out)
                    } else if *ty == Type::FLOAT8 {
                        (*v as f64).to_sql(ty, out)
                    } else if *ty == Type::TEXT || *ty == Type::VARCHAR {
                        v.to_string().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Float(v) => {
                    if *ty == Type::FLOAT4 {
                        (*v as f32).to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Text(v) => text_to_sql(v, ty, out),
                Value::Date(v) => {
                    if *ty == Type::TIMESTAMP {
                        v.and_time(NaiveTime::MIN).to_sql(ty, out)
                    } else if *ty == Type::TIMESTAMPTZ {
                        v.and_time(NaiveTime::MIN).and_utc().to_sql(ty, out)
                    } else if <String as ToSql>::accepts(ty) {
                        v.format("%Y-%m-%d").to_string().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Timestamp(v) => {
                    if *ty == Type::TIMESTAMP {
                        v.naive_utc().to_sql(ty, out)
                    } else if *ty == Type::DATE {
                        v.date_naive().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Uuid(v) => {
                    if <String as ToSql>::accepts(ty) {
                        v.to_string().to_sql(ty, out)
                    } else {
                        v.to_sql(ty, out)
                    }
                }
                Value::Json(v) => v.to_sql(ty, out),
            }
        }

        fn accepts(_ty: &Type) -> bool {
            true
        }

        to_sql_checked!();
    }

    /// Text bound to a typed parameter is parsed into that type first.
    fn text_to_sql(v: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let parse_error = |what: &str| -> BoxError { format!("cannot bind {v:?} as {what}").into() };
        if *ty == Type::DATE {
            super::parse_date(v).ok_or_else(|| parse_error("date"))?.to_sql(ty, out)
        } else if *ty == Type::TIMESTAMPTZ || *ty == Type::TIMESTAMP {
            let ts = super::parse_timestamp(v)
                .or_else(|| super::parse_date(v).map(|d| d.and_time(NaiveTime::MIN).and_utc()))
                .ok_or_else(|| parse_error("timestamp"))?;
            Value::Timestamp(ts).to_sql(ty, out)
        } else if *ty == Type::UUID {
            Uuid::parse_str(v.trim())
                .map_err(|_| parse_error("uuid"))?
                .to_sql(ty, out)
        } else if *ty == Type::INT2 || *ty == Type::INT4 || *ty == Type::INT8 {
            let n: i64 = v.trim().parse().map_err(|_| parse_error("integer"))?;
            Value::Int(n).to_sql(ty, out)
        } else if *ty == Type::FLOAT4 || *ty == Type::FLOAT8 {
            let f: f64 = v.trim().parse().map_err(|_| parse_error("float"))?;
            Value::Float(f).to_sql(ty, out)
        } else if *ty == Type::BOOL {
            let b = match v.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" | "on" => true,
                "false" | "f" | "0" | "no" | "off" => false,
                _ => return Err(parse_error("bool")),
            };
            b.to_sql(ty, out)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            serde_json::from_str::<serde_json::Value>(v)
                .unwrap_or_else(|_| serde_json::Value::String(v.to_string()))
                .to_sql(ty, out)
        } else if <String as ToSql>::accepts(ty) {
            v.to_sql(ty, out)
        } else {
            Err(format!("cannot bind text to a {ty} parameter").into())
        }
    }
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::Value;
    use rusqlite::types::{ToSqlOutput, ValueRef};

    impl rusqlite::ToSql for Value {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(match self {
                Value::Null => ToSqlOutput::from(rusqlite::types::Null),
                Value::Bool(b) => ToSqlOutput::from(*b),
                Value::Int(i) => ToSqlOutput::from(*i),
                Value::Float(f) => ToSqlOutput::from(*f),
                Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
                other => ToSqlOutput::from(other.to_text().unwrap_or_default()),
            })
        }
    }

    impl From<ValueRef<'_>> for Value {
        fn from(v: ValueRef<'_>) -> Self {
            match v {
                ValueRef::Null => Value::Null,
                ValueRef::Integer(i) => Value::Int(i),
                ValueRef::Real(f) => Value::Float(f),
                ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(b) => Value::Text(String::from_utf8_lossy(b).into_owned()),
            }
        }
    }
}
