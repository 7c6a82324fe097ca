//! Typed native values for cached rows.
//!
//! Row data arrives as JSON, but the cache stores one tagged [`Value`]
//! variant per declared remote type so that primary-key tuples can be
//! compared, hashed and ordered without going through dynamic JSON. The
//! declared remote type name is parsed into a [`PgType`] once at schema
//! build time and drives all coercion afterwards.

use crate::error::{Result, SyncError};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::ser::{Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// Remote column type, parsed from the introspected type name.
///
/// Unknown names fall back to [`PgType::Other`], whose values are kept as
/// raw JSON — the cache never rejects a schema because of an exotic type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PgType {
    /// `bool`
    Bool,
    /// `int2`, `int4`, `int8` (and aliases)
    Int,
    /// `float4`, `float8`, `numeric`
    Float,
    /// `text`, `varchar`, `char`, `name`, `citext`
    Text,
    /// `uuid`
    Uuid,
    /// `timestamp` / `timestamptz`
    Timestamp,
    /// `date`
    Date,
    /// `time` / `timetz`
    Time,
    /// `json` / `jsonb`
    Json,
    /// Anything else; values pass through as raw JSON
    Other(String),
}

impl PgType {
    /// Parse a remote type name into a `PgType`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => PgType::Bool,
            "int2" | "int4" | "int8" | "smallint" | "integer" | "int" | "bigint" | "serial"
            | "bigserial" | "smallserial" => PgType::Int,
            "float4" | "float8" | "real" | "double precision" | "numeric" | "decimal" => {
                PgType::Float
            },
            "text" | "varchar" | "character varying" | "char" | "character" | "name"
            | "citext" => PgType::Text,
            "uuid" => PgType::Uuid,
            "timestamp" | "timestamptz" | "timestamp without time zone"
            | "timestamp with time zone" => PgType::Timestamp,
            "date" => PgType::Date,
            "time" | "timetz" | "time without time zone" | "time with time zone" => PgType::Time,
            "json" | "jsonb" => PgType::Json,
            _ => PgType::Other(name.to_string()),
        }
    }

    /// Coerce a raw JSON value into the native [`Value`] for this type.
    ///
    /// `dims` is the array-nesting depth declared by the schema; each level
    /// expects a JSON array and coerces its elements at `dims - 1`.
    pub fn coerce(&self, dims: u8, raw: &JsonValue) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }

        if dims > 0 {
            let items = raw.as_array().ok_or_else(|| {
                SyncError::Decode(format!(
                    "expected array of depth {} for {:?}, got {}",
                    dims, self, raw
                ))
            })?;
            let coerced: Result<Vec<Value>> =
                items.iter().map(|item| self.coerce(dims - 1, item)).collect();
            return Ok(Value::Array(coerced?));
        }

        match self {
            PgType::Bool => raw
                .as_bool()
                .map(Value::Bool)
                .ok_or_else(|| SyncError::Decode(format!("expected bool, got {}", raw))),
            PgType::Int => raw
                .as_i64()
                .map(Value::Int)
                .ok_or_else(|| SyncError::Decode(format!("expected integer, got {}", raw))),
            PgType::Float => raw
                .as_f64()
                .map(Value::Float)
                .ok_or_else(|| SyncError::Decode(format!("expected number, got {}", raw))),
            PgType::Text => raw
                .as_str()
                .map(|s| Value::Text(s.to_string()))
                .ok_or_else(|| SyncError::Decode(format!("expected string, got {}", raw))),
            PgType::Uuid => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| SyncError::Decode(format!("expected uuid string, got {}", raw)))?;
                Uuid::parse_str(s)
                    .map(Value::Uuid)
                    .map_err(|e| SyncError::Decode(format!("invalid uuid '{}': {}", s, e)))
            },
            PgType::Timestamp => {
                let s = raw.as_str().ok_or_else(|| {
                    SyncError::Decode(format!("expected timestamp string, got {}", raw))
                })?;
                parse_timestamp(s).map(Value::Timestamp)
            },
            PgType::Date => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| SyncError::Decode(format!("expected date string, got {}", raw)))?;
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .map(Value::Date)
                    .map_err(|e| SyncError::Decode(format!("invalid date '{}': {}", s, e)))
            },
            PgType::Time => {
                let s = raw
                    .as_str()
                    .ok_or_else(|| SyncError::Decode(format!("expected time string, got {}", raw)))?;
                NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
                    .map(Value::Time)
                    .map_err(|e| SyncError::Decode(format!("invalid time '{}': {}", s, e)))
            },
            PgType::Json | PgType::Other(_) => Ok(Value::Json(raw.clone())),
        }
    }
}

/// Accept RFC 3339 first, then the bare `timestamp` formats PostgREST emits.
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Ok(naive.and_utc());
        }
    }
    Err(SyncError::Decode(format!("invalid timestamp '{}'", s)))
}

/// A native cached value, tagged per declared remote type.
#[derive(Debug, Clone)]
pub enum Value {
    /// SQL NULL
    Null,
    /// Boolean
    Bool(bool),
    /// Any integer type
    Int(i64),
    /// Any floating-point or numeric type
    Float(f64),
    /// Any character type
    Text(String),
    /// UUID
    Uuid(Uuid),
    /// Timestamp (with or without zone; normalized to UTC)
    Timestamp(DateTime<Utc>),
    /// Calendar date
    Date(NaiveDate),
    /// Time of day
    Time(NaiveTime),
    /// JSON document, or any type without a native representation
    Json(JsonValue),
    /// Array column (possibly nested)
    Array(Vec<Value>),
}

impl Value {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer accessor.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Float accessor (also widens integers).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Boolean accessor.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// String accessor.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Convert back into plain JSON (for payloads and filters).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(v) => JsonValue::Bool(*v),
            Value::Int(v) => JsonValue::from(*v),
            Value::Float(v) => {
                serde_json::Number::from_f64(*v).map(JsonValue::Number).unwrap_or(JsonValue::Null)
            },
            Value::Text(v) => JsonValue::String(v.clone()),
            Value::Uuid(v) => JsonValue::String(v.to_string()),
            Value::Timestamp(v) => JsonValue::String(v.to_rfc3339()),
            Value::Date(v) => JsonValue::String(v.format("%Y-%m-%d").to_string()),
            Value::Time(v) => JsonValue::String(v.format("%H:%M:%S%.f").to_string()),
            Value::Json(v) => v.clone(),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Uuid(_) => 5,
            Value::Timestamp(_) => 6,
            Value::Date(_) => 7,
            Value::Time(_) => 8,
            Value::Json(_) => 9,
            Value::Array(_) => 10,
        }
    }
}

// Keys must be usable as map keys with deterministic iteration order, so
// equality, hashing and ordering are total. Floats compare and hash through
// their bit patterns (total_cmp), JSON through its serialized form.

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::Timestamp(a), Value::Timestamp(b)) => a == b,
            (Value::Date(a), Value::Date(b)) => a == b,
            (Value::Time(a), Value::Time(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.rank());
        match self {
            Value::Null => {},
            Value::Bool(v) => v.hash(state),
            Value::Int(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::Text(v) => v.hash(state),
            Value::Uuid(v) => v.hash(state),
            Value::Timestamp(v) => v.hash(state),
            Value::Date(v) => v.hash(state),
            Value::Time(v) => v.hash(state),
            Value::Json(v) => v.to_string().hash(state),
            Value::Array(items) => {
                for item in items {
                    item.hash(state);
                }
            },
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
            (Value::Date(a), Value::Date(b)) => a.cmp(b),
            (Value::Time(a), Value::Time(b)) => a.cmp(b),
            (Value::Json(a), Value::Json(b)) => a.to_string().cmp(&b.to_string()),
            (Value::Array(a), Value::Array(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Uuid(v) => write!(f, "{}", v),
            Value::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Value::Date(v) => write!(f, "{}", v),
            Value::Time(v) => write!(f, "{}", v),
            Value::Json(v) => write!(f, "{}", v),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            },
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
