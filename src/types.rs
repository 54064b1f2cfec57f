use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value as JsonValue;

/// A column value read from a row, bound as a parameter, or carried in a [`FieldMap`].
///
/// Every backend converts to and from this one enum:
/// ```rust
/// use sql_crud_utils::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    Int(i64),
    Float(f64),
    Text(String),
    /// Stored as 0/1 by `SQLite`.
    Bool(bool),
    /// Timestamp value (UTC, no offset stored)
    Timestamp(NaiveDateTime),
    Null,
    /// Serialized as text by `SQLite`, `JSON`/`JSONB` on Postgres.
    JSON(JsonValue),
    Blob(Vec<u8>),
}

/// Column name to value mapping used for partial updates, defaults and upsert payloads.
pub type FieldMap = BTreeMap<String, RowValues>;

/// Build a [`FieldMap`] from `(column, value)` pairs.
///
/// ```rust
/// use sql_crud_utils::prelude::*;
///
/// let changes = field_map([("name", RowValues::from("renamed")), ("value", 7.into())]);
/// assert_eq!(changes.len(), 2);
/// ```
pub fn field_map<K, V, I>(pairs: I) -> FieldMap
where
    K: Into<String>,
    V: Into<RowValues>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

impl RowValues {
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            return Some(value);
        } else if let Some(i) = self.as_int() {
            if *i == 1 {
                return Some(&true);
            } else if *i == 0 {
                return Some(&false);
            }
        }
        None
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            return parse_timestamp(s);
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            RowValues::Float(value) => Some(*value),
            #[allow(clippy::cast_precision_loss)]
            RowValues::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_json(&self) -> Option<JsonValue> {
        match self {
            RowValues::JSON(v) => Some(v.clone()),
            RowValues::Text(s) => serde_json::from_str(s).ok(),
            _ => None,
        }
    }

    /// Short type label used in error messages.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            RowValues::Int(_) => "int",
            RowValues::Float(_) => "float",
            RowValues::Text(_) => "text",
            RowValues::Bool(_) => "bool",
            RowValues::Timestamp(_) => "timestamp",
            RowValues::Null => "null",
            RowValues::JSON(_) => "json",
            RowValues::Blob(_) => "blob",
        }
    }
}

/// Parse the timestamp layouts SQLite and Postgres hand back as text.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    const LAYOUTS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    for layout in LAYOUTS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

impl fmt::Display for RowValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowValues::Int(i) => write!(f, "{i}"),
            RowValues::Float(v) => write!(f, "{v}"),
            RowValues::Text(s) => write!(f, "{s}"),
            RowValues::Bool(b) => write!(f, "{b}"),
            RowValues::Timestamp(dt) => write!(f, "{}", dt.format("%F %T%.f")),
            RowValues::Null => write!(f, "NULL"),
            RowValues::JSON(v) => write!(f, "{v}"),
            RowValues::Blob(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<i64> for RowValues {
    fn from(v: i64) -> Self {
        RowValues::Int(v)
    }
}

impl From<i32> for RowValues {
    fn from(v: i32) -> Self {
        RowValues::Int(i64::from(v))
    }
}

impl From<f64> for RowValues {
    fn from(v: f64) -> Self {
        RowValues::Float(v)
    }
}

impl From<bool> for RowValues {
    fn from(v: bool) -> Self {
        RowValues::Bool(v)
    }
}

impl From<&str> for RowValues {
    fn from(v: &str) -> Self {
        RowValues::Text(v.to_string())
    }
}

impl From<String> for RowValues {
    fn from(v: String) -> Self {
        RowValues::Text(v)
    }
}

impl From<NaiveDateTime> for RowValues {
    fn from(v: NaiveDateTime) -> Self {
        RowValues::Timestamp(v)
    }
}

impl From<DateTime<Utc>> for RowValues {
    fn from(v: DateTime<Utc>) -> Self {
        RowValues::Timestamp(v.naive_utc())
    }
}

impl From<JsonValue> for RowValues {
    fn from(v: JsonValue) -> Self {
        RowValues::JSON(v)
    }
}

impl From<Vec<u8>> for RowValues {
    fn from(v: Vec<u8>) -> Self {
        RowValues::Blob(v)
    }
}

impl<T: Into<RowValues>> From<Option<T>> for RowValues {
    fn from(v: Option<T>) -> Self {
        v.map_or(RowValues::Null, Into::into)
    }
}

/// A query and its parameters bundled together.
///
/// Placeholders are written Postgres-style (`$1`, `$2`, ...) and translated for the session's
/// backend before execution.
#[derive(Debug, Clone)]
pub struct QueryAndParams {
    pub query: String,
    /// Bound to `$1..$n` in order.
    pub params: Vec<RowValues>,
}

impl QueryAndParams {
    pub fn new(query: impl Into<String>, params: Vec<RowValues>) -> Self {
        Self {
            query: query.into(),
            params,
        }
    }

    pub fn new_without_params(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            params: Vec::new(),
        }
    }
}
