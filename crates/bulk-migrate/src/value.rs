//! Row and value types flowing from the staging store to the target store.
//!
//! Staging rows arrive as [`SourceRow`]s holding SQLite-typed values. Step
//! transforms turn them into [`Row`]s keyed by target column name; the bulk
//! loader encodes those into the target's binary COPY format.

use std::collections::HashMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    /// Timestamp in UTC.
    DateTime(NaiveDateTime),
    Json(serde_json::Value),
    TextArray(Vec<String>),
    IntArray(Vec<i64>),
    /// Resolved to the target store's clock when the row is encoded.
    Now,
}

impl Value {
    /// True for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Integer view of the value, if it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Text view of the value, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<rusqlite::types::Value> for Value {
    fn from(value: rusqlite::types::Value) -> Self {
        match value {
            rusqlite::types::Value::Null => Value::Null,
            rusqlite::types::Value::Integer(i) => Value::Int(i),
            rusqlite::types::Value::Real(f) => Value::Float(f),
            rusqlite::types::Value::Text(s) => Value::Text(s),
            rusqlite::types::Value::Blob(b) => Value::Bytes(b),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
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

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Uuid(v)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(v: NaiveDateTime) -> Self {
        Value::DateTime(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Identifier of an entity in the source system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OriginalId {
    Int(i64),
    Text(String),
}

impl OriginalId {
    /// Build from a staging value; `Null` and non-key types yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(OriginalId::Int(*i)),
            Value::Text(s) => Some(OriginalId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for OriginalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OriginalId::Int(i) => write!(f, "{}", i),
            OriginalId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for OriginalId {
    fn from(v: i64) -> Self {
        OriginalId::Int(v)
    }
}

impl From<&str> for OriginalId {
    fn from(v: &str) -> Self {
        OriginalId::Text(v.to_string())
    }
}

impl ToSql for OriginalId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            OriginalId::Int(i) => i.to_sql(),
            OriginalId::Text(s) => s.to_sql(),
        }
    }
}

impl FromSql for OriginalId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(OriginalId::Int(i)),
            ValueRef::Text(t) => std::str::from_utf8(t)
                .map(|s| OriginalId::Text(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// A row read from the staging store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    values: HashMap<String, Value>,
}

impl SourceRow {
    /// Build a row from column/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Borrow a column value; missing columns read as `Null`.
    pub fn get(&self, column: &str) -> &Value {
        self.values.get(column).unwrap_or(&Value::Null)
    }

    /// Move a column value out of the row.
    pub fn take(&mut self, column: &str) -> Value {
        self.values.remove(column).unwrap_or(Value::Null)
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).as_i64()
    }

    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).as_str()
    }

    /// Original identifier stored in `column`.
    pub fn original_id(&self, column: &str) -> Option<OriginalId> {
        OriginalId::from_value(self.get(column))
    }
}

/// A transformed row destined for a target table.
///
/// Rows tagged as skipped still travel through the loader so that the
/// post-commit hook sees them, but they are never written to the COPY stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: HashMap<String, Value>,
    original_id: Option<OriginalId>,
    skipped: bool,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marker for a source row that produced no target row.
    pub fn skipped(original_id: Option<OriginalId>) -> Self {
        Self {
            values: HashMap::new(),
            original_id,
            skipped: true,
        }
    }

    /// Builder-style setter.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.values.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    /// True when the column holds a non-null value.
    pub fn has(&self, column: &str) -> bool {
        self.values.get(column).is_some_and(|v| !v.is_null())
    }

    /// Target-side `id` column, when it is an integer.
    pub fn id(&self) -> Option<i64> {
        self.values.get("id").and_then(Value::as_i64)
    }

    pub fn original_id(&self) -> Option<&OriginalId> {
        self.original_id.as_ref()
    }

    pub fn set_original_id(&mut self, id: impl Into<OriginalId>) {
        self.original_id = Some(id.into());
    }

    /// Builder-style original id setter.
    pub fn with_original_id(mut self, id: impl Into<OriginalId>) -> Self {
        self.set_original_id(id);
        self
    }

    /// Keep the row out of the COPY stream while still reporting it.
    pub fn mark_skipped(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }
}
