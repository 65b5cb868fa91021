//! Binary COPY encoders for target column types.
//!
//! Encoders are selected once per table from the column's `udt_name` and
//! cached process-wide, since they carry no per-table state. Values coming
//! from the staging store are loosely typed (SQLite), so each encoder accepts
//! the representations that can be coerced losslessly and rejects the rest.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{LazyLock, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{MigrateError, Result};
use crate::value::{Row, Value};

/// PostgreSQL binary COPY signature.
const COPY_SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

const TEXT_OID: u32 = 25;
const VARCHAR_OID: u32 = 1043;
const INT4_OID: u32 = 23;
const INT8_OID: u32 = 20;

static ENCODER_CACHE: LazyLock<Mutex<HashMap<String, Option<Encoder>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Wire encoder for one PostgreSQL column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytea,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
    Uuid,
    TextArray { element_oid: u32 },
    Int4Array,
    Int8Array,
}

impl Encoder {
    /// Encoder for a `udt_name`, or `None` when the type is unsupported.
    pub fn for_type(udt_name: &str) -> Option<Encoder> {
        let key = udt_name.to_ascii_lowercase();
        if let Ok(cache) = ENCODER_CACHE.lock() {
            if let Some(cached) = cache.get(&key) {
                return *cached;
            }
        }

        let encoder = Self::resolve(&key);
        if let Ok(mut cache) = ENCODER_CACHE.lock() {
            cache.insert(key, encoder);
        }
        encoder
    }

    fn resolve(udt_name: &str) -> Option<Encoder> {
        let encoder = match udt_name {
            "bool" => Encoder::Bool,
            "int2" => Encoder::Int2,
            "int4" => Encoder::Int4,
            "int8" => Encoder::Int8,
            "float4" => Encoder::Float4,
            "float8" => Encoder::Float8,
            "numeric" => Encoder::Numeric,
            "text" | "varchar" | "bpchar" | "citext" | "name" => Encoder::Text,
            "bytea" => Encoder::Bytea,
            "date" => Encoder::Date,
            "timestamp" => Encoder::Timestamp,
            "timestamptz" => Encoder::TimestampTz,
            "json" => Encoder::Json,
            "jsonb" => Encoder::Jsonb,
            "uuid" => Encoder::Uuid,
            "_text" => Encoder::TextArray {
                element_oid: TEXT_OID,
            },
            "_varchar" => Encoder::TextArray {
                element_oid: VARCHAR_OID,
            },
            "_int4" => Encoder::Int4Array,
            "_int8" => Encoder::Int8Array,
            _ => return None,
        };
        Some(encoder)
    }

    /// Append one length-prefixed field.
    pub fn encode(
        &self,
        buf: &mut BytesMut,
        value: &Value,
        now: NaiveDateTime,
    ) -> std::result::Result<(), String> {
        if value.is_null() {
            buf.put_i32(-1);
            return Ok(());
        }

        match self {
            Encoder::Bool => {
                let b = to_bool(value)?;
                buf.put_i32(1);
                buf.put_u8(u8::from(b));
            }
            Encoder::Int2 => {
                let i = to_i64(value)?;
                let i = i16::try_from(i).map_err(|_| format!("{} out of range for int2", i))?;
                buf.put_i32(2);
                buf.put_i16(i);
            }
            Encoder::Int4 => {
                let i = to_i64(value)?;
                let i = i32::try_from(i).map_err(|_| format!("{} out of range for int4", i))?;
                buf.put_i32(4);
                buf.put_i32(i);
            }
            Encoder::Int8 => {
                buf.put_i32(8);
                buf.put_i64(to_i64(value)?);
            }
            Encoder::Float4 => {
                buf.put_i32(4);
                buf.put_f32(to_f64(value)? as f32);
            }
            Encoder::Float8 => {
                buf.put_i32(8);
                buf.put_f64(to_f64(value)?);
            }
            Encoder::Numeric => encode_numeric(buf, &to_decimal(value)?),
            Encoder::Text => {
                let s = to_text(value)?;
                put_bytes(buf, s.as_bytes());
            }
            Encoder::Bytea => match value {
                Value::Bytes(b) => put_bytes(buf, b),
                Value::Text(s) => put_bytes(buf, s.as_bytes()),
                other => return Err(format!("expected bytes, got {:?}", other)),
            },
            Encoder::Date => {
                let epoch = pg_epoch().date();
                let days = (to_date(value, now)? - epoch).num_days();
                let days = i32::try_from(days).map_err(|_| "date out of range".to_string())?;
                buf.put_i32(4);
                buf.put_i32(days);
            }
            Encoder::Timestamp | Encoder::TimestampTz => {
                let micros = (to_timestamp(value, now)? - pg_epoch())
                    .num_microseconds()
                    .ok_or_else(|| "timestamp out of range".to_string())?;
                buf.put_i32(8);
                buf.put_i64(micros);
            }
            Encoder::Json => {
                let json = to_json_text(value)?;
                put_bytes(buf, json.as_bytes());
            }
            Encoder::Jsonb => {
                let json = to_json_text(value)?;
                buf.put_i32(json.len() as i32 + 1);
                // jsonb binary format version
                buf.put_u8(1);
                buf.put_slice(json.as_bytes());
            }
            Encoder::Uuid => {
                let uuid = to_uuid(value)?;
                put_bytes(buf, uuid.as_bytes());
            }
            Encoder::TextArray { element_oid } => {
                let items = to_text_array(value)?;
                let elements: Vec<&[u8]> = items.iter().map(|s| s.as_bytes()).collect();
                encode_array(buf, *element_oid, &elements);
            }
            Encoder::Int4Array => {
                let mut elements = Vec::new();
                for i in to_int_array(value)? {
                    let i = i32::try_from(i).map_err(|_| format!("{} out of range for int4", i))?;
                    elements.push(i.to_be_bytes().to_vec());
                }
                let refs: Vec<&[u8]> = elements.iter().map(Vec::as_slice).collect();
                encode_array(buf, INT4_OID, &refs);
            }
            Encoder::Int8Array => {
                let elements: Vec<[u8; 8]> = to_int_array(value)?
                    .into_iter()
                    .map(i64::to_be_bytes)
                    .collect();
                let refs: Vec<&[u8]> = elements.iter().map(|e| e.as_slice()).collect();
                encode_array(buf, INT8_OID, &refs);
            }
        }

        Ok(())
    }
}

/// Column-ordered encoder list for one target table.
#[derive(Debug, Clone)]
pub struct RowEncoder {
    table: String,
    columns: Vec<String>,
    encoders: Vec<Encoder>,
    now: NaiveDateTime,
}

impl RowEncoder {
    /// Build the encoder list from introspected `column -> udt_name` types.
    ///
    /// Unknown columns and unsupported types are setup errors.
    pub fn new(
        table: &str,
        columns: &[String],
        column_types: &HashMap<String, String>,
        now: NaiveDateTime,
    ) -> Result<Self> {
        let mut encoders = Vec::with_capacity(columns.len());
        for column in columns {
            let udt_name = column_types
                .get(column)
                .ok_or_else(|| MigrateError::MissingColumn {
                    table: table.to_string(),
                    column: column.clone(),
                })?;
            let encoder =
                Encoder::for_type(udt_name).ok_or_else(|| MigrateError::UnsupportedColumnType {
                    table: table.to_string(),
                    column: column.clone(),
                    data_type: udt_name.clone(),
                })?;
            encoders.push(encoder);
        }

        Ok(Self {
            table: table.to_string(),
            columns: columns.to_vec(),
            encoders,
            now,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Encode a whole batch into one COPY payload.
    pub fn encode_batch(&self, rows: &[Row]) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(rows.len() * 256 + 32);

        buf.put_slice(COPY_SIGNATURE);
        buf.put_i32(0); // flags
        buf.put_i32(0); // extension area length

        for row in rows {
            self.encode_row(&mut buf, row)?;
        }

        buf.put_i16(-1);
        Ok(buf.freeze())
    }

    fn encode_row(&self, buf: &mut BytesMut, row: &Row) -> Result<()> {
        buf.put_i16(self.columns.len() as i16);
        for (column, encoder) in self.columns.iter().zip(&self.encoders) {
            let value = row.get(column).unwrap_or(&Value::Null);
            encoder
                .encode(buf, value, self.now)
                .map_err(|reason| MigrateError::Encode {
                    table: self.table.clone(),
                    column: column.clone(),
                    reason,
                })?;
        }
        Ok(())
    }
}

fn pg_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2000, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_i32(bytes.len() as i32);
    buf.put_slice(bytes);
}

/// One-dimensional array without NULL elements.
fn encode_array(buf: &mut BytesMut, element_oid: u32, elements: &[&[u8]]) {
    let mut body = BytesMut::with_capacity(20 + elements.iter().map(|e| e.len() + 4).sum::<usize>());
    if elements.is_empty() {
        body.put_i32(0); // ndim
        body.put_i32(0); // has nulls
        body.put_u32(element_oid);
    } else {
        body.put_i32(1);
        body.put_i32(0);
        body.put_u32(element_oid);
        body.put_i32(elements.len() as i32);
        body.put_i32(1); // lower bound
        for element in elements {
            put_bytes(&mut body, element);
        }
    }
    put_bytes(buf, &body);
}

/// PostgreSQL NUMERIC binary format: ndigits, weight, sign, dscale, then
/// base-10000 digits.
fn encode_numeric(buf: &mut BytesMut, d: &Decimal) {
    const NUMERIC_POS: i16 = 0x0000;
    const NUMERIC_NEG: i16 = 0x4000;

    let scale = d.scale() as usize;
    let digits = d.mantissa().unsigned_abs().to_string();
    let (int_part, frac_part) = if digits.len() > scale {
        let (i, f) = digits.split_at(digits.len() - scale);
        (i.to_string(), f.to_string())
    } else {
        (String::new(), format!("{:0>width$}", digits, width = scale))
    };

    let mut groups: Vec<i16> = Vec::new();
    let int_padded = format!("{}{}", "0".repeat((4 - int_part.len() % 4) % 4), int_part);
    for chunk in int_padded.as_bytes().chunks(4) {
        groups.push(parse_group(chunk));
    }
    let mut weight = groups.len() as i16 - 1;

    let frac_padded = format!("{}{}", frac_part, "0".repeat((4 - frac_part.len() % 4) % 4));
    for chunk in frac_padded.as_bytes().chunks(4) {
        groups.push(parse_group(chunk));
    }

    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    if groups.is_empty() {
        weight = 0;
    }

    let sign = if d.is_sign_negative() && !groups.is_empty() {
        NUMERIC_NEG
    } else {
        NUMERIC_POS
    };

    buf.put_i32(8 + 2 * groups.len() as i32);
    buf.put_i16(groups.len() as i16);
    buf.put_i16(weight);
    buf.put_i16(sign);
    buf.put_i16(scale as i16);
    for group in groups {
        buf.put_i16(group);
    }
}

fn parse_group(chunk: &[u8]) -> i16 {
    chunk
        .iter()
        .fold(0i16, |acc, b| acc * 10 + (b - b'0') as i16)
}

fn to_bool(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::Int(0) => Ok(false),
        Value::Int(1) => Ok(true),
        Value::Text(s) => match s.to_ascii_lowercase().as_str() {
            "t" | "true" | "1" | "yes" => Ok(true),
            "f" | "false" | "0" | "no" => Ok(false),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        other => Err(format!("expected boolean, got {:?}", other)),
    }
}

fn to_i64(value: &Value) -> std::result::Result<i64, String> {
    match value {
        Value::Int(i) => Ok(*i),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Ok(*f as i64),
        Value::Decimal(d) if d.fract().is_zero() => {
            d.to_i64().ok_or_else(|| format!("{} out of range", d))
        }
        Value::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| format!("'{}' is not an integer", s)),
        other => Err(format!("expected integer, got {:?}", other)),
    }
}

fn to_f64(value: &Value) -> std::result::Result<f64, String> {
    match value {
        Value::Float(f) => Ok(*f),
        Value::Int(i) => Ok(*i as f64),
        Value::Decimal(d) => d.to_f64().ok_or_else(|| format!("{} out of range", d)),
        Value::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("'{}' is not a number", s)),
        other => Err(format!("expected number, got {:?}", other)),
    }
}

fn to_decimal(value: &Value) -> std::result::Result<Decimal, String> {
    match value {
        Value::Decimal(d) => Ok(*d),
        Value::Int(i) => Ok(Decimal::from(*i)),
        Value::Float(f) => Decimal::try_from(*f).map_err(|e| e.to_string()),
        Value::Text(s) => Decimal::from_str(s.trim()).map_err(|e| e.to_string()),
        other => Err(format!("expected decimal, got {:?}", other)),
    }
}

fn to_text(value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Decimal(d) => Ok(d.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Uuid(u) => Ok(u.to_string()),
        Value::Json(j) => Ok(j.to_string()),
        other => Err(format!("expected text, got {:?}", other)),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f%#z"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.naive_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn to_timestamp(value: &Value, now: NaiveDateTime) -> std::result::Result<NaiveDateTime, String> {
    match value {
        Value::Now => Ok(now),
        Value::DateTime(dt) => Ok(*dt),
        Value::Date(d) => d
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| "invalid date".to_string()),
        Value::Int(secs) => DateTime::from_timestamp(*secs, 0)
            .map(|dt| dt.naive_utc())
            .ok_or_else(|| format!("{} is not a valid unix timestamp", secs)),
        Value::Text(s) => parse_timestamp(s).ok_or_else(|| format!("'{}' is not a timestamp", s)),
        other => Err(format!("expected timestamp, got {:?}", other)),
    }
}

fn to_date(value: &Value, now: NaiveDateTime) -> std::result::Result<NaiveDate, String> {
    match value {
        Value::Date(d) => Ok(*d),
        other => to_timestamp(other, now).map(|dt| dt.date()),
    }
}

fn to_json_text(value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::Json(j) => Ok(j.to_string()),
        Value::Text(s) => serde_json::from_str::<serde_json::Value>(s)
            .map(|_| s.clone())
            .map_err(|e| format!("invalid JSON: {}", e)),
        Value::TextArray(items) => serde_json::to_string(items).map_err(|e| e.to_string()),
        Value::IntArray(items) => serde_json::to_string(items).map_err(|e| e.to_string()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("expected JSON, got {:?}", other)),
    }
}

fn to_uuid(value: &Value) -> std::result::Result<Uuid, String> {
    match value {
        Value::Uuid(u) => Ok(*u),
        Value::Text(s) => Uuid::parse_str(s.trim()).map_err(|e| format!("invalid UUID: {}", e)),
        Value::Bytes(b) => Uuid::from_slice(b).map_err(|e| format!("invalid UUID: {}", e)),
        other => Err(format!("expected UUID, got {:?}", other)),
    }
}

fn to_text_array(value: &Value) -> std::result::Result<Vec<String>, String> {
    match value {
        Value::TextArray(items) => Ok(items.clone()),
        Value::Json(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => Ok(s.clone()),
                other => Ok(other.to_string()),
            })
            .collect(),
        Value::Text(s) => serde_json::from_str::<Vec<String>>(s)
            .map_err(|e| format!("expected JSON array of strings: {}", e)),
        other => Err(format!("expected text array, got {:?}", other)),
    }
}

fn to_int_array(value: &Value) -> std::result::Result<Vec<i64>, String> {
    match value {
        Value::IntArray(items) => Ok(items.clone()),
        Value::Json(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_i64()
                    .ok_or_else(|| format!("{} is not an integer", item))
            })
            .collect(),
        Value::Text(s) => serde_json::from_str::<Vec<i64>>(s)
            .map_err(|e| format!("expected JSON array of integers: {}", e)),
        other => Err(format!("expected integer array, got {:?}", other)),
    }
}
