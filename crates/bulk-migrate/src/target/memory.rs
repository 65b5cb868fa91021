//! In-memory [`TargetStore`] for tests.
//!
//! Decodes the binary COPY payloads it receives so tests can assert on what
//! actually went over the wire. A payload is applied all-or-nothing.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::{Buf, Bytes};
use chrono::{NaiveDate, NaiveDateTime};

use super::TargetStore;
use crate::error::{MigrateError, Result};

type Field = Option<Vec<u8>>;

#[derive(Debug, Default)]
struct MemoryTable {
    column_types: HashMap<String, String>,
    rows: Vec<HashMap<String, Field>>,
    existing_max_id: i64,
    next_sequence_value: Option<i64>,
    not_null: HashSet<String>,
}

impl MemoryTable {
    fn max_id(&self) -> i64 {
        self.rows
            .iter()
            .filter_map(|row| row.get("id").and_then(|f| f.as_deref()).map(decode_int))
            .fold(self.existing_max_id, i64::max)
    }
}

pub struct MemoryTargetStore {
    tables: Mutex<HashMap<String, MemoryTable>>,
    sets: HashMap<String, HashSet<String>>,
    now: NaiveDateTime,
    closed: AtomicBool,
}

impl Default for MemoryTargetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTargetStore {
    pub fn new() -> Self {
        let now = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap_or_default();
        Self {
            tables: Mutex::new(HashMap::new()),
            sets: HashMap::new(),
            now,
            closed: AtomicBool::new(false),
        }
    }

    pub fn now_value(&self) -> NaiveDateTime {
        self.now
    }

    pub fn with_table(self, name: &str, columns: &[(&str, &str)]) -> Self {
        self.tables.lock().unwrap().insert(
            name.to_string(),
            MemoryTable {
                column_types: columns
                    .iter()
                    .map(|(c, t)| (c.to_string(), t.to_string()))
                    .collect(),
                ..Default::default()
            },
        );
        self
    }

    /// Pretend the table already holds rows up to `max_id`.
    pub fn with_existing_max_id(self, table: &str, max_id: i64) -> Self {
        if let Some(t) = self.tables.lock().unwrap().get_mut(table) {
            t.existing_max_id = max_id;
        }
        self
    }

    /// Result of `query_set(sql)`.
    pub fn with_set(mut self, sql: &str, values: &[&str]) -> Self {
        self.sets.insert(
            sql.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        self
    }

    /// Reject any payload carrying NULL in `column`, like a NOT NULL constraint.
    pub fn reject_nulls_in(self, table: &str, column: &str) -> Self {
        if let Some(t) = self.tables.lock().unwrap().get_mut(table) {
            t.not_null.insert(column.to_string());
        }
        self
    }

    pub fn ids(&self, table: &str) -> Vec<i64> {
        self.ints(table, "id").into_iter().flatten().collect()
    }

    pub fn ints(&self, table: &str, column: &str) -> Vec<Option<i64>> {
        self.fields(table, column)
            .into_iter()
            .map(|f| f.map(|bytes| decode_int(&bytes)))
            .collect()
    }

    pub fn texts(&self, table: &str, column: &str) -> Vec<Option<String>> {
        self.fields(table, column)
            .into_iter()
            .map(|f| f.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .collect()
    }

    /// Raw encoded field bytes of every row, in insertion order.
    pub fn fields(&self, table: &str, column: &str) -> Vec<Field> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .map(|row| row.get(column).cloned().flatten())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Value the `id` sequence hands out next, once it has been reset.
    pub fn next_sequence_value(&self, table: &str) -> Option<i64> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|t| t.next_sequence_value)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn decode_int(bytes: &[u8]) -> i64 {
    match bytes.len() {
        8 => i64::from_be_bytes(bytes.try_into().unwrap_or_default()),
        4 => i32::from_be_bytes(bytes.try_into().unwrap_or_default()) as i64,
        2 => i16::from_be_bytes(bytes.try_into().unwrap_or_default()) as i64,
        _ => 0,
    }
}

fn decode_payload(
    table: &str,
    columns: &[String],
    mut payload: Bytes,
) -> Result<Vec<HashMap<String, Field>>> {
    let malformed = |what: &str| MigrateError::batch(table, format!("malformed COPY payload: {}", what));

    if payload.len() < 19 || &payload[..11] != b"PGCOPY\n\xff\r\n\0" {
        return Err(malformed("bad signature"));
    }
    payload.advance(11);
    payload.get_i32();
    let ext = payload.get_i32();
    payload.advance(ext.max(0) as usize);

    let mut rows = Vec::new();
    loop {
        if payload.remaining() < 2 {
            return Err(malformed("missing trailer"));
        }
        let count = payload.get_i16();
        if count == -1 {
            break;
        }
        if count as usize != columns.len() {
            return Err(malformed("field count mismatch"));
        }

        let mut row = HashMap::new();
        for column in columns {
            if payload.remaining() < 4 {
                return Err(malformed("truncated field"));
            }
            let len = payload.get_i32();
            let field = if len < 0 {
                None
            } else {
                if payload.remaining() < len as usize {
                    return Err(malformed("truncated field"));
                }
                Some(payload.split_to(len as usize).to_vec())
            };
            row.insert(column.clone(), field);
        }
        rows.push(row);
    }

    Ok(rows)
}

#[async_trait]
impl TargetStore for MemoryTargetStore {
    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.column_types.clone())
            .ok_or_else(|| MigrateError::batch(table, "table not found"))
    }

    async fn max_id(&self, table: &str) -> Result<i64> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .map(MemoryTable::max_id)
            .unwrap_or(0))
    }

    async fn now(&self) -> Result<NaiveDateTime> {
        Ok(self.now)
    }

    async fn query_set(&self, sql: &str) -> Result<HashSet<String>> {
        Ok(self.sets.get(sql).cloned().unwrap_or_default())
    }

    async fn copy_batch(&self, table: &str, columns: &[String], payload: Bytes) -> Result<u64> {
        let rows = decode_payload(table, columns, payload)?;

        let mut tables = self.tables.lock().unwrap();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| MigrateError::batch(table, "table not found"))?;
        for column in &t.not_null {
            if rows.iter().any(|row| matches!(row.get(column), Some(None) | None)) {
                return Err(MigrateError::batch(
                    table,
                    format!("null value in column \"{}\" violates not-null constraint", column),
                ));
            }
        }

        let count = rows.len() as u64;
        t.rows.extend(rows);
        Ok(count)
    }

    async fn reset_sequence(&self, table: &str) -> Result<()> {
        if let Some(t) = self.tables.lock().unwrap().get_mut(table) {
            t.next_sequence_value = Some(t.max_id() + 1);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn db_type(&self) -> &str {
        "memory"
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
