//! Target (destination) database access.
//!
//! [`TargetStore`] is the seam between the step driver and PostgreSQL. The
//! production implementation is [`postgres::PgTargetStore`]; tests run against
//! an in-memory store that decodes the binary COPY payloads it receives.

pub mod encoder;
pub mod loader;
pub mod postgres;
pub mod tls;

#[cfg(test)]
pub mod memory;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDateTime;

use crate::error::Result;

pub use encoder::{Encoder, RowEncoder};
pub use loader::{BulkLoader, LoadStats};
pub use postgres::PgTargetStore;

/// Operations the import engine needs from the target database.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// `column name -> udt_name` for every column of a table.
    async fn column_types(&self, table: &str) -> Result<HashMap<String, String>>;

    /// Largest `id` in a table, or 0 when it is empty.
    async fn max_id(&self, table: &str) -> Result<i64>;

    /// Current target clock (UTC).
    async fn now(&self) -> Result<NaiveDateTime>;

    /// Run a single-column query and collect the non-null results.
    async fn query_set(&self, sql: &str) -> Result<HashSet<String>>;

    /// Load one binary COPY payload inside its own transaction.
    ///
    /// Either every row of the payload is committed or none is.
    async fn copy_batch(&self, table: &str, columns: &[String], payload: Bytes) -> Result<u64>;

    /// Make the table's `id` sequence hand out `max(id) + 1` next.
    async fn reset_sequence(&self, table: &str) -> Result<()>;

    /// Verify the connection works.
    async fn ping(&self) -> Result<()>;

    fn db_type(&self) -> &str;

    async fn close(&self);
}
