//! Staging (intermediate) database access.
//!
//! Queries are streamed: a blocking task owns its own SQLite connection and
//! pushes rows one by one into a bounded channel, so the producer suspends as
//! soon as the consumer falls behind and a table is never materialized in
//! memory. Dropping the [`RowStream`] stops the producer.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use rusqlite::{params_from_iter, Connection, OpenFlags};
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::StagingConfig;
use crate::error::{MigrateError, Result};
use crate::value::{SourceRow, Value};

/// Schema name the identifier-mapping store is attached under.
pub const MAPPINGS_SCHEMA: &str = "mapped";

/// Schema name the upload store is attached under.
pub const UPLOADS_SCHEMA: &str = "uploads";

/// A parameterized staging query.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub sql: String,
    pub params: Vec<rusqlite::types::Value>,
}

impl SourceQuery {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append a positional parameter.
    pub fn bind(mut self, value: impl Into<rusqlite::types::Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Read-only handle on the staging database with the side stores attached.
#[derive(Debug, Clone)]
pub struct StagingStore {
    path: PathBuf,
    mappings_path: PathBuf,
    uploads_path: PathBuf,
    channel_capacity: usize,
}

impl StagingStore {
    /// Verify the staging database can be opened and the side stores attached.
    pub fn open(config: &StagingConfig, channel_capacity: usize) -> Result<Self> {
        let store = Self {
            path: config.path.clone(),
            mappings_path: config.mappings_path(),
            uploads_path: config.uploads_path(),
            channel_capacity: channel_capacity.max(1),
        };
        store.connect()?;
        debug!("Opened staging database {:?}", store.path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection with the mapping and upload stores attached.
    fn connect(&self) -> Result<Connection> {
        if !self.path.exists() {
            return Err(MigrateError::Config(format!(
                "Staging database not found: {:?}",
                self.path
            )));
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        attach(&conn, &self.mappings_path, MAPPINGS_SCHEMA)?;
        attach(&conn, &self.uploads_path, UPLOADS_SCHEMA)?;
        Ok(conn)
    }

    /// Number of rows a query yields.
    pub async fn count(&self, query: &SourceQuery) -> Result<u64> {
        let store = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            let sql = format!("SELECT COUNT(*) FROM ({})", query.sql);
            let count: i64 =
                conn.query_row(&sql, params_from_iter(query.params.iter()), |row| row.get(0))?;
            Ok(count.max(0) as u64)
        })
        .await
        .map_err(|e| MigrateError::Store(format!("staging count task failed: {}", e)))?
    }

    /// Stream the rows of a query.
    ///
    /// Each call re-runs the query from scratch; a stream can only be consumed once.
    pub fn stream(&self, query: SourceQuery) -> RowStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let store = self.clone();

        tokio::task::spawn_blocking(move || {
            if let Err(e) = store.produce_rows(&query, &tx) {
                // Receiver may already be gone; nothing left to report to.
                let _ = tx.blocking_send(Err(e));
            }
        });

        RowStream { rx }
    }

    fn produce_rows(
        &self,
        query: &SourceQuery,
        tx: &mpsc::Sender<Result<SourceRow>>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&query.sql)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query(params_from_iter(query.params.iter()))?;

        while let Some(row) = rows.next()? {
            let mut pairs = Vec::with_capacity(columns.len());
            for (idx, name) in columns.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(idx)?;
                pairs.push((name.as_str(), Value::from(value)));
            }
            if tx.blocking_send(Ok(SourceRow::from_pairs(pairs))).is_err() {
                debug!("Staging row consumer dropped, stopping query");
                break;
            }
        }

        Ok(())
    }
}

fn attach(conn: &Connection, path: &Path, schema: &str) -> Result<()> {
    let sql = format!("ATTACH DATABASE ?1 AS {}", schema);
    conn.execute(&sql, [path.to_string_lossy().as_ref()])?;
    Ok(())
}

/// Single-pass stream of staging rows.
pub struct RowStream {
    rx: mpsc::Receiver<Result<SourceRow>>,
}

impl Stream for RowStream {
    type Item = Result<SourceRow>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
