//! Batched bulk loader.
//!
//! Consumes a stream of prepared rows, encodes each batch as one binary COPY
//! payload and commits it in its own target transaction. After every commit
//! the caller's callback sees the batch's inserted and skipped rows, which is
//! where identifier mappings get persisted.

use std::future::Future;
use std::time::Instant;

use futures::{Stream, StreamExt};
use tracing::{debug, error};

use super::encoder::RowEncoder;
use super::TargetStore;
use crate::error::Result;
use crate::value::Row;

/// Totals for one bulk insert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub inserted: u64,
    pub skipped: u64,
    pub batches: u64,
}

/// Loads rows into one target table in fixed-size batches.
pub struct BulkLoader<'a> {
    target: &'a dyn TargetStore,
    batch_size: usize,
}

impl<'a> BulkLoader<'a> {
    pub fn new(target: &'a dyn TargetStore, batch_size: usize) -> Self {
        Self {
            target,
            batch_size: batch_size.max(1),
        }
    }

    /// Load every row of `rows` into `table`.
    ///
    /// Column types are resolved and the target clock captured once, before
    /// the first batch. Rows marked skipped count toward the batch size but
    /// are never sent. `on_batch_committed` runs after each commit with the
    /// batch's `(inserted, skipped)` rows and is awaited before the next
    /// batch starts; an error from it aborts the load.
    pub async fn bulk_insert<S, F, Fut>(
        &self,
        table: &str,
        columns: &[String],
        mut rows: S,
        mut on_batch_committed: F,
    ) -> Result<LoadStats>
    where
        S: Stream<Item = Result<Row>> + Unpin,
        F: FnMut(&[Row], &[Row]) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let column_types = self.target.column_types(table).await?;
        let now = self.target.now().await?;
        let encoder = RowEncoder::new(table, columns, &column_types, now)?;

        let mut stats = LoadStats::default();
        let mut inserted: Vec<Row> = Vec::with_capacity(self.batch_size);
        let mut skipped: Vec<Row> = Vec::new();

        while let Some(row) = rows.next().await {
            let row = row?;
            if row.is_skipped() {
                skipped.push(row);
            } else {
                inserted.push(row);
            }

            if inserted.len() + skipped.len() >= self.batch_size {
                self.flush(
                    table,
                    &encoder,
                    &mut inserted,
                    &mut skipped,
                    &mut stats,
                    &mut on_batch_committed,
                )
                .await?;
            }
        }

        if !inserted.is_empty() || !skipped.is_empty() {
            self.flush(
                table,
                &encoder,
                &mut inserted,
                &mut skipped,
                &mut stats,
                &mut on_batch_committed,
            )
            .await?;
        }

        Ok(stats)
    }

    async fn flush<F, Fut>(
        &self,
        table: &str,
        encoder: &RowEncoder,
        inserted: &mut Vec<Row>,
        skipped: &mut Vec<Row>,
        stats: &mut LoadStats,
        on_batch_committed: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&[Row], &[Row]) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let batch_no = stats.batches + 1;

        if !inserted.is_empty() {
            let started = Instant::now();
            let payload = encoder.encode_batch(inserted).inspect_err(|e| {
                error!("{}: batch {} could not be encoded: {}", table, batch_no, e);
            })?;
            let copied = self
                .target
                .copy_batch(table, encoder.columns(), payload)
                .await
                .inspect_err(|e| {
                    error!("{}: batch {} failed: {}", table, batch_no, e);
                })?;
            debug!(
                "{}: batch {} committed {} rows in {:?}",
                table,
                batch_no,
                copied,
                started.elapsed()
            );
        }

        on_batch_committed(inserted, skipped).await?;

        stats.inserted += inserted.len() as u64;
        stats.skipped += skipped.len() as u64;
        stats.batches = batch_no;
        inserted.clear();
        skipped.clear();

        Ok(())
    }

    /// Move the table's id sequence past the ids assigned during the load.
    pub async fn resync_sequence(&self, table: &str) -> Result<()> {
        self.target.reset_sequence(table).await?;
        debug!("{}: sequence resynchronized", table);
        Ok(())
    }
}
