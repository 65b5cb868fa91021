//! Import steps.
//!
//! A step pairs a static [`StepDefinition`] with a [`Step`] implementation
//! that supplies the staging query and the per-row transform. The generic
//! lifecycle around it (required data, id assignment, batching, mapping
//! bookkeeping) lives in [`bulk_copy::BulkCopyStep`].

pub mod bulk_copy;
pub mod definition;
pub mod registry;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ImportConfig;
use crate::error::{MigrateError, Result};
use crate::mapping::MappingStore;
use crate::shared_data::SharedData;
use crate::staging::{SourceQuery, StagingStore};
use crate::target::TargetStore;
use crate::value::{OriginalId, Row, SourceRow};

pub use bulk_copy::{BulkCopyStep, StepState};
pub use definition::StepDefinition;
pub use registry::{StepFactory, StepRegistry};

/// Everything a running step may touch.
pub struct StepContext<'a> {
    pub staging: &'a StagingStore,
    pub target: &'a dyn TargetStore,
    pub mappings: &'a MappingStore,
    pub shared: &'a SharedData,
    pub config: &'a ImportConfig,
}

/// Step-specific behavior.
#[async_trait]
pub trait Step: Send {
    /// Staging query producing this step's source rows.
    fn rows_query(&self) -> SourceQuery;

    /// Runs after required data is loaded, before streaming.
    async fn setup(&mut self, _ctx: &StepContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Turn one staging row into a target row, or `None` to skip it.
    fn transform(&mut self, row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>>;

    /// Runs after the last batch is committed.
    async fn finish(&mut self, _ctx: &StepContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Per-row counters. Reset before every row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowStats {
    pub skipped: u64,
    pub warned: u64,
    pub errored: u64,
}

impl RowStats {
    pub fn reset(&mut self) {
        *self = RowStats::default();
    }
}

/// Lookup tables preloaded for a step.
#[derive(Debug, Default)]
pub struct RequiredData {
    step: String,
    mappings: HashMap<String, HashMap<OriginalId, i64>>,
    sets: HashMap<String, HashSet<String>>,
}

impl RequiredData {
    pub fn new(step: &str) -> Self {
        Self {
            step: step.to_string(),
            ..Default::default()
        }
    }

    pub fn insert_mapping(&mut self, name: &str, mapping: HashMap<OriginalId, i64>) {
        self.mappings.insert(name.to_string(), mapping);
    }

    pub fn insert_set(&mut self, name: &str, set: HashSet<String>) {
        self.sets.insert(name.to_string(), set);
    }

    pub fn mapping(&self, name: &str) -> Result<&HashMap<OriginalId, i64>> {
        self.mappings.get(name).ok_or_else(|| {
            MigrateError::step(&self.step, format!("mapping '{}' is not a required mapping", name))
        })
    }

    /// Target id of `original_id` in a required mapping.
    pub fn mapped_id(&self, name: &str, original_id: &OriginalId) -> Result<Option<i64>> {
        Ok(self.mapping(name)?.get(original_id).copied())
    }

    pub fn set(&self, name: &str) -> Result<&HashSet<String>> {
        self.sets.get(name).ok_or_else(|| {
            MigrateError::step(&self.step, format!("set '{}' is not a required set", name))
        })
    }

    pub fn set_contains(&self, name: &str, value: &str) -> Result<bool> {
        Ok(self.set(name)?.contains(value))
    }
}

/// What a transform sees besides the row itself.
pub struct RowContext<'a> {
    step: &'a str,
    required: &'a RequiredData,
    stats: &'a mut RowStats,
}

impl<'a> RowContext<'a> {
    pub fn new(step: &'a str, required: &'a RequiredData, stats: &'a mut RowStats) -> Self {
        Self {
            step,
            required,
            stats,
        }
    }

    pub fn required(&self) -> &RequiredData {
        self.required
    }

    /// Record a skip with its reason.
    pub fn skip(&mut self, reason: &str) {
        debug!("{}: skipping row: {}", self.step, reason);
        self.stats.skipped += 1;
    }

    pub fn warn(&mut self, message: &str) {
        warn!("{}: {}", self.step, message);
        self.stats.warned += 1;
    }

    /// A row-level problem that does not stop the step.
    pub fn error(&mut self, message: &str) {
        warn!("{}: row error: {}", self.step, message);
        self.stats.errored += 1;
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepSummary {
    pub name: String,
    pub title: String,
    /// Source rows processed.
    pub rows: u64,
    pub inserted: u64,
    pub skipped: u64,
    pub warned: u64,
    pub errored: u64,
    /// Mappings recorded.
    pub mapped: u64,
    pub duration_seconds: f64,
}
