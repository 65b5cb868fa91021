//! Generic step driver.
//!
//! Runs one step through `LoadingRequiredData -> Streaming -> Completed`,
//! feeding transformed rows to the [`BulkLoader`] and persisting identifier
//! mappings after every committed batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde::Serialize;
use tracing::{error, info};

use super::definition::StepDefinition;
use super::{RequiredData, RowContext, RowStats, Step, StepContext, StepSummary};
use crate::error::{MigrateError, Result};
use crate::executor::format_duration;
use crate::target::BulkLoader;
use crate::value::{OriginalId, Row, Value};

/// Lifecycle of a step. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Created,
    LoadingRequiredData,
    Streaming,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy)]
struct TimestampColumns {
    created_at: bool,
    updated_at: bool,
}

/// Running totals for progress output.
struct Progress<'a> {
    step: &'a str,
    total: u64,
    interval: u64,
    rows: u64,
    skipped: u64,
    warned: u64,
    errored: u64,
}

impl<'a> Progress<'a> {
    fn new(step: &'a str, total: u64, interval: u64) -> Self {
        Self {
            step,
            total,
            interval,
            rows: 0,
            skipped: 0,
            warned: 0,
            errored: 0,
        }
    }

    fn record(&mut self, row: &RowStats) {
        self.rows += 1;
        self.skipped += row.skipped;
        self.warned += row.warned;
        self.errored += row.errored;

        if self.interval > 0 && (self.rows % self.interval == 0 || self.rows == self.total) {
            info!(
                "{}: {}/{} rows ({} skipped, {} warnings, {} errors)",
                self.step, self.rows, self.total, self.skipped, self.warned, self.errored
            );
        }
    }
}

/// Drives one [`Step`] instance.
pub struct BulkCopyStep<'d> {
    definition: &'d StepDefinition,
    step: Box<dyn Step>,
    state: StepState,
}

impl<'d> BulkCopyStep<'d> {
    pub fn new(definition: &'d StepDefinition, step: Box<dyn Step>) -> Self {
        Self {
            definition,
            step,
            state: StepState::Created,
        }
    }

    pub fn state(&self) -> StepState {
        self.state
    }

    /// Run the step to completion. Any error is fatal for the run.
    pub async fn execute(&mut self, ctx: &StepContext<'_>) -> Result<StepSummary> {
        let result = self.run(ctx).await;
        match &result {
            Ok(_) => self.state = StepState::Completed,
            Err(e) => {
                error!("{}: failed: {}", self.definition.name(), e);
                self.state = StepState::Failed;
            }
        }
        result
    }

    async fn run(&mut self, ctx: &StepContext<'_>) -> Result<StepSummary> {
        let def = self.definition;
        let started = Instant::now();

        self.state = StepState::LoadingRequiredData;
        let required = load_required_data(def, ctx).await?;
        self.step.setup(ctx).await?;

        self.state = StepState::Streaming;
        let table = def.target_table();
        let query = self.step.rows_query();
        let total = ctx.staging.count(&query).await?;
        info!("{}: {} source rows", def.name(), total);

        let mut last_id = match def.mapping_type() {
            Some(_) => ctx.target.max_id(table).await?,
            None => 0,
        };
        let timestamps = TimestampColumns {
            created_at: def.has_column("created_at"),
            updated_at: def.has_column("updated_at"),
        };

        let mut progress = Progress::new(def.name(), total, ctx.config.progress_interval);
        let mut row_stats = RowStats::default();
        let mapped = AtomicU64::new(0);
        let step = &mut self.step;

        let rows = ctx.staging.stream(query).map(|source| -> Result<Row> {
            let source = source?;
            row_stats.reset();
            let original_id = source.original_id("id");

            let transformed = {
                let mut row_ctx = RowContext::new(def.name(), &required, &mut row_stats);
                step.transform(source, &mut row_ctx)?
            };
            let row = match transformed {
                Some(mut row) => {
                    if row.original_id().is_none() {
                        if let Some(id) = original_id {
                            row.set_original_id(id);
                        }
                    }
                    if row.is_skipped() {
                        row_stats.skipped = row_stats.skipped.max(1);
                    } else {
                        prepare_row(&mut row, def, &mut last_id, timestamps);
                    }
                    row
                }
                None => {
                    row_stats.skipped = row_stats.skipped.max(1);
                    Row::skipped(original_id)
                }
            };

            progress.record(&row_stats);
            Ok(row)
        });

        // skipped rows that carry a target id are mapped to that existing record
        let mapping_type = def.mapping_type();
        let mappings = ctx.mappings;
        let mapped_count = &mapped;
        let on_batch_committed = move |inserted: &[Row], skipped: &[Row]| {
            let pairs: Vec<(OriginalId, i64)> = match mapping_type {
                Some(_) => inserted
                    .iter()
                    .chain(skipped)
                    .filter_map(|row| Some((row.original_id()?.clone(), row.id()?)))
                    .collect(),
                None => Vec::new(),
            };
            async move {
                if let Some(mapping_type) = mapping_type {
                    let count = mappings.record_batch(mapping_type, pairs).await?;
                    mapped_count.fetch_add(count as u64, Ordering::Relaxed);
                }
                Ok::<(), MigrateError>(())
            }
        };

        let loader = BulkLoader::new(ctx.target, ctx.config.batch_size);
        let load = loader
            .bulk_insert(table, def.column_names(), rows, on_batch_committed)
            .await?;

        if def.stores_mapped_ids() {
            loader.resync_sequence(table).await?;
        }
        self.step.finish(ctx).await?;

        let summary = StepSummary {
            name: def.name().to_string(),
            title: def.step_title().to_string(),
            rows: progress.rows,
            inserted: load.inserted,
            skipped: progress.skipped,
            warned: progress.warned,
            errored: progress.errored,
            mapped: mapped.load(Ordering::Relaxed),
            duration_seconds: started.elapsed().as_secs_f64(),
        };
        info!(
            "{}: {} inserted, {} skipped, {} mapped in {}",
            def.name(),
            summary.inserted,
            summary.skipped,
            summary.mapped,
            format_duration(started.elapsed())
        );
        Ok(summary)
    }
}

async fn load_required_data(def: &StepDefinition, ctx: &StepContext<'_>) -> Result<RequiredData> {
    let started = Instant::now();
    let mut required = RequiredData::new(def.name());

    for (name, mapping_type) in def.required_mappings() {
        required.insert_mapping(name, ctx.mappings.load_all(*mapping_type).await?);
    }
    for (name, sql) in def.required_sets() {
        required.insert_set(name, ctx.target.query_set(sql).await?);
    }

    let elapsed = started.elapsed();
    if elapsed >= Duration::from_secs(ctx.config.slow_load_threshold_secs)
        && !(def.required_mappings().is_empty() && def.required_sets().is_empty())
    {
        info!(
            "{}: loading required data took {}",
            def.name(),
            format_duration(elapsed)
        );
    }

    Ok(required)
}

/// Assign a target id and default the timestamps of a row that will be inserted.
fn prepare_row(row: &mut Row, def: &StepDefinition, last_id: &mut i64, ts: TimestampColumns) {
    if def.stores_mapped_ids() && !row.has("id") {
        *last_id += 1;
        row.set("id", *last_id);
    }

    if ts.created_at && !row.has("created_at") {
        row.set("created_at", Value::Now);
    }
    if ts.updated_at && !row.has("updated_at") {
        let created_at = row.get("created_at").cloned().unwrap_or(Value::Now);
        row.set("updated_at", created_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingType;
    use crate::staging::SourceQuery;
    use crate::target::memory::MemoryTargetStore;
    use crate::testing::{CopyNamesStep, Fixture};
    use crate::value::SourceRow;

    const STAGING: &str = "
        CREATE TABLE things (id INTEGER PRIMARY KEY, name TEXT, created_at TEXT);
        INSERT INTO things VALUES
            (1, 'one', '2020-01-01 10:00:00'),
            (2, NULL, NULL),
            (3, 'three', NULL);
    ";

    fn target() -> MemoryTargetStore {
        MemoryTargetStore::new()
            .with_table(
                "things",
                &[
                    ("id", "int8"),
                    ("name", "text"),
                    ("created_at", "timestamp"),
                    ("updated_at", "timestamp"),
                ],
            )
            .with_existing_max_id("things", 100)
    }

    fn definition() -> StepDefinition {
        StepDefinition::new("things", "things")
            .columns(&["id", "name", "created_at", "updated_at"])
            .store_mapped_ids(MappingType::Badges)
    }

    /// Keeps `created_at` from staging.
    struct TimestampedStep;

    #[async_trait::async_trait]
    impl Step for TimestampedStep {
        fn rows_query(&self) -> SourceQuery {
            SourceQuery::new("SELECT * FROM things ORDER BY id")
        }

        fn transform(&mut self, mut row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
            if row.get_str("name").is_none() {
                ctx.skip("missing name");
                return Ok(None);
            }
            Ok(Some(
                Row::new()
                    .with("name", row.take("name"))
                    .with("created_at", row.take("created_at")),
            ))
        }
    }

    #[tokio::test]
    async fn test_assigns_ids_after_existing_max_and_records_mappings() {
        let fx = Fixture::new(STAGING, target());
        let def = definition();
        let mut step = BulkCopyStep::new(&def, Box::new(TimestampedStep));

        let summary = step.execute(&fx.ctx()).await.unwrap();

        assert_eq!(step.state(), StepState::Completed);
        assert_eq!(summary.rows, 3);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.mapped, 2);
        assert_eq!(fx.target.ids("things"), vec![101, 102]);
        assert_eq!(fx.target.next_sequence_value("things"), Some(103));

        let mappings = fx.mappings.load(MappingType::Badges).unwrap();
        assert_eq!(mappings.get(&OriginalId::Int(1)), Some(&101));
        assert_eq!(mappings.get(&OriginalId::Int(3)), Some(&102));
        assert!(!mappings.contains_key(&OriginalId::Int(2)));
    }

    /// Links "two" to an existing target record instead of inserting it.
    struct LinkExistingStep;

    #[async_trait::async_trait]
    impl Step for LinkExistingStep {
        fn rows_query(&self) -> SourceQuery {
            SourceQuery::new("SELECT * FROM things ORDER BY id")
        }

        fn transform(&mut self, mut row: SourceRow, _ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
            if row.get_str("name") == Some("two") {
                let mut existing = Row::new().with("id", 7i64).with_original_id("legacy-2");
                existing.mark_skipped();
                return Ok(Some(existing));
            }
            Ok(Some(Row::new().with("name", row.take("name"))))
        }
    }

    #[tokio::test]
    async fn test_skipped_row_with_target_id_is_mapped_but_not_inserted() {
        let fx = Fixture::new(
            "CREATE TABLE things (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO things VALUES (1, 'one'), (2, 'two'), (3, 'three');",
            MemoryTargetStore::new()
                .with_table("things", &[("id", "int8"), ("name", "text")])
                .with_existing_max_id("things", 100),
        );
        let def = StepDefinition::new("things", "things")
            .columns(&["id", "name"])
            .store_mapped_ids(MappingType::Categories);

        let summary = BulkCopyStep::new(&def, Box::new(LinkExistingStep))
            .execute(&fx.ctx())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.mapped, 3);
        assert_eq!(fx.target.ids("things"), vec![101, 102]);
        assert_eq!(
            fx.target.texts("things", "name"),
            vec![Some("one".to_string()), Some("three".to_string())]
        );

        let mappings = fx.mappings.load(MappingType::Categories).unwrap();
        assert_eq!(mappings.len(), 3);
        assert_eq!(mappings.get(&OriginalId::Text("legacy-2".into())), Some(&7));
        assert_eq!(mappings.get(&OriginalId::Int(3)), Some(&102));
        assert!(!mappings.contains_key(&OriginalId::Int(2)));
    }

    #[tokio::test]
    async fn test_timestamps_default_to_target_clock() {
        let fx = Fixture::new(STAGING, target());
        let def = definition();
        BulkCopyStep::new(&def, Box::new(TimestampedStep))
            .execute(&fx.ctx())
            .await
            .unwrap();

        let created = fx.target.fields("things", "created_at");
        let updated = fx.target.fields("things", "updated_at");
        // updated_at follows created_at, whether imported or defaulted
        assert_eq!(created, updated);
        assert_ne!(created[0], created[1]);

        let now = fx.target.now_value();
        let epoch = chrono::NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let micros = (now - epoch).num_microseconds().unwrap();
        assert_eq!(created[1].as_deref(), Some(&micros.to_be_bytes()[..]));
    }

    #[tokio::test]
    async fn test_rerun_skips_already_mapped_rows() {
        let fx = Fixture::new(
            "CREATE TABLE things (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO things VALUES (1, 'a'), (2, 'b');",
            MemoryTargetStore::new().with_table("things", &[("id", "int8"), ("name", "text")]),
        );
        let def = StepDefinition::new("things", "things")
            .columns(&["id", "name"])
            .store_mapped_ids(MappingType::Categories);
        let copy = || {
            Box::new(CopyNamesStep {
                table: "things",
                mapping_type: MappingType::Categories,
            })
        };

        let first = BulkCopyStep::new(&def, copy()).execute(&fx.ctx()).await.unwrap();
        let second = BulkCopyStep::new(&def, copy()).execute(&fx.ctx()).await.unwrap();

        assert_eq!(first.inserted, 2);
        assert_eq!(second.rows, 0);
        assert_eq!(fx.target.ids("things"), vec![1, 2]);
    }

    /// Resolves `user_id` through the users mapping.
    struct MembershipStep;

    #[async_trait::async_trait]
    impl Step for MembershipStep {
        fn rows_query(&self) -> SourceQuery {
            SourceQuery::new("SELECT * FROM memberships ORDER BY rowid")
        }

        fn transform(&mut self, row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
            let Some(user) = row.original_id("user_id") else {
                return Ok(None);
            };
            match ctx.required().mapped_id("users", &user)? {
                Some(user_id) => Ok(Some(Row::new().with("user_id", user_id))),
                None => {
                    ctx.warn("user was not imported");
                    Ok(None)
                }
            }
        }
    }

    #[tokio::test]
    async fn test_required_mapping_lookup() {
        let fx = Fixture::new(
            "CREATE TABLE memberships (user_id INTEGER);
             INSERT INTO memberships VALUES (1), (2), (1);",
            MemoryTargetStore::new().with_table("memberships", &[("user_id", "int4")]),
        );
        fx.mappings
            .insert_batch(MappingType::Users, &[(OriginalId::Int(1), 55)])
            .unwrap();
        let def = StepDefinition::new("memberships", "memberships")
            .requires_mapping("users", MappingType::Users)
            .columns(&["user_id"]);

        let summary = BulkCopyStep::new(&def, Box::new(MembershipStep))
            .execute(&fx.ctx())
            .await
            .unwrap();

        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.warned, 1);
        assert_eq!(summary.mapped, 0);
        assert_eq!(fx.target.ids("memberships"), Vec::<i64>::new());
        assert_eq!(fx.target.fields("memberships", "user_id").len(), 2);
        // no ids were assigned, so the sequence was left alone
        assert_eq!(fx.target.next_sequence_value("memberships"), None);
    }

    #[tokio::test]
    async fn test_failure_marks_step_failed() {
        let fx = Fixture::new(
            STAGING,
            MemoryTargetStore::new().with_table("things", &[("id", "int8")]),
        );
        let def = definition();
        let mut step = BulkCopyStep::new(&def, Box::new(TimestampedStep));

        let result = step.execute(&fx.ctx()).await;

        assert!(matches!(result, Err(MigrateError::MissingColumn { .. })));
        assert_eq!(step.state(), StepState::Failed);
        assert_eq!(fx.mappings.count(MappingType::Badges).unwrap(), 0);
    }

    #[test]
    fn test_prepare_row_keeps_explicit_values() {
        let def = definition();
        let mut last_id = 10;
        let ts = TimestampColumns {
            created_at: true,
            updated_at: true,
        };

        let mut explicit = Row::new().with("id", 3i64).with("updated_at", Value::Null);
        prepare_row(&mut explicit, &def, &mut last_id, ts);
        assert_eq!(explicit.id(), Some(3));
        assert_eq!(last_id, 10);
        assert_eq!(explicit.get("created_at"), Some(&Value::Now));
        assert_eq!(explicit.get("updated_at"), Some(&Value::Now));

        let mut fresh = Row::new();
        prepare_row(&mut fresh, &def, &mut last_id, ts);
        assert_eq!(fresh.id(), Some(11));
    }
}
