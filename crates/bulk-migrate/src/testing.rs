//! Shared fixtures for engine tests.

use std::sync::Arc;

use rusqlite::Connection;
use tempfile::TempDir;

use crate::config::{Config, ImportConfig, StagingConfig, TargetConfig};
use crate::error::Result;
use crate::executor::Stores;
use crate::mapping::{MappingStore, MappingType};
use crate::shared_data::SharedData;
use crate::staging::{SourceQuery, StagingStore};
use crate::step::{BulkCopyStep, RowContext, Step, StepContext, StepDefinition, StepSummary};
use crate::target::memory::MemoryTargetStore;
use crate::target::TargetStore;
use crate::uploads::UploadStore;
use crate::value::{Row, SourceRow};

/// Staging database on disk plus side stores and an in-memory target.
pub struct Fixture {
    _dir: TempDir,
    pub staging_config: StagingConfig,
    pub staging: StagingStore,
    pub mappings: MappingStore,
    pub uploads: UploadStore,
    pub target: Arc<MemoryTargetStore>,
    pub shared: SharedData,
    pub import: ImportConfig,
}

impl Fixture {
    pub fn new(staging_sql: &str, target: MemoryTargetStore) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let staging_config = StagingConfig {
            path: dir.path().join("intermediate.db"),
            mappings_path: None,
            uploads_path: None,
        };
        Connection::open(&staging_config.path)
            .unwrap()
            .execute_batch(staging_sql)
            .unwrap();

        let mappings = MappingStore::open(&staging_config.mappings_path()).unwrap();
        let uploads = UploadStore::open(&staging_config.uploads_path()).unwrap();
        let staging = StagingStore::open(&staging_config, 8).unwrap();
        let target = Arc::new(target);
        let shared = SharedData::new(Arc::clone(&target) as Arc<dyn TargetStore>);

        Self {
            _dir: dir,
            staging_config,
            staging,
            mappings,
            uploads,
            target,
            shared,
            import: ImportConfig::default(),
        }
    }

    pub fn ctx(&self) -> StepContext<'_> {
        StepContext {
            staging: &self.staging,
            target: self.target.as_ref(),
            mappings: &self.mappings,
            shared: &self.shared,
            config: &self.import,
        }
    }

    /// A full config pointing at this fixture's staging files.
    pub fn config(&self) -> Config {
        Config {
            staging: self.staging_config.clone(),
            target: TargetConfig {
                host: "localhost".into(),
                port: 5432,
                database: "forum".into(),
                user: "importer".into(),
                password: String::new(),
                schema: "public".into(),
                ssl_mode: "disable".into(),
                max_connections: 1,
            },
            import: self.import.clone(),
        }
    }

    /// Run one step to completion against this fixture.
    pub async fn run_step(&self, definition: &StepDefinition, step: Box<dyn Step>) -> Result<StepSummary> {
        BulkCopyStep::new(definition, step).execute(&self.ctx()).await
    }

    /// Hand the stores to an executor. The returned directory must outlive them.
    pub fn into_stores(self) -> (Stores, Arc<MemoryTargetStore>, TempDir) {
        let stores = Stores {
            staging: self.staging,
            mappings: self.mappings,
            uploads: self.uploads,
            target: Arc::clone(&self.target) as Arc<dyn TargetStore>,
        };
        (stores, self.target, self._dir)
    }
}

/// Copies `name` from a staging table that is not yet mapped.
pub struct CopyNamesStep {
    pub table: &'static str,
    pub mapping_type: MappingType,
}

#[async_trait::async_trait]
impl Step for CopyNamesStep {
    fn rows_query(&self) -> SourceQuery {
        SourceQuery::new(format!(
            "SELECT * FROM {} WHERE id NOT IN \
             (SELECT original_id FROM mapped.ids WHERE type = ?1) ORDER BY id",
            self.table
        ))
        .bind(self.mapping_type.code())
    }

    fn transform(&mut self, mut row: SourceRow, ctx: &mut RowContext<'_>) -> Result<Option<Row>> {
        if row.get_str("name").is_none() {
            ctx.skip("missing name");
            return Ok(None);
        }
        Ok(Some(Row::new().with("name", row.take("name"))))
    }
}
