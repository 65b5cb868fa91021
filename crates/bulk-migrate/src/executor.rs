//! Import executor - runs the sorted steps against the attached stores.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::mapping::MappingStore;
use crate::shared_data::SharedData;
use crate::staging::StagingStore;
use crate::step::{BulkCopyStep, StepContext, StepDefinition, StepRegistry, StepSummary};
use crate::target::{PgTargetStore, TargetStore};
use crate::uploads::UploadStore;

/// The stores one run works against.
pub struct Stores {
    pub staging: StagingStore,
    pub mappings: MappingStore,
    pub uploads: UploadStore,
    pub target: Arc<dyn TargetStore>,
}

impl Stores {
    /// Open every store named in the configuration.
    ///
    /// The mapping and upload stores are created and migrated first, since
    /// the staging connection attaches them.
    pub async fn open(config: &Config) -> Result<Self> {
        let mappings = MappingStore::open(&config.staging.mappings_path())?;
        let uploads = UploadStore::open(&config.staging.uploads_path())?;
        let staging = StagingStore::open(&config.staging, config.import.channel_capacity)?;
        let target = PgTargetStore::connect(&config.target).await?;

        Ok(Self {
            staging,
            mappings,
            uploads,
            target: Arc::new(target),
        })
    }

    /// Release every connection.
    pub async fn close(self) {
        self.target.close().await;
        drop(self.mappings);
        drop(self.uploads);
        info!("Closed store connections");
    }
}

/// Result of an import run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportResult {
    /// Unique run identifier.
    pub run_id: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Per-step outcome, in execution order.
    pub steps: Vec<StepSummary>,
}

impl ImportResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn rows_inserted(&self) -> u64 {
        self.steps.iter().map(|s| s.inserted).sum()
    }

    pub fn duration(&self) -> String {
        format_duration(Duration::from_secs_f64(self.duration_seconds.max(0.0)))
    }
}

/// Health of each store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub healthy: bool,
    pub staging: StoreHealth,
    pub mappings: StoreHealth,
    pub uploads: StoreHealth,
    pub target: StoreHealth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreHealth {
    fn from_result<T>(started: Instant, result: &Result<T>) -> Self {
        Self {
            ok: result.is_ok(),
            latency_ms: started.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
        }
    }
}

/// Runs import steps in dependency order.
pub struct Executor {
    config: Config,
    registry: StepRegistry,
    print_progress: bool,
}

impl Executor {
    pub fn new(config: Config, registry: StepRegistry) -> Self {
        Self {
            config,
            registry,
            print_progress: true,
        }
    }

    /// Print `<title> [<index>/<total>]` lines to stdout (default: on).
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.print_progress = enabled;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Steps that would run, in order.
    pub fn plan(&self) -> Result<Vec<&StepDefinition>> {
        self.registry
            .sorted(&self.config.import.skip, &self.config.import.only)
    }

    /// Open the configured stores and run every selected step.
    pub async fn run(&self) -> Result<ImportResult> {
        // Fail on a bad step graph before touching any store.
        self.plan()?;
        let stores = Stores::open(&self.config).await?;
        self.run_with(stores).await
    }

    /// Run against already opened stores. The stores are closed afterwards,
    /// whether or not the run succeeded.
    pub async fn run_with(&self, stores: Stores) -> Result<ImportResult> {
        let result = self.execute_steps(&stores).await;
        stores.close().await;
        result
    }

    async fn execute_steps(&self, stores: &Stores) -> Result<ImportResult> {
        let started_at = Utc::now();
        let started = Instant::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting import run: {}", run_id);

        let steps = self.plan()?;
        let shared = SharedData::new(Arc::clone(&stores.target));
        let ctx = StepContext {
            staging: &stores.staging,
            target: stores.target.as_ref(),
            mappings: &stores.mappings,
            shared: &shared,
            config: &self.config.import,
        };

        let total = steps.len();
        let mut summaries = Vec::with_capacity(total);
        for (idx, definition) in steps.into_iter().enumerate() {
            let line = format!("{} [{}/{}]", definition.step_title(), idx + 1, total);
            info!("{}", line);
            if self.print_progress {
                println!("{}", line);
            }

            let step = self.registry.instantiate(definition.name())?;
            let summary = BulkCopyStep::new(definition, step)
                .execute(&ctx)
                .await
                .inspect_err(|e| error!("Import aborted in step {}: {}", definition.name(), e))?;
            summaries.push(summary);
        }

        let result = ImportResult {
            run_id,
            started_at,
            completed_at: Utc::now(),
            duration_seconds: started.elapsed().as_secs_f64(),
            steps: summaries,
        };
        info!(
            "Import complete: {} steps, {} rows in {}",
            result.steps.len(),
            result.rows_inserted(),
            result.duration()
        );
        Ok(result)
    }

    /// Try to open each store and report what works.
    pub async fn health_check(&self) -> HealthCheckResult {
        let config = &self.config;

        let started = Instant::now();
        let mappings = MappingStore::open(&config.staging.mappings_path());
        let mappings_health = StoreHealth::from_result(started, &mappings);

        let started = Instant::now();
        let uploads = UploadStore::open(&config.staging.uploads_path());
        let uploads_health = StoreHealth::from_result(started, &uploads);

        let started = Instant::now();
        let staging = StagingStore::open(&config.staging, config.import.channel_capacity);
        let staging_health = StoreHealth::from_result(started, &staging);

        let started = Instant::now();
        let target = PgTargetStore::connect(&config.target).await;
        let target_health = StoreHealth::from_result(started, &target);
        if let Ok(target) = target {
            target.close().await;
        }

        HealthCheckResult {
            healthy: mappings_health.ok && uploads_health.ok && staging_health.ok && target_health.ok,
            staging: staging_health,
            mappings: mappings_health,
            uploads: uploads_health,
            target: target_health,
        }
    }
}

/// Human-readable duration: `1h 2m 3s`, `2m 5s`, `4.2s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{:.1}s", duration.as_secs_f64())
    }
}
