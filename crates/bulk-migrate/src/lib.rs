//! # bulk-migrate
//!
//! Dependency-ordered bulk import from a staging SQLite database into
//! PostgreSQL.
//!
//! An import is a set of named steps. Each step declares the steps it
//! depends on, the data it needs preloaded and the target table it fills:
//!
//! - **Dependency ordering** with skip / only filters
//! - **Binary COPY** loading, one transaction per batch
//! - **Identifier mapping** from source ids to target ids, persisted per
//!   committed batch so an interrupted import can be rerun
//! - **Unique names** for usernames, group, category and badge names
//!
//! ## Example
//!
//! ```rust,no_run
//! use bulk_migrate::{builtin_registry, Config, Executor};
//!
//! #[tokio::main]
//! async fn main() -> bulk_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let result = Executor::new(config, builtin_registry()).run().await?;
//!     println!("Imported {} rows", result.rows_inserted());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod mapping;
pub mod names;
pub mod schema;
pub mod shared_data;
pub mod staging;
pub mod step;
pub mod steps;
pub mod target;
pub mod uploads;
pub mod value;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, ImportConfig, StagingConfig, TargetConfig};
pub use error::{MigrateError, Result};
pub use executor::{format_duration, Executor, HealthCheckResult, ImportResult, Stores};
pub use mapping::{MappingStore, MappingType};
pub use shared_data::SharedData;
pub use staging::{SourceQuery, StagingStore};
pub use step::{Step, StepDefinition, StepRegistry, StepSummary};
pub use steps::builtin_registry;
pub use target::{PgTargetStore, TargetStore};
pub use value::{OriginalId, Row, SourceRow, Value};
