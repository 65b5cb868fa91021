//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Staging database and its auxiliary stores.
    pub staging: StagingConfig,

    /// Target database configuration (PostgreSQL).
    pub target: TargetConfig,

    /// Import behavior configuration.
    #[serde(default)]
    pub import: ImportConfig,
}

/// Staging (intermediate) database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Path to the staging SQLite database.
    pub path: PathBuf,

    /// Path to the identifier-mapping database (default: `mappings.db` next to the staging DB).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mappings_path: Option<PathBuf>,

    /// Path to the upload metadata database (default: `uploads.db` next to the staging DB).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_path: Option<PathBuf>,
}

/// Target database (PostgreSQL) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Database host.
    pub host: String,

    /// Database port (default: 5432).
    #[serde(default = "default_pg_port")]
    pub port: u16,

    /// Database name.
    pub database: String,

    /// Username.
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// Target schema (default: "public").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// SSL mode (default: "disable").
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Maximum pooled connections (default: 4).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Import behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Rows per COPY transaction (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Steps to exclude from the run.
    #[serde(default)]
    pub skip: Vec<String>,

    /// Steps to run, together with everything they depend on.
    #[serde(default)]
    pub only: Vec<String>,

    /// Report required-data loading when it takes at least this long (default: 1).
    #[serde(default = "default_slow_load_threshold_secs")]
    pub slow_load_threshold_secs: u64,

    /// Rows between progress events (default: 10000).
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Rows buffered between the staging reader and the loader (default: 1000).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Usernames that imported users may not take.
    #[serde(default = "default_reserved_usernames")]
    pub reserved_usernames: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            skip: Vec::new(),
            only: Vec::new(),
            slow_load_threshold_secs: default_slow_load_threshold_secs(),
            progress_interval: default_progress_interval(),
            channel_capacity: default_channel_capacity(),
            reserved_usernames: default_reserved_usernames(),
        }
    }
}

fn default_pg_port() -> u16 {
    5432
}

fn default_public_schema() -> String {
    "public".to_string()
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> usize {
    4
}

fn default_batch_size() -> usize {
    1000
}

fn default_slow_load_threshold_secs() -> u64 {
    1
}

fn default_progress_interval() -> u64 {
    10_000
}

fn default_channel_capacity() -> usize {
    1000
}

fn default_reserved_usernames() -> Vec<String> {
    [
        "admin",
        "moderator",
        "administrator",
        "mod",
        "sys",
        "system",
        "community",
        "info",
        "you",
        "name",
        "username",
        "user",
        "nickname",
        "support",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
