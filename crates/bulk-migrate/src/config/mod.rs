//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::{Path, PathBuf};

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }
}

impl StagingConfig {
    /// Resolved path of the identifier-mapping database.
    pub fn mappings_path(&self) -> PathBuf {
        self.mappings_path
            .clone()
            .unwrap_or_else(|| self.sibling("mappings.db"))
    }

    /// Resolved path of the upload metadata database.
    pub fn uploads_path(&self) -> PathBuf {
        self.uploads_path
            .clone()
            .unwrap_or_else(|| self.sibling("uploads.db"))
    }

    fn sibling(&self, file_name: &str) -> PathBuf {
        match self.path.parent() {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

impl TargetConfig {
    /// `host:port/database` label for log lines.
    pub fn display_name(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
staging:
  path: /data/import/intermediate.db
target:
  host: localhost
  database: forum
  user: postgres
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.target.ssl_mode, "disable");
        assert_eq!(config.import.batch_size, 1000);
        assert_eq!(config.import.slow_load_threshold_secs, 1);
        assert!(config.import.reserved_usernames.contains(&"admin".to_string()));
    }

    #[test]
    fn test_store_paths_default_next_to_staging() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(
            config.staging.mappings_path(),
            PathBuf::from("/data/import/mappings.db")
        );
        assert_eq!(
            config.staging.uploads_path(),
            PathBuf::from("/data/import/uploads.db")
        );
    }

    #[test]
    fn test_explicit_store_paths() {
        let yaml = r#"
staging:
  path: intermediate.db
  mappings_path: /tmp/ids.db
  uploads_path: /tmp/files.db
target:
  host: localhost
  database: forum
  user: postgres
import:
  batch_size: 250
  only: [users]
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.staging.mappings_path(), PathBuf::from("/tmp/ids.db"));
        assert_eq!(config.staging.uploads_path(), PathBuf::from("/tmp/files.db"));
        assert_eq!(config.import.batch_size, 250);
        assert_eq!(config.import.only, vec!["users".to_string()]);
    }
}
