//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Staging validation
    if config.staging.path.as_os_str().is_empty() {
        return Err(MigrateError::Config("staging.path is required".into()));
    }

    // Target validation
    if config.target.host.is_empty() {
        return Err(MigrateError::Config("target.host is required".into()));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }
    if config.target.user.is_empty() {
        return Err(MigrateError::Config("target.user is required".into()));
    }
    if config.target.max_connections == 0 {
        return Err(MigrateError::Config(
            "target.max_connections must be at least 1".into(),
        ));
    }

    // Import validation
    if config.import.batch_size == 0 {
        return Err(MigrateError::Config(
            "import.batch_size must be at least 1".into(),
        ));
    }
    if config.import.channel_capacity == 0 {
        return Err(MigrateError::Config(
            "import.channel_capacity must be at least 1".into(),
        ));
    }
    if !config.import.skip.is_empty() && !config.import.only.is_empty() {
        return Err(MigrateError::Config(
            "import.skip and import.only cannot be used together".into(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ImportConfig, StagingConfig, TargetConfig};
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config {
            staging: StagingConfig {
                path: PathBuf::from("intermediate.db"),
                mappings_path: None,
                uploads_path: None,
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                port: 5432,
                database: "forum".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                schema: "public".to_string(),
                ssl_mode: "disable".to_string(),
                max_connections: 4,
            },
            import: ImportConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_staging_path() {
        let mut config = valid_config();
        config.staging.path = PathBuf::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_target_host() {
        let mut config = valid_config();
        config.target.host = String::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.import.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_skip_and_only_are_exclusive() {
        let mut config = valid_config();
        config.import.skip = vec!["badges".to_string()];
        config.import.only = vec!["users".to_string()];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("cannot be used together"));
    }
}
