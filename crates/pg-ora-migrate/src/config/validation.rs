//! Configuration validation.

use crate::config::Config;
use crate::error::{MigrateError, Result};

/// Validate a loaded configuration.
pub fn validate(config: &Config) -> Result<()> {
    if config.migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be greater than 0".to_string(),
        ));
    }

    if config.migration.parallel_tables == 0 {
        return Err(MigrateError::Config(
            "migration.parallel_tables must be at least 1".to_string(),
        ));
    }

    if config.source.database.is_empty() {
        return Err(MigrateError::Config(
            "source.database must not be empty".to_string(),
        ));
    }

    if config.source.user.is_empty() {
        return Err(MigrateError::Config(
            "source.user must not be empty".to_string(),
        ));
    }

    if config.target.service_name.is_empty() {
        return Err(MigrateError::Config(
            "target.service_name must not be empty".to_string(),
        ));
    }

    if config.target.user.is_empty() {
        return Err(MigrateError::Config(
            "target.user must not be empty".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::Config;

    fn minimal_yaml() -> &'static str {
        r#"
source:
  database: pcm
  user: app
target:
  service_name: ORCLPDB1
  user: pcm_app
"#
    }

    #[test]
    fn test_minimal_config_is_valid() {
        let config = Config::from_yaml(minimal_yaml()).unwrap();
        assert_eq!(config.source.port, 5432);
        assert_eq!(config.target.port, 1521);
        assert_eq!(config.migration.batch_size, 1000);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let yaml = format!("{}migration:\n  batch_size: 0\n", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_zero_parallel_tables_rejected() {
        let yaml = format!("{}migration:\n  parallel_tables: 0\n", minimal_yaml());
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_missing_user_rejected() {
        let yaml = r#"
source:
  database: pcm
  user: ""
target:
  service_name: ORCLPDB1
  user: pcm_app
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}
