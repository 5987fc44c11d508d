//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Override target credentials from the environment.
    ///
    /// `MARIADB_USER` and `MARIADB_PASSWORD` take precedence over the file
    /// values, so config files can stay free of secrets.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(user) = std::env::var("MARIADB_USER") {
            if !user.is_empty() {
                self.target.user = user;
            }
        }
        if let Ok(password) = std::env::var("MARIADB_PASSWORD") {
            if !password.is_empty() {
                self.target.password = password;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml_minimal() {
        let yaml = r#"
source:
  path: kuma.db
target:
  host: 127.0.0.1
  database: kumadb
  user: kuma
  password: secret
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.target.port, 3306);
        assert_eq!(config.target.ssl_mode, "prefer");
        assert_eq!(config.migration.batch_size, 500);
        assert!(config.migration.create_indexes);
        assert!(config.migration.create_foreign_keys);
        assert_eq!(
            config.migration.on_value_error,
            ValueErrorPolicy::AbortTable
        );
    }

    #[test]
    fn test_from_yaml_overrides() {
        let yaml = r#"
source:
  path: kuma.db
target:
  host: db.internal
  port: 3307
  database: kumadb
  user: kuma
  password: secret
  ssl_mode: require
migration:
  batch_size: 1000
  on_value_error: skip_row
  create_indexes: false
  exclude_tables:
    - knex_migrations_lock
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.target.port, 3307);
        assert_eq!(config.migration.batch_size, 1000);
        assert_eq!(config.migration.on_value_error, ValueErrorPolicy::SkipRow);
        assert!(!config.migration.create_indexes);
        assert_eq!(
            config.migration.exclude_tables,
            vec!["knex_migrations_lock".to_string()]
        );
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        let yaml = r#"
source:
  path: kuma.db
target:
  host: ""
  database: kumadb
  user: kuma
  password: secret
"#;
        assert!(Config::from_yaml(yaml).is_err());
    }
}
