//! Configuration management.

use serde::Deserialize;
use std::time::Duration;

use crate::error::{Result, WarrantError};
use crate::telemetry::LoggingConfig;

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Authorization engine configuration
    #[serde(default)]
    pub permission: PermissionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionConfig {
    /// Switch `has_permission_to` to hierarchical wildcard matching
    #[serde(default)]
    pub enable_wildcard_permission: bool,

    /// Pivot column that scopes assignment rows to an entity
    #[serde(default = "default_entity_key")]
    pub entity_key: String,

    /// Make `has_all_roles` validate and filter by entity like its siblings
    #[serde(default)]
    pub strict_entity_check: bool,

    /// Model names the registry binds to by default
    #[serde(default)]
    pub models: ModelBindings,

    /// Registry cache settings
    #[serde(default)]
    pub cache: RegistryCacheConfig,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            enable_wildcard_permission: false,
            entity_key: default_entity_key(),
            strict_entity_check: false,
            models: ModelBindings::default(),
            cache: RegistryCacheConfig::default(),
        }
    }
}

impl PermissionConfig {
    /// Reject settings the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.entity_key.trim().is_empty() {
            return Err(WarrantError::Configuration(
                "permission.entity_key must not be empty".to_string(),
            ));
        }
        if self.cache.key.trim().is_empty() {
            return Err(WarrantError::Configuration(
                "permission.cache.key must not be empty".to_string(),
            ));
        }
        if self.models.permission.trim().is_empty() || self.models.role.trim().is_empty() {
            return Err(WarrantError::Configuration(
                "permission.models bindings must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelBindings {
    /// Concrete permission model name
    #[serde(default = "default_permission_model")]
    pub permission: String,

    /// Concrete role model name
    #[serde(default = "default_role_model")]
    pub role: String,
}

impl Default for ModelBindings {
    fn default() -> Self {
        Self {
            permission: default_permission_model(),
            role: default_role_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryCacheConfig {
    /// How long a cached lookup stays valid
    #[serde(default = "default_expiration_time", with = "humantime_serde")]
    pub expiration_time: Duration,

    /// Prefix for every cache key
    #[serde(default = "default_cache_key")]
    pub key: String,
}

impl Default for RegistryCacheConfig {
    fn default() -> Self {
        Self {
            expiration_time: default_expiration_time(),
            key: default_cache_key(),
        }
    }
}

// Default value functions
fn default_entity_key() -> String { "entity_id".to_string() }
fn default_permission_model() -> String { "permission".to_string() }
fn default_role_model() -> String { "role".to_string() }
fn default_expiration_time() -> Duration { Duration::from_secs(24 * 60 * 60) }
fn default_cache_key() -> String { "warrant.permission.cache".to_string() }

impl Config {
    /// Load configuration from the environment (and a `.env` file if present).
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("WARRANT").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.permission.validate()?;
        Ok(cfg)
    }

    /// Load from a specific file path.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("WARRANT").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.permission.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = PermissionConfig::default();
        assert!(!cfg.enable_wildcard_permission);
        assert!(!cfg.strict_entity_check);
        assert_eq!(cfg.entity_key, "entity_id");
        assert_eq!(cfg.cache.expiration_time, Duration::from_secs(86_400));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_entity_key_rejected() {
        let cfg = PermissionConfig {
            entity_key: " ".to_string(),
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigurationError);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[permission]
enable_wildcard_permission = true
entity_key = "project_id"

[permission.cache]
expiration_time = "10m"

[logging]
level = "debug"
format = "compact"
"#
        )
        .unwrap();

        let cfg = Config::from_file(file.path().to_str().unwrap()).unwrap();
        assert!(cfg.permission.enable_wildcard_permission);
        assert_eq!(cfg.permission.entity_key, "project_id");
        assert_eq!(cfg.permission.cache.expiration_time, Duration::from_secs(600));
        assert_eq!(cfg.permission.cache.key, "warrant.permission.cache");
        assert_eq!(cfg.logging.level, "debug");
    }
}
