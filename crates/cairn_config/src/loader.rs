//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::CairnConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "cairn.toml";

/// Loads and validates `cairn.toml` from a project directory.
///
/// A missing file is not an error: the defaults are returned. A relative
/// `cache.dir` is resolved against `project_dir`.
pub fn load_config(project_dir: &Path) -> Result<CairnConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let mut config = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        load_config_from_str(&content)?
    } else {
        CairnConfig::default()
    };
    if config.cache.dir.is_relative() {
        config.cache.dir = project_dir.join(&config.cache.dir);
    }
    Ok(config)
}

/// Parses and validates a `cairn.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<CairnConfig, ConfigError> {
    let config: CairnConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &CairnConfig) -> Result<(), ConfigError> {
    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "cache.dir must not be empty".to_string(),
        ));
    }
    if config.probe.http_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "probe.http_timeout_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
