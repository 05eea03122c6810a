//! Engine configuration loading
//!
//! Configuration is a JSON file holding an [`EngineConfig`]; missing fields
//! take their defaults. A few settings can be overridden from the
//! environment.

use crate::error::DlpoolError;
use dlpool_types::EngineConfig;
use reqwest::Method;
use std::path::Path;
use tracing::debug;

pub const ENV_POOL_SIZE: &str = "DLPOOL_POOL_SIZE";
pub const ENV_BUFFER_SIZE: &str = "DLPOOL_BUFFER_SIZE";
pub const ENV_PROXY: &str = "DLPOOL_PROXY";

/// Load and validate a configuration file
pub fn load_config(path: &Path) -> Result<EngineConfig, DlpoolError> {
    debug!("Loading configuration from {}", path.display());
    let data = std::fs::read_to_string(path)?;
    let config: EngineConfig = serde_json::from_str(&data)?;
    validate(&config)?;
    Ok(config)
}

/// Write a configuration file as pretty JSON
pub fn save_config(config: &EngineConfig, path: &Path) -> Result<(), DlpoolError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Apply `DLPOOL_*` environment overrides
pub fn apply_env(config: &mut EngineConfig) -> Result<(), DlpoolError> {
    apply_overrides(config, |key| std::env::var(key).ok())
}

fn apply_overrides(
    config: &mut EngineConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), DlpoolError> {
    if let Some(value) = lookup(ENV_POOL_SIZE) {
        config.pool_size = parse_size(ENV_POOL_SIZE, &value)?;
    }
    if let Some(value) = lookup(ENV_BUFFER_SIZE) {
        config.buffer_size = parse_size(ENV_BUFFER_SIZE, &value)?;
    }
    if let Some(value) = lookup(ENV_PROXY) {
        config.proxy = (!value.is_empty()).then_some(value);
    }
    Ok(())
}

fn parse_size(key: &str, value: &str) -> Result<usize, DlpoolError> {
    value
        .trim()
        .parse()
        .map_err(|_| DlpoolError::Config(format!("{} must be a positive integer, got {:?}", key, value)))
}

/// Reject configurations the engine cannot run with
pub fn validate(config: &EngineConfig) -> Result<(), DlpoolError> {
    if config.pool_size == 0 {
        return Err(DlpoolError::Config("pool_size must be at least 1".into()));
    }
    if config.buffer_size == 0 {
        return Err(DlpoolError::Config("buffer_size must be at least 1".into()));
    }
    if Method::from_bytes(config.request_method.to_uppercase().as_bytes()).is_err() {
        return Err(DlpoolError::Config(format!(
            "Invalid request method: {}",
            config.request_method
        )));
    }
    Ok(())
}
