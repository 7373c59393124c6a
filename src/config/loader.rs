//! Configuration loading from the file system

use std::path::Path;
use tracing::{info, instrument, warn};

use super::defaults::DEFAULT_CONFIG_PATH;
use super::types::{expand_path, Config};

/// Load configuration from `path`, or ~/.exec-bridge/config.json when None.
///
/// Returns Config::default() if the file is missing or malformed.
#[instrument(name = "load_config")]
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = match path {
        Some(p) => expand_path(&p.to_string_lossy()),
        None => expand_path(DEFAULT_CONFIG_PATH),
    };

    if !config_path.exists() {
        info!(path = %config_path.display(), "Config file not found, using defaults");
        return Config::default();
    }

    let raw = match std::fs::read_to_string(&config_path) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, path = %config_path.display(), "Failed to read config, using defaults");
            return Config::default();
        }
    };

    match serde_json::from_str::<Config>(&raw) {
        Ok(config) => {
            info!(path = %config_path.display(), "Successfully loaded config");
            config
        }
        Err(e) => {
            let hint = if e.to_string().contains("missing field `endpoint`") {
                "aiResolver requires an 'endpoint' URL, e.g. {\"aiResolver\": {\"endpoint\": \"https://host/api\"}}"
            } else {
                ""
            };
            warn!(
                error = %e,
                path = %config_path.display(),
                hint = %hint,
                "Failed to parse config JSON, using defaults"
            );
            Config::default()
        }
    }
}
