//! Config loader — reads `~/.pulsar/config.json` and merges env vars.
//!
//! # Loading precedence
//! 1. Defaults (from `Config::default()`)
//! 2. JSON file at `~/.pulsar/config.json` (or an explicit path)
//! 3. Environment variables `PULSAR_<SECTION>__<FIELD>` (override JSON)

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::schema::Config;

/// Default config file path.
pub fn get_config_path() -> PathBuf {
    crate::utils::get_home_path().join("config.json")
}

/// Load configuration from the given path (or the default one) + env vars.
///
/// Falls back to `Config::default()` if the file doesn't exist or can't be parsed.
pub fn load_config(path: Option<&Path>) -> Config {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    load_config_from_path(&config_path)
}

fn load_config_from_path(path: &Path) -> Config {
    if !path.exists() {
        info!("No config file found at {}, using defaults", path.display());
        return apply_env_overrides(Config::default());
    }

    debug!("Loading config from {}", path.display());

    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read config file {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    let config: Config = match serde_json::from_str(&content) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to parse config {}: {}", path.display(), e);
            return apply_env_overrides(Config::default());
        }
    };

    apply_env_overrides(config)
}

/// Save configuration to disk (pretty-printed JSON with camelCase keys).
pub fn save_config(config: &Config, path: Option<&Path>) -> std::io::Result<()> {
    let config_path = path.map(PathBuf::from).unwrap_or_else(get_config_path);

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config).map_err(std::io::Error::other)?;

    std::fs::write(&config_path, json)?;
    debug!("Config saved to {}", config_path.display());
    Ok(())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// Supported overrides:
/// - `PULSAR_PROVIDER__NAME` → `provider.name`
/// - `PULSAR_PROVIDER__MODEL` → `provider.model`
/// - `PULSAR_PROVIDER__API_KEY` → `provider.api_key`
/// - `PULSAR_PROVIDER__API_BASE` → `provider.api_base`
/// - `PULSAR_MAX_ITERS` → `max_iters`
/// - `PULSAR_SESSION` → `session`
fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(val) = std::env::var("PULSAR_PROVIDER__NAME") {
        config.provider.name = val;
    }
    if let Ok(val) = std::env::var("PULSAR_PROVIDER__MODEL") {
        config.provider.model = val;
    }
    if let Ok(val) = std::env::var("PULSAR_PROVIDER__API_KEY") {
        config.provider.api_key = val;
    }
    if let Ok(val) = std::env::var("PULSAR_PROVIDER__API_BASE") {
        config.provider.api_base = Some(val);
    }
    if let Ok(val) = std::env::var("PULSAR_MAX_ITERS") {
        match val.parse::<usize>() {
            Ok(n) if n > 0 => config.max_iters = n,
            _ => warn!("Ignoring invalid PULSAR_MAX_ITERS={}", val),
        }
    }
    if let Ok(val) = std::env::var("PULSAR_SESSION") {
        config.session = val;
    }

    config
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
