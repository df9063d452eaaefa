// Configuration source loading.
//
// Priority order:
// 1. Environment variables (CASESHARD_* prefix)
// 2. Config file path from CASESHARD_CONFIG
// 3. Default config file (./caseshard.toml)
// 4. Built-in defaults

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::RuntimeConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_FILE: &str = "./caseshard.toml";

/// Load configuration using native environment/file access.
/// Missing config files are not an error; defaults are used instead.
pub fn load_config() -> Result<RuntimeConfig> {
    let config = resolve_config(None)?;
    config.validate()?;
    Ok(config)
}

fn load_from_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var(format!("{}CONFIG", ENV_PREFIX)) {
        return read_config_file(Path::new(&path)).map(Some);
    }

    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.exists() {
        return read_config_file(default_path).map(Some);
    }

    Ok(None)
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Returns error if file doesn't exist or can't be parsed.
pub fn load_from_file_path(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
    let config = resolve_config(Some(path.as_ref()))?;
    config.validate()?;
    Ok(config)
}

/// Layer the config file and environment overrides without validating.
///
/// Callers that apply further overrides (CLI flags) validate afterwards.
pub fn resolve_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => load_from_file()?.unwrap_or_default(),
    };

    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    Ok(config)
}

fn read_config_file(path: &Path) -> Result<RuntimeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}
