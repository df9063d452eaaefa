use super::{LogFormat, PartialPolicy, RuntimeConfig};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "CASESHARD_";

/// Abstraction over environment-variable lookups so tests can supply
/// overrides without touching the process environment.
pub trait EnvSource {
    /// Get a variable by its key WITHOUT the CASESHARD_ prefix.
    fn get(&self, key: &str) -> Option<String>;
}

impl EnvSource for std::collections::HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        std::collections::HashMap::get(self, key).cloned()
    }
}

/// Apply environment-variable overrides (highest priority below CLI flags).
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Paths
    if let Some(path) = get_env_path(env, "SOURCE") {
        config.paths.source = path;
    }
    if let Some(path) = get_env_path(env, "SHARD_ROOT") {
        config.paths.shard_root = path;
    }
    if let Some(path) = get_env_path(env, "COMBINED") {
        config.paths.combined = path;
    }
    if let Some(path) = get_env_path(env, "FINAL_OUTPUT") {
        config.paths.final_output = path;
    }

    // Partition
    if let Some(val) = get_env_parsed::<usize, E>(env, "CHUNK_ROWS")? {
        config.partition.chunk_rows = val;
    }

    // Combine
    if let Some(val) = get_env_parsed::<i32, E>(env, "START_YEAR")? {
        config.combine.start_year = val;
    }
    if let Some(val) = get_env_parsed::<i32, E>(env, "END_YEAR")? {
        config.combine.end_year = val;
    }
    if let Some(columns) = env.get("COLUMNS") {
        config.combine.columns = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
    }

    // Pipeline
    if let Some(policy) = env.get("ON_PARTIAL") {
        config.pipeline.on_partial = policy
            .parse::<PartialPolicy>()
            .context("Invalid CASESHARD_ON_PARTIAL value")?;
    }

    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.logging.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    Ok(())
}

fn get_env_path<E: EnvSource>(env: &E, key: &str) -> Option<PathBuf> {
    env.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn get_env_parsed<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    E: EnvSource,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .trim()
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
