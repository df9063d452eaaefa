// caseshard-config - Configuration for the caseshard pipeline
//
// Supports configuration from multiple sources:
// 1. Environment variables (highest priority)
// 2. Config file path from CASESHARD_CONFIG env var
// 3. Default config file location (./caseshard.toml)
// 4. Built-in defaults (lowest priority)
//
// Command-line overrides are applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod env_overrides;
mod sources;
mod validation;

pub use env_overrides::{EnvSource, ENV_PREFIX};

/// Columns kept through the combine stage, in output order.
pub const DEFAULT_COLUMNS: [&str; 15] = [
    "CaseID",
    "Opened",
    "Closed",
    "Updated",
    "Status",
    "Status Notes",
    "Responsible Agency",
    "Category",
    "Request Type",
    "Request Details",
    "Neighborhood",
    "Latitude",
    "Longitude",
    "Point",
    "Source",
];

/// Main runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub partition: PartitionConfig,

    #[serde(default)]
    pub combine: CombineConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Input and output locations for every stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub source: PathBuf,
    pub shard_root: PathBuf,
    pub combined: PathBuf,
    pub final_output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("311_cases.csv"),
            shard_root: PathBuf::from("311_cases_year"),
            combined: PathBuf::from("311_cases_subset.csv"),
            final_output: PathBuf::from("311_cases_subset_cleaned.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub chunk_rows: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { chunk_rows: 10_000 }
    }
}

/// Year range and column projection for the combine stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CombineConfig {
    pub start_year: i32,
    pub end_year: i32,
    pub columns: Vec<String>,
}

fn default_columns() -> Vec<String> {
    DEFAULT_COLUMNS.iter().map(|c| c.to_string()).collect()
}

impl CombineConfig {
    /// Inclusive, ascending list of years to combine.
    pub fn years(&self) -> Vec<i32> {
        (self.start_year..=self.end_year).collect()
    }
}

impl Default for CombineConfig {
    fn default() -> Self {
        Self {
            start_year: 2020,
            end_year: 2022,
            columns: default_columns(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub on_partial: PartialPolicy,
}

/// What the driver does when a phase finishes with a partial result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialPolicy {
    #[default]
    Halt,
    Continue,
}

impl std::fmt::Display for PartialPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartialPolicy::Halt => write!(f, "halt"),
            PartialPolicy::Continue => write!(f, "continue"),
        }
    }
}

impl std::str::FromStr for PartialPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "halt" | "stop" => Ok(PartialPolicy::Halt),
            "continue" => Ok(PartialPolicy::Continue),
            _ => anyhow::bail!("Unsupported partial policy: {}. Supported: halt, continue", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            partition: PartitionConfig::default(),
            combine: CombineConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from all sources with priority
    pub fn load() -> Result<Self> {
        sources::load_config()
    }

    /// Load configuration from a specific file path (for CLI usage).
    pub fn load_from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        sources::load_from_file_path(path)
    }

    /// Layer file and environment sources without validating; the caller
    /// applies its own overrides and then calls [`RuntimeConfig::validate`].
    pub fn resolve(path: Option<&std::path::Path>) -> Result<Self> {
        sources::resolve_config(path)
    }

    /// Parse a TOML document on top of the built-in defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RuntimeConfig =
            toml::from_str(content).context("Failed to parse config content")?;
        Ok(config)
    }

    /// Apply environment overrides from a custom source.
    pub fn apply_env_overrides_from<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        env_overrides::apply_env_overrides(self, env)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        validation::validate_config(self)
    }
}
