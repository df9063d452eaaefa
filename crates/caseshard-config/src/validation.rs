// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use std::collections::HashSet;
use tracing::warn;

/// Columns the metric stage reads; they must survive the projection.
const TIMESTAMP_COLUMNS: [&str; 3] = ["Opened", "Closed", "Updated"];

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_paths_config(&config.paths)?;
    validate_partition_config(&config.partition)?;
    validate_combine_config(&config.combine)?;
    Ok(())
}

fn validate_paths_config(config: &PathsConfig) -> Result<()> {
    let entries = [
        ("paths.source", &config.source),
        ("paths.shard_root", &config.shard_root),
        ("paths.combined", &config.combined),
        ("paths.final_output", &config.final_output),
    ];
    for (name, path) in entries {
        if path.as_os_str().is_empty() {
            bail!("{} must not be empty", name);
        }
    }

    if config.combined == config.final_output {
        bail!("paths.combined and paths.final_output must differ");
    }

    Ok(())
}

fn validate_partition_config(config: &PartitionConfig) -> Result<()> {
    if config.chunk_rows == 0 {
        bail!("partition.chunk_rows must be greater than 0");
    }

    if config.chunk_rows > 5_000_000 {
        warn!(
            chunk_rows = config.chunk_rows,
            "partition.chunk_rows is very large; may cause memory issues"
        );
    }

    Ok(())
}

fn validate_combine_config(config: &CombineConfig) -> Result<()> {
    if config.start_year > config.end_year {
        bail!(
            "combine.start_year ({}) must not be after combine.end_year ({})",
            config.start_year,
            config.end_year
        );
    }

    if config.columns.is_empty() {
        bail!("combine.columns must not be empty");
    }

    let mut seen = HashSet::new();
    for column in &config.columns {
        if !seen.insert(column.as_str()) {
            bail!("combine.columns lists '{}' more than once", column);
        }
    }

    for required in TIMESTAMP_COLUMNS {
        if !seen.contains(required) {
            bail!("combine.columns must include '{}'", required);
        }
    }

    Ok(())
}
