use anyhow::{Context, Result};
use caseshard::{Phase, PipelineSummary};
use caseshard_config::{PartialPolicy, RuntimeConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Reduce an oversized service-request extract to a year-filtered analytic table
#[derive(Parser)]
#[command(name = "caseshard")]
#[command(version)]
#[command(about = "Reduce an oversized service-request extract to a year-filtered analytic table", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Source extract (overrides config file)
    #[arg(long, value_name = "FILE", global = true)]
    source: Option<PathBuf>,

    /// Directory holding the per-year shards
    #[arg(long, value_name = "DIR", global = true)]
    shard_root: Option<PathBuf>,

    /// Combined table written by the combine phase
    #[arg(long, value_name = "FILE", global = true)]
    combined: Option<PathBuf>,

    /// Final analytic table written by the derive phase
    #[arg(short, long, value_name = "FILE", global = true)]
    output: Option<PathBuf>,

    /// First year kept by the combine phase (inclusive)
    #[arg(long, value_name = "YEAR", global = true)]
    start_year: Option<i32>,

    /// Last year kept by the combine phase (inclusive)
    #[arg(long, value_name = "YEAR", global = true)]
    end_year: Option<i32>,

    /// Maximum source rows held in memory while partitioning
    #[arg(long, value_name = "N", global = true)]
    chunk_rows: Option<usize>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Run the next phase even when the previous one was partial
    #[arg(long, global = true)]
    continue_on_partial: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Split the source extract into per-year shards
    Partition,
    /// Fold the configured years' shards into the combined table
    Combine,
    /// Derive durations and calendar labels into the final table
    Derive,
    /// Run partition, combine and derive in order (default if no subcommand given)
    Run,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Step 1: Resolve file and environment layers
    let mut config = RuntimeConfig::resolve(cli.config.as_deref()).with_context(|| match &cli.config {
        Some(path) => format!("Failed to load config from {}", path.display()),
        None => "Failed to load configuration".to_string(),
    })?;

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, &cli);

    // Step 3: Initialize tracing so validation warnings are visible
    caseshard::init_tracing(&config.logging);

    // Step 4: Validate the fully resolved configuration once
    config.validate().context("Invalid configuration")?;

    // Step 5: Display startup info
    let command = cli.command.unwrap_or(Commands::Run);
    display_startup_info(&config, command);

    // Step 6: Run
    let summary = match command {
        Commands::Partition => caseshard::run_phase(&config, Phase::Partition),
        Commands::Combine => caseshard::run_phase(&config, Phase::Combine),
        Commands::Derive => caseshard::run_phase(&config, Phase::Derive),
        Commands::Run => caseshard::run_pipeline(&config)?,
    };

    report(&summary)
}

fn apply_cli_overrides(config: &mut RuntimeConfig, cli: &Cli) {
    if let Some(source) = &cli.source {
        config.paths.source = source.clone();
    }
    if let Some(shard_root) = &cli.shard_root {
        config.paths.shard_root = shard_root.clone();
    }
    if let Some(combined) = &cli.combined {
        config.paths.combined = combined.clone();
    }
    if let Some(output) = &cli.output {
        config.paths.final_output = output.clone();
    }
    if let Some(year) = cli.start_year {
        config.combine.start_year = year;
    }
    if let Some(year) = cli.end_year {
        config.combine.end_year = year;
    }
    if let Some(rows) = cli.chunk_rows {
        config.partition.chunk_rows = rows;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.continue_on_partial {
        config.pipeline.on_partial = PartialPolicy::Continue;
    }
}

fn display_startup_info(config: &RuntimeConfig, command: Commands) {
    use tracing::info;

    let phases = match command {
        Commands::Partition => "partition",
        Commands::Combine => "combine",
        Commands::Derive => "derive",
        Commands::Run => "partition → combine → derive",
    };

    info!("╭─────────────────────────────────────────────────");
    info!("│ caseshard v{}", env!("CARGO_PKG_VERSION"));
    info!("├─────────────────────────────────────────────────");
    info!("│ Phases: {}", phases);
    info!("│ Source: {}", config.paths.source.display());
    info!("│ Shard root: {}", config.paths.shard_root.display());
    info!("│ Combined: {}", config.paths.combined.display());
    info!("│ Final output: {}", config.paths.final_output.display());
    info!("│ Chunk rows: {}", config.partition.chunk_rows);
    info!(
        "│ Years: {}-{}",
        config.combine.start_year, config.combine.end_year
    );
    info!("│ Retained columns: {}", config.combine.columns.len());
    info!("│ On partial: {}", config.pipeline.on_partial);
    info!("│ Log level: {}", config.logging.level);
    info!("╰─────────────────────────────────────────────────");
}

fn report(summary: &PipelineSummary) -> Result<()> {
    if let Some(path) = &summary.omissions_file {
        eprintln!(
            "warning: final table is incomplete; see {}",
            path.display()
        );
    }

    match summary.halted_at {
        None => Ok(()),
        Some(phase) => anyhow::bail!(
            "{} phase did not complete: {}",
            phase,
            summary.last_error().unwrap_or("unknown error")
        ),
    }
}
