// caseshard - pipeline driver and process setup
//
// Runs the three reduction phases against a resolved RuntimeConfig and
// decides, from each phase's outcome, whether the next phase may run.

use anyhow::{Context, Result};
use caseshard_config::{LogFormat, LoggingConfig, PartialPolicy, RuntimeConfig};
use caseshard_core::table::write_atomic;
use caseshard_core::{
    MetricDeriver, Omission, PhaseOutcome, PhaseReport, PhaseStatus, ShardCombiner,
    YearPartitioner,
};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Suffix appended to the final output's file name for the omissions record.
pub const OMISSIONS_SUFFIX: &str = ".omissions.json";

/// Initialize tracing/logging from the logging section of the config
pub fn init_tracing(config: &LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Partition,
    Combine,
    Derive,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Partition, Phase::Combine, Phase::Derive];

    pub fn name(self) -> &'static str {
        match self {
            Phase::Partition => "partition",
            Phase::Combine => "combine",
            Phase::Derive => "derive",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseSummary {
    pub phase: &'static str,
    pub status: PhaseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u128,
}

/// What a driver invocation did, phase by phase.
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub phases: Vec<PhaseSummary>,
    pub omissions: Vec<Omission>,
    /// Phase whose outcome stopped the run, if any
    pub halted_at: Option<Phase>,
    /// Omissions record written next to the final output
    pub omissions_file: Option<PathBuf>,
}

impl PipelineSummary {
    pub fn succeeded(&self) -> bool {
        self.halted_at.is_none()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.phases.iter().rev().find_map(|p| p.error.as_deref())
    }

    /// Record an outcome; returns whether the next phase may run.
    fn record<T: PhaseReport>(
        &mut self,
        phase: Phase,
        outcome: PhaseOutcome<T>,
        policy: PartialPolicy,
        started: Instant,
    ) -> bool {
        let status = outcome.status();
        self.phases.push(PhaseSummary {
            phase: phase.name(),
            status,
            error: outcome.error().map(ToString::to_string),
            elapsed_ms: started.elapsed().as_millis(),
        });

        match status {
            PhaseStatus::Complete => true,
            PhaseStatus::Fatal => {
                self.halted_at = Some(phase);
                false
            }
            PhaseStatus::Partial => {
                self.omissions.extend(outcome.omission());
                match policy {
                    PartialPolicy::Continue => {
                        warn!(phase = %phase, "Continuing with partial input");
                        true
                    }
                    PartialPolicy::Halt => {
                        self.halted_at = Some(phase);
                        false
                    }
                }
            }
        }
    }
}

/// Run partition, combine and derive in order.
///
/// A fatal phase always stops the run; a partial one stops it unless the
/// config says to continue. When the final table is produced, its omissions
/// record is written if any phase was partial and removed otherwise.
pub fn run_pipeline(config: &RuntimeConfig) -> Result<PipelineSummary> {
    let mut summary = run_phases(config, &Phase::ALL);

    let derived = summary
        .phases
        .iter()
        .any(|p| p.phase == Phase::Derive.name() && p.status == PhaseStatus::Complete);
    if derived {
        let path = omissions_path(&config.paths.final_output);
        if summary.omissions.is_empty() {
            remove_stale_omissions(&path)?;
        } else {
            write_omissions(&path, &config.paths.final_output, &summary.omissions)?;
            warn!(
                path = %path.display(),
                omissions = summary.omissions.len(),
                "Final table is incomplete; omissions recorded"
            );
            summary.omissions_file = Some(path);
        }
    }

    Ok(summary)
}

/// Run a single phase on its own.
pub fn run_phase(config: &RuntimeConfig, phase: Phase) -> PipelineSummary {
    run_phases(config, &[phase])
}

fn run_phases(config: &RuntimeConfig, phases: &[Phase]) -> PipelineSummary {
    let policy = config.pipeline.on_partial;
    let mut summary = PipelineSummary::default();

    for &phase in phases {
        let started = Instant::now();
        let proceed = match phase {
            Phase::Partition => {
                let outcome = YearPartitioner::new(
                    &config.paths.source,
                    &config.paths.shard_root,
                    config.partition.chunk_rows,
                )
                .run();
                summary.record(phase, outcome, policy, started)
            }
            Phase::Combine => {
                let outcome = ShardCombiner::new(
                    &config.paths.shard_root,
                    config.combine.years(),
                    config.combine.columns.clone(),
                    &config.paths.combined,
                )
                .run();
                summary.record(phase, outcome, policy, started)
            }
            Phase::Derive => {
                let outcome =
                    MetricDeriver::new(&config.paths.combined, &config.paths.final_output).run();
                summary.record(phase, outcome, policy, started)
            }
        };

        if !proceed {
            break;
        }
    }

    for p in &summary.phases {
        info!(phase = p.phase, status = %p.status, elapsed_ms = p.elapsed_ms as u64, "Phase finished");
    }
    summary
}

/// `<final file name>.omissions.json` beside the final output.
pub fn omissions_path(final_output: &Path) -> PathBuf {
    let mut name = final_output.as_os_str().to_owned();
    name.push(OMISSIONS_SUFFIX);
    PathBuf::from(name)
}

#[derive(Serialize)]
struct OmissionsRecord<'a> {
    final_output: String,
    omissions: &'a [Omission],
}

fn write_omissions(path: &Path, final_output: &Path, omissions: &[Omission]) -> Result<()> {
    let record = OmissionsRecord {
        final_output: final_output.display().to_string(),
        omissions,
    };
    let bytes = serde_json::to_vec_pretty(&record).context("Failed to encode omissions record")?;
    write_atomic(path, &bytes)
        .with_context(|| format!("Failed to write omissions record: {}", path.display()))
}

fn remove_stale_omissions(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            info!(path = %path.display(), "Removed stale omissions record");
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e)
            .with_context(|| format!("Failed to remove stale omissions record: {}", path.display())),
    }
}
