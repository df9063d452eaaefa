// caseshard-core - Batch reduction of oversized service-request extracts
//
// Three stages, each a complete pass that communicates only through files:
//
//   source extract ──YearPartitioner──▶ <shard_root>/<year>/*.csv
//                  ──ShardCombiner────▶ combined table (retained columns)
//                  ──MetricDeriver────▶ final analytic table
//
// Every stage returns a PhaseOutcome so the caller decides whether a
// partial result is acceptable input for the next stage.

pub mod combine;
pub mod error;
pub mod manifest;
pub mod metrics;
pub mod outcome;
pub mod partition;
pub mod table;
pub mod timestamp;

// Re-export commonly used types
pub use combine::{CombineReport, ShardCombiner};
pub use error::{ErrorCode, PipelineError, Result};
pub use manifest::{ShardEntry, ShardManifest};
pub use metrics::{DeriveReport, MetricDeriver};
pub use outcome::{Omission, PhaseOutcome, PhaseReport, PhaseStatus};
pub use partition::{PartitionReport, YearPartitioner, DEFAULT_CHUNK_ROWS};
pub use timestamp::{normalize, TimestampError, TimestampPolicy};
