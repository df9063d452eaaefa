//! Tagged per-phase results threaded through the pipeline driver.

use crate::error::PipelineError;
use serde::Serialize;

/// Result of running one pipeline phase.
///
/// `Partial` means the phase stopped on an error after it had already
/// persisted a well-formed prefix of its output; `report` describes that
/// prefix. `Fatal` means nothing usable was produced.
#[derive(Debug)]
pub enum PhaseOutcome<T> {
    Complete(T),
    Partial { report: T, error: PipelineError },
    Fatal(PipelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Complete,
    Partial,
    Fatal,
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Complete => write!(f, "complete"),
            PhaseStatus::Partial => write!(f, "partial"),
            PhaseStatus::Fatal => write!(f, "fatal"),
        }
    }
}

/// Implemented by each phase's report so a partial run can say what it left out.
pub trait PhaseReport {
    /// Phase name used in logs and omission records.
    const PHASE: &'static str;

    /// Human-readable description of the input this (partial) run did not cover.
    fn omitted(&self) -> String;
}

/// Entry in the omissions record written next to a partial final output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Omission {
    pub phase: &'static str,
    pub omitted: String,
    pub cause: String,
    pub error_code: &'static str,
}

impl<T> PhaseOutcome<T> {
    /// Build an outcome from an error, partial if `report` shows persisted progress.
    pub fn from_error(report: T, error: PipelineError, has_progress: bool) -> Self {
        if has_progress {
            PhaseOutcome::Partial { report, error }
        } else {
            PhaseOutcome::Fatal(error)
        }
    }

    pub fn status(&self) -> PhaseStatus {
        match self {
            PhaseOutcome::Complete(_) => PhaseStatus::Complete,
            PhaseOutcome::Partial { .. } => PhaseStatus::Partial,
            PhaseOutcome::Fatal(_) => PhaseStatus::Fatal,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, PhaseOutcome::Complete(_))
    }

    pub fn report(&self) -> Option<&T> {
        match self {
            PhaseOutcome::Complete(report) | PhaseOutcome::Partial { report, .. } => Some(report),
            PhaseOutcome::Fatal(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            PhaseOutcome::Complete(_) => None,
            PhaseOutcome::Partial { error, .. } | PhaseOutcome::Fatal(error) => Some(error),
        }
    }

    /// Collapse to a plain result; a partial outcome counts as an error.
    pub fn into_result(self) -> Result<T, PipelineError> {
        match self {
            PhaseOutcome::Complete(report) => Ok(report),
            PhaseOutcome::Partial { error, .. } | PhaseOutcome::Fatal(error) => Err(error),
        }
    }
}

impl<T: PhaseReport> PhaseOutcome<T> {
    /// Omission entry for a partial outcome; `None` otherwise.
    pub fn omission(&self) -> Option<Omission> {
        match self {
            PhaseOutcome::Partial { report, error } => Some(Omission {
                phase: T::PHASE,
                omitted: report.omitted(),
                cause: error.to_string(),
                error_code: error.code(),
            }),
            _ => None,
        }
    }
}
