//! Error types for the caseshard pipeline stages

use arrow::error::ArrowError;
use std::path::Path;
use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// E001: Filesystem operation failed
    E001Io,
    /// E002: CSV could not be read or written
    E002Csv,
    /// E003: Timestamp did not match the required format
    E003TimestampParse,
    /// E004: Required column missing from a file
    E004Schema,
    /// E005: Shard manifest unreadable or unwritable
    E005Manifest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::E001Io => "E001",
            Self::E002Csv => "E002",
            Self::E003TimestampParse => "E003",
            Self::E004Schema => "E004",
            Self::E005Manifest => "E005",
        }
    }
}

/// Errors that can occur while partitioning, combining or deriving
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("[{code}] I/O failure on '{path}': {source}")]
    Io {
        code: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("[{code}] CSV failure in '{path}' while {action}: {source}")]
    Csv {
        code: &'static str,
        path: String,
        action: String,
        source: ArrowError,
    },

    /// Strict timestamp parse failure, located by chunk and 1-based data row
    #[error("[{code}] Unparsable {column} value '{value}' in '{path}' (chunk {chunk}, row {row}); expected format '{expected}'")]
    TimestampParse {
        code: &'static str,
        path: String,
        chunk: usize,
        row: usize,
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error("[{code}] Column '{column}' is missing from '{path}'")]
    Schema {
        code: &'static str,
        path: String,
        column: String,
    },

    #[error("[{code}] Shard manifest '{path}' could not be {action}: {source}")]
    Manifest {
        code: &'static str,
        path: String,
        action: &'static str,
        source: serde_json::Error,
    },
}

impl PipelineError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            code: ErrorCode::E001Io.as_str(),
            path: path.display().to_string(),
            source,
        }
    }

    pub fn csv(path: &Path, action: impl Into<String>, source: ArrowError) -> Self {
        Self::Csv {
            code: ErrorCode::E002Csv.as_str(),
            path: path.display().to_string(),
            action: action.into(),
            source,
        }
    }

    pub fn timestamp(
        path: &Path,
        chunk: usize,
        row: usize,
        column: &str,
        err: crate::timestamp::TimestampError,
    ) -> Self {
        Self::TimestampParse {
            code: ErrorCode::E003TimestampParse.as_str(),
            path: path.display().to_string(),
            chunk,
            row,
            column: column.to_string(),
            value: err.value,
            expected: err.expected,
        }
    }

    pub fn schema(path: &Path, column: &str) -> Self {
        Self::Schema {
            code: ErrorCode::E004Schema.as_str(),
            path: path.display().to_string(),
            column: column.to_string(),
        }
    }

    pub fn manifest(path: &Path, action: &'static str, source: serde_json::Error) -> Self {
        Self::Manifest {
            code: ErrorCode::E005Manifest.as_str(),
            path: path.display().to_string(),
            action,
            source,
        }
    }

    /// Stable error code, e.g. `"E003"`
    pub fn code(&self) -> &'static str {
        match self {
            Self::Io { code, .. }
            | Self::Csv { code, .. }
            | Self::TimestampParse { code, .. }
            | Self::Schema { code, .. }
            | Self::Manifest { code, .. } => code,
        }
    }
}

/// Result type alias for PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;
