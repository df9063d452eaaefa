//! Shard manifest: the record of which shard files the last partition run owns.
//!
//! Stored as `<shard_root>/_manifest.json` and rewritten after every chunk, so
//! a rerun can remove exactly the shards an earlier run (complete or not)
//! left behind.

use crate::error::{PipelineError, Result};
use crate::table::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const MANIFEST_FILE: &str = "_manifest.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardManifest {
    /// Source extract the shards were cut from
    pub source: String,
    pub chunk_rows: usize,
    /// True once every chunk of the source has been written
    pub complete: bool,
    pub shards: Vec<ShardEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardEntry {
    pub year: i32,
    /// Path relative to the shard root, `/`-separated
    pub path: String,
    pub rows: usize,
    pub chunk: usize,
}

impl ShardEntry {
    pub fn absolute(&self, shard_root: &Path) -> PathBuf {
        self.path
            .split('/')
            .fold(shard_root.to_path_buf(), |acc, part| acc.join(part))
    }
}

impl ShardManifest {
    pub fn path(shard_root: &Path) -> PathBuf {
        shard_root.join(MANIFEST_FILE)
    }

    /// Load the manifest under `shard_root`, if one exists.
    pub fn load(shard_root: &Path) -> Result<Option<Self>> {
        let path = Self::path(shard_root);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PipelineError::io(&path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| PipelineError::manifest(&path, "parsed", e))
    }

    pub fn store(&self, shard_root: &Path) -> Result<()> {
        let path = Self::path(shard_root);
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| PipelineError::manifest(&path, "encoded", e))?;
        write_atomic(&path, &bytes)
    }

    /// Delete every shard file this manifest lists. Already-missing files are
    /// skipped. Returns how many files were removed.
    pub fn remove_listed_shards(&self, shard_root: &Path) -> Result<usize> {
        let mut removed = 0;
        for entry in &self.shards {
            let path = entry.absolute(shard_root);
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed stale shard");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(PipelineError::io(&path, e)),
            }
        }
        Ok(removed)
    }
}
