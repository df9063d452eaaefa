//! Year partitioning of the raw extract under a bounded chunk size.
//!
//! Layout: `<shard_root>/<year>/part-<chunk>-<blake3 prefix>.csv`
//!
//! The source is streamed `chunk_rows` rows at a time. Each chunk's
//! lifecycle timestamps are parsed strictly and rewritten in canonical form,
//! then the chunk is split by Opened year and each group becomes one shard.
//! Shard names depend only on the chunk index and the shard's bytes, never on
//! row counts, and the manifest lets a rerun clear the previous run's shards.

use crate::error::{PipelineError, Result};
use crate::manifest::{ShardEntry, ShardManifest};
use crate::outcome::{PhaseOutcome, PhaseReport};
use crate::table::{encode_batch, open_reader, read_header_schema, resolve_columns, write_atomic};
use crate::timestamp::{
    normalize, to_canonical, TimestampError, TimestampPolicy, OPENED, STRICT_FORMAT,
    TIMESTAMP_COLUMNS,
};
use arrow::array::{Array, ArrayRef, AsArray, BooleanArray, RecordBatch, StringArray};
use arrow::compute::filter_record_batch;
use chrono::Datelike;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const DEFAULT_CHUNK_ROWS: usize = 10_000;

/// Splits a source extract into per-year shard files.
#[derive(Debug, Clone)]
pub struct YearPartitioner {
    source: PathBuf,
    shard_root: PathBuf,
    chunk_rows: usize,
}

/// What a partition run wrote. On a partial run this covers the chunks
/// that were fully written before the error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionReport {
    pub chunks: usize,
    pub rows: usize,
    pub rows_by_year: BTreeMap<i32, usize>,
    pub shards: Vec<ShardEntry>,
    pub stale_shards_removed: usize,
}

impl PhaseReport for PartitionReport {
    const PHASE: &'static str = "partition";

    fn omitted(&self) -> String {
        format!(
            "source rows after row {} (chunk {} onward) were not partitioned",
            self.rows, self.chunks
        )
    }
}

impl YearPartitioner {
    pub fn new(source: impl Into<PathBuf>, shard_root: impl Into<PathBuf>, chunk_rows: usize) -> Self {
        Self {
            source: source.into(),
            shard_root: shard_root.into(),
            chunk_rows: chunk_rows.max(1),
        }
    }

    pub fn run(&self) -> PhaseOutcome<PartitionReport> {
        info!(
            source = %self.source.display(),
            shard_root = %self.shard_root.display(),
            chunk_rows = self.chunk_rows,
            "Partitioning source by opened year"
        );

        let mut report = PartitionReport::default();
        match self.partition_into(&mut report) {
            Ok(()) => {
                info!(
                    chunks = report.chunks,
                    rows = report.rows,
                    shards = report.shards.len(),
                    years = ?report.rows_by_year.keys().collect::<Vec<_>>(),
                    "Partition complete"
                );
                PhaseOutcome::Complete(report)
            }
            Err(err) => {
                let has_progress = report.chunks > 0;
                if has_progress {
                    warn!(
                        chunks = report.chunks,
                        rows = report.rows,
                        error = %err,
                        "Partition stopped; shards for earlier chunks remain"
                    );
                } else {
                    error!(error = %err, "Partition failed before any shard was written");
                }
                PhaseOutcome::from_error(report, err, has_progress)
            }
        }
    }

    fn partition_into(&self, report: &mut PartitionReport) -> Result<()> {
        // Nothing under the shard root is touched until the source opens and
        // its first chunk parses.
        let schema = read_header_schema(&self.source)?;
        let timestamp_indices = resolve_columns(&schema, &TIMESTAMP_COLUMNS, &self.source)?;
        let reader = open_reader(&self.source, schema, self.chunk_rows)?;

        let mut manifest: Option<ShardManifest> = None;

        for (chunk, batch) in reader.enumerate() {
            let batch = batch.map_err(|e| {
                PipelineError::csv(
                    &self.source,
                    format!("reading chunk {} (after row {})", chunk, report.rows),
                    e,
                )
            })?;

            let (normalized, years) =
                self.normalize_chunk(&batch, chunk, report.rows, &timestamp_indices)?;

            let current = match manifest.take() {
                Some(current) => current,
                None => self.begin_run(report)?,
            };
            let current = manifest.insert(current);
            let written = self.write_chunk(&normalized, &years, chunk, current)?;

            debug!(
                chunk,
                rows = batch.num_rows(),
                shards = written.len(),
                "Partitioned chunk"
            );

            report.chunks += 1;
            report.rows += batch.num_rows();
            for entry in &written {
                *report.rows_by_year.entry(entry.year).or_default() += entry.rows;
            }
            report.shards.extend(written);
        }

        // A header-only source still replaces the previous run.
        let mut manifest = match manifest {
            Some(manifest) => manifest,
            None => self.begin_run(report)?,
        };
        manifest.complete = true;
        manifest.store(&self.shard_root)
    }

    /// Clear the previous run's shards and store a fresh, empty manifest.
    fn begin_run(&self, report: &mut PartitionReport) -> Result<ShardManifest> {
        fs::create_dir_all(&self.shard_root).map_err(|e| PipelineError::io(&self.shard_root, e))?;

        if let Some(previous) = ShardManifest::load(&self.shard_root)? {
            report.stale_shards_removed = previous.remove_listed_shards(&self.shard_root)?;
            if report.stale_shards_removed > 0 {
                info!(
                    removed = report.stale_shards_removed,
                    previous_chunk_rows = previous.chunk_rows,
                    "Removed shards from previous partition run"
                );
            }
        }

        let manifest = ShardManifest {
            source: self.source.display().to_string(),
            chunk_rows: self.chunk_rows,
            complete: false,
            shards: Vec::new(),
        };
        manifest.store(&self.shard_root)?;
        Ok(manifest)
    }

    /// Strictly parse the lifecycle columns, rewrite them in canonical form
    /// and return the Opened year of every row.
    fn normalize_chunk(
        &self,
        batch: &RecordBatch,
        chunk: usize,
        rows_before: usize,
        timestamp_indices: &[usize],
    ) -> Result<(RecordBatch, Vec<i32>)> {
        let mut columns = batch.columns().to_vec();
        let mut years = Vec::with_capacity(batch.num_rows());

        for (&index, column) in timestamp_indices.iter().zip(TIMESTAMP_COLUMNS) {
            let values = batch.column(index).as_string::<i32>();
            let mut canonical = Vec::with_capacity(values.len());

            for (offset, value) in values.iter().enumerate() {
                let row = rows_before + offset + 1;
                let parsed = normalize(value, TimestampPolicy::Strict)
                    .map_err(|e| PipelineError::timestamp(&self.source, chunk, row, column, e))?;

                if column == OPENED {
                    // Rows are grouped by Opened, so it cannot be blank here.
                    let opened = parsed.ok_or_else(|| {
                        let blank = TimestampError {
                            value: String::new(),
                            expected: STRICT_FORMAT,
                        };
                        PipelineError::timestamp(&self.source, chunk, row, column, blank)
                    })?;
                    years.push(opened.year());
                }
                canonical.push(parsed.map(|ts| to_canonical(&ts)));
            }

            columns[index] = Arc::new(StringArray::from(canonical)) as ArrayRef;
        }

        let normalized = RecordBatch::try_new(batch.schema(), columns)
            .map_err(|e| PipelineError::csv(&self.source, format!("normalizing chunk {}", chunk), e))?;
        Ok((normalized, years))
    }

    /// Write one shard per year present in the chunk.
    ///
    /// The chunk's shards are recorded in the manifest before any file is
    /// written, so every shard on disk is listed even if the process dies
    /// mid-chunk. If a write fails, shards already written for this chunk
    /// are removed again so the shard root only ever holds whole chunks.
    fn write_chunk(
        &self,
        batch: &RecordBatch,
        years: &[i32],
        chunk: usize,
        manifest: &mut ShardManifest,
    ) -> Result<Vec<ShardEntry>> {
        let mut planned: Vec<(ShardEntry, Vec<u8>)> = Vec::new();
        for (year, mask) in year_masks(years) {
            let group = filter_record_batch(batch, &mask).map_err(|e| {
                PipelineError::csv(&self.source, format!("grouping chunk {} by year", chunk), e)
            })?;
            planned.push(self.plan_shard(&group, year, chunk)?);
        }

        manifest
            .shards
            .extend(planned.iter().map(|(entry, _)| entry.clone()));
        manifest.store(&self.shard_root)?;

        let mut written: Vec<ShardEntry> = Vec::with_capacity(planned.len());
        for (entry, bytes) in planned {
            if let Err(err) = write_atomic(&entry.absolute(&self.shard_root), &bytes) {
                for done in &written {
                    let _ = fs::remove_file(done.absolute(&self.shard_root));
                }
                return Err(err);
            }
            written.push(entry);
        }

        Ok(written)
    }

    /// Encode a year group and derive its shard entry from the bytes.
    fn plan_shard(&self, group: &RecordBatch, year: i32, chunk: usize) -> Result<(ShardEntry, Vec<u8>)> {
        let year_dir = self.shard_root.join(year.to_string());
        let bytes = encode_batch(group, &year_dir)?;
        let name = shard_file_name(chunk, &blake3::hash(&bytes));

        let entry = ShardEntry {
            year,
            path: format!("{}/{}", year, name),
            rows: group.num_rows(),
            chunk,
        };
        Ok((entry, bytes))
    }

    pub fn shard_root(&self) -> &Path {
        &self.shard_root
    }
}

/// `part-<chunk, 6 digits>-<first 16 hex chars of the content hash>.csv`
///
/// Zero-padded chunk indices keep lexicographic order equal to source order.
pub fn shard_file_name(chunk: usize, content_hash: &blake3::Hash) -> String {
    let hex = content_hash.to_hex();
    format!("part-{:06}-{}.csv", chunk, &hex.as_str()[..16])
}

/// One selection mask per distinct year, in ascending year order.
fn year_masks(years: &[i32]) -> BTreeMap<i32, BooleanArray> {
    let distinct: BTreeSet<i32> = years.iter().copied().collect();
    distinct
        .into_iter()
        .map(|year| {
            let mask: Vec<bool> = years.iter().map(|&y| y == year).collect();
            (year, BooleanArray::from(mask))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::test_util::read_rows;
    use tempfile::TempDir;

    const HEADER: &str = "CaseID,Opened,Closed,Updated,Status,Point";

    fn write_source(dir: &Path, rows: &[&str]) -> PathBuf {
        let path = dir.join("cases.csv");
        let mut content = format!("{}\n", HEADER);
        for row in rows {
            content.push_str(row);
            content.push('\n');
        }
        fs::write(&path, content).unwrap();
        path
    }

    fn mixed_rows() -> Vec<&'static str> {
        vec![
            "1,01/02/2020 08:00:00 AM,01/03/2020 08:00:00 AM,01/03/2020 09:00:00 AM,Closed,\"(37.7, -122.4)\"",
            "2,06/15/2021 01:30:00 PM,,06/16/2021 01:30:00 PM,Open,",
            "3,03/10/2020 11:59:59 PM,03/11/2020 12:00:00 AM,03/11/2020 12:00:00 AM,Closed,",
            "4,12/31/2021 12:00:00 PM,01/01/2022 12:00:00 PM,01/01/2022 12:00:00 PM,Closed,",
            "5,07/04/2020 07:04:00 AM,,,Open,",
        ]
    }

    fn shard_rows(root: &Path, year: i32) -> Vec<Vec<String>> {
        let mut names: Vec<_> = fs::read_dir(root.join(year.to_string()))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        names.sort();
        names.iter().flat_map(|p| read_rows(p).1).collect()
    }

    #[test]
    fn single_chunk_yields_one_shard_per_year() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &mixed_rows());
        let root = dir.path().join("shards");

        let outcome = YearPartitioner::new(&source, &root, DEFAULT_CHUNK_ROWS).run();
        let report = outcome.into_result().unwrap();

        assert_eq!(report.chunks, 1);
        assert_eq!(report.shards.len(), 2);
        assert_eq!(report.rows_by_year, BTreeMap::from([(2020, 3), (2021, 2)]));

        let rows_2020 = shard_rows(&root, 2020);
        assert_eq!(rows_2020.len(), 3);
        assert_eq!(
            rows_2020.iter().map(|r| r[0].as_str()).collect::<Vec<_>>(),
            vec!["1", "3", "5"]
        );
        assert_eq!(shard_rows(&root, 2021).len(), 2);
    }

    #[test]
    fn shards_hold_canonical_timestamps_and_full_schema() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &mixed_rows());
        let root = dir.path().join("shards");

        let report = YearPartitioner::new(&source, &root, 100)
            .run()
            .into_result()
            .unwrap();

        let shard_2020 = report.shards.iter().find(|s| s.year == 2020).unwrap();
        let (header, rows) = read_rows(&shard_2020.absolute(&root));
        assert_eq!(header.join(","), HEADER);
        assert_eq!(
            rows[0],
            vec![
                "1",
                "2020-01-02 08:00:00",
                "2020-01-03 08:00:00",
                "2020-01-03 09:00:00",
                "Closed",
                "(37.7, -122.4)"
            ]
        );
        // Blank Closed and Updated stay blank.
        assert_eq!(rows[2][2], "");
        assert_eq!(rows[2][3], "");
    }

    #[test]
    fn chunks_are_bounded_and_named_by_chunk_and_content() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &mixed_rows());
        let root = dir.path().join("shards");

        let report = YearPartitioner::new(&source, &root, 2)
            .run()
            .into_result()
            .unwrap();

        assert_eq!(report.chunks, 3);
        assert_eq!(report.rows, 5);
        assert!(report.shards.iter().all(|s| s.rows <= 2));
        for shard in &report.shards {
            let name = shard.path.rsplit('/').next().unwrap();
            assert!(name.starts_with(&format!("part-{:06}-", shard.chunk)));
            assert!(name.ends_with(".csv"));
            assert_eq!(name.len(), "part-000000-".len() + 16 + ".csv".len());
        }

        let manifest = ShardManifest::load(&root).unwrap().unwrap();
        assert!(manifest.complete);
        assert_eq!(manifest.chunk_rows, 2);
        assert_eq!(manifest.shards, report.shards);
    }

    #[test]
    fn rerun_with_same_chunking_is_identical() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &mixed_rows());
        let root = dir.path().join("shards");
        let partitioner = YearPartitioner::new(&source, &root, 2);

        let first = partitioner.run().into_result().unwrap();
        let second = partitioner.run().into_result().unwrap();

        assert_eq!(first.shards, second.shards);
        assert_eq!(second.stale_shards_removed, first.shards.len());
        assert_eq!(shard_rows(&root, 2020).len(), 3);
    }

    #[test]
    fn rerun_with_different_chunking_does_not_duplicate() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &mixed_rows());
        let root = dir.path().join("shards");

        YearPartitioner::new(&source, &root, 1).run().into_result().unwrap();
        let report = YearPartitioner::new(&source, &root, 3)
            .run()
            .into_result()
            .unwrap();

        assert_eq!(report.stale_shards_removed, 5);
        assert_eq!(shard_rows(&root, 2020).len(), 3);
        assert_eq!(shard_rows(&root, 2021).len(), 2);
    }

    #[test]
    fn malformed_timestamp_in_later_chunk_is_partial() {
        let dir = TempDir::new().unwrap();
        let mut rows = mixed_rows();
        rows[2] = "3,2020-03-10 23:59:59,,,Closed,";
        let source = write_source(dir.path(), &rows);
        let root = dir.path().join("shards");

        let outcome = YearPartitioner::new(&source, &root, 2).run();

        match outcome {
            PhaseOutcome::Partial { report, error } => {
                assert_eq!(report.chunks, 1);
                assert_eq!(report.rows, 2);
                match error {
                    PipelineError::TimestampParse {
                        chunk,
                        row,
                        column,
                        value,
                        ..
                    } => {
                        assert_eq!(chunk, 1);
                        assert_eq!(row, 3);
                        assert_eq!(column, "Opened");
                        assert_eq!(value, "2020-03-10 23:59:59");
                    }
                    other => panic!("unexpected error: {other}"),
                }
            }
            other => panic!("expected partial outcome, got {:?}", other.status()),
        }

        let manifest = ShardManifest::load(&root).unwrap().unwrap();
        assert!(!manifest.complete);
        assert_eq!(shard_rows(&root, 2020).len(), 1);
        assert_eq!(shard_rows(&root, 2021).len(), 1);
    }

    #[test]
    fn malformed_closed_in_first_chunk_is_fatal() {
        let dir = TempDir::new().unwrap();
        let source = write_source(
            dir.path(),
            &["1,01/02/2020 08:00:00 AM,yesterday,,Closed,"],
        );
        let root = dir.path().join("shards");

        let outcome = YearPartitioner::new(&source, &root, 10).run();

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.code(), "E003");
        assert!(err.to_string().contains("Closed"));
        assert!(!root.join("2020").exists());
    }

    #[test]
    fn blank_opened_is_rejected() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &["1,,,,Open,"]);
        let root = dir.path().join("shards");

        let err = YearPartitioner::new(&source, &root, 10)
            .run()
            .into_result()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::TimestampParse { ref column, row: 1, .. } if column == "Opened"
        ));
    }

    #[test]
    fn missing_timestamp_column_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("cases.csv");
        fs::write(&source, "CaseID,Opened,Closed\n1,01/02/2020 08:00:00 AM,\n").unwrap();

        let err = YearPartitioner::new(&source, dir.path().join("shards"), 10)
            .run()
            .into_result()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Schema { ref column, .. } if column == "Updated"));
    }

    #[test]
    fn missing_source_is_fatal_io() {
        let dir = TempDir::new().unwrap();
        let outcome =
            YearPartitioner::new(dir.path().join("absent.csv"), dir.path().join("shards"), 10)
                .run();
        assert_eq!(outcome.error().unwrap().code(), "E001");
        assert!(outcome.report().is_none());
    }

    #[test]
    fn failed_rerun_keeps_previous_shards() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &mixed_rows());
        let root = dir.path().join("shards");
        let first = YearPartitioner::new(&source, &root, 2)
            .run()
            .into_result()
            .unwrap();

        let missing_column = dir.path().join("narrow.csv");
        fs::write(&missing_column, "CaseID,Opened\n1,01/02/2020 08:00:00 AM\n").unwrap();
        let bad_first_chunk = dir.path().join("bad.csv");
        fs::write(&bad_first_chunk, format!("{}\n9,soon,,,Open,\n", HEADER)).unwrap();

        for rerun_source in [dir.path().join("typo.csv"), missing_column, bad_first_chunk] {
            let outcome = YearPartitioner::new(&rerun_source, &root, 3).run();
            assert_eq!(outcome.status(), crate::outcome::PhaseStatus::Fatal);

            let manifest = ShardManifest::load(&root).unwrap().unwrap();
            assert!(manifest.complete);
            assert_eq!(manifest.shards, first.shards);
            assert_eq!(shard_rows(&root, 2020).len(), 3);
            assert_eq!(shard_rows(&root, 2021).len(), 2);
        }
    }

    #[test]
    fn shards_are_listed_before_they_are_written() {
        let dir = TempDir::new().unwrap();
        let all = mixed_rows();
        let source = write_source(dir.path(), &[all[0], all[2], all[4], all[1]]);
        let root = dir.path().join("shards");
        // A file where the 2021 directory belongs makes the second chunk's
        // 2021 shard unwritable after its 2020 shard is already on disk.
        fs::create_dir_all(&root).unwrap();
        let blocker = root.join("2021");
        fs::write(&blocker, "").unwrap();

        match YearPartitioner::new(&source, &root, 2).run() {
            PhaseOutcome::Partial { report, error } => {
                assert_eq!(report.chunks, 1);
                assert_eq!(report.rows, 2);
                assert_eq!(error.code(), "E001");
            }
            other => panic!("expected partial outcome, got {:?}", other.status()),
        }

        let manifest = ShardManifest::load(&root).unwrap().unwrap();
        let listed: Vec<PathBuf> = manifest.shards.iter().map(|s| s.absolute(&root)).collect();
        assert!(manifest.shards.iter().any(|s| s.chunk == 1 && s.year == 2021));
        for shard in fs::read_dir(root.join("2020")).unwrap() {
            let path = shard.unwrap().path();
            assert!(listed.contains(&path), "unlisted shard {}", path.display());
        }
        // The failed chunk's 2020 shard was rolled back.
        assert_eq!(shard_rows(&root, 2020).len(), 2);

        fs::remove_file(&blocker).unwrap();
        let report = YearPartitioner::new(&source, &root, 3)
            .run()
            .into_result()
            .unwrap();
        assert_eq!(report.rows, 4);
        assert_eq!(shard_rows(&root, 2020).len(), 3);
        assert_eq!(shard_rows(&root, 2021).len(), 1);
    }

    #[test]
    fn header_only_source_replaces_previous_run() {
        let dir = TempDir::new().unwrap();
        let source = write_source(dir.path(), &mixed_rows());
        let root = dir.path().join("shards");
        YearPartitioner::new(&source, &root, 2).run().into_result().unwrap();

        let empty = write_source(dir.path(), &[]);
        let report = YearPartitioner::new(&empty, &root, 2)
            .run()
            .into_result()
            .unwrap();

        assert_eq!(report.chunks, 0);
        assert_eq!(report.stale_shards_removed, 5);
        let manifest = ShardManifest::load(&root).unwrap().unwrap();
        assert!(manifest.complete);
        assert!(manifest.shards.is_empty());
        assert!(shard_rows(&root, 2020).is_empty());
    }

    #[test]
    fn year_masks_are_ascending() {
        let masks = year_masks(&[2021, 2020, 2021]);
        let years: Vec<_> = masks.keys().copied().collect();
        assert_eq!(years, vec![2020, 2021]);
        assert_eq!(masks[&2021].true_count(), 2);
    }
}
