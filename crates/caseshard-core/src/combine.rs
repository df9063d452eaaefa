//! Recombine year shards into one table restricted to the retained columns.

use crate::error::{PipelineError, Result};
use crate::outcome::{PhaseOutcome, PhaseReport};
use crate::table::{
    open_reader, read_header_schema, resolve_columns, utf8_schema, write_table, READ_BATCH_ROWS,
};
use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Folds the shards of each configured year, in order, into one output file.
///
/// The output file is rewritten after every completed year, so it always
/// holds exactly the years folded in so far.
#[derive(Debug, Clone)]
pub struct ShardCombiner {
    shard_root: PathBuf,
    years: Vec<i32>,
    columns: Vec<String>,
    output: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombineReport {
    pub years_completed: Vec<i32>,
    pub years_omitted: Vec<i32>,
    pub shards_read: usize,
    pub rows: usize,
    pub rows_by_year: BTreeMap<i32, usize>,
}

impl PhaseReport for CombineReport {
    const PHASE: &'static str = "combine";

    fn omitted(&self) -> String {
        format!("years {:?} were not combined", self.years_omitted)
    }
}

impl ShardCombiner {
    pub fn new(
        shard_root: impl Into<PathBuf>,
        years: Vec<i32>,
        columns: Vec<String>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            shard_root: shard_root.into(),
            years,
            columns,
            output: output.into(),
        }
    }

    pub fn run(&self) -> PhaseOutcome<CombineReport> {
        info!(
            shard_root = %self.shard_root.display(),
            output = %self.output.display(),
            years = ?self.years,
            columns = self.columns.len(),
            "Combining shards"
        );

        let mut report = CombineReport::default();
        match self.combine_into(&mut report) {
            Ok(()) => {
                info!(
                    rows = report.rows,
                    shards = report.shards_read,
                    "Combine complete"
                );
                PhaseOutcome::Complete(report)
            }
            Err(err) => {
                report.years_omitted = self
                    .years
                    .iter()
                    .copied()
                    .filter(|y| !report.years_completed.contains(y))
                    .collect();
                let has_progress = !report.years_completed.is_empty();
                if has_progress {
                    warn!(
                        completed = ?report.years_completed,
                        omitted = ?report.years_omitted,
                        error = %err,
                        "Combine stopped; output holds completed years only"
                    );
                } else {
                    error!(error = %err, "Combine failed before any year completed");
                }
                PhaseOutcome::from_error(report, err, has_progress)
            }
        }
    }

    fn combine_into(&self, report: &mut CombineReport) -> Result<()> {
        let schema = utf8_schema(self.columns.iter().map(String::as_str));
        let mut combined: Vec<RecordBatch> = Vec::new();

        // Start from an empty table so a stale file from an earlier run is
        // never mistaken for this run's progress.
        write_table(&self.output, schema.clone(), &combined)?;

        for &year in &self.years {
            let year_dir = self.shard_root.join(year.to_string());
            let mut year_rows = 0;

            for shard in list_shards(&year_dir)? {
                let batches = self.project_shard(&shard, &schema)?;
                let rows: usize = batches.iter().map(RecordBatch::num_rows).sum();
                debug!(year, shard = %shard.display(), rows, "Folded shard");

                year_rows += rows;
                report.shards_read += 1;
                combined.extend(batches);
            }

            // The year is only visible on disk once every shard is in.
            let written = write_table(&self.output, schema.clone(), &combined)?;
            report.rows = written;
            report.rows_by_year.insert(year, year_rows);
            report.years_completed.push(year);
            info!(year, rows = year_rows, total = written, "Year combined");
        }

        Ok(())
    }

    /// Read a shard and restrict it to the retained columns, in retained order.
    fn project_shard(&self, shard: &Path, schema: &SchemaRef) -> Result<Vec<RecordBatch>> {
        let shard_schema = read_header_schema(shard)?;
        let columns: Vec<&str> = self.columns.iter().map(String::as_str).collect();
        let indices = resolve_columns(&shard_schema, &columns, shard)?;

        let mut projected = Vec::new();
        for batch in open_reader(shard, shard_schema, READ_BATCH_ROWS)? {
            let batch = batch.map_err(|e| PipelineError::csv(shard, "reading shard", e))?;
            let batch = batch
                .project(&indices)
                .and_then(|b| RecordBatch::try_new(schema.clone(), b.columns().to_vec()))
                .map_err(|e| PipelineError::csv(shard, "projecting columns", e))?;
            projected.push(batch);
        }
        Ok(projected)
    }
}

/// `*.csv` files directly under `year_dir`, sorted by file name.
///
/// A missing year directory is an error rather than an empty year.
pub fn list_shards(year_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(year_dir).map_err(|e| PipelineError::io(year_dir, e))?;

    let mut shards = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(year_dir, e))?.path();
        let is_csv = path.extension().is_some_and(|ext| ext == "csv");
        let hidden = path
            .file_name()
            .is_some_and(|n| n.to_string_lossy().starts_with('.'));
        if is_csv && !hidden && path.is_file() {
            shards.push(path);
        }
    }
    shards.sort();
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::test_util::read_rows;
    use tempfile::TempDir;

    const SHARD_HEADER: &str = "CaseID,Opened,Closed,Updated,Status,Category,Point,Extra";

    fn write_shard(root: &Path, year: i32, name: &str, ids: std::ops::Range<usize>) {
        let dir = root.join(year.to_string());
        fs::create_dir_all(&dir).unwrap();
        let mut content = format!("{}\n", SHARD_HEADER);
        for id in ids {
            content.push_str(&format!(
                "{id},{year}-01-01 00:00:00,,{year}-01-02 00:00:00,Open,Graffiti,,drop-me\n"
            ));
        }
        fs::write(dir.join(name), content).unwrap();
    }

    fn columns() -> Vec<String> {
        ["CaseID", "Opened", "Closed", "Updated", "Status"]
            .iter()
            .map(|c| c.to_string())
            .collect()
    }

    #[test]
    fn combines_years_in_order_with_projection() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("shards");
        write_shard(&root, 2020, "part-000000-a.csv", 0..10);
        write_shard(&root, 2021, "part-000000-b.csv", 10..15);
        write_shard(&root, 2022, "part-000001-c.csv", 15..19);
        write_shard(&root, 2022, "part-000000-d.csv", 19..22);
        let output = dir.path().join("combined.csv");

        let report = ShardCombiner::new(&root, vec![2020, 2021, 2022], columns(), &output)
            .run()
            .into_result()
            .unwrap();

        assert_eq!(report.rows, 22);
        assert_eq!(report.shards_read, 4);
        assert_eq!(report.years_completed, vec![2020, 2021, 2022]);
        assert_eq!(
            report.rows_by_year,
            BTreeMap::from([(2020, 10), (2021, 5), (2022, 7)])
        );

        let (header, rows) = read_rows(&output);
        assert_eq!(header, columns());
        assert_eq!(rows.len(), 22);
        assert!(rows.iter().all(|r| r.len() == 5));
        // part-000000-d sorts before part-000001-c within 2022.
        assert_eq!(rows[15][0], "19");
        assert_eq!(rows[18][0], "15");
        assert_eq!(rows[21][0], "18");
    }

    #[test]
    fn years_outside_the_list_are_ignored() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("shards");
        write_shard(&root, 2019, "part-000000-a.csv", 0..4);
        write_shard(&root, 2020, "part-000000-b.csv", 4..6);
        let output = dir.path().join("combined.csv");

        ShardCombiner::new(&root, vec![2020], columns(), &output)
            .run()
            .into_result()
            .unwrap();

        let (_, rows) = read_rows(&output);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r[1].starts_with("2020-")));
    }

    #[test]
    fn missing_column_keeps_completed_years_only() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("shards");
        write_shard(&root, 2020, "part-000000-a.csv", 0..3);
        write_shard(&root, 2021, "part-000000-b.csv", 3..5);
        let broken = root.join("2021").join("part-000001-c.csv");
        fs::write(&broken, "CaseID,Opened\n9,2021-05-05 00:00:00\n").unwrap();
        write_shard(&root, 2022, "part-000000-d.csv", 5..6);
        let output = dir.path().join("combined.csv");
        let combiner = ShardCombiner::new(&root, vec![2020, 2021, 2022], columns(), &output);

        match combiner.run() {
            PhaseOutcome::Partial { report, error } => {
                assert_eq!(report.years_completed, vec![2020]);
                assert_eq!(report.years_omitted, vec![2021, 2022]);
                assert!(matches!(error, PipelineError::Schema { ref column, .. } if column == "Closed"));
            }
            other => panic!("expected partial outcome, got {:?}", other.status()),
        }
        let (_, rows) = read_rows(&output);
        assert_eq!(rows.len(), 3);

        // Repair and re-invoke: the output completes to all three years.
        fs::remove_file(&broken).unwrap();
        let report = combiner.run().into_result().unwrap();
        assert_eq!(report.rows, 6);
        let (_, rows) = read_rows(&output);
        let ids: Vec<_> = rows.iter().map(|r| r[0].as_str()).collect();
        assert_eq!(ids, vec!["0", "1", "2", "3", "4", "5"]);
    }

    #[test]
    fn missing_first_year_is_fatal_and_clears_stale_output() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("shards");
        let output = dir.path().join("combined.csv");
        fs::write(&output, "CaseID\nstale\n").unwrap();

        let outcome = ShardCombiner::new(&root, vec![2020], columns(), &output).run();

        assert_eq!(outcome.error().unwrap().code(), "E001");
        assert!(outcome.report().is_none());
        let (header, rows) = read_rows(&output);
        assert_eq!(header, columns());
        assert!(rows.is_empty());
    }

    #[test]
    fn list_shards_skips_temp_and_foreign_files() {
        let dir = TempDir::new().unwrap();
        let year_dir = dir.path().join("2020");
        fs::create_dir_all(&year_dir).unwrap();
        for name in ["b.csv", "a.csv", ".a.csv.tmp", ".hidden.csv", "notes.txt"] {
            fs::write(year_dir.join(name), "x\n").unwrap();
        }

        let names: Vec<_> = list_shards(&year_dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }
}
