//! Derived time-to-resolution metrics and calendar labels.
//!
//! Appends `Time_to_Close`, `Time_to_Update`, `Opened_Month` and
//! `Opened_Year` to the combined table. Timestamps are parsed leniently: an
//! unparsable value becomes null along with every field derived from it, and
//! the row is kept. Durations are passed through unclamped.

use crate::error::{PipelineError, Result};
use crate::outcome::{PhaseOutcome, PhaseReport};
use crate::table::{open_reader, read_header_schema, resolve_columns, TableWriter, READ_BATCH_ROWS};
use crate::timestamp::{
    calendar_labels, elapsed_days, normalize, to_canonical, TimestampPolicy, TIMESTAMP_COLUMNS,
};
use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int32Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::NaiveDateTime;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

pub const TIME_TO_CLOSE: &str = "Time_to_Close";
pub const TIME_TO_UPDATE: &str = "Time_to_Update";
pub const OPENED_MONTH: &str = "Opened_Month";
pub const OPENED_YEAR: &str = "Opened_Year";

/// Reads the combined table and writes the final analytic table.
#[derive(Debug, Clone)]
pub struct MetricDeriver {
    input: PathBuf,
    output: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeriveReport {
    pub rows: usize,
    /// Rows whose Opened could not be parsed; all four derived fields are null
    pub null_opened: usize,
    pub null_time_to_close: usize,
    pub null_time_to_update: usize,
    /// Durations (close or update) where the later timestamp precedes Opened
    pub negative_durations: usize,
}

impl PhaseReport for DeriveReport {
    const PHASE: &'static str = "derive";

    fn omitted(&self) -> String {
        // The deriver never persists a partial table.
        "the final analytic table was not written".to_string()
    }
}

impl MetricDeriver {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn run(&self) -> PhaseOutcome<DeriveReport> {
        info!(
            input = %self.input.display(),
            output = %self.output.display(),
            "Deriving metrics"
        );

        let mut report = DeriveReport::default();
        match self.derive_into(&mut report) {
            Ok(()) => {
                info!(
                    rows = report.rows,
                    null_opened = report.null_opened,
                    null_time_to_close = report.null_time_to_close,
                    null_time_to_update = report.null_time_to_update,
                    negative_durations = report.negative_durations,
                    "Metrics derived"
                );
                PhaseOutcome::Complete(report)
            }
            Err(err) => {
                error!(error = %err, "Metric derivation failed");
                PhaseOutcome::Fatal(err)
            }
        }
    }

    fn derive_into(&self, report: &mut DeriveReport) -> Result<()> {
        let input_schema = read_header_schema(&self.input)?;
        let timestamp_indices = resolve_columns(&input_schema, &TIMESTAMP_COLUMNS, &self.input)?;
        let output_schema = analytic_schema(&input_schema);

        let mut writer = TableWriter::create(&self.output, output_schema.clone())?;
        for batch in open_reader(&self.input, input_schema, READ_BATCH_ROWS)? {
            let batch = batch.map_err(|e| {
                PipelineError::csv(&self.input, format!("reading after row {}", report.rows), e)
            })?;
            let derived = derive_batch(&batch, &timestamp_indices, &output_schema, report)
                .map_err(|e| PipelineError::csv(&self.output, "assembling derived columns", e))?;
            writer.write(&derived)?;
        }
        writer.finish()?;
        Ok(())
    }
}

/// Input columns followed by the four derived fields.
pub fn analytic_schema(input: &Schema) -> SchemaRef {
    let mut fields: Vec<Field> = input.fields().iter().map(|f| f.as_ref().clone()).collect();
    fields.push(Field::new(TIME_TO_CLOSE, DataType::Float64, true));
    fields.push(Field::new(TIME_TO_UPDATE, DataType::Float64, true));
    fields.push(Field::new(OPENED_MONTH, DataType::Utf8, true));
    fields.push(Field::new(OPENED_YEAR, DataType::Int32, true));
    Arc::new(Schema::new(fields))
}

fn derive_batch(
    batch: &RecordBatch,
    timestamp_indices: &[usize],
    output_schema: &SchemaRef,
    report: &mut DeriveReport,
) -> std::result::Result<RecordBatch, arrow::error::ArrowError> {
    let mut columns = batch.columns().to_vec();

    // Opened, Closed, Updated in that order.
    let mut parsed: Vec<Vec<Option<NaiveDateTime>>> = Vec::with_capacity(3);
    for &index in timestamp_indices {
        let values: Vec<Option<NaiveDateTime>> = batch
            .column(index)
            .as_string::<i32>()
            .iter()
            .map(|v| normalize(v, TimestampPolicy::Lenient).ok().flatten())
            .collect();
        let canonical: StringArray = values
            .iter()
            .map(|ts| ts.as_ref().map(to_canonical))
            .collect();
        columns[index] = Arc::new(canonical) as ArrayRef;
        parsed.push(values);
    }
    let (opened, closed, updated) = (&parsed[0][..], &parsed[1][..], &parsed[2][..]);

    let mut negative = 0;
    let mut durations = |ends: &[Option<NaiveDateTime>]| -> Float64Array {
        opened
            .iter()
            .zip(ends)
            .map(|(start, end)| match (start, end) {
                (Some(start), Some(end)) => {
                    let days = elapsed_days(start, end);
                    if days < 0.0 {
                        negative += 1;
                    }
                    Some(days)
                }
                _ => None,
            })
            .collect()
    };
    let time_to_close = durations(closed);
    let time_to_update = durations(updated);

    let labels: Vec<Option<(Option<&'static str>, i32)>> =
        opened.iter().map(|ts| ts.as_ref().map(calendar_labels)).collect();
    let months: StringArray = labels
        .iter()
        .map(|l| l.and_then(|(month, _)| month))
        .collect();
    let years: Int32Array = labels.iter().map(|l| l.map(|(_, year)| year)).collect();

    report.rows += batch.num_rows();
    report.null_opened += opened.iter().filter(|ts| ts.is_none()).count();
    report.null_time_to_close += time_to_close.null_count();
    report.null_time_to_update += time_to_update.null_count();
    report.negative_durations += negative;

    columns.push(Arc::new(time_to_close) as ArrayRef);
    columns.push(Arc::new(time_to_update) as ArrayRef);
    columns.push(Arc::new(months) as ArrayRef);
    columns.push(Arc::new(years) as ArrayRef);
    RecordBatch::try_new(output_schema.clone(), columns)
}
