//! Delimited-text table I/O shared by every stage.
//!
//! Every column is read as nullable `Utf8`; no type inference happens.
//! Empty fields read as null and nulls are written as empty fields.
//! Output files are written to a hidden sibling and renamed into place.

use crate::error::{PipelineError, Result};
use arrow::array::RecordBatch;
use arrow::csv::reader::Format;
use arrow::csv::{ReaderBuilder, WriterBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Batch size used when a stage reads a whole file.
pub const READ_BATCH_ROWS: usize = 8_192;

/// Build an all-`Utf8` schema from the header row of `path`.
pub fn read_header_schema(path: &Path) -> Result<SchemaRef> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let (inferred, _) = Format::default()
        .with_header(true)
        .infer_schema(file, Some(0))
        .map_err(|e| PipelineError::csv(path, "reading header", e))?;

    Ok(utf8_schema(inferred.fields().iter().map(|f| f.name().as_str())))
}

/// Schema with one nullable `Utf8` field per column name.
pub fn utf8_schema<'a>(columns: impl IntoIterator<Item = &'a str>) -> SchemaRef {
    let fields: Vec<Field> = columns
        .into_iter()
        .map(|name| Field::new(name, DataType::Utf8, true))
        .collect();
    Arc::new(Schema::new(fields))
}

/// Position of each of `columns` in `schema`, failing on the first absent one.
pub fn resolve_columns(schema: &Schema, columns: &[&str], path: &Path) -> Result<Vec<usize>> {
    columns
        .iter()
        .map(|column| {
            schema
                .index_of(column)
                .map_err(|_| PipelineError::schema(path, column))
        })
        .collect()
}

/// Open a streaming reader yielding batches of at most `batch_rows` rows.
pub fn open_reader(
    path: &Path,
    schema: SchemaRef,
    batch_rows: usize,
) -> Result<arrow::csv::Reader<File>> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    ReaderBuilder::new(schema)
        .with_header(true)
        .with_batch_size(batch_rows)
        .build(file)
        .map_err(|e| PipelineError::csv(path, "opening reader", e))
}

/// Encode a batch as CSV bytes with a header row.
pub fn encode_batch(batch: &RecordBatch, path: &Path) -> Result<Vec<u8>> {
    let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
    writer
        .write(batch)
        .map_err(|e| PipelineError::csv(path, "encoding rows", e))?;
    Ok(writer.into_inner())
}

/// Write `bytes` to `path` through a temporary sibling file.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    ensure_parent_dir(path)?;
    let tmp_path = temp_sibling(path);
    fs::write(&tmp_path, bytes).map_err(|e| PipelineError::io(&tmp_path, e))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        PipelineError::io(path, e)
    })
}

/// Streaming CSV writer that only replaces its target on [`TableWriter::finish`].
///
/// Dropping an unfinished writer removes the temporary file and leaves the
/// target untouched.
pub struct TableWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<arrow::csv::Writer<BufWriter<File>>>,
    rows: usize,
}

impl TableWriter {
    /// Create the temporary file and write the header for `schema`.
    pub fn create(path: &Path, schema: SchemaRef) -> Result<Self> {
        ensure_parent_dir(path)?;
        let tmp_path = temp_sibling(path);
        let file = File::create(&tmp_path).map_err(|e| PipelineError::io(&tmp_path, e))?;

        let mut table = Self {
            path: path.to_path_buf(),
            tmp_path,
            writer: Some(WriterBuilder::new().with_header(true).build(BufWriter::new(file))),
            rows: 0,
        };
        // An empty batch emits just the header row.
        table.write(&RecordBatch::new_empty(schema))?;
        Ok(table)
    }

    pub fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .write(batch)
                .map_err(|e| PipelineError::csv(&self.path, "writing rows", e))?;
            self.rows += batch.num_rows();
        }
        Ok(())
    }

    /// Flush, sync and rename into place. Returns the number of rows written.
    pub fn finish(mut self) -> Result<usize> {
        if let Some(writer) = self.writer.take() {
            let mut buffered = writer.into_inner();
            buffered
                .flush()
                .map_err(|e| PipelineError::io(&self.tmp_path, e))?;
            let file = buffered
                .into_inner()
                .map_err(|e| PipelineError::io(&self.tmp_path, e.into_error()))?;
            file.sync_all()
                .map_err(|e| PipelineError::io(&self.tmp_path, e))?;
        }
        fs::rename(&self.tmp_path, &self.path).map_err(|e| PipelineError::io(&self.path, e))?;
        // Renamed away; nothing left for Drop to clean up.
        self.tmp_path = PathBuf::new();
        Ok(self.rows)
    }
}

impl Drop for TableWriter {
    fn drop(&mut self) {
        self.writer.take();
        if !self.tmp_path.as_os_str().is_empty() {
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Write `batches` under `schema` to `path`, replacing it atomically.
pub fn write_table(path: &Path, schema: SchemaRef, batches: &[RecordBatch]) -> Result<usize> {
    let mut writer = TableWriter::create(path, schema)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.finish()
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))
        }
        _ => Ok(()),
    }
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}
