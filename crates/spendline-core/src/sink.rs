//! Output sinks: Parquet and CSV writers with atomic tmp→rename

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::Schema;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

use crate::table::{DEFAULT_BATCH_SIZE, StringTable};

/// Default zstd level for Parquet outputs
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Buffered parquet writer with atomic tmp→rename
pub struct ParquetSink {
    writer: ArrowWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl ParquetSink {
    /// Create a new sink writing to `<final_path>.tmp`
    pub fn create(final_path: &Path, schema: &Schema, zstd_level: i32) -> Result<Self, std::io::Error> {
        let tmp_path = tmp_path(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(1024 * 1024) // 1M rows per row group
            .build();

        let writer = ArrowWriter::try_new(file, Arc::new(schema.clone()), Some(props))
            .map_err(std::io::Error::other)?;

        Ok(Self {
            writer,
            tmp_path,
            final_path: final_path.to_path_buf(),
            row_count: 0,
        })
    }

    /// Write a record batch
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), std::io::Error> {
        self.row_count += batch.num_rows();
        self.writer.write(batch).map_err(std::io::Error::other)
    }

    /// Finalize: flush footer and atomically rename tmp → final
    pub fn finalize(self) -> Result<usize, std::io::Error> {
        let row_count = self.row_count;
        self.writer.close().map_err(std::io::Error::other)?;
        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(row_count)
    }
}

fn tmp_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Write a whole table as one Parquet file. Returns rows written.
pub fn write_parquet(table: &StringTable, path: &Path, zstd_level: i32) -> std::io::Result<usize> {
    let schema = table.schema();
    let mut sink = ParquetSink::create(path, &schema, zstd_level)?;
    for batch in table
        .to_record_batches(DEFAULT_BATCH_SIZE)
        .map_err(std::io::Error::other)?
    {
        sink.write_batch(&batch)?;
    }
    sink.finalize()
}

/// Write a whole table as CSV with a header row. Returns rows written.
pub fn write_csv(table: &StringTable, path: &Path) -> std::io::Result<usize> {
    let tmp = tmp_path(path);
    {
        let mut writer = csv::Writer::from_path(&tmp).map_err(std::io::Error::other)?;
        writer
            .write_record(table.columns())
            .map_err(std::io::Error::other)?;
        for row in table.rows() {
            writer
                .write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))
                .map_err(std::io::Error::other)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(table.num_rows())
}

/// Check if a completed parquet file exists and has a valid footer
pub fn is_valid_parquet(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    let file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };
    parquet::file::reader::SerializedFileReader::new(file).is_ok()
}
