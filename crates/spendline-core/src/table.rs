//! In-memory string table: the common shape of delimited exports and
//! search-result pages before they are written out.
//!
//! Every column is text; empty cells are null. Typing is left to downstream
//! consumers, which keeps conversion lossless across heterogeneous exports.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, RecordBatch, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::error::ArrowError;
use rustc_hash::FxHashSet;
use serde_json::Value;

/// Default batch size for slicing a table into `RecordBatch`es.
pub const DEFAULT_BATCH_SIZE: usize = 8192;

/// Key columns for the minimal dedup pass on award tables
pub const DEFAULT_DEDUP_KEYS: &[&str] = &["Award ID", "Start Date", "End Date", "Last Modified Date"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

impl StringTable {
    /// Rows shorter than the header are padded with nulls, longer rows are cut.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, None);
                r
            })
            .collect();
        Self { columns, rows }
    }

    /// Parse a delimited text file with a header row.
    pub fn from_delimited(path: &Path, delimiter: u8) -> std::io::Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_path(path)
            .map_err(std::io::Error::other)?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(std::io::Error::other)?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(std::io::Error::other)?;
            rows.push(record.iter().map(cell).collect());
        }
        Ok(Self::new(columns, rows))
    }

    /// Build a table from JSON objects (one per row).
    ///
    /// Columns follow `preferred` first, then any other keys in first-seen order.
    pub fn from_json_records(preferred: &[&str], records: &[Value]) -> Self {
        let mut columns: Vec<String> = preferred.iter().map(|c| c.to_string()).collect();
        let mut seen: FxHashSet<String> = columns.iter().cloned().collect();
        for record in records {
            if let Value::Object(map) = record {
                for key in map.keys() {
                    if seen.insert(key.clone()) {
                        columns.push(key.clone());
                    }
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).and_then(json_cell))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Drop rows that duplicate an earlier row on the key columns present in
    /// this table. Keys absent from the header are ignored; with no key column
    /// present the table is left untouched. Returns the number of rows removed.
    pub fn dedup_by_keys(&mut self, keys: &[&str]) -> usize {
        let key_idx: Vec<usize> = keys.iter().filter_map(|k| self.column_index(k)).collect();
        if key_idx.is_empty() {
            return 0;
        }

        let keep: Vec<bool> = {
            let mut seen: FxHashSet<Vec<Option<&str>>> = FxHashSet::default();
            self.rows
                .iter()
                .map(|row| seen.insert(key_idx.iter().map(|&i| row[i].as_deref()).collect()))
                .collect()
        };

        let before = self.rows.len();
        let mut keep = keep.into_iter();
        self.rows.retain(|_| keep.next().unwrap_or(true));
        before - self.rows.len()
    }

    /// All-Utf8, all-nullable schema matching the header
    pub fn schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns
                .iter()
                .map(|c| Field::new(c, DataType::Utf8, true))
                .collect::<Vec<_>>(),
        ))
    }

    /// Slice the table into record batches of at most `batch_size` rows.
    pub fn to_record_batches(&self, batch_size: usize) -> Result<Vec<RecordBatch>, ArrowError> {
        let schema = self.schema();
        let batch_size = batch_size.max(1);
        self.rows
            .chunks(batch_size)
            .map(|chunk| {
                let arrays: Vec<ArrayRef> = (0..self.columns.len())
                    .map(|col| {
                        let mut builder = StringBuilder::with_capacity(chunk.len(), chunk.len() * 16);
                        for row in chunk {
                            builder.append_option(row[col].as_deref());
                        }
                        Arc::new(builder.finish()) as ArrayRef
                    })
                    .collect();
                RecordBatch::try_new(schema.clone(), arrays)
            })
            .collect()
    }
}

fn cell(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn json_cell(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}
