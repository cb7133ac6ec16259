//! CSV Data Loader Module
//! Reads the raw daily export into ordered raw records using Polars.

use super::schema::Schema;
use polars::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed input {path}: {reason}")]
    Format { path: PathBuf, reason: String },
}

/// Identity of the file a run was fed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// One data row exactly as read: column name -> cell, `None` for empty cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based data row number (header excluded).
    pub row: usize,
    pub values: BTreeMap<String, Option<String>>,
}

impl RawRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).and_then(|v| v.as_deref())
    }
}

/// Loader output: header plus records in file order.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub source: SourceInfo,
    pub columns: Vec<String>,
    pub records: Vec<RawRecord>,
}

impl RawTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Handles CSV file loading with Polars.
pub struct DataLoader {
    delimiter: u8,
}

impl Default for DataLoader {
    fn default() -> Self {
        Self::new(b',')
    }
}

impl DataLoader {
    pub fn new(delimiter: u8) -> Self {
        Self { delimiter }
    }

    /// Load a delimited file and check its header against the schema.
    pub fn load(&self, path: &Path, schema: &Schema) -> Result<RawTable, LoaderError> {
        let bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let source = SourceInfo {
            path: path.to_path_buf(),
            bytes: bytes.len() as u64,
            sha256: format!("{:x}", Sha256::digest(&bytes)),
        };

        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(Self::format_error(path, "file is empty"));
        }

        // polars renames repeated headers (`amount_duplicated_0`), so check the raw line.
        let header = Self::header_fields(&bytes, self.delimiter);
        let mut seen = HashSet::new();
        if let Some(name) = header.iter().find(|name| !seen.insert(name.as_str())) {
            return Err(Self::format_error(path, format!("duplicate column '{}'", name)));
        }

        // Every column is read as a string; typing is the cleaner's job.
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0))
            .with_parse_options(CsvParseOptions::default().with_separator(self.delimiter))
            .into_reader_with_file_handle(Cursor::new(bytes))
            .finish()
            .map_err(|e| Self::format_error(path, e.to_string()))?;

        let columns: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let missing: Vec<&str> = schema
            .columns
            .iter()
            .filter(|c| !columns.contains(&c.name))
            .map(|c| c.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Self::format_error(
                path,
                format!("header is missing column(s): {}", missing.join(", ")),
            ));
        }

        let records = Self::collect_records(&df, &columns)
            .map_err(|e| Self::format_error(path, e.to_string()))?;

        info!(
            path = %path.display(),
            rows = records.len(),
            columns = columns.len(),
            "loaded raw export"
        );
        debug!(sha256 = %source.sha256, bytes = source.bytes, "source fingerprint");

        Ok(RawTable {
            source,
            columns,
            records,
        })
    }

    fn collect_records(df: &DataFrame, columns: &[String]) -> PolarsResult<Vec<RawRecord>> {
        let mut records: Vec<RawRecord> = (0..df.height())
            .map(|i| RawRecord {
                row: i + 1,
                values: BTreeMap::new(),
            })
            .collect();

        for name in columns {
            let column = df.column(name)?.cast(&DataType::String)?;
            let values = column.str()?;
            for (record, value) in records.iter_mut().zip(values.into_iter()) {
                record
                    .values
                    .insert(name.clone(), value.map(|v| v.to_string()));
            }
        }

        Ok(records)
    }

    /// Field names of the first line, honouring double quotes.
    fn header_fields(bytes: &[u8], delimiter: u8) -> Vec<String> {
        let end = bytes.iter().position(|&b| b == b'\n').unwrap_or(bytes.len());
        let line = String::from_utf8_lossy(&bytes[..end]);
        let line = line.trim_start_matches('\u{feff}').trim_end_matches('\r');
        let delimiter = char::from(delimiter);

        let mut fields = Vec::new();
        let mut field = String::new();
        let mut quoted = false;
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '"' if quoted && chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => quoted = !quoted,
                c if c == delimiter && !quoted => fields.push(std::mem::take(&mut field)),
                c => field.push(c),
            }
        }
        fields.push(field);
        fields
    }

    fn format_error(path: &Path, reason: impl Into<String>) -> LoaderError {
        LoaderError::Format {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
