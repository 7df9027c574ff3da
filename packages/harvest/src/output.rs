//! Append-only CSV output store keyed by identifier.
//!
//! The column set is fixed by the first record written and preserved across
//! resume; later records fill what they have (missing fields become empty
//! cells, unknown fields are dropped). Resuming enumerates existing keys by
//! streaming only the identifier column, so startup cost stays proportional
//! to row count, not file content.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{HarvestError, Result};
use crate::types::{IdSet, Identifier, Record};

/// Append-only tabular store over one CSV file.
///
/// Not internally synchronized: the harvester funnels all appends through
/// its single writer task.
pub struct CsvStore {
    path: PathBuf,
    id_column: String,
    header: Option<Vec<String>>,
    keys: IdSet,
    writer: csv::Writer<File>,
}

impl CsvStore {
    /// Open (or create) the store, loading existing keys for resume.
    pub fn open(path: impl AsRef<Path>, id_column: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let id_column = id_column.into();

        let mut header = None;
        let mut keys = IdSet::new();

        if path.exists() && std::fs::metadata(&path).map_err(store_io)?.len() > 0 {
            let mut reader = csv::Reader::from_path(&path).map_err(store_err)?;
            let headers: Vec<String> =
                reader.headers().map_err(store_err)?.iter().map(String::from).collect();
            let id_index = headers
                .iter()
                .position(|h| h == &id_column)
                .ok_or_else(|| {
                    HarvestError::Store(
                        format!("existing output has no {id_column} column").into(),
                    )
                })?;

            for row in reader.records() {
                let row = row.map_err(store_err)?;
                if let Some(id) = row.get(id_index) {
                    if !id.is_empty() {
                        keys.insert(Identifier::new(id));
                    }
                }
            }

            info!(
                path = %path.display(),
                rows = keys.len(),
                "resuming into existing output store"
            );
            header = Some(headers);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(store_io)?;
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        Ok(Self {
            path,
            id_column,
            header,
            keys,
            writer,
        })
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Identifiers already present in the store.
    pub fn keys(&self) -> &IdSet {
        &self.keys
    }

    /// Whether a row exists for the identifier.
    pub fn contains(&self, id: &Identifier) -> bool {
        self.keys.contains(id)
    }

    /// Number of rows present.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the store has no rows.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Append one record and flush it to disk.
    ///
    /// The first record ever written fixes the header. The identifier
    /// column is always populated from the record's key.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        if self.header.is_none() {
            let mut columns: Vec<String> = record.fields.keys().cloned().collect();
            if !columns.iter().any(|c| c == &self.id_column) {
                columns.insert(0, self.id_column.clone());
            }
            self.writer.write_record(&columns).map_err(store_err)?;
            self.header = Some(columns);
        }

        let header = self.header.as_ref().expect("header fixed above");
        let row: Vec<&str> = header
            .iter()
            .map(|column| {
                if column == &self.id_column {
                    record.get(column).unwrap_or(record.id.as_str())
                } else {
                    record.get(column).unwrap_or("")
                }
            })
            .collect();

        self.writer.write_record(&row).map_err(store_err)?;
        // Flush per row so an interrupted run keeps everything written.
        self.writer.flush().map_err(store_io)?;
        self.keys.insert(record.id.clone());
        Ok(())
    }
}

fn store_err(error: csv::Error) -> HarvestError {
    HarvestError::Store(Box::new(error))
}

fn store_io(error: std::io::Error) -> HarvestError {
    HarvestError::Store(Box::new(error))
}
