//! In-memory record frame with order-preserving split and merge.
//!
//! A [`Frame`] is an ordered set of [`Record`]s plus a column order for
//! output. Every record carries the row index assigned at ingestion;
//! stages split the frame, enrich the halves independently, and merges
//! re-sort on that index so the output stream is byte-identical to the
//! input order. Cells hold strings; an absent cell is a null and is
//! written back to CSV as an empty field.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use crate::PipelineError;

/// One row, keyed by column name. Absent cells are nulls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Stable row index assigned at ingestion; only used to restore
    /// order after splits.
    pub row_index: u64,
    cells: HashMap<String, String>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new(row_index: u64) -> Self {
        Self {
            row_index,
            cells: HashMap::new(),
        }
    }

    /// Reads a cell; `None` is null.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells.get(column).map(String::as_str)
    }

    /// True when the cell holds the boolean string `"true"`.
    #[must_use]
    pub fn get_bool(&self, column: &str) -> bool {
        self.get(column) == Some("true")
    }

    /// Writes a cell. Empty values are stored as null.
    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            self.cells.remove(column);
        } else {
            self.cells.insert(column.to_string(), value);
        }
    }

    /// Writes an optional cell; `None` clears it to null.
    pub fn set_opt(&mut self, column: &str, value: Option<String>) {
        match value {
            Some(v) => self.set(column, v),
            None => {
                self.cells.remove(column);
            }
        }
    }

    /// Moves a cell to a new column name.
    pub fn rename(&mut self, from: &str, to: &str) {
        if let Some(value) = self.cells.remove(from) {
            self.cells.insert(to.to_string(), value);
        }
    }

    /// Drops a cell.
    pub fn remove(&mut self, column: &str) {
        self.cells.remove(column);
    }
}

/// An ordered set of records with a column order for output.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    columns: Vec<String>,
    records: Vec<Record>,
}

impl Frame {
    /// Creates an empty frame with the given column order.
    #[must_use]
    pub const fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            records: Vec::new(),
        }
    }

    /// Reads a CSV stream, assigning each row its ingestion index.
    /// Empty cells load as nulls.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on CSV failure.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self, PipelineError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let headers = csv_reader.headers()?.clone();
        let columns: Vec<String> = headers.iter().map(String::from).collect();

        let mut records = Vec::new();
        for (idx, row) in csv_reader.records().enumerate() {
            let row = row?;
            let mut record = Record::new(idx as u64);
            for (column, value) in columns.iter().zip(row.iter()) {
                if !value.is_empty() {
                    record.set(column, value);
                }
            }
            records.push(record);
        }

        Ok(Self { columns, records })
    }

    /// Reads a CSV file. See [`Self::from_csv_reader`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on I/O or CSV failure.
    pub fn read_csv(path: &Path) -> Result<Self, PipelineError> {
        let file = std::fs::File::open(path)?;
        let frame = Self::from_csv_reader(file)?;
        log::info!(
            "Read {} records ({} columns) from {}",
            frame.len(),
            frame.columns().len(),
            path.display()
        );
        Ok(frame)
    }

    /// Writes the frame as CSV, nulls as empty fields.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on CSV failure.
    pub fn to_csv_writer<W: Write>(&self, writer: W) -> Result<(), PipelineError> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns)?;
        for record in &self.records {
            csv_writer.write_record(
                self.columns
                    .iter()
                    .map(|column| record.get(column).unwrap_or_default()),
            )?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    /// Writes the frame to a CSV file. See [`Self::to_csv_writer`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on I/O or CSV failure.
    pub fn write_csv(&self, path: &Path) -> Result<(), PipelineError> {
        let file = std::fs::File::create(path)?;
        self.to_csv_writer(file)?;
        log::info!("Wrote {} records to {}", self.len(), path.display());
        Ok(())
    }

    /// The output column order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Whether a column exists.
    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Appends a column if absent. Existing records read as null in it.
    pub fn add_column(&mut self, name: &str) {
        if !self.has_column(name) {
            self.columns.push(name.to_string());
        }
    }

    /// Renames a column in the header and in every record.
    pub fn rename_column(&mut self, from: &str, to: &str) {
        if let Some(column) = self.columns.iter_mut().find(|c| *c == from) {
            to.clone_into(column);
        }
        for record in &mut self.records {
            record.rename(from, to);
        }
    }

    /// Drops columns from the header and from every record.
    pub fn drop_columns(&mut self, names: &[&str]) {
        self.columns.retain(|c| !names.contains(&c.as_str()));
        for record in &mut self.records {
            for name in names {
                record.remove(name);
            }
        }
    }

    /// The records in frame order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Mutable access to the records.
    pub fn records_mut(&mut self) -> &mut [Record] {
        &mut self.records
    }

    /// Consumes the frame into its records.
    #[must_use]
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Appends a record.
    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the frame has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Partitions into (matching, rest), both keeping this frame's
    /// column order.
    #[must_use]
    pub fn split<F: Fn(&Record) -> bool>(self, predicate: F) -> (Self, Self) {
        let mut matching = Self::new(self.columns.clone());
        let mut rest = Self::new(self.columns);
        for record in self.records {
            if predicate(&record) {
                matching.push(record);
            } else {
                rest.push(record);
            }
        }
        (matching, rest)
    }

    /// Diagonal concatenation: the result's columns are the union of all
    /// input columns in first-seen order, and cells absent from a
    /// sub-frame read as null. Call [`Self::sort_by_row_index`] after to
    /// restore input order.
    #[must_use]
    pub fn concat(frames: Vec<Self>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for frame in &frames {
            for column in frame.columns() {
                if !columns.iter().any(|c| c == column) {
                    columns.push(column.clone());
                }
            }
        }

        let mut merged = Self::new(columns);
        for frame in frames {
            merged.records.extend(frame.records);
        }
        merged
    }

    /// Restores ingestion order. The sort is stable and row indexes are
    /// unique, so the output order is exactly the input order.
    pub fn sort_by_row_index(&mut self) {
        self.records.sort_by_key(|r| r.row_index);
    }
}
