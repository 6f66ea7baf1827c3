//! Output formatting and persistence for query results.
//!
//! Supports JSON printing and CSV export.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::table::Table;
use csv::WriterBuilder;

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes a [`Table`] as CSV with a header row. Nulls become empty cells.
pub fn write_table<W: Write>(writer: W, table: &Table) -> Result<()> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(writer);
    writer.write_record(table.column_names())?;
    let columns: Vec<_> = table.columns().map(|(_, c)| c).collect();
    for row in 0..table.num_rows() {
        writer.write_record(columns.iter().map(|c| c.display(row).unwrap_or_default()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Exports a [`Table`] to a CSV file, replacing any existing file.
pub fn write_table_csv(path: &Path, table: &Table) -> Result<()> {
    debug!(path = %path.display(), rows = table.num_rows(), "Writing CSV export");
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_table(file, table)
}

/// Writes serializable records (one row each) to a CSV file.
pub fn write_records<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    debug!(path = %path.display(), records = records.len(), "Writing CSV records");
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}
