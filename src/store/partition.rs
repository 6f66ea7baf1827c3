//! Parquet encoding/decoding of enriched batches.
//!
//! Every column is stored as nullable Float64 or Utf8. Readers tolerate other
//! physical types by casting, so partitions written by older tools still load.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::table::{Column, Table};

const READ_BATCH_SIZE: usize = 65_536;

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build()
}

fn to_record_batch(table: &Table) -> Result<RecordBatch> {
    let mut fields = Vec::with_capacity(table.num_columns());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.num_columns());
    for (name, column) in table.columns() {
        match column {
            Column::Float(values) => {
                fields.push(Field::new(name, DataType::Float64, true));
                arrays.push(Arc::new(Float64Array::from(values.clone())));
            }
            Column::Text(values) => {
                fields.push(Field::new(name, DataType::Utf8, true));
                arrays.push(Arc::new(StringArray::from(values.clone())));
            }
        }
    }
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)?)
}

/// Writes `table` as a single Parquet file.
///
/// The file is written under a temporary name and renamed into place, so a
/// partition path only ever holds a complete file.
pub fn write_partition(path: &Path, table: &Table) -> Result<()> {
    let batch = to_record_batch(table)?;
    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties()))
        .context("parquet writer init failed")?;
    writer.write(&batch).context("parquet write failed")?;
    writer.close().context("parquet close failed")?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

/// Column names stored in a partition, read from the footer only.
pub fn schema_columns(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet footer of {}", path.display()))?;
    Ok(builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect())
}

fn to_column(array: &ArrayRef) -> Result<Column> {
    match array.data_type() {
        DataType::Utf8 | DataType::LargeUtf8 | DataType::Utf8View => {
            let casted = cast(array, &DataType::Utf8)?;
            let strings = casted
                .as_any()
                .downcast_ref::<StringArray>()
                .context("column is not a StringArray")?;
            Ok(Column::Text(
                strings.iter().map(|v| v.map(str::to_string)).collect(),
            ))
        }
        DataType::Float64 => {
            let floats = array
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("column is not a Float64Array")?;
            Ok(Column::Float(floats.iter().collect()))
        }
        t if t.is_numeric() || *t == DataType::Boolean => {
            let casted = cast(array, &DataType::Float64)?;
            let floats = casted
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("cast to Float64 failed")?;
            Ok(Column::Float(floats.iter().collect()))
        }
        _ => {
            let casted = cast(array, &DataType::Utf8)?;
            let strings = casted
                .as_any()
                .downcast_ref::<StringArray>()
                .context("cast to Utf8 failed")?;
            Ok(Column::Text(
                strings.iter().map(|v| v.map(str::to_string)).collect(),
            ))
        }
    }
}

fn from_record_batch(batch: &RecordBatch) -> Result<Table> {
    let schema = batch.schema();
    let mut table = Table::new();
    for (field, array) in schema.fields().iter().zip(batch.columns()) {
        let column = to_column(array)
            .with_context(|| format!("decoding column '{}'", field.name()))?;
        table.insert(field.name().clone(), column)?;
    }
    Ok(table)
}

/// Reads a partition, decoding only `columns` when given.
///
/// Requested columns absent from the file are skipped, so the result holds
/// the intersection of the request and the stored schema.
pub fn read_partition(path: &Path, columns: Option<&[String]>) -> Result<Table> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .with_context(|| format!("reading parquet footer of {}", path.display()))?
        .with_batch_size(READ_BATCH_SIZE);

    if let Some(wanted) = columns {
        let indices: Vec<usize> = builder
            .schema()
            .fields()
            .iter()
            .enumerate()
            .filter(|(_, f)| wanted.iter().any(|w| w == f.name()))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Ok(Table::new());
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), indices);
        builder = builder.with_projection(mask);
    }

    let reader = builder
        .build()
        .with_context(|| format!("building parquet reader for {}", path.display()))?;
    let mut tables = Vec::new();
    for batch in reader {
        let batch = batch.with_context(|| format!("reading batch of {}", path.display()))?;
        tables.push(from_record_batch(&batch)?);
    }
    Ok(Table::concat(&tables))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_columns([
            (
                "Ldc name",
                Column::Text(vec![Some("A".into()), None, Some("C".into())]),
            ),
            ("Lav [cd/m2]", Column::Float(vec![Some(1.5), Some(0.7), None])),
            ("De", Column::Float(vec![Some(3.0), Some(2.0), Some(1.0)])),
        ])
        .unwrap()
    }

    #[test]
    fn test_partition_preserves_nulls_and_kinds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part_0.parquet");
        write_partition(&path, &sample()).unwrap();
        assert!(!dir.path().join("part_0.parquet.tmp").exists());

        let back = read_partition(&path, None).unwrap();
        assert_eq!(back, sample());
    }

    #[test]
    fn test_projection_skips_absent_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part_0.parquet");
        write_partition(&path, &sample()).unwrap();

        let wanted = vec!["De".to_string(), "Missing".to_string()];
        let back = read_partition(&path, Some(wanted.as_slice())).unwrap();
        assert_eq!(back.column_names().collect::<Vec<_>>(), vec!["De"]);
        assert_eq!(back.num_rows(), 3);

        let none = read_partition(&path, Some(&["Nope".to_string()][..])).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_schema_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part_0.parquet");
        write_partition(&path, &sample()).unwrap();
        assert_eq!(
            schema_columns(&path).unwrap(),
            vec!["Ldc name", "Lav [cd/m2]", "De"]
        );
    }

    #[test]
    fn test_corrupt_partition_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part_0.parquet");
        std::fs::write(&path, b"not parquet").unwrap();
        assert!(read_partition(&path, None).is_err());
        assert!(schema_columns(&path).is_err());
    }
}
