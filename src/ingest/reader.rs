//! Streaming CSV reader producing bounded batches.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use csv::{ByteRecord, ReaderBuilder};
use tracing::{debug, warn};

use crate::config::{CsvOptions, luminaire_key};
use crate::table::{Column, Table, columns};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Text,
    Numeric,
    Inferred,
}

fn kind_of(name: &str) -> ColumnKind {
    if columns::TEXT.contains(&name) {
        ColumnKind::Text
    } else if columns::NUMERIC.contains(&name) {
        ColumnKind::Numeric
    } else {
        ColumnKind::Inferred
    }
}

fn decode(options: &CsvOptions, bytes: &[u8]) -> String {
    let (text, _) = options.encoding.decode_without_bom_handling(bytes);
    text.into_owned()
}

/// Header names decoded and trimmed; a leading UTF-8 BOM is dropped.
fn decode_headers(options: &CsvOptions, record: &ByteRecord) -> Vec<String> {
    record
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let field = if i == 0 {
                field.strip_prefix(UTF8_BOM).unwrap_or(field)
            } else {
                field
            };
            decode(options, field)
                .trim_start_matches('\u{feff}')
                .trim()
                .to_string()
        })
        .collect()
}

/// Renames repeated header names (`X`, `X.1`, `X.2`) so that no column
/// replaces an earlier one. The first occurrence keeps its name.
fn disambiguate_headers(headers: Vec<String>, source: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::with_capacity(headers.len());
    let mut out = Vec::with_capacity(headers.len());
    for name in headers {
        let mut unique = name.clone();
        let mut suffix = 0;
        while seen.contains(&unique) {
            suffix += 1;
            unique = format!("{}.{}", name, suffix);
        }
        if unique != name {
            warn!(source, column = %name, renamed = %unique, "Duplicate CSV header renamed");
        }
        seen.insert(unique.clone());
        out.push(unique);
    }
    out
}

/// Reads a delimited export as a sequence of [`Table`] batches.
///
/// At most `batch_size` rows are held at once. Known text columns are kept as
/// text, known numeric columns are parsed (unparseable cells become nulls) and
/// any other column is numeric only when every non-empty cell of the batch
/// parses.
pub struct CsvBatchReader<R: Read> {
    reader: csv::Reader<R>,
    headers: Vec<String>,
    kinds: Vec<ColumnKind>,
    options: CsvOptions,
    source: String,
    line: u64,
    done: bool,
}

impl CsvBatchReader<File> {
    pub fn open(path: &Path, options: CsvOptions) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        Self::from_reader(file, options, &path.display().to_string())
    }
}

impl<R: Read> CsvBatchReader<R> {
    pub fn from_reader(input: R, options: CsvOptions, source: &str) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(options.separator)
            .flexible(true)
            .has_headers(true)
            .from_reader(input);
        let headers = decode_headers(
            &options,
            reader
                .byte_headers()
                .with_context(|| format!("reading header of {}", source))?,
        );
        let headers = disambiguate_headers(headers, source);
        let kinds = headers.iter().map(|h| kind_of(h)).collect();
        debug!(source, columns = headers.len(), "CSV header read");
        Ok(Self {
            reader,
            headers,
            kinds,
            options,
            source: source.to_string(),
            line: 1,
            done: false,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    fn read_batch(&mut self) -> Result<Option<Table>> {
        let width = self.headers.len();
        let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); width];
        let mut record = ByteRecord::new();
        let mut rows = 0;

        while rows < self.options.batch_size.max(1) {
            let more = self
                .reader
                .read_byte_record(&mut record)
                .with_context(|| format!("{}: line {}", self.source, self.line + 1))?;
            if !more {
                self.done = true;
                break;
            }
            self.line += 1;
            for (i, column) in cells.iter_mut().enumerate() {
                let cell = record
                    .get(i)
                    .map(|raw| decode(&self.options, raw))
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty());
                column.push(cell);
            }
            rows += 1;
        }

        if rows == 0 {
            return Ok(None);
        }
        let mut table = Table::new();
        for ((name, kind), values) in self.headers.iter().zip(&self.kinds).zip(cells) {
            table.insert(name.clone(), self.build_column(*kind, values))?;
        }
        Ok(Some(table))
    }

    fn build_column(&self, kind: ColumnKind, values: Vec<Option<String>>) -> Column {
        let parse = |v: &Option<String>| v.as_deref().and_then(|s| self.options.parse_number(s));
        match kind {
            ColumnKind::Text => Column::Text(values),
            ColumnKind::Numeric => Column::Float(values.iter().map(parse).collect()),
            ColumnKind::Inferred => {
                let parsed: Vec<Option<f64>> = values.iter().map(parse).collect();
                let numeric = values
                    .iter()
                    .zip(&parsed)
                    .all(|(raw, num)| raw.is_none() || num.is_some());
                if numeric {
                    Column::Float(parsed)
                } else {
                    Column::Text(values)
                }
            }
        }
    }
}

impl<R: Read> Iterator for CsvBatchReader<R> {
    type Item = Result<Table>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_batch() {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn luminaires_in(path: &Path, options: &CsvOptions, keys: &mut BTreeSet<String>) -> Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .delimiter(options.separator)
        .flexible(true)
        .from_reader(file);
    let headers = decode_headers(options, reader.byte_headers()?);
    let position = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .with_context(|| format!("{}: missing column '{}'", path.display(), name))
    };
    let name_at = position(columns::LUMINAIRE)?;
    let lamp_at = position(columns::LAMP)?;

    let mut record = ByteRecord::new();
    while reader.read_byte_record(&mut record)? {
        let field = |i: usize| {
            record
                .get(i)
                .map(|raw| decode(options, raw).trim().to_string())
                .unwrap_or_default()
        };
        keys.insert(luminaire_key(&field(name_at), &field(lamp_at)));
    }
    Ok(())
}

/// Distinct `"<name> | <lamp>"` keys across the sources, sorted.
///
/// Only the two identifying columns are decoded. Unreadable files are skipped
/// with a warning.
pub fn unique_luminaires<P: AsRef<Path>>(sources: &[P], options: &CsvOptions) -> Vec<String> {
    let mut keys = BTreeSet::new();
    for source in sources {
        let path = source.as_ref();
        if let Err(e) = luminaires_in(path, options, &mut keys) {
            warn!(file = %path.display(), error = %e, "Skipping file while listing luminaires");
        }
    }
    keys.into_iter().collect()
}
