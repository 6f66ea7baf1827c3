//! Distinct filter values across the cache, persisted with a staleness signature.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::query::filters::{ALL, FilterField};
use crate::store::PartitionReader;
use crate::table::{Column, format_number};

pub const FILTER_INDEX_FILE: &str = "_filters_cache.json";

/// Identity of one partition file for staleness checks.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub path: String,
    pub modified: u64,
    pub size: u64,
}

/// Sorted `(path, mtime, size)` of every partition.
///
/// Files whose metadata cannot be read contribute zeros.
pub fn signature(partitions: &[PathBuf]) -> Vec<SignatureEntry> {
    let mut entries: Vec<SignatureEntry> = partitions
        .iter()
        .map(|p| {
            let (modified, size) = match std::fs::metadata(p) {
                Ok(meta) => {
                    let modified = meta
                        .modified()
                        .ok()
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_nanos() as u64)
                        .unwrap_or(0);
                    (modified, meta.len())
                }
                Err(_) => (0, 0),
            };
            SignatureEntry {
                path: p.display().to_string(),
                modified,
                size,
            }
        })
        .collect();
    entries.sort();
    entries
}

/// Menu values per filter field, each list starting with "All".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterIndex {
    pub values: BTreeMap<FilterField, Vec<String>>,
}

impl FilterIndex {
    pub fn values_for(&self, field: FilterField) -> &[String] {
        self.values.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Whether [`build_filter_index`] reused the persisted index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSource {
    Cached,
    Rebuilt,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexCacheFile {
    signature: Vec<SignatureEntry>,
    data: FilterIndex,
}

fn load_cached(path: &Path) -> Option<IndexCacheFile> {
    let content = std::fs::read(path).ok()?;
    match serde_json::from_slice(&content) {
        Ok(file) => Some(file),
        Err(e) => {
            warn!(file = %path.display(), error = %e, "Ignoring unreadable filter index cache");
            None
        }
    }
}

fn persist(path: &Path, file: &IndexCacheFile) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec(file)?)
        .with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[derive(Default)]
struct Distinct {
    text: BTreeSet<String>,
    numbers: HashSet<u64>,
}

impl Distinct {
    fn add(&mut self, column: &Column) {
        match column {
            Column::Float(values) => {
                self.numbers
                    .extend(values.iter().flatten().map(|v| (v + 0.0).to_bits()));
            }
            Column::Text(values) => {
                self.text
                    .extend(values.iter().flatten().map(|v| v.trim().to_string()));
            }
        }
    }

    /// "All" followed by numbers in numeric order, then text values.
    fn into_menu(self) -> Vec<String> {
        let mut numbers: Vec<f64> = self.numbers.into_iter().map(f64::from_bits).collect();
        numbers.sort_by(f64::total_cmp);
        std::iter::once(ALL.to_string())
            .chain(numbers.into_iter().map(format_number))
            .chain(self.text.into_iter().filter(|t| !t.is_empty()))
            .collect()
    }
}

/// Scans every partition for the distinct values of the filter fields.
///
/// A persisted index is returned as-is while the partition signature is
/// unchanged; any added, removed or modified partition triggers a rebuild.
/// Unreadable partitions are logged and left out.
#[tracing::instrument(skip_all)]
pub fn build_filter_index<S: PartitionReader + ?Sized>(store: &S) -> Result<(FilterIndex, IndexSource)> {
    let partitions = store.list_partitions()?;
    if partitions.is_empty() {
        debug!("No cached partitions, filter index is empty");
        return Ok((FilterIndex::default(), IndexSource::Rebuilt));
    }

    let cache_path = store.root().join(FILTER_INDEX_FILE);
    let signature = signature(&partitions);
    if let Some(cached) = load_cached(&cache_path) {
        if cached.signature == signature {
            debug!(partitions = partitions.len(), "Filter index is up to date");
            return Ok((cached.data, IndexSource::Cached));
        }
    }

    info!(partitions = partitions.len(), "Indexing filter values");
    let wanted: Vec<String> = FilterField::ALL_FIELDS
        .iter()
        .map(|f| f.column().to_string())
        .collect();
    let mut distinct: BTreeMap<FilterField, Distinct> = FilterField::ALL_FIELDS
        .iter()
        .map(|f| (*f, Distinct::default()))
        .collect();

    for partition in &partitions {
        let table = match store.read_columns(partition, &wanted) {
            Ok(t) => t,
            Err(e) => {
                error!(file = %partition.display(), error = %e, "Failed to index partition");
                continue;
            }
        };
        for (field, values) in distinct.iter_mut() {
            if let Some(column) = table.column(field.column()) {
                values.add(column);
            }
        }
    }

    let index = FilterIndex {
        values: distinct
            .into_iter()
            .map(|(field, values)| (field, values.into_menu()))
            .collect(),
    };
    let file = IndexCacheFile { signature, data: index };
    if let Err(e) = persist(&cache_path, &file) {
        warn!(error = %e, "Cannot persist filter index");
    }
    Ok((file.data, IndexSource::Rebuilt))
}
