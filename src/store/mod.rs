//! On-disk cache of enriched partitions.
//!
//! ```text
//! <cache root>/
//! ├── _filters_cache.json        # persisted filter index + signature
//! └── <stem>_<8 hex of sha256>/  # one directory per source file
//!     ├── part_0.parquet
//!     ├── part_1.parquet
//!     └── _manifest.json         # written last, marks completion
//! ```

pub mod manifest;
pub mod partition;

pub use manifest::{MANIFEST_FILE, Manifest, partition_file, partition_index};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::table::Table;

/// Read access to cached partitions, as used by the query engine.
pub trait PartitionReader {
    /// Directory holding the cache (and the filter-index file).
    fn root(&self) -> &Path;

    /// Partitions of every complete source directory, in a stable order.
    fn list_partitions(&self) -> Result<Vec<PathBuf>>;

    /// Column names stored in one partition.
    fn schema_columns(&self, partition: &Path) -> Result<Vec<String>>;

    /// Reads the subset of `columns` the partition actually has.
    fn read_columns(&self, partition: &Path, columns: &[String]) -> Result<Table>;

    /// Reads every column of a partition.
    fn read_all(&self, partition: &Path) -> Result<Table>;
}

/// Cache directory name for a source: `{stem}_{first 8 hex of sha256(path)}`.
///
/// The hash disambiguates files with the same name in different folders.
pub fn cache_dir_name(source: &Path) -> String {
    let full = std::fs::canonicalize(source).unwrap_or_else(|_| source.to_path_buf());
    let digest = Sha256::digest(full.to_string_lossy().as_bytes());
    let hash = hex::encode(digest);
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    format!("{}_{}", stem, &hash[..8])
}

/// The Parquet-backed cache rooted at one directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
}

impl CacheStore {
    /// Opens (creating if needed) the cache root.
    ///
    /// # Errors
    ///
    /// Fails when the root directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating cache root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn source_dir(&self, source: &Path) -> PathBuf {
        self.root.join(cache_dir_name(source))
    }

    /// Complete source directories, sorted by name.
    pub fn source_dirs(&self) -> Result<Vec<PathBuf>> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("listing {}", self.root.display()))?
        {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            if Manifest::is_complete(&path) {
                dirs.push(path);
            } else {
                debug!(dir = %path.display(), "Skipping incomplete cache directory");
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    /// Partitions of one directory, ordered by their index.
    fn partitions_in(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut parts: Vec<(usize, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let entry = entry?;
            if let Some(index) = entry.file_name().to_str().and_then(partition_index) {
                parts.push((index, entry.path()));
            }
        }
        parts.sort();
        Ok(parts.into_iter().map(|(_, p)| p).collect())
    }

    /// Partition files, optionally restricted to the cache of one source.
    pub fn list_partitions_for(&self, source_filter: Option<&Path>) -> Result<Vec<PathBuf>> {
        let dirs = match source_filter {
            Some(source) => {
                let dir = self.source_dir(source);
                if Manifest::is_complete(&dir) {
                    vec![dir]
                } else {
                    Vec::new()
                }
            }
            None => self.source_dirs()?,
        };
        let mut out = Vec::new();
        for dir in dirs {
            match Self::partitions_in(&dir) {
                Ok(parts) => out.extend(parts),
                Err(e) => warn!(dir = %dir.display(), error = %e, "Cannot list partitions"),
            }
        }
        Ok(out)
    }

    /// Concatenation of every partition. Expensive: prefer pruned scans.
    ///
    /// Unreadable partitions are logged and left out.
    pub fn full_scan(&self) -> Result<Table> {
        let mut tables = Vec::new();
        for partition in self.list_partitions()? {
            match self.read_all(&partition) {
                Ok(t) => tables.push(t),
                Err(e) => {
                    error!(file = %partition.display(), error = %e, "Failed to read partition")
                }
            }
        }
        Ok(Table::concat(&tables))
    }
}

impl PartitionReader for CacheStore {
    fn root(&self) -> &Path {
        &self.root
    }

    fn list_partitions(&self) -> Result<Vec<PathBuf>> {
        self.list_partitions_for(None)
    }

    fn schema_columns(&self, partition: &Path) -> Result<Vec<String>> {
        partition::schema_columns(partition)
    }

    fn read_columns(&self, partition: &Path, columns: &[String]) -> Result<Table> {
        partition::read_partition(partition, Some(columns))
    }

    fn read_all(&self, partition: &Path) -> Result<Table> {
        partition::read_partition(partition, None)
    }
}
