//! Completion marker written last into every source cache directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MANIFEST_FILE: &str = "_manifest.json";

/// File name of the `index`-th partition.
pub fn partition_file(index: usize) -> String {
    format!("part_{}.parquet", index)
}

/// Index encoded in a partition file name, if it is one.
pub fn partition_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("part_")?
        .strip_suffix(".parquet")?
        .parse()
        .ok()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub source: String,
    pub partitions: usize,
    pub rows: usize,
    pub completed_at: DateTime<Utc>,
}

impl Manifest {
    pub fn write(&self, dir: &Path) -> Result<()> {
        let path = dir.join(MANIFEST_FILE);
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("renaming into {}", path.display()))?;
        Ok(())
    }

    /// Reads the manifest of `dir`; `None` when absent or unreadable.
    pub fn read(dir: &Path) -> Option<Manifest> {
        let content = std::fs::read(dir.join(MANIFEST_FILE)).ok()?;
        serde_json::from_slice(&content).ok()
    }

    /// The directory holds a manifest and every partition it lists.
    pub fn is_complete(dir: &Path) -> bool {
        match Manifest::read(dir) {
            Some(m) => (0..m.partitions).all(|i| dir.join(partition_file(i)).is_file()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_index() {
        assert_eq!(partition_index("part_12.parquet"), Some(12));
        assert_eq!(partition_index("part_x.parquet"), None);
        assert_eq!(partition_index("_manifest.json"), None);
        assert_eq!(partition_file(3), "part_3.parquet");
    }

    #[test]
    fn test_completeness_requires_listed_partitions() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!Manifest::is_complete(dir.path()));

        let manifest = Manifest {
            source: "a.csv".into(),
            partitions: 2,
            rows: 10,
            completed_at: Utc::now(),
        };
        manifest.write(dir.path()).unwrap();
        assert!(!Manifest::is_complete(dir.path()));

        std::fs::write(dir.path().join(partition_file(0)), b"x").unwrap();
        std::fs::write(dir.path().join(partition_file(1)), b"x").unwrap();
        assert!(Manifest::is_complete(dir.path()));
        assert_eq!(Manifest::read(dir.path()).unwrap(), manifest);
    }
}
