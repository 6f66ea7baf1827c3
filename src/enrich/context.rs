//! Per-source-file state shared by the enrichment steps.

use std::collections::HashSet;

/// Per-source-file state threaded through the enrichment steps.
///
/// Summary logs (class distribution, efficiency means, MF corrections) and
/// missing-column warnings are emitted once per source file rather than once
/// per batch.
#[derive(Debug, Default)]
pub struct FileContext {
    pub source: String,
    pub batches: usize,
    pub rows: usize,
    pub warnings: usize,
    pub(crate) norms_logged: bool,
    pub(crate) efficiency_logged: bool,
    pub(crate) corrected_luminaires: HashSet<String>,
    reported: HashSet<&'static str>,
}

impl FileContext {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub(crate) fn warned(&mut self) {
        self.warnings += 1;
    }

    /// Counts a warning identified by `key` the first time it occurs in this
    /// file. Returns whether the caller should log it.
    pub(crate) fn warn_once(&mut self, key: &'static str) -> bool {
        let first = self.reported.insert(key);
        if first {
            self.warned();
        }
        first
    }
}
