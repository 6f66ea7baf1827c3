//! Chunked CSV to Parquet ingestion with per-source failure isolation.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{CsvOptions, IngestConfig};
use crate::enrich::{FileContext, RowEnricher};
use crate::ingest::reader::CsvBatchReader;
use crate::store::partition::write_partition;
use crate::store::{CacheStore, Manifest, partition_file};

/// Progress notifications emitted while an ingest run advances.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum IngestEvent {
    Started {
        source: PathBuf,
        index: usize,
        total: usize,
    },
    Skipped {
        source: PathBuf,
    },
    Completed {
        source: PathBuf,
        rows: usize,
        partitions: usize,
        elapsed_ms: u128,
    },
    Failed {
        source: PathBuf,
        error: String,
    },
    Finished {
        report: IngestReport,
    },
}

/// Outcome of converting one source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSummary {
    pub source: PathBuf,
    pub cache_dir: PathBuf,
    /// Columns in the source header.
    pub columns: usize,
    pub rows: usize,
    pub partitions: usize,
    pub warnings: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub converted: Vec<SourceSummary>,
    pub skipped: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, String)>,
    pub elapsed_ms: u128,
}

impl IngestReport {
    pub fn total_rows(&self) -> usize {
        self.converted.iter().map(|s| s.rows).sum()
    }
}

/// Converts source CSV files into cached, enriched partitions.
#[derive(Debug, Clone)]
pub struct IngestPipeline {
    store: CacheStore,
    csv: CsvOptions,
}

impl IngestPipeline {
    pub fn new(store: CacheStore, csv: CsvOptions) -> Self {
        Self { store, csv }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn ingest<P: AsRef<Path>>(&self, sources: &[P], config: &IngestConfig) -> IngestReport {
        self.ingest_with(sources, config, |_| {})
    }

    /// Ingests every source, reporting progress through `notify`.
    ///
    /// Sources whose cache directory is complete are skipped. A failing
    /// source is logged, recorded in the report and does not stop the run.
    #[tracing::instrument(skip_all, fields(sources = sources.len()))]
    pub fn ingest_with<P, F>(&self, sources: &[P], config: &IngestConfig, mut notify: F) -> IngestReport
    where
        P: AsRef<Path>,
        F: FnMut(&IngestEvent),
    {
        let start = Instant::now();
        let enricher = RowEnricher::new(config.clone());
        let mut report = IngestReport::default();
        for (luminaire, factor) in config.maintenance_factors.iter() {
            debug!(luminaire, factor, "Maintenance factor configured");
        }

        for (index, source) in sources.iter().enumerate() {
            let source = source.as_ref().to_path_buf();
            let dir = self.store.source_dir(&source);

            if Manifest::is_complete(&dir) {
                info!(source = %source.display(), "Already cached, skipping");
                notify(&IngestEvent::Skipped {
                    source: source.clone(),
                });
                report.skipped.push(source);
                continue;
            }

            notify(&IngestEvent::Started {
                source: source.clone(),
                index,
                total: sources.len(),
            });
            match self.ingest_source(&source, &dir, &enricher) {
                Ok(summary) => {
                    notify(&IngestEvent::Completed {
                        source: source.clone(),
                        rows: summary.rows,
                        partitions: summary.partitions,
                        elapsed_ms: summary.elapsed_ms,
                    });
                    report.converted.push(summary);
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    error!(source = %source.display(), error = %message, "Conversion failed");
                    if dir.exists() {
                        if let Err(cleanup) = std::fs::remove_dir_all(&dir) {
                            warn!(dir = %dir.display(), error = %cleanup, "Cannot remove partial cache directory");
                        }
                    }
                    notify(&IngestEvent::Failed {
                        source: source.clone(),
                        error: message.clone(),
                    });
                    report.failed.push((source, message));
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis();
        info!(
            converted = report.converted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            rows = report.total_rows(),
            elapsed_ms = report.elapsed_ms as u64,
            "Ingest finished"
        );
        notify(&IngestEvent::Finished {
            report: report.clone(),
        });
        report
    }

    #[tracing::instrument(skip_all, fields(source = %source.display()))]
    fn ingest_source(&self, source: &Path, dir: &Path, enricher: &RowEnricher) -> Result<SourceSummary> {
        let start = Instant::now();
        if dir.exists() {
            warn!(dir = %dir.display(), "Removing incomplete cache directory");
            std::fs::remove_dir_all(dir)
                .with_context(|| format!("removing incomplete {}", dir.display()))?;
        }
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

        let reader = CsvBatchReader::open(source, self.csv)?;
        let columns = reader.headers().len();
        debug!(columns = ?reader.headers(), "Source columns");
        let mut ctx = FileContext::new(source.display().to_string());
        let mut partitions = 0;
        for batch in reader {
            let enriched = enricher.enrich(batch?, &mut ctx);
            let path = dir.join(partition_file(partitions));
            write_partition(&path, &enriched)
                .with_context(|| format!("writing partition {}", path.display()))?;
            partitions += 1;
            info!(partition = partitions, rows = ctx.rows, "Batch written");
        }

        Manifest {
            source: source.display().to_string(),
            partitions,
            rows: ctx.rows,
            completed_at: Utc::now(),
        }
        .write(dir)?;

        let elapsed_ms = start.elapsed().as_millis();
        info!(
            rows = ctx.rows,
            partitions,
            warnings = ctx.warnings,
            elapsed_ms = elapsed_ms as u64,
            "Source converted"
        );
        Ok(SourceSummary {
            source: source.to_path_buf(),
            cache_dir: dir.to_path_buf(),
            columns,
            rows: ctx.rows,
            partitions,
            warnings: ctx.warnings,
            elapsed_ms,
        })
    }
}
