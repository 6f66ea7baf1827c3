//! Facade used by presentation layers.
//!
//! Accessors never fail: errors are logged and an empty value is returned,
//! so a front end can always render something.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::config::{CsvOptions, IngestConfig};
use crate::ingest::{IngestEvent, IngestPipeline, IngestReport, spawn_ingest, unique_luminaires};
use crate::norms::NormClass;
use crate::query::{
    ComparisonMode, ComparisonRow, ComplianceDistribution, DistributionMetric, EfficacyRank,
    FilterIndex, FilterSet, FixtureRank, IndexSource, PassRate, QueryEngine, sample_for_display,
};
use crate::store::CacheStore;
use crate::table::Table;

/// Message levels understood by front-end consoles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Header,
}

pub struct LightingAnalyzer {
    sources: Vec<PathBuf>,
    csv: CsvOptions,
    engine: QueryEngine<CacheStore>,
}

impl LightingAnalyzer {
    /// Opens the cache at `cache_root`, creating it when missing.
    ///
    /// # Errors
    ///
    /// Fails when the cache root cannot be created.
    pub fn open(cache_root: impl Into<PathBuf>, csv: CsvOptions) -> Result<Self> {
        let store = CacheStore::open(cache_root).context("cache root is not usable")?;
        Ok(Self {
            sources: Vec::new(),
            csv,
            engine: QueryEngine::new(store),
        })
    }

    pub fn log(&self, message: &str, level: LogLevel) {
        match level {
            LogLevel::Info => info!("{}", message),
            LogLevel::Success => info!(kind = "success", "{}", message),
            LogLevel::Header => info!(kind = "header", "{}", message),
            LogLevel::Warning => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
    }

    /// Replaces the source list; cached query results are dropped.
    pub fn set_source_files(&mut self, paths: Vec<PathBuf>) {
        self.log(&format!("{} source files selected", paths.len()), LogLevel::Info);
        self.sources = paths;
        self.engine.clear_cache();
    }

    /// Converts the selected sources on a background worker.
    ///
    /// Events are forwarded to `on_event` as they arrive.
    pub async fn run_ingest<F>(&mut self, config: IngestConfig, mut on_event: F) -> Result<IngestReport>
    where
        F: FnMut(&IngestEvent),
    {
        if self.sources.is_empty() {
            self.log("No source files selected", LogLevel::Warning);
        }
        self.log(
            &format!("Converting {} source files", self.sources.len()),
            LogLevel::Header,
        );
        let pipeline = IngestPipeline::new(self.engine.store().clone(), self.csv);
        let (handle, mut events) = spawn_ingest(pipeline, self.sources.clone(), config);
        while let Some(event) = events.recv().await {
            on_event(&event);
        }
        let report = handle.await.context("ingest worker panicked")??;
        self.engine.clear_cache();
        self.log(
            &format!(
                "Ingest finished: {} converted, {} skipped, {} failed",
                report.converted.len(),
                report.skipped.len(),
                report.failed.len()
            ),
            LogLevel::Success,
        );
        Ok(report)
    }

    pub fn get_unique_filter_values(&self) -> FilterIndex {
        match self.engine.build_filter_index() {
            Ok((index, IndexSource::Cached)) => index,
            Ok((index, IndexSource::Rebuilt)) => {
                info!(fields = index.values.len(), "Filter index rebuilt");
                index
            }
            Err(e) => {
                error!(error = %e, "Filter indexing failed");
                FilterIndex::default()
            }
        }
    }

    pub fn get_filtered_data(&mut self, filters: &FilterSet) -> Arc<Table> {
        self.engine.query_filtered(filters).unwrap_or_else(|e| {
            error!(error = %e, "Filtered query failed");
            Arc::new(Table::new())
        })
    }

    /// Filtered rows reduced to a renderable size.
    pub fn get_display_data(&mut self, filters: &FilterSet) -> Table {
        sample_for_display(&self.get_filtered_data(filters))
    }

    pub fn get_comparison_aggregate(&self, filters: &FilterSet, mode: ComparisonMode) -> Vec<ComparisonRow> {
        self.engine
            .aggregate_comparison(filters, mode)
            .unwrap_or_else(|e| {
                error!(error = %e, %mode, "Comparison aggregate failed");
                Vec::new()
            })
    }

    pub fn get_top_fixtures(&self, filters: &FilterSet, arrangement: &str, limit: usize) -> Vec<FixtureRank> {
        self.engine
            .top_fixtures(filters, arrangement, limit)
            .unwrap_or_else(|e| {
                error!(error = %e, "Top fixtures query failed");
                Vec::new()
            })
    }

    pub fn get_parameter_pass_rates(&self, filters: &FilterSet, class: NormClass) -> Vec<PassRate> {
        self.engine
            .parameter_pass_rates(filters, class)
            .unwrap_or_else(|e| {
                error!(error = %e, "Restriction analysis failed");
                Vec::new()
            })
    }

    pub fn get_class_pass_rates(&self, filters: &FilterSet) -> Vec<PassRate> {
        self.engine.class_pass_rates(filters).unwrap_or_else(|e| {
            error!(error = %e, "Class pass rates failed");
            Vec::new()
        })
    }

    pub fn get_compliance_distribution(
        &self,
        filters: &FilterSet,
        metric: DistributionMetric,
        class: NormClass,
        bins: usize,
    ) -> ComplianceDistribution {
        self.engine
            .compliance_distribution(filters, metric, class, bins)
            .unwrap_or_else(|e| {
                error!(error = %e, %metric, "Distribution analysis failed");
                ComplianceDistribution {
                    metric,
                    class,
                    groups: Vec::new(),
                    histogram: Vec::new(),
                }
            })
    }

    pub fn get_efficacy_ranking(&self, filters: &FilterSet, class: NormClass, limit: usize) -> Vec<EfficacyRank> {
        self.engine
            .efficacy_ranking(filters, class, limit)
            .unwrap_or_else(|e| {
                error!(error = %e, "Efficacy ranking failed");
                Vec::new()
            })
    }

    pub fn get_all_cached_data(&self) -> Table {
        self.engine.all_cached_data().unwrap_or_else(|e| {
            error!(error = %e, "Loading the cache failed");
            Table::new()
        })
    }

    /// Luminaire keys of the selected sources, for the maintenance table.
    pub fn get_unique_luminaires(&self) -> Vec<String> {
        if self.sources.is_empty() {
            self.log("Cannot scan luminaires: no source files selected", LogLevel::Error);
            return Vec::new();
        }
        let keys = unique_luminaires(&self.sources, &self.csv);
        self.log(
            &format!("Found {} luminaire configurations", keys.len()),
            LogLevel::Success,
        );
        keys
    }

    pub fn get_sample_data(&self, n_rows: usize) -> Option<Table> {
        match self.engine.sample_data(n_rows) {
            Ok(t) if t.is_empty() => None,
            Ok(t) => {
                self.log(&format!("Previewing {} rows", t.num_rows()), LogLevel::Success);
                Some(t)
            }
            Err(e) => {
                self.log(&format!("Preview failed: {:#}", e), LogLevel::Error);
                None
            }
        }
    }

    /// First rows cached for one source file.
    pub fn get_source_preview(&self, source: &Path, n_rows: usize) -> Option<Table> {
        match self.engine.source_preview(source, n_rows) {
            Ok(t) if t.is_empty() => None,
            Ok(t) => Some(t),
            Err(e) => {
                self.log(&format!("Preview of {} failed: {:#}", source.display(), e), LogLevel::Error);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_round_trip() {
        let src = tempfile::tempdir().unwrap();
        let cache = tempfile::tempdir().unwrap();
        let source = src.path().join("a.csv");
        std::fs::write(
            &source,
            "Ldc name;Lamp info;Street;Road W[m];Lav [cd/m2];Uo (L);Ul;TI [%];Rei\n\
             A;L;W10_OPP;10;1.2;0.45;0.65;12;0.32\n",
        )
        .unwrap();

        let mut session = LightingAnalyzer::open(cache.path(), CsvOptions::default()).unwrap();
        assert!(session.get_unique_luminaires().is_empty());
        session.set_source_files(vec![source.clone()]);
        assert_eq!(session.get_unique_luminaires(), vec!["A | L".to_string()]);

        let mut seen = 0;
        let report = session
            .run_ingest(IngestConfig::default(), |_| seen += 1)
            .await
            .unwrap();
        assert_eq!(report.total_rows(), 1);
        assert_eq!(seen, 3);

        let data = session.get_filtered_data(&FilterSet::new());
        assert_eq!(data.num_rows(), 1);
        assert_eq!(session.get_sample_data(10).unwrap().num_rows(), 1);
        assert_eq!(session.get_all_cached_data().num_rows(), 1);
        assert_eq!(session.get_display_data(&FilterSet::new()).num_rows(), 1);
        assert_eq!(session.get_source_preview(&source, 5).unwrap().num_rows(), 1);
        assert!(session.get_source_preview(&src.path().join("other.csv"), 5).is_none());

        // The export has no power or flux columns.
        let distribution =
            session.get_compliance_distribution(&FilterSet::new(), DistributionMetric::Efficacy, NormClass::M3, 20);
        assert!(distribution.is_empty());
        assert!(session.get_efficacy_ranking(&FilterSet::new(), NormClass::M3, 15).is_empty());
    }
}
