//! Query engine over the Parquet cache: projected scans, filtered queries and aggregates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexSet;
use tracing::{debug, error, info, warn};

use crate::norms::{self, NormClass, NormParameter, all_score_columns, score_column};
use crate::query::aggregate::{
    ClassPassAccumulator, ComparisonAccumulator, ComparisonMode, ComparisonRow, FixtureRank,
    ParameterPassAccumulator, PassRate, TopFixturesAccumulator,
};
use crate::query::cache::ResultCache;
use crate::query::distribution::{
    ComplianceDistribution, ComplianceDistributionAccumulator, DistributionMetric, EfficacyRank,
    EfficacyRankAccumulator,
};
use crate::query::filters::FilterSet;
use crate::query::index::{FilterIndex, IndexSource, build_filter_index};
use crate::store::{CacheStore, PartitionReader};
use crate::table::{Table, columns};

/// Tables above this size are sampled before being handed to a renderer.
pub const DISPLAY_ROW_LIMIT: usize = 100_000;
pub const DISPLAY_SAMPLE_ROWS: usize = 50_000;
pub const SAMPLE_SEED: u64 = 42;
pub const DEFAULT_TOP_FIXTURES: usize = 20;

/// Columns every filtered query returns, besides the score columns.
pub const BASE_COLUMNS: [&str; 10] = [
    columns::ARRANGEMENT,
    columns::ROAD_WIDTH,
    columns::DE,
    columns::DP,
    columns::LUMINAIRE,
    columns::TOTAL_FLUX,
    columns::BEST_CLASS,
    columns::POLE_SPACING,
    columns::MOUNTING_HEIGHT,
    columns::TILT,
];

/// Reduces large tables to a seeded random sample for plotting.
pub fn sample_for_display(table: &Table) -> Table {
    if table.num_rows() > DISPLAY_ROW_LIMIT {
        info!(
            rows = table.num_rows(),
            sample = DISPLAY_SAMPLE_ROWS,
            "Large result, sampling for display"
        );
        table.sample(DISPLAY_SAMPLE_ROWS, SAMPLE_SEED)
    } else {
        table.clone()
    }
}

/// Answers filter and aggregate requests against cached partitions.
#[derive(Debug)]
pub struct QueryEngine<S: PartitionReader = CacheStore> {
    store: S,
    results: ResultCache,
}

impl<S: PartitionReader> QueryEngine<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            results: ResultCache::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clear_cache(&mut self) {
        self.results.clear();
    }

    pub fn build_filter_index(&self) -> Result<(FilterIndex, IndexSource)> {
        build_filter_index(&self.store)
    }

    /// Columns read for a filtered query: the base set plus the score
    /// columns of the selected class (all classes otherwise).
    pub fn query_columns(filters: &FilterSet) -> Vec<String> {
        let mut wanted: Vec<String> = BASE_COLUMNS.iter().map(|c| c.to_string()).collect();
        match filters.selected_class() {
            Some(class) => wanted.extend(
                NormParameter::ALL
                    .iter()
                    .map(|p| score_column(*p, class)),
            ),
            None => wanted.extend(all_score_columns()),
        }
        wanted
    }

    /// Reads `wanted` (plus filter columns) from every partition, applies the
    /// filters and hands each non-empty result to `visit`.
    ///
    /// Unreadable partitions are logged and skipped. Returns the number of
    /// partitions that contributed rows.
    fn scan<F>(&self, mut wanted: Vec<String>, filters: &FilterSet, mut visit: F) -> Result<usize>
    where
        F: FnMut(Table),
    {
        for column in filters.columns() {
            if !wanted.iter().any(|w| w == column) {
                wanted.push(column.to_string());
            }
        }
        let mut contributed = 0;
        for partition in self.store.list_partitions()? {
            let table = match self.store.read_columns(&partition, &wanted) {
                Ok(t) => t,
                Err(e) => {
                    error!(file = %partition.display(), error = %e, "Failed to read partition");
                    continue;
                }
            };
            let filtered = filters.apply(table);
            if !filtered.is_empty() {
                contributed += 1;
                visit(filtered);
            }
        }
        Ok(contributed)
    }

    /// Union of the column names stored across all partitions, in first-seen
    /// order. Partitions whose schema cannot be read are logged and skipped.
    pub fn discover_schema(&self) -> Result<IndexSet<String>> {
        let mut schema = IndexSet::new();
        for partition in self.store.list_partitions()? {
            match self.store.schema_columns(&partition) {
                Ok(names) => schema.extend(names),
                Err(e) => {
                    error!(file = %partition.display(), error = %e, "Failed to read partition schema")
                }
            }
        }
        Ok(schema)
    }

    /// Filtered rows, served from the result cache when the same filter
    /// set was answered recently.
    ///
    /// A filter on a column no partition stores matches nothing and is
    /// answered without reading any partition.
    #[tracing::instrument(skip_all, fields(filters = ?filters.cache_key()))]
    pub fn query_filtered(&mut self, filters: &FilterSet) -> Result<Arc<Table>> {
        let key = filters.cache_key();
        if let Some(hit) = self.results.get(&key) {
            debug!(rows = hit.num_rows(), "Result cache hit");
            return Ok(hit);
        }

        let wanted = Self::query_columns(filters);
        let schema = self.discover_schema()?;
        if !schema.is_empty() {
            let unknown: Vec<&str> = filters
                .columns()
                .into_iter()
                .filter(|c| !schema.contains(*c))
                .collect();
            if !unknown.is_empty() {
                warn!(columns = ?unknown, "Filtered column not present in the cache, no rows can match");
                return Ok(Arc::new(Table::new()));
            }
            let absent: Vec<&String> = wanted.iter().filter(|c| !schema.contains(*c)).collect();
            if !absent.is_empty() {
                debug!(columns = ?absent, "Requested columns not present in the cache");
            }
        }

        let mut parts = Vec::new();
        self.scan(wanted, filters, |t| parts.push(t))?;
        if parts.is_empty() {
            warn!("No rows match the selected filters");
            return Ok(Arc::new(Table::new()));
        }

        let result = Arc::new(Table::concat(&parts));
        info!(rows = result.num_rows(), partitions = parts.len(), "Filtered query answered");
        self.results.insert(key, Arc::clone(&result));
        Ok(result)
    }

    /// Per (arrangement, road width) summary for comparison charts.
    #[tracing::instrument(skip(self, filters))]
    pub fn aggregate_comparison(&self, filters: &FilterSet, mode: ComparisonMode) -> Result<Vec<ComparisonRow>> {
        let mut acc = ComparisonAccumulator::new(mode, filters.selected_class());
        self.scan(acc.columns(), filters, |t| acc.add(&t))?;
        let rows = acc.finish();
        info!(groups = rows.len(), "Comparison aggregated");
        Ok(rows)
    }

    /// Luminaires with the lowest De among scenarios meeting the luminance
    /// requirement in `arrangement`.
    #[tracing::instrument(skip(self, filters))]
    pub fn top_fixtures(&self, filters: &FilterSet, arrangement: &str, limit: usize) -> Result<Vec<FixtureRank>> {
        let mut acc = TopFixturesAccumulator::new(arrangement, filters.selected_class());
        self.scan(acc.columns(), filters, |t| acc.add(&t))?;
        let ranks = acc.finish(limit);
        if ranks.is_empty() {
            warn!(arrangement, "No scenario meets the luminance requirement");
        }
        Ok(ranks)
    }

    /// Share of filtered scenarios meeting each single threshold of `class`.
    #[tracing::instrument(skip(self, filters))]
    pub fn parameter_pass_rates(&self, filters: &FilterSet, class: NormClass) -> Result<Vec<PassRate>> {
        let mut acc = ParameterPassAccumulator::new(norms::requirement(class));
        self.scan(acc.columns(), filters, |t| acc.add(&t))?;
        Ok(acc.finish())
    }

    /// Share of filtered scenarios meeting all thresholds, per class.
    #[tracing::instrument(skip_all)]
    pub fn class_pass_rates(&self, filters: &FilterSet) -> Result<Vec<PassRate>> {
        let mut acc = ClassPassAccumulator::default();
        self.scan(acc.columns(), filters, |t| acc.add(&t))?;
        Ok(acc.finish())
    }

    /// Distribution of `metric` over the filtered scenarios, split by
    /// compliance with every threshold of `class`.
    #[tracing::instrument(skip(self, filters))]
    pub fn compliance_distribution(
        &self,
        filters: &FilterSet,
        metric: DistributionMetric,
        class: NormClass,
        bins: usize,
    ) -> Result<ComplianceDistribution> {
        let mut acc = ComplianceDistributionAccumulator::new(metric, norms::requirement(class));
        self.scan(acc.columns(), filters, |t| acc.add(&t))?;
        let distribution = acc.finish(bins);
        if distribution.is_empty() {
            warn!(metric = %metric, "No values to analyse for the selected filters");
        }
        Ok(distribution)
    }

    /// Luminaires ranked by mean luminous efficacy over the filtered
    /// scenarios that comply with `class`.
    #[tracing::instrument(skip(self, filters))]
    pub fn efficacy_ranking(&self, filters: &FilterSet, class: NormClass, limit: usize) -> Result<Vec<EfficacyRank>> {
        let mut acc = EfficacyRankAccumulator::new(norms::requirement(class));
        self.scan(acc.columns(), filters, |t| acc.add(&t))?;
        let ranks = acc.finish(limit);
        if ranks.is_empty() {
            warn!(class = %class.as_str(), "Too few compliant scenarios to rank luminaires");
        }
        Ok(ranks)
    }

    /// Every cached row with every column. Expensive.
    pub fn all_cached_data(&self) -> Result<Table> {
        let mut tables = Vec::new();
        for partition in self.store.list_partitions()? {
            match self.store.read_all(&partition) {
                Ok(t) => tables.push(t),
                Err(e) => {
                    error!(file = %partition.display(), error = %e, "Failed to read partition")
                }
            }
        }
        Ok(Table::concat(&tables))
    }

    /// First `n` rows of the first cached source.
    pub fn sample_data(&self, n: usize) -> Result<Table> {
        let partitions = self.store.list_partitions()?;
        let Some(first_dir) = partitions.first().and_then(|p| p.parent()).map(Path::to_path_buf)
        else {
            warn!("Cache is empty, nothing to preview");
            return Ok(Table::new());
        };
        let own: Vec<PathBuf> = partitions
            .into_iter()
            .filter(|p| p.parent() == Some(first_dir.as_path()))
            .collect();
        self.head_of(&own, n)
    }

    /// First `n` rows across `partitions`, reading no more of them than needed.
    fn head_of(&self, partitions: &[PathBuf], n: usize) -> Result<Table> {
        let mut tables = Vec::new();
        let mut rows = 0;
        for partition in partitions {
            if rows >= n {
                break;
            }
            let table = self.store.read_all(partition)?;
            rows += table.num_rows();
            tables.push(table);
        }
        Ok(Table::concat(&tables).head(n))
    }
}

impl QueryEngine<CacheStore> {
    /// First `n` rows cached for one source file. Empty when that source has
    /// no complete cache.
    pub fn source_preview(&self, source: &Path, n: usize) -> Result<Table> {
        let partitions = self.store.list_partitions_for(Some(source))?;
        if partitions.is_empty() {
            warn!(source = %source.display(), "Source has no complete cache, nothing to preview");
            return Ok(Table::new());
        }
        self.head_of(&partitions, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Column;

    #[test]
    fn test_query_columns_for_selected_class() {
        let filters = FilterSet::new().with(crate::query::FilterField::Class, "M3");
        let cols = QueryEngine::<CacheStore>::query_columns(&filters);
        assert_eq!(cols.len(), BASE_COLUMNS.len() + 5);
        assert!(cols.contains(&"TI(M3)".to_string()));
        assert!(!cols.contains(&"Lav(M2)".to_string()));

        let all = QueryEngine::<CacheStore>::query_columns(&FilterSet::new());
        assert_eq!(all.len(), BASE_COLUMNS.len() + 30);
    }

    #[test]
    fn test_sample_for_display_threshold() {
        let small = Table::from_columns([("v", Column::Float(vec![Some(1.0); 10]))]).unwrap();
        assert_eq!(sample_for_display(&small), small);

        let big = Table::from_columns([(
            "v",
            Column::Float((0..DISPLAY_ROW_LIMIT + 1).map(|i| Some(i as f64)).collect()),
        )])
        .unwrap();
        let sampled = sample_for_display(&big);
        assert_eq!(sampled.num_rows(), DISPLAY_SAMPLE_ROWS);
        assert_eq!(sampled, sample_for_display(&big));
    }
}
