use road_norm_rater::config::{CsvOptions, IngestConfig};
use road_norm_rater::ingest::IngestPipeline;
use road_norm_rater::norms::NormClass;
use road_norm_rater::query::distribution::MIN_RANKING_SCENARIOS;
use road_norm_rater::query::{
    ComparisonMode, DistributionMetric, FilterField, FilterSet, IndexSource, QueryEngine,
    FILTER_INDEX_FILE,
};
use road_norm_rater::store::{CacheStore, PartitionReader};
use road_norm_rater::table::Table;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const HEADER: &str = "Ldc name;Lamp info;Total flux [lm];Total power [W];Street;Road W[m];Lph [m];Delta [m];Tilt [°];Lav [cd/m2];Uo (L);Ul;TI [%];Rei;Em [lx]";

const M3_ROW: &str = "STREETLUX;LED 40W;4000;500;W10_SGL_H8;10;8;30;5;1.2;0.45;0.65;12;0.32;20";
const M1_ROW: &str = "BRIGHT;LED 80W;8000;800;W10_OPP_H10;10;10;30;0;2.5;0.5;0.8;8;0.4;40";
const NONE_ROW: &str = "DIM;LED 10W;1000;100;W7_STG_H6;7;6;25;0;0.2;0.3;0.3;25;0.2;3";

fn write_source(dir: &Path, name: &str, rows: &[&str]) -> PathBuf {
    write_csv(dir, name, HEADER, rows)
}

fn write_csv(dir: &Path, name: &str, header: &str, rows: &[&str]) -> PathBuf {
    let mut content = String::from(header);
    for row in rows {
        content.push('\n');
        content.push_str(row);
    }
    content.push('\n');
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn csv_options() -> CsvOptions {
    CsvOptions::default().with_encoding_label("utf-8").unwrap()
}

fn ingest(cache: &Path, sources: &[&PathBuf], config: &IngestConfig) -> CacheStore {
    let store = CacheStore::open(cache).unwrap();
    let pipeline = IngestPipeline::new(store.clone(), csv_options());
    let report = pipeline.ingest(sources, config);
    assert!(report.failed.is_empty(), "unexpected failures: {:?}", report.failed);
    store
}

fn text_at(table: &Table, column: &str, row: usize) -> Option<String> {
    table.texts(column).and_then(|c| c[row].clone())
}

/// Delegates to a [`CacheStore`] and counts partition reads.
struct CountingReader {
    inner: CacheStore,
    reads: Cell<usize>,
}

impl PartitionReader for CountingReader {
    fn root(&self) -> &Path {
        self.inner.root()
    }

    fn list_partitions(&self) -> anyhow::Result<Vec<PathBuf>> {
        self.inner.list_partitions()
    }

    fn schema_columns(&self, partition: &Path) -> anyhow::Result<Vec<String>> {
        self.inner.schema_columns(partition)
    }

    fn read_columns(&self, partition: &Path, columns: &[String]) -> anyhow::Result<Table> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read_columns(partition, columns)
    }

    fn read_all(&self, partition: &Path) -> anyhow::Result<Table> {
        self.reads.set(self.reads.get() + 1);
        self.inner.read_all(partition)
    }
}

fn snapshot(dir: &Path) -> Vec<(PathBuf, Vec<u8>, std::time::SystemTime)> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            files.extend(snapshot(&path));
        } else {
            let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
            files.push((path.clone(), std::fs::read(&path).unwrap(), modified));
        }
    }
    files.sort();
    files
}

#[test]
fn test_full_pipeline_classifies_and_rates() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = write_source(src.path(), "export.csv", &[M3_ROW, M1_ROW, NONE_ROW]);
    let store = ingest(cache.path(), &[&source], &IngestConfig::default());

    let mut engine = QueryEngine::new(store);
    let m3 = engine
        .query_filtered(&FilterSet::new().with(FilterField::Class, "M3"))
        .unwrap();
    assert_eq!(m3.num_rows(), 1);
    assert_eq!(text_at(&m3, "Ldc name", 0).as_deref(), Some("STREETLUX"));
    assert_eq!(text_at(&m3, "Arrangement", 0).as_deref(), Some("single-sided"));
    assert_eq!(m3.floats("Lav(M3)").unwrap()[0], Some(120.0));
    assert_eq!(m3.floats("Dp").unwrap()[0], Some(0.0833));
    assert!(!m3.has_column("Lav(M2)"));

    let all = engine.query_filtered(&FilterSet::new()).unwrap();
    let classes: Vec<_> = (0..all.num_rows())
        .map(|i| text_at(&all, "best_class", i).unwrap())
        .collect();
    assert_eq!(classes, vec!["M3", "M1", "none"]);
    assert!(all.has_column("Rei(M6)"));
}

#[test]
fn test_reingest_leaves_cache_untouched() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = write_source(src.path(), "export.csv", &[M3_ROW, M1_ROW]);
    ingest(cache.path(), &[&source], &IngestConfig::default());
    let before = snapshot(cache.path());

    let store = CacheStore::open(cache.path()).unwrap();
    let report = IngestPipeline::new(store, csv_options()).ingest(&[&source], &IngestConfig::default());
    assert_eq!(report.skipped, vec![source.clone()]);
    assert!(report.converted.is_empty());
    assert_eq!(snapshot(cache.path()), before);
}

#[test]
fn test_same_file_name_in_two_folders_gets_two_caches() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(src.path().join("a")).unwrap();
    std::fs::create_dir_all(src.path().join("b")).unwrap();
    let first = write_source(&src.path().join("a"), "export.csv", &[M3_ROW]);
    let second = write_source(&src.path().join("b"), "export.csv", &[M1_ROW]);
    let store = ingest(cache.path(), &[&first, &second], &IngestConfig::default());

    assert_ne!(store.source_dir(&first), store.source_dir(&second));
    assert_eq!(store.full_scan().unwrap().num_rows(), 2);
}

#[test]
fn test_repeated_query_is_served_from_result_cache() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = write_source(src.path(), "export.csv", &[M3_ROW, M1_ROW, NONE_ROW]);
    let store = ingest(cache.path(), &[&source], &IngestConfig::default());

    let reader = CountingReader {
        inner: store,
        reads: Cell::new(0),
    };
    let mut engine = QueryEngine::new(reader);
    let filters = FilterSet::new().with(FilterField::Class, "M3");

    let first = engine.query_filtered(&filters).unwrap();
    assert_eq!(engine.store().reads.get(), 1);
    let second = engine.query_filtered(&filters).unwrap();
    assert_eq!(engine.store().reads.get(), 1);
    assert!(Arc::ptr_eq(&first, &second));

    // An equivalent spelling normalizes to the same key.
    let third = engine
        .query_filtered(&FilterSet::from_pairs([("class", "m3"), ("Arrangement", "All")]))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(engine.store().reads.get(), 1);

    engine.clear_cache();
    engine.query_filtered(&filters).unwrap();
    assert_eq!(engine.store().reads.get(), 2);
}

#[test]
fn test_filter_index_rebuilds_only_on_signature_change() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let first = write_source(src.path(), "first.csv", &[M3_ROW, NONE_ROW]);
    let store = ingest(cache.path(), &[&first], &IngestConfig::default());
    let engine = QueryEngine::new(store);

    let (index, source) = engine.build_filter_index().unwrap();
    assert_eq!(source, IndexSource::Rebuilt);
    assert!(cache.path().join(FILTER_INDEX_FILE).exists());
    assert_eq!(index.values_for(FilterField::Class), &["All", "M3", "none"]);
    assert_eq!(index.values_for(FilterField::RoadWidth), &["All", "7", "10"]);
    assert_eq!(
        index.values_for(FilterField::Arrangement),
        &["All", "single-sided", "staggered"]
    );

    let (again, source) = engine.build_filter_index().unwrap();
    assert_eq!(source, IndexSource::Cached);
    assert_eq!(again, index);

    let second = write_source(src.path(), "second.csv", &[M1_ROW]);
    ingest(cache.path(), &[&second], &IngestConfig::default());
    let (rebuilt, source) = engine.build_filter_index().unwrap();
    assert_eq!(source, IndexSource::Rebuilt);
    assert!(rebuilt
        .values_for(FilterField::Luminaire)
        .contains(&"BRIGHT".to_string()));
}

#[test]
fn test_failing_source_is_isolated() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let missing = src.path().join("missing.csv");
    let good = write_source(src.path(), "good.csv", &[M3_ROW]);

    let store = CacheStore::open(cache.path()).unwrap();
    let report = IngestPipeline::new(store.clone(), csv_options())
        .ingest(&[&missing, &good], &IngestConfig::default());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.converted.len(), 1);

    let mut engine = QueryEngine::new(store);
    assert_eq!(engine.query_filtered(&FilterSet::new()).unwrap().num_rows(), 1);
}

#[test]
fn test_corrupt_partition_is_excluded_from_queries() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let first = write_source(src.path(), "first.csv", &[M3_ROW]);
    let second = write_source(src.path(), "second.csv", &[M1_ROW]);
    let store = ingest(cache.path(), &[&first, &second], &IngestConfig::default());

    std::fs::write(store.source_dir(&first).join("part_0.parquet"), b"garbage").unwrap();

    let mut engine = QueryEngine::new(store);
    let rows = engine.query_filtered(&FilterSet::new()).unwrap();
    assert_eq!(rows.num_rows(), 1);
    assert_eq!(text_at(&rows, "Ldc name", 0).as_deref(), Some("BRIGHT"));

    let groups = engine
        .aggregate_comparison(&FilterSet::new(), ComparisonMode::De)
        .unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].arrangement, "opposite");
}

#[test]
fn test_comparison_and_rankings() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = write_source(src.path(), "export.csv", &[M3_ROW, M1_ROW, NONE_ROW]);
    let store = ingest(cache.path(), &[&source], &IngestConfig::default());
    let engine = QueryEngine::new(store);
    let no_filters = FilterSet::new();

    let efficiency = engine
        .aggregate_comparison(&no_filters, ComparisonMode::Efficiency)
        .unwrap();
    let summary: Vec<(&str, f64, f64)> = efficiency
        .iter()
        .map(|r| (r.arrangement.as_str(), r.road_width, r.value))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("opposite", 10.0, 100.0),
            ("single-sided", 10.0, 100.0),
            ("staggered", 7.0, 0.0),
        ]
    );

    let de = engine.aggregate_comparison(&no_filters, ComparisonMode::De).unwrap();
    assert_eq!(de[0].value, 10.6667);

    let top = engine.top_fixtures(&no_filters, "single-sided", 20).unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].luminaire, "STREETLUX");
    assert_eq!(top[0].min_de, 6.6667);
    assert!(engine.top_fixtures(&no_filters, "staggered", 20).unwrap().is_empty());

    let classes = engine.class_pass_rates(&no_filters).unwrap();
    assert_eq!(classes[0].label, "M1");
    assert_eq!(classes[0].passed, 1);
    assert_eq!(classes[2].passed, 2);
    assert_eq!(classes[2].total, 3);
}

#[test]
fn test_maintenance_factor_from_config_file() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = write_source(src.path(), "export.csv", &[M3_ROW]);
    let config_path = src.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{ "maintenance_factors": { "STREETLUX | LED 40W": 0.4, "BROKEN | X": "n/a" } }"#,
    )
    .unwrap();
    let config = IngestConfig::load(&config_path).unwrap();
    assert_eq!(config.maintenance_factors.len(), 1);

    let store = ingest(cache.path(), &[&source], &config);
    let mut engine = QueryEngine::new(store);
    let rows = engine.query_filtered(&FilterSet::new()).unwrap();
    assert_eq!(text_at(&rows, "best_class", 0).as_deref(), Some("M5"));
    assert_eq!(rows.floats("Lav(M3)").unwrap()[0], Some(60.0));
}

#[test]
fn test_preview_and_full_load() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = write_source(src.path(), "export.csv", &[M3_ROW, M1_ROW, NONE_ROW]);
    let store = ingest(cache.path(), &[&source], &IngestConfig::default());
    let engine = QueryEngine::new(store);

    let preview = engine.sample_data(2).unwrap();
    assert_eq!(preview.num_rows(), 2);
    assert!(preview.has_column("Lamp info"));

    let everything = engine.all_cached_data().unwrap();
    assert_eq!(everything.num_rows(), 3);
    assert!(everything.has_column("A [m2]"));
}

#[test]
fn test_partition_listing_for_one_source() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let first = write_source(src.path(), "first.csv", &[M3_ROW]);
    let second = write_source(src.path(), "second.csv", &[M1_ROW, NONE_ROW]);
    let pending = write_source(src.path(), "pending.csv", &[M3_ROW]);
    let store = CacheStore::open(cache.path()).unwrap();
    let pipeline = IngestPipeline::new(
        store.clone(),
        CsvOptions {
            batch_size: 1,
            ..csv_options()
        },
    );
    pipeline.ingest(&[&first, &second], &IngestConfig::default());

    let own = store.list_partitions_for(Some(&second)).unwrap();
    assert_eq!(own.len(), 2);
    assert!(own.iter().all(|p| p.parent() == Some(store.source_dir(&second).as_path())));
    assert_eq!(store.list_partitions_for(Some(&first)).unwrap().len(), 1);
    assert!(store.list_partitions_for(Some(&pending)).unwrap().is_empty());
    assert_eq!(store.list_partitions_for(None).unwrap().len(), 3);

    let engine = QueryEngine::new(store);
    let preview = engine.source_preview(&second, 10).unwrap();
    assert_eq!(preview.num_rows(), 2);
    assert_eq!(text_at(&preview, "Ldc name", 0).as_deref(), Some("BRIGHT"));
    assert!(engine.source_preview(&pending, 10).unwrap().is_empty());
}

#[test]
fn test_filter_on_uncached_column_reads_no_partition() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let without_tilt = |line: &str| {
        let mut fields: Vec<&str> = line.split(';').collect();
        fields.remove(8);
        fields.join(";")
    };
    let header = without_tilt(HEADER);
    let row = without_tilt(M3_ROW);
    let source = write_csv(src.path(), "flat.csv", &header, &[&row]);
    let store = ingest(cache.path(), &[&source], &IngestConfig::default());

    let reader = CountingReader {
        inner: store,
        reads: Cell::new(0),
    };
    let mut engine = QueryEngine::new(reader);
    let schema = engine.discover_schema().unwrap();
    assert!(schema.contains("Ldc name"));
    assert!(!schema.contains("Tilt [°]"));

    let tilted = engine
        .query_filtered(&FilterSet::new().with(FilterField::Tilt, "5"))
        .unwrap();
    assert!(tilted.is_empty());
    assert_eq!(engine.store().reads.get(), 0);

    let all = engine.query_filtered(&FilterSet::new()).unwrap();
    assert_eq!(all.num_rows(), 1);
    assert!(!all.has_column("Tilt [°]"));
    assert_eq!(engine.store().reads.get(), 1);
}

#[test]
fn test_compliance_distributions_and_efficacy_ranking() {
    let src = tempfile::tempdir().unwrap();
    let cache = tempfile::tempdir().unwrap();
    let source = write_source(src.path(), "export.csv", &[M3_ROW, M1_ROW, NONE_ROW]);
    let store = ingest(cache.path(), &[&source], &IngestConfig::default());
    let engine = QueryEngine::new(store);
    let no_filters = FilterSet::new();

    // 4000 lm / 500 W and 8000 lm / 800 W comply with M3; 1000 lm / 100 W does not.
    let efficacy = engine
        .compliance_distribution(&no_filters, DistributionMetric::Efficacy, NormClass::M3, 20)
        .unwrap();
    assert_eq!(efficacy.groups.len(), 2);
    assert!(efficacy.groups[0].compliant);
    assert_eq!(efficacy.groups[0].count, 2);
    assert_eq!(efficacy.groups[0].median, 9.0);
    assert_eq!(efficacy.groups[1].count, 1);
    assert_eq!(efficacy.groups[1].mean, 10.0);
    let stacked: u64 = efficacy
        .histogram
        .iter()
        .map(|b| b.compliant + b.non_compliant)
        .sum();
    assert_eq!(stacked, 3);

    let per_meter = engine
        .compliance_distribution(&no_filters, DistributionMetric::PowerPerMeter, NormClass::M1, 30)
        .unwrap();
    assert_eq!(per_meter.histogram.len(), 30);
    assert_eq!(per_meter.groups[0].count, 1);
    assert_eq!(per_meter.groups[1].min, 4.0);

    let flux = engine
        .compliance_distribution(
            &FilterSet::new().with(FilterField::Class, "none"),
            DistributionMetric::Flux,
            NormClass::M3,
            20,
        )
        .unwrap();
    assert_eq!(flux.groups.len(), 1);
    assert!(!flux.groups[0].compliant);
    assert_eq!(flux.groups[0].max, 1000.0);

    // Too few scenarios per luminaire for a ranking.
    assert!(engine.efficacy_ranking(&no_filters, NormClass::M3, 15).unwrap().is_empty());

    let mut rows = Vec::new();
    for _ in 0..MIN_RANKING_SCENARIOS {
        rows.extend([M3_ROW, M1_ROW, NONE_ROW]);
    }
    let many = write_source(src.path(), "many.csv", &rows);
    let many_cache = tempfile::tempdir().unwrap();
    let store = ingest(many_cache.path(), &[&many], &IngestConfig::default());
    let engine = QueryEngine::new(store);
    let ranks = engine
        .efficacy_ranking(&FilterSet::new().with(FilterField::Luminaire, "BRIGHT"), NormClass::M3, 15)
        .unwrap();
    assert_eq!(ranks.len(), 1);
    assert_eq!(ranks[0].luminaire, "BRIGHT");
    assert_eq!(ranks[0].mean_efficacy, 10.0);
    assert_eq!(ranks[0].scenarios, MIN_RANKING_SCENARIOS);
}
