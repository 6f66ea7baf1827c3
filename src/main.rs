//! CLI entry point for the road lighting norm rater.
//!
//! Provides subcommands for converting simulation exports into the partition
//! cache and for querying, comparing and ranking the cached scenarios.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use road_norm_rater::config::{CsvOptions, DEFAULT_BATCH_SIZE, IngestConfig};
use road_norm_rater::ingest::IngestEvent;
use road_norm_rater::norms::NormClass;
use road_norm_rater::output::{print_json, write_records, write_table, write_table_csv};
use road_norm_rater::query::distribution::DEFAULT_RANKING_LIMIT;
use road_norm_rater::query::{ComparisonMode, DEFAULT_TOP_FIXTURES, DistributionMetric, FilterSet};
use road_norm_rater::session::{LightingAnalyzer, LogLevel};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "road_norm_rater")]
#[command(about = "Rate simulated road lighting scenarios against the M1-M6 norms", long_about = None)]
struct Cli {
    /// Cache directory (defaults to $CACHE_DIR, then "data_cache")
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct CsvArgs {
    /// Field separator of the source files
    #[arg(long, default_value_t = ';')]
    separator: char,

    /// Text encoding label of the source files (e.g. "windows-1252", "utf-8")
    #[arg(long, default_value = "windows-1252")]
    encoding: String,

    /// Numbers use a decimal comma
    #[arg(long, default_value_t = false)]
    decimal_comma: bool,

    /// Rows per partition
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

impl CsvArgs {
    fn options(&self) -> Result<CsvOptions> {
        let mut options = CsvOptions::default()
            .with_separator(self.separator)?
            .with_encoding_label(&self.encoding)?;
        options.decimal_comma = self.decimal_comma;
        options.batch_size = self.batch_size;
        Ok(options)
    }
}

#[derive(Args, Clone, Default)]
struct FilterArgs {
    /// Filter as LABEL=VALUE, e.g. "Class=M3" or "Road width [m]=10" (repeatable)
    #[arg(short, long = "filter", value_name = "LABEL=VALUE")]
    filters: Vec<String>,
}

impl FilterArgs {
    fn filter_set(&self) -> Result<FilterSet> {
        let mut pairs = Vec::with_capacity(self.filters.len());
        for raw in &self.filters {
            let Some((label, value)) = raw.split_once('=') else {
                bail!("filter '{}' is not of the form LABEL=VALUE", raw);
            };
            pairs.push((label.trim().to_string(), value.trim().to_string()));
        }
        Ok(FilterSet::from_pairs(pairs))
    }
}

#[derive(Args, Clone)]
struct DistributionArgs {
    /// Class the scenarios are checked against (M1-M6)
    #[arg(short, long, default_value = "M3")]
    class: String,

    /// Histogram bins (defaults per metric)
    #[arg(long)]
    bins: Option<usize>,

    #[command(flatten)]
    filters: FilterArgs,

    /// CSV file to export the histogram to
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert source CSV files (or directories of them) into the cache
    Ingest {
        /// Source files or directories
        #[arg(value_name = "SOURCES", required = true)]
        sources: Vec<PathBuf>,

        /// Ingest configuration JSON (maintenance factors, burn hours)
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        csv: CsvArgs,
    },
    /// List luminaire/lamp combinations found in source files
    Luminaires {
        /// Source files or directories
        #[arg(value_name = "SOURCES", required = true)]
        sources: Vec<PathBuf>,

        /// Write an ingest configuration template with the baseline factor
        #[arg(long)]
        write_config: Option<PathBuf>,

        #[command(flatten)]
        csv: CsvArgs,
    },
    /// Print the distinct values available for each filter
    Filters,
    /// Retrieve filtered scenarios
    Query {
        #[command(flatten)]
        filters: FilterArgs,

        /// CSV file to export the result to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Compare arrangements per road width
    Compare {
        #[arg(short, long, value_enum, default_value_t = ComparisonMode::Efficiency)]
        mode: ComparisonMode,

        #[command(flatten)]
        filters: FilterArgs,

        /// CSV file to export the result to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Rank luminaires by lowest De among compliant scenarios
    TopFixtures {
        /// Arrangement to rank (single-sided, opposite, staggered, other)
        #[arg(short, long)]
        arrangement: String,

        #[arg(short, long, default_value_t = DEFAULT_TOP_FIXTURES)]
        limit: usize,

        #[command(flatten)]
        filters: FilterArgs,

        /// CSV file to export the result to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Pass rates per class, and per parameter for one class
    PassRates {
        /// Class for the per-parameter restriction analysis (M1-M6)
        #[arg(short, long)]
        class: Option<String>,

        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Luminous efficacy [lm/W] of compliant vs non-compliant scenarios
    Efficacy(DistributionArgs),
    /// Power per metre of road [W/m] of compliant vs non-compliant scenarios
    PowerPerMeter(DistributionArgs),
    /// Total power of compliant vs non-compliant scenarios
    PowerCompliance(DistributionArgs),
    /// Total flux histogram split by compliance
    FluxBalance(DistributionArgs),
    /// Rank luminaires by mean luminous efficacy over compliant scenarios
    EfficacyRanking {
        /// Class the scenarios are checked against (M1-M6)
        #[arg(short, long, default_value = "M3")]
        class: String,

        #[arg(short, long, default_value_t = DEFAULT_RANKING_LIMIT)]
        limit: usize,

        #[command(flatten)]
        filters: FilterArgs,

        /// CSV file to export the result to
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Show the first rows of the cache
    Preview {
        #[arg(short = 'n', long, default_value_t = 100)]
        rows: usize,

        /// Preview the cache of this source file instead of the first one
        #[arg(short, long)]
        source: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/road_norm_rater.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("road_norm_rater.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let cache_dir = cli.cache_dir.unwrap_or_else(|| {
        PathBuf::from(std::env::var("CACHE_DIR").unwrap_or_else(|_| "data_cache".to_string()))
    });

    match cli.command {
        Commands::Ingest {
            sources,
            config,
            csv,
        } => {
            let config = match config {
                Some(path) => IngestConfig::load(&path)?,
                None => IngestConfig::default(),
            };
            let mut session = LightingAnalyzer::open(&cache_dir, csv.options()?)?;
            session.set_source_files(expand_sources(&sources)?);
            let report = session.run_ingest(config, log_event).await?;
            if !report.failed.is_empty() {
                warn!(failed = report.failed.len(), "Some sources could not be converted");
            }
        }
        Commands::Luminaires {
            sources,
            write_config,
            csv,
        } => {
            let mut session = LightingAnalyzer::open(&cache_dir, csv.options()?)?;
            session.set_source_files(expand_sources(&sources)?);
            let keys = session.get_unique_luminaires();
            print_json(&keys)?;
            if let Some(path) = write_config {
                IngestConfig::write_template(&path, &keys)?;
                info!(path = %path.display(), luminaires = keys.len(), "Config template written");
            }
        }
        Commands::Filters => {
            let session = LightingAnalyzer::open(&cache_dir, CsvOptions::default())?;
            print_json(&session.get_unique_filter_values())?;
        }
        Commands::Query { filters, output } => {
            let mut session = LightingAnalyzer::open(&cache_dir, CsvOptions::default())?;
            let filters = filters.filter_set()?;
            match output {
                Some(path) => {
                    let result = session.get_filtered_data(&filters);
                    info!(rows = result.num_rows(), columns = result.num_columns(), "Query result");
                    write_table_csv(&path, &result)?;
                    info!(path = %path.display(), "Result exported");
                }
                None => {
                    let shown = session.get_display_data(&filters);
                    write_table(std::io::stdout().lock(), &shown)?;
                }
            }
        }
        Commands::Compare {
            mode,
            filters,
            output,
        } => {
            let session = LightingAnalyzer::open(&cache_dir, CsvOptions::default())?;
            let rows = session.get_comparison_aggregate(&filters.filter_set()?, mode);
            print_json(&rows)?;
            if let Some(path) = output {
                write_records(&path, &rows)?;
            }
        }
        Commands::TopFixtures {
            arrangement,
            limit,
            filters,
            output,
        } => {
            let session = LightingAnalyzer::open(&cache_dir, CsvOptions::default())?;
            let ranks = session.get_top_fixtures(&filters.filter_set()?, &arrangement, limit);
            print_json(&ranks)?;
            if let Some(path) = output {
                write_records(&path, &ranks)?;
            }
        }
        Commands::PassRates { class, filters } => {
            let session = LightingAnalyzer::open(&cache_dir, CsvOptions::default())?;
            let filters = filters.filter_set()?;
            print_json(&session.get_class_pass_rates(&filters))?;
            if let Some(class) = class {
                let class: NormClass = class.parse()?;
                session.log(&format!("Restriction analysis for {}", class), LogLevel::Header);
                print_json(&session.get_parameter_pass_rates(&filters, class))?;
            }
        }
        Commands::Efficacy(args) => distribution(&cache_dir, DistributionMetric::Efficacy, args)?,
        Commands::PowerPerMeter(args) => {
            distribution(&cache_dir, DistributionMetric::PowerPerMeter, args)?
        }
        Commands::PowerCompliance(args) => distribution(&cache_dir, DistributionMetric::Power, args)?,
        Commands::FluxBalance(args) => distribution(&cache_dir, DistributionMetric::Flux, args)?,
        Commands::EfficacyRanking {
            class,
            limit,
            filters,
            output,
        } => {
            let class: NormClass = class.parse()?;
            let session = LightingAnalyzer::open(&cache_dir, CsvOptions::default())?;
            let ranks = session.get_efficacy_ranking(&filters.filter_set()?, class, limit);
            print_json(&ranks)?;
            if let Some(path) = output {
                write_records(&path, &ranks)?;
            }
        }
        Commands::Preview { rows, source } => {
            let session = LightingAnalyzer::open(&cache_dir, CsvOptions::default())?;
            let sample = match &source {
                Some(path) => session.get_source_preview(path, rows),
                None => session.get_sample_data(rows),
            };
            match sample {
                Some(sample) => write_table(std::io::stdout().lock(), &sample)?,
                None => warn!("Nothing cached to preview"),
            }
        }
    }

    Ok(())
}

/// Prints the compliance split of one metric, optionally exporting its histogram.
fn distribution(cache_dir: &Path, metric: DistributionMetric, args: DistributionArgs) -> Result<()> {
    let class: NormClass = args.class.parse()?;
    let bins = args.bins.unwrap_or_else(|| metric.default_bins());
    let session = LightingAnalyzer::open(cache_dir, CsvOptions::default())?;
    session.log(&format!("{} for class {}", metric, class), LogLevel::Header);
    let result = session.get_compliance_distribution(&args.filters.filter_set()?, metric, class, bins);
    print_json(&result)?;
    if let Some(path) = args.output {
        write_records(&path, &result.histogram)?;
        info!(path = %path.display(), bins = result.histogram.len(), "Histogram exported");
    }
    Ok(())
}

/// Expands directories into the `*.csv` files they contain.
fn expand_sources(sources: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for source in sources {
        if source.is_dir() {
            let mut found: Vec<PathBuf> = std::fs::read_dir(source)
                .with_context(|| format!("listing {}", source.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    p.is_file()
                        && p.extension()
                            .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"))
                })
                .collect();
            found.sort();
            info!(dir = %source.display(), files = found.len(), "Expanded source directory");
            files.extend(found);
        } else {
            files.push(source.clone());
        }
    }
    Ok(files)
}

fn log_event(event: &IngestEvent) {
    match event {
        IngestEvent::Started {
            source,
            index,
            total,
        } => info!(source = %source.display(), file = index + 1, total, "Converting"),
        IngestEvent::Skipped { source } => info!(source = %source.display(), "Skipped, already cached"),
        IngestEvent::Completed {
            source,
            rows,
            partitions,
            elapsed_ms,
        } => info!(
            source = %source.display(),
            rows,
            partitions,
            elapsed_ms = *elapsed_ms as u64,
            "Converted"
        ),
        IngestEvent::Failed { source, error } => {
            error!(source = %source.display(), error = %error, "Failed")
        }
        IngestEvent::Finished { report } => info!(
            converted = report.converted.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            rows = report.total_rows(),
            "Done"
        ),
    }
}
