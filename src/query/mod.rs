//! Filtered and aggregated views over the partition cache.

pub mod aggregate;
pub mod cache;
pub mod distribution;
pub mod engine;
pub mod filters;
pub mod index;

pub use aggregate::{ComparisonMode, ComparisonRow, FixtureRank, PassRate};
pub use cache::ResultCache;
pub use distribution::{ComplianceDistribution, DistributionMetric, EfficacyRank};
pub use engine::{DEFAULT_TOP_FIXTURES, QueryEngine, sample_for_display};
pub use filters::{ALL, FilterField, FilterSet, QueryKey};
pub use index::{FILTER_INDEX_FILE, FilterIndex, IndexSource};
