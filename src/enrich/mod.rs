//! Row enrichment applied to every batch during ingestion.
//!
//! Four steps run in a fixed order: arrangement decoding, maintenance-factor
//! correction, norm labelling and efficiency indicators. Each step degrades
//! to a logged no-op when the columns it needs are missing, so a malformed
//! export never aborts a batch.

pub mod arrangement;
pub mod classify;
pub mod context;
pub mod efficiency;
pub mod maintenance;

pub use arrangement::{Arrangement, decode_arrangement};
pub use classify::label_norms;
pub use context::FileContext;
pub use efficiency::compute_efficiency;
pub use maintenance::apply_maintenance_factor;

use crate::config::IngestConfig;
use crate::table::Table;

/// Applies the enrichment steps with one ingest configuration.
#[derive(Debug, Clone)]
pub struct RowEnricher {
    config: IngestConfig,
}

impl RowEnricher {
    pub fn new(config: IngestConfig) -> Self {
        Self { config }
    }

    /// Runs the four steps on one batch.
    pub fn enrich(&self, batch: Table, ctx: &mut FileContext) -> Table {
        let batch = decode_arrangement(batch, ctx);
        let batch = apply_maintenance_factor(batch, &self.config.maintenance_factors, ctx);
        let batch = label_norms(batch, self.config.max_allowed_luminance_excess, ctx);
        let batch = compute_efficiency(batch, self.config.annual_burn_hours, ctx);
        ctx.batches += 1;
        ctx.rows += batch.num_rows();
        batch
    }
}
