//! Maintenance-factor correction of photometric outputs.

use crate::config::{BASELINE_MAINTENANCE_FACTOR, MaintenanceFactors, luminaire_key};
use crate::enrich::FileContext;
use crate::table::{Table, columns};
use tracing::{info, warn};

/// Columns scaled by `factor / baseline`.
pub const SCALED_COLUMNS: [&str; 7] = [
    columns::LAV,
    columns::LMIN,
    columns::LMAX,
    columns::EM,
    columns::EAV,
    columns::EMIN,
    columns::EMAX,
];

/// Rescales luminance and illuminance outputs of rows whose luminaire has a
/// user-supplied maintenance factor.
///
/// The batch is returned untouched when every row's multiplier is exactly
/// 1.0; in that case no per-luminaire correction is logged either.
pub fn apply_maintenance_factor(
    mut batch: Table,
    factors: &MaintenanceFactors,
    ctx: &mut FileContext,
) -> Table {
    if factors.is_empty() {
        return batch;
    }
    let (Some(names), Some(lamps)) = (
        batch.texts(columns::LUMINAIRE),
        batch.texts(columns::LAMP),
    ) else {
        if ctx.warn_once("maintenance-key") {
            warn!(source = %ctx.source, "Missing luminaire or lamp column, maintenance factors not applied");
        }
        return batch;
    };

    let keys: Vec<String> = names
        .iter()
        .zip(lamps)
        .map(|(n, l)| luminaire_key(n.as_deref().unwrap_or(""), l.as_deref().unwrap_or("")))
        .collect();
    let multipliers: Vec<f64> = keys
        .iter()
        .map(|k| factors.factor_for(k) / BASELINE_MAINTENANCE_FACTOR)
        .collect();

    if multipliers.iter().all(|m| *m == 1.0) {
        return batch;
    }

    for (key, multiplier) in keys.iter().zip(&multipliers) {
        if *multiplier != 1.0 && ctx.corrected_luminaires.insert(key.clone()) {
            info!(
                source = %ctx.source,
                luminaire = %key,
                factor = factors.factor_for(key),
                multiplier = %format!("{:.2}", multiplier),
                "Photometry corrected for maintenance factor"
            );
        }
    }

    for name in SCALED_COLUMNS {
        if let Some(values) = batch.floats_mut(name) {
            for (value, multiplier) in values.iter_mut().zip(&multipliers) {
                if *multiplier != 1.0 {
                    if let Some(v) = value {
                        *v *= multiplier;
                    }
                }
            }
        }
    }
    batch
}
