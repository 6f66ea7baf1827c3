//! Energy-efficiency indicators Dp, De and line power per kilometre.

use crate::enrich::FileContext;
use crate::stats::mean;
use crate::table::{Column, Table, columns, round_to};
use tracing::{info, warn};

/// Substituted for a zero `Em * A` product in the Dp denominator.
pub const DP_ZERO_DENOMINATOR: f64 = 0.01;

/// Indicators for one row.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Efficiency {
    pub area: Option<f64>,
    pub dp: Option<f64>,
    pub de: Option<f64>,
    pub power_per_km: Option<f64>,
}

fn positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

/// Computes the indicators for one scenario.
///
/// Zero, negative or missing geometry yields null area-based indicators.
pub fn efficiency_of(
    power: Option<f64>,
    avg_illuminance: Option<f64>,
    road_width: Option<f64>,
    pole_spacing: Option<f64>,
    annual_burn_hours: f64,
) -> Efficiency {
    let spacing = positive(pole_spacing);
    let area = positive(road_width).zip(spacing).map(|(w, s)| w * s);

    let dp = match (power, avg_illuminance, area) {
        (Some(p), Some(em), Some(a)) => {
            let denominator = em * a;
            let denominator = if denominator == 0.0 {
                DP_ZERO_DENOMINATOR
            } else {
                denominator
            };
            Some(round_to(p / denominator, 4))
        }
        _ => None,
    };
    let de = power
        .zip(area)
        .map(|(p, a)| round_to(p * annual_burn_hours / (a * 1000.0), 4));
    let power_per_km = power
        .zip(spacing)
        .map(|(p, s)| round_to(1000.0 / s * p, 2));

    Efficiency {
        area: area.map(|a| round_to(a, 4)),
        dp: dp.filter(|v| v.is_finite()),
        de: de.filter(|v| v.is_finite()),
        power_per_km: power_per_km.filter(|v| v.is_finite()),
    }
}

/// Adds `A [m2]`, `Dp`, `De` and `Power_per_km`.
///
/// Without an `Em [lx]` column the Dp indicator is skipped; without power or
/// geometry the whole step is skipped.
pub fn compute_efficiency(mut batch: Table, annual_burn_hours: f64, ctx: &mut FileContext) -> Table {
    let (Some(power), Some(width), Some(spacing)) = (
        batch.floats(columns::TOTAL_POWER),
        batch.floats(columns::ROAD_WIDTH),
        batch.floats(columns::POLE_SPACING),
    ) else {
        if ctx.warn_once("efficiency-inputs") {
            warn!(source = %ctx.source, "Missing power or geometry columns, efficiency indicators skipped");
        }
        return batch;
    };
    let illuminance = batch.floats(columns::EM);
    let has_illuminance = illuminance.is_some();

    let indicators: Vec<Efficiency> = (0..batch.num_rows())
        .map(|i| {
            efficiency_of(
                power[i],
                illuminance.and_then(|em| em[i]),
                width[i],
                spacing[i],
                annual_burn_hours,
            )
        })
        .collect();

    if !has_illuminance && ctx.warn_once(columns::EM) {
        warn!(source = %ctx.source, "Missing 'Em [lx]' column, Dp not computed");
    }

    if !ctx.efficiency_logged {
        let dp: Vec<f64> = indicators.iter().filter_map(|e| e.dp).collect();
        let de: Vec<f64> = indicators.iter().filter_map(|e| e.de).collect();
        let per_km: Vec<f64> = indicators.iter().filter_map(|e| e.power_per_km).collect();
        info!(
            source = %ctx.source,
            avg_dp = %format!("{:.4}", mean(&dp)),
            avg_de = %format!("{:.2}", mean(&de)),
            avg_line_kw_per_km = %format!("{:.2}", mean(&per_km) / 1000.0),
            "Efficiency indicators computed"
        );
        ctx.efficiency_logged = true;
    }

    let mut derived = vec![
        (
            columns::AREA,
            Column::Float(indicators.iter().map(|e| e.area).collect()),
        ),
        (
            columns::DE,
            Column::Float(indicators.iter().map(|e| e.de).collect()),
        ),
        (
            columns::POWER_PER_KM,
            Column::Float(indicators.iter().map(|e| e.power_per_km).collect()),
        ),
    ];
    if has_illuminance {
        derived.push((
            columns::DP,
            Column::Float(indicators.iter().map(|e| e.dp).collect()),
        ));
    }
    for (name, column) in derived {
        if let Err(e) = batch.insert(name, column) {
            warn!(source = %ctx.source, error = %e, "Failed to add efficiency column");
            ctx.warned();
        }
    }
    batch
}
