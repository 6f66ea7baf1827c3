//! Power and flux distributions split by compliance with one lighting class,
//! and the luminous-efficacy ranking of luminaires.
//!
//! Quantiles and shared histogram edges need the whole sample, so the
//! distribution accumulator keeps one value per matching row. The ranking
//! keeps only a running mean per luminaire.

use std::collections::HashMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::enrich::classify::{photometry_at, photometry_columns};
use crate::norms::{NormClass, NormRequirement};
use crate::query::aggregate::photometry_column_names;
use crate::stats::{SumCount, mean, quantile};
use crate::table::{Table, columns};

/// Luminaires with fewer compliant scenarios are left out of the ranking.
pub const MIN_RANKING_SCENARIOS: u64 = 5;
pub const DEFAULT_RANKING_LIMIT: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DistributionMetric {
    /// Luminous efficacy: total flux over total power [lm/W]
    Efficacy,
    /// Total power over pole spacing [W/m]
    PowerPerMeter,
    /// Total power [W]
    Power,
    /// Total flux [lm]
    Flux,
}

impl DistributionMetric {
    pub fn unit(&self) -> &'static str {
        match self {
            DistributionMetric::Efficacy => "lm/W",
            DistributionMetric::PowerPerMeter => "W/m",
            DistributionMetric::Power => "W",
            DistributionMetric::Flux => "lm",
        }
    }

    /// Histogram resolution used when the caller does not choose one.
    pub fn default_bins(&self) -> usize {
        match self {
            DistributionMetric::PowerPerMeter => 30,
            _ => 20,
        }
    }

    /// Source columns the metric is computed from.
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            DistributionMetric::Efficacy => &[columns::TOTAL_FLUX, columns::TOTAL_POWER],
            DistributionMetric::PowerPerMeter => &[columns::TOTAL_POWER, columns::POLE_SPACING],
            DistributionMetric::Power => &[columns::TOTAL_POWER],
            DistributionMetric::Flux => &[columns::TOTAL_FLUX],
        }
    }

    /// Per-row metric values; `None` when the table lacks a source column.
    ///
    /// Ratios and power keep strictly positive finite values only. Flux keeps
    /// every finite value.
    pub fn values(&self, table: &Table) -> Option<Vec<Option<f64>>> {
        let positive = |v: f64| (v.is_finite() && v > 0.0).then_some(v);
        let ratio = |numerator: &[Option<f64>], denominator: &[Option<f64>]| -> Vec<Option<f64>> {
            numerator
                .iter()
                .zip(denominator)
                .map(|(n, d)| n.zip(*d).and_then(|(n, d)| positive(n / d)))
                .collect()
        };
        let values = match self {
            DistributionMetric::Efficacy => ratio(
                table.floats(columns::TOTAL_FLUX)?,
                table.floats(columns::TOTAL_POWER)?,
            ),
            DistributionMetric::PowerPerMeter => ratio(
                table.floats(columns::TOTAL_POWER)?,
                table.floats(columns::POLE_SPACING)?,
            ),
            DistributionMetric::Power => table
                .floats(columns::TOTAL_POWER)?
                .iter()
                .map(|v| v.and_then(positive))
                .collect(),
            DistributionMetric::Flux => table
                .floats(columns::TOTAL_FLUX)?
                .iter()
                .map(|v| v.filter(|x| x.is_finite()))
                .collect(),
        };
        Some(values)
    }
}

impl fmt::Display for DistributionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DistributionMetric::Efficacy => "Luminous efficacy",
            DistributionMetric::PowerPerMeter => "Power per metre",
            DistributionMetric::Power => "Total power",
            DistributionMetric::Flux => "Total flux",
        };
        write!(f, "{label} [{}]", self.unit())
    }
}

/// Whether each row meets every threshold of `requirement`.
///
/// Rows with incomplete photometry, and every row of a table lacking a
/// photometry column, count as non-compliant.
pub fn compliance(table: &Table, requirement: &NormRequirement) -> Vec<bool> {
    match photometry_columns(table) {
        Some(values) => (0..table.num_rows())
            .map(|row| photometry_at(&values, row).is_some_and(|p| p.satisfies(requirement)))
            .collect(),
        None => vec![false; table.num_rows()],
    }
}

/// Five-number summary and mean of one compliance group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub compliant: bool,
    pub count: u64,
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

impl GroupSummary {
    fn of(compliant: bool, sorted: &[f64]) -> Option<Self> {
        Some(Self {
            compliant,
            count: sorted.len() as u64,
            min: *sorted.first()?,
            q1: quantile(sorted, 0.25)?,
            median: quantile(sorted, 0.5)?,
            q3: quantile(sorted, 0.75)?,
            max: *sorted.last()?,
            mean: mean(sorted),
        })
    }
}

/// One histogram bin with the stacked counts of both groups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub compliant: u64,
    pub non_compliant: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceDistribution {
    pub metric: DistributionMetric,
    pub class: NormClass,
    /// Compliant group first; a group without values is omitted.
    pub groups: Vec<GroupSummary>,
    pub histogram: Vec<HistogramBin>,
}

impl ComplianceDistribution {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Equal-width bins spanning both (ascending) groups. A sample with a
/// single distinct value yields one bin.
fn histogram(compliant: &[f64], non_compliant: &[f64], bins: usize) -> Vec<HistogramBin> {
    let lowest = compliant.first().into_iter().chain(non_compliant.first()).copied().reduce(f64::min);
    let highest = compliant.last().into_iter().chain(non_compliant.last()).copied().reduce(f64::max);
    let (Some(lo), Some(hi)) = (lowest, highest) else {
        return Vec::new();
    };
    let bins = if hi > lo { bins.max(1) } else { 1 };
    let width = (hi - lo) / bins as f64;

    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: lo + width * i as f64,
            upper: if i + 1 == bins { hi } else { lo + width * (i + 1) as f64 },
            compliant: 0,
            non_compliant: 0,
        })
        .collect();
    let index = |v: f64| {
        if width > 0.0 {
            (((v - lo) / width) as usize).min(bins - 1)
        } else {
            0
        }
    };
    for v in compliant {
        out[index(*v)].compliant += 1;
    }
    for v in non_compliant {
        out[index(*v)].non_compliant += 1;
    }
    out
}

/// Metric values of filtered partitions, split by compliance with one class.
#[derive(Debug)]
pub struct ComplianceDistributionAccumulator {
    metric: DistributionMetric,
    requirement: &'static NormRequirement,
    compliant: Vec<f64>,
    non_compliant: Vec<f64>,
}

impl ComplianceDistributionAccumulator {
    pub fn new(metric: DistributionMetric, requirement: &'static NormRequirement) -> Self {
        Self {
            metric,
            requirement,
            compliant: Vec::new(),
            non_compliant: Vec::new(),
        }
    }

    pub fn columns(&self) -> Vec<String> {
        let mut wanted: Vec<String> = self.metric.columns().iter().map(|c| c.to_string()).collect();
        wanted.extend(photometry_column_names());
        wanted
    }

    pub fn add(&mut self, table: &Table) {
        let Some(values) = self.metric.values(table) else {
            return;
        };
        for (value, passing) in values.into_iter().zip(compliance(table, self.requirement)) {
            match (value, passing) {
                (Some(v), true) => self.compliant.push(v),
                (Some(v), false) => self.non_compliant.push(v),
                (None, _) => {}
            }
        }
    }

    pub fn finish(mut self, bins: usize) -> ComplianceDistribution {
        self.compliant.sort_by(f64::total_cmp);
        self.non_compliant.sort_by(f64::total_cmp);
        let groups = [(true, &self.compliant), (false, &self.non_compliant)]
            .into_iter()
            .filter_map(|(compliant, values)| GroupSummary::of(compliant, values))
            .collect();
        ComplianceDistribution {
            metric: self.metric,
            class: self.requirement.class_id,
            groups,
            histogram: histogram(&self.compliant, &self.non_compliant, bins),
        }
    }
}

/// A luminaire's mean efficacy over its compliant scenarios.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EfficacyRank {
    pub luminaire: String,
    pub mean_efficacy: f64,
    pub scenarios: u64,
}

#[derive(Debug)]
pub struct EfficacyRankAccumulator {
    requirement: &'static NormRequirement,
    per_luminaire: HashMap<String, SumCount>,
}

impl EfficacyRankAccumulator {
    pub fn new(requirement: &'static NormRequirement) -> Self {
        Self {
            requirement,
            per_luminaire: HashMap::new(),
        }
    }

    pub fn columns(&self) -> Vec<String> {
        let mut wanted = vec![
            columns::LUMINAIRE.to_string(),
            columns::TOTAL_FLUX.to_string(),
            columns::TOTAL_POWER.to_string(),
        ];
        wanted.extend(photometry_column_names());
        wanted
    }

    pub fn add(&mut self, table: &Table) {
        let (Some(names), Some(efficacy)) = (
            table.texts(columns::LUMINAIRE),
            DistributionMetric::Efficacy.values(table),
        ) else {
            return;
        };
        let passing = compliance(table, self.requirement);
        for row in 0..table.num_rows() {
            if let (true, Some(name), Some(value)) = (passing[row], &names[row], efficacy[row]) {
                self.per_luminaire
                    .entry(name.trim().to_string())
                    .or_default()
                    .push(value);
            }
        }
    }

    /// Best `limit` luminaires by mean efficacy, descending, among those
    /// with at least [`MIN_RANKING_SCENARIOS`] compliant scenarios.
    pub fn finish(self, limit: usize) -> Vec<EfficacyRank> {
        let mut ranks: Vec<EfficacyRank> = self
            .per_luminaire
            .into_iter()
            .filter(|(_, acc)| acc.count >= MIN_RANKING_SCENARIOS)
            .filter_map(|(luminaire, acc)| {
                acc.mean().map(|mean_efficacy| EfficacyRank {
                    luminaire,
                    mean_efficacy,
                    scenarios: acc.count,
                })
            })
            .collect();
        ranks.sort_by(|a, b| {
            b.mean_efficacy
                .total_cmp(&a.mean_efficacy)
                .then(a.luminaire.cmp(&b.luminaire))
        });
        ranks.truncate(limit);
        ranks
    }
}
