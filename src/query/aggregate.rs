//! Per-partition accumulators combined after the scan.
//!
//! Each accumulator sees one filtered partition at a time and keeps only
//! partial sums and counts, so memory does not grow with the cache size.

use std::collections::HashMap;
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::enrich::classify::{photometry_at, photometry_columns};
use crate::norms::{NormClass, NormParameter, NormRequirement, classes_by_strictness, score_column};
use crate::stats::{SumCount, pct};
use crate::table::{Table, columns};

/// Luminance score at or above which a scenario meets its class.
pub const PASSING_SCORE: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// Share of scenarios meeting the luminance requirement, in percent
    Efficiency,
    /// Mean annual energy indicator
    De,
    /// Mean power density indicator
    Dp,
}

impl ComparisonMode {
    /// Column averaged by the mode; `None` for the efficiency share.
    pub fn value_column(&self) -> Option<&'static str> {
        match self {
            ComparisonMode::Efficiency => None,
            ComparisonMode::De => Some(columns::DE),
            ComparisonMode::Dp => Some(columns::DP),
        }
    }
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComparisonMode::Efficiency => f.write_str("efficiency"),
            ComparisonMode::De => f.write_str("De"),
            ComparisonMode::Dp => f.write_str("Dp"),
        }
    }
}

/// `Lav(..)` score columns of `class`, or of every class.
pub fn luminance_score_columns(class: Option<NormClass>) -> Vec<String> {
    match class {
        Some(c) => vec![score_column(NormParameter::Lav, c)],
        None => classes_by_strictness()
            .iter()
            .map(|r| score_column(NormParameter::Lav, r.class_id))
            .collect(),
    }
}

fn present<'a>(table: &'a Table, names: &[String]) -> Vec<&'a [Option<f64>]> {
    names.iter().filter_map(|n| table.floats(n)).collect()
}

/// Highest luminance score of a row across the given score columns.
fn best_score(scores: &[&[Option<f64>]], row: usize) -> Option<f64> {
    scores.iter().filter_map(|c| c[row]).reduce(f64::max)
}

/// One (arrangement, road width) group of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub arrangement: String,
    pub road_width: f64,
    pub value: f64,
    pub count: u64,
}

#[derive(Debug)]
pub struct ComparisonAccumulator {
    mode: ComparisonMode,
    score_columns: Vec<String>,
    groups: HashMap<(String, u64), SumCount>,
}

impl ComparisonAccumulator {
    pub fn new(mode: ComparisonMode, class: Option<NormClass>) -> Self {
        Self {
            mode,
            score_columns: luminance_score_columns(class),
            groups: HashMap::new(),
        }
    }

    /// Columns a partition must provide.
    pub fn columns(&self) -> Vec<String> {
        let mut wanted = vec![columns::ARRANGEMENT.to_string(), columns::ROAD_WIDTH.to_string()];
        match self.mode.value_column() {
            Some(c) => wanted.push(c.to_string()),
            None => wanted.extend(self.score_columns.iter().cloned()),
        }
        wanted
    }

    /// Folds one filtered partition in. Partitions lacking the needed
    /// columns contribute nothing.
    pub fn add(&mut self, table: &Table) {
        let (Some(arrangement), Some(width)) = (
            table.texts(columns::ARRANGEMENT),
            table.floats(columns::ROAD_WIDTH),
        ) else {
            return;
        };
        let scores = present(table, &self.score_columns);
        let values = self.mode.value_column().and_then(|c| table.floats(c));
        if values.is_none() && (self.mode != ComparisonMode::Efficiency || scores.is_empty()) {
            return;
        }

        for row in 0..table.num_rows() {
            let (Some(arr), Some(w)) = (&arrangement[row], width[row]) else {
                continue;
            };
            let value = match values {
                Some(v) => v[row],
                None => Some(
                    if best_score(&scores, row).is_some_and(|s| s >= PASSING_SCORE) {
                        1.0
                    } else {
                        0.0
                    },
                ),
            };
            if let Some(value) = value {
                self.groups
                    .entry((arr.trim().to_string(), (w + 0.0).to_bits()))
                    .or_default()
                    .push(value);
            }
        }
    }

    /// Group means ordered by arrangement then road width; efficiency is a percentage.
    pub fn finish(self) -> Vec<ComparisonRow> {
        let scale = if self.mode == ComparisonMode::Efficiency {
            100.0
        } else {
            1.0
        };
        let mut rows: Vec<ComparisonRow> = self
            .groups
            .into_iter()
            .filter_map(|((arrangement, width), acc)| {
                acc.mean().map(|mean| ComparisonRow {
                    arrangement,
                    road_width: f64::from_bits(width),
                    value: mean * scale,
                    count: acc.count,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            a.arrangement
                .cmp(&b.arrangement)
                .then(a.road_width.total_cmp(&b.road_width))
        });
        rows
    }
}

/// A luminaire and its lowest De among passing scenarios.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FixtureRank {
    pub luminaire: String,
    pub min_de: f64,
}

#[derive(Debug)]
pub struct TopFixturesAccumulator {
    arrangement: String,
    score_columns: Vec<String>,
    best: HashMap<String, f64>,
}

impl TopFixturesAccumulator {
    pub fn new(arrangement: &str, class: Option<NormClass>) -> Self {
        Self {
            arrangement: arrangement.trim().to_string(),
            score_columns: luminance_score_columns(class),
            best: HashMap::new(),
        }
    }

    pub fn columns(&self) -> Vec<String> {
        let mut wanted = vec![
            columns::ARRANGEMENT.to_string(),
            columns::LUMINAIRE.to_string(),
            columns::DE.to_string(),
        ];
        wanted.extend(self.score_columns.iter().cloned());
        wanted
    }

    pub fn add(&mut self, table: &Table) {
        let (Some(arrangement), Some(names), Some(de)) = (
            table.texts(columns::ARRANGEMENT),
            table.texts(columns::LUMINAIRE),
            table.floats(columns::DE),
        ) else {
            return;
        };
        let scores = present(table, &self.score_columns);
        if scores.is_empty() {
            return;
        }
        for row in 0..table.num_rows() {
            let matches = arrangement[row].as_deref().map(str::trim) == Some(self.arrangement.as_str());
            let passing = best_score(&scores, row).is_some_and(|s| s >= PASSING_SCORE);
            if let (true, true, Some(name), Some(value)) = (matches, passing, &names[row], de[row]) {
                self.best
                    .entry(name.clone())
                    .and_modify(|m| *m = m.min(value))
                    .or_insert(value);
            }
        }
    }

    /// Lowest `limit` luminaires by De, ascending.
    pub fn finish(self, limit: usize) -> Vec<FixtureRank> {
        let mut ranks: Vec<FixtureRank> = self
            .best
            .into_iter()
            .map(|(luminaire, min_de)| FixtureRank { luminaire, min_de })
            .collect();
        ranks.sort_by(|a, b| a.min_de.total_cmp(&b.min_de).then(a.luminaire.cmp(&b.luminaire)));
        ranks.truncate(limit);
        ranks
    }
}

/// Share of scenarios passing one criterion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassRate {
    pub label: String,
    pub passed: u64,
    pub total: u64,
    pub rate: f64,
}

impl PassRate {
    fn new(label: &str, passed: u64, total: u64) -> Self {
        Self {
            label: label.to_string(),
            passed,
            total,
            rate: pct(passed, total),
        }
    }
}

pub(crate) fn photometry_column_names() -> Vec<String> {
    NormParameter::ALL
        .iter()
        .map(|p| p.source_column().to_string())
        .collect()
}

/// Per-parameter pass counts against a single class.
#[derive(Debug)]
pub struct ParameterPassAccumulator {
    requirement: &'static NormRequirement,
    passed: [u64; 5],
    total: u64,
}

impl ParameterPassAccumulator {
    pub fn new(requirement: &'static NormRequirement) -> Self {
        Self {
            requirement,
            passed: [0; 5],
            total: 0,
        }
    }

    pub fn columns(&self) -> Vec<String> {
        photometry_column_names()
    }

    pub fn add(&mut self, table: &Table) {
        self.total += table.num_rows() as u64;
        for (i, parameter) in NormParameter::ALL.iter().enumerate() {
            if let Some(values) = table.floats(parameter.source_column()) {
                self.passed[i] += values
                    .iter()
                    .flatten()
                    .filter(|v| self.requirement.passes(*parameter, **v))
                    .count() as u64;
            }
        }
    }

    pub fn finish(self) -> Vec<PassRate> {
        NormParameter::ALL
            .iter()
            .zip(self.passed)
            .map(|(p, passed)| PassRate::new(p.short_name(), passed, self.total))
            .collect()
    }
}

/// Per-class counts of scenarios meeting all five thresholds.
#[derive(Debug, Default)]
pub struct ClassPassAccumulator {
    passed: [u64; 6],
    total: u64,
}

impl ClassPassAccumulator {
    pub fn columns(&self) -> Vec<String> {
        photometry_column_names()
    }

    pub fn add(&mut self, table: &Table) {
        self.total += table.num_rows() as u64;
        let Some(values) = photometry_columns(table) else {
            return;
        };
        for row in 0..table.num_rows() {
            let Some(photometry) = photometry_at(&values, row) else {
                continue;
            };
            for (i, requirement) in classes_by_strictness().iter().enumerate() {
                if photometry.satisfies(requirement) {
                    self.passed[i] += 1;
                }
            }
        }
    }

    pub fn finish(self) -> Vec<PassRate> {
        classes_by_strictness()
            .iter()
            .zip(self.passed)
            .map(|(r, passed)| PassRate::new(r.class_id.as_str(), passed, self.total))
            .collect()
    }
}
