//! Norm compliance scoring and best-class labelling.

use crate::enrich::FileContext;
use crate::norms::{
    self, NO_CLASS, NormClass, NormParameter, NormRequirement, classes_by_strictness, score_column,
};
use crate::table::{Column, Table, columns, round_to};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Substituted for a zero threshold increment so the glare score stays finite.
pub const GLARE_ZERO_SUBSTITUTE: f64 = 0.1;

/// Percent-of-threshold score, rounded to one decimal.
///
/// For the glare parameter lower is better, so the ratio is inverted.
pub fn score(parameter: NormParameter, threshold: f64, actual: f64) -> f64 {
    let raw = if parameter.lower_is_better() {
        let denominator = if actual == 0.0 {
            GLARE_ZERO_SUBSTITUTE
        } else {
            actual
        };
        100.0 * threshold / denominator
    } else {
        100.0 * actual / threshold
    };
    round_to(raw, 1)
}

/// Raw values of the five parameters for one row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Photometry {
    pub lav: f64,
    pub uo: f64,
    pub ul: f64,
    pub ti: f64,
    pub rei: f64,
}

impl Photometry {
    pub fn value(&self, parameter: NormParameter) -> f64 {
        match parameter {
            NormParameter::Lav => self.lav,
            NormParameter::Uo => self.uo,
            NormParameter::Ul => self.ul,
            NormParameter::Ti => self.ti,
            NormParameter::Rei => self.rei,
        }
    }

    pub fn satisfies(&self, requirement: &NormRequirement) -> bool {
        NormParameter::ALL
            .iter()
            .all(|p| requirement.passes(*p, self.value(*p)))
    }
}

/// Strictest class whose five thresholds all hold.
///
/// Classes are visited loosest to strictest and each passing class
/// overwrites the label, so the final label is the strictest pass.
pub fn best_class(photometry: Option<&Photometry>) -> Option<NormClass> {
    let photometry = photometry?;
    let mut label = None;
    for requirement in classes_by_strictness().iter().rev() {
        if photometry.satisfies(requirement) {
            label = Some(requirement.class_id);
        }
    }
    label
}

/// The five raw parameter columns, in [`NormParameter::ALL`] order.
pub(crate) fn photometry_columns(table: &Table) -> Option<Vec<&[Option<f64>]>> {
    NormParameter::ALL
        .iter()
        .map(|p| table.floats(p.source_column()))
        .collect()
}

pub(crate) fn photometry_at(values: &[&[Option<f64>]], row: usize) -> Option<Photometry> {
    Some(Photometry {
        lav: values[0][row]?,
        uo: values[1][row]?,
        ul: values[2][row]?,
        ti: values[3][row]?,
        rei: values[4][row]?,
    })
}

/// Adds 30 `Param(Class)` score columns, `best_class`, the luminance
/// headroom of the best class and, when `max_luminance_excess > 0`, the
/// `Over-lit` flag.
pub fn label_norms(mut batch: Table, max_luminance_excess: f64, ctx: &mut FileContext) -> Table {
    let missing: Vec<&str> = NormParameter::ALL
        .iter()
        .map(|p| p.source_column())
        .filter(|c| batch.floats(c).is_none())
        .collect();
    if !missing.is_empty() {
        if ctx.warn_once("norm-inputs") {
            warn!(source = %ctx.source, missing = ?missing, "Missing columns for norm verification");
        }
        return batch;
    }

    let rows = batch.num_rows();
    let mut derived: Vec<(String, Column)> = Vec::with_capacity(33);
    let mut labels: Vec<Option<String>> = Vec::with_capacity(rows);
    let mut excess: Vec<Option<f64>> = Vec::with_capacity(rows);
    {
        let values: Vec<&[Option<f64>]> = NormParameter::ALL
            .iter()
            .filter_map(|p| batch.floats(p.source_column()))
            .collect();

        for requirement in classes_by_strictness() {
            for (i, parameter) in NormParameter::ALL.iter().enumerate() {
                let threshold = requirement.threshold(*parameter);
                let scores = values[i]
                    .iter()
                    .map(|v| v.map(|actual| score(*parameter, threshold, actual)))
                    .collect();
                derived.push((
                    score_column(*parameter, requirement.class_id),
                    Column::Float(scores),
                ));
            }
        }

        for row in 0..rows {
            let photometry = photometry_at(&values, row);
            match best_class(photometry.as_ref()) {
                Some(class) => {
                    labels.push(Some(class.as_str().to_string()));
                    let lav = photometry.map(|p| p.lav).unwrap_or_default();
                    let threshold = norms::requirement(class).min_avg_luminance;
                    excess.push(Some(round_to(
                        score(NormParameter::Lav, threshold, lav) - 100.0,
                        1,
                    )));
                }
                None => {
                    labels.push(Some(NO_CLASS.to_string()));
                    excess.push(None);
                }
            }
        }
    }

    if !ctx.norms_logged {
        let mut distribution: BTreeMap<&str, usize> = BTreeMap::new();
        for label in labels.iter().flatten() {
            *distribution.entry(label.as_str()).or_default() += 1;
        }
        let summary: Vec<String> = distribution
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect();
        info!(
            source = %ctx.source,
            score_columns = derived.len(),
            distribution = %summary.join(", "),
            "Norm classes assigned"
        );
        ctx.norms_logged = true;
    }

    if max_luminance_excess > 0.0 {
        let flags = excess
            .iter()
            .map(|e| e.map(|e| if e > max_luminance_excess { 1.0 } else { 0.0 }))
            .collect();
        derived.push((columns::OVER_LIT.to_string(), Column::Float(flags)));
    }
    derived.push((columns::LAV_EXCESS.to_string(), Column::Float(excess)));
    derived.push((columns::BEST_CLASS.to_string(), Column::Text(labels)));

    for (name, column) in derived {
        if let Err(e) = batch.insert(name, column) {
            warn!(source = %ctx.source, error = %e, "Failed to add norm column");
            ctx.warned();
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich::test_support::{Scenario, table_of};

    fn photometry(lav: f64, uo: f64, ul: f64, ti: f64, rei: f64) -> Photometry {
        Photometry { lav, uo, ul, ti, rei }
    }

    #[test]
    fn test_scenario_lands_in_m3() {
        let p = photometry(1.2, 0.45, 0.65, 12.0, 0.32);
        assert_eq!(best_class(Some(&p)), Some(NormClass::M3));

        let mut ctx = FileContext::new("a.csv");
        let out = label_norms(table_of(&[Scenario::default()]), 0.0, &mut ctx);
        assert_eq!(out.texts(columns::BEST_CLASS).unwrap()[0].as_deref(), Some("M3"));
        assert_eq!(out.floats("Lav(M3)").unwrap()[0], Some(120.0));
        assert_eq!(out.floats("TI(M2)").unwrap()[0], Some(83.3));
        assert_eq!(out.floats(columns::LAV_EXCESS).unwrap()[0], Some(20.0));
        assert!(!out.has_column(columns::OVER_LIT));
    }

    #[test]
    fn test_best_class_is_strictest_passing_class() {
        let grid = [
            photometry(2.5, 0.5, 0.8, 5.0, 0.4),
            photometry(1.6, 0.5, 0.8, 5.0, 0.4),
            photometry(1.2, 0.45, 0.65, 12.0, 0.32),
            photometry(0.8, 0.4, 0.6, 15.0, 0.3),
            photometry(0.6, 0.36, 0.45, 14.0, 0.31),
            photometry(0.35, 0.35, 0.4, 19.0, 0.3),
            photometry(0.2, 0.5, 0.8, 5.0, 0.4),
            photometry(3.0, 0.5, 0.8, 25.0, 0.4),
        ];
        for p in &grid {
            let label = best_class(Some(p));
            match label {
                Some(class) => {
                    assert!(p.satisfies(norms::requirement(class)));
                    for stricter in classes_by_strictness()
                        .iter()
                        .filter(|r| r.class_id < class)
                    {
                        assert!(!p.satisfies(stricter), "{p:?} also meets {}", stricter.class_id);
                    }
                }
                None => {
                    assert!(classes_by_strictness().iter().all(|r| !p.satisfies(r)));
                }
            }
        }
    }

    #[test]
    fn test_glare_score_decreases_with_ti() {
        let scores: Vec<f64> = [2.0, 5.0, 10.0, 15.0, 30.0]
            .iter()
            .map(|ti| score(NormParameter::Ti, 15.0, *ti))
            .collect();
        assert!(scores.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn test_luminance_score_increases_with_lav() {
        let scores: Vec<f64> = [0.2, 0.5, 1.0, 2.0]
            .iter()
            .map(|lav| score(NormParameter::Lav, 1.0, *lav))
            .collect();
        assert!(scores.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_zero_glare_uses_substitute() {
        assert_eq!(score(NormParameter::Ti, 10.0, 0.0), 10000.0);
    }

    #[test]
    fn test_unclassified_row_gets_none_label() {
        let mut ctx = FileContext::new("a.csv");
        let out = label_norms(
            table_of(&[Scenario { lav: 0.1, ..Default::default() }]),
            0.0,
            &mut ctx,
        );
        assert_eq!(out.texts(columns::BEST_CLASS).unwrap()[0].as_deref(), Some(NO_CLASS));
        assert_eq!(out.floats(columns::LAV_EXCESS).unwrap()[0], None);
    }

    #[test]
    fn test_over_lit_flag() {
        let mut ctx = FileContext::new("a.csv");
        let out = label_norms(
            table_of(&[
                Scenario::default(),
                Scenario { lav: 1.05, ..Default::default() },
            ]),
            10.0,
            &mut ctx,
        );
        assert_eq!(out.floats(columns::OVER_LIT).unwrap(), &[Some(1.0), Some(0.0)]);
    }

    #[test]
    fn test_missing_columns_leave_batch_unchanged() {
        let input = table_of(&[Scenario::default()]).select(&[columns::LAV, columns::UO]);
        let mut ctx = FileContext::new("a.csv");
        let out = label_norms(input.clone(), 0.0, &mut ctx);
        assert_eq!(out, input);
        assert_eq!(ctx.warnings, 1);
    }

    #[test]
    fn test_null_measurement_scores_null_and_no_class() {
        let mut table = table_of(&[Scenario::default()]);
        table.insert(columns::UL, Column::Float(vec![None])).unwrap();
        let mut ctx = FileContext::new("a.csv");
        let out = label_norms(table, 0.0, &mut ctx);
        assert_eq!(out.floats("Ul(M1)").unwrap()[0], None);
        assert_eq!(out.floats("Lav(M1)").unwrap()[0], Some(60.0));
        assert_eq!(out.texts(columns::BEST_CLASS).unwrap()[0].as_deref(), Some(NO_CLASS));
    }
}
