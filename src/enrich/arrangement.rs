//! Pole arrangement decoding from the composite `Street` code.

use crate::enrich::FileContext;
use crate::table::{Column, Table, columns};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Arrangement {
    SingleSided,
    Opposite,
    Staggered,
    Other,
    /// The batch had no street code at all.
    Undetermined,
}

/// Substring codes, checked in order; a later match overwrites an earlier one.
const CODES: [(&str, Arrangement); 3] = [
    ("SGL", Arrangement::SingleSided),
    ("OPP", Arrangement::Opposite),
    ("STG", Arrangement::Staggered),
];

impl Arrangement {
    pub fn as_str(&self) -> &'static str {
        match self {
            Arrangement::SingleSided => "single-sided",
            Arrangement::Opposite => "opposite",
            Arrangement::Staggered => "staggered",
            Arrangement::Other => "other",
            Arrangement::Undetermined => "undetermined",
        }
    }

    pub fn from_street_code(code: &str) -> Arrangement {
        CODES
            .iter()
            .filter(|(pattern, _)| code.contains(pattern))
            .map(|(_, arrangement)| *arrangement)
            .last()
            .unwrap_or(Arrangement::Other)
    }
}

impl fmt::Display for Arrangement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Adds the `Arrangement` column decoded from `Street`.
///
/// A batch without a street column is marked undetermined as a whole.
pub fn decode_arrangement(mut batch: Table, ctx: &mut FileContext) -> Table {
    let rows = batch.num_rows();
    let decoded: Vec<Arrangement> = match batch.column(columns::STREET) {
        Some(Column::Text(streets)) => streets
            .iter()
            .map(|s| {
                s.as_deref()
                    .map(Arrangement::from_street_code)
                    .unwrap_or(Arrangement::Other)
            })
            .collect(),
        Some(Column::Float(_)) => vec![Arrangement::Other; rows],
        None => {
            if ctx.warn_once(columns::STREET) {
                warn!(source = %ctx.source, "No 'Street' column, arrangement cannot be decoded");
            }
            vec![Arrangement::Undetermined; rows]
        }
    };

    let mut counts: BTreeMap<Arrangement, usize> = BTreeMap::new();
    for a in &decoded {
        *counts.entry(*a).or_default() += 1;
    }
    let summary: Vec<String> = counts
        .iter()
        .filter(|(a, _)| !matches!(a, Arrangement::Other | Arrangement::Undetermined))
        .map(|(a, n)| format!("{a}: {n}"))
        .collect();
    if summary.is_empty() && rows > 0 {
        debug!(source = %ctx.source, "No standard arrangement (SGL/OPP/STG) recognised in batch");
    } else {
        debug!(source = %ctx.source, geometry = %summary.join(", "), "Arrangements decoded");
    }

    let column = Column::Text(
        decoded
            .into_iter()
            .map(|a| Some(a.as_str().to_string()))
            .collect(),
    );
    if let Err(e) = batch.insert(columns::ARRANGEMENT, column) {
        warn!(source = %ctx.source, error = %e, "Failed to add arrangement column");
        ctx.warned();
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streets(values: &[Option<&str>]) -> Table {
        Table::from_columns([(
            columns::STREET,
            Column::Text(values.iter().map(|v| v.map(str::to_string)).collect()),
        )])
        .unwrap()
    }

    #[test]
    fn test_from_street_code() {
        assert_eq!(Arrangement::from_street_code("W7_SGL_x"), Arrangement::SingleSided);
        assert_eq!(Arrangement::from_street_code("OPP-12"), Arrangement::Opposite);
        assert_eq!(Arrangement::from_street_code("road STG"), Arrangement::Staggered);
        assert_eq!(Arrangement::from_street_code("CENTRAL"), Arrangement::Other);
    }

    #[test]
    fn test_later_code_wins_when_several_match() {
        assert_eq!(Arrangement::from_street_code("SGL/STG"), Arrangement::Staggered);
    }

    #[test]
    fn test_decode_arrangement_column() {
        let mut ctx = FileContext::new("a.csv");
        let out = decode_arrangement(streets(&[Some("SGL"), None, Some("xx OPP")]), &mut ctx);
        let values: Vec<_> = out
            .texts(columns::ARRANGEMENT)
            .unwrap()
            .iter()
            .map(|v| v.as_deref().unwrap())
            .collect();
        assert_eq!(values, vec!["single-sided", "other", "opposite"]);
        assert_eq!(ctx.warnings, 0);
    }

    #[test]
    fn test_missing_street_marks_undetermined() {
        let batch = Table::from_columns([(columns::LAV, Column::Float(vec![Some(1.0); 2]))]).unwrap();
        let mut ctx = FileContext::new("a.csv");
        let out = decode_arrangement(batch, &mut ctx);
        assert_eq!(
            out.texts(columns::ARRANGEMENT).unwrap(),
            &[Some("undetermined".to_string()), Some("undetermined".to_string())]
        );
        assert_eq!(ctx.warnings, 1);
    }

    #[test]
    fn test_missing_street_warns_once_per_file() {
        let batch = Table::from_columns([(columns::LAV, Column::Float(vec![Some(1.0)]))]).unwrap();
        let mut ctx = FileContext::new("a.csv");
        let batch = decode_arrangement(batch.clone(), &mut ctx);
        decode_arrangement(batch, &mut ctx);
        assert_eq!(ctx.warnings, 1);
    }
}
