//! In-memory columnar batch used between the CSV reader, the enrichment
//! steps, the Parquet partitions and the query layer.

use anyhow::{Result, bail};
use indexmap::IndexMap;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Column names as they appear in the simulation export (after trimming)
/// and the derived columns added during enrichment. Units and internal
/// spacing are part of the name.
pub mod columns {
    pub const LUMINAIRE: &str = "Ldc name";
    pub const LAMP: &str = "Lamp info";
    pub const TOTAL_FLUX: &str = "Total flux [lm]";
    pub const TOTAL_POWER: &str = "Total power [W]";
    pub const STREET: &str = "Street";
    pub const POWER_PER_KM_SOURCE: &str = "Power/km  [W/km]";
    pub const ROAD_WIDTH: &str = "Road W[m]";
    pub const LUMINAIRE_POS_Y: &str = "Lum pos y [m]";
    pub const MOUNTING_HEIGHT: &str = "Lph [m]";
    pub const POLE_SPACING: &str = "Delta [m]";
    pub const TILT: &str = "Tilt [°]";
    pub const LAV: &str = "Lav [cd/m2]";
    pub const LMIN: &str = "Lmin [cd/m2]";
    pub const LMAX: &str = "Lmax [cd/m2]";
    pub const UO: &str = "Uo (L)";
    pub const UL: &str = "Ul";
    pub const TI: &str = "TI [%]";
    pub const REI: &str = "Rei";
    pub const EM: &str = "Em [lx]";
    pub const EAV: &str = "Eav [lx]";
    pub const EMIN: &str = "Emin [lx]";
    pub const EMAX: &str = "Emax [lx]";

    pub const ARRANGEMENT: &str = "Arrangement";
    pub const BEST_CLASS: &str = "best_class";
    pub const LAV_EXCESS: &str = "Lav excess [%]";
    pub const OVER_LIT: &str = "Over-lit";
    pub const AREA: &str = "A [m2]";
    pub const DP: &str = "Dp";
    pub const DE: &str = "De";
    pub const POWER_PER_KM: &str = "Power_per_km";

    /// Always read as text, even when every value happens to look numeric.
    pub const TEXT: &[&str] = &[LUMINAIRE, LAMP, STREET, ARRANGEMENT, BEST_CLASS];

    /// Always read as numbers; unparseable cells become nulls.
    pub const NUMERIC: &[&str] = &[
        TOTAL_FLUX,
        TOTAL_POWER,
        POWER_PER_KM_SOURCE,
        ROAD_WIDTH,
        LUMINAIRE_POS_Y,
        MOUNTING_HEIGHT,
        POLE_SPACING,
        TILT,
        LAV,
        LMIN,
        LMAX,
        UO,
        UL,
        TI,
        REI,
        EM,
        EAV,
        EMIN,
        EMAX,
    ];
}

#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Text(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn nulls(like: &Column, len: usize) -> Column {
        match like {
            Column::Float(_) => Column::Float(vec![None; len]),
            Column::Text(_) => Column::Text(vec![None; len]),
        }
    }

    fn take(&self, indices: &[usize]) -> Column {
        match self {
            Column::Float(v) => Column::Float(indices.iter().map(|&i| v[i]).collect()),
            Column::Text(v) => Column::Text(indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    fn into_text(self) -> Column {
        match self {
            Column::Float(v) => Column::Text(v.into_iter().map(|x| x.map(format_number)).collect()),
            text => text,
        }
    }

    /// Appends `other`, coercing to text when the kinds disagree.
    fn extend(&mut self, other: &Column) {
        if matches!((&*self, other), (Column::Float(_), Column::Text(_))) {
            *self = std::mem::replace(self, Column::Text(Vec::new())).into_text();
        }
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => a.extend_from_slice(b),
            (Column::Text(a), Column::Text(b)) => a.extend(b.iter().cloned()),
            (Column::Text(a), Column::Float(b)) => {
                a.extend(b.iter().map(|v| v.map(format_number)))
            }
            (Column::Float(_), Column::Text(_)) => unreachable!("coerced to text above"),
        }
    }

    /// Cell rendered as text, used for CSV export and filter menus.
    pub fn display(&self, row: usize) -> Option<String> {
        match self {
            Column::Float(v) => v[row].map(format_number),
            Column::Text(v) => v[row].clone(),
        }
    }
}

/// Renders a number the way filter menus and cache keys expect (`7`, `7.5`).
pub fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// An ordered set of equally long named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: IndexMap<String, Column>,
    rows: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from `(name, column)` pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if the columns differ in length.
    pub fn from_columns<I, S>(columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Column)>,
        S: Into<String>,
    {
        let mut table = Table::new();
        for (name, column) in columns {
            table.insert(name, column)?;
        }
        Ok(table)
    }

    pub fn num_rows(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Numeric column by name; `None` when absent or textual.
    pub fn floats(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.columns.get(name) {
            Some(Column::Float(v)) => Some(v),
            _ => None,
        }
    }

    /// Text column by name; `None` when absent or numeric.
    pub fn texts(&self, name: &str) -> Option<&[Option<String>]> {
        match self.columns.get(name) {
            Some(Column::Text(v)) => Some(v),
            _ => None,
        }
    }

    pub fn floats_mut(&mut self, name: &str) -> Option<&mut Vec<Option<f64>>> {
        match self.columns.get_mut(name) {
            Some(Column::Float(v)) => Some(v),
            _ => None,
        }
    }

    /// Adds or replaces a column.
    ///
    /// # Errors
    ///
    /// Returns an error if the length differs from the existing rows.
    pub fn insert(&mut self, name: impl Into<String>, column: Column) -> Result<()> {
        let name = name.into();
        let sole_column = self.columns.len() == 1 && self.columns.contains_key(&name);
        if self.columns.is_empty() || sole_column {
            self.rows = column.len();
        } else if column.len() != self.rows {
            bail!(
                "column '{}' has {} rows, table has {}",
                name,
                column.len(),
                self.rows
            );
        }
        self.columns.insert(name, column);
        Ok(())
    }

    /// Keeps rows where `mask` is true.
    pub fn filter(&self, mask: &[bool]) -> Table {
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, keep)| keep.then_some(i))
            .collect();
        self.take(&indices)
    }

    fn take(&self, indices: &[usize]) -> Table {
        Table {
            columns: self
                .columns
                .iter()
                .map(|(name, col)| (name.clone(), col.take(indices)))
                .collect(),
            rows: indices.len(),
        }
    }

    pub fn head(&self, n: usize) -> Table {
        let indices: Vec<usize> = (0..n.min(self.rows)).collect();
        self.take(&indices)
    }

    /// Seeded random sample of `n` rows, kept in their original order.
    pub fn sample(&self, n: usize, seed: u64) -> Table {
        if n >= self.rows {
            return self.clone();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut indices = rand::seq::index::sample(&mut rng, self.rows, n).into_vec();
        indices.sort_unstable();
        self.take(&indices)
    }

    /// Keeps only the named columns that exist, in the given order.
    pub fn select(&self, names: &[&str]) -> Table {
        let columns: IndexMap<String, Column> = names
            .iter()
            .filter_map(|n| self.columns.get(*n).map(|c| (n.to_string(), c.clone())))
            .collect();
        let rows = if columns.is_empty() { 0 } else { self.rows };
        Table { columns, rows }
    }

    /// Stacks tables vertically. Columns missing from some inputs are
    /// filled with nulls.
    pub fn concat(tables: &[Table]) -> Table {
        let mut out = Table::new();
        for table in tables.iter().filter(|t| !t.is_empty()) {
            for (name, column) in &table.columns {
                if !out.columns.contains_key(name) {
                    out.columns
                        .insert(name.clone(), Column::nulls(column, out.rows));
                }
            }
            for (name, existing) in out.columns.iter_mut() {
                match table.columns.get(name) {
                    Some(column) => existing.extend(column),
                    None => existing.extend(&Column::nulls(existing, table.rows)),
                }
            }
            out.rows += table.rows;
        }
        out
    }
}
