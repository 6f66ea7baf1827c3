//! Filter labels as presented to users and their mapping onto columns.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::norms::{NO_CLASS, NormClass};
use crate::table::{Column, Table, columns, format_number};

/// Menu entry meaning "no restriction".
pub const ALL: &str = "All";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FilterField {
    #[serde(rename = "Arrangement")]
    Arrangement,
    #[serde(rename = "Luminaire")]
    Luminaire,
    #[serde(rename = "Class")]
    Class,
    #[serde(rename = "Road width [m]")]
    RoadWidth,
    #[serde(rename = "Pole spacing [m]")]
    PoleSpacing,
    #[serde(rename = "Mounting height [m]")]
    MountingHeight,
    #[serde(rename = "Tilt [°]")]
    Tilt,
}

impl FilterField {
    pub const ALL_FIELDS: [FilterField; 7] = [
        FilterField::Arrangement,
        FilterField::Luminaire,
        FilterField::Class,
        FilterField::RoadWidth,
        FilterField::PoleSpacing,
        FilterField::MountingHeight,
        FilterField::Tilt,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FilterField::Arrangement => "Arrangement",
            FilterField::Luminaire => "Luminaire",
            FilterField::Class => "Class",
            FilterField::RoadWidth => "Road width [m]",
            FilterField::PoleSpacing => "Pole spacing [m]",
            FilterField::MountingHeight => "Mounting height [m]",
            FilterField::Tilt => "Tilt [°]",
        }
    }

    /// Stored column the field filters on.
    pub fn column(&self) -> &'static str {
        match self {
            FilterField::Arrangement => columns::ARRANGEMENT,
            FilterField::Luminaire => columns::LUMINAIRE,
            FilterField::Class => columns::BEST_CLASS,
            FilterField::RoadWidth => columns::ROAD_WIDTH,
            FilterField::PoleSpacing => columns::POLE_SPACING,
            FilterField::MountingHeight => columns::MOUNTING_HEIGHT,
            FilterField::Tilt => columns::TILT,
        }
    }

    /// Numeric fields are matched exactly after parsing the menu text.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            FilterField::RoadWidth
                | FilterField::PoleSpacing
                | FilterField::MountingHeight
                | FilterField::Tilt
        )
    }
}

impl fmt::Display for FilterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FilterField {
    type Err = anyhow::Error;

    /// Accepts the label (case-insensitive) or the stored column name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        FilterField::ALL_FIELDS
            .into_iter()
            .find(|f| f.label().eq_ignore_ascii_case(s) || f.column() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown filter '{}'", s))
    }
}

/// Parses numeric menu text; a decimal comma is accepted.
pub fn parse_filter_number(raw: &str) -> Option<f64> {
    raw.trim()
        .replace(',', ".")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Normalized key of a filter set: active `(label, value)` pairs sorted by label.
pub type QueryKey = Vec<(String, String)>;

/// The active restrictions of one query.
///
/// Values are normalized on insertion: "All" and empty values clear the
/// field, classes are upper-cased, numbers are re-rendered canonically.
/// Values that cannot be interpreted are dropped with a warning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    values: BTreeMap<FilterField, String>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from `(label, value)` pairs; unknown labels are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = FilterSet::new();
        for (label, value) in pairs {
            match label.as_ref().parse::<FilterField>() {
                Ok(field) => set.set(field, value.as_ref()),
                Err(e) => warn!(error = %e, "Ignoring filter"),
            }
        }
        set
    }

    pub fn with(mut self, field: FilterField, value: &str) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: FilterField, value: &str) {
        let value = value.trim();
        if value.is_empty() || value == ALL {
            self.values.remove(&field);
            return;
        }
        let normalized = match field {
            FilterField::Class if value.eq_ignore_ascii_case(NO_CLASS) => Some(NO_CLASS.to_string()),
            FilterField::Class => match value.parse::<NormClass>() {
                Ok(class) => Some(class.as_str().to_string()),
                Err(e) => {
                    warn!(error = %e, "Ignoring class filter");
                    None
                }
            },
            f if f.is_numeric() => match parse_filter_number(value) {
                Some(number) => Some(format_number(number)),
                None => {
                    warn!(filter = %field, value, "Ignoring unparseable numeric filter");
                    None
                }
            },
            _ => Some(value.to_string()),
        };
        match normalized {
            Some(v) => {
                self.values.insert(field, v);
            }
            None => {
                self.values.remove(&field);
            }
        }
    }

    pub fn get(&self, field: FilterField) -> Option<&str> {
        self.values.get(&field).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Selected class when it is one of M1-M6.
    pub fn selected_class(&self) -> Option<NormClass> {
        self.get(FilterField::Class).and_then(|c| c.parse().ok())
    }

    pub fn cache_key(&self) -> QueryKey {
        let mut key: QueryKey = self
            .values
            .iter()
            .map(|(f, v)| (f.label().to_string(), v.clone()))
            .collect();
        key.sort();
        key
    }

    /// Columns the active filters read.
    pub fn columns(&self) -> Vec<&'static str> {
        self.values.keys().map(|f| f.column()).collect()
    }

    /// Row mask of `table` under the active filters.
    ///
    /// `None` when a filtered column is absent, meaning no row can match.
    pub fn mask(&self, table: &Table) -> Option<Vec<bool>> {
        let mut mask = vec![true; table.num_rows()];
        for (field, value) in &self.values {
            let column = table.column(field.column())?;
            match column {
                Column::Float(values) if field.is_numeric() => {
                    let target = parse_filter_number(value)?;
                    for (keep, v) in mask.iter_mut().zip(values) {
                        *keep &= *v == Some(target);
                    }
                }
                _ => {
                    for (row, keep) in mask.iter_mut().enumerate() {
                        if *keep {
                            *keep = column.display(row).as_deref().map(str::trim) == Some(value.as_str());
                        }
                    }
                }
            }
        }
        Some(mask)
    }

    /// Rows of `table` passing every filter; empty when a filtered column is absent.
    ///
    /// A table every row of which passes is returned as is.
    pub fn apply(&self, table: Table) -> Table {
        if self.is_empty() {
            return table;
        }
        match self.mask(&table) {
            Some(mask) if mask.iter().all(|k| *k) => table,
            Some(mask) => table.filter(&mask),
            None => Table::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Table {
        Table::from_columns([
            (
                columns::ARRANGEMENT,
                Column::Text(vec![
                    Some("opposite".into()),
                    Some(" single-sided ".into()),
                    Some("opposite".into()),
                ]),
            ),
            (
                columns::BEST_CLASS,
                Column::Text(vec![Some("M3".into()), Some("none".into()), Some("M4".into())]),
            ),
            (
                columns::ROAD_WIDTH,
                Column::Float(vec![Some(10.0), Some(10.0), Some(7.5)]),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_field_from_label_or_column() {
        assert_eq!("road width [m]".parse::<FilterField>().unwrap(), FilterField::RoadWidth);
        assert_eq!("Ldc name".parse::<FilterField>().unwrap(), FilterField::Luminaire);
        assert!("Color".parse::<FilterField>().is_err());
    }

    #[test]
    fn test_normalization_and_cache_key() {
        let a = FilterSet::from_pairs([
            ("Road width [m]", "10,0"),
            ("Class", "m3"),
            ("Arrangement", ALL),
            ("Luminaire", ""),
        ]);
        let b = FilterSet::new()
            .with(FilterField::Class, "M3")
            .with(FilterField::RoadWidth, "10");
        assert_eq!(a, b);
        assert_eq!(
            a.cache_key(),
            vec![
                ("Class".to_string(), "M3".to_string()),
                ("Road width [m]".to_string(), "10".to_string()),
            ]
        );
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let set = FilterSet::from_pairs([("Class", "M9"), ("Tilt [°]", "steep"), ("Nope", "x")]);
        assert!(set.is_empty());
        let none = FilterSet::new().with(FilterField::Class, "None");
        assert_eq!(none.get(FilterField::Class), Some(NO_CLASS));
        assert_eq!(none.selected_class(), None);
    }

    #[test]
    fn test_mask_combines_text_and_numeric() {
        let set = FilterSet::new()
            .with(FilterField::Arrangement, "opposite")
            .with(FilterField::RoadWidth, "10");
        assert_eq!(set.mask(&table()).unwrap(), vec![true, false, false]);

        let trimmed = FilterSet::new().with(FilterField::Arrangement, "single-sided");
        assert_eq!(trimmed.apply(table()).num_rows(), 1);
    }

    #[test]
    fn test_missing_column_matches_nothing() {
        let set = FilterSet::new().with(FilterField::Tilt, "5");
        assert!(set.mask(&table()).is_none());
        assert!(set.apply(table()).is_empty());
        assert_eq!(FilterSet::new().apply(table()), table());
    }

    #[test]
    fn test_apply_passes_fully_matching_table_through() {
        let wide = FilterSet::new().with(FilterField::Arrangement, "opposite");
        let matching = table().filter(&[true, false, true]);
        assert_eq!(wide.apply(matching.clone()), matching);
        assert_eq!(FilterSet::new().apply(Table::new()), Table::new());
    }
}
