//! Road-lighting norm classes M1-M6 and their thresholds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Label stored in `best_class` for rows that satisfy no class.
pub const NO_CLASS: &str = "none";

/// Returned when a class identifier is not one of M1-M6.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown lighting class '{0}' (expected M1-M6)")]
pub struct InvalidClassError(pub String);

/// A lighting class. Variants are declared strictest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NormClass {
    M1,
    M2,
    M3,
    M4,
    M5,
    M6,
}

impl NormClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            NormClass::M1 => "M1",
            NormClass::M2 => "M2",
            NormClass::M3 => "M3",
            NormClass::M4 => "M4",
            NormClass::M5 => "M5",
            NormClass::M6 => "M6",
        }
    }
}

impl fmt::Display for NormClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NormClass {
    type Err = InvalidClassError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "M1" => Ok(NormClass::M1),
            "M2" => Ok(NormClass::M2),
            "M3" => Ok(NormClass::M3),
            "M4" => Ok(NormClass::M4),
            "M5" => Ok(NormClass::M5),
            "M6" => Ok(NormClass::M6),
            _ => Err(InvalidClassError(s.to_string())),
        }
    }
}

/// The five photometric parameters a class constrains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NormParameter {
    /// Average luminance.
    Lav,
    /// Overall uniformity.
    Uo,
    /// Longitudinal uniformity.
    Ul,
    /// Threshold increment (glare). Lower is better.
    Ti,
    /// Surround ratio.
    Rei,
}

impl NormParameter {
    pub const ALL: [NormParameter; 5] = [
        NormParameter::Lav,
        NormParameter::Uo,
        NormParameter::Ul,
        NormParameter::Ti,
        NormParameter::Rei,
    ];

    /// Prefix used in the derived score column names, e.g. `TI(M3)`.
    pub fn short_name(&self) -> &'static str {
        match self {
            NormParameter::Lav => "Lav",
            NormParameter::Uo => "Uo",
            NormParameter::Ul => "Ul",
            NormParameter::Ti => "TI",
            NormParameter::Rei => "Rei",
        }
    }

    /// Source CSV column holding the simulated value.
    pub fn source_column(&self) -> &'static str {
        match self {
            NormParameter::Lav => crate::table::columns::LAV,
            NormParameter::Uo => crate::table::columns::UO,
            NormParameter::Ul => crate::table::columns::UL,
            NormParameter::Ti => crate::table::columns::TI,
            NormParameter::Rei => crate::table::columns::REI,
        }
    }

    pub fn lower_is_better(&self) -> bool {
        matches!(self, NormParameter::Ti)
    }
}

/// Thresholds for a single class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NormRequirement {
    pub class_id: NormClass,
    pub min_avg_luminance: f64,
    pub min_overall_uniformity: f64,
    pub min_longitudinal_uniformity: f64,
    pub max_threshold_increment: f64,
    pub min_surround_ratio: f64,
}

impl NormRequirement {
    pub fn threshold(&self, parameter: NormParameter) -> f64 {
        match parameter {
            NormParameter::Lav => self.min_avg_luminance,
            NormParameter::Uo => self.min_overall_uniformity,
            NormParameter::Ul => self.min_longitudinal_uniformity,
            NormParameter::Ti => self.max_threshold_increment,
            NormParameter::Rei => self.min_surround_ratio,
        }
    }

    /// Whether a single raw value meets this class's threshold for `parameter`.
    pub fn passes(&self, parameter: NormParameter, actual: f64) -> bool {
        let threshold = self.threshold(parameter);
        if parameter.lower_is_better() {
            actual <= threshold
        } else {
            actual >= threshold
        }
    }
}

/// Ordered strictest (M1) to loosest (M6).
static NORMS: [NormRequirement; 6] = [
    NormRequirement {
        class_id: NormClass::M1,
        min_avg_luminance: 2.0,
        min_overall_uniformity: 0.4,
        min_longitudinal_uniformity: 0.7,
        max_threshold_increment: 10.0,
        min_surround_ratio: 0.35,
    },
    NormRequirement {
        class_id: NormClass::M2,
        min_avg_luminance: 1.5,
        min_overall_uniformity: 0.4,
        min_longitudinal_uniformity: 0.7,
        max_threshold_increment: 10.0,
        min_surround_ratio: 0.35,
    },
    NormRequirement {
        class_id: NormClass::M3,
        min_avg_luminance: 1.0,
        min_overall_uniformity: 0.4,
        min_longitudinal_uniformity: 0.6,
        max_threshold_increment: 15.0,
        min_surround_ratio: 0.30,
    },
    NormRequirement {
        class_id: NormClass::M4,
        min_avg_luminance: 0.75,
        min_overall_uniformity: 0.4,
        min_longitudinal_uniformity: 0.6,
        max_threshold_increment: 15.0,
        min_surround_ratio: 0.30,
    },
    NormRequirement {
        class_id: NormClass::M5,
        min_avg_luminance: 0.5,
        min_overall_uniformity: 0.35,
        min_longitudinal_uniformity: 0.4,
        max_threshold_increment: 15.0,
        min_surround_ratio: 0.30,
    },
    NormRequirement {
        class_id: NormClass::M6,
        min_avg_luminance: 0.3,
        min_overall_uniformity: 0.35,
        min_longitudinal_uniformity: 0.4,
        max_threshold_increment: 20.0,
        min_surround_ratio: 0.30,
    },
];

/// Returns the thresholds of `class_id`.
pub fn requirement(class_id: NormClass) -> &'static NormRequirement {
    &NORMS[class_id as usize]
}

/// Looks a class up by its textual identifier.
///
/// # Errors
///
/// Returns [`InvalidClassError`] for anything other than M1-M6.
pub fn thresholds_for(class_id: &str) -> Result<&'static NormRequirement, InvalidClassError> {
    let class: NormClass = class_id.parse()?;
    Ok(requirement(class))
}

/// All requirements, strictest first.
pub fn classes_by_strictness() -> &'static [NormRequirement] {
    &NORMS
}

/// Name of the derived percent-of-threshold column, e.g. `Lav(M3)`.
pub fn score_column(parameter: NormParameter, class_id: NormClass) -> String {
    format!("{}({})", parameter.short_name(), class_id)
}

/// All 30 score column names, class by class.
pub fn all_score_columns() -> Vec<String> {
    NORMS
        .iter()
        .flat_map(|req| {
            NormParameter::ALL
                .iter()
                .map(move |p| score_column(*p, req.class_id))
        })
        .collect()
}
