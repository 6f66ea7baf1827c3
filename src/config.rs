//! Ingest configuration and CSV reading options.
//!
//! The ingest configuration is stored as a plain JSON object on disk:
//! ```json
//! {
//!   "annual_burn_hours": 4000.0,
//!   "max_allowed_luminance_excess": 0.0,
//!   "maintenance_factors": {
//!     "STREETLUX 40W | LED 4000K": 0.7
//!   }
//! }
//! ```

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::warn;

/// Maintenance factor assumed by the simulation export.
pub const BASELINE_MAINTENANCE_FACTOR: f64 = 0.8;

pub const DEFAULT_BURN_HOURS: f64 = 4000.0;

pub const DEFAULT_BATCH_SIZE: usize = 500_000;

/// Key identifying a luminaire/lamp combination in the maintenance table.
pub fn luminaire_key(name: &str, lamp: &str) -> String {
    format!("{} | {}", name, lamp)
}

/// Reads a loosely typed JSON number: a number, or a string using `.` or `,`
/// as the decimal mark. Non-finite values are rejected.
fn lenient_number(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// A non-negative scalar setting. Missing keeps `default`; anything invalid
/// is logged and also falls back to `default`.
fn non_negative_setting(raw: Option<&serde_json::Value>, default: f64, setting: &str) -> f64 {
    let Some(raw) = raw else {
        return default;
    };
    match lenient_number(raw) {
        Some(v) if v >= 0.0 => v,
        _ => {
            warn!(setting, value = %raw, default, "Invalid setting, using default");
            default
        }
    }
}

/// Validated luminaire-key to maintenance-factor mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaintenanceFactors {
    entries: HashMap<String, f64>,
}

impl MaintenanceFactors {
    /// Builds the map from loosely typed entries, dropping (with a warning)
    /// anything that is not a positive finite number.
    pub fn from_entries<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, serde_json::Value)>,
        K: Into<String>,
    {
        let mut valid = HashMap::new();
        for (key, value) in entries {
            let key = key.into();
            match lenient_number(&value) {
                Some(f) if f > 0.0 => {
                    valid.insert(key, f);
                }
                _ => warn!(luminaire = %key, value = %value, "Ignoring invalid maintenance factor"),
            }
        }
        Self { entries: valid }
    }

    /// Factor for a luminaire key, falling back to the baseline.
    pub fn factor_for(&self, key: &str) -> f64 {
        self.entries
            .get(key)
            .copied()
            .unwrap_or(BASELINE_MAINTENANCE_FACTOR)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over all `(key, factor)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// On-disk shape. Scalars stay loosely typed so that a quoted number or a
/// bad value degrades to the default instead of rejecting the file.
#[derive(Debug, Deserialize, Serialize)]
struct IngestConfigFile {
    #[serde(default)]
    annual_burn_hours: Option<serde_json::Value>,
    #[serde(default)]
    max_allowed_luminance_excess: Option<serde_json::Value>,
    #[serde(default)]
    maintenance_factors: BTreeMap<String, serde_json::Value>,
}

/// Parameters consumed by the enrichment steps.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    pub maintenance_factors: MaintenanceFactors,
    pub annual_burn_hours: f64,
    /// Allowed luminance headroom above the best class, in percent; 0 disables.
    pub max_allowed_luminance_excess: f64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            maintenance_factors: MaintenanceFactors::default(),
            annual_burn_hours: DEFAULT_BURN_HOURS,
            max_allowed_luminance_excess: 0.0,
        }
    }
}

impl IngestConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading ingest config {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("parsing ingest config {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let file: IngestConfigFile = serde_json::from_str(content)?;
        Ok(Self {
            maintenance_factors: MaintenanceFactors::from_entries(file.maintenance_factors),
            annual_burn_hours: non_negative_setting(
                file.annual_burn_hours.as_ref(),
                DEFAULT_BURN_HOURS,
                "annual_burn_hours",
            ),
            max_allowed_luminance_excess: non_negative_setting(
                file.max_allowed_luminance_excess.as_ref(),
                0.0,
                "max_allowed_luminance_excess",
            ),
        })
    }

    /// Writes a config pre-filled with the baseline factor for every key.
    pub fn write_template(path: &Path, luminaire_keys: &[String]) -> Result<()> {
        let file = IngestConfigFile {
            annual_burn_hours: Some(serde_json::json!(DEFAULT_BURN_HOURS)),
            max_allowed_luminance_excess: Some(serde_json::json!(0.0)),
            maintenance_factors: luminaire_keys
                .iter()
                .map(|k| (k.clone(), serde_json::json!(BASELINE_MAINTENANCE_FACTOR)))
                .collect(),
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("writing ingest config {}", path.display()))?;
        Ok(())
    }
}

/// How source CSV files are decoded.
#[derive(Debug, Clone, Copy)]
pub struct CsvOptions {
    pub separator: u8,
    pub encoding: &'static Encoding,
    /// Numbers use `,` as the decimal mark.
    pub decimal_comma: bool,
    pub batch_size: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            separator: b';',
            encoding: encoding_rs::WINDOWS_1252,
            decimal_comma: false,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl CsvOptions {
    /// Resolves a WHATWG encoding label such as `cp1252` or `utf-8`.
    pub fn with_encoding_label(mut self, label: &str) -> Result<Self> {
        self.encoding = Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| anyhow!("unknown text encoding '{}'", label))?;
        Ok(self)
    }

    pub fn with_separator(mut self, separator: char) -> Result<Self> {
        if !separator.is_ascii() {
            return Err(anyhow!("separator must be a single ASCII character"));
        }
        self.separator = separator as u8;
        Ok(self)
    }

    /// Parses a numeric cell according to the decimal convention.
    pub fn parse_number(&self, raw: &str) -> Option<f64> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let parsed = if self.decimal_comma {
            raw.replace(',', ".").parse::<f64>()
        } else {
            raw.parse::<f64>()
        };
        parsed.ok().filter(|v| v.is_finite())
    }
}
