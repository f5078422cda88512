//! Glucose unit conversion and display formatting.
//!
//! All computation happens in mg/dL; mmol/L only exists at the display edge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::stats::{TargetRange, round1};

/// mg/dL per mmol/L for glucose.
pub const MGDL_PER_MMOL: f64 = 18.0182;

/// Threshold values below this are read as mmol/L.
const MMOL_INPUT_CEILING: f64 = 30.0;

/// Unit used when rendering glucose values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GlucoseUnits {
    #[serde(rename = "mgdl")]
    MgDl,
    #[default]
    #[serde(rename = "mmol")]
    Mmol,
}

impl GlucoseUnits {
    pub fn as_str(self) -> &'static str {
        match self {
            GlucoseUnits::MgDl => "mgdl",
            GlucoseUnits::Mmol => "mmol",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GlucoseUnits::MgDl => "mg/dL",
            GlucoseUnits::Mmol => "mmol/L",
        }
    }

    /// Value with unit suffix, e.g. "7.2 mmol/L" or "130 mg/dL".
    pub fn format(self, mgdl: f64) -> String {
        format!("{} {}", self.format_short(mgdl), self.label())
    }

    /// Bare value without unit.
    pub fn format_short(self, mgdl: f64) -> String {
        match self {
            GlucoseUnits::MgDl => format!("{}", mgdl.round() as i64),
            GlucoseUnits::Mmol => format!("{:.1}", mgdl_to_mmol(mgdl)),
        }
    }

    /// Label for the time-in-range band, e.g. "3.9-7.8 mmol/L".
    pub fn range_label(self, target: &TargetRange) -> String {
        match self {
            GlucoseUnits::MgDl => format!(
                "{}-{} mg/dL",
                target.low.trunc() as i64,
                target.high.trunc() as i64
            ),
            GlucoseUnits::Mmol => format!(
                "{:.1}-{:.1} mmol/L",
                mgdl_to_mmol(target.low),
                mgdl_to_mmol(target.high)
            ),
        }
    }
}

impl fmt::Display for GlucoseUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GlucoseUnits {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mgdl" | "mg/dl" => Ok(GlucoseUnits::MgDl),
            "mmol" | "mmol/l" => Ok(GlucoseUnits::Mmol),
            other => Err(format!("unsupported glucose units '{other}' (use mgdl or mmol)")),
        }
    }
}

pub fn mgdl_to_mmol(mgdl: f64) -> f64 {
    mgdl / MGDL_PER_MMOL
}

/// mmol/L rounded to one decimal, as displayed.
pub fn mmol_rounded(mgdl: f64) -> f64 {
    round1(mgdl_to_mmol(mgdl))
}

/// Parse a threshold given in either unit. Values under 30 are taken as
/// mmol/L; anything unparsable yields `default_mgdl`.
pub fn parse_glucose_threshold(raw: Option<&str>, default_mgdl: f64) -> f64 {
    let Some(parsed) = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| v.is_finite())
    else {
        return default_mgdl;
    };
    if parsed < MMOL_INPUT_CEILING {
        parsed * MGDL_PER_MMOL
    } else {
        parsed
    }
}

/// Arrow for a Nightscout trend code; unknown codes are echoed back.
pub fn direction_arrow(direction: &str) -> &str {
    match direction {
        "DoubleUp" => "⇈",
        "SingleUp" => "↑",
        "FortyFiveUp" => "↗",
        "Flat" => "→",
        "FortyFiveDown" => "↘",
        "SingleDown" => "↓",
        "DoubleDown" => "⇊",
        "NOT COMPUTABLE" => "?",
        "RATE OUT OF RANGE" => "⚠️",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmol_conversion_rounds_to_one_decimal() {
        assert_eq!(mmol_rounded(126.0), 7.0);
        assert_eq!(mmol_rounded(70.0), 3.9);
        assert_eq!(mmol_rounded(140.0), 7.8);
        assert_eq!(GlucoseUnits::Mmol.format(180.0), "10.0 mmol/L");
        assert_eq!(GlucoseUnits::MgDl.format(129.6), "130 mg/dL");
    }

    #[test]
    fn range_label_in_both_units() {
        let target = TargetRange::default();
        assert_eq!(GlucoseUnits::Mmol.range_label(&target), "3.9-7.8 mmol/L");
        assert_eq!(GlucoseUnits::MgDl.range_label(&target), "70-140 mg/dL");
    }

    #[test]
    fn thresholds_auto_detect_units() {
        assert_eq!(parse_glucose_threshold(Some("80"), 70.0), 80.0);
        assert!((parse_glucose_threshold(Some("3.9"), 70.0) - 70.27098).abs() < 1e-9);
        assert_eq!(parse_glucose_threshold(Some("abc"), 70.0), 70.0);
        assert_eq!(parse_glucose_threshold(Some(""), 140.0), 140.0);
        assert_eq!(parse_glucose_threshold(None, 140.0), 140.0);
    }

    #[test]
    fn units_parse_case_insensitively() {
        assert_eq!("MGDL".parse::<GlucoseUnits>(), Ok(GlucoseUnits::MgDl));
        assert_eq!("mmol".parse::<GlucoseUnits>(), Ok(GlucoseUnits::Mmol));
        assert!("kg".parse::<GlucoseUnits>().is_err());
    }

    #[test]
    fn arrows_cover_known_codes() {
        assert_eq!(direction_arrow("Flat"), "→");
        assert_eq!(direction_arrow("DoubleDown"), "⇊");
        assert_eq!(direction_arrow("Sideways"), "Sideways");
    }
}
