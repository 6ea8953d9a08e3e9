//! Sign-split power readings derived from a snapshot field.

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Which side of a signed power reading to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    Charging,
    Discharging,
    MeterPos,
    MeterNeg,
}

impl SplitMode {
    pub const ALL: [SplitMode; 4] = [
        SplitMode::Charging,
        SplitMode::Discharging,
        SplitMode::MeterPos,
        SplitMode::MeterNeg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SplitMode::Charging => "charging",
            SplitMode::Discharging => "discharging",
            SplitMode::MeterPos => "meter_pos",
            SplitMode::MeterNeg => "meter_neg",
        }
    }

    /// Non-negative reading for this side of `value`.
    pub fn split(self, value: f64) -> f64 {
        match self {
            SplitMode::Charging | SplitMode::MeterPos if value > 0.0 => value,
            SplitMode::Discharging | SplitMode::MeterNeg if value < 0.0 => -value,
            _ => 0.0,
        }
    }
}

impl fmt::Display for SplitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SplitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SplitMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| format!("unknown split mode '{s}'"))
    }
}

/// Numeric value of a telemetry field. Numbers and numeric strings qualify.
pub fn numeric_reading(value: Option<&Value>) -> Option<f64> {
    let reading = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    reading.is_finite().then_some(reading)
}

/// Derived reading, or `None` when the source is absent or not numeric.
pub fn derived_reading(value: Option<&Value>, mode: SplitMode) -> Option<f64> {
    numeric_reading(value).map(|reading| mode.split(reading))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLES: [f64; 7] = [-1500.0, -0.5, -0.0, 0.0, 0.25, 42.0, 3000.0];

    #[test]
    fn test_charging_is_positive_side() {
        for sample in SAMPLES {
            let charging = SplitMode::Charging.split(sample);
            assert!(charging >= 0.0);
            if sample > 0.0 {
                assert_eq!(charging, sample);
            } else {
                assert_eq!(charging, 0.0);
            }
        }
    }

    #[test]
    fn test_sides_never_both_positive() {
        for sample in SAMPLES {
            let charging = SplitMode::Charging.split(sample);
            let discharging = SplitMode::Discharging.split(sample);
            assert!(!(charging > 0.0 && discharging > 0.0));
            assert_eq!(charging - discharging, sample + 0.0);

            let pos = SplitMode::MeterPos.split(sample);
            let neg = SplitMode::MeterNeg.split(sample);
            assert!(!(pos > 0.0 && neg > 0.0));
        }
    }

    #[test]
    fn test_negative_sides_take_magnitude() {
        assert_eq!(SplitMode::Discharging.split(-250.0), 250.0);
        assert_eq!(SplitMode::MeterNeg.split(-90.5), 90.5);
        assert_eq!(SplitMode::MeterNeg.split(90.5), 0.0);
        assert_eq!(SplitMode::MeterPos.split(90.5), 90.5);
    }

    #[test]
    fn test_missing_or_non_numeric_source_is_no_reading() {
        assert_eq!(derived_reading(None, SplitMode::Charging), None);
        assert_eq!(derived_reading(Some(&json!(null)), SplitMode::Charging), None);
        assert_eq!(derived_reading(Some(&json!("n/a")), SplitMode::Charging), None);
        assert_eq!(derived_reading(Some(&json!(true)), SplitMode::Charging), None);
        assert_eq!(derived_reading(Some(&json!(-12)), SplitMode::Charging), Some(0.0));
        assert_eq!(derived_reading(Some(&json!(" -12.5 ")), SplitMode::Discharging), Some(12.5));
    }

    #[test]
    fn test_mode_names_round_trip() {
        for mode in SplitMode::ALL {
            assert_eq!(mode.to_string().parse::<SplitMode>(), Ok(mode));
        }
        assert!("sideways".parse::<SplitMode>().is_err());
    }
}
