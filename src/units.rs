//! Unit-label scaling and fixed-point quantities.
//!
//! Configuration supplies `(value, unit)` pairs such as `(200, "mV")`. They are
//! normalised once into base units (V, A, s, Ω, °C) and from then on the
//! sequencer only sees plain numbers.
//!
//! Sweeps and threshold searches never accumulate floating-point steps:
//! - [`Nanos`] holds a value in units of 10⁻⁹ (nV, nA, ns) for linear sweeps.
//! - [`Ticks`] holds a voltage in units of 100 nV for the digit-wise search.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A raw `(value, unit)` pair as it appears in configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    /// Numeric part.
    pub value: f64,
    /// Unit label such as `mV`; empty means base units.
    #[serde(default)]
    pub unit: String,
}

impl Quantity {
    /// A quantity from its two parts.
    pub fn new(value: f64, unit: impl Into<String>) -> Self {
        Self {
            value,
            unit: unit.into(),
        }
    }

    /// The value in base units, or `None` for an unknown unit label.
    pub fn normalized(&self) -> Option<f64> {
        unit_scale(&self.unit).map(|scale| self.value * scale)
    }
}

/// Multiplier that converts a value in `unit` to the base unit.
///
/// The base symbol itself is ignored; only the SI prefix matters, so `"mV"`,
/// `"mA"` and `"ms"` all scale by 10⁻³. An empty label means base units.
pub fn unit_scale(unit: &str) -> Option<f64> {
    let unit = unit.trim();
    let prefix = unit
        .strip_suffix("Ohm")
        .or_else(|| unit.strip_suffix("ohm"))
        .or_else(|| unit.strip_suffix('Ω'))
        .or_else(|| unit.strip_suffix("°C"))
        .or_else(|| unit.strip_suffix("degC"))
        .or_else(|| unit.strip_suffix("sec"))
        .or_else(|| {
            unit.strip_suffix('V')
                .or_else(|| unit.strip_suffix('A'))
                .or_else(|| unit.strip_suffix('s'))
                .or_else(|| unit.strip_suffix('S'))
        })
        .unwrap_or(unit);

    match prefix {
        "" => Some(1.0),
        "G" => Some(1e9),
        "M" => Some(1e6),
        "k" | "K" => Some(1e3),
        "m" => Some(1e-3),
        "u" | "µ" | "μ" => Some(1e-6),
        "n" => Some(1e-9),
        "p" => Some(1e-12),
        _ => None,
    }
}

/// Splits a compact range string such as `"200mV"` or `"2V"` into base units.
///
/// Returns `None` for `"AUTO"` and for strings that do not parse.
pub fn parse_compact(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.eq_ignore_ascii_case("auto") || text.is_empty() {
        return None;
    }
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E')))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);
    let value: f64 = number.parse().ok()?;
    unit_scale(unit).map(|scale| value * scale)
}

/// Fixed-point value with 10⁻⁹ resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Nanos(pub i64);

impl Nanos {
    /// Ticks per base unit.
    pub const PER_UNIT: i64 = 1_000_000_000;

    /// Rounds a base-unit value to the nearest 10⁻⁹.
    pub fn from_f64(value: f64) -> Self {
        Nanos((value * Self::PER_UNIT as f64).round() as i64)
    }

    /// Back to a base-unit float.
    pub fn as_f64(self) -> f64 {
        self.0 as f64 / Self::PER_UNIT as f64
    }
}

impl fmt::Display for Nanos {
    /// Exact decimal rendering, e.g. `0.000000003` or `-1.250000000`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = Self::PER_UNIT as u64;
        write!(f, "{}{}.{:09}", sign, abs / per, abs % per)
    }
}

/// Fixed-point voltage in units of 100 nV, used by the trigger search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ticks(pub i64);

impl Ticks {
    /// Ticks per volt.
    pub const PER_VOLT: i64 = 10_000_000;

    /// 10 V.
    pub const VOLT_10: Ticks = Ticks(100_000_000);
    /// 1 V.
    pub const VOLT_1: Ticks = Ticks(10_000_000);
    /// 100 mV.
    pub const MILLIVOLT_100: Ticks = Ticks(1_000_000);
    /// 10 mV.
    pub const MILLIVOLT_10: Ticks = Ticks(100_000);
    /// 1 mV.
    pub const MILLIVOLT_1: Ticks = Ticks(10_000);
    /// 100 µV.
    pub const MICROVOLT_100: Ticks = Ticks(1_000);
    /// 10 µV.
    pub const MICROVOLT_10: Ticks = Ticks(100);
    /// 1 µV.
    pub const MICROVOLT_1: Ticks = Ticks(10);
    /// 100 nV, the finest search digit.
    pub const NANOVOLT_100: Ticks = Ticks(1);

    /// Rounds a voltage to the nearest 100 nV.
    pub fn from_volts(volts: f64) -> Self {
        Ticks((volts * Self::PER_VOLT as f64).round() as i64)
    }

    /// Back to volts.
    pub fn as_volts(self) -> f64 {
        self.0 as f64 / Self::PER_VOLT as f64
    }
}

impl fmt::Display for Ticks {
    /// Exact decimal rendering in volts with 7 fractional digits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = Self::PER_VOLT as u64;
        write!(f, "{}{}.{:07}", sign, abs / per, abs % per)
    }
}

/// Formats a base-unit value for an instrument command without exponent noise.
pub fn format_value(value: f64) -> String {
    Nanos::from_f64(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_scale_prefixes() {
        assert_eq!(unit_scale("V"), Some(1.0));
        assert_eq!(unit_scale("mV"), Some(1e-3));
        assert_eq!(unit_scale("uA"), Some(1e-6));
        assert_eq!(unit_scale("µs"), Some(1e-6));
        assert_eq!(unit_scale("kOhm"), Some(1e3));
        assert_eq!(unit_scale("°C"), Some(1.0));
        assert_eq!(unit_scale(""), Some(1.0));
        assert_eq!(unit_scale("xV"), None);
    }

    #[test]
    fn test_quantity_normalization() {
        let q = Quantity::new(200.0, "mV");
        assert!((q.normalized().unwrap_or_default() - 0.2).abs() < 1e-12);
        assert_eq!(Quantity::new(1.0, "bogus").normalized(), None);
    }

    #[test]
    fn test_parse_compact_ranges() {
        assert_eq!(parse_compact("2V"), Some(2.0));
        assert_eq!(parse_compact("AUTO"), None);
        let v = parse_compact("100mV").unwrap_or_default();
        assert!((v - 0.1).abs() < 1e-12);
        assert_eq!(parse_compact("10"), Some(10.0));
    }

    #[test]
    fn test_nanos_display_is_exact() {
        assert_eq!(Nanos(3).to_string(), "0.000000003");
        assert_eq!(Nanos(-1_250_000_000).to_string(), "-1.250000000");
        assert_eq!(Nanos::from_f64(0.000000003), Nanos(3));
    }

    #[test]
    fn test_ticks_display_and_conversion() {
        assert_eq!(Ticks::from_volts(1.23456), Ticks(12_345_600));
        assert_eq!(Ticks(12_345_600).to_string(), "1.2345600");
        assert_eq!(Ticks(-20_000).to_string(), "-0.0020000");
    }
}
