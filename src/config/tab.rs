//! Raw per-tab settings as written in the configuration file.
//!
//! Numeric fields are `(value, unit)` quantities. [`RawTabConfig::normalize`]
//! converts them into base units once; everything downstream works on
//! [`Settings`] only.

use crate::error::{AppResult, BenchError};
use crate::graph::TabConfig;
use crate::settings::{
    AuxSource, ChamberSettings, ChannelSetup, DelayMeasurement, DetectReleaseAction,
    DetectReleaseSettings, DmmMode, Impedance, MultimeterSettings, OscilloscopeSettings, Polarity,
    PulseGeneratorSettings, Settings, Slope, SourceAction, SourceFunction, SourceMode,
    SourceRange, SourceSettings, SweepDirection, SweepSettings, TriggerSource, ViSettings,
};
use crate::units::{parse_compact, unit_scale, Quantity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One measurement condition as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTabConfig {
    /// Tab name as shown to the operator.
    pub name: String,
    /// Settings keyed by role id.
    #[serde(default)]
    pub settings: BTreeMap<String, RawSettings>,
}

impl RawTabConfig {
    /// Convert to base units, upper-casing role ids.
    pub fn normalize(&self) -> AppResult<TabConfig> {
        let mut tab = TabConfig::new(self.name.clone());
        for (role, raw) in &self.settings {
            let settings = raw.normalize().map_err(|msg| {
                BenchError::Configuration(format!("tab '{}', role '{}': {}", self.name, role, msg))
            })?;
            tab.settings.push((role.to_ascii_uppercase(), settings));
        }
        Ok(tab)
    }
}

/// Raw settings of one role, tagged by `kind`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSettings {
    /// See [`SourceSettings`].
    Source(RawSource),
    /// See [`OscilloscopeSettings`].
    Osc(RawOscilloscope),
    /// See [`PulseGeneratorSettings`].
    Pulse(RawPulse),
    /// See [`MultimeterSettings`].
    Dmm(RawMultimeter),
    /// See [`DetectReleaseSettings`].
    DetectRelease(RawDetectRelease),
    /// See [`SweepSettings`].
    Sweep(RawSweep),
    /// See [`ViSettings`].
    Vi(RawVi),
    /// See [`ChamberSettings`].
    Chamber(RawChamber),
}

/// Source as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSource {
    /// What the source does.
    pub action: SourceAction,
    /// Configured function.
    pub function: SourceFunction,
    /// Output quantity.
    pub mode: SourceMode,
    /// Output level.
    pub value: Quantity,
    /// `"AUTO"`, a compact value such as `"2V"`, or a bare number in `range_unit`.
    #[serde(default = "auto")]
    pub range: String,
    /// Unit of a bare-number range.
    #[serde(default)]
    pub range_unit: String,
    /// Compliance limit.
    pub limit: Quantity,
}

/// Oscilloscope channel as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChannel {
    /// Volts per division.
    pub range: Quantity,
    /// Vertical position in divisions.
    #[serde(default)]
    pub position: f64,
}

/// Delay measurement as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDelay {
    /// Measured channel.
    pub channel: u8,
    /// Edge measured on both channels.
    pub polarity: Slope,
    /// Channel the delay is measured from.
    pub reference_channel: u8,
    /// Start of the measurement window.
    pub window_start: Quantity,
    /// End of the measurement window.
    pub window_end: Quantity,
}

/// Oscilloscope as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawOscilloscope {
    /// Channel setups, CH1 first.
    #[serde(default)]
    pub channels: Vec<RawChannel>,
    /// Trigger channel, CH1 by default.
    #[serde(default = "one")]
    pub trigger_source: u8,
    /// Trigger edge, rising by default.
    #[serde(default = "rise")]
    pub trigger_slope: Slope,
    /// Trigger level.
    pub trigger_level: Quantity,
    /// Horizontal scale.
    pub time_per_div: Quantity,
    /// Trigger position in percent of the screen, 50 by default.
    #[serde(default = "fifty")]
    pub trigger_position_percent: f64,
    /// Delay measurement, for Delay runs.
    #[serde(default)]
    pub delay: Option<RawDelay>,
}

/// Pulse generator as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPulse {
    /// Whether the generator takes part in the tab.
    #[serde(default)]
    pub enabled: bool,
    /// Low level.
    pub low_level: Quantity,
    /// High level.
    pub high_level: Quantity,
    /// Output channel, 1 by default.
    #[serde(default = "one")]
    pub channel: u8,
    /// Output polarity, normal by default.
    #[serde(default = "normal")]
    pub polarity: Polarity,
    /// Period.
    pub period: Quantity,
    /// Pulse width.
    pub width: Quantity,
    /// `"HIGHZ"`, `"INF"` or a load such as `"50"` / `"50Ohm"`.
    #[serde(default = "high_z")]
    pub impedance: String,
    /// Whether the trigger output is enabled.
    #[serde(default)]
    pub trigger_out: bool,
}

/// Multimeter as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawMultimeter {
    /// Measurement function.
    pub mode: DmmMode,
    /// Range in the instrument's notation, `"AUTO"` by default.
    #[serde(default = "auto")]
    pub range: String,
    /// Integration time in power-line cycles, `"1"` by default.
    #[serde(default = "one_plc")]
    pub plc: String,
    /// Whether the front panel display stays on.
    #[serde(default = "yes")]
    pub display_on: bool,
    /// Trigger source, immediate by default.
    #[serde(default = "imm")]
    pub trigger_source: TriggerSource,
}

/// Auxiliary source of a detect/release sequence as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAux {
    /// Role of the source to drive.
    pub role_id: String,
    /// Level forcing the "set" state.
    pub set_value: Quantity,
    /// Level returning to rest.
    pub reset_value: Quantity,
}

/// Detect/release sequence as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawDetectRelease {
    /// Sequence variant.
    pub action: DetectReleaseAction,
    /// First auxiliary source.
    #[serde(default)]
    pub aux1: Option<RawAux>,
    /// Second auxiliary source.
    #[serde(default)]
    pub aux2: Option<RawAux>,
    /// Wait after each transition.
    pub check_time: Quantity,
}

/// Sweep window as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSweep {
    /// Step through every value when set, trigger search otherwise.
    #[serde(default = "yes")]
    pub normal_sweep: bool,
    /// Lower bound.
    pub min: Quantity,
    /// Upper bound.
    pub max: Quantity,
    /// Step size.
    pub step: Quantity,
    /// Dwell per step.
    pub step_time: Quantity,
    /// Wait after outputs are enabled.
    pub standby_time: Quantity,
    /// Pass order.
    pub direction: SweepDirection,
}

/// VI snapshot as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVi {
    /// Wait between enabling outputs and reading.
    pub standby_time: Quantity,
}

/// Chamber set point as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChamber {
    /// Set point in degrees Celsius.
    pub target: Quantity,
    /// Soak after stability, zero by default.
    #[serde(default = "zero_seconds")]
    pub soak_time: Quantity,
}

fn auto() -> String {
    "AUTO".to_string()
}

fn one() -> u8 {
    1
}

fn fifty() -> f64 {
    50.0
}

fn rise() -> Slope {
    Slope::Rise
}

fn normal() -> Polarity {
    Polarity::Normal
}

fn high_z() -> String {
    "HIGHZ".to_string()
}

fn one_plc() -> String {
    "1".to_string()
}

fn yes() -> bool {
    true
}

fn imm() -> TriggerSource {
    TriggerSource::Imm
}

fn zero_seconds() -> Quantity {
    Quantity::new(0.0, "s")
}

fn base(q: &Quantity, field: &str) -> Result<f64, String> {
    q.normalized()
        .ok_or_else(|| format!("{}: unknown unit '{}'", field, q.unit))
}

fn parse_impedance(text: &str) -> Result<Impedance, String> {
    let trimmed = text.trim();
    if trimmed.eq_ignore_ascii_case("highz") || trimmed.eq_ignore_ascii_case("inf") {
        return Ok(Impedance::HighZ);
    }
    parse_compact(trimmed)
        .filter(|ohms| *ohms > 0.0)
        .map(Impedance::Ohms)
        .ok_or_else(|| format!("impedance: cannot parse '{}'", text))
}

impl RawSettings {
    /// Convert into base units. Errors name the offending field.
    pub fn normalize(&self) -> Result<Settings, String> {
        Ok(match self {
            RawSettings::Source(raw) => {
                let range_scale = unit_scale(&raw.range_unit)
                    .ok_or_else(|| format!("range_unit: unknown unit '{}'", raw.range_unit))?;
                let range = SourceRange::parse(&raw.range, range_scale)
                    .ok_or_else(|| format!("range: cannot parse '{}'", raw.range))?;
                Settings::Source(SourceSettings {
                    action: raw.action,
                    function: raw.function,
                    mode: raw.mode,
                    value: base(&raw.value, "value")?,
                    range,
                    range_unit: raw.range_unit.clone(),
                    limit: base(&raw.limit, "limit")?,
                    limit_unit: raw.limit.unit.clone(),
                    value_unit: raw.value.unit.clone(),
                })
            }
            RawSettings::Osc(raw) => {
                if raw.channels.len() > OscilloscopeSettings::MAX_CHANNELS {
                    return Err(format!(
                        "channels: at most {} channels, got {}",
                        OscilloscopeSettings::MAX_CHANNELS,
                        raw.channels.len()
                    ));
                }
                let channels = raw
                    .channels
                    .iter()
                    .map(|c| -> Result<ChannelSetup, String> {
                        Ok(ChannelSetup {
                            range: base(&c.range, "channel range")?,
                            position: c.position,
                        })
                    })
                    .collect::<Result<Vec<_>, String>>()?;
                let delay = match &raw.delay {
                    Some(d) => Some(DelayMeasurement {
                        channel: d.channel,
                        polarity: d.polarity,
                        reference_channel: d.reference_channel,
                        window_start: base(&d.window_start, "window_start")?,
                        window_end: base(&d.window_end, "window_end")?,
                    }),
                    None => None,
                };
                Settings::Osc(OscilloscopeSettings {
                    channels,
                    trigger_source: raw.trigger_source,
                    trigger_slope: raw.trigger_slope,
                    trigger_level: base(&raw.trigger_level, "trigger_level")?,
                    time_per_div: base(&raw.time_per_div, "time_per_div")?,
                    trigger_position_percent: raw.trigger_position_percent,
                    delay,
                })
            }
            RawSettings::Pulse(raw) => Settings::Pulse(PulseGeneratorSettings {
                enabled: raw.enabled,
                low_level: base(&raw.low_level, "low_level")?,
                high_level: base(&raw.high_level, "high_level")?,
                channel: raw.channel,
                polarity: raw.polarity,
                period: base(&raw.period, "period")?,
                width: base(&raw.width, "width")?,
                impedance: parse_impedance(&raw.impedance)?,
                trigger_out: raw.trigger_out,
            }),
            RawSettings::Dmm(raw) => Settings::Dmm(MultimeterSettings {
                mode: raw.mode,
                range: raw.range.clone(),
                plc: raw.plc.clone(),
                display_on: raw.display_on,
                trigger_source: raw.trigger_source,
            }),
            RawSettings::DetectRelease(raw) => {
                let aux = |a: &Option<RawAux>, field: &str| -> Result<Option<AuxSource>, String> {
                    match a {
                        Some(a) => Ok(Some(AuxSource {
                            role_id: a.role_id.to_ascii_uppercase(),
                            set_value: base(&a.set_value, field)?,
                            reset_value: base(&a.reset_value, field)?,
                        })),
                        None => Ok(None),
                    }
                };
                Settings::DetectRelease(DetectReleaseSettings {
                    action: raw.action,
                    aux1: aux(&raw.aux1, "aux1")?,
                    aux2: aux(&raw.aux2, "aux2")?,
                    check_time: base(&raw.check_time, "check_time")?,
                })
            }
            RawSettings::Sweep(raw) => Settings::Sweep(SweepSettings {
                normal_sweep: raw.normal_sweep,
                min: base(&raw.min, "min")?,
                max: base(&raw.max, "max")?,
                step: base(&raw.step, "step")?,
                step_time: base(&raw.step_time, "step_time")?,
                standby_time: base(&raw.standby_time, "standby_time")?,
                direction: raw.direction,
            }),
            RawSettings::Vi(raw) => Settings::Vi(ViSettings {
                standby_time: base(&raw.standby_time, "standby_time")?,
            }),
            RawSettings::Chamber(raw) => Settings::Chamber(ChamberSettings {
                target_celsius: base(&raw.target, "target")?,
                soak_time: base(&raw.soak_time, "soak_time")?,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> RawTabConfig {
        toml::from_str(toml_text).expect("tab parses")
    }

    #[test]
    fn test_source_normalisation() {
        let tab = parse(
            r#"
name = "Item1"
[settings.source1]
kind = "source"
action = "Constant1"
function = "const"
mode = "VOLT"
value = { value = 200, unit = "mV" }
range = "2V"
limit = { value = 10, unit = "mA" }
"#,
        );
        let tab = tab.normalize().expect("normalises");
        assert_eq!(tab.settings[0].0, "SOURCE1");
        let source = tab.settings[0].1.as_source().expect("source");
        assert!((source.value - 0.2).abs() < 1e-12);
        assert_eq!(source.range, SourceRange::Fixed(2.0));
        assert!((source.limit - 0.01).abs() < 1e-12);
        assert_eq!(source.value_unit, "mV");
    }

    #[test]
    fn test_unknown_unit_names_field() {
        let tab = parse(
            r#"
name = "Item1"
[settings.VI]
kind = "vi"
standby_time = { value = 1, unit = "fortnight" }
"#,
        );
        let err = tab.normalize().unwrap_err();
        assert!(err.to_string().contains("standby_time"));
        assert!(err.to_string().contains("Item1"));
    }

    #[test]
    fn test_pulse_impedance_and_defaults() {
        let tab = parse(
            r#"
name = "Item1"
[settings.PULSE]
kind = "pulse"
enabled = true
low_level = { value = 0, unit = "V" }
high_level = { value = 1, unit = "V" }
period = { value = 1, unit = "ms" }
width = { value = 100, unit = "us" }
impedance = "50Ohm"
"#,
        );
        let tab = tab.normalize().expect("normalises");
        let pulse = tab.settings[0].1.as_pulse().expect("pulse");
        assert_eq!(pulse.impedance, Impedance::Ohms(50.0));
        assert_eq!(pulse.channel, 1);
        assert_eq!(pulse.polarity, Polarity::Normal);
        assert!(!pulse.trigger_out);
    }

    #[test]
    fn test_too_many_osc_channels_rejected() {
        let channel = "{ range = { value = 1, unit = \"V\" } }";
        let tab = parse(&format!(
            r#"
name = "Item1"
[settings.OSC]
kind = "osc"
channels = [{c}, {c}, {c}, {c}, {c}]
trigger_level = {{ value = 0.5, unit = "V" }}
time_per_div = {{ value = 1, unit = "ms" }}
"#,
            c = channel
        ));
        assert!(tab.normalize().is_err());
    }
}
