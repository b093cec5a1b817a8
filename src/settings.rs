//! Per-role settings records.
//!
//! Every device in the [`DeviceGraph`](crate::graph::DeviceGraph) holds at most
//! one [`Settings`] value per tab. The variant is fixed by the device role, and
//! all numeric fields are already normalised to base units (V, A, s, °C).
//! Accessors return `Option` so a missing or mismatched record is an explicit
//! case for the caller, never a silently substituted default.

use crate::units::parse_compact;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settings for one device on one tab.
#[derive(Debug, Clone, PartialEq)]
pub enum Settings {
    /// Source/measure unit output.
    Source(SourceSettings),
    /// Oscilloscope channels, trigger and delay measurement.
    Osc(OscilloscopeSettings),
    /// Pulse generator levels and timing.
    Pulse(PulseGeneratorSettings),
    /// Multimeter function and trigger.
    Dmm(MultimeterSettings),
    /// Detect/release sequence on auxiliary sources.
    DetectRelease(DetectReleaseSettings),
    /// Swept window of a Sweep or Delay tab.
    Sweep(SweepSettings),
    /// Standby of a VI tab.
    Vi(ViSettings),
    /// Thermal chamber set point.
    Chamber(ChamberSettings),
}

macro_rules! settings_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        /// Borrow the inner record if the variant matches.
        pub fn $name(&self) -> Option<&$ty> {
            match self {
                Settings::$variant(inner) => Some(inner),
                _ => None,
            }
        }
    };
}

impl Settings {
    settings_accessor!(as_source, Source, SourceSettings);
    settings_accessor!(as_osc, Osc, OscilloscopeSettings);
    settings_accessor!(as_pulse, Pulse, PulseGeneratorSettings);
    settings_accessor!(as_dmm, Dmm, MultimeterSettings);
    settings_accessor!(as_detect_release, DetectRelease, DetectReleaseSettings);
    settings_accessor!(as_sweep, Sweep, SweepSettings);
    settings_accessor!(as_vi, Vi, ViSettings);
    settings_accessor!(as_chamber, Chamber, ChamberSettings);

    /// Mutable access to a source record.
    pub fn as_source_mut(&mut self) -> Option<&mut SourceSettings> {
        match self {
            Settings::Source(inner) => Some(inner),
            _ => None,
        }
    }

    /// Short name of the variant, used in validator messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Settings::Source(_) => "source",
            Settings::Osc(_) => "oscilloscope",
            Settings::Pulse(_) => "pulse generator",
            Settings::Dmm(_) => "multimeter",
            Settings::DetectRelease(_) => "detect/release",
            Settings::Sweep(_) => "sweep",
            Settings::Vi(_) => "VI",
            Settings::Chamber(_) => "thermal chamber",
        }
    }
}

// ============================================================================
// Source
// ============================================================================

/// What a source does during a tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceAction {
    /// The source is the swept quantity.
    Sweep,
    /// Held at its value, enabled first.
    Constant1,
    /// Held at its value, enabled second.
    Constant2,
    /// Held at its value, enabled third.
    Constant3,
    /// Held at its value, enabled fourth.
    Constant4,
    /// Left off for the whole tab.
    NotUsed,
}

impl SourceAction {
    /// Whether the source is enabled on the tab.
    pub fn is_used(self) -> bool {
        self != SourceAction::NotUsed
    }
}

/// Source function as configured; `Const` forces range checks on the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFunction {
    /// Stepped output.
    Sweep,
    /// Fixed output.
    Const,
}

/// Output quantity of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceMode {
    /// Voltage source, current limit.
    Volt,
    /// Current source, voltage limit.
    Curr,
}

impl SourceMode {
    /// SCPI mnemonic of the mode.
    pub fn scpi(self) -> &'static str {
        match self {
            SourceMode::Volt => "VOLT",
            SourceMode::Curr => "CURR",
        }
    }

    /// Base-unit symbol matching the mode.
    pub fn unit_symbol(self) -> char {
        match self {
            SourceMode::Volt => 'V',
            SourceMode::Curr => 'A',
        }
    }

    /// The quantity a compliance limit applies to (the other one).
    pub fn limit_mode(self) -> SourceMode {
        match self {
            SourceMode::Volt => SourceMode::Curr,
            SourceMode::Curr => SourceMode::Volt,
        }
    }
}

/// Output range: either auto-ranging or a fixed full-scale value in base units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceRange {
    /// Instrument auto-ranging.
    Auto,
    /// Full-scale value in base units.
    Fixed(f64),
}

impl SourceRange {
    /// Parses `"AUTO"`, `"2V"`, `"200mV"` or a bare number scaled by `unit`.
    pub fn parse(text: &str, unit_scale: f64) -> Option<SourceRange> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("auto") {
            return Some(SourceRange::Auto);
        }
        if let Ok(bare) = trimmed.parse::<f64>() {
            return Some(SourceRange::Fixed(bare * unit_scale));
        }
        parse_compact(trimmed).map(SourceRange::Fixed)
    }

    /// Full-scale value, if not auto-ranging.
    pub fn fixed(self) -> Option<f64> {
        match self {
            SourceRange::Fixed(value) => Some(value),
            SourceRange::Auto => None,
        }
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceRange::Auto => f.write_str("AUTO"),
            SourceRange::Fixed(value) => write!(f, "{}", value),
        }
    }
}

/// One source on one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSettings {
    /// What the source does.
    pub action: SourceAction,
    /// Configured function.
    pub function: SourceFunction,
    /// Output quantity.
    pub mode: SourceMode,
    /// Output level in base units (V or A).
    pub value: f64,
    /// Output range.
    pub range: SourceRange,
    /// Display label of the range unit as configured.
    pub range_unit: String,
    /// Compliance limit in base units.
    pub limit: f64,
    /// Display label of the limit unit as configured.
    pub limit_unit: String,
    /// Display label of the value unit as configured.
    pub value_unit: String,
}

impl SourceSettings {
    /// Whether this source is the swept one.
    pub fn is_sweep(&self) -> bool {
        self.action == SourceAction::Sweep
    }
}

// ============================================================================
// Oscilloscope
// ============================================================================

/// Vertical setup of one oscilloscope channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSetup {
    /// Volts per division.
    pub range: f64,
    /// Vertical position in divisions.
    pub position: f64,
}

/// Edge direction of a trigger, measurement or sweep pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Slope {
    /// Rising edge, or a pass from `min` to `max`.
    Rise,
    /// Falling edge, or a pass from `max` to `min`.
    Fall,
}

impl Slope {
    /// SCPI edge keyword.
    pub fn scpi(self) -> &'static str {
        match self {
            Slope::Rise => "POS",
            Slope::Fall => "NEG",
        }
    }
}

/// Delay-measurement block, present only for the Delay orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayMeasurement {
    /// Measured channel.
    pub channel: u8,
    /// Edge measured on both channels.
    pub polarity: Slope,
    /// Channel the delay is measured from.
    pub reference_channel: u8,
    /// Measurement window bounds in seconds relative to the trigger.
    pub window_start: f64,
    /// End of the measurement window in seconds.
    pub window_end: f64,
}

/// Oscilloscope setup for one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct OscilloscopeSettings {
    /// Up to four channels; index 0 is CH1.
    pub channels: Vec<ChannelSetup>,
    /// Trigger channel number.
    pub trigger_source: u8,
    /// Trigger edge.
    pub trigger_slope: Slope,
    /// Trigger level in volts.
    pub trigger_level: f64,
    /// Seconds per division.
    pub time_per_div: f64,
    /// Horizontal trigger position in percent of the screen.
    pub trigger_position_percent: f64,
    /// Delay measurement, for Delay runs.
    pub delay: Option<DelayMeasurement>,
}

impl OscilloscopeSettings {
    /// Channels the scope driver programs.
    pub const MAX_CHANNELS: usize = 4;
}

// ============================================================================
// Pulse generator
// ============================================================================

/// Output polarity of the pulse channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    /// Pulses go from low to high.
    Normal,
    /// Pulses go from high to low.
    Inverted,
}

/// Output impedance (load) setting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Impedance {
    /// Into an open circuit.
    HighZ,
    /// Into a load of the given resistance.
    Ohms(f64),
}

/// Pulse generator setup for one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct PulseGeneratorSettings {
    /// Whether the generator takes part in the tab.
    pub enabled: bool,
    /// Low level in volts.
    pub low_level: f64,
    /// High level in volts.
    pub high_level: f64,
    /// Output channel.
    pub channel: u8,
    /// Output polarity.
    pub polarity: Polarity,
    /// Period in seconds.
    pub period: f64,
    /// Pulse width in seconds.
    pub width: f64,
    /// Load impedance.
    pub impedance: Impedance,
    /// Whether the trigger output is enabled.
    pub trigger_out: bool,
}

// ============================================================================
// Multimeter
// ============================================================================

/// Multimeter measurement function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DmmMode {
    /// DC voltage.
    DcVolt,
    /// AC voltage.
    AcVolt,
    /// DC current.
    DcCurr,
    /// AC current.
    AcCurr,
    /// Two-wire resistance.
    Res,
    /// Four-wire resistance.
    Fres,
}

impl DmmMode {
    /// SCPI function keyword.
    pub fn scpi(self) -> &'static str {
        match self {
            DmmMode::DcVolt => "VOLT:DC",
            DmmMode::AcVolt => "VOLT:AC",
            DmmMode::DcCurr => "CURR:DC",
            DmmMode::AcCurr => "CURR:AC",
            DmmMode::Res => "RES",
            DmmMode::Fres => "FRES",
        }
    }
}

/// Where a multimeter takes its trigger from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriggerSource {
    /// Readings free-run.
    Imm,
    /// Software trigger.
    Bus,
    /// External trigger input.
    Ext,
}

impl TriggerSource {
    /// SCPI trigger source keyword.
    pub fn scpi(self) -> &'static str {
        match self {
            TriggerSource::Imm => "IMM",
            TriggerSource::Bus => "BUS",
            TriggerSource::Ext => "EXT",
        }
    }

    /// `BUS` and `EXT` both need an explicit bus trigger before a reading.
    pub fn needs_bus_trigger(self) -> bool {
        !matches!(self, TriggerSource::Imm)
    }
}

/// Multimeter setup for one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct MultimeterSettings {
    /// Measurement function.
    pub mode: DmmMode,
    /// `"AUTO"` or a range in the instrument's own notation.
    pub range: String,
    /// Integration time in power-line cycles, kept as text.
    pub plc: String,
    /// Whether the front panel display stays on.
    pub display_on: bool,
    /// Trigger source.
    pub trigger_source: TriggerSource,
}

// ============================================================================
// Virtual roles
// ============================================================================

/// Detect/release sequence variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectReleaseAction {
    /// Apply the reset levels and wait the check time.
    ActNormal,
    /// Apply the set levels and wait before resetting.
    ActSpecial1,
}

/// An auxiliary source driven by the detect/release sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct AuxSource {
    /// Role of the source to drive.
    pub role_id: String,
    /// Level that forces the device under test into its "set" state.
    pub set_value: f64,
    /// Level that returns it to the resting state.
    pub reset_value: f64,
}

/// Detect/release setup for one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectReleaseSettings {
    /// Sequence variant.
    pub action: DetectReleaseAction,
    /// First auxiliary source.
    pub aux1: Option<AuxSource>,
    /// Second auxiliary source.
    pub aux2: Option<AuxSource>,
    /// Seconds to wait after each detect/release transition.
    pub check_time: f64,
}

impl DetectReleaseSettings {
    /// Configured auxiliary sources in order.
    pub fn aux_sources(&self) -> impl Iterator<Item = &AuxSource> {
        self.aux1.iter().chain(self.aux2.iter())
    }
}

/// Which passes a tab sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepDirection {
    /// One rising pass.
    Rise,
    /// One falling pass.
    Fall,
    /// Rising then falling.
    RiseFall,
    /// Falling then rising.
    FallRise,
}

impl SweepDirection {
    /// The one or two passes the direction expands to.
    pub fn passes(self) -> &'static [Slope] {
        match self {
            SweepDirection::Rise => &[Slope::Rise],
            SweepDirection::Fall => &[Slope::Fall],
            SweepDirection::RiseFall => &[Slope::Rise, Slope::Fall],
            SweepDirection::FallRise => &[Slope::Fall, Slope::Rise],
        }
    }

    /// Lower-case name used in settings rows.
    pub fn as_str(self) -> &'static str {
        match self {
            SweepDirection::Rise => "rise",
            SweepDirection::Fall => "fall",
            SweepDirection::RiseFall => "risefall",
            SweepDirection::FallRise => "fallrise",
        }
    }
}

/// Swept window of one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSettings {
    /// Step through every value when set, trigger search otherwise.
    pub normal_sweep: bool,
    /// Lower bound of the window in base units.
    pub min: f64,
    /// Upper bound of the window in base units.
    pub max: f64,
    /// Step size in base units.
    pub step: f64,
    /// Seconds to dwell on each step.
    pub step_time: f64,
    /// Seconds to wait after outputs are enabled, before the first step.
    pub standby_time: f64,
    /// Pass order.
    pub direction: SweepDirection,
}

/// VI snapshot setup for one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct ViSettings {
    /// Seconds to wait between enabling outputs and reading.
    pub standby_time: f64,
}

/// Thermal-chamber set point for one tab.
#[derive(Debug, Clone, PartialEq)]
pub struct ChamberSettings {
    /// Set point in degrees Celsius.
    pub target_celsius: f64,
    /// Seconds to soak once the chamber reports stability.
    pub soak_time: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors_reject_mismatched_variant() {
        let settings = Settings::Vi(ViSettings { standby_time: 1.0 });
        assert!(settings.as_vi().is_some());
        assert!(settings.as_source().is_none());
        assert!(settings.as_sweep().is_none());
        assert_eq!(settings.kind(), "VI");
    }

    #[test]
    fn test_source_range_parse() {
        assert_eq!(SourceRange::parse("AUTO", 1.0), Some(SourceRange::Auto));
        assert_eq!(SourceRange::parse("2V", 1.0), Some(SourceRange::Fixed(2.0)));
        assert_eq!(SourceRange::parse("5", 1.0), Some(SourceRange::Fixed(5.0)));
        assert_eq!(SourceRange::parse("junk", 1.0), None);
    }

    #[test]
    fn test_sweep_direction_passes() {
        assert_eq!(SweepDirection::RiseFall.passes(), &[Slope::Rise, Slope::Fall]);
        assert_eq!(SweepDirection::Fall.passes(), &[Slope::Fall]);
    }

    #[test]
    fn test_trigger_source_bus_requirement() {
        assert!(!TriggerSource::Imm.needs_bus_trigger());
        assert!(TriggerSource::Bus.needs_bus_trigger());
        assert!(TriggerSource::Ext.needs_bus_trigger());
    }
}
