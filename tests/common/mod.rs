//! Shared fixtures for the orchestrator integration tests.
#![allow(dead_code)]

use std::sync::Arc;
use tempchar_daq::adapters::MockTransport;
use tempchar_daq::config::{ProtocolConfig, TimingConfig};
use tempchar_daq::data::{MemorySink, ResultRow};
use tempchar_daq::instrument::Bench;
use tempchar_daq::measurement::MeasurementContext;
use tempchar_daq::settings::{
    ChannelSetup, DelayMeasurement, DmmMode, Impedance, MultimeterSettings, OscilloscopeSettings,
    Polarity, PulseGeneratorSettings, Settings, Slope, SourceAction, SourceFunction, SourceMode,
    SourceRange, SourceSettings, SweepDirection, SweepSettings, TriggerSource, ViSettings,
};

pub const SOURCE_ADDR: &str = "GPIB0::5::INSTR";
pub const DMM_ADDR: &str = "GPIB0::22::INSTR";
pub const OSC_ADDR: &str = "USB0::0x0957::0x17A4::MY1::INSTR";
pub const PULSE_ADDR: &str = "GPIB0::10::INSTR";

pub fn fast_protocol() -> ProtocolConfig {
    ProtocolConfig {
        opc_poll_interval_ms: 1,
        reset_timeout_ms: 50,
        query_retries: 2,
        query_backoff_ms: 1,
    }
}

pub fn fast_timing() -> TimingConfig {
    TimingConfig {
        output_settle_ms: 0,
        value_settle_ms: 0,
        chamber_poll_ms: 1,
        chamber_timeout_s: 1,
        ..TimingConfig::default()
    }
}

pub fn context(transport: Arc<MockTransport>, sink: Arc<MemorySink>) -> MeasurementContext {
    MeasurementContext::new(Bench::new(transport, fast_protocol()), sink)
        .with_timing(fast_timing())
        .with_output("out", "run")
}

pub fn source(action: SourceAction, value: f64, range: SourceRange) -> Settings {
    Settings::Source(SourceSettings {
        action,
        function: if action == SourceAction::Sweep {
            SourceFunction::Sweep
        } else {
            SourceFunction::Const
        },
        mode: SourceMode::Volt,
        value,
        range,
        range_unit: "V".to_string(),
        limit: 0.1,
        limit_unit: "A".to_string(),
        value_unit: "V".to_string(),
    })
}

pub fn dmm(trigger_source: TriggerSource) -> Settings {
    Settings::Dmm(MultimeterSettings {
        mode: DmmMode::DcVolt,
        range: "AUTO".to_string(),
        plc: "1".to_string(),
        display_on: true,
        trigger_source,
    })
}

pub fn sweep(min: f64, max: f64, step: f64, normal_sweep: bool) -> Settings {
    Settings::Sweep(SweepSettings {
        normal_sweep,
        min,
        max,
        step,
        step_time: 0.0001,
        standby_time: 0.0,
        direction: SweepDirection::Rise,
    })
}

pub fn osc(delay: bool) -> Settings {
    Settings::Osc(OscilloscopeSettings {
        channels: vec![
            ChannelSetup {
                range: 0.5,
                position: 0.0,
            },
            ChannelSetup {
                range: 0.5,
                position: 0.0,
            },
        ],
        trigger_source: 1,
        trigger_slope: Slope::Rise,
        trigger_level: 0.5,
        time_per_div: 1e-6,
        trigger_position_percent: 50.0,
        delay: delay.then(|| DelayMeasurement {
            channel: 2,
            polarity: Slope::Rise,
            reference_channel: 1,
            window_start: 0.0,
            window_end: 1e-5,
        }),
    })
}

pub fn pulse() -> Settings {
    Settings::Pulse(PulseGeneratorSettings {
        enabled: true,
        low_level: 0.0,
        high_level: 3.3,
        channel: 1,
        polarity: Polarity::Normal,
        period: 1e-3,
        width: 1e-5,
        impedance: Impedance::HighZ,
        trigger_out: false,
    })
}

pub fn vi(standby_time: f64) -> Settings {
    Settings::Vi(ViSettings { standby_time })
}

/// Data rows after the `Data` section header.
pub fn data_rows(rows: &[ResultRow]) -> Vec<Vec<String>> {
    rows.iter()
        .skip_while(|r| **r != ResultRow::section("Data"))
        .filter_map(|r| r.as_cells().map(<[String]>::to_vec))
        .collect()
}

/// Position of a section header.
pub fn section_index(rows: &[ResultRow], name: &str) -> Option<usize> {
    rows.iter().position(|r| *r == ResultRow::section(name))
}
