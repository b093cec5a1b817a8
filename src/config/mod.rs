//! Bench configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration)
//! 2. Environment variables (prefixed with `TEMPCHAR_`, nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! TEMPCHAR_APPLICATION__LOG_LEVEL=debug
//! TEMPCHAR_DEBUG__STOP_ON_WARNING=true
//! TEMPCHAR_PROTOCOL__QUERY_RETRIES=5
//! ```
//!
//! # Example
//!
//! ```no_run
//! use tempchar_daq::config::BenchConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = BenchConfig::load_from("bench.toml")?;
//!     println!("Instruments: {}", config.instruments.len());
//!     println!("Tabs: {:?}", config.tab_names());
//!     Ok(())
//! }
//! ```

pub mod tab;

pub use tab::{RawSettings, RawTabConfig};

use crate::data::Encoding;
use crate::error::{AppResult, BenchError};
use crate::error_recovery::RetryPolicy;
use crate::graph::{CheckedInstrument, RoleKind, TabConfig};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level bench configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Instrument protocol timing
    #[serde(default)]
    pub protocol: ProtocolConfig,
    /// Sequencer settle/standby constants
    #[serde(default)]
    pub timing: TimingConfig,
    /// Debug switches
    #[serde(default)]
    pub debug: DebugOptions,
    /// Instruments the operator enabled
    #[serde(default)]
    pub instruments: Vec<CheckedInstrument>,
    /// Measurement conditions, in execution order
    #[serde(default)]
    pub tabs: Vec<RawTabConfig>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for result and checkpoint files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Common prefix of every result file name
    #[serde(default = "default_file_stem")]
    pub file_stem: String,
    /// Text encoding of result files
    #[serde(default)]
    pub encoding: Encoding,
}

/// Command/completion protocol timing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Interval between two operation-complete polls
    #[serde(default = "default_opc_poll_interval")]
    pub opc_poll_interval_ms: u64,
    /// Time a reset may take before a warning is raised
    #[serde(default = "default_reset_timeout")]
    pub reset_timeout_ms: u64,
    /// Attempts per query
    #[serde(default = "default_query_retries")]
    pub query_retries: u32,
    /// Pause between query attempts
    #[serde(default = "default_query_backoff")]
    pub query_backoff_ms: u64,
}

/// Settle and standby constants used by the orchestrators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait after enabling outputs, before any value change
    #[serde(default = "default_output_settle")]
    pub output_settle_ms: u64,
    /// Wait after each value change, before reading
    #[serde(default = "default_value_settle")]
    pub value_settle_ms: u64,
    /// Thermal chamber stability poll interval
    #[serde(default = "default_chamber_poll")]
    pub chamber_poll_ms: u64,
    /// Thermal chamber stability deadline
    #[serde(default = "default_chamber_timeout")]
    pub chamber_timeout_s: u64,
    /// Sweep steps between two checkpoint flushes
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: usize,
    /// Offset multiplier for sub-microvolt search digits
    #[serde(default = "default_sub_microvolt_guard")]
    pub sub_microvolt_guard: i64,
    /// Resting level of the pulse generator during a search, in mV
    #[serde(default = "default_pulse_initial_mv")]
    pub pulse_initial_mv: f64,
}

/// Debug switches recognised by the orchestrators
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugOptions {
    /// Disable oscilloscope channels 5-8 before measuring
    #[serde(default)]
    pub use_8ch_osc: bool,
    /// Abort the run on the first non-fatal fault
    #[serde(default)]
    pub stop_on_warning: bool,
}

// ============================================================================
// Default value functions
// ============================================================================

/// Default operation-complete poll interval.
pub const DEFAULT_OPC_POLL_INTERVAL_MS: u64 = 20;
/// Default reset completion timeout.
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 10_000;
/// Default wait after switching outputs.
pub const DEFAULT_OUTPUT_SETTLE_MS: u64 = 20;
/// Default wait after applying a level.
pub const DEFAULT_VALUE_SETTLE_MS: u64 = 20;
/// Default chamber stability poll interval.
pub const DEFAULT_CHAMBER_POLL_MS: u64 = 5_000;
/// Default chamber stability timeout, 30 minutes.
pub const DEFAULT_CHAMBER_TIMEOUT_S: u64 = 30 * 60;
/// Default number of sweep steps between checkpoint writes.
pub const DEFAULT_CHECKPOINT_EVERY: usize = 20;
/// Default guard, in digits, before a sub-microvolt search start.
pub const DEFAULT_SUB_MICROVOLT_GUARD: i64 = 3;
/// Default pulse-mode resting offset in millivolts.
pub const DEFAULT_PULSE_INITIAL_MV: f64 = 2.0;

/// Upper bound for the operation-complete poll interval.
pub const MAX_OPC_POLL_INTERVAL_MS: u64 = 50;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_file_stem() -> String {
    "result".to_string()
}

fn default_opc_poll_interval() -> u64 {
    DEFAULT_OPC_POLL_INTERVAL_MS
}

fn default_reset_timeout() -> u64 {
    DEFAULT_RESET_TIMEOUT_MS
}

fn default_query_retries() -> u32 {
    crate::error_recovery::DEFAULT_QUERY_ATTEMPTS
}

fn default_query_backoff() -> u64 {
    crate::error_recovery::DEFAULT_QUERY_BACKOFF.as_millis() as u64
}

fn default_output_settle() -> u64 {
    DEFAULT_OUTPUT_SETTLE_MS
}

fn default_value_settle() -> u64 {
    DEFAULT_VALUE_SETTLE_MS
}

fn default_chamber_poll() -> u64 {
    DEFAULT_CHAMBER_POLL_MS
}

fn default_chamber_timeout() -> u64 {
    DEFAULT_CHAMBER_TIMEOUT_S
}

fn default_checkpoint_every() -> usize {
    DEFAULT_CHECKPOINT_EVERY
}

fn default_sub_microvolt_guard() -> i64 {
    DEFAULT_SUB_MICROVOLT_GUARD
}

fn default_pulse_initial_mv() -> f64 {
    DEFAULT_PULSE_INITIAL_MV
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            opc_poll_interval_ms: default_opc_poll_interval(),
            reset_timeout_ms: default_reset_timeout(),
            query_retries: default_query_retries(),
            query_backoff_ms: default_query_backoff(),
        }
    }
}

impl ProtocolConfig {
    /// Poll interval as a [`Duration`].
    pub fn opc_poll_interval(&self) -> Duration {
        Duration::from_millis(self.opc_poll_interval_ms)
    }

    /// Reset timeout as a [`Duration`].
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    /// Retry policy for query/read calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.query_retries,
            backoff_delay: Duration::from_millis(self.query_backoff_ms),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            output_settle_ms: default_output_settle(),
            value_settle_ms: default_value_settle(),
            chamber_poll_ms: default_chamber_poll(),
            chamber_timeout_s: default_chamber_timeout(),
            checkpoint_every: default_checkpoint_every(),
            sub_microvolt_guard: default_sub_microvolt_guard(),
            pulse_initial_mv: default_pulse_initial_mv(),
        }
    }
}

impl TimingConfig {
    /// Wait after switching outputs.
    pub fn output_settle(&self) -> Duration {
        Duration::from_millis(self.output_settle_ms)
    }

    /// Wait after applying a level.
    pub fn value_settle(&self) -> Duration {
        Duration::from_millis(self.value_settle_ms)
    }

    /// Chamber stability poll interval.
    pub fn chamber_poll(&self) -> Duration {
        Duration::from_millis(self.chamber_poll_ms)
    }

    /// Chamber stability timeout.
    pub fn chamber_timeout(&self) -> Duration {
        Duration::from_secs(self.chamber_timeout_s)
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "tempchar".to_string(),
            log_level: default_log_level(),
            output_dir: default_output_dir(),
            file_stem: default_file_stem(),
            encoding: Encoding::default(),
        }
    }
}

// ============================================================================
// Configuration loading
// ============================================================================

impl BenchConfig {
    /// Load configuration from a specific file path
    ///
    /// Environment variables prefixed `TEMPCHAR_` override file values.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config: BenchConfig = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TEMPCHAR_").split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string, without environment overrides
    pub fn load_from_str(toml: &str) -> AppResult<Self> {
        let config: BenchConfig = Figment::new().merge(Toml::string(toml)).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> AppResult<()> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.application.log_level.as_str()) {
            return Err(BenchError::Configuration(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.application.file_stem.trim().is_empty() {
            return Err(BenchError::Configuration(
                "application.file_stem must not be empty".to_string(),
            ));
        }

        if self.protocol.opc_poll_interval_ms == 0
            || self.protocol.opc_poll_interval_ms > MAX_OPC_POLL_INTERVAL_MS
        {
            return Err(BenchError::Configuration(format!(
                "protocol.opc_poll_interval_ms must be within 1..={}, got {}",
                MAX_OPC_POLL_INTERVAL_MS, self.protocol.opc_poll_interval_ms
            )));
        }

        if self.protocol.reset_timeout_ms == 0 || self.protocol.query_retries == 0 {
            return Err(BenchError::Configuration(
                "protocol.reset_timeout_ms and protocol.query_retries must be positive"
                    .to_string(),
            ));
        }

        if self.timing.checkpoint_every == 0 || self.timing.sub_microvolt_guard < 1 {
            return Err(BenchError::Configuration(
                "timing.checkpoint_every and timing.sub_microvolt_guard must be positive"
                    .to_string(),
            ));
        }

        let mut roles = HashSet::new();
        for instrument in &self.instruments {
            let role = instrument.role_id.to_ascii_uppercase();
            let kind = RoleKind::of(&role).ok_or_else(|| {
                BenchError::Configuration(format!("Unknown instrument role '{}'", role))
            })?;
            if !roles.insert(role.clone()) {
                return Err(BenchError::Configuration(format!(
                    "Duplicate instrument role '{}'",
                    role
                )));
            }
            if kind.is_hardware() && instrument.bus_address.trim().is_empty() {
                return Err(BenchError::Configuration(format!(
                    "Instrument '{}' has no bus address",
                    role
                )));
            }
        }

        let mut tab_names = HashSet::new();
        for tab in &self.tabs {
            if tab.name.trim().is_empty() {
                return Err(BenchError::Configuration(
                    "Tab names must not be empty".to_string(),
                ));
            }
            if !tab_names.insert(tab.name.as_str()) {
                return Err(BenchError::Configuration(format!(
                    "Duplicate tab '{}'",
                    tab.name
                )));
            }
        }

        Ok(())
    }

    /// Tab names in configuration order.
    pub fn tab_names(&self) -> Vec<String> {
        self.tabs.iter().map(|t| t.name.clone()).collect()
    }

    /// Normalise every raw tab record into base units.
    pub fn tab_configs(&self) -> AppResult<Vec<TabConfig>> {
        self.tabs.iter().map(RawTabConfig::normalize).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[application]
name = "bench"

[[instruments]]
role_id = "SOURCE1"
bus_address = "GPIB0::5::INSTR"
display_name = "B2902A"

[[tabs]]
name = "Item1"

[tabs.settings.VI]
kind = "vi"
standby_time = { value = 500, unit = "ms" }
"#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = BenchConfig::load_from_str(MINIMAL).expect("config loads");
        assert_eq!(config.application.log_level, "info");
        assert_eq!(config.protocol, ProtocolConfig::default());
        assert_eq!(config.protocol.retry_policy(), RetryPolicy::default());
        assert_eq!(config.timing.checkpoint_every, 20);
        assert_eq!(config.timing.chamber_timeout(), Duration::from_secs(1800));
        assert!(!config.debug.stop_on_warning);
        assert_eq!(config.tab_names(), vec!["Item1".to_string()]);
    }

    #[test]
    fn test_tab_configs_are_normalised() {
        let config = BenchConfig::load_from_str(MINIMAL).expect("config loads");
        let tabs = config.tab_configs().expect("tabs normalise");
        let vi = tabs[0].settings[0].1.as_vi().expect("vi settings");
        assert!((vi.standby_time - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_log_level_rejected() {
        let toml = MINIMAL.replace("name = \"bench\"", "name = \"bench\"\nlog_level = \"loud\"");
        let err = BenchConfig::load_from_str(&toml).unwrap_err();
        assert!(matches!(err, BenchError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_role_rejected() {
        let toml = format!(
            "{}\n[[instruments]]\nrole_id = \"SOURCE1\"\nbus_address = \"GPIB0::6::INSTR\"\n",
            MINIMAL
        );
        let err = BenchConfig::load_from_str(&toml).unwrap_err();
        assert!(err.to_string().contains("Duplicate instrument role"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(MINIMAL.as_bytes()).expect("write config");
        let config = BenchConfig::load_from(file.path()).expect("config loads");
        assert_eq!(config.application.name, "bench");
        assert_eq!(config.instruments.len(), 1);
    }
}
