//! Core library for the tempchar measurement sequencer.
//!
//! The crate drives a bench of programmable instruments (sources, an
//! oscilloscope, a pulse generator, multimeters, a thermal chamber) through
//! the Sweep, Delay and VI measurement sequences and writes the results as
//! CSV tables. It is used by the `tempchar` command-line binary.
//!
//! Leaf to root: [`settings`] and [`graph`] hold the per-tab configuration,
//! [`instrument`] speaks the instrument protocol over an [`adapters::Transport`],
//! [`search`] implements the digit-wise trigger search and [`measurement`]
//! sequences everything.

pub mod adapters;
pub mod cancel;
pub mod config;
pub mod data;
pub mod error;
pub mod error_recovery;
pub mod graph;
pub mod instrument;
pub mod measurement;
pub mod search;
pub mod settings;
pub mod units;

pub use cancel::CancelToken;
pub use config::BenchConfig;
pub use error::{AppResult, BenchError, Fault, FaultResult};
pub use graph::{combine_device_data, CheckedInstrument, DeviceGraph, GraphBuilder, TabConfig};
pub use measurement::{MeasurementContext, Orchestrator, RunRequest};
