//! Result rows and result-file storage.
//!
//! Orchestrators collect [`ResultRow`]s in memory and hand snapshots of them
//! to a [`ResultSink`]: per-tab checkpoints, error/abort snapshots and the
//! final result file. The sink is the only place that touches the filesystem.

pub mod rows;
pub mod storage;

pub use rows::{MeasurementKind, ResultFiles, ResultRow};
pub use storage::{CsvSink, Encoding, MemorySink, ResultSink, SinkWrite};
