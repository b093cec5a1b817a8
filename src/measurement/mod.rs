//! Measurement orchestrators
//!
//! The Sweep, Delay and VI orchestrators share one runner:
//!
//! ```text
//! Idle → BuildGraph → Validate → per tab {
//!     Initialize → OutputEnable → Stabilize → (MeasurementLoop | TriggerSearch)
//!     → OutputDisable → RemoteRelease → Checkpoint
//! } → Done
//! ```
//!
//! `Cancelled` and `FatalAborted` are reachable from every step. Each
//! orchestrator implements [`TabProcedure`] for the part that differs (the
//! per-tab measurement); [`Orchestrator::run`] owns graph building, validation,
//! teardown, fault classification and the result files.
//!
//! # Example
//!
//! ```rust,ignore
//! let ctx = MeasurementContext::from_config(&config, transport, Arc::new(CsvSink::new()));
//! let request = RunRequest::new(config.instruments.clone(), config.tab_configs()?);
//! let rows = Orchestrator::vi(ctx).run(request, &cancel).await?;
//! ```

pub mod delay;
pub mod session;
pub mod sweep;
pub mod tab;
pub mod validate;
pub mod vi;

pub use delay::DelayProcedure;
pub use session::TabSession;
pub use sweep::{sweep_values, SweepProcedure};
pub use tab::{ActiveDmm, ActiveSource, SweepTarget, TabRun};
pub use validate::{DelayValidator, SweepValidator, Validator, ViValidator};
pub use vi::ViProcedure;

use crate::adapters::Transport;
use crate::cancel::CancelToken;
use crate::config::{BenchConfig, DebugOptions, TimingConfig};
use crate::data::{CsvSink, Encoding, MeasurementKind, ResultFiles, ResultRow, ResultSink};
use crate::error::{AppResult, Fault, FaultResult};
use crate::graph::{CheckedInstrument, DeviceGraph, GraphBuilder, TabConfig};
use crate::instrument::Bench;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Selection value meaning "no tab chosen".
pub const NONE_SELECTED: &str = "none selected";

/// Everything an orchestrator needs besides the request itself.
#[derive(Clone)]
pub struct MeasurementContext {
    /// Clients for the checked instruments.
    pub bench: Bench,
    /// Settle, poll and checkpoint timing.
    pub timing: TimingConfig,
    /// Where result rows go.
    pub sink: Arc<dyn ResultSink>,
    /// Directory for result files.
    pub output_dir: PathBuf,
    /// Prefix of every result file name.
    pub file_stem: String,
    /// Text encoding of result files.
    pub encoding: Encoding,
}

impl MeasurementContext {
    /// A context with default timing writing `result_*` files to the current directory.
    pub fn new(bench: Bench, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            bench,
            timing: TimingConfig::default(),
            sink,
            output_dir: PathBuf::from("."),
            file_stem: "result".to_string(),
            encoding: Encoding::default(),
        }
    }

    /// Context wired from a loaded configuration.
    pub fn from_config(
        config: &BenchConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            bench: Bench::new(transport, config.protocol.clone()),
            timing: config.timing.clone(),
            sink,
            output_dir: config.application.output_dir.clone(),
            file_stem: config.application.file_stem.clone(),
            encoding: config.application.encoding,
        }
    }

    /// Context writing CSV files per `config`.
    pub fn with_csv(config: &BenchConfig, transport: Arc<dyn Transport>) -> Self {
        Self::from_config(config, transport, Arc::new(CsvSink::new()))
    }

    /// Replace the timing settings.
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    /// Write results under `dir` with file names starting with `stem`.
    pub fn with_output(mut self, dir: impl AsRef<Path>, stem: impl Into<String>) -> Self {
        self.output_dir = dir.as_ref().to_path_buf();
        self.file_stem = stem.into();
        self
    }

    /// Result file paths for one measurement kind.
    pub fn files(&self, kind: MeasurementKind) -> ResultFiles {
        ResultFiles::new(&self.output_dir, self.file_stem.clone(), kind)
    }

    /// Overwrite `path` with `rows`.
    pub fn write(&self, path: &Path, rows: &[ResultRow]) -> AppResult<()> {
        self.sink.write(path, rows, false, self.encoding)
    }
}

/// Input of one orchestrator run.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Instruments the operator enabled.
    pub checked: Vec<CheckedInstrument>,
    /// Every configured tab.
    pub tabs: Vec<TabConfig>,
    /// Tabs to measure, in order. Empty or [`NONE_SELECTED`] measures nothing.
    pub selected: Vec<String>,
    /// Debug switches for the run.
    pub debug: DebugOptions,
    /// A graph built by the caller; built from `checked`/`tabs` when absent.
    pub graph: Option<DeviceGraph>,
}

impl RunRequest {
    /// Request selecting every tab in configuration order.
    pub fn new(checked: Vec<CheckedInstrument>, tabs: Vec<TabConfig>) -> Self {
        let selected = tabs.iter().map(|t| t.name.clone()).collect();
        Self {
            checked,
            tabs,
            selected,
            debug: DebugOptions::default(),
            graph: None,
        }
    }

    /// Measure only `selected`, in the given order.
    pub fn with_selected<I, S>(mut self, selected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected = selected.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the debug switches.
    pub fn with_debug(mut self, debug: DebugOptions) -> Self {
        self.debug = debug;
        self
    }

    /// Use a prebuilt device graph.
    pub fn with_graph(mut self, graph: DeviceGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    fn selected_tabs(&self) -> Option<Vec<String>> {
        let selected: Vec<String> = self
            .selected
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let none = selected.is_empty()
            || selected
                .iter()
                .any(|s| s.eq_ignore_ascii_case(NONE_SELECTED));
        (!none).then_some(selected)
    }
}

/// The orchestrator-specific part of a run.
#[async_trait]
pub trait TabProcedure: Send + Sync {
    /// Measurement this procedure implements.
    fn kind(&self) -> MeasurementKind;

    /// Settings-only roles added to the device graph.
    fn virtual_roles(&self) -> &'static [&'static str];

    /// Consistency checks run before any hardware is touched.
    fn validator(&self) -> &dyn Validator;

    /// One row of the settings header block.
    fn settings_row(&self, graph: &DeviceGraph, tab: &str) -> ResultRow;

    /// Measure one tab. Rows go to `run`; teardown is the runner's job.
    async fn run_tab(&self, run: &mut TabRun<'_>) -> FaultResult<()>;
}

/// Runs a [`TabProcedure`] over the selected tabs.
pub struct Orchestrator<P> {
    procedure: P,
    ctx: MeasurementContext,
}

/// Sweep runs.
pub type SweepOrchestrator = Orchestrator<SweepProcedure>;
/// Delay runs.
pub type DelayOrchestrator = Orchestrator<DelayProcedure>;
/// VI runs.
pub type ViOrchestrator = Orchestrator<ViProcedure>;

impl Orchestrator<SweepProcedure> {
    /// A Sweep orchestrator.
    pub fn sweep(ctx: MeasurementContext) -> Self {
        Self::new(SweepProcedure::default(), ctx)
    }
}

impl Orchestrator<DelayProcedure> {
    /// A Delay orchestrator.
    pub fn delay(ctx: MeasurementContext) -> Self {
        Self::new(DelayProcedure::default(), ctx)
    }
}

impl Orchestrator<ViProcedure> {
    /// A VI orchestrator.
    pub fn vi(ctx: MeasurementContext) -> Self {
        Self::new(ViProcedure::default(), ctx)
    }
}

impl<P: TabProcedure> Orchestrator<P> {
    /// An orchestrator running `procedure` on every selected tab.
    pub fn new(procedure: P, ctx: MeasurementContext) -> Self {
        Self { procedure, ctx }
    }

    /// The shared context.
    pub fn context(&self) -> &MeasurementContext {
        &self.ctx
    }

    /// Validate without touching hardware. Returns `(messages, ok)`.
    pub fn validate(&self, request: &RunRequest) -> (Vec<String>, bool) {
        let Some(selected) = request.selected_tabs() else {
            return (vec!["no measurement condition selected".to_string()], false);
        };
        let graph = request.graph.clone().unwrap_or_else(|| {
            GraphBuilder::new(self.procedure.virtual_roles()).build(&request.checked, &request.tabs)
        });
        self.procedure.validator().validate(&graph, &selected)
    }

    /// Run every selected tab.
    ///
    /// Faults never escape as errors: they end up as `#` comment rows in the
    /// returned table. The only error is [`Fault::Cancelled`], after the
    /// partial rows were written to the abort file and every touched device
    /// was released.
    pub async fn run(&self, request: RunRequest, cancel: &CancelToken) -> FaultResult<Vec<ResultRow>> {
        let kind = self.procedure.kind();
        let Some(selected) = request.selected_tabs() else {
            info!(%kind, "no tab selected");
            return Ok(vec![ResultRow::comment("no measurement condition selected")]);
        };
        cancel.check()?;

        let mut graph = match request.graph {
            Some(graph) => graph,
            None => GraphBuilder::new(self.procedure.virtual_roles()).build(&request.checked, &request.tabs),
        };
        if graph.is_empty() {
            info!(%kind, "empty device graph");
            return Ok(vec![ResultRow::comment(
                "nothing to measure: no instrument checked or no tab configured",
            )]);
        }

        let (messages, ok) = self.procedure.validator().validate(&graph, &selected);
        if !ok {
            warn!(%kind, problems = messages.len(), "validation failed");
            return Ok(messages.into_iter().map(ResultRow::comment).collect());
        }

        let files = self.ctx.files(kind);
        let mut rows = self.header(&graph, &selected);
        info!(%kind, tabs = selected.len(), "measurement started");

        for tab in &selected {
            if cancel.is_cancelled() {
                self.flush(&files.abort(tab), &mut rows);
                return Err(Fault::Cancelled);
            }
            info!(%kind, tab = %tab, "tab started");

            let mut session = TabSession::new(tab.as_str());
            let (outcome, mut tab_rows) = {
                let mut run = TabRun::new(
                    &self.ctx,
                    &mut graph,
                    tab,
                    request.debug,
                    cancel,
                    &mut session,
                    &rows,
                    files.clone(),
                );
                let outcome = self.procedure.run_tab(&mut run).await;
                (outcome, run.into_rows())
            };
            let teardown = session.close().await;

            if let Err(fault) = &outcome {
                if !fault.is_cancelled() {
                    tab_rows.push(ResultRow::comment(fault.comment()));
                }
            }
            tab_rows.extend(teardown.iter().map(|f| ResultRow::comment(f.comment())));
            rows.extend(tab_rows);

            match outcome {
                Ok(()) => {
                    info!(%kind, tab = %tab, "tab finished");
                    self.flush(&files.checkpoint(), &mut rows);
                }
                Err(Fault::Cancelled) => {
                    warn!(%kind, tab = %tab, "measurement cancelled");
                    self.flush(&files.abort(tab), &mut rows);
                    return Err(Fault::Cancelled);
                }
                Err(fault) if fault.is_fatal() => {
                    error!(%kind, tab = %tab, %fault, "tab aborted, run stopped");
                    self.flush(&files.error(tab), &mut rows);
                    break;
                }
                Err(fault) => {
                    warn!(%kind, tab = %tab, %fault, "tab aborted");
                    self.flush(&files.checkpoint(), &mut rows);
                    if request.debug.stop_on_warning {
                        rows.push(ResultRow::comment("run stopped on warning"));
                        break;
                    }
                }
            }
        }

        self.flush(&files.result(), &mut rows);
        info!(%kind, rows = rows.len(), "measurement finished");
        Ok(rows)
    }

    fn header(&self, graph: &DeviceGraph, selected: &[String]) -> Vec<ResultRow> {
        let mut rows = vec![ResultRow::section("DeviceList")];
        rows.extend(graph.device_list().into_iter().map(ResultRow::cells));
        rows.push(ResultRow::section(self.procedure.kind().settings_section()));
        rows.extend(selected.iter().map(|tab| self.procedure.settings_row(graph, tab)));
        rows.push(ResultRow::section("Data"));
        rows
    }

    /// Write `rows` to `path`; a storage failure becomes a comment row.
    fn flush(&self, path: &Path, rows: &mut Vec<ResultRow>) {
        if let Err(e) = self.ctx.write(path, rows) {
            error!(path = %path.display(), error = %e, "result write failed");
            rows.push(ResultRow::comment(format!(
                "result write to {} failed: {}",
                path.display(),
                e
            )));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::ProtocolConfig;
    use crate::data::MemorySink;

    fn context(sink: Arc<MemorySink>) -> MeasurementContext {
        let transport = Arc::new(MockTransport::simulated());
        MeasurementContext::new(Bench::new(transport, ProtocolConfig::default()), sink)
    }

    #[tokio::test]
    async fn test_none_selected_returns_single_comment() {
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::vi(context(sink.clone()));
        let request = RunRequest::new(
            vec![CheckedInstrument::new("DMM1", "GPIB0::22", "34401A")],
            vec![TabConfig::new("Item1")],
        )
        .with_selected([NONE_SELECTED]);

        let rows = orchestrator.run(request, &CancelToken::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_comment());
        assert!(sink.writes().is_empty());
    }

    #[tokio::test]
    async fn test_empty_graph_is_nothing_to_measure() {
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::sweep(context(sink.clone()));
        let request = RunRequest::new(Vec::new(), vec![TabConfig::new("Item1")]);

        let rows = orchestrator.run(request, &CancelToken::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].to_string().contains("nothing to measure"));
        assert!(sink.writes().is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_touches_no_hardware() {
        let transport = Arc::new(MockTransport::simulated());
        let sink = Arc::new(MemorySink::new());
        let ctx = MeasurementContext::new(
            Bench::new(transport.clone(), ProtocolConfig::default()),
            sink,
        );
        let request = RunRequest::new(
            vec![CheckedInstrument::new("SOURCE1", "GPIB0::5", "B2902A")],
            vec![TabConfig::new("Item1")],
        );

        let rows = Orchestrator::vi(ctx).run(request, &CancelToken::new()).await.unwrap();
        assert!(!rows.is_empty());
        assert!(rows.iter().all(ResultRow::is_comment));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_propagates() {
        let sink = Arc::new(MemorySink::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let request = RunRequest::new(
            vec![CheckedInstrument::new("DMM1", "GPIB0::22", "34401A")],
            vec![TabConfig::new("Item1")],
        );
        let result = Orchestrator::vi(context(sink)).run(request, &cancel).await;
        assert_eq!(result, Err(Fault::Cancelled));
    }

    #[test]
    fn test_selected_tabs_trims_blanks() {
        let request = RunRequest::default().with_selected([" Item1 ", "", "Item2"]);
        assert_eq!(
            request.selected_tabs(),
            Some(vec!["Item1".to_string(), "Item2".to_string()])
        );
        assert_eq!(RunRequest::default().selected_tabs(), None);
    }
}
