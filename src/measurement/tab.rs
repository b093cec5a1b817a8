//! Per-tab execution state and the steps the orchestrators share.
//!
//! A [`TabRun`] is created by the runner for one tab and handed to the
//! orchestrator. Every client it creates is registered with the tab's
//! [`TabSession`], so teardown reaches it on every exit path.

use super::session::TabSession;
use super::MeasurementContext;
use crate::cancel::CancelToken;
use crate::config::{DebugOptions, TimingConfig};
use crate::data::{ResultFiles, ResultRow};
use crate::error::{Fault, FaultResult};
use crate::graph::{DeviceGraph, RoleKind, ROLE_CHAMBER, ROLE_DETREL, ROLE_OSC, ROLE_PULSE};
use crate::instrument::{MultimeterClient, OscilloscopeClient, PulseGeneratorClient, SourceClient};
use crate::settings::{
    DetectReleaseAction, PulseGeneratorSettings, Slope, SourceMode, SourceRange, SourceSettings,
    TriggerSource,
};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Role label for result-file faults.
const RESULT_ROLE: &str = "RESULT";

/// A configured source and the settings it was configured with.
#[derive(Clone)]
pub struct ActiveSource {
    /// Role id.
    pub role: String,
    /// Driver, already configured.
    pub client: SourceClient,
    /// Settings applied to it.
    pub settings: SourceSettings,
}

/// A configured multimeter.
#[derive(Clone)]
pub struct ActiveDmm {
    /// Role id.
    pub role: String,
    /// Driver, already configured.
    pub client: MultimeterClient,
    /// Trigger source it was armed with.
    pub trigger: TriggerSource,
}

/// The level a sweep or search pass drives.
#[derive(Clone)]
pub enum SweepTarget {
    /// A source with action `Sweep`.
    Source {
        /// Role id of the source.
        role: String,
        /// Quantity being swept.
        mode: SourceMode,
        /// Output range, bounding a search.
        range: SourceRange,
        /// Driver.
        client: SourceClient,
    },
    /// Pulse high level, low level pinned.
    PulseHigh {
        /// Pinned low level.
        low: f64,
        /// Driver.
        client: PulseGeneratorClient,
    },
    /// Pulse low level, high level pinned.
    PulseLow {
        /// Pinned high level.
        high: f64,
        /// Driver.
        client: PulseGeneratorClient,
    },
}

impl SweepTarget {
    /// Picks the swept quantity for one pass.
    ///
    /// A source with action `Sweep` wins; otherwise an enabled pulse generator
    /// sweeps its high level on a rising pass and its low level on a falling
    /// pass.
    pub fn select(
        sources: &[ActiveSource],
        pulse: Option<(&PulseGeneratorClient, &PulseGeneratorSettings)>,
        slope: Slope,
    ) -> Option<SweepTarget> {
        if let Some(source) = sources.iter().find(|s| s.settings.is_sweep()) {
            return Some(SweepTarget::Source {
                role: source.role.clone(),
                mode: source.settings.mode,
                range: source.settings.range,
                client: source.client.clone(),
            });
        }
        let (client, settings) = pulse.filter(|(_, s)| s.enabled)?;
        Some(match slope {
            Slope::Rise => SweepTarget::PulseHigh {
                low: settings.low_level,
                client: client.clone(),
            },
            Slope::Fall => SweepTarget::PulseLow {
                high: settings.high_level,
                client: client.clone(),
            },
        })
    }

    /// Whether a pulse level is swept.
    pub fn is_pulse(&self) -> bool {
        !matches!(self, SweepTarget::Source { .. })
    }

    /// Output range bounding a search; the pulse generator auto-ranges.
    pub fn range(&self) -> SourceRange {
        match self {
            SweepTarget::Source { range, .. } => *range,
            _ => SourceRange::Auto,
        }
    }

    /// Apply one level. Any failure leaves the output in an unknown state and
    /// is therefore fatal for the tab.
    pub async fn apply(&self, run: &mut TabRun<'_>, value: f64) -> FaultResult<()> {
        let result = match self {
            SweepTarget::Source { role, mode, client, .. } => {
                let result = client.set_value(*mode, value).await;
                if result.is_ok() {
                    let tab = run.tab.to_string();
                    run.graph.set_source_value(role, &tab, value);
                }
                result
            }
            SweepTarget::PulseHigh { low, client } => {
                client.set_levels(low.min(value), value, run.cancel).await
            }
            SweepTarget::PulseLow { high, client } => {
                client.set_levels(value, high.max(value), run.cancel).await
            }
        };
        result.map_err(Fault::escalate)
    }
}

/// State of one tab while an orchestrator runs it.
pub struct TabRun<'a> {
    ctx: &'a MeasurementContext,
    graph: &'a mut DeviceGraph,
    tab: &'a str,
    debug: DebugOptions,
    cancel: &'a CancelToken,
    session: &'a mut TabSession,
    prior: &'a [ResultRow],
    files: ResultFiles,
    rows: Vec<ResultRow>,
}

impl<'a> TabRun<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        ctx: &'a MeasurementContext,
        graph: &'a mut DeviceGraph,
        tab: &'a str,
        debug: DebugOptions,
        cancel: &'a CancelToken,
        session: &'a mut TabSession,
        prior: &'a [ResultRow],
        files: ResultFiles,
    ) -> Self {
        Self {
            ctx,
            graph,
            tab,
            debug,
            cancel,
            session,
            prior,
            files,
            rows: Vec::new(),
        }
    }

    /// Tab being measured.
    pub fn tab(&self) -> &str {
        self.tab
    }

    /// The run's device graph.
    pub fn graph(&self) -> &DeviceGraph {
        self.graph
    }

    /// Cancellation token of the run.
    pub fn cancel(&self) -> &CancelToken {
        self.cancel
    }

    /// Timing settings.
    pub fn timing(&self) -> &TimingConfig {
        &self.ctx.timing
    }

    /// Debug switches.
    pub fn debug(&self) -> DebugOptions {
        self.debug
    }

    /// Rows collected for this tab.
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    /// Append a row.
    pub fn push_row(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    /// Append a `#` comment row.
    pub fn push_comment(&mut self, text: impl Into<String>) {
        self.rows.push(ResultRow::comment(text));
    }

    pub(crate) fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }

    /// Sleep, returning early with [`Fault::Cancelled`].
    pub async fn sleep(&self, duration: Duration) -> FaultResult<()> {
        self.cancel.sleep(duration).await
    }

    /// Sleep for `seconds`, returning early with [`Fault::Cancelled`].
    pub async fn sleep_secs(&self, seconds: f64) -> FaultResult<()> {
        self.cancel.sleep_secs(seconds).await
    }

    /// Rewrite the checkpoint file with everything collected so far.
    pub fn checkpoint(&self) -> FaultResult<()> {
        let mut snapshot = self.prior.to_vec();
        snapshot.extend(self.rows.iter().cloned());
        self.ctx
            .write(&self.files.checkpoint(), &snapshot)
            .map_err(|e| Fault::warning(RESULT_ROLE, "checkpoint", e))
    }

    /// `(role, address)` of hardware devices of `kind` with settings on this tab.
    fn hardware_on_tab(&self, kind: RoleKind) -> Vec<(String, String)> {
        self.graph
            .of_kind(kind)
            .filter(|d| d.settings(self.tab).is_some())
            .filter_map(|d| d.bus_address.clone().map(|a| (d.role_id.clone(), a)))
            .collect()
    }

    fn address_of(&self, role: &str) -> Option<String> {
        self.graph.device(role).and_then(|d| d.bus_address.clone())
    }

    /// Bring the thermal chamber to the tab's set point and soak.
    ///
    /// No-op without a checked chamber or chamber settings on this tab.
    pub async fn condition_chamber(&mut self) -> FaultResult<()> {
        let Some(settings) = self.graph.chamber(self.tab).cloned() else {
            return Ok(());
        };
        let Some(address) = self.address_of(ROLE_CHAMBER) else {
            return Ok(());
        };
        let chamber = self.ctx.bench.thermal_chamber(ROLE_CHAMBER, &address);
        self.session.touch(chamber.scpi());

        info!(tab = %self.tab, target = settings.target_celsius, "chamber conditioning");
        chamber.set_temperature(settings.target_celsius).await?;
        chamber
            .wait_stable(
                self.ctx.timing.chamber_poll(),
                self.ctx.timing.chamber_timeout(),
                self.cancel,
            )
            .await?;
        self.sleep_secs(settings.soak_time).await
    }

    /// Reset and configure every used source.
    pub async fn init_sources(&mut self) -> FaultResult<Vec<ActiveSource>> {
        let mut active = Vec::new();
        for (role, address) in self.hardware_on_tab(RoleKind::Source) {
            let Some(settings) = self.graph.source(&role, self.tab).cloned() else {
                continue;
            };
            if !settings.action.is_used() {
                continue;
            }
            let client = self.ctx.bench.source(&role, &address);
            self.session.track_source(&client);
            client.configure(&settings, self.cancel).await?;
            debug!(tab = %self.tab, role = %role, "source configured");
            active.push(ActiveSource {
                role,
                client,
                settings,
            });
        }
        Ok(active)
    }

    /// Reset and configure every multimeter with settings on this tab.
    pub async fn init_dmms(&mut self) -> FaultResult<Vec<ActiveDmm>> {
        let mut active = Vec::new();
        for (role, address) in self.hardware_on_tab(RoleKind::Multimeter) {
            let Some(settings) = self.graph.dmm(&role, self.tab).cloned() else {
                continue;
            };
            let client = self.ctx.bench.multimeter(&role, &address);
            self.session.touch(client.scpi());
            client.configure(&settings, self.cancel).await?;
            active.push(ActiveDmm {
                role,
                client,
                trigger: settings.trigger_source,
            });
        }
        Ok(active)
    }

    /// Reset and configure the oscilloscope; `None` if it is not checked or
    /// has no settings on this tab.
    pub async fn init_osc(&mut self) -> FaultResult<Option<OscilloscopeClient>> {
        let Some(settings) = self.graph.osc(self.tab).cloned() else {
            return Ok(None);
        };
        let Some(address) = self.address_of(ROLE_OSC) else {
            return Ok(None);
        };
        let osc = self.ctx.bench.oscilloscope(ROLE_OSC, &address);
        self.session.track_osc(&osc);
        osc.configure(&settings, self.debug.use_8ch_osc, self.cancel)
            .await?;
        Ok(Some(osc))
    }

    /// Reset and configure an enabled pulse generator. With `triggered` it
    /// waits for a bus trigger per pulse.
    pub async fn init_pulse(
        &mut self,
        triggered: bool,
    ) -> FaultResult<Option<(PulseGeneratorClient, PulseGeneratorSettings)>> {
        let Some(settings) = self.graph.pulse(self.tab).filter(|p| p.enabled).cloned() else {
            return Ok(None);
        };
        let Some(address) = self.address_of(ROLE_PULSE) else {
            return Ok(None);
        };
        let pulse = self
            .ctx
            .bench
            .pulse_generator(ROLE_PULSE, &address)
            .with_channel(settings.channel);
        self.session.track_pulse(&pulse);
        pulse.configure(&settings, triggered, self.cancel).await?;
        Ok(Some((pulse, settings)))
    }

    /// Switch on source and pulse outputs, then wait the output settle time.
    pub async fn enable_outputs(
        &mut self,
        sources: &[ActiveSource],
        pulse: Option<&PulseGeneratorClient>,
    ) -> FaultResult<()> {
        for source in sources {
            source.client.output(true).await.map_err(Fault::escalate)?;
        }
        if let Some(pulse) = pulse {
            pulse.output(true).await.map_err(Fault::escalate)?;
        }
        debug!(tab = %self.tab, sources = sources.len(), "outputs enabled");
        self.sleep(self.ctx.timing.output_settle()).await
    }

    /// Drive the detect/release sequence to the resting state.
    ///
    /// `ActNormal` applies the reset levels and waits the check time.
    /// `ActSpecial1` first applies the set levels, waits, then resets and
    /// waits again.
    pub async fn detect_release(&mut self, sources: &[ActiveSource]) -> FaultResult<()> {
        let Some(settings) = self.graph.detect_release(self.tab).cloned() else {
            return Ok(());
        };
        let aux: Vec<_> = settings.aux_sources().cloned().collect();
        if aux.is_empty() {
            return Ok(());
        }

        let lookup = |role: &str| {
            sources
                .iter()
                .find(|s| s.role.eq_ignore_ascii_case(role))
                .ok_or_else(|| {
                    Fault::fatal(
                        ROLE_DETREL,
                        "detect/release",
                        format!("source {} is not configured on this tab", role),
                    )
                })
        };

        if settings.action == DetectReleaseAction::ActSpecial1 {
            for a in &aux {
                let source = lookup(&a.role_id)?;
                source
                    .client
                    .set_value(source.settings.mode, a.set_value)
                    .await
                    .map_err(Fault::escalate)?;
            }
            self.sleep_secs(settings.check_time).await?;
        }
        for a in &aux {
            let source = lookup(&a.role_id)?;
            source
                .client
                .set_value(source.settings.mode, a.reset_value)
                .await
                .map_err(Fault::escalate)?;
        }
        self.sleep_secs(settings.check_time).await
    }

    /// Read every multimeter per its trigger source.
    ///
    /// A failed reading leaves its cell empty and adds a comment row.
    pub async fn read_dmms(&mut self, dmms: &[ActiveDmm]) -> FaultResult<Vec<String>> {
        let mut cells = Vec::with_capacity(dmms.len());
        for dmm in dmms {
            match dmm.client.measure(dmm.trigger, self.cancel).await {
                Ok(value) => cells.push(value.to_string()),
                Err(Fault::Cancelled) => return Err(Fault::Cancelled),
                Err(fault) => {
                    warn!(tab = %self.tab, role = %dmm.role, %fault, "reading failed");
                    self.push_comment(fault.comment());
                    cells.push(String::new());
                }
            }
        }
        Ok(cells)
    }
}
