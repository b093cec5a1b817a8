//! Sweep orchestrator.
//!
//! A normal sweep steps the swept level from `min` to `max` (or back) in
//! fixed-point nanounits and reads every multimeter at each step. Otherwise
//! the tab runs the digit-wise trigger search once per pass and reports the
//! trigger level.

use super::tab::{ActiveDmm, ActiveSource, SweepTarget, TabRun};
use super::validate::{SweepValidator, Validator};
use super::TabProcedure;
use crate::data::{MeasurementKind, ResultRow};
use crate::error::{Fault, FaultResult};
use crate::graph::{DeviceGraph, ROLE_DETREL, ROLE_OSC, ROLE_SWEEP};
use crate::instrument::OscilloscopeClient;
use crate::search::{run_search, SearchPlan, TriggerProbe, SEARCH_ROLE};
use crate::settings::{Slope, SweepSettings};
use crate::units::{format_value, Nanos};
use async_trait::async_trait;
use tracing::{debug, info};

/// Swept levels of one pass, `floor((max - min) / step) + 1` of them.
///
/// All arithmetic is done in [`Nanos`], so the last value lands exactly on
/// `min + n * step` however many steps there are.
pub fn sweep_values(min: f64, max: f64, step: f64, slope: Slope) -> Vec<Nanos> {
    let (min, max, step) = (Nanos::from_f64(min), Nanos::from_f64(max), Nanos::from_f64(step));
    if step.0 <= 0 || max < min {
        return Vec::new();
    }
    let count = (max.0 - min.0) / step.0;
    (0..=count)
        .map(|i| match slope {
            Slope::Rise => Nanos(min.0 + i * step.0),
            Slope::Fall => Nanos(max.0 - i * step.0),
        })
        .collect()
}

pub(crate) fn sweep_settings(run: &TabRun<'_>) -> FaultResult<SweepSettings> {
    run.graph()
        .sweep(run.tab())
        .cloned()
        .ok_or_else(|| Fault::fatal(ROLE_SWEEP, "settings", format!("no sweep settings for {}", run.tab())))
}

pub(crate) fn sweep_settings_cells(graph: &DeviceGraph, tab: &str) -> Vec<String> {
    let mut cells = vec![tab.to_string()];
    if let Some(sweep) = graph.sweep(tab) {
        cells.push(format!("direction={}", sweep.direction.as_str()));
        cells.push(format!("normal_sweep={}", sweep.normal_sweep));
        cells.push(format!("min={}", format_value(sweep.min)));
        cells.push(format!("max={}", format_value(sweep.max)));
        cells.push(format!("step={}", format_value(sweep.step)));
        cells.push(format!("step_time={}", format_value(sweep.step_time)));
        cells.push(format!("standby_time={}", format_value(sweep.standby_time)));
    }
    cells
}

/// Normal sweep or digit-wise trigger search per tab.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepProcedure {
    validator: SweepValidator,
}

#[async_trait]
impl TabProcedure for SweepProcedure {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::Sweep
    }

    fn virtual_roles(&self) -> &'static [&'static str] {
        &[ROLE_SWEEP, ROLE_DETREL]
    }

    fn validator(&self) -> &dyn Validator {
        &self.validator
    }

    fn settings_row(&self, graph: &DeviceGraph, tab: &str) -> ResultRow {
        ResultRow::Cells(sweep_settings_cells(graph, tab))
    }

    async fn run_tab(&self, run: &mut TabRun<'_>) -> FaultResult<()> {
        let sweep = sweep_settings(run)?;

        run.condition_chamber().await?;
        let sources = run.init_sources().await?;
        let dmms = run.init_dmms().await?;
        let osc = if sweep.normal_sweep {
            None
        } else {
            let osc = run.init_osc().await?.ok_or_else(|| {
                Fault::fatal(ROLE_OSC, "trigger search", "oscilloscope not available")
            })?;
            osc.run().await?;
            Some(osc)
        };
        let pulse = run.init_pulse(false).await?;

        run.enable_outputs(&sources, pulse.as_ref().map(|(client, _)| client))
            .await?;
        run.sleep_secs(sweep.standby_time).await?;

        for &slope in sweep.direction.passes() {
            run.cancel().check()?;
            let target = SweepTarget::select(
                &sources,
                pulse.as_ref().map(|(client, settings)| (client, settings)),
                slope,
            )
            .ok_or_else(|| {
                Fault::fatal(ROLE_SWEEP, "sweep target", "no sweep source or enabled pulse generator")
            })?;

            match &osc {
                None => normal_pass(run, &sweep, slope, &target, &sources, &dmms).await?,
                Some(osc) => search_pass(run, &sweep, slope, &target, &sources, osc).await?,
            }
        }
        Ok(())
    }
}

async fn normal_pass(
    run: &mut TabRun<'_>,
    sweep: &SweepSettings,
    slope: Slope,
    target: &SweepTarget,
    sources: &[ActiveSource],
    dmms: &[ActiveDmm],
) -> FaultResult<()> {
    let values = sweep_values(sweep.min, sweep.max, sweep.step, slope);
    info!(tab = %run.tab(), ?slope, steps = values.len(), "sweep pass");
    run.detect_release(sources).await?;

    let every = run.timing().checkpoint_every.max(1);
    for (index, value) in values.iter().enumerate() {
        run.cancel().check()?;
        target.apply(run, value.as_f64()).await?;
        run.sleep(run.timing().value_settle()).await?;

        let mut cells = vec![run.tab().to_string(), value.to_string()];
        cells.extend(run.read_dmms(dmms).await?);
        run.push_row(ResultRow::Cells(cells));

        run.sleep_secs(sweep.step_time).await?;
        if (index + 1) % every == 0 {
            debug!(tab = %run.tab(), step = index + 1, "checkpoint");
            run.checkpoint()?;
        }
    }
    Ok(())
}

async fn search_pass(
    run: &mut TabRun<'_>,
    sweep: &SweepSettings,
    slope: Slope,
    target: &SweepTarget,
    sources: &[ActiveSource],
    osc: &OscilloscopeClient,
) -> FaultResult<()> {
    let timing = run.timing().clone();
    let plan = SearchPlan::new(
        target.range(),
        sweep.min,
        sweep.max,
        slope,
        target.is_pulse(),
        timing.pulse_initial_mv * 1e-3,
        timing.sub_microvolt_guard,
    )
    .map_err(|message| Fault::warning(SEARCH_ROLE, "search plan", message))?;
    info!(tab = %run.tab(), ?slope, digits = plan.digits.len(), "trigger search");

    let cancel = run.cancel().clone();
    let report = {
        let mut probe = HardwareProbe {
            run: &mut *run,
            target,
            sources,
            osc,
            step_time: sweep.step_time,
        };
        run_search(&plan, &mut probe, &cancel).await?
    };

    for note in report.notes {
        run.push_comment(note);
    }
    if let Some(trigger) = report.trigger {
        run.push_row(ResultRow::cells([run.tab().to_string(), trigger.to_string()]));
    }
    target.apply(run, plan.initial.as_volts()).await?;
    run.checkpoint()
}

/// Drives the search against the bench: the swept level, the detect/release
/// sequence and the oscilloscope trigger event register.
struct HardwareProbe<'r, 'a> {
    run: &'r mut TabRun<'a>,
    target: &'r SweepTarget,
    sources: &'r [ActiveSource],
    osc: &'r OscilloscopeClient,
    step_time: f64,
}

#[async_trait]
impl<'r, 'a> TriggerProbe for HardwareProbe<'r, 'a> {
    async fn rest(&mut self, initial: f64) -> FaultResult<bool> {
        self.target.apply(self.run, initial).await?;
        self.run.detect_release(self.sources).await?;
        self.run.sleep(self.run.timing().value_settle()).await?;
        // events raised by the transition itself do not count
        self.osc.clear_trigger().await?;
        self.run.sleep_secs(self.step_time).await?;
        self.osc.is_triggered().await
    }

    async fn step_to(&mut self, value: f64) -> FaultResult<bool> {
        self.target.apply(self.run, value).await?;
        self.run.sleep_secs(self.step_time).await?;
        self.osc.is_triggered().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_values_are_exact() {
        let values = sweep_values(0.0, 0.000000003, 0.000000001, Slope::Rise);
        let rendered: Vec<String> = values.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["0.000000000", "0.000000001", "0.000000002", "0.000000003"]
        );
    }

    #[test]
    fn test_sweep_values_fall_and_partial_step() {
        let values = sweep_values(0.0, 1.0, 0.3, Slope::Fall);
        assert_eq!(
            values,
            vec![
                Nanos(1_000_000_000),
                Nanos(700_000_000),
                Nanos(400_000_000),
                Nanos(100_000_000)
            ]
        );
    }

    #[test]
    fn test_many_steps_do_not_drift() {
        let values = sweep_values(-1.0, 1.0, 0.001, Slope::Rise);
        assert_eq!(values.len(), 2001);
        assert_eq!(values[1000], Nanos(0));
        assert_eq!(values.last().copied(), Some(Nanos(1_000_000_000)));
        assert!(values.windows(2).all(|w| w[1].0 - w[0].0 == 1_000_000));
    }

    #[test]
    fn test_empty_when_step_not_positive() {
        assert!(sweep_values(0.0, 1.0, 0.0, Slope::Rise).is_empty());
        assert!(sweep_values(1.0, 0.0, 0.1, Slope::Rise).is_empty());
    }
}
