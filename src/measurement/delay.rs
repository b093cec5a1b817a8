//! Delay orchestrator: propagation delay between a pulse edge and the
//! device's response, read from the oscilloscope delay measurement.

use super::sweep::{sweep_settings, sweep_settings_cells, sweep_values};
use super::tab::{SweepTarget, TabRun};
use super::validate::{DelayValidator, Validator};
use super::TabProcedure;
use crate::data::{MeasurementKind, ResultRow};
use crate::error::{Fault, FaultResult};
use crate::graph::{DeviceGraph, ROLE_DETREL, ROLE_OSC, ROLE_PULSE, ROLE_SWEEP};
use crate::instrument::{OscilloscopeClient, PulseGeneratorClient};
use crate::settings::OscilloscopeSettings;
use crate::units::{format_value, Nanos};
use async_trait::async_trait;
use tracing::{info, warn};

/// Time until the whole screen after the trigger has been captured.
///
/// `time_per_div * (100 - trigger_position_percent) / 100 * 10` divisions.
pub fn measure_wait_time(time_per_div: f64, trigger_position_percent: f64) -> f64 {
    time_per_div * (100.0 - trigger_position_percent) / 100.0 * 10.0
}

/// Per-step pulse-to-output delay measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct DelayProcedure {
    validator: DelayValidator,
}

#[async_trait]
impl TabProcedure for DelayProcedure {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::Delay
    }

    fn virtual_roles(&self) -> &'static [&'static str] {
        &[ROLE_SWEEP, ROLE_DETREL]
    }

    fn validator(&self) -> &dyn Validator {
        &self.validator
    }

    fn settings_row(&self, graph: &DeviceGraph, tab: &str) -> ResultRow {
        let mut cells = sweep_settings_cells(graph, tab);
        if let Some(osc) = graph.osc(tab) {
            cells.push(format!("time_per_div={}", format_value(osc.time_per_div)));
            cells.push(format!(
                "trigger_position={}",
                format_value(osc.trigger_position_percent)
            ));
            cells.push(format!("measure_wait={}", format_value(wait_for(osc))));
        }
        ResultRow::Cells(cells)
    }

    async fn run_tab(&self, run: &mut TabRun<'_>) -> FaultResult<()> {
        let sweep = sweep_settings(run)?;
        let osc_settings = run
            .graph()
            .osc(run.tab())
            .cloned()
            .ok_or_else(|| Fault::fatal(ROLE_OSC, "settings", "no oscilloscope settings"))?;
        let wait = wait_for(&osc_settings);

        run.condition_chamber().await?;
        let sources = run.init_sources().await?;
        let osc = run
            .init_osc()
            .await?
            .ok_or_else(|| Fault::fatal(ROLE_OSC, "delay", "oscilloscope not available"))?;
        let (pulse, pulse_settings) = run
            .init_pulse(true)
            .await?
            .ok_or_else(|| Fault::fatal(ROLE_PULSE, "delay", "pulse generator not available"))?;

        run.enable_outputs(&sources, Some(&pulse)).await?;
        run.sleep_secs(sweep.standby_time).await?;
        run.detect_release(&sources).await?;
        info!(tab = %run.tab(), wait_s = wait, normal = sweep.normal_sweep, "delay measurement");

        if !sweep.normal_sweep {
            let level = sources
                .iter()
                .find(|s| s.settings.is_sweep())
                .map_or(pulse_settings.high_level, |s| s.settings.value);
            let delay = measure_point(run, &osc, &pulse, wait).await?;
            run.push_row(ResultRow::cells([
                run.tab().to_string(),
                Nanos::from_f64(level).to_string(),
                delay,
            ]));
            return run.checkpoint();
        }

        let every = run.timing().checkpoint_every.max(1);
        for &slope in sweep.direction.passes() {
            let target = SweepTarget::select(&sources, Some((&pulse, &pulse_settings)), slope)
                .ok_or_else(|| {
                    Fault::fatal(ROLE_SWEEP, "sweep target", "no sweep source or enabled pulse generator")
                })?;
            let values = sweep_values(sweep.min, sweep.max, sweep.step, slope);
            for (index, value) in values.iter().enumerate() {
                run.cancel().check()?;
                target.apply(run, value.as_f64()).await?;
                run.sleep(run.timing().value_settle()).await?;

                let delay = measure_point(run, &osc, &pulse, wait).await?;
                run.push_row(ResultRow::cells([
                    run.tab().to_string(),
                    value.to_string(),
                    delay,
                ]));

                run.sleep_secs(sweep.step_time).await?;
                if (index + 1) % every == 0 {
                    run.checkpoint()?;
                }
            }
        }
        Ok(())
    }
}

fn wait_for(osc: &OscilloscopeSettings) -> f64 {
    measure_wait_time(osc.time_per_div, osc.trigger_position_percent)
}

/// Arm a single acquisition, fire one pulse, wait for the capture and read the
/// delay. A failed read is recorded as a comment and an empty cell.
async fn measure_point(
    run: &mut TabRun<'_>,
    osc: &OscilloscopeClient,
    pulse: &PulseGeneratorClient,
    wait: f64,
) -> FaultResult<String> {
    osc.single().await?;
    pulse.trigger().await?;
    run.sleep_secs(wait).await?;
    match osc.read_delay().await {
        Ok(delay) => Ok(delay.to_string()),
        Err(Fault::Cancelled) => Err(Fault::Cancelled),
        Err(fault) => {
            warn!(tab = %run.tab(), %fault, "delay read failed");
            run.push_comment(fault.comment());
            Ok(String::new())
        }
    }
}
