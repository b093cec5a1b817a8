//! VI orchestrator: one multimeter snapshot per tab at constant source levels.

use super::tab::TabRun;
use super::validate::{Validator, ViValidator};
use super::TabProcedure;
use crate::data::{MeasurementKind, ResultRow};
use crate::error::{Fault, FaultResult};
use crate::graph::{DeviceGraph, RoleKind, ROLE_DETREL, ROLE_VI};
use crate::units::format_value;
use async_trait::async_trait;
use chrono::Local;
use tracing::info;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// One timestamped voltage/current snapshot per tab.
#[derive(Debug, Default, Clone, Copy)]
pub struct ViProcedure {
    validator: ViValidator,
}

#[async_trait]
impl TabProcedure for ViProcedure {
    fn kind(&self) -> MeasurementKind {
        MeasurementKind::Vi
    }

    fn virtual_roles(&self) -> &'static [&'static str] {
        &[ROLE_VI, ROLE_DETREL]
    }

    fn validator(&self) -> &dyn Validator {
        &self.validator
    }

    fn settings_row(&self, graph: &DeviceGraph, tab: &str) -> ResultRow {
        let mut cells = vec![tab.to_string()];
        if let Some(vi) = graph.vi(tab) {
            cells.push(format!("standby_time={}", format_value(vi.standby_time)));
        }
        for device in graph.of_kind(RoleKind::Source) {
            if let Some(source) = device.settings(tab).and_then(|s| s.as_source()) {
                if source.action.is_used() {
                    cells.push(format!(
                        "{}={}{}",
                        device.role_id,
                        format_value(source.value),
                        source.mode.unit_symbol()
                    ));
                }
            }
        }
        ResultRow::Cells(cells)
    }

    async fn run_tab(&self, run: &mut TabRun<'_>) -> FaultResult<()> {
        let vi = run
            .graph()
            .vi(run.tab())
            .cloned()
            .ok_or_else(|| Fault::fatal(ROLE_VI, "settings", format!("no VI settings for {}", run.tab())))?;

        run.condition_chamber().await?;
        let sources = run.init_sources().await?;
        let dmms = run.init_dmms().await?;
        let pulse = run.init_pulse(false).await?;

        run.enable_outputs(&sources, pulse.as_ref().map(|(client, _)| client))
            .await?;
        run.detect_release(&sources).await?;
        run.sleep_secs(vi.standby_time).await?;

        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut cells = vec![run.tab().to_string(), timestamp];
        cells.extend(run.read_dmms(&dmms).await?);
        info!(tab = %run.tab(), readings = dmms.len(), "VI snapshot");
        run.push_row(ResultRow::Cells(cells));
        run.checkpoint()
    }
}
