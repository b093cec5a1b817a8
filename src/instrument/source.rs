//! Source/measure unit client (voltage or current source).

use super::ScpiClient;
use crate::cancel::CancelToken;
use crate::error::FaultResult;
use crate::settings::{SourceMode, SourceRange, SourceSettings};
use crate::units::format_value;

/// Source/measure unit driver.
#[derive(Clone)]
pub struct SourceClient {
    scpi: ScpiClient,
}

impl SourceClient {
    /// Wrap a protocol client.
    pub fn new(scpi: ScpiClient) -> Self {
        Self { scpi }
    }

    /// The underlying protocol client.
    pub fn scpi(&self) -> &ScpiClient {
        &self.scpi
    }

    /// Reset, then program mode, range, compliance limit and initial level.
    pub async fn configure(&self, settings: &SourceSettings, cancel: &CancelToken) -> FaultResult<()> {
        self.scpi.reset(cancel).await?;

        let mode = settings.mode.scpi();
        let limit_mode = settings.mode.limit_mode().scpi();
        self.scpi.send(&format!(":SOUR:FUNC:MODE {}", mode)).await?;
        match settings.range {
            SourceRange::Auto => {
                self.scpi
                    .send(&format!(":SOUR:{}:RANG:AUTO ON", mode))
                    .await?
            }
            SourceRange::Fixed(range) => {
                self.scpi
                    .send(&format!(":SOUR:{}:RANG:AUTO OFF", mode))
                    .await?;
                self.scpi
                    .send(&format!(":SOUR:{}:RANG {}", mode, format_value(range)))
                    .await?;
            }
        }
        self.scpi
            .send(&format!(
                ":SENS:{}:PROT {}",
                limit_mode,
                format_value(settings.limit)
            ))
            .await?;
        self.set_value(settings.mode, settings.value).await?;
        self.scpi.completion_wait(cancel).await
    }

    /// Program the output level in base units.
    pub async fn set_value(&self, mode: SourceMode, value: f64) -> FaultResult<()> {
        self.scpi
            .send(&format!(":SOUR:{} {}", mode.scpi(), format_value(value)))
            .await
    }

    /// Switch the output.
    pub async fn output(&self, on: bool) -> FaultResult<()> {
        self.scpi
            .send(if on { ":OUTP ON" } else { ":OUTP OFF" })
            .await
    }

    /// Measured output level.
    pub async fn measure(&self, mode: SourceMode) -> FaultResult<f64> {
        self.scpi
            .query_f64(&format!(":MEAS:{}?", mode.scpi()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::ProtocolConfig;
    use crate::settings::{SourceAction, SourceFunction};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_configure_fixed_range_voltage() {
        let transport = Arc::new(MockTransport::simulated());
        let client = SourceClient::new(ScpiClient::new(
            transport.clone(),
            "SOURCE1",
            "GPIB0::5",
            ProtocolConfig::default(),
        ));
        let settings = SourceSettings {
            action: SourceAction::Constant1,
            function: SourceFunction::Const,
            mode: SourceMode::Volt,
            value: 2.0,
            range: SourceRange::Fixed(2.0),
            range_unit: "V".to_string(),
            limit: 0.01,
            limit_unit: "A".to_string(),
            value_unit: "V".to_string(),
        };
        client.configure(&settings, &CancelToken::new()).await.unwrap();
        client.output(true).await.unwrap();

        let commands = transport.commands_for("GPIB0::5");
        assert_eq!(commands[0], "*RST");
        assert!(commands.contains(&":SOUR:VOLT:RANG 2.000000000".to_string()));
        assert!(commands.contains(&":SENS:CURR:PROT 0.010000000".to_string()));
        assert!(commands.contains(&":SOUR:VOLT 2.000000000".to_string()));
        assert_eq!(commands.last().map(String::as_str), Some(":OUTP ON"));
    }
}
