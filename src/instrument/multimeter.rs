//! Digital multimeter client.

use super::ScpiClient;
use crate::cancel::CancelToken;
use crate::error::FaultResult;
use crate::settings::{MultimeterSettings, TriggerSource};

/// Digital multimeter driver.
#[derive(Clone)]
pub struct MultimeterClient {
    scpi: ScpiClient,
}

impl MultimeterClient {
    /// Wrap a protocol client.
    pub fn new(scpi: ScpiClient) -> Self {
        Self { scpi }
    }

    /// The underlying protocol client.
    pub fn scpi(&self) -> &ScpiClient {
        &self.scpi
    }

    /// Reset, then program function, range, integration time, display and trigger.
    pub async fn configure(&self, settings: &MultimeterSettings, cancel: &CancelToken) -> FaultResult<()> {
        self.scpi.reset(cancel).await?;

        let function = settings.mode.scpi();
        let range = settings.range.trim();
        if range.is_empty() || range.eq_ignore_ascii_case("auto") {
            self.scpi.send(&format!(":CONF:{} AUTO", function)).await?;
        } else {
            self.scpi
                .send(&format!(":CONF:{} {}", function, range))
                .await?;
        }
        self.scpi
            .send(&format!(":SENS:{}:NPLC {}", function, settings.plc.trim()))
            .await?;
        self.scpi
            .send(if settings.display_on { ":DISP ON" } else { ":DISP OFF" })
            .await?;
        self.scpi
            .send(&format!(":TRIG:SOUR {}", settings.trigger_source.scpi()))
            .await?;
        self.scpi.completion_wait(cancel).await
    }

    /// Take one reading according to the configured trigger source.
    ///
    /// `IMM` reads directly; `BUS` and `EXT` arm, send a bus trigger, wait for
    /// completion and fetch.
    pub async fn measure(&self, trigger: TriggerSource, cancel: &CancelToken) -> FaultResult<f64> {
        cancel.check()?;
        match trigger {
            TriggerSource::Imm => self.scpi.query_f64("READ?").await,
            TriggerSource::Bus | TriggerSource::Ext => {
                self.scpi.send("INIT").await?;
                self.scpi.send("*TRG").await?;
                self.scpi.completion_wait(cancel).await?;
                self.scpi.query_f64("FETC?").await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::ProtocolConfig;
    use std::sync::Arc;

    fn client(transport: Arc<MockTransport>) -> MultimeterClient {
        MultimeterClient::new(ScpiClient::new(
            transport,
            "DMM1",
            "GPIB0::22",
            ProtocolConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_imm_reads_directly() {
        let transport = Arc::new(MockTransport::with_responder(|_, cmd| {
            (cmd == "READ?").then(|| "+1.99990E+00".to_string())
        }));
        let dmm = client(transport.clone());
        let value = dmm.measure(TriggerSource::Imm, &CancelToken::new()).await.unwrap();
        assert!((value - 1.9999).abs() < 1e-12);
        assert_eq!(transport.commands_for("GPIB0::22"), vec!["READ?"]);
    }

    #[tokio::test]
    async fn test_bus_trigger_before_fetch() {
        let transport = Arc::new(MockTransport::with_responder(|_, cmd| {
            (cmd == "FETC?").then(|| "0.25".to_string())
        }));
        let dmm = client(transport.clone());
        let value = dmm.measure(TriggerSource::Bus, &CancelToken::new()).await.unwrap();
        assert_eq!(value, 0.25);
        let commands = transport.commands_for("GPIB0::22");
        assert_eq!(commands[0], "INIT");
        assert_eq!(commands[1], "*TRG");
        assert_eq!(commands.last().map(String::as_str), Some("FETC?"));
    }
}
