//! Thermal chamber client: set point and stability polling.

use super::ScpiClient;
use crate::cancel::CancelToken;
use crate::error::{Fault, FaultResult};
use crate::units::format_value;
use std::time::{Duration, Instant};
use tracing::info;

/// Thermal chamber driver.
#[derive(Clone)]
pub struct ThermalChamberClient {
    scpi: ScpiClient,
}

impl ThermalChamberClient {
    /// Wrap a protocol client.
    pub fn new(scpi: ScpiClient) -> Self {
        Self { scpi }
    }

    /// The underlying protocol client.
    pub fn scpi(&self) -> &ScpiClient {
        &self.scpi
    }

    /// Send the set point in degrees Celsius.
    pub async fn set_temperature(&self, celsius: f64) -> FaultResult<()> {
        self.scpi
            .send(&format!(":TEMP:SETP {}", format_value(celsius)))
            .await
    }

    /// Measured chamber temperature.
    pub async fn temperature(&self) -> FaultResult<f64> {
        self.scpi.query_f64(":TEMP:MEAS?").await
    }

    /// Stability bit of the chamber controller.
    pub async fn is_stable(&self) -> FaultResult<bool> {
        Ok(self.scpi.query_register(":TEMP:STAB?").await? != 0)
    }

    /// Poll the stability bit until set, failing with `Fault::Timeout` after
    /// `timeout`.
    pub async fn wait_stable(
        &self,
        poll: Duration,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> FaultResult<()> {
        let started = Instant::now();
        loop {
            cancel.check()?;
            if self.is_stable().await? {
                info!(role = %self.scpi.role(), elapsed_s = started.elapsed().as_secs(), "chamber stable");
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(Fault::timeout(
                    self.scpi.role(),
                    "temperature stabilisation",
                    format!("not stable within {} s", timeout.as_secs()),
                ));
            }
            cancel.sleep(poll).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::ProtocolConfig;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn chamber(transport: Arc<MockTransport>) -> ThermalChamberClient {
        ThermalChamberClient::new(ScpiClient::new(
            transport,
            "CHAMBER",
            "TCPIP0::10.0.0.5",
            ProtocolConfig::default(),
        ))
    }

    #[tokio::test]
    async fn test_becomes_stable_after_polls() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let transport = Arc::new(MockTransport::with_responder(move |_, cmd| {
            (cmd == ":TEMP:STAB?").then(|| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                (if n >= 2 { "1" } else { "0" }).to_string()
            })
        }));
        chamber(transport)
            .wait_stable(Duration::from_millis(1), Duration::from_secs(5), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_never_stable_times_out() {
        let transport = Arc::new(MockTransport::simulated());
        let err = chamber(transport)
            .wait_stable(Duration::from_millis(1), Duration::from_millis(10), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Fault::Timeout { .. }));
        assert!(err.to_string().starts_with("# TIMEOUT:CHAMBER"));
    }
}
