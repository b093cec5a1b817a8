//! Pulse generator client.
//!
//! Period/width and high/low level are interdependent: writing them in the
//! wrong order can create a transient width ≥ period or low ≥ high state the
//! generator rejects. The current values are read back first and the two
//! writes are issued in the order that keeps every intermediate state valid,
//! with a completion wait in between.

use super::ScpiClient;
use crate::cancel::CancelToken;
use crate::error::FaultResult;
use crate::settings::{Impedance, Polarity, PulseGeneratorSettings};
use crate::units::format_value;
use tracing::debug;

/// One of two interdependent pulse parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseParam {
    /// Pulse period.
    Period,
    /// Pulse width.
    Width,
    /// High level.
    High,
    /// Low level.
    Low,
}

/// Write order for a new period/width pair.
///
/// Width goes first when it already fits into the current period.
pub fn order_period_width(current_period: f64, target_width: f64) -> [PulseParam; 2] {
    if target_width < current_period {
        [PulseParam::Width, PulseParam::Period]
    } else {
        [PulseParam::Period, PulseParam::Width]
    }
}

/// Write order for a new high/low pair.
///
/// Low goes first when it is already below the current high level.
pub fn order_levels(current_high: f64, target_low: f64) -> [PulseParam; 2] {
    if target_low < current_high {
        [PulseParam::Low, PulseParam::High]
    } else {
        [PulseParam::High, PulseParam::Low]
    }
}

/// Pulse generator driver for one output channel.
#[derive(Clone)]
pub struct PulseGeneratorClient {
    scpi: ScpiClient,
    channel: u8,
}

impl PulseGeneratorClient {
    /// Wrap a protocol client, driving channel 1.
    pub fn new(scpi: ScpiClient) -> Self {
        Self { scpi, channel: 1 }
    }

    /// Output channel the client drives.
    pub fn with_channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    /// The underlying protocol client.
    pub fn scpi(&self) -> &ScpiClient {
        &self.scpi
    }

    fn command(&self, param: PulseParam) -> String {
        match param {
            PulseParam::Period => format!(":PULS:PER{}", self.channel),
            PulseParam::Width => format!(":PULS:WIDT{}", self.channel),
            PulseParam::High => format!(":VOLT{}:HIGH", self.channel),
            PulseParam::Low => format!(":VOLT{}:LOW", self.channel),
        }
    }

    async fn read(&self, param: PulseParam) -> FaultResult<f64> {
        self.scpi.query_f64(&format!("{}?", self.command(param))).await
    }

    async fn write(&self, param: PulseParam, value: f64) -> FaultResult<()> {
        self.scpi
            .send(&format!("{} {}", self.command(param), format_value(value)))
            .await
    }

    async fn write_ordered(
        &self,
        order: [PulseParam; 2],
        value_of: impl Fn(PulseParam) -> f64,
        cancel: &CancelToken,
    ) -> FaultResult<()> {
        let [first, second] = order;
        self.write(first, value_of(first)).await?;
        self.scpi.completion_wait(cancel).await?;
        self.write(second, value_of(second)).await
    }

    /// Reset and program timing, levels, polarity, load and trigger routing.
    /// The channel comes from [`with_channel`](Self::with_channel).
    ///
    /// With `triggered` the generator waits for a bus trigger (`*TRG`) per
    /// pulse instead of free-running.
    pub async fn configure(
        &self,
        settings: &PulseGeneratorSettings,
        triggered: bool,
        cancel: &CancelToken,
    ) -> FaultResult<()> {
        self.scpi.reset(cancel).await?;

        let load = match settings.impedance {
            Impedance::HighZ => "INF".to_string(),
            Impedance::Ohms(ohms) => format_value(ohms),
        };
        self.scpi
            .send(&format!(":OUTP{}:IMP:EXT {}", self.channel, load))
            .await?;
        let polarity = match settings.polarity {
            Polarity::Normal => "NORM",
            Polarity::Inverted => "INV",
        };
        self.scpi
            .send(&format!(":OUTP{}:POL {}", self.channel, polarity))
            .await?;

        self.set_timing(settings.period, settings.width, cancel)
            .await?;
        self.set_levels(settings.low_level, settings.high_level, cancel)
            .await?;

        self.scpi
            .send(if triggered { ":ARM:SOUR BUS" } else { ":ARM:SOUR IMM" })
            .await?;
        self.scpi
            .send(if settings.trigger_out {
                ":TRIG:OUTP ON"
            } else {
                ":TRIG:OUTP OFF"
            })
            .await?;
        self.scpi.completion_wait(cancel).await
    }

    /// Apply a period/width pair in a safe order.
    pub async fn set_timing(&self, period: f64, width: f64, cancel: &CancelToken) -> FaultResult<()> {
        let current_period = self.read(PulseParam::Period).await?;
        let order = order_period_width(current_period, width);
        debug!(current_period, period, width, ?order, "pulse timing");
        self.write_ordered(
            order,
            |p| if p == PulseParam::Period { period } else { width },
            cancel,
        )
        .await
    }

    /// Apply a low/high level pair in a safe order.
    pub async fn set_levels(&self, low: f64, high: f64, cancel: &CancelToken) -> FaultResult<()> {
        let current_high = self.read(PulseParam::High).await?;
        let order = order_levels(current_high, low);
        debug!(current_high, low, high, ?order, "pulse levels");
        self.write_ordered(order, |p| if p == PulseParam::Low { low } else { high }, cancel)
            .await
    }

    /// Switch the channel output.
    pub async fn output(&self, on: bool) -> FaultResult<()> {
        self.scpi
            .send(&format!(
                ":OUTP{} {}",
                self.channel,
                if on { "ON" } else { "OFF" }
            ))
            .await
    }

    /// Fire one pulse when armed on the bus.
    pub async fn trigger(&self) -> FaultResult<()> {
        self.scpi.send("*TRG").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::ProtocolConfig;
    use std::sync::Arc;

    #[test]
    fn test_order_period_width() {
        // new width fits the current period
        assert_eq!(
            order_period_width(1e-3, 1e-5),
            [PulseParam::Width, PulseParam::Period]
        );
        // new width would not fit, period grows first
        assert_eq!(
            order_period_width(1e-3, 2e-3),
            [PulseParam::Period, PulseParam::Width]
        );
    }

    #[test]
    fn test_order_levels() {
        assert_eq!(order_levels(1.0, 0.5), [PulseParam::Low, PulseParam::High]);
        assert_eq!(order_levels(1.0, 1.5), [PulseParam::High, PulseParam::Low]);
    }

    #[tokio::test]
    async fn test_set_levels_reads_current_high_first() {
        let transport = Arc::new(MockTransport::with_responder(|_, cmd| {
            (cmd == ":VOLT1:HIGH?").then(|| "0.5".to_string())
        }));
        let pulse = PulseGeneratorClient::new(ScpiClient::new(
            transport.clone(),
            "PULSE",
            "GPIB0::10",
            ProtocolConfig::default(),
        ));
        pulse.set_levels(2.0, 3.0, &CancelToken::new()).await.unwrap();

        let commands = transport.commands_for("GPIB0::10");
        let high = commands
            .iter()
            .position(|c| c == ":VOLT1:HIGH 3.000000000")
            .unwrap();
        let low = commands
            .iter()
            .position(|c| c == ":VOLT1:LOW 2.000000000")
            .unwrap();
        assert_eq!(commands[0], ":VOLT1:HIGH?");
        assert!(high < low);
    }
}
