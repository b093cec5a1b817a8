//! Oscilloscope client: acquisition control, trigger/measure status probes and
//! the delay measurement register.

use super::ScpiClient;
use crate::cancel::CancelToken;
use crate::error::FaultResult;
use crate::settings::OscilloscopeSettings;
use crate::units::format_value;

/// Operation status condition register: acquisition running.
const OPER_RUN_BIT: u32 = 1 << 3;

/// Channels 5-8 of an eight-channel scope, switched off when unused.
const EXTRA_CHANNELS: std::ops::RangeInclusive<usize> = 5..=8;

/// Digital oscilloscope driver.
#[derive(Clone)]
pub struct OscilloscopeClient {
    scpi: ScpiClient,
}

impl OscilloscopeClient {
    /// Wrap a protocol client.
    pub fn new(scpi: ScpiClient) -> Self {
        Self { scpi }
    }

    /// The underlying protocol client.
    pub fn scpi(&self) -> &ScpiClient {
        &self.scpi
    }

    /// Reset and program channels, trigger, timebase and the optional delay
    /// measurement. With `use_8ch_osc`, channels 5-8 are switched off.
    pub async fn configure(
        &self,
        settings: &OscilloscopeSettings,
        use_8ch_osc: bool,
        cancel: &CancelToken,
    ) -> FaultResult<()> {
        self.scpi.reset(cancel).await?;

        for index in 0..OscilloscopeSettings::MAX_CHANNELS {
            let channel = index + 1;
            match settings.channels.get(index) {
                Some(setup) => {
                    self.scpi.send(&format!(":CHAN{}:DISP ON", channel)).await?;
                    self.scpi
                        .send(&format!(":CHAN{}:SCAL {}", channel, format_value(setup.range)))
                        .await?;
                    self.scpi
                        .send(&format!(":CHAN{}:POS {}", channel, format_value(setup.position)))
                        .await?;
                }
                None => self.scpi.send(&format!(":CHAN{}:DISP OFF", channel)).await?,
            }
        }
        if use_8ch_osc {
            for channel in EXTRA_CHANNELS {
                self.scpi.send(&format!(":CHAN{}:DISP OFF", channel)).await?;
            }
        }

        self.scpi
            .send(&format!(":TRIG:EDGE:SOUR CHAN{}", settings.trigger_source))
            .await?;
        self.scpi
            .send(&format!(":TRIG:EDGE:SLOP {}", settings.trigger_slope.scpi()))
            .await?;
        self.scpi
            .send(&format!(":TRIG:LEV {}", format_value(settings.trigger_level)))
            .await?;
        self.scpi
            .send(&format!(":TIM:SCAL {}", format_value(settings.time_per_div)))
            .await?;
        self.scpi
            .send(&format!(
                ":TIM:REF:PERC {}",
                format_value(settings.trigger_position_percent)
            ))
            .await?;

        if let Some(delay) = &settings.delay {
            self.scpi
                .send(&format!(
                    ":MEAS:DEL CHAN{},CHAN{}",
                    delay.reference_channel, delay.channel
                ))
                .await?;
            self.scpi
                .send(&format!(":MEAS:DEL:EDGE {}", delay.polarity.scpi()))
                .await?;
            self.scpi
                .send(&format!(
                    ":MEAS:WIND {},{}",
                    format_value(delay.window_start),
                    format_value(delay.window_end)
                ))
                .await?;
        }

        self.scpi.completion_wait(cancel).await
    }

    /// Start continuous acquisition.
    pub async fn run(&self) -> FaultResult<()> {
        self.scpi.send(":RUN").await
    }

    /// Stop acquisition.
    pub async fn stop(&self) -> FaultResult<()> {
        self.scpi.send(":STOP").await
    }

    /// Arm a single acquisition.
    pub async fn single(&self) -> FaultResult<()> {
        self.scpi.send(":SING").await
    }

    /// Trigger event register; reading it clears it.
    pub async fn is_triggered(&self) -> FaultResult<bool> {
        Ok(self.scpi.query_register(":TER?").await? != 0)
    }

    /// Clears a pending trigger event without looking at it.
    pub async fn clear_trigger(&self) -> FaultResult<()> {
        self.scpi.query(":TER?").await.map(|_| ())
    }

    /// Whether the scope reports a running acquisition.
    pub async fn is_running(&self) -> FaultResult<bool> {
        Ok((self.scpi.query_register(":OPER:COND?").await? & OPER_RUN_BIT) != 0)
    }

    /// Acquisition-done event register.
    pub async fn measure_complete(&self) -> FaultResult<bool> {
        Ok(self.scpi.query_register(":ADER?").await? != 0)
    }

    /// Delay between the reference and measured channel edges, in seconds.
    pub async fn read_delay(&self) -> FaultResult<f64> {
        self.scpi.query_f64(":MEAS:DEL?").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockTransport;
    use crate::config::ProtocolConfig;
    use crate::settings::{ChannelSetup, Slope};
    use std::sync::Arc;

    fn settings() -> OscilloscopeSettings {
        OscilloscopeSettings {
            channels: vec![ChannelSetup {
                range: 0.5,
                position: 0.0,
            }],
            trigger_source: 1,
            trigger_slope: Slope::Rise,
            trigger_level: 1.0,
            time_per_div: 0.001,
            trigger_position_percent: 50.0,
            delay: None,
        }
    }

    #[tokio::test]
    async fn test_unused_channels_switched_off() {
        let transport = Arc::new(MockTransport::simulated());
        let osc = OscilloscopeClient::new(ScpiClient::new(
            transport.clone(),
            "OSC",
            "USB0::1",
            ProtocolConfig::default(),
        ));
        osc.configure(&settings(), true, &CancelToken::new()).await.unwrap();
        let commands = transport.commands_for("USB0::1");
        assert!(commands.contains(&":CHAN1:DISP ON".to_string()));
        assert!(commands.contains(&":CHAN4:DISP OFF".to_string()));
        assert!(commands.contains(&":CHAN8:DISP OFF".to_string()));
        assert!(commands.contains(&":TRIG:EDGE:SLOP POS".to_string()));
    }

    #[tokio::test]
    async fn test_four_channel_scope_leaves_extra_channels_alone() {
        let transport = Arc::new(MockTransport::simulated());
        let osc = OscilloscopeClient::new(ScpiClient::new(
            transport.clone(),
            "OSC",
            "USB0::1",
            ProtocolConfig::default(),
        ));
        osc.configure(&settings(), false, &CancelToken::new()).await.unwrap();
        assert!(!transport
            .commands_for("USB0::1")
            .iter()
            .any(|c| c.starts_with(":CHAN5")));
    }

    #[tokio::test]
    async fn test_status_probes() {
        let transport = Arc::new(MockTransport::with_responder(|_, cmd| match cmd {
            ":TER?" => Some("+1".to_string()),
            ":OPER:COND?" => Some("8".to_string()),
            ":MEAS:DEL?" => Some("1.5E-06".to_string()),
            _ => None,
        }));
        let osc = OscilloscopeClient::new(ScpiClient::new(
            transport,
            "OSC",
            "USB0::1",
            ProtocolConfig::default(),
        ));
        assert!(osc.is_triggered().await.unwrap());
        assert!(osc.is_running().await.unwrap());
        assert!(!osc.measure_complete().await.unwrap());
        assert_eq!(osc.read_delay().await.unwrap(), 1.5e-6);
    }
}
