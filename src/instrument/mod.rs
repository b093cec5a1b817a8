//! Instrument protocol clients
//!
//! [`ScpiClient`] implements the contract every role shares: single-shot
//! command send, retried query, reset with operation-complete polling,
//! completion wait and remote release. The role clients in the submodules
//! wrap it with the commands of their instrument family.
//!
//! ## Failure mapping
//!
//! Transport errors (`anyhow::Error`) become [`Fault::Warning`] tagged with the
//! role id and the failed operation. Callers decide whether to escalate.
//! Sends and queries never check cancellation themselves, so teardown keeps
//! working after a cancel request; waits and polls do check it.

pub mod multimeter;
pub mod oscilloscope;
pub mod pulse_generator;
pub mod source;
pub mod thermal_chamber;

pub use multimeter::MultimeterClient;
pub use oscilloscope::OscilloscopeClient;
pub use pulse_generator::{order_levels, order_period_width, PulseGeneratorClient, PulseParam};
pub use source::SourceClient;
pub use thermal_chamber::ThermalChamberClient;

use crate::adapters::Transport;
use crate::cancel::CancelToken;
use crate::config::ProtocolConfig;
use crate::error::{Fault, FaultResult};
use crate::error_recovery::retry_with_policy;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Bit 0 of the standard event status register: operation complete.
const ESR_OPC_BIT: u32 = 0x01;

/// Shared command/response contract bound to one instrument address.
#[derive(Clone)]
pub struct ScpiClient {
    transport: Arc<dyn Transport>,
    role: String,
    address: String,
    protocol: ProtocolConfig,
}

impl ScpiClient {
    /// A client for the instrument at `address`, reported as `role`.
    pub fn new(
        transport: Arc<dyn Transport>,
        role: impl Into<String>,
        address: impl Into<String>,
        protocol: ProtocolConfig,
    ) -> Self {
        Self {
            transport,
            role: role.into(),
            address: address.into(),
            protocol,
        }
    }

    /// Role used in fault messages.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// VISA resource string.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send one command. A failure is a warning; sends are not retried.
    pub async fn send(&self, command: &str) -> FaultResult<()> {
        debug!(role = %self.role, address = %self.address, command, "send");
        self.transport
            .write(&self.address, command)
            .await
            .map_err(|e| Fault::warning(&self.role, "send", format!("{}: {}", command, e)))
    }

    /// Send a query, retrying per the protocol policy.
    pub async fn query(&self, command: &str) -> FaultResult<String> {
        let policy = self.protocol.retry_policy();
        let label = format!("{} {}", self.role, command);
        let result = retry_with_policy(&policy, &label, || {
            self.transport.query(&self.address, command)
        })
        .await;

        match result {
            Ok(reply) => {
                debug!(role = %self.role, command, reply = %reply, "query");
                Ok(reply)
            }
            Err((err, attempts)) => Err(Fault::warning(
                &self.role,
                "query",
                format!("{}: {} ({} attempts)", command, err, attempts),
            )),
        }
    }

    /// Query and parse a floating-point reply.
    pub async fn query_f64(&self, command: &str) -> FaultResult<f64> {
        let reply = self.query(command).await?;
        parse_number(&reply).ok_or_else(|| {
            Fault::warning(
                &self.role,
                "query",
                format!("{}: bad reply '{}'", command, reply),
            )
        })
    }

    /// Query a register and return its integer value.
    pub async fn query_register(&self, command: &str) -> FaultResult<u32> {
        let value = self.query_f64(command).await?;
        if value < 0.0 || !value.is_finite() {
            return Err(Fault::warning(
                &self.role,
                "query",
                format!("{}: bad register value {}", command, value),
            ));
        }
        Ok(value as u32)
    }

    /// Whether the operation-complete bit is set.
    pub async fn operation_complete(&self) -> FaultResult<bool> {
        Ok((self.query_register("*ESR?").await? & ESR_OPC_BIT) != 0)
    }

    /// Reset the instrument and wait for the reset to complete.
    ///
    /// A completion timeout is a warning, not a fatal fault.
    pub async fn reset(&self, cancel: &CancelToken) -> FaultResult<()> {
        cancel.check()?;
        self.send("*RST").await?;
        self.send("*CLS").await?;
        self.wait_opc("reset", cancel).await
    }

    /// Wait until all previously sent commands have been executed.
    pub async fn completion_wait(&self, cancel: &CancelToken) -> FaultResult<()> {
        self.wait_opc("completion wait", cancel).await
    }

    async fn wait_opc(&self, operation: &str, cancel: &CancelToken) -> FaultResult<()> {
        self.send("*OPC").await?;
        let started = Instant::now();
        let timeout = self.protocol.reset_timeout();
        loop {
            cancel.check()?;
            if self.operation_complete().await? {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                warn!(role = %self.role, operation, "operation-complete timeout");
                return Err(Fault::warning(
                    &self.role,
                    operation,
                    format!("operation not complete after {} ms", timeout.as_millis()),
                ));
            }
            cancel.sleep(self.protocol.opc_poll_interval()).await?;
        }
    }

    /// Return the instrument to local control.
    ///
    /// Never checks cancellation: this runs during teardown of aborted tabs.
    pub async fn remote_release(&self) -> FaultResult<()> {
        debug!(role = %self.role, address = %self.address, "remote release");
        self.transport
            .go_to_local(&self.address)
            .await
            .map_err(|e| Fault::warning(&self.role, "remote release", e))
    }
}

/// Parses replies such as `"+1.2345E-03"`, `"1"` or `"0.5 V"`.
pub fn parse_number(reply: &str) -> Option<f64> {
    let token = reply.trim().split(|c: char| c == ',' || c.is_whitespace()).next()?;
    token.parse::<f64>().ok()
}

/// Builds protocol clients over one shared transport.
#[derive(Clone)]
pub struct Bench {
    transport: Arc<dyn Transport>,
    protocol: ProtocolConfig,
}

impl Bench {
    /// A bench over `transport` with shared protocol timing.
    pub fn new(transport: Arc<dyn Transport>, protocol: ProtocolConfig) -> Self {
        Self {
            transport,
            protocol,
        }
    }

    /// The shared transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Protocol timing shared by every client.
    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    /// A bare protocol client for one instrument.
    pub fn client(&self, role: &str, address: &str) -> ScpiClient {
        ScpiClient::new(
            Arc::clone(&self.transport),
            role,
            address,
            self.protocol.clone(),
        )
    }

    /// A source/measure unit client.
    pub fn source(&self, role: &str, address: &str) -> SourceClient {
        SourceClient::new(self.client(role, address))
    }

    /// An oscilloscope client.
    pub fn oscilloscope(&self, role: &str, address: &str) -> OscilloscopeClient {
        OscilloscopeClient::new(self.client(role, address))
    }

    /// A pulse generator client.
    pub fn pulse_generator(&self, role: &str, address: &str) -> PulseGeneratorClient {
        PulseGeneratorClient::new(self.client(role, address))
    }

    /// A multimeter client.
    pub fn multimeter(&self, role: &str, address: &str) -> MultimeterClient {
        MultimeterClient::new(self.client(role, address))
    }

    /// A thermal chamber client.
    pub fn thermal_chamber(&self, role: &str, address: &str) -> ThermalChamberClient {
        ThermalChamberClient::new(self.client(role, address))
    }
}
