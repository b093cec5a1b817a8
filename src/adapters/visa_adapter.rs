//! VISA transport for GPIB/USB/Ethernet instruments
//!
//! Supports resource strings like:
//! - "GPIB0::1::INSTR" (GPIB interface)
//! - "USB0::0x1234::0x5678::SERIAL::INSTR" (USB)
//! - "TCPIP0::192.168.1.100::INSTR" (Ethernet/LXI)
//!
//! VISA calls are blocking, so every transaction runs on Tokio's blocking
//! pool. Each transaction opens its own session and closes it on drop.

use super::Transport;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(not(feature = "instrument_visa"))]
use anyhow::anyhow;

#[cfg(feature = "instrument_visa")]
use anyhow::Context;
#[cfg(feature = "instrument_visa")]
use tracing::debug;

#[cfg(feature = "instrument_visa")]
use visa_rs::prelude::*;

/// VISA transport for instrument communication
pub struct VisaTransport {
    /// Open/read timeout
    pub(crate) timeout: Duration,

    /// Line terminator for commands (typically "\n" for SCPI)
    pub(crate) line_terminator: String,
}

impl Default for VisaTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl VisaTransport {
    /// A transport with a 5 s I/O timeout and `\n` terminator.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            line_terminator: "\n".to_string(),
        }
    }

    /// Set open/read timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set line terminator for commands
    pub fn with_line_terminator(mut self, terminator: String) -> Self {
        self.line_terminator = terminator;
        self
    }

    #[cfg(feature = "instrument_visa")]
    async fn transact(&self, address: &str, command: &str, expect_reply: bool) -> Result<String> {
        use std::ffi::CString;
        use std::io::{BufRead, BufReader, Write};

        let resource = address.to_string();
        let payload = format!("{}{}", command, self.line_terminator);
        let command_for_log = command.to_string();
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
            let name = CString::new(resource.clone()).context("Invalid resource string")?;
            let mut instr = rm
                .open(&name.into(), AccessMode::NO_LOCK, timeout)
                .with_context(|| format!("Failed to open VISA resource: {}", resource))?;

            instr
                .write_all(payload.as_bytes())
                .with_context(|| format!("VISA write failed for: {}", command_for_log))?;

            if !expect_reply {
                debug!(address = %resource, command = %command_for_log, "VISA write");
                return Ok(String::new());
            }

            let mut response = String::new();
            BufReader::new(&instr)
                .read_line(&mut response)
                .with_context(|| format!("VISA read failed for: {}", command_for_log))?;
            let response = response.trim().to_string();
            debug!(address = %resource, command = %command_for_log, response = %response, "VISA query");
            Ok(response)
        })
        .await
        .context("VISA I/O task panicked")?
    }

    #[cfg(not(feature = "instrument_visa"))]
    async fn transact(&self, _address: &str, _command: &str, _expect_reply: bool) -> Result<String> {
        Err(anyhow!(
            "VISA support not enabled. Rebuild with --features instrument_visa"
        ))
    }
}

#[async_trait]
impl Transport for VisaTransport {
    async fn write(&self, address: &str, command: &str) -> Result<()> {
        self.transact(address, command, false).await.map(|_| ())
    }

    async fn query(&self, address: &str, command: &str) -> Result<String> {
        self.transact(address, command, true).await
    }

    async fn go_to_local(&self, address: &str) -> Result<()> {
        #[cfg(feature = "instrument_visa")]
        {
            use std::ffi::CString;

            let resource = address.to_string();
            let timeout = self.timeout;
            tokio::task::spawn_blocking(move || {
                let rm = DefaultRM::new().context("Failed to create VISA resource manager")?;
                let name = CString::new(resource.clone()).context("Invalid resource string")?;
                let instr = rm
                    .open(&name.into(), AccessMode::NO_LOCK, timeout)
                    .with_context(|| format!("Failed to open VISA resource: {}", resource))?;
                instr
                    .gpib_control_ren(visa_rs::enums::gpib::RenMode::AddressGtl)
                    .with_context(|| format!("Go-to-local failed for: {}", resource))?;
                debug!(address = %resource, "VISA go-to-local");
                Ok::<(), anyhow::Error>(())
            })
            .await
            .context("VISA go-to-local task panicked")?
        }

        #[cfg(not(feature = "instrument_visa"))]
        {
            let _ = address;
            Err(anyhow!(
                "VISA support not enabled. Rebuild with --features instrument_visa"
            ))
        }
    }

    fn transport_type(&self) -> &str {
        "visa"
    }
}
