//! Per-tab teardown guard.
//!
//! Every client a tab touches is registered here on first use. [`TabSession::close`]
//! switches outputs off, stops the oscilloscope and returns every touched
//! instrument to local control. It runs on every exit path of a tab (success,
//! warning, fatal fault, cancellation) and never checks the cancel token, so
//! teardown completes even while a run is being cancelled.

use crate::error::Fault;
use crate::instrument::{OscilloscopeClient, PulseGeneratorClient, ScpiClient, SourceClient};
use tracing::{debug, error, warn};

/// Devices touched by one tab, in first-touch order.
pub struct TabSession {
    tab: String,
    touched: Vec<ScpiClient>,
    sources: Vec<SourceClient>,
    pulse: Option<PulseGeneratorClient>,
    osc: Option<OscilloscopeClient>,
    closed: bool,
}

impl TabSession {
    /// A guard for `tab` with nothing touched yet.
    pub fn new(tab: impl Into<String>) -> Self {
        Self {
            tab: tab.into(),
            touched: Vec::new(),
            sources: Vec::new(),
            pulse: None,
            osc: None,
            closed: false,
        }
    }

    /// Tab the guard belongs to.
    pub fn tab(&self) -> &str {
        &self.tab
    }

    /// Register an instrument for remote release. Repeated touches of the
    /// same address are ignored.
    pub fn touch(&mut self, scpi: &ScpiClient) {
        if !self.touched.iter().any(|c| c.address() == scpi.address()) {
            debug!(tab = %self.tab, role = %scpi.role(), address = %scpi.address(), "device touched");
            self.touched.push(scpi.clone());
        }
    }

    /// Register a source whose output is switched off at teardown.
    pub fn track_source(&mut self, source: &SourceClient) {
        self.touch(source.scpi());
        if !self
            .sources
            .iter()
            .any(|s| s.scpi().address() == source.scpi().address())
        {
            self.sources.push(source.clone());
        }
    }

    /// Register the pulse generator for output-off and release.
    pub fn track_pulse(&mut self, pulse: &PulseGeneratorClient) {
        self.touch(pulse.scpi());
        self.pulse = Some(pulse.clone());
    }

    /// Register the oscilloscope for stop and release.
    pub fn track_osc(&mut self, osc: &OscilloscopeClient) {
        self.touch(osc.scpi());
        self.osc = Some(osc.clone());
    }

    /// Bus addresses touched so far.
    pub fn touched_addresses(&self) -> Vec<String> {
        self.touched.iter().map(|c| c.address().to_string()).collect()
    }

    /// Output off, stop, then remote release for every touched device.
    ///
    /// Every step is attempted even if an earlier one failed. The failures are
    /// returned so the caller can record them as comment rows.
    pub async fn close(&mut self) -> Vec<Fault> {
        let mut faults = Vec::new();

        for source in &self.sources {
            if let Err(fault) = source.output(false).await {
                faults.push(fault);
            }
        }
        if let Some(pulse) = &self.pulse {
            if let Err(fault) = pulse.output(false).await {
                faults.push(fault);
            }
        }
        if let Some(osc) = &self.osc {
            if let Err(fault) = osc.stop().await {
                faults.push(fault);
            }
        }
        for client in &self.touched {
            if let Err(fault) = client.remote_release().await {
                faults.push(fault);
            }
        }

        if !faults.is_empty() {
            warn!(tab = %self.tab, failures = faults.len(), "teardown incomplete");
        }
        debug!(tab = %self.tab, devices = self.touched.len(), "session closed");
        self.closed = true;
        faults
    }
}

impl Drop for TabSession {
    fn drop(&mut self) {
        if !self.closed && !self.touched.is_empty() {
            error!(
                tab = %self.tab,
                devices = ?self.touched_addresses(),
                "tab session dropped without teardown; instruments may still be in remote"
            );
        }
    }
}
