//! Mock transport for tests and `--simulate` runs
//!
//! Every call is recorded. Replies come from a caller-supplied responder,
//! falling back to a generic instrument that reports every operation as
//! complete and every reading as zero. Writes are passed to the responder as
//! well so it can keep simulated instrument state.

use super::Transport;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Mutex;

/// Responder closure: `(address, command) -> reply`. `None` falls back to the
/// default reply.
pub type Responder = dyn Fn(&str, &str) -> Option<String> + Send + Sync;

/// One recorded transaction. Go-to-local is recorded as command `"GTL"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    /// Bus address the call went to.
    pub address: String,
    /// Command or query text.
    pub command: String,
}

#[derive(Debug, Clone)]
struct FailureRule {
    address: String,
    command_prefix: String,
    remaining: Option<u32>,
}

/// In-memory [`Transport`] that records every call.
pub struct MockTransport {
    responder: Box<Responder>,
    calls: Mutex<Vec<MockCall>>,
    failures: Mutex<Vec<FailureRule>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::simulated()
    }
}

impl MockTransport {
    /// A transport that answers with the default replies only.
    pub fn simulated() -> Self {
        Self::with_responder(|_, _| None)
    }

    /// A transport that asks `responder` first, then falls back to the defaults.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&str, &str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
        }
    }

    /// Make calls to `address` whose command starts with `command_prefix` fail.
    ///
    /// `times = None` fails forever; `Some(n)` fails the next `n` matching calls.
    pub fn fail_on(&self, address: &str, command_prefix: &str, times: Option<u32>) {
        let rule = FailureRule {
            address: address.to_string(),
            command_prefix: command_prefix.to_string(),
            remaining: times,
        };
        match self.failures.lock() {
            Ok(mut rules) => rules.push(rule),
            Err(poisoned) => poisoned.into_inner().push(rule),
        }
    }

    /// All recorded calls in order.
    pub fn calls(&self) -> Vec<MockCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Commands sent to one address, in order.
    pub fn commands_for(&self, address: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.address == address)
            .map(|c| c.command)
            .collect()
    }

    /// Number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    fn record(&self, address: &str, command: &str) {
        let call = MockCall {
            address: address.to_string(),
            command: command.to_string(),
        };
        match self.calls.lock() {
            Ok(mut calls) => calls.push(call),
            Err(poisoned) => poisoned.into_inner().push(call),
        }
    }

    fn check_failure(&self, address: &str, command: &str) -> Result<()> {
        let mut rules = match self.failures.lock() {
            Ok(rules) => rules,
            Err(poisoned) => poisoned.into_inner(),
        };
        let hit = rules.iter_mut().find(|r| {
            r.address == address
                && command.starts_with(&r.command_prefix)
                && r.remaining != Some(0)
        });
        match hit {
            Some(rule) => {
                if let Some(n) = rule.remaining.as_mut() {
                    *n -= 1;
                }
                Err(anyhow!("simulated I/O failure on {}: {}", address, command))
            }
            None => Ok(()),
        }
    }
}

/// Reply of an instrument with nothing special to say.
pub fn default_reply(command: &str) -> String {
    let upper = command.trim().to_ascii_uppercase();
    if upper.starts_with("*OPC?") || upper.starts_with("*ESR?") {
        "1".to_string()
    } else if upper.starts_with("*IDN?") {
        "SIMULATED,MOCK,0,1.0".to_string()
    } else {
        "0".to_string()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, address: &str, command: &str) -> Result<()> {
        self.record(address, command);
        self.check_failure(address, command)?;
        let _ = (self.responder)(address, command);
        Ok(())
    }

    async fn query(&self, address: &str, command: &str) -> Result<String> {
        self.record(address, command);
        self.check_failure(address, command)?;
        Ok((self.responder)(address, command).unwrap_or_else(|| default_reply(command)))
    }

    async fn go_to_local(&self, address: &str) -> Result<()> {
        self.record(address, "GTL");
        self.check_failure(address, "GTL")
    }

    fn transport_type(&self) -> &str {
        "mock"
    }
}
