//! Cooperative cancellation for measurement runs.
//!
//! A `CancelToken` wraps a `tokio::sync::watch` flag. Orchestrators poll it at
//! every suspension point and every search step; timed waits race the sleep
//! against the flag so a request never waits out a long standby time.

use crate::error::{Fault, FaultResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Shared cancellation signal. Clones observe the same flag.
#[derive(Clone, Debug)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// A token that has not been cancelled.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns `Fault::Cancelled` once cancellation was requested.
    pub fn check(&self) -> FaultResult<()> {
        if self.is_cancelled() {
            Err(Fault::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `duration`, waking early with `Fault::Cancelled` on request.
    pub async fn sleep(&self, duration: Duration) -> FaultResult<()> {
        self.check()?;
        if duration.is_zero() {
            return Ok(());
        }

        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.check(),
            _ = rx.wait_for(|cancelled| *cancelled) => Err(Fault::Cancelled),
        }
    }

    /// Sleep for a duration given in seconds; negative or NaN values are skipped.
    pub async fn sleep_secs(&self, seconds: f64) -> FaultResult<()> {
        if seconds.is_finite() && seconds > 0.0 {
            self.sleep(Duration::from_secs_f64(seconds)).await
        } else {
            self.check()
        }
    }
}
