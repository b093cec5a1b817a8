//! Error types for the measurement sequencer.
//!
//! Two families live here:
//!
//! - **`Fault`**: the run-time taxonomy every protocol-client call and every
//!   orchestrator step returns:
//!   - **`Warning`**: the operation failed, but the sequence may continue or be
//!     retried (a reset completion timeout, a single bad read).
//!   - **`Fatal`**: instrument or sequence state is no longer trustworthy; the
//!     owning tab aborts and, for the orchestrators, the whole run stops.
//!   - **`Timeout`**: the thermal chamber did not report stability in time.
//!   - **`Cancelled`**: the operator asked to stop. Always propagated, never
//!     downgraded into one of the other variants.
//!
//!   The `Display` form of every non-cancel variant is already a `#`-prefixed
//!   comment row, so callers can drop it straight into the result table.
//!
//! - **`BenchError`**: configuration loading/validation and result-file I/O.
//!   These happen outside a measurement sequence and are reported to the CLI.

use thiserror::Error;

/// Convenience alias for results of sequencing operations.
pub type FaultResult<T> = std::result::Result<T, Fault>;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, BenchError>;

/// Failure classification shared by the protocol layer and the orchestrators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Recoverable failure; the sequence may continue.
    #[error("# WARN:{role} {operation}でエラー: {detail}")]
    Warning {
        /// Device role, or a virtual role such as `SEARCH`.
        role: String,
        /// Step that failed.
        operation: String,
        /// Underlying cause.
        detail: String,
    },

    /// Instrument or sequence state is no longer trustworthy.
    #[error("# FATAL:{role} {operation}でエラー: {detail}")]
    Fatal {
        /// Device role, or a virtual role such as `SEARCH`.
        role: String,
        /// Step that failed.
        operation: String,
        /// Underlying cause.
        detail: String,
    },

    /// The chamber did not stabilise in time.
    #[error("# TIMEOUT:{role} {operation}: {detail}")]
    Timeout {
        /// Device role, or a virtual role such as `SEARCH`.
        role: String,
        /// Step that failed.
        operation: String,
        /// Underlying cause.
        detail: String,
    },

    /// The operator asked to stop.
    #[error("# measurement cancelled")]
    Cancelled,
}

impl Fault {
    /// A warning for `operation` on `role`.
    pub fn warning(
        role: impl Into<String>,
        operation: impl Into<String>,
        detail: impl ToString,
    ) -> Self {
        Fault::Warning {
            role: role.into(),
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    /// A fatal fault for `operation` on `role`.
    pub fn fatal(
        role: impl Into<String>,
        operation: impl Into<String>,
        detail: impl ToString,
    ) -> Self {
        Fault::Fatal {
            role: role.into(),
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    /// A timeout for `operation` on `role`.
    pub fn timeout(
        role: impl Into<String>,
        operation: impl Into<String>,
        detail: impl ToString,
    ) -> Self {
        Fault::Timeout {
            role: role.into(),
            operation: operation.into(),
            detail: detail.to_string(),
        }
    }

    /// Promotes a warning to a fatal fault, keeping its context.
    ///
    /// Cancellation and timeouts pass through untouched.
    pub fn escalate(self) -> Self {
        match self {
            Fault::Warning {
                role,
                operation,
                detail,
            } => Fault::Fatal {
                role,
                operation,
                detail,
            },
            other => other,
        }
    }

    /// Whether this is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Fault::Cancelled)
    }

    /// Whether this fault stops the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Fault::Fatal { .. })
    }

    /// The fault rendered as a result-table comment line.
    pub fn comment(&self) -> String {
        self.to_string()
    }
}

/// Errors raised outside of a measurement sequence.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration could not be loaded or parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but is inconsistent.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Result file I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for BenchError {
    fn from(err: figment::Error) -> Self {
        BenchError::Config(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_display_is_comment_row() {
        let fault = Fault::warning("SOURCE1", "reset", "no reply");
        assert_eq!(fault.to_string(), "# WARN:SOURCE1 resetでエラー: no reply");
        assert!(fault.comment().starts_with('#'));
    }

    #[test]
    fn test_escalate_keeps_context() {
        let fault = Fault::warning("OSC", "query", "timeout").escalate();
        assert!(fault.is_fatal());
        assert!(fault.to_string().contains("OSC query"));
    }

    #[test]
    fn test_cancel_is_never_escalated() {
        assert_eq!(Fault::Cancelled.escalate(), Fault::Cancelled);
        assert!(Fault::Cancelled.is_cancelled());
    }
}
