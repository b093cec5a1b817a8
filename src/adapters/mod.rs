//! Bus transport implementations
//!
//! A [`Transport`] moves one command or one query to an instrument address.
//! Every call is a complete transaction: open, transact, close. No connection
//! state is kept between calls, so transports are shared behind an `Arc`
//! without any locking.

pub mod mock_adapter;
pub mod visa_adapter;

pub use mock_adapter::{MockCall, MockTransport};
pub use visa_adapter::VisaTransport;

use anyhow::Result;
use async_trait::async_trait;

/// Line-oriented instrument bus.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a command that produces no response.
    async fn write(&self, address: &str, command: &str) -> Result<()>;

    /// Send a query and return the trimmed response line.
    async fn query(&self, address: &str, command: &str) -> Result<String>;

    /// Return the instrument to front-panel (local) control.
    async fn go_to_local(&self, address: &str) -> Result<()>;

    /// Short name for logs.
    fn transport_type(&self) -> &str;
}
