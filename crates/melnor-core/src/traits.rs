//! The link abstraction the sync layer is written against.
//!
//! [`Transport`] is deliberately narrow: connect, disconnect, read an
//! endpoint, write an endpoint with acknowledgement, and a disconnect
//! notification. [`BleTransport`](crate::BleTransport) implements it over
//! btleplug and [`MockTransport`](crate::MockTransport) in memory.

use std::sync::Arc;

use async_trait::async_trait;

use melnor_types::Endpoint;

use crate::error::Result;

/// Callback invoked when the link drops without `disconnect()` being called.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Raw endpoint access to a single timer.
///
/// # Example
///
/// ```ignore
/// use melnor_core::{Endpoint, Result, Transport};
///
/// async fn battery_bytes<T: Transport>(transport: &T) -> Result<Vec<u8>> {
///     transport.read(Endpoint::Battery).await
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the link. Implementations may retry internally.
    async fn connect(&self) -> Result<()>;

    /// Close the link.
    async fn disconnect(&self) -> Result<()>;

    /// Read the current value of an endpoint.
    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>>;

    /// Write a value and wait for the device to acknowledge it.
    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<()>;

    /// Device address or platform identifier.
    fn address(&self) -> &str;

    /// Register the callback for unexpected disconnects, replacing any
    /// previous one.
    fn set_disconnect_handler(&self, handler: DisconnectHandler);
}
