//! In-memory transport for testing.
//!
//! [`MockTransport`] stores one byte buffer per endpoint and records every
//! write, so sync logic can be exercised without BLE hardware.
//!
//! # Features
//!
//! - **Failure injection**: fail connects, or reads and writes on chosen endpoints
//! - **Latency simulation**: delay connects and reads to widen race windows
//! - **Link loss**: drop the link on demand or in the middle of a read

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use melnor_types::Endpoint;
use melnor_types::types::{
    FREQUENCY_BYTES, MANUAL_REMAINING_BYTES, MANUAL_SETTINGS_BYTES, SCHEDULE_ENABLED_BYTES,
};

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::traits::{DisconnectHandler, Transport};

/// A mock timer link.
///
/// # Example
///
/// ```
/// use melnor_core::{Endpoint, MockTransport, Transport};
///
/// #[tokio::main]
/// async fn main() {
///     let transport = MockTransport::new();
///     transport.connect().await.unwrap();
///     let battery = transport.read(Endpoint::Battery).await.unwrap();
///     assert_eq!(battery.len(), 2);
/// }
/// ```
pub struct MockTransport {
    address: String,
    connected: AtomicBool,
    values: RwLock<HashMap<Endpoint, Vec<u8>>>,
    writes: RwLock<Vec<(Endpoint, Vec<u8>)>>,
    connect_count: AtomicU32,
    read_count: AtomicU32,
    /// Simulated read latency in milliseconds (0 = no delay).
    read_latency_ms: AtomicU64,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    /// Connect attempts left to fail before succeeding.
    remaining_connect_failures: AtomicU32,
    failing_reads: RwLock<HashSet<Endpoint>>,
    /// Reads that fail with a link error while the handler stays silent.
    link_error_reads: RwLock<HashSet<Endpoint>>,
    failing_writes: RwLock<HashSet<Endpoint>>,
    link_lost_on_read: RwLock<Option<Endpoint>>,
    disconnect_handler: Mutex<Option<DisconnectHandler>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("address", &self.address)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("connect_count", &self.connect_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Create a disconnected mock of a four-valve Melnor timer.
    pub fn new() -> Self {
        MockTransportBuilder::new().build()
    }

    fn default_values() -> HashMap<Endpoint, Vec<u8>> {
        let mut values = HashMap::new();
        values.insert(Endpoint::Battery, vec![0x02, 0xA8]);
        values.insert(Endpoint::Model, b"93281 4".to_vec());
        values.insert(Endpoint::ManualSettings, vec![0; MANUAL_SETTINGS_BYTES]);
        values.insert(Endpoint::ManualRemaining, vec![0; MANUAL_REMAINING_BYTES]);
        values.insert(Endpoint::ScheduleEnabled, vec![0; SCHEDULE_ENABLED_BYTES]);
        for endpoint in Endpoint::FREQUENCIES {
            values.insert(endpoint, vec![0; FREQUENCY_BYTES]);
        }
        values
    }

    fn handler(&self) -> MutexGuard<'_, Option<DisconnectHandler>> {
        self.disconnect_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    // --- Test control methods ---

    /// Replace the value an endpoint returns.
    pub async fn set_value(&self, endpoint: Endpoint, data: impl Into<Vec<u8>>) {
        self.values.write().await.insert(endpoint, data.into());
    }

    /// Current stored value of an endpoint.
    pub async fn value(&self, endpoint: Endpoint) -> Option<Vec<u8>> {
        self.values.read().await.get(&endpoint).cloned()
    }

    /// Every write performed, in order.
    pub async fn writes(&self) -> Vec<(Endpoint, Vec<u8>)> {
        self.writes.read().await.clone()
    }

    /// The most recent write to an endpoint.
    pub async fn last_write(&self, endpoint: Endpoint) -> Option<Vec<u8>> {
        self.writes
            .read()
            .await
            .iter()
            .rev()
            .find(|(written, _)| *written == endpoint)
            .map(|(_, data)| data.clone())
    }

    /// Forget recorded writes.
    pub async fn clear_writes(&self) {
        self.writes.write().await.clear();
    }

    /// Make reads of `endpoint` fail until cleared.
    pub async fn fail_reads(&self, endpoint: Endpoint, fail: bool) {
        let mut failing = self.failing_reads.write().await;
        if fail {
            failing.insert(endpoint);
        } else {
            failing.remove(&endpoint);
        }
    }

    /// Make reads of `endpoint` fail with [`Error::NotConnected`] without
    /// dropping the link or notifying the disconnect handler.
    pub async fn fail_reads_with_link_error(&self, endpoint: Endpoint, fail: bool) {
        let mut failing = self.link_error_reads.write().await;
        if fail {
            failing.insert(endpoint);
        } else {
            failing.remove(&endpoint);
        }
    }

    /// Make writes to `endpoint` fail until cleared.
    pub async fn fail_writes(&self, endpoint: Endpoint, fail: bool) {
        let mut failing = self.failing_writes.write().await;
        if fail {
            failing.insert(endpoint);
        } else {
            failing.remove(&endpoint);
        }
    }

    /// Drop the link the next time `endpoint` is read.
    pub async fn lose_link_on_read(&self, endpoint: Endpoint) {
        *self.link_lost_on_read.write().await = Some(endpoint);
    }

    /// Fail the next `count` connect attempts, then succeed.
    pub fn set_connect_failures(&self, count: u32) {
        self.remaining_connect_failures
            .store(count, Ordering::Relaxed);
    }

    /// Set simulated read latency.
    pub fn set_read_latency(&self, latency: Duration) {
        self.read_latency_ms.store(
            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Set simulated connect latency.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.connect_latency_ms.store(
            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Drop the link as if the timer went out of range.
    pub fn simulate_disconnect(&self) {
        self.connected.store(false, Ordering::Relaxed);
        let handler = self.handler().clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// Whether the mock link is up.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Number of underlying connect attempts.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::Relaxed)
    }

    /// Number of reads performed.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<()> {
        self.connect_count.fetch_add(1, Ordering::Relaxed);

        let latency = self.connect_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.remaining_connect_failures.load(Ordering::Relaxed) > 0 {
            self.remaining_connect_failures
                .fetch_sub(1, Ordering::Relaxed);
            return Err(Error::connection_failed(
                Some(self.address.clone()),
                ConnectionFailureReason::OutOfRange,
            ));
        }

        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        self.check_connected()?;
        self.read_count.fetch_add(1, Ordering::Relaxed);

        if *self.link_lost_on_read.read().await == Some(endpoint) {
            *self.link_lost_on_read.write().await = None;
            self.simulate_disconnect();
            return Err(Error::NotConnected);
        }
        if self.link_error_reads.read().await.contains(&endpoint) {
            return Err(Error::NotConnected);
        }
        if self.failing_reads.read().await.contains(&endpoint) {
            return Err(Error::read_failed(endpoint, "mock read failure"));
        }

        // The reply carries the value as it was when the request arrived.
        let value = self.values.read().await.get(&endpoint).cloned();

        let latency = self.read_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check_connected()?;

        value.ok_or_else(|| Error::read_failed(endpoint, "no value"))
    }

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        self.check_connected()?;

        if self.failing_writes.read().await.contains(&endpoint) {
            return Err(Error::write_failed(endpoint, "mock write failure"));
        }

        self.writes.write().await.push((endpoint, data.to_vec()));
        if endpoint != Endpoint::ClockSync {
            self.values.write().await.insert(endpoint, data.to_vec());
        }
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self.handler() = Some(handler);
    }
}

/// Builder for mock transports with custom settings.
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    address: String,
    connected: bool,
    values: HashMap<Endpoint, Vec<u8>>,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            connected: false,
            values: MockTransport::default_values(),
        }
    }
}

impl MockTransportBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address.
    #[must_use]
    pub fn address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// Start with the link already up.
    #[must_use]
    pub fn connected(mut self, connected: bool) -> Self {
        self.connected = connected;
        self
    }

    /// Set the manufacturer string, e.g. `"93100 2"`.
    #[must_use]
    pub fn model(self, model: &str) -> Self {
        self.value(Endpoint::Model, model.as_bytes())
    }

    /// Set the raw battery record.
    #[must_use]
    pub fn battery(self, high: u8, low: u8) -> Self {
        self.value(Endpoint::Battery, [high, low])
    }

    /// Set the value of any endpoint.
    #[must_use]
    pub fn value(mut self, endpoint: Endpoint, data: impl Into<Vec<u8>>) -> Self {
        self.values.insert(endpoint, data.into());
        self
    }

    /// Build the mock transport.
    pub fn build(self) -> MockTransport {
        MockTransport {
            address: self.address,
            connected: AtomicBool::new(self.connected),
            values: RwLock::new(self.values),
            writes: RwLock::new(Vec::new()),
            connect_count: AtomicU32::new(0),
            read_count: AtomicU32::new(0),
            read_latency_ms: AtomicU64::new(0),
            connect_latency_ms: AtomicU64::new(0),
            remaining_connect_failures: AtomicU32::new(0),
            failing_reads: RwLock::new(HashSet::new()),
            link_error_reads: RwLock::new(HashSet::new()),
            failing_writes: RwLock::new(HashSet::new()),
            link_lost_on_read: RwLock::new(None),
            disconnect_handler: Mutex::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_requires_connection() {
        let transport = MockTransport::new();
        assert!(matches!(
            transport.read(Endpoint::Battery).await,
            Err(Error::NotConnected)
        ));
        assert!(matches!(
            transport.write(Endpoint::ClockSync, &[0; 4]).await,
            Err(Error::NotConnected)
        ));

        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_defaults_cover_every_read_endpoint() {
        let transport = MockTransportBuilder::new().connected(true).build();
        assert_eq!(transport.read(Endpoint::Model).await.unwrap(), b"93281 4");
        assert_eq!(transport.read(Endpoint::ManualSettings).await.unwrap().len(), 20);
        for endpoint in Endpoint::FREQUENCIES {
            assert_eq!(transport.read(endpoint).await.unwrap().len(), 8);
        }
        assert_eq!(transport.read_count(), 6);
    }

    #[tokio::test]
    async fn test_writes_are_recorded_and_stored() {
        let transport = MockTransportBuilder::new().connected(true).build();
        transport
            .write(Endpoint::ScheduleEnabled, &[1, 0, 0, 1])
            .await
            .unwrap();
        transport.write(Endpoint::ClockSync, &[0, 0, 0, 1]).await.unwrap();

        assert_eq!(transport.writes().await.len(), 2);
        assert_eq!(
            transport.read(Endpoint::ScheduleEnabled).await.unwrap(),
            vec![1, 0, 0, 1]
        );
        assert_eq!(
            transport.last_write(Endpoint::ClockSync).await,
            Some(vec![0, 0, 0, 1])
        );
        assert!(transport.value(Endpoint::ClockSync).await.is_none());
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let transport = MockTransportBuilder::new().connected(true).build();
        transport.fail_reads(Endpoint::Battery, true).await;
        transport.fail_writes(Endpoint::ManualSettings, true).await;

        assert!(matches!(
            transport.read(Endpoint::Battery).await,
            Err(Error::ReadFailed { .. })
        ));
        assert!(matches!(
            transport.write(Endpoint::ManualSettings, &[0; 20]).await,
            Err(Error::WriteFailed { .. })
        ));

        transport.fail_reads(Endpoint::Battery, false).await;
        assert!(transport.read(Endpoint::Battery).await.is_ok());
    }

    #[tokio::test]
    async fn test_silent_link_error_keeps_link_up() {
        let transport = MockTransportBuilder::new().connected(true).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        transport.set_disconnect_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        transport
            .fail_reads_with_link_error(Endpoint::Battery, true)
            .await;
        assert!(matches!(
            transport.read(Endpoint::Battery).await,
            Err(Error::NotConnected)
        ));
        assert!(transport.is_connected());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_read_returns_value_at_request_time() {
        let transport = Arc::new(MockTransportBuilder::new().connected(true).build());
        transport.set_read_latency(Duration::from_millis(200));

        let reader = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.read(Endpoint::ScheduleEnabled).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport
            .write(Endpoint::ScheduleEnabled, &[1, 1, 1, 1])
            .await
            .unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_huge_latency_saturates() {
        let transport = MockTransport::new();
        transport.set_read_latency(Duration::MAX);
        assert_eq!(transport.read_latency_ms.load(Ordering::Relaxed), u64::MAX);
    }

    #[tokio::test]
    async fn test_transient_connect_failures() {
        let transport = MockTransport::new();
        transport.set_connect_failures(2);
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(transport.connect_count(), 3);
    }

    #[tokio::test]
    async fn test_disconnect_handler_fires() {
        let transport = MockTransportBuilder::new().connected(true).build();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        transport.set_disconnect_handler(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        transport.lose_link_on_read(Endpoint::ManualRemaining).await;
        assert!(matches!(
            transport.read(Endpoint::ManualRemaining).await,
            Err(Error::NotConnected)
        ));
        assert!(!transport.is_connected());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Explicit disconnects are not reported.
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_builder() {
        let transport = MockTransportBuilder::new()
            .address("11:22:33:44:55:66")
            .model("93100 2")
            .battery(0xEE, 0xEE)
            .build();
        assert_eq!(transport.address(), "11:22:33:44:55:66");
        assert!(!transport.is_connected());
    }
}
