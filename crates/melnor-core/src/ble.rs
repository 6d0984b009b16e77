//! btleplug implementation of [`Transport`].
//!
//! Discovery is left to the caller: hand [`BleTransport::new`] an adapter
//! and a peripheral found by whatever scan the application runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use melnor_types::Endpoint;

use crate::config::ConnectionConfig;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::retry::with_retry;
use crate::traits::{DisconnectHandler, Transport};
use crate::util::{create_identifier, format_peripheral_id};

/// First Bluetooth adapter on this host.
pub async fn default_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::connection_failed(
        None,
        ConnectionFailureReason::AdapterUnavailable,
    ))
}

/// A BLE link to one timer.
pub struct BleTransport {
    /// Kept alive for the lifetime of the peripheral.
    adapter: Adapter,
    peripheral: Peripheral,
    /// MAC address on Linux/Windows, peripheral UUID on macOS.
    address: String,
    config: ConnectionConfig,
    characteristics_cache: RwLock<HashMap<Uuid, Characteristic>>,
    disconnect_handler: Arc<Mutex<Option<DisconnectHandler>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleTransport")
            .field("address", &self.address)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BleTransport {
    /// Wrap an already-discovered peripheral. Does not connect.
    pub async fn new(
        adapter: Adapter,
        peripheral: Peripheral,
        config: ConnectionConfig,
    ) -> Result<Self> {
        config.validate()?;

        let properties = peripheral.properties().await?;
        let address = properties
            .as_ref()
            .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()))
            .unwrap_or_else(|| format_peripheral_id(&peripheral.id()));

        Ok(Self {
            adapter,
            peripheral,
            address,
            config,
            characteristics_cache: RwLock::new(HashMap::new()),
            disconnect_handler: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
        })
    }

    /// The connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Number of cached characteristics, 0 before the first connect.
    pub async fn cached_characteristic_count(&self) -> usize {
        self.characteristics_cache.read().await.len()
    }

    async fn connect_once(&self) -> Result<()> {
        if !self.peripheral.is_connected().await.unwrap_or(false) {
            timeout(self.config.connection_timeout, self.peripheral.connect())
                .await
                .map_err(|_| Error::timeout("connect to device", self.config.connection_timeout))??;
        }

        timeout(self.config.discovery_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))??;

        let mut cache = HashMap::new();
        for service in self.peripheral.services() {
            debug!("  Service: {}", service.uuid);
            for characteristic in service.characteristics {
                cache.insert(characteristic.uuid, characteristic);
            }
        }
        debug!("Cached {} characteristics", cache.len());
        *self.characteristics_cache.write().await = cache;

        Ok(())
    }

    /// Watch adapter events for this peripheral dropping off.
    async fn start_disconnect_watcher(&self) -> Result<()> {
        let mut events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let handler = Arc::clone(&self.disconnect_handler);
        let address = self.address.clone();

        let handle = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(disconnected) = event
                    && disconnected == id
                {
                    debug!("Link to {} lost", address);
                    let handler = handler.lock().unwrap_or_else(PoisonError::into_inner).clone();
                    if let Some(handler) = handler {
                        handler();
                    }
                    break;
                }
            }
        });

        if let Some(previous) = self.watcher_slot().replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    fn stop_disconnect_watcher(&self) {
        if let Some(handle) = self.watcher_slot().take() {
            handle.abort();
        }
    }

    fn watcher_slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        {
            let cache = self.characteristics_cache.read().await;
            if let Some(characteristic) = cache.get(&uuid) {
                return Ok(characteristic.clone());
            }
            if !cache.is_empty() {
                return Err(Error::characteristic_not_found(
                    uuid.to_string(),
                    self.peripheral.services().len(),
                ));
            }
        }

        warn!(
            "Characteristics cache empty, falling back to service search for {}",
            uuid
        );
        let services = self.peripheral.services();
        services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .find(|characteristic| characteristic.uuid == uuid)
            .cloned()
            .ok_or_else(|| Error::characteristic_not_found(uuid.to_string(), services.len()))
    }

    fn endpoint_uuid(endpoint: Endpoint) -> Result<Uuid> {
        endpoint
            .uuid()
            .ok_or_else(|| Error::characteristic_not_found(endpoint.to_string(), 0))
    }
}

/// Keep link-level failures recognisable, fold the rest into the
/// endpoint-specific error.
fn map_ble_error(error: btleplug::Error, wrap: impl FnOnce(String) -> Error) -> Error {
    match error {
        btleplug::Error::NotConnected | btleplug::Error::DeviceNotFound => Error::Bluetooth(error),
        other => wrap(other.to_string()),
    }
}

#[async_trait]
impl Transport for BleTransport {
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address))]
    async fn connect(&self) -> Result<()> {
        info!("Connecting...");
        with_retry(&self.config.retry, "connect", || self.connect_once()).await?;
        self.start_disconnect_watcher().await?;
        info!("Connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        // Explicit disconnects are not reported through the handler.
        self.stop_disconnect_watcher();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn read(&self, endpoint: Endpoint) -> Result<Vec<u8>> {
        let characteristic = self.find_characteristic(Self::endpoint_uuid(endpoint)?).await?;
        timeout(self.config.read_timeout, self.peripheral.read(&characteristic))
            .await
            .map_err(|_| Error::timeout(format!("read {endpoint}"), self.config.read_timeout))?
            .map_err(|e| map_ble_error(e, |reason| Error::read_failed(endpoint, reason)))
    }

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        let characteristic = self.find_characteristic(Self::endpoint_uuid(endpoint)?).await?;
        timeout(
            self.config.write_timeout,
            self.peripheral
                .write(&characteristic, data, WriteType::WithResponse),
        )
        .await
        .map_err(|_| Error::timeout(format!("write {endpoint}"), self.config.write_timeout))?
        .map_err(|e| map_ble_error(e, |reason| Error::write_failed(endpoint, reason)))
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn set_disconnect_handler(&self, handler: DisconnectHandler) {
        *self
            .disconnect_handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        self.stop_disconnect_watcher();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_errors_stay_classified() {
        let err = map_ble_error(btleplug::Error::NotConnected, |reason| {
            Error::read_failed(Endpoint::Battery, reason)
        });
        assert!(err.is_connection_error());

        let err = map_ble_error(btleplug::Error::NotSupported("x".into()), |reason| {
            Error::write_failed(Endpoint::ClockSync, reason)
        });
        assert!(matches!(
            err,
            Error::WriteFailed {
                endpoint: Endpoint::ClockSync,
                ..
            }
        ));
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_every_sync_endpoint_has_a_uuid() {
        let endpoints = [
            Endpoint::Battery,
            Endpoint::Model,
            Endpoint::ManualSettings,
            Endpoint::ManualRemaining,
            Endpoint::ScheduleEnabled,
            Endpoint::ClockSync,
        ];
        for endpoint in endpoints.into_iter().chain(Endpoint::FREQUENCIES) {
            assert!(BleTransport::endpoint_uuid(endpoint).is_ok(), "{endpoint}");
        }
        assert!(BleTransport::endpoint_uuid(Endpoint::Frequency(4)).is_err());
    }
}
