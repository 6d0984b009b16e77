//! Device session: connection state, fetch, push and atomic setters.
//!
//! A [`Device`] owns one [`DeviceState`] behind a per-session mutex. The
//! mutex is held while fetched records are combined into the state, while a
//! push is written out, and for the whole mutate-then-push of every atomic
//! setter, so a background fetch can never interleave with a local change.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::NaiveTime;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use melnor_types::{Brand, Endpoint, ModelInfo};

use crate::config::SyncConfig;
use crate::error::{ConnectionFailureReason, Error, Result};
use crate::events::{DeviceEvent, DisconnectReason, EventSender};
use crate::state::DeviceState;
use crate::timestamp::TimestampCodec;
use crate::traits::Transport;
use crate::valve::{Valve, Zone};

/// Manufacturer strings starting with this are brand tokens, not model codes.
const BRAND_TOKEN_PREFIX: &[u8] = b"ML_";

/// Link state of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Shared with the transport's disconnect handler.
#[derive(Debug, Default)]
struct LinkState(AtomicU8);

impl LinkState {
    fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    fn replace(&self, state: ConnectionState) -> ConnectionState {
        ConnectionState::from_u8(self.0.swap(state as u8, Ordering::SeqCst))
    }

    /// Move from `from` to `to`; false if the state changed meanwhile.
    fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// A sync session with one timer.
///
/// # Note on Clone
///
/// A `Device` owns its link and its state lock, so it is not `Clone`. Wrap
/// it in `Arc<Device<T>>` to share it between tasks.
///
/// # Example
///
/// ```
/// use melnor_core::{Device, MockTransport, TimestampCodec, Zone};
///
/// #[tokio::main]
/// async fn main() -> melnor_core::Result<()> {
///     let device = Device::new(MockTransport::new(), TimestampCodec::default());
///     device.connect().await?;
///     device.fetch_state().await?;
///
///     let zone = Zone::new(0).expect("zone 0 exists");
///     device.set_manual_watering_minutes(zone, 15).await?;
///     device.set_is_watering(zone, true).await?;
///     Ok(())
/// }
/// ```
pub struct Device<T: Transport> {
    transport: T,
    codec: TimestampCodec,
    link: Arc<LinkState>,
    /// Collapses concurrent `connect()` calls into one attempt.
    connect_lock: Mutex<()>,
    state: Mutex<DeviceState>,
    events: Option<EventSender>,
}

impl<T: Transport> std::fmt::Debug for Device<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("address", &self.address())
            .field("state", &self.connection_state())
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Device<T> {
    /// Create a disconnected session over `transport`.
    pub fn new(transport: T, codec: TimestampCodec) -> Self {
        let device = Self {
            transport,
            codec,
            link: Arc::new(LinkState::default()),
            connect_lock: Mutex::new(()),
            state: Mutex::new(DeviceState::new(codec)),
            events: None,
        };
        device.install_disconnect_handler();
        device
    }

    /// Create a session using the timezone from `config`.
    pub fn with_config(transport: T, config: &SyncConfig) -> Self {
        Self::new(transport, config.codec())
    }

    /// Publish [`DeviceEvent`]s to `sender`.
    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.events = Some(sender);
        self.install_disconnect_handler();
        self
    }

    fn install_disconnect_handler(&self) {
        let link = Arc::clone(&self.link);
        let events = self.events.clone();
        let address = self.transport.address().to_string();

        self.transport.set_disconnect_handler(Arc::new(move || {
            if link.replace(ConnectionState::Disconnected) == ConnectionState::Disconnected {
                return;
            }
            warn!("Disconnected from {}", address);
            if let Some(events) = &events {
                let _ = events.send(DeviceEvent::Disconnected {
                    address: address.clone(),
                    reason: DisconnectReason::LinkLost,
                });
            }
        }));
    }

    fn emit(&self, event: DeviceEvent) {
        if let Some(events) = &self.events {
            // No receivers is fine
            let _ = events.send(event);
        }
    }

    fn emit_error(&self, error: &Error) {
        self.emit(DeviceEvent::Error {
            address: self.address().to_string(),
            error: error.to_string(),
        });
    }

    // --- Connection ---

    /// Connect, then read the model once if it is not yet known.
    ///
    /// Returns immediately when already connected. Concurrent callers wait
    /// for the attempt in flight and share its outcome. The session stays
    /// [`ConnectionState::Connecting`] until the model has been read; a
    /// failed model read tears the link down again.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address()))]
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let _guard = match self.connect_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                debug!("Connection attempt already in flight, waiting for it");
                drop(self.connect_lock.lock().await);
                return if self.is_connected() {
                    Ok(())
                } else {
                    Err(Error::connection_failed(
                        Some(self.address().to_string()),
                        ConnectionFailureReason::Other(
                            "concurrent connection attempt failed".to_string(),
                        ),
                    ))
                };
            }
        };

        // The previous holder may have connected between the check and the lock.
        if self.is_connected() {
            return Ok(());
        }

        debug!("Connecting to {}", self.address());
        self.link.set(ConnectionState::Connecting);
        if let Err(e) = self.transport.connect().await {
            self.link.set(ConnectionState::Disconnected);
            warn!("Failed to connect to {}: {}", self.address(), e);
            self.emit_error(&e);
            return Err(e);
        }

        let mut state = self.state.lock().await;
        let handshake = if state.is_identified() {
            Ok(())
        } else {
            self.identify(&mut state).await
        };
        if let Err(e) = handshake {
            drop(state);
            return Err(self.abort_handshake(e).await);
        }
        let model = state.model().cloned();
        drop(state);

        if !self.link.advance(ConnectionState::Connecting, ConnectionState::Connected) {
            warn!("Link to {} dropped during handshake", self.address());
            return Err(Error::connection_failed(
                Some(self.address().to_string()),
                ConnectionFailureReason::LinkLost,
            ));
        }

        info!("Connected to {}", self.address());
        self.emit(DeviceEvent::Connected {
            address: self.address().to_string(),
            model,
        });
        Ok(())
    }

    /// Read the model endpoint into `state`.
    ///
    /// Timers report either a model code with a valve count or an `ML_`
    /// brand token. A brand token leaves the valve count at its default.
    async fn identify(&self, state: &mut DeviceState) -> Result<()> {
        let data = self.transport.read(Endpoint::Model).await?;
        match ModelInfo::from_bytes(&data) {
            Ok(model) => {
                debug!(model = %model.code, valve_count = model.valve_count, "Read model");
                state.set_model(model);
                Ok(())
            }
            Err(_) if data.starts_with(BRAND_TOKEN_PREFIX) => {
                let brand = Brand::from_manufacturer(&data);
                debug!(%brand, "Read brand token, keeping default valve count");
                state.set_brand(brand);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn abort_handshake(&self, error: Error) -> Error {
        warn!("Model read failed, dropping link: {}", error);
        if let Err(disconnect_err) = self.transport.disconnect().await {
            debug!("Disconnect after failed handshake: {}", disconnect_err);
        }
        self.link.set(ConnectionState::Disconnected);
        self.emit(DeviceEvent::Disconnected {
            address: self.address().to_string(),
            reason: DisconnectReason::HandshakeFailed,
        });
        Error::connection_failed(
            Some(self.address().to_string()),
            ConnectionFailureReason::HandshakeFailed(error.to_string()),
        )
    }

    /// Close the link.
    #[tracing::instrument(level = "info", skip(self), fields(address = %self.address()))]
    pub async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from {}", self.address());
        let result = self.transport.disconnect().await;
        if self.link.replace(ConnectionState::Disconnected) != ConnectionState::Disconnected {
            self.emit(DeviceEvent::Disconnected {
                address: self.address().to_string(),
                reason: DisconnectReason::UserRequested,
            });
        }
        result
    }

    // --- Sync ---

    /// Refresh the state from the device.
    ///
    /// Reconnects once first if the link is down; if that fails the call
    /// returns `Ok` and the state is left as it was. All records are read
    /// concurrently and applied under the session lock. A record that
    /// fails to read or decode is skipped, and so are valve records when a
    /// setter changed a valve while the reads were in flight. Link errors
    /// are returned only while the session still believes it is connected.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address()))]
    pub async fn fetch_state(&self) -> Result<()> {
        if !self.is_connected() {
            if let Err(e) = self.connect().await {
                warn!("Reconnect before fetch failed: {}", e);
                return Ok(());
            }
        }

        let generation = self.state.lock().await.generation();

        let transport = &self.transport;
        let (battery, manual, remaining, enabled, freq0, freq1, freq2, freq3) = tokio::join!(
            transport.read(Endpoint::Battery),
            transport.read(Endpoint::ManualSettings),
            transport.read(Endpoint::ManualRemaining),
            transport.read(Endpoint::ScheduleEnabled),
            transport.read(Endpoint::Frequency(0)),
            transport.read(Endpoint::Frequency(1)),
            transport.read(Endpoint::Frequency(2)),
            transport.read(Endpoint::Frequency(3)),
        );
        let reads = [
            (Endpoint::Battery, battery),
            (Endpoint::ManualSettings, manual),
            (Endpoint::ManualRemaining, remaining),
            (Endpoint::ScheduleEnabled, enabled),
            (Endpoint::Frequency(0), freq0),
            (Endpoint::Frequency(1), freq1),
            (Endpoint::Frequency(2), freq2),
            (Endpoint::Frequency(3), freq3),
        ];

        let mut failed = Vec::new();
        let mut link_error = None;

        let mut state = self.state.lock().await;
        let edited = state.generation() != generation;
        for (endpoint, read) in reads {
            let data = match read {
                Ok(data) => data,
                Err(e) if e.is_connection_error() => {
                    debug!("Link error reading {}: {}", endpoint, e);
                    failed.push(endpoint);
                    link_error.get_or_insert(e);
                    continue;
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", endpoint, e);
                    failed.push(endpoint);
                    continue;
                }
            };

            if edited && is_valve_setting(endpoint) {
                debug!("Keeping local {} changed during fetch", endpoint);
                continue;
            }

            let applied = match endpoint {
                Endpoint::Battery => state.apply_battery(&data),
                Endpoint::ManualSettings => state.apply_manual_settings(&data),
                Endpoint::ManualRemaining => state.apply_manual_remaining(&data),
                Endpoint::ScheduleEnabled => state.apply_schedule_enabled(&data),
                Endpoint::Frequency(index) => match Zone::new(index) {
                    Some(zone) => state.apply_frequency(zone, &data),
                    None => Ok(()),
                },
                Endpoint::Model | Endpoint::ClockSync => Ok(()),
            };
            if let Err(e) = applied {
                warn!("Discarding malformed {} record: {}", endpoint, e);
                failed.push(endpoint);
            }
        }
        let battery = state.battery_level();
        drop(state);

        if let Some(e) = link_error {
            if !self.is_connected() {
                debug!("Link dropped during fetch, reported via disconnect");
                return Ok(());
            }
            self.emit_error(&e);
            return Err(e);
        }

        self.emit(DeviceEvent::StateFetched {
            address: self.address().to_string(),
            battery,
            failed_records: failed.iter().map(ToString::to_string).collect(),
        });
        Ok(())
    }

    /// Write the full state to the device.
    #[tracing::instrument(level = "debug", skip(self), fields(address = %self.address()))]
    pub async fn push_state(&self) -> Result<()> {
        let state = self.state.lock().await;
        self.push_unlocked(&state).await
    }

    /// Write every record in order. The caller must hold the state lock.
    async fn push_unlocked(&self, state: &DeviceState) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::NotConnected);
        }

        let result = self.write_records(state).await;
        match &result {
            Ok(()) => self.emit(DeviceEvent::StatePushed {
                address: self.address().to_string(),
            }),
            Err(e) => {
                warn!("Push to {} failed: {}", self.address(), e);
                self.emit_error(e);
            }
        }
        result
    }

    async fn write_records(&self, state: &DeviceState) -> Result<()> {
        self.write(Endpoint::ManualSettings, &state.manual_settings_bytes())
            .await?;
        self.write(Endpoint::ScheduleEnabled, &state.schedule_enabled_bytes())
            .await?;
        for valve in state.slots() {
            self.write(
                Endpoint::Frequency(valve.id().get()),
                &valve.frequency().to_bytes(),
            )
            .await?;
        }
        self.write(Endpoint::ClockSync, &self.codec.current_time_bytes())
            .await
    }

    async fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<()> {
        self.transport
            .write(endpoint, data)
            .await
            .map_err(|e| match e {
                e @ Error::WriteFailed { .. } => e,
                e if e.is_connection_error() => e,
                other => Error::write_failed(endpoint, other.to_string()),
            })
    }

    /// Mutate one visible valve and push, all under the session lock.
    ///
    /// The mutation is kept even if the push fails.
    async fn mutate_and_push(&self, zone: Zone, mutate: impl FnOnce(&mut Valve)) -> Result<()> {
        let mut state = self.state.lock().await;
        let valve_count = state.valve_count();
        let valve = state.edit_valve(zone).ok_or(Error::InvalidZone {
            zone: zone.get(),
            valve_count,
        })?;
        mutate(valve);
        self.push_unlocked(&state).await
    }

    // --- Atomic setters ---

    /// Start or stop manual watering.
    pub async fn set_is_watering(&self, zone: Zone, value: bool) -> Result<()> {
        self.mutate_and_push(zone, |valve| valve.set_is_watering(value))
            .await
    }

    /// Set the manual watering duration.
    pub async fn set_manual_watering_minutes(&self, zone: Zone, minutes: u16) -> Result<()> {
        self.mutate_and_push(zone, |valve| valve.set_manual_watering_minutes(minutes))
            .await
    }

    /// Set the schedule repeat interval (clamped to 168 hours).
    pub async fn set_frequency_interval_hours(&self, zone: Zone, hours: u8) -> Result<()> {
        self.mutate_and_push(zone, |valve| {
            valve.frequency_mut().set_interval_hours(hours)
        })
        .await
    }

    /// Set the scheduled watering duration (clamped to 360 minutes).
    pub async fn set_frequency_duration_minutes(&self, zone: Zone, minutes: u16) -> Result<()> {
        self.mutate_and_push(zone, |valve| {
            valve.frequency_mut().set_duration_minutes(minutes)
        })
        .await
    }

    /// Set the schedule start time of day.
    pub async fn set_frequency_start_time(&self, zone: Zone, time: NaiveTime) -> Result<()> {
        self.mutate_and_push(zone, |valve| valve.frequency_mut().set_start_time(time))
            .await
    }

    /// Enable or disable the periodic schedule.
    pub async fn set_frequency_enabled(&self, zone: Zone, enabled: bool) -> Result<()> {
        self.mutate_and_push(zone, |valve| valve.set_schedule_enabled(enabled))
            .await
    }

    // --- Accessors ---

    /// Address of the timer as reported by the transport.
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// Current link state.
    pub fn connection_state(&self) -> ConnectionState {
        self.link.get()
    }

    /// Whether the link is up and the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// The codec used for clock values.
    pub fn codec(&self) -> TimestampCodec {
        self.codec
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> DeviceState {
        self.state.lock().await.clone()
    }

    /// Battery level in percent from the last fetch.
    pub async fn battery_level(&self) -> u8 {
        self.state.lock().await.battery_level()
    }

    /// Model read during the handshake.
    pub async fn model(&self) -> Option<ModelInfo> {
        self.state.lock().await.model().cloned()
    }

    /// Brand of a catalogued model or of a reported brand token.
    pub async fn brand(&self) -> Option<Brand> {
        self.state.lock().await.brand()
    }

    /// Number of valves, 4 until the model has been read.
    pub async fn valve_count(&self) -> u8 {
        self.state.lock().await.valve_count()
    }

    /// Display name, e.g. "4 Valve Timer".
    pub async fn name(&self) -> String {
        self.state.lock().await.name()
    }

    /// A copy of one visible valve.
    pub async fn valve(&self, zone: Zone) -> Option<Valve> {
        self.state.lock().await.valve(zone).cloned()
    }
}

/// Records that local setters change and a push writes back.
fn is_valve_setting(endpoint: Endpoint) -> bool {
    matches!(
        endpoint,
        Endpoint::ManualSettings | Endpoint::ScheduleEnabled | Endpoint::Frequency(_)
    )
}

impl<T: Transport> Drop for Device<T> {
    fn drop(&mut self) {
        if self.is_connected() {
            warn!(
                "Device {} dropped without calling disconnect()",
                self.transport.address()
            );
        }
    }
}
